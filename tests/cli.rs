use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn pipesh(dir: &Path, args: &[&str], script: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pipesh"))
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn pipesh");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(script.as_bytes())
        .expect("write script");
    child.wait_with_output().expect("wait for pipesh")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn dir_with_five_entries() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["one", "two", "three", "four", "five"] {
        fs::write(tmp.path().join(name), name).unwrap();
    }
    tmp
}

#[test]
fn ls_into_wc_counts_entries() {
    let tmp = dir_with_five_entries();
    for mode in [&[][..], &["--sequential"][..]] {
        let mut args = vec!["-c", "ls | wc -l"];
        args.extend_from_slice(mode);
        let output = pipesh(tmp.path(), &args, "");
        assert!(output.status.success(), "{mode:?}: {}", stderr(&output));
        assert_eq!(stdout(&output).trim(), "5", "{mode:?}");
    }
}

#[test]
fn missing_input_file_reports_and_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pipesh(tmp.path(), &[], "cat < missing.txt\necho next\n");
    assert!(stderr(&output).contains("missing.txt"), "{}", stderr(&output));
    assert_eq!(stdout(&output), "next\n");
    assert!(output.status.success());
}

#[test]
fn unknown_command_reports_and_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pipesh(tmp.path(), &[], "nonexistent_cmd_xyz\necho still here\n");
    assert!(
        stderr(&output).contains("nonexistent_cmd_xyz: command not found"),
        "{}",
        stderr(&output)
    );
    assert_eq!(stdout(&output), "still here\n");
}

#[test]
fn malformed_pipeline_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pipesh(tmp.path(), &["-c", "ls | | wc"], "");
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("syntax error"), "{}", stderr(&output));
    assert!(stdout(&output).is_empty());
}

#[test]
fn builtin_and_external_echo_write_the_same_file() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pipesh(
        tmp.path(),
        &[],
        "echo a b c\n/bin/echo a b c > out.txt\n",
    );
    assert_eq!(stdout(&output), "a b c\n");
    assert_eq!(fs::read_to_string(tmp.path().join("out.txt")).unwrap(), "a b c\n");
}

#[test]
fn stdin_is_restored_after_sequential_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().canonicalize().unwrap();
    // The blank line is longer than the reader's buffer, so the lines after the
    // pipeline are only read from the interpreter's stdin once the pipeline is done.
    let script = format!("echo hi | cat\n{}\npwd\nexit\n", " ".repeat(64 * 1024));

    let output = pipesh(&dir, &["--sequential"], &script);

    assert_eq!(stdout(&output), format!("hi\n{}\n", dir.display()));
    assert!(output.status.success(), "{}", stderr(&output));
}

#[test]
fn exit_status_is_propagated() {
    let tmp = tempfile::tempdir().unwrap();
    assert_eq!(pipesh(tmp.path(), &["-c", "exit 3"], "").status.code(), Some(3));
    assert_eq!(pipesh(tmp.path(), &["-c", "false"], "").status.code(), Some(1));
    assert_eq!(
        pipesh(tmp.path(), &[], "true\nexit\necho unreachable\n").status.code(),
        Some(0)
    );
}

#[test]
fn cd_and_mkdir_affect_later_commands() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().canonicalize().unwrap();
    let output = pipesh(&dir, &[], "mkdir work\ncd work\n/bin/pwd\nls | wc -l\n");
    let out = stdout(&output);
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some(dir.join("work").to_str().unwrap()));
    assert_eq!(lines.next().map(str::trim), Some("0"));
}

#[test]
fn pipeline_with_redirects_at_both_ends() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("in.txt"), "b\na\nc\na\n").unwrap();
    let output = pipesh(tmp.path(), &["-c", "sort < in.txt | uniq > out.txt"], "");
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).is_empty());
    assert_eq!(fs::read_to_string(tmp.path().join("out.txt")).unwrap(), "a\nb\nc\n");
}
