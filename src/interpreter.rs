use crate::builtin::default_factories;
use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::engine::{self, Engine, ExecError};
use crate::env::Environment;
use crate::parser::{self, ParsedCommand};
use anyhow::Context;
use log::{debug, error, info, warn};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::borrow::Cow;
use std::io::{self, BufRead, IsTerminal, Read, Write};

/// Prompt shown by the interactive loop unless configured otherwise.
pub const DEFAULT_PROMPT: &str = "> ";

/// Exit code for lines the engine refused to run (syntax errors).
const SYNTAX_ERROR_CODE: ExitCode = 2;

/// A minimal interactive shell: built-ins in-process, everything else through the [`Engine`].
///
/// Example
/// ```
/// use pipesh::Interpreter;
/// let mut sh = Interpreter::default();
/// assert_eq!(sh.run_line("true | true"), 0);
/// assert_eq!(sh.run_line("exit 4"), 4);
/// assert!(sh.should_exit());
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    engine: Engine,
    prompt: String,
    last_status: ExitCode,
}

impl Interpreter {
    /// Create an interpreter with a custom set of built-in factories.
    pub fn new(engine: Engine, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            commands,
            engine,
            prompt: DEFAULT_PROMPT.to_string(),
            last_status: 0,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Status of the most recent non-empty line.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    /// Parse and run one line of input, returning its exit status.
    ///
    /// Lines without command words are ignored. Errors are printed to stderr;
    /// nothing here stops the loop except the `exit` built-in.
    pub fn run_line(&mut self, line: &str) -> ExitCode {
        let cmd = parser::parse(line);
        if cmd.is_empty() {
            return self.last_status;
        }
        debug!("parsed {:?}", cmd);
        if let Err(e) = cmd.validate() {
            eprintln!("pipesh: {}", e);
            self.last_status = SYNTAX_ERROR_CODE;
            return self.last_status;
        }

        let status = match self.find_builtin(&cmd) {
            Some(builtin) => self.run_builtin(builtin, &cmd).unwrap_or_else(|e| {
                eprintln!("pipesh: {:#}", e);
                1
            }),
            None => match self.engine.execute(&cmd, &self.env) {
                Ok(report) => {
                    debug!("executed {:?}", report);
                    report.last_status()
                }
                Err(e) => {
                    eprintln!("pipesh: {}", e);
                    error!("line not executed: {}", e);
                    match e {
                        ExecError::Spawn { .. } | ExecError::Pipe(_) | ExecError::Stdin(_) => 1,
                        _ => SYNTAX_ERROR_CODE,
                    }
                }
            },
        };
        self.last_status = status;
        status
    }

    /// Built-ins only run as single-stage commands; inside a pipeline every
    /// stage is an external program.
    fn find_builtin(&self, cmd: &ParsedCommand) -> Option<Box<dyn ExecutableCommand>> {
        if cmd.is_pipeline() {
            return None;
        }
        let stage = cmd.stages.first()?;
        let name = stage.program()?;
        let args: Vec<&str> = stage.args().iter().map(String::as_str).collect();
        self.commands
            .iter()
            .find_map(|factory| factory.try_create(name, &args))
    }

    fn run_builtin(
        &mut self,
        builtin: Box<dyn ExecutableCommand>,
        cmd: &ParsedCommand,
    ) -> anyhow::Result<ExitCode> {
        let mut stdin: Box<dyn Read> = match &cmd.input_path {
            Some(path) => Box::new(
                engine::open_input_file(path, &self.env)
                    .with_context(|| format!("{}: cannot open input file", path))?,
            ),
            None => Box::new(io::stdin()),
        };
        let mut stdout: Box<dyn Write> = match &cmd.output_path {
            Some(path) => Box::new(
                engine::open_output_file(path, &self.env)
                    .with_context(|| format!("{}: cannot open output file", path))?,
            ),
            None => Box::new(io::stdout()),
        };
        let status = builtin.execute(&mut stdin, &mut stdout, &mut self.env)?;
        stdout.flush()?;
        Ok(status)
    }

    /// Read-eval loop over standard input until `exit` or end of input.
    ///
    /// A terminal gets line editing and a prompt; anything else is read as a
    /// plain script, one command per line, without a prompt.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        if io::stdin().is_terminal() {
            self.repl_interactive()
        } else {
            self.run_script(io::stdin().lock())
        }
    }

    /// Run every line from `reader` until `exit` or end of input.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than ending the loop.
    pub fn run_script(&mut self, mut reader: impl BufRead) -> anyhow::Result<ExitCode> {
        let mut buf = Vec::new();
        while !self.should_exit() {
            buf.clear();
            if reader
                .read_until(b'\n', &mut buf)
                .context("failed to read input")?
                == 0
            {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            if matches!(line, Cow::Owned(_)) {
                warn!("input line is not valid UTF-8, running it with replacements");
            }
            self.run_line(line.trim_end_matches(['\n', '\r']));
        }
        Ok(self.last_status)
    }

    fn repl_interactive(&mut self) -> anyhow::Result<ExitCode> {
        let mut rl = DefaultEditor::new()
            .map_err(|e| anyhow::anyhow!("cannot initialise line editor: {}", e))?;

        while !self.should_exit() {
            match rl.readline(&self.prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                    self.run_line(&line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    info!("end of input");
                    break;
                }
                Err(ReadlineError::Io(err)) => {
                    return Err(anyhow::anyhow!("failed to read line: {}", err));
                }
                Err(err) => {
                    eprintln!("pipesh: cannot read line: {}", err);
                    warn!("line skipped: {}", err);
                }
            }
        }

        Ok(self.last_status)
    }
}

impl Default for Interpreter {
    /// Concurrent pipeline scheduling with the built-ins `cd`, `pwd`, `mkdir`, `echo` and `exit`.
    fn default() -> Self {
        Self::new(Engine::default(), default_factories())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Schedule;
    use crate::testutil::lock_process_state;
    use std::fs;
    use std::io::Cursor;

    fn interpreter_in(dir: &std::path::Path, schedule: Schedule) -> Interpreter {
        let mut sh = Interpreter::new(Engine::new(schedule), default_factories());
        sh.env_mut().current_dir = dir.to_path_buf();
        sh
    }

    #[test]
    fn test_builtin_and_engine_echo_agree() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);

        assert_eq!(sh.run_line("echo a b c > builtin.txt"), 0);
        assert_eq!(sh.run_line("/bin/echo a b c > engine.txt"), 0);

        let builtin = fs::read_to_string(tmp.path().join("builtin.txt")).unwrap();
        let engine = fs::read_to_string(tmp.path().join("engine.txt")).unwrap();
        assert_eq!(builtin, "a b c\n");
        assert_eq!(engine, "a b c\n");
    }

    #[test]
    fn test_blank_and_redirect_only_lines_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        sh.run_line("false");
        assert_eq!(sh.run_line(""), 1);
        assert_eq!(sh.run_line("   "), 1);
        assert_eq!(sh.run_line("> nothing.txt"), 1);
        assert!(!tmp.path().join("nothing.txt").exists());
    }

    #[test]
    fn test_errors_do_not_stop_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);

        assert_eq!(sh.run_line("nonexistent_cmd_xyz"), 127);
        assert_eq!(sh.run_line("cat < missing.txt"), 1);
        assert_eq!(sh.run_line("ls | | wc"), SYNTAX_ERROR_CODE);
        assert_eq!(sh.run_line("echo hi >"), SYNTAX_ERROR_CODE);
        assert!(!sh.should_exit());
        assert_eq!(sh.run_line("true"), 0);
    }

    #[test]
    fn test_plain_file_is_not_executable() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("plain.txt"), "echo hi\n").unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        assert_eq!(sh.run_line("./plain.txt"), 126);
        assert_eq!(sh.run_line("./absent"), 127);
    }

    #[test]
    fn test_builtin_input_redirect_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        assert_eq!(sh.run_line("pwd < missing.txt"), 1);
    }

    #[test]
    fn test_builtins_in_pipeline_run_externally() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        assert_eq!(sh.run_line("echo one two | wc -w > count.txt"), 0);
        let count = fs::read_to_string(tmp.path().join("count.txt")).unwrap();
        assert_eq!(count.trim(), "2");
    }

    #[test]
    fn test_pipeline_then_pwd_uses_original_stdio() {
        let _lock = lock_process_state();
        let orig = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        let mut sh = interpreter_in(&dir, Schedule::Sequential);

        assert_eq!(sh.run_line("echo x | cat > first.txt"), 0);
        assert_eq!(sh.run_line("pwd > where.txt"), 0);

        assert_eq!(fs::read_to_string(dir.join("first.txt")).unwrap(), "x\n");
        assert_eq!(
            fs::read_to_string(dir.join("where.txt")).unwrap(),
            format!("{}\n", dir.display())
        );
        assert_eq!(std::env::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_changes_where_children_run() {
        let _lock = lock_process_state();
        let orig = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        let mut sh = interpreter_in(&dir, Schedule::Concurrent);

        assert_eq!(sh.run_line("mkdir sub"), 0);
        assert_eq!(sh.run_line("cd sub"), 0);
        assert_eq!(sh.run_line("/bin/pwd > here.txt"), 0);
        std::env::set_current_dir(orig).unwrap();

        assert_eq!(
            fs::read_to_string(dir.join("sub").join("here.txt")).unwrap(),
            format!("{}\n", dir.join("sub").display())
        );
    }

    #[test]
    fn test_script_stops_at_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        let script = "echo before > a.txt\nexit 5\necho after > b.txt\n";

        let status = sh.run_script(Cursor::new(script)).unwrap();

        assert_eq!(status, 5);
        assert!(tmp.path().join("a.txt").exists());
        assert!(!tmp.path().join("b.txt").exists());
    }

    #[test]
    fn test_script_survives_invalid_utf8() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        let script: &[u8] = b"echo \xff\xfe > mangled.txt\necho after > after.txt\n";

        let status = sh.run_script(Cursor::new(script)).unwrap();

        assert_eq!(status, 0);
        assert_eq!(
            fs::read_to_string(tmp.path().join("mangled.txt")).unwrap(),
            "\u{fffd}\u{fffd}\n"
        );
        assert_eq!(fs::read_to_string(tmp.path().join("after.txt")).unwrap(), "after\n");
    }

    #[test]
    fn test_script_handles_crlf_and_missing_final_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        let status = sh
            .run_script(Cursor::new("echo one > a.txt\r\necho two > b.txt"))
            .unwrap();
        assert_eq!(status, 0);
        assert!(tmp.path().join("a.txt").exists());
        assert_eq!(fs::read_to_string(tmp.path().join("b.txt")).unwrap(), "two\n");
    }

    #[test]
    fn test_script_ends_at_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = interpreter_in(tmp.path(), Schedule::Concurrent);
        let status = sh.run_script(Cursor::new("true\nfalse\n")).unwrap();
        assert_eq!(status, 1);
        assert!(!sh.should_exit());
    }
}
