use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolve a program name the way `execvp` would.
///
/// Behavior:
/// - Absolute path: returns it if it exists. Whether it can actually be
///   executed is left to the spawn, which reports a permission error.
/// - Path with a separator (`bin/tool`, `./tool`): same, resolved against `cwd`.
/// - Single path component: search each directory in `search_paths` (PATH)
///   and return the first executable file.
/// - Empty name: returns `None`.
pub fn find_command_path(search_paths: &OsStr, cwd: &Path, program: &Path) -> Option<PathBuf> {
    if program.as_os_str().is_empty() {
        return None;
    }
    if program.is_absolute() {
        return existing(program);
    }

    let mut components = program.components();
    match (components.next(), components.next()) {
        (Some(single), None) if !program.as_os_str().as_encoded_bytes().contains(&b'/') => {
            find_in_path(search_paths, cwd, single.as_os_str())
        }
        _ => existing(&cwd.join(program)),
    }
}

fn existing(path: &Path) -> Option<PathBuf> {
    path.exists().then(|| path.to_path_buf())
}

fn find_in_path(search_paths: &OsStr, cwd: &Path, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths).find_map(|dir| {
        // An empty PATH entry means the current directory.
        let dir = if dir.as_os_str().is_empty() {
            cwd.to_path_buf()
        } else {
            cwd.join(dir)
        };
        find_executable(&dir.join(cmd))
    })
}

fn find_executable(path: &Path) -> Option<PathBuf> {
    path.metadata()
        .ok()
        .filter(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .map(|_| path.to_path_buf())
}
