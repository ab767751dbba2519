use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::fs::DirBuilder;
use std::io::{Read, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

/// Permission bits requested for directories made by `mkdir`, before the umask.
const MKDIR_MODE: u32 = 0o777;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdin, stdout, env) {
            Ok(x) => Ok(x),
            Err(e) => {
                eprintln!("pipesh: {:#}", e);
                Ok(1)
            }
        }
    }
}

/// Usage text or an argument error produced by `argh` instead of a command.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            eprintln!("{}", self.output.trim_end());
            Ok(2)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

/// Creates a built-in of type `T` when the command name matches.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// The built-ins handled by the interactive loop.
pub fn default_factories() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Mkdir>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Exit>::default()),
    ]
}

#[derive(FromArgs)]
/// Show the interpreter's working directory.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Move the interpreter, and every command started after it, to another directory.
pub struct Cd {
    #[argh(positional)]
    /// new working directory, relative to the current one; $HOME when omitted
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => env
                .get_var("HOME")
                .map(PathBuf::from)
                .context("cd: no target and HOME not set")?,
        };
        env.change_dir(&target)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Create a directory.
pub struct Mkdir {
    #[argh(positional)]
    /// directory to create; relative paths are resolved against the current directory.
    pub path: String,
}

impl BuiltinCommand for Mkdir {
    fn name() -> &'static str {
        "mkdir"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        DirBuilder::new()
            .mode(MKDIR_MODE)
            .create(env.current_dir.join(&self.path))
            .with_context(|| format!("mkdir: cannot create directory '{}'", self.path))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Stop the interactive loop after this line.
pub struct Exit {
    #[argh(positional)]
    /// status to exit with; defaults to 0.
    pub code: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(self.code.unwrap_or(0))
    }
}

#[derive(FromArgs)]
/// Print the words of the line, joined by single spaces.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// leave out the final newline
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// words to print
    pub words: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        stdout.write_all(self.words.join(" ").as_bytes())?;
        if !self.no_newline {
            stdout.write_all(b"\n")?;
        }
        Ok(0)
    }
}
