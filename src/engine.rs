//! Execution engine: runs a [`ParsedCommand`] as one child process per stage.
//!
//! Adjacent stages are connected through [`PipelineLink`]s, the input file (if
//! any) feeds the first stage and the output file (if any) receives the last
//! one. Every child is reaped before [`Engine::execute`] returns.

use crate::command::ExitCode;
use crate::env::Environment;
use crate::parser::{ParsedCommand, RedirectKind, Stage};
use crate::resolve::find_command_path;
use crate::stdio::{PipelineLink, SavedStdin};
use log::{debug, error, warn};
use nix::errno::Errno;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

/// Permission bits of files created by output redirection.
const OUTPUT_FILE_MODE: u32 = 0o644;

/// Exit code of a stage whose program could not be found.
pub const NOT_FOUND_CODE: ExitCode = 127;
/// Exit code of a stage whose program was found but could not be executed.
pub const NOT_EXECUTABLE_CODE: ExitCode = 126;
/// Exit code of a stage whose redirection file could not be opened.
pub const REDIRECT_FAILED_CODE: ExitCode = 1;

/// How the stages of a pipeline are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Schedule {
    /// Spawn every stage first, then reap them all. Stages run at the same time
    /// and the interpreter's own standard input is never touched.
    #[default]
    Concurrent,
    /// Spawn a stage, wait for it, then move the interpreter's standard input to
    /// the stage's pipe before spawning the next one.
    ///
    /// A stage that writes more than the kernel pipe buffer blocks forever here,
    /// since its reader does not exist yet.
    Sequential,
}

/// Errors that abort a whole [`Engine::execute`] call.
#[derive(Debug)]
pub enum ExecError {
    /// The command has no stages at all.
    EmptyCommand,
    /// A pipeline stage has no words (`| a`, `a |`, `a | | b`).
    EmptyStage { index: usize },
    /// A redirection marker is not followed by a file name.
    MissingRedirectTarget(RedirectKind),
    /// The operating system refused to create a process.
    Spawn { program: String, source: io::Error },
    /// A pipe could not be created.
    Pipe(nix::Error),
    /// The interpreter's standard input could not be saved or rewired.
    Stdin(io::Error),
}

impl From<nix::Error> for ExecError {
    fn from(e: nix::Error) -> ExecError {
        ExecError::Pipe(e)
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::EmptyCommand => write!(f, "syntax error: empty command"),
            ExecError::EmptyStage { index } => {
                write!(f, "syntax error: empty command in pipeline stage {}", index + 1)
            }
            ExecError::MissingRedirectTarget(kind) => {
                write!(f, "syntax error: missing file name after '{}'", kind)
            }
            ExecError::Spawn { program, source } => {
                write!(f, "{}: cannot create process: {}", program, source)
            }
            ExecError::Pipe(e) => write!(f, "cannot create pipe: {}", e),
            ExecError::Stdin(e) => write!(f, "cannot redirect standard input: {}", e),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Spawn { source, .. } => Some(source),
            ExecError::Pipe(e) => Some(e),
            ExecError::Stdin(e) => Some(e),
            _ => None,
        }
    }
}

/// How one stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The program ran and exited with a status code.
    Exited(ExitCode),
    /// The program was terminated by a signal.
    Signaled(i32),
    /// The stage never ran its program; `reason` was reported on stderr.
    Failed { code: ExitCode, reason: String },
}

impl StageOutcome {
    /// Shell-style exit code of this stage.
    pub fn code(&self) -> ExitCode {
        match self {
            StageOutcome::Exited(code) => *code,
            StageOutcome::Signaled(signal) => 128 + signal,
            StageOutcome::Failed { code, .. } => *code,
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => StageOutcome::Exited(code),
            (None, Some(signal)) => StageOutcome::Signaled(signal),
            (None, None) => StageOutcome::Exited(-1),
        }
    }
}

/// What one [`Engine::execute`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecReport {
    /// Child processes created.
    pub spawned: usize,
    /// Pipes connected to a downstream stage's standard input.
    pub links: usize,
    /// One entry per stage, in pipeline order.
    pub outcomes: Vec<StageOutcome>,
}

impl ExecReport {
    /// Exit code of the last stage, the way shells report a pipeline's status.
    pub fn last_status(&self) -> ExitCode {
        self.outcomes.last().map_or(0, StageOutcome::code)
    }
}

/// A reason a single stage could not be started.
enum StageError {
    /// Only this stage is affected; the rest of the pipeline keeps running.
    Stage { code: ExitCode, reason: String },
    /// The whole call has to be abandoned.
    Abort(ExecError),
}

impl StageError {
    fn redirect(path: &str, what: &str, e: io::Error) -> Self {
        StageError::Stage {
            code: REDIRECT_FAILED_CODE,
            reason: format!("{}: cannot open {} file: {}", path, what, e),
        }
    }
}

/// Children spawned so far by one call, reaped in pipeline order.
struct Running {
    outcomes: Vec<Option<StageOutcome>>,
    children: Vec<(usize, Child)>,
    spawned: usize,
}

impl Running {
    fn new(stages: usize) -> Self {
        Self {
            outcomes: vec![None; stages],
            children: Vec::with_capacity(stages),
            spawned: 0,
        }
    }

    fn record(&mut self, index: usize, result: Result<Child, StageError>) -> Result<(), ExecError> {
        match result {
            Ok(child) => {
                debug!("stage {} started as pid {}", index, child.id());
                self.spawned += 1;
                self.children.push((index, child));
                Ok(())
            }
            Err(StageError::Stage { code, reason }) => {
                report_error(&reason);
                warn!("stage {} not started: {}", index, reason);
                self.outcomes[index] = Some(StageOutcome::Failed { code, reason });
                Ok(())
            }
            Err(StageError::Abort(e)) => Err(e),
        }
    }

    /// Block until every spawned child has terminated.
    fn reap(&mut self) {
        for (index, mut child) in self.children.drain(..) {
            let pid = child.id();
            let outcome = match child.wait() {
                Ok(status) => StageOutcome::from_status(status),
                Err(e) => {
                    error!("failed to wait for pid {}: {}", pid, e);
                    StageOutcome::Failed {
                        code: 1,
                        reason: format!("wait failed: {}", e),
                    }
                }
            };
            debug!("stage {} (pid {}) reaped: {:?}", index, pid, outcome);
            self.outcomes[index] = Some(outcome);
        }
    }

    fn into_report(mut self, links: usize) -> ExecReport {
        self.reap();
        ExecReport {
            spawned: self.spawned,
            links,
            outcomes: self.outcomes.into_iter().flatten().collect(),
        }
    }
}

/// Runs parsed command lines as child processes.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    schedule: Schedule,
}

impl Engine {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Run `cmd` to completion.
    ///
    /// Failures confined to one stage (a missing program, an unreadable input
    /// file) are printed to stderr and recorded in the report; they do not make
    /// this call fail. `Err` means nothing more could be started: a malformed
    /// command, or the system refusing to create a process or a pipe. Children
    /// already running at that point are still reaped.
    pub fn execute(&self, cmd: &ParsedCommand, env: &Environment) -> Result<ExecReport, ExecError> {
        if cmd.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        cmd.validate()?;

        // Anything the interpreter printed itself must precede the children's output.
        if let Err(e) = io::stdout().flush() {
            warn!("failed to flush standard output: {}", e);
        }

        match self.schedule {
            Schedule::Sequential if cmd.is_pipeline() => self.run_sequential(cmd, env),
            _ => self.run_concurrent(cmd, env),
        }
    }

    fn run_concurrent(&self, cmd: &ParsedCommand, env: &Environment) -> Result<ExecReport, ExecError> {
        let last = cmd.stages.len() - 1;
        let mut running = Running::new(cmd.stages.len());
        let mut links = 0;
        let mut upstream: Option<OwnedFd> = None;

        for (index, stage) in cmd.stages.iter().enumerate() {
            let stdin = match upstream.take() {
                Some(read) => Ok(Stdio::from(read)),
                None => open_input(cmd.input_path.as_deref(), env),
            };
            let piped = if index == last {
                None
            } else {
                let link = match PipelineLink::new() {
                    Ok(link) => link,
                    Err(e) => {
                        running.reap();
                        return Err(ExecError::Pipe(e));
                    }
                };
                links += 1;
                let (read, write) = link.into_halves();
                upstream = Some(read);
                Some(Stdio::from(write))
            };

            let result = start_stage(stage, cmd, env, stdin, piped);
            if let Err(e) = running.record(index, result) {
                drop(upstream);
                running.reap();
                return Err(e);
            }
        }

        Ok(running.into_report(links))
    }

    fn run_sequential(&self, cmd: &ParsedCommand, env: &Environment) -> Result<ExecReport, ExecError> {
        let last = cmd.stages.len() - 1;
        let mut running = Running::new(cmd.stages.len());
        let mut saved = SavedStdin::capture().map_err(ExecError::Stdin)?;

        for (index, stage) in cmd.stages.iter().enumerate() {
            let stdin = if index == 0 {
                open_input(cmd.input_path.as_deref(), env)
            } else {
                Ok(Stdio::inherit())
            };
            let (piped, read) = if index == last {
                (None, None)
            } else {
                let (read, write) = PipelineLink::new()?.into_halves();
                (Some(Stdio::from(write)), Some(read))
            };

            let result = start_stage(stage, cmd, env, stdin, piped);
            running.record(index, result)?;
            running.reap();

            if let Some(read) = read {
                saved
                    .redirect_from(&read)
                    .map_err(|e| ExecError::Stdin(e.into()))?;
            }
        }

        let links = saved.rewires();
        drop(saved);
        Ok(running.into_report(links))
    }
}

/// Spawn one stage. Without a pipe to write to, the stage writes to the
/// output file if there is one; that file is only touched once the input side
/// is known to be good.
fn start_stage(
    stage: &Stage,
    cmd: &ParsedCommand,
    env: &Environment,
    stdin: Result<Stdio, StageError>,
    piped: Option<Stdio>,
) -> Result<Child, StageError> {
    let stdin = stdin?;
    let stdout = match piped {
        Some(stdout) => stdout,
        None => open_output(cmd.output_path.as_deref(), env)?,
    };
    spawn(stage, env, stdin, stdout)
}

fn report_error(message: &str) {
    eprintln!("pipesh: {}", message);
}

fn open_input(path: Option<&str>, env: &Environment) -> Result<Stdio, StageError> {
    match path {
        None => Ok(Stdio::inherit()),
        Some(path) => open_input_file(path, env)
            .map(Stdio::from)
            .map_err(|e| StageError::redirect(path, "input", e)),
    }
}

fn open_output(path: Option<&str>, env: &Environment) -> Result<Stdio, StageError> {
    match path {
        None => Ok(Stdio::inherit()),
        Some(path) => open_output_file(path, env)
            .map(Stdio::from)
            .map_err(|e| StageError::redirect(path, "output", e)),
    }
}

/// Open an input redirection target, read-only. Relative paths start at `current_dir`.
pub fn open_input_file(path: &str, env: &Environment) -> io::Result<File> {
    File::open(env.current_dir.join(path))
}

/// Open an output redirection target: created if absent, truncated if present.
pub fn open_output_file(path: &str, env: &Environment) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(OUTPUT_FILE_MODE)
        .open(env.current_dir.join(path))
}

/// Start `stage` with the given standard streams.
///
/// The `Command` owns `stdin` and `stdout` and is dropped on return, which
/// closes the parent's copies of any pipe halves handed to the child.
fn spawn(stage: &Stage, env: &Environment, stdin: Stdio, stdout: Stdio) -> Result<Child, StageError> {
    let program = stage.program().unwrap_or_default();
    let Some(path) = find_command_path(&env.search_path(), &env.current_dir, Path::new(program)) else {
        return Err(StageError::Stage {
            code: NOT_FOUND_CODE,
            reason: format!("{}: command not found", program),
        });
    };

    debug!("spawning {} as {:?} {:?}", program, path, stage.args());
    Command::new(&path)
        .arg0(program)
        .args(stage.args())
        .stdin(stdin)
        .stdout(stdout)
        .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&env.current_dir)
        .spawn()
        .map_err(|e| classify_spawn_error(program, e))
}

/// Process-creation failures abort the call; exec failures only affect the stage.
fn classify_spawn_error(program: &str, e: io::Error) -> StageError {
    let errno = e.raw_os_error().map(Errno::from_raw);
    match errno {
        Some(Errno::EAGAIN) | Some(Errno::ENOMEM) => StageError::Abort(ExecError::Spawn {
            program: program.to_string(),
            source: e,
        }),
        _ if e.kind() == io::ErrorKind::NotFound => StageError::Stage {
            code: NOT_FOUND_CODE,
            reason: format!("{}: command not found", program),
        },
        _ => StageError::Stage {
            code: NOT_EXECUTABLE_CODE,
            reason: format!("{}: cannot execute: {}", program, e),
        },
    }
}
