use anyhow::{Context, Result};
use argh::FromArgs;
use log::LevelFilter;
use pipesh::{Engine, Interpreter, Schedule};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::PathBuf;

#[derive(FromArgs)]
/// An interactive command interpreter with pipes and file redirection.
struct Args {
    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status
    command: Option<String>,

    #[argh(switch)]
    /// wait for each pipeline stage before starting the next, moving the
    /// interpreter's standard input along the pipes
    sequential: bool,

    #[argh(option, default = "pipesh::DEFAULT_PROMPT.to_string()")]
    /// prompt shown before each line in interactive mode
    prompt: String,

    #[argh(option, default = "LevelFilter::Warn")]
    /// log level: off, error, warn, info, debug or trace
    log_level: LevelFilter,

    #[argh(option)]
    /// write logs to this file instead of standard error
    log_file: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Result<()> {
    match &args.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            WriteLogger::init(args.log_level, Config::default(), file)?;
        }
        None => TermLogger::init(
            args.log_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )?,
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    init_logging(&args)?;

    let schedule = if args.sequential {
        Schedule::Sequential
    } else {
        Schedule::Concurrent
    };
    let mut shell = Interpreter::new(Engine::new(schedule), pipesh::default_factories())
        .with_prompt(args.prompt.as_str());
    log::debug!("starting with {:?} scheduling", schedule);

    let status = match &args.command {
        Some(line) => shell.run_line(line),
        None => shell.repl()?,
    };
    std::process::exit(status)
}
