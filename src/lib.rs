//! A small interactive command interpreter built around a process execution engine.
//!
//! A line of input is split into words by [`parser::parse`], producing a
//! [`ParsedCommand`]: one or more pipeline stages plus optional input and output
//! redirection files. The [`Engine`] runs those stages as child processes wired
//! together with pipes, waits for all of them and leaves the interpreter's own
//! standard streams as it found them.
//!
//! [`Interpreter`] is the read-eval loop on top: it handles the built-ins
//! `cd`, `pwd`, `mkdir`, `echo` and `exit` in-process and sends every other line
//! to the engine.

mod builtin;
pub mod command;
pub mod engine;
pub mod env;
mod interpreter;
pub mod parser;
mod resolve;
pub mod stdio;
#[cfg(test)]
mod testutil;

pub use builtin::default_factories;
pub use engine::{Engine, ExecError, ExecReport, Schedule, StageOutcome};
pub use interpreter::{DEFAULT_PROMPT, Interpreter};
pub use parser::{ParsedCommand, Stage, parse};
pub use resolve::find_command_path;
