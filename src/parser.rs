//! Line parser: turns one line of user input into a [`ParsedCommand`].
//!
//! Words are separated by whitespace only; there is no quoting or escaping.
//! Three words are reserved: `<` (input redirection), `>` (output redirection)
//! and `|` (pipeline separator).

use crate::engine::ExecError;
use std::fmt;

const INPUT_MARKER: &str = "<";
const OUTPUT_MARKER: &str = ">";
const PIPE_MARKER: &str = "|";

/// Kind of redirection
///
/// Only a single input and a single output target are supported per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Input redirection (`<`): the first stage reads standard input from a file.
    Input,
    /// Output redirection (`>`): the last stage writes standard output to a file,
    /// creating it if absent and **truncating** it if it exists.
    Output,
}

impl RedirectKind {
    /// The marker word recognised by the parser.
    pub fn marker(self) -> &'static str {
        match self {
            RedirectKind::Input => INPUT_MARKER,
            RedirectKind::Output => OUTPUT_MARKER,
        }
    }
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// One program invocation: the program name followed by its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    tokens: Vec<String>,
}

impl Stage {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// The program name (`argv[0]`), `None` for an empty stage.
    pub fn program(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or_default()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Structured description of one input line.
///
/// Built fresh for every line and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Pipeline stages in execution order. Empty only when the line had no command words.
    pub stages: Vec<Stage>,
    /// File that replaces the first stage's standard input.
    pub input_path: Option<String>,
    /// File that replaces the last stage's standard output.
    pub output_path: Option<String>,
    /// Redirection markers that were not followed by a target word.
    pub dangling: Vec<RedirectKind>,
}

impl ParsedCommand {
    /// True when the line contained no command words (blank, or only redirections).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// True when the line is a chain of two or more stages.
    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }

    /// Rejects empty pipeline stages and redirection markers without a target.
    pub fn validate(&self) -> Result<(), ExecError> {
        if let Some(&kind) = self.dangling.first() {
            return Err(ExecError::MissingRedirectTarget(kind));
        }
        if let Some(index) = self.stages.iter().position(Stage::is_empty) {
            return Err(ExecError::EmptyStage { index });
        }
        Ok(())
    }
}

/// Parse a line of input.
///
/// Redirections may appear anywhere among the command words; the word following
/// a marker is its target. Parsing never fails: malformed input is recorded in the
/// result and rejected by [`ParsedCommand::validate`].
pub fn parse(line: &str) -> ParsedCommand {
    let mut parsed = ParsedCommand::default();
    let mut words: Vec<String> = Vec::new();
    let mut iter = line.split_whitespace();

    while let Some(token) = iter.next() {
        let kind = match token {
            INPUT_MARKER => RedirectKind::Input,
            OUTPUT_MARKER => RedirectKind::Output,
            _ => {
                words.push(token.to_string());
                continue;
            }
        };
        match (iter.next(), kind) {
            (Some(target), RedirectKind::Input) => parsed.input_path = Some(target.to_string()),
            (Some(target), RedirectKind::Output) => parsed.output_path = Some(target.to_string()),
            (None, kind) => parsed.dangling.push(kind),
        }
    }

    if !words.is_empty() {
        parsed.stages = split_stages(words);
    }
    parsed
}

fn split_stages(words: Vec<String>) -> Vec<Stage> {
    let mut stages = Vec::new();
    let mut current = Vec::new();
    for word in words {
        if word == PIPE_MARKER {
            stages.push(Stage::new(std::mem::take(&mut current)));
        } else {
            current.push(word);
        }
    }
    stages.push(Stage::new(current));
    stages
}
