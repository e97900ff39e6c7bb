use std::path::PathBuf;
use thiserror::Error;

/// Failures of the environment-facing collaborators (capture, classifier,
/// input injection). The iteration that hits one is treated as a no-op.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvironmentError {
    #[error("no frame available from capture")]
    FrameUnavailable,
    #[error("screen capture failed: {0}")]
    Capture(String),
    #[error("classifier failed: {0}")]
    Classifier(String),
    #[error("input injection failed: {0}")]
    Input(String),
}

/// Failures while running a single action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("command book has no command '{0}'")]
    UnknownCommand(String),
    #[error("command '{command}': invalid parameter '{param}': {message}")]
    InvalidParam {
        command: String,
        param: String,
        message: String,
    },
}

/// Routine parse errors. `line` is 1-based.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("failed to read routine {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: directive '{name}' has no parent waypoint")]
    OrphanDirective { line: usize, name: String },
    #[error("step {step}: command '{name}' is not in the active command book")]
    UnknownCommand { step: usize, name: String },
}

#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct PersistError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Structural edits rejected by the action sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("directive steps must be attached to a waypoint")]
    OrphanDirective,
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("step {0} is not a waypoint")]
    NotAWaypoint(usize),
    #[error("directive '{kind}': {message}")]
    InvalidDirective { kind: String, message: String },
}

/// Invalid settings or command books. Loading fails; whatever was active
/// before stays active.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("command book '{book}': command '{command}' does not compile: {message}")]
    Compile {
        book: String,
        command: String,
        message: String,
    },
    #[error("command book '{book}' must implement required command '{command}'")]
    MissingRequired { book: String, command: String },
    #[error("command book '{book}' must implement both 'move' and 'adjust', or 'step'")]
    MissingMovement { book: String },
    #[error("template {path} could not be decoded: {message}")]
    Template { path: PathBuf, message: String },
}

/// Errors surfaced to the UI by the editing collaborator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {0} while the bot is running")]
    Running(&'static str),
    #[error("no command book is loaded")]
    NoCommandBook,
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("failed to create {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
