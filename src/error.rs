use thiserror::Error;

use crate::session::LifecycleState;

// Enum for handling application-level errors surfaced to callers of the crate.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError), // Errors raised while building a system prompt.

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError), // Errors from the inference engine collaborator.

    #[error("Mystery error: {0}")]
    Mystery(#[from] MysteryError), // Errors while loading mystery data.

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("No cached prompt for character: {0}")]
    PromptCacheMiss(String), // Reset requested for a character with nothing cached.

    #[error("Unknown character: {0}")]
    UnknownCharacter(String),
}

// Prompt generation refuses profiles that lack the fields every prompt needs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Missing required profile field: {0}")]
    MissingProfileField(String),
}

// Errors related to the inference engine are separated into their own enum.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("No content in the engine response")]
    EmptyResponse,

    #[error("Save error: {0}")]
    Save(#[from] SaveError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum MysteryError {
    #[error("Failed to read mystery file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse mystery file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Save file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Save file serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No save named {0}")]
    NotFound(String),

    #[error("Invalid save name: {0:?}")]
    InvalidName(String), // Names become file names inside the save directory.
}

// Why a lifecycle step gave up on a session. Logged, then turned into a state transition.
#[derive(Debug, Error)]
pub enum LifecycleFailure {
    #[error("Template load failed: {0}")]
    TemplateLoad(EngineError),

    #[error("Template load timed out after {0:?}")]
    TemplateTimeout(std::time::Duration),

    #[error("Warmup failed: {0}")]
    Warmup(EngineError),

    #[error("Warmup timed out after {0:?}")]
    WarmupTimeout(std::time::Duration),
}

// Why a switch request returned nothing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwitchRejected {
    #[error("roster is not ready")]
    RosterNotReady,

    #[error("unknown character {0}")]
    UnknownCharacter(String),

    #[error("character is not ready (state: {0})")]
    NotReady(LifecycleState),

    #[error("a switch is already in progress")]
    SwitchInProgress,
}
