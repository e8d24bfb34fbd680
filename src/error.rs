use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("max_concurrent must be between 1 and 5, got {0}")]
    InvalidConcurrency(usize),

    #[error("Task source is missing required columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("Invalid task source row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("Task source contains no tasks")]
    EmptyTaskList,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Failed to launch executor: {0}")]
    Launch(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Whether this error belongs to the configuration class, which aborts a run
    /// before any task starts.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidConcurrency(_)
                | Error::MissingColumns { .. }
                | Error::InvalidRow { .. }
                | Error::EmptyTaskList
                | Error::TomlParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
