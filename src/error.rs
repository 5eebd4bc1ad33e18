use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Launch errors
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    // Log errors
    #[error("Failed to open log file: {0}")]
    LogFileError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Policy errors
    #[error("Process restart limit exceeded for {0}")]
    RestartLimitExceeded(String),

    // Registry and control errors
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Process already exists: {0}")]
    ProcessAlreadyExists(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Supervisor for {0} is no longer running")]
    SupervisorUnavailable(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl WardenError {
    /// Invalid or missing configuration; aborts loading of the affected spec
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            WardenError::ConfigError(_)
                | WardenError::InvalidConfig(_)
                | WardenError::MissingConfigField(_)
                | WardenError::ConfigValidationError(_)
        )
    }

    /// Spawn failure; recovered through the restart policy
    pub fn is_launch_error(&self) -> bool {
        matches!(self, WardenError::SpawnError(_))
    }

    /// Log file failure; fatal for the affected instance
    pub fn is_io_error(&self) -> bool {
        matches!(self, WardenError::LogFileError(_) | WardenError::Io(_))
    }
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
