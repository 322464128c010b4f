use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddonsError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Server returned {status} for {endpoint}: {message}")]
    RemoteError {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    #[error("Not found: {what}")]
    NotFoundError { what: String },

    #[error("Expected an Nx3 array but row {row} has {got} columns")]
    ShapeError { row: usize, got: usize },

    #[error("Unit mismatch: {message}")]
    UnitError { message: String },

    #[error("transformix failed: {message}")]
    TransformixError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },
}

pub type Result<T> = std::result::Result<T, AddonsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Remote,
    Data,
    ExternalTool,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AddonsError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFoundError { what: what.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::TomlError(_) => ErrorCategory::Configuration,
            Self::ApiError(_) => ErrorCategory::Network,
            Self::RemoteError { .. } | Self::AuthError { .. } | Self::NotFoundError { .. } => {
                ErrorCategory::Remote
            }
            Self::CsvError(_)
            | Self::IoError(_)
            | Self::SerializationError(_)
            | Self::ShapeError { .. }
            | Self::UnitError { .. }
            | Self::ProcessingError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Data,
            Self::TransformixError { .. } => ErrorCategory::ExternalTool,
            Self::Cancelled { .. } => ErrorCategory::User,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled { .. } => ErrorSeverity::Low,
            Self::ApiError(_) | Self::RemoteError { .. } | Self::NotFoundError { .. } => {
                ErrorSeverity::Medium
            }
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::ShapeError { .. }
            | Self::UnitError { .. }
            | Self::ProcessingError { .. }
            | Self::ValidationError { .. }
            | Self::TransformixError { .. } => ErrorSeverity::High,
            Self::IoError(_)
            | Self::TomlError(_)
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::AuthError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the connection config file; see connection_configs/ for a working example"
            }
            ErrorCategory::Network => "Check the server URL and your network connection",
            ErrorCategory::Remote => match self {
                Self::AuthError { .. } => {
                    "Use an API key with access to the project, or pick a different project id"
                }
                Self::NotFoundError { .. } => "Check the skeleton, annotation or volume id",
                _ => "Inspect the server response; the request was not retried",
            },
            ErrorCategory::Data => match self {
                Self::UnitError { .. } => "Pass the correct --units for your points",
                Self::ShapeError { .. } => "Points must have exactly three columns: x, y, z",
                _ => "Check the input data",
            },
            ErrorCategory::ExternalTool => {
                "Make sure transformix is on PATH and the transform parameter files exist"
            }
            ErrorCategory::User => "Nothing was changed",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ApiError(e) if e.is_timeout() => "The server did not respond in time".to_string(),
            Self::ApiError(e) if e.is_connect() => "Could not connect to the server".to_string(),
            Self::MissingConfigError { field } => {
                format!("The configuration is missing '{}'", field)
            }
            _ => self.to_string(),
        }
    }
}
