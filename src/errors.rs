use thiserror::Error;

/// Failures talking to the host execution-unit manager.
///
/// Every variant is fatal to the current orchestration cycle: an operator has to
/// intervene before the next scheduled tick can succeed.
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("Execution unit not found: {0}")]
    NotFound(String),

    #[error("Unit manager unavailable: {0}")]
    ManagerUnavailable(String),

    #[error("Failed to {action} unit {unit}: {message}")]
    ActionFailed {
        unit: String,
        action: String,
        message: String,
    },
}

/// Errors that terminate a daily flow or an orchestration cycle
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error("Job in unit {unit} failed with exit code {exit_code}")]
    UnitJobFailure { unit: String, exit_code: i64 },
}

/// Errors raised by the remote file-share layer
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("No open session with the remote share")]
    NotConnected,

    #[error("Failed to connect to remote share: {0}")]
    Connect(String),

    #[error("Transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("Failed to delete {path}: {message}")]
    Delete { path: String, message: String },

    #[error("Failed to list {path}: {message}")]
    Listing { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort one backup-transfer step (never the orchestration cycle)
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Remote share unreachable, nothing was transferred")]
    RemoteConnectFailure,

    #[error("Packaging failed: {0:#}")]
    Packaging(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type UnitResult<T> = Result<T, UnitError>;
pub type RemoteResult<T> = Result<T, RemoteError>;

impl UnitError {
    pub fn action_failed<S: Into<String>>(unit: S, action: S, message: S) -> Self {
        UnitError::ActionFailed {
            unit: unit.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}
