use thiserror::Error;

/// Failures surfaced to the status line. None of them is fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error("{message}")]
    Fetch { message: String },

    /// Message is the dispatch response body when present, else `HTTP <status>`.
    #[error("{message}")]
    Dispatch { message: String },

    #[error("{message}")]
    Timeout { message: String },

    #[error("an update is already in progress")]
    Busy,

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("invalid update transition: {message}")]
    Transition { message: String },
}

impl DashboardError {
    pub fn fetch(message: impl Into<String>) -> Self {
        DashboardError::Fetch { message: message.into() }
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        DashboardError::Dispatch { message: message.into() }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DashboardError::Fetch { .. } => "loader.fetch_failed",
            DashboardError::Dispatch { .. } => "dispatch.rejected",
            DashboardError::Timeout { .. } => "update.timed_out",
            DashboardError::Busy => "update.busy",
            DashboardError::Config { .. } => "config.invalid",
            DashboardError::Transition { .. } => "update.invalid_transition",
        }
    }

    /// Text shown in the status region.
    pub fn status_line(&self) -> String {
        format!("Error: {}", self)
    }
}
