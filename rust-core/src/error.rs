//! Error types for the submission pipeline.
//!
//! Two layers:
//! - [`SheetError`] is what a [`crate::SheetService`] backend reports.
//! - [`SubmitError`] is what the submission boundary hands back to the form,
//!   split into operator-fixable configuration faults and everything else.

use std::time::Duration;

/// Faults that need an operator to fix the worksheet or the deployment.
/// Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Row 1 of the worksheet holds no cells.
    #[error("header row (row 1) is empty; set up the headers in the worksheet first")]
    EmptyHeaderRow,

    #[error("spreadsheet `{0}` not found")]
    SpreadsheetNotFound(String),

    #[error("worksheet `{0}` not found")]
    WorksheetNotFound(String),

    /// The spreadsheet exists but is not shared with the credential.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Error reported by a spreadsheet backend.
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status that is not a configuration fault
    /// (expired token, quota, server error).
    #[error("spreadsheet service responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Local workbook plumbing (zip / xml / filesystem).
    #[error("workbook error: {0:#}")]
    Workbook(#[from] anyhow::Error),
}

/// Outcome of a failed submission, as seen by the form collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("configuration error: {0}")]
    Configuration(#[source] ConfigurationError),

    #[error("failed to save the response: {message}")]
    Failed {
        message: String,
        #[source]
        source: SheetError,
    },
}

impl SubmitError {
    /// True when the fault needs operator action rather than a resubmit.
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, SubmitError::Configuration(_))
    }

    /// The underlying message, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            SubmitError::Configuration(e) => e.to_string(),
            SubmitError::Failed { message, .. } => message.clone(),
        }
    }
}

impl From<SheetError> for SubmitError {
    fn from(err: SheetError) -> Self {
        match err {
            SheetError::Configuration(e) => SubmitError::Configuration(e),
            other => SubmitError::Failed {
                message: other.to_string(),
                source: other,
            },
        }
    }
}

impl From<ConfigurationError> for SubmitError {
    fn from(err: ConfigurationError) -> Self {
        SubmitError::Configuration(err)
    }
}
