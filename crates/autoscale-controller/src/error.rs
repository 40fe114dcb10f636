use error_stack::Report;
use thiserror::Error;

use crate::store::ObjectKey;
use crate::store::StoreError;

/// Reasons a reconciliation attempt stops early.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("failed to read {kind} {key}")]
    ReadFailed { kind: String, key: ObjectKey },

    #[error("failed to write {kind} {key}")]
    WriteFailed { kind: String, key: ObjectKey },

    #[error("write to {kind} {key} conflicted with a newer version")]
    WriteConflict { kind: String, key: ObjectKey },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("cleanup of autoscalers for {key} failed")]
    CleanupFailed { key: ObjectKey },
}

impl ReconcileError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }
}

pub type ReconcileResult<T> = Result<T, Report<ReconcileError>>;

/// Lifts store failures into [`ReconcileError`].
pub trait StoreResultExt<T> {
    fn read_context(self, kind: &str, key: &ObjectKey) -> ReconcileResult<T>;

    /// Conflicts become [`ReconcileError::WriteConflict`], anything else
    /// [`ReconcileError::WriteFailed`].
    fn write_context(self, kind: &str, key: &ObjectKey) -> ReconcileResult<T>;
}

impl<T> StoreResultExt<T> for Result<T, Report<StoreError>> {
    fn read_context(self, kind: &str, key: &ObjectKey) -> ReconcileResult<T> {
        self.map_err(|report| {
            report.change_context(ReconcileError::ReadFailed {
                kind: kind.to_string(),
                key: key.clone(),
            })
        })
    }

    fn write_context(self, kind: &str, key: &ObjectKey) -> ReconcileResult<T> {
        self.map_err(|report| {
            let kind = kind.to_string();
            let key = key.clone();
            let context = match report.current_context() {
                StoreError::Conflict { .. } => ReconcileError::WriteConflict { kind, key },
                _ => ReconcileError::WriteFailed { kind, key },
            };
            report.change_context(context)
        })
    }
}

/// Error handed to the kube-rs controller runtime.
#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct ControllerError(pub Report<ReconcileError>);

impl From<Report<ReconcileError>> for ControllerError {
    fn from(report: Report<ReconcileError>) -> Self {
        Self(report)
    }
}
