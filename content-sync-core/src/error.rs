//! Error taxonomy shared by every stage of the sync and clone pipelines.
//!
//! Errors fall into two scopes. Record-scoped errors (a value that will not
//! convert, a remote rejection for one item, an exhausted retry) are caught at
//! the pipeline boundary and reported against the originating row. Run-scoped
//! errors (broken mapping, unknown field kind) mean the input is structurally
//! wrong and abort the whole run. See [`SyncError::is_run_scoped`].

use thiserror::Error;

use crate::element::ElementKind;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the element model, the transformer, the pipeline and
/// the graph walker.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A raw value cannot be coerced into the declared field kind.
    #[error("cannot convert field `{field}`: {message}")]
    Conversion { field: String, message: String },

    /// No converter is registered for a wire type tag and multiplicity.
    #[error("no converter found for type `{tag}` (multi: {multi})")]
    NoConverterFound { tag: String, multi: bool },

    /// The operation is deliberately unsupported for this element kind.
    #[error("{operation} is not implemented for {kind} elements")]
    NotImplemented {
        operation: &'static str,
        kind: ElementKind,
    },

    /// Network failure, timeout or 5xx/429 response. Retryable.
    #[error("transient remote error: {0}")]
    RemoteTransient(String),

    /// The remote system refused the request (4xx). Not retryable.
    #[error("remote rejected request with status {status}: {detail}")]
    RemoteRejected { status: u16, detail: String },

    /// Missing mapping, missing column, missing root category.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Lookup found nothing and the record may not be created.
    #[error("no existing content matches {key}")]
    NotFound { key: String },

    /// Lookup found more than one candidate for an update.
    #[error("{count} existing contents match {key}, refusing to pick one")]
    AmbiguousMatch { key: String, count: usize },

    /// A content item references one of its own ancestors.
    #[error("reference cycle detected: {}", .path.join(" -> "))]
    ReferenceCycle { path: Vec<String> },

    /// Every attempt failed with a transient error; `source` is the last one.
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn conversion(field: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Conversion {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_implemented(operation: &'static str, kind: ElementKind) -> Self {
        SyncError::NotImplemented { operation, kind }
    }

    /// Only transient remote failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteTransient(_))
    }

    /// Errors that indicate structurally wrong input and must abort the run
    /// instead of being recorded against a single row.
    pub fn is_run_scoped(&self) -> bool {
        match self {
            SyncError::Configuration(_) | SyncError::NoConverterFound { .. } => true,
            SyncError::RetriesExhausted { source, .. } => source.is_run_scoped(),
            _ => false,
        }
    }

    /// Renders the error followed by every `source` in the chain, for the
    /// failure log.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut current: Option<&(dyn std::error::Error + 'static)> =
            std::error::Error::source(self);
        while let Some(err) = current {
            out.push_str(": ");
            out.push_str(&err.to_string());
            current = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(SyncError::RemoteTransient("503".into()).is_retryable());
        assert!(!SyncError::RemoteRejected {
            status: 422,
            detail: "bad".into()
        }
        .is_retryable());
        assert!(!SyncError::conversion("price", "not a number").is_retryable());
    }

    #[test]
    fn configuration_errors_are_run_scoped() {
        assert!(SyncError::Configuration("missing column".into()).is_run_scoped());
        assert!(SyncError::NoConverterFound {
            tag: "widget".into(),
            multi: false
        }
        .is_run_scoped());
        assert!(!SyncError::NotFound { key: "sku=1".into() }.is_run_scoped());
    }

    #[test]
    fn chain_includes_last_retry_error() {
        let err = SyncError::RetriesExhausted {
            attempts: 3,
            source: Box::new(SyncError::RemoteTransient("HTTP 503".into())),
        };
        assert_eq!(
            err.chain(),
            "gave up after 3 attempts: transient remote error: HTTP 503"
        );
    }
}
