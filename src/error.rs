use thiserror::Error;

/// Failures a pipeline stage can report for one source.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient failure fetching from {slug}: {reason}")]
    TransientFetch { slug: String, reason: String },

    #[error("fetching from {slug} failed after {attempts} attempts: {last}")]
    FetchFailed {
        slug: String,
        attempts: u32,
        last: String,
    },

    #[error("upstream contract broken by {slug}: {reason}")]
    UpstreamContract { slug: String, reason: String },

    #[error("connector '{connector}' cannot serve configuration for '{configured}'")]
    ConfigMismatch {
        connector: String,
        configured: String,
    },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Only transient fetch failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientFetch { .. })
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        PipelineError::Persistence(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_fetch_is_retryable() {
        let transient = PipelineError::TransientFetch {
            slug: "qualys".into(),
            reason: "HTTP 503".into(),
        };
        assert!(transient.is_transient());

        let contract = PipelineError::UpstreamContract {
            slug: "qualys".into(),
            reason: "body is not a JSON array".into(),
        };
        assert!(!contract.is_transient());
        assert!(!PipelineError::Config("x".into()).is_transient());
    }

    #[test]
    fn persistence_keeps_the_context_chain() {
        let err = anyhow::anyhow!("disk full").context("appending to raw_qualys");
        let msg = PipelineError::persistence(err).to_string();
        assert_eq!(msg, "persistence failure: appending to raw_qualys: disk full");
    }
}
