use std::time::Duration;

use thiserror::Error;

use crate::{config::ConfigurationError, context::Dimension};

use super::storage::error::StorageError;

/// Failures the tracking runtime can run into. Only [TrackingError::Configuration] is fatal, and
/// only at startup; the rest are logged and cost at most one sample or one record.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("{dimension} provider failed: {source:#}")]
    Provider {
        dimension: Dimension,
        source: anyhow::Error,
    },

    #[error("failed to persist {dimension} record: {source}")]
    SinkWrite {
        dimension: Dimension,
        #[source]
        source: StorageError,
    },

    #[error("{dimension} tracker did not stop within {timeout:?}")]
    ShutdownTimeout {
        dimension: Dimension,
        timeout: Duration,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
