use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use ferry_core::ProgressLog;

use crate::auth::RegistryCredentials;
use crate::engine::{EngineError, ImageEngine};
use crate::stream::{AuxResult, StreamError, collect};

/// Outcome of one successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub reference: String,
    /// Registry digest, when the engine reported one.
    pub digest: Option<String>,
    pub size: Option<u64>,
}

/// Pushes tagged images with a fixed set of credentials.
pub struct Publisher<E> {
    engine: Arc<E>,
    log: Arc<dyn ProgressLog>,
    credentials: Option<RegistryCredentials>,
}

impl<E> Clone for Publisher<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            log: Arc::clone(&self.log),
            credentials: self.credentials.clone(),
        }
    }
}

impl<E: ImageEngine> Publisher<E> {
    pub fn new(
        engine: Arc<E>,
        log: Arc<dyn ProgressLog>,
        credentials: Option<RegistryCredentials>,
    ) -> Self {
        Self {
            engine,
            log,
            credentials,
        }
    }

    /// Push `reference`. A stream that ends without a single record is
    /// treated as a failure.
    pub async fn push(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<PushReceipt, PushError> {
        if cancel.is_cancelled() {
            return Err(PushError::Cancelled);
        }

        self.log.print(&format!("Pushing {reference}"));
        let records = self.engine.push_image(reference, self.credentials.clone());
        let collected = collect(records, self.log.as_ref(), cancel)
            .await
            .map_err(|e| match e {
                StreamError::Reported { message } => PushError::Reported {
                    reference: reference.to_owned(),
                    message,
                },
                StreamError::Engine { source } => PushError::Engine { source },
                StreamError::Cancelled => PushError::Cancelled,
            })?;

        if collected.records == 0 {
            return Err(PushError::EmptyStream {
                reference: reference.to_owned(),
            });
        }

        let summary = collected.aux.iter().rev().find_map(|aux| match aux {
            AuxResult::Push { digest, size, .. } => Some((digest.clone(), *size)),
            AuxResult::Image { .. } => None,
        });
        let (digest, size) = match summary {
            Some((digest, size)) => (Some(digest).filter(|d| !d.is_empty()), Some(size)),
            None => (None, None),
        };
        info!(reference, ?digest, "pushed");

        Ok(PushReceipt {
            reference: reference.to_owned(),
            digest,
            size,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("engine error")]
    Engine { source: EngineError },

    #[error("push of {reference} failed: {message}")]
    Reported { reference: String, message: String },

    #[error("push of {reference} returned no output")]
    EmptyStream { reference: String },

    #[error("cancelled")]
    Cancelled,
}
