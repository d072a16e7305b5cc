//! Typed view of the engine's progress output.
//!
//! Build and push responses are sequences of progress messages, each
//! carrying progress text, an auxiliary result, or an error. Both kinds are
//! mapped into [`StreamRecord`] and interpreted by [`collect`].

use bollard::models::{BuildInfo, PushImageInfo};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use ferry_core::ProgressLog;

use crate::engine::{EngineError, RecordStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    /// Human-readable output, forwarded verbatim to the progress log.
    Progress(String),
    /// Terminal result of a build (image id) or push (tag/digest/size).
    Aux(AuxResult),
    /// Engine-reported failure. Ends interpretation of the stream.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxResult {
    Image {
        id: String,
    },
    Push {
        tag: String,
        digest: String,
        size: u64,
    },
}

impl StreamRecord {
    /// Maps one build progress message. Messages carrying nothing of
    /// interest map to `None`.
    ///
    /// When a message carries several fields, error beats aux beats
    /// progress.
    pub fn from_build_info(info: BuildInfo) -> Option<Self> {
        let detail = info.error_detail.and_then(|d| d.message);
        if let Some(message) = reported_error(detail, info.error) {
            return Some(Self::Error(message));
        }
        if let Some(id) = info.aux.and_then(|aux| aux.id).filter(|id| !id.is_empty()) {
            return Some(Self::Aux(AuxResult::Image { id }));
        }
        info.stream
            .or(info.status)
            .filter(|s| !s.is_empty())
            .map(Self::Progress)
    }

    /// Maps one push progress message. The closing
    /// `<tag>: digest: <digest> size: <n>` status becomes a push aux record.
    pub fn from_push_info(info: PushImageInfo) -> Option<Self> {
        if let Some(message) = reported_error(None, info.error) {
            return Some(Self::Error(message));
        }
        let status = info.status.filter(|s| !s.is_empty())?;
        match parse_push_summary(&status) {
            Some(aux) => Some(Self::Aux(aux)),
            None => Some(Self::Progress(status)),
        }
    }
}

/// First non-empty message, the detailed one preferred.
fn reported_error(detail: Option<String>, error: Option<String>) -> Option<String> {
    detail
        .filter(|m| !m.is_empty())
        .or_else(|| error.filter(|m| !m.is_empty()))
}

fn parse_push_summary(status: &str) -> Option<AuxResult> {
    let (tag, rest) = status.split_once(": digest: ")?;
    let (digest, size) = rest.split_once(" size: ")?;
    Some(AuxResult::Push {
        tag: tag.trim().to_owned(),
        digest: digest.trim().to_owned(),
        size: size.trim().parse().ok()?,
    })
}

/// What a stream produced before it ended cleanly.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Collected {
    pub aux: Vec<AuxResult>,
    /// Number of progress and aux records seen.
    pub records: usize,
}

impl Collected {
    /// Id of the last image aux record, i.e. the artifact of the stage.
    pub fn last_image_id(&self) -> Option<&str> {
        self.aux.iter().rev().find_map(|aux| match aux {
            AuxResult::Image { id } => Some(id.as_str()),
            AuxResult::Push { .. } => None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("{message}")]
    Reported { message: String },

    #[error("engine stream failed")]
    Engine {
        #[from]
        source: EngineError,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Drains `records`, forwarding progress text to `log`.
///
/// Stops at the first error record; anything after it, aux records
/// included, is never looked at. Cancellation is checked between records.
pub async fn collect(
    mut records: RecordStream<'_>,
    log: &dyn ProgressLog,
    cancel: &CancellationToken,
) -> Result<Collected, StreamError> {
    let mut collected = Collected::default();

    while let Some(record) = records.next().await {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        match record? {
            StreamRecord::Error(message) => return Err(StreamError::Reported { message }),
            StreamRecord::Progress(text) => {
                log.print(&text);
                collected.records += 1;
            }
            StreamRecord::Aux(aux) => {
                collected.aux.push(aux);
                collected.records += 1;
            }
        }
    }

    Ok(collected)
}
