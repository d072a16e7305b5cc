use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Where a function is in the pipeline. Variants are declared in pipeline
/// order; a function only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FunctionState {
    Registered,
    TemplateFetched,
    FilesBuilt,
    HandlerBuilt,
    Pushed,
    Done,
    Failed,
}

impl FunctionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// `Failed` is reachable from any non-terminal state; everything else
    /// must lie strictly ahead.
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && (next == Self::Failed || next > self)
    }
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registered => "registered",
            Self::TemplateFetched => "template fetched",
            Self::FilesBuilt => "files built",
            Self::HandlerBuilt => "handler built",
            Self::Pushed => "pushed",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Per-function states, shared with running jobs. The lock is never held
/// across an await.
#[derive(Debug, Default, Clone)]
pub(crate) struct StateTable {
    inner: Arc<Mutex<BTreeMap<String, FunctionState>>>,
}

impl StateTable {
    pub(crate) fn register(&self, name: &str) {
        self.lock()
            .insert(name.to_owned(), FunctionState::Registered);
    }

    pub(crate) fn get(&self, name: &str) -> Option<FunctionState> {
        self.lock().get(name).copied()
    }

    /// Moves `name` to `next` if that is a forward transition. Returns
    /// whether the state changed.
    pub(crate) fn advance(&self, name: &str, next: FunctionState) -> bool {
        let mut states = self.lock();
        match states.get_mut(name) {
            Some(current) if current.can_advance_to(next) => {
                *current = next;
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FunctionState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
