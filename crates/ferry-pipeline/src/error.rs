use ferry_build::{ContextError, FetchError};
use ferry_engine::{AuthError, BuildError, PushError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("function '{function}' cannot be built")]
    NotFound {
        function: String,
        source: ContextError,
    },

    #[error("function '{name}' is already registered")]
    DuplicateFunction { name: String },

    #[error("failed to fetch template '{template}'")]
    Fetch {
        template: String,
        source: FetchError,
    },

    #[error("failed to build function '{function}'")]
    Build {
        function: String,
        source: BuildError,
    },

    #[error("failed to resolve registry credentials")]
    Credentials { source: AuthError },

    #[error("function '{function}' has not been built")]
    NotBuilt { function: String },

    #[error("failed to push function '{function}'")]
    Push {
        function: String,
        source: PushError,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("worker task failed")]
    Worker { source: tokio::task::JoinError },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Build { source, .. } => matches!(source, BuildError::Cancelled),
            Self::Push { source, .. } => matches!(source, PushError::Cancelled),
            _ => false,
        }
    }
}
