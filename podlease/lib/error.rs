use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a podlease-related operation.
pub type PodleaseResult<T> = Result<T, PodleaseError>;

/// An error that occurred while provisioning, tracking or reclaiming a sandbox.
#[derive(Debug, Error)]
pub enum PodleaseError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// The container runtime could not be reached.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The image could not be resolved or the unit could not be started from it.
    #[error("image error: {0}")]
    ImageError(String),

    /// The runtime answered, but reported a failure it should not have.
    #[error("runtime api error: {0}")]
    RuntimeApi(String),

    /// The lease store could not complete the operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// The lease store is reachable but a previously shared termination outcome reported a
    /// store failure.
    #[error("store unavailable: {0}")]
    StoreUnavailableReported(String),

    /// A store migration failed.
    #[error("store migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The sandbox does not exist, or does not belong to the caller.
    #[error("sandbox not found: {0}")]
    NotFound(i64),

    /// A termination for the sandbox is already in progress.
    #[error("sandbox {0} is already terminating")]
    AlreadyTerminating(i64),

    /// Another live record already references the runtime handle.
    #[error("runtime handle already leased: {0}")]
    DuplicateRuntimeHandle(String),

    /// A persisted record could not be decoded.
    #[error("corrupt sandbox record {id}: {reason}")]
    CorruptRecord {
        /// The id of the offending record.
        id: i64,

        /// What could not be decoded.
        reason: String,
    },

    /// An argument was rejected before any side effect happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration was parsed but is not usable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// An error that occurred during a serde json operation.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// The termination task ended without reporting an outcome.
    #[error("termination of sandbox {0} was interrupted")]
    TerminationInterrupted(i64),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodleaseError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> PodleaseError {
        PodleaseError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Whether retrying the same operation later may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PodleaseError::RuntimeUnavailable(_)
                | PodleaseError::StoreUnavailable(_)
                | PodleaseError::StoreUnavailableReported(_)
                | PodleaseError::AlreadyTerminating(_)
        )
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `PodleaseResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> PodleaseResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
