use qbrain_core::ValidationError;
use qbrain_store::StoreError;

pub type Result<T> = std::result::Result<T, UnitError>;

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A publish write failed. Fatal for the unit's loop; never retried.
    #[error("problem writing {class} {id} output to the shared store: {source}")]
    Publish {
        id: String,
        class: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no tokio runtime available to start unit {id}")]
    NoRuntime { id: String },

    #[error("unit {id} is running; stop it before ticking manually")]
    Busy { id: String },

    /// `stop()` is in progress; the unit accepts no ticks or restarts until it returns.
    #[error("unit {id} is stopping")]
    Stopping { id: String },

    #[error("unit task failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unit '{unit}' takes input from unknown unit '{input}'")]
    UnknownInput { unit: String, input: String },

    #[error("duplicate unit name '{0}'")]
    DuplicateName(String),
}

impl UnitError {
    pub fn is_publish_failure(&self) -> bool {
        matches!(self, UnitError::Publish { .. })
    }
}
