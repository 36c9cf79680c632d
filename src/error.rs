use crate::backend::BackendKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no recognized suffix in path {path:?}")]
    MalformedPath { path: String },
    #[error("chunks {chunks:?} cannot cover array of shape {shape:?} at {path:?}")]
    IncompatibleChunking {
        path: String,
        chunks: Vec<i64>,
        shape: Vec<u64>,
    },
    #[error("mismatched lengths of {what}: {lengths:?}")]
    CardinalityMismatch {
        what: String,
        lengths: Vec<usize>,
    },
    #[error("duplicate name {name:?}")]
    DuplicateName { name: String },
    #[error("cannot open {path:?} in mode {mode:?}: {reason}")]
    BackendState {
        path: String,
        mode: String,
        reason: String,
    },
    #[error("expected data type {expected}, found {found}")]
    DtypeMismatch { expected: String, found: String },
    #[error("expected shape {expected:?}, found {found:?}")]
    ShapeMismatch { expected: Vec<u64>, found: Vec<u64> },
    #[error("metadata key {key:?} produced conflicting values for dialects {dialects:?}")]
    MetadataConflict { key: String, dialects: Vec<String> },
    #[error("unknown metadata dialect {0:?}")]
    UnknownDialect(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{0} backend is not available in this build")]
    BackendUnavailable(BackendKind),
    #[error("{0}")]
    General(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] zarrs::storage::StorageError),
    #[error(transparent)]
    Array(#[from] zarrs::array::ArrayError),
    #[error(transparent)]
    ArrayCreate(#[from] zarrs::array::ArrayCreateError),
    #[error(transparent)]
    GroupCreate(#[from] zarrs::group::GroupCreateError),
    #[cfg(feature = "hdf5")]
    #[error(transparent)]
    Hdf5(#[from] hdf5::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }

    pub(crate) fn backend_state(
        path: impl Into<String>,
        mode: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::BackendState {
            path: path.into(),
            mode: mode.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn cardinality(what: impl Into<String>, lengths: Vec<usize>) -> Self {
        Self::CardinalityMismatch {
            what: what.into(),
            lengths,
        }
    }

    /// No recognized suffix where one was required.
    pub fn is_malformed_path(&self) -> bool {
        matches!(self, Self::MalformedPath { .. })
    }

    /// A requested chunk shape cannot validly cover the array.
    pub fn is_incompatible_chunking(&self) -> bool {
        matches!(self, Self::IncompatibleChunking { .. })
    }

    /// Parallel inputs differ in length, or names are not unique.
    pub fn is_cardinality_mismatch(&self) -> bool {
        matches!(
            self,
            Self::CardinalityMismatch { .. } | Self::DuplicateName { .. }
        )
    }

    /// The requested mode conflicts with what is in the store.
    pub fn is_backend_state(&self) -> bool {
        matches!(self, Self::BackendState { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}
