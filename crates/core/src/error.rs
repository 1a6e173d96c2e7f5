use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid document id {0:?}: expected an unsigned integer")]
    InvalidDocumentId(String),

    #[error("chunk {chunk_id} appended out of order, expected {expected}")]
    OutOfOrderChunk { chunk_id: u32, expected: u32 },

    #[error("posting for token {token:?} has chunk id {chunk_id} below previous {previous}")]
    OutOfOrderPosting {
        token: String,
        chunk_id: u32,
        previous: u32,
    },

    #[error("chunk payload of {0} bytes does not fit a u32 length")]
    PayloadTooLarge(usize),

    #[error("chunk store is unusable after an earlier write failure")]
    StoreUnusable,

    #[error("spill file {path} is corrupted: {reason}")]
    CorruptSpill { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chunk {0} is out of range of the chunk index")]
    ChunkNotFound(u32),

    #[error("corrupted chunk index: slot {expected} holds chunk id {found}")]
    ChunkIdMismatch { expected: u32, found: u32 },

    #[error("corrupted data: {0}")]
    Corruption(String),

    #[error("unsupported manifest format version {found}, expected {expected}")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SearchError {
    /// True for faults caused by inconsistent on-disk data.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SearchError::ChunkIdMismatch { .. } | SearchError::Corruption(_)
        )
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
