use crate::id::{KeyId, Tier};
use thiserror::Error;

/// Result type for barrier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the barrier
#[derive(Error, Debug)]
pub enum Error {
    /// A required parameter was missing, empty, or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `latest` lookup ran against a tier with no records
    #[error("{0} key tier is empty")]
    EmptyTier(Tier),

    /// A lookup for a specific key id failed
    #[error("{tier} key {id} not found")]
    NotFound { tier: Tier, id: KeyId },

    /// An insert collided with an existing record id
    #[error("{tier} key {id} already exists")]
    Conflict { tier: Tier, id: KeyId },

    /// The envelope could not be parsed as JWE compact serialization
    #[error("envelope parse error: {0}")]
    EnvelopeParse(String),

    /// The protected header carries no `kid`
    #[error("envelope protected header has no kid")]
    KidMissing,

    /// The `kid` header is present but is not a valid 128-bit id
    #[error("malformed kid: {0}")]
    KidMalformed(String),

    /// The unseal service refused an encryption or decryption
    #[error("unseal error: {0}")]
    Unseal(String),

    /// AEAD authentication failed
    #[error("authenticated decryption failed: {0}")]
    AuthenticatedDecryption(String),

    /// The key-wrapping primitive refused the operation
    #[error("key wrap error: {0}")]
    KeyWrap(String),

    /// Repository I/O failure or transaction abort
    #[error("storage error: {0}")]
    Storage(String),

    /// A component failed to construct or initialize its tier
    #[error("{context}: {source}")]
    Initialization {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// Errors related to JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an error with initialization context naming the failed stage
    pub fn during_init(context: impl Into<String>, source: Error) -> Self {
        Error::Initialization {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
