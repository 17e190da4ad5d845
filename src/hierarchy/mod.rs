//! The three-tier key hierarchy
//!
//! Root keys are wrapped by the unseal service, intermediate keys by the
//! latest root, and content keys by the latest intermediate. Each service
//! initializes its tier on first construction and exposes wrap/unwrap
//! operations against a caller-supplied transaction.

pub mod content;
pub mod intermediate;
pub mod root;

pub use content::ContentKeyService;
pub use intermediate::IntermediateKeyService;
pub use root::RootKeyService;
