//! Plaintext key material and key generation
//!
//! Plaintext keys exist only while an operation that unwrapped them is on the
//! stack. `KeyMaterial` owns its bytes, scrubs them on drop, and never leaves
//! them in `Debug` output or serialized form.

use crate::error::{Error, Result};
use crate::id::KeyId;
use crate::util;
use crate::AES256_KEY_SIZE;
use std::fmt;
use std::sync::Mutex;
use subtle::ConstantTimeEq;
use uuid::{ContextV7, Timestamp, Uuid};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A plaintext AES-256 key
///
/// The buffer is zeroized when the value is dropped. Comparison is
/// constant-time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; AES256_KEY_SIZE],
}

impl KeyMaterial {
    /// Takes ownership of raw key bytes
    pub fn new(bytes: [u8; AES256_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copies key bytes out of a slice, which must be exactly 32 bytes
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != AES256_KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "key material must be {AES256_KEY_SIZE} bytes, got {}",
                slice.len()
            )));
        }

        let mut bytes = [0_u8; AES256_KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Borrows the raw key bytes
    pub fn bytes(&self) -> &[u8; AES256_KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"<hidden>")
            .finish()
    }
}

/// Source of fresh key ids and key material
///
/// Passed to every service constructor so tests can substitute fakes that
/// fail or produce fixed values. Ids issued by one generator instance must be
/// monotonically non-decreasing in issue order.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Issues a fresh time-ordered key id
    fn generate_id(&self) -> KeyId;

    /// Generates fresh random key material
    fn generate_key(&self) -> Result<KeyMaterial>;
}

/// Default generator: CSPRNG key bytes and v7-style time-ordered ids
pub struct RandomKeyGenerator {
    clock: Mutex<ContextV7>,
}

impl RandomKeyGenerator {
    /// Creates a new generator with its own monotonic id clock
    pub fn new() -> Self {
        Self {
            clock: Mutex::new(ContextV7::new()),
        }
    }
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RandomKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomKeyGenerator").finish()
    }
}

impl KeyGenerator for RandomKeyGenerator {
    fn generate_id(&self) -> KeyId {
        let clock = self.clock.lock().expect("key generator clock mutex poisoned");
        KeyId::from_uuid(Uuid::new_v7(Timestamp::now(&*clock)))
    }

    fn generate_key(&self) -> Result<KeyMaterial> {
        let mut bytes = [0_u8; AES256_KEY_SIZE];
        util::fill_random(&mut bytes);
        Ok(KeyMaterial::new(bytes))
    }
}
