//! Shared-secret unseal service (M-of-N)

use crate::error::{Error, Result};
use crate::key::KeyMaterial;
use crate::unseal::{derive_key, derive_kid, open_key, Keyring, UnsealKey, UnsealService};

use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroizing;

/// Unseal service deriving wrapping keys from shared-secret combinations
///
/// Given M shared secrets and a threshold N, one wrapping key is derived for
/// every N-sized subset of the secrets (C(M,N) keys in total). Encryption
/// wraps under all of them, so any party holding an N-subset of the original
/// secrets can decrypt. Derivation is deterministic: subsets are enumerated
/// in ascending index order and members concatenated in that order, so
/// services constructed from different N-subsets of the same M secrets
/// interoperate.
pub struct SharedSecretUnsealService {
    keyring: Keyring,
}

impl SharedSecretUnsealService {
    /// Derives all combination keys for the given secrets and threshold
    pub fn new(secrets: Vec<Vec<u8>>, threshold: usize) -> Result<Self> {
        let secrets: Vec<Zeroizing<Vec<u8>>> =
            secrets.into_iter().map(Zeroizing::new).collect();

        if secrets.iter().any(|secret| secret.is_empty()) {
            return Err(Error::InvalidArgument(
                "shared secrets must be non-empty".into(),
            ));
        }

        let subsets = combinations(secrets.len(), threshold);
        if subsets.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "no unseal key combinations for {} secrets with threshold {}",
                secrets.len(),
                threshold
            )));
        }

        let mut keys = Vec::with_capacity(subsets.len());
        for subset in subsets {
            let mut ikm = Zeroizing::new(Vec::new());
            for index in subset {
                ikm.extend_from_slice(&secrets[index]);
            }
            keys.push(UnsealKey {
                kid: derive_kid(&ikm)?,
                key: derive_key(&ikm)?,
            });
        }

        Ok(Self {
            keyring: Keyring::new(keys)?,
        })
    }
}

impl fmt::Debug for SharedSecretUnsealService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretUnsealService")
            .field("keyring", &self.keyring)
            .finish()
    }
}

#[async_trait]
impl UnsealService for SharedSecretUnsealService {
    async fn encrypt_key(&self, key: &KeyMaterial) -> Result<String> {
        self.keyring.seal(key.bytes())
    }

    async fn decrypt_key(&self, sealed: &str) -> Result<KeyMaterial> {
        open_key(&self.keyring, sealed)
    }

    async fn encrypt_data(&self, data: &[u8]) -> Result<String> {
        self.keyring.seal(data)
    }

    async fn decrypt_data(&self, sealed: &str) -> Result<Vec<u8>> {
        self.keyring.open(sealed)
    }

    async fn shutdown(&self) -> Result<()> {
        self.keyring.shutdown();
        Ok(())
    }
}

/// Enumerates all `choose`-sized index subsets of `0..count` in ascending
/// lexicographic order
fn combinations(count: usize, choose: usize) -> Vec<Vec<usize>> {
    if choose == 0 || choose > count {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut current: Vec<usize> = (0..choose).collect();
    loop {
        result.push(current.clone());

        // Advance the rightmost index that can still move
        let mut position = choose;
        while position > 0 {
            position -= 1;
            if current[position] < count - (choose - position) {
                current[position] += 1;
                for follow in position + 1..choose {
                    current[follow] = current[follow - 1] + 1;
                }
                break;
            }
            if position == 0 {
                return result;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyGenerator, RandomKeyGenerator};

    fn secrets() -> Vec<Vec<u8>> {
        vec![
            b"alpha-secret".to_vec(),
            b"bravo-secret".to_vec(),
            b"charlie-secret".to_vec(),
        ]
    }

    #[test]
    fn combinations_enumerate_lexicographically() {
        assert_eq!(
            combinations(3, 2),
            vec![vec![0, 1], vec![0, 2], vec![1, 2]]
        );
        assert_eq!(combinations(4, 1), vec![vec![0], vec![1], vec![2], vec![3]]);
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
        assert!(combinations(3, 0).is_empty());
        assert!(combinations(2, 3).is_empty());
    }

    #[test]
    fn zero_combinations_fail_construction() {
        assert!(matches!(
            SharedSecretUnsealService::new(secrets(), 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            SharedSecretUnsealService::new(secrets(), 4),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            SharedSecretUnsealService::new(vec![b"one".to_vec(), Vec::new()], 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn key_roundtrip() {
        let service = SharedSecretUnsealService::new(secrets(), 2).unwrap();
        let plain = RandomKeyGenerator::new().generate_key().unwrap();

        let sealed = service.encrypt_key(&plain).await.unwrap();
        // C(3,2) recipients
        assert_eq!(sealed.lines().count(), 3);
        assert_eq!(service.decrypt_key(&sealed).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn any_threshold_subset_interoperates() {
        let full = SharedSecretUnsealService::new(secrets(), 2).unwrap();
        let sealed = full.encrypt_data(b"quorum payload").await.unwrap();

        // Every 2-subset of the 3 secrets can stand up its own service and
        // decrypt what the full service produced
        let all = secrets();
        for subset in [[0, 1], [0, 2], [1, 2]] {
            let holder = SharedSecretUnsealService::new(
                vec![all[subset[0]].clone(), all[subset[1]].clone()],
                2,
            )
            .unwrap();
            assert_eq!(
                holder.decrypt_data(&sealed).await.unwrap(),
                b"quorum payload"
            );
        }
    }

    #[tokio::test]
    async fn below_threshold_subset_cannot_decrypt() {
        let full = SharedSecretUnsealService::new(secrets(), 2).unwrap();
        let sealed = full.encrypt_data(b"quorum payload").await.unwrap();

        // One secret alone derives a different combination key
        let holder =
            SharedSecretUnsealService::new(vec![secrets()[0].clone()], 1).unwrap();
        assert!(matches!(
            holder.decrypt_data(&sealed).await,
            Err(Error::Unseal(_))
        ));
    }

    #[tokio::test]
    async fn derivation_is_deterministic() {
        let first = SharedSecretUnsealService::new(secrets(), 2).unwrap();
        let second = SharedSecretUnsealService::new(secrets(), 2).unwrap();

        let sealed = first.encrypt_data(b"deterministic").await.unwrap();
        assert_eq!(
            second.decrypt_data(&sealed).await.unwrap(),
            b"deterministic"
        );
    }

    #[tokio::test]
    async fn shutdown_releases_derived_keys() {
        let service = SharedSecretUnsealService::new(secrets(), 2).unwrap();
        let sealed = service.encrypt_data(b"payload").await.unwrap();

        service.shutdown().await.unwrap();
        assert!(matches!(
            service.decrypt_data(&sealed).await,
            Err(Error::Unseal(_))
        ));
    }
}
