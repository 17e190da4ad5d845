//! JWE Compact Serialization codec
//!
//! Every envelope the barrier produces or consumes is a JWE in compact form:
//! five dot-separated Base64URL segments (protected header, encrypted key,
//! iv, ciphertext, tag). The protected header names the wrapping algorithm
//! (`dir` or `A256KW`), the content encryption algorithm (`A256GCM`), and the
//! wrapping key's `kid`. The AAD is the ASCII of the encoded header segment,
//! so a parsed envelope keeps the original segment text and authenticates the
//! exact bytes that were produced.

use crate::error::{Error, Result};
use crate::id::KeyId;
use crate::util;
use crate::AES256_KEY_SIZE;

use aes_gcm::aead::{Aead as AeadTrait, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce};
use aes_kw::KekAes256;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// GCM initialization vector length (96 bits)
pub const GCM_IV_SIZE: usize = 12;

/// GCM authentication tag length (128 bits)
pub const GCM_TAG_SIZE: usize = 16;

/// Length of an AES-KW wrapped 256-bit key
const WRAPPED_CEK_SIZE: usize = AES256_KEY_SIZE + 8;

// Maximum plaintext size supported by GCM: ((1 << 32) - 2) blocks
const GCM_MAX_DATA_SIZE: usize = ((1 << 32) - 2) * 16;

const ENC_A256GCM: &str = "A256GCM";

/// Key management algorithm named by the protected header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlg {
    /// Direct use of the named key as the content encryption key
    Dir,
    /// AES-256 key wrap of a fresh content encryption key
    A256Kw,
}

impl KeyAlg {
    fn as_str(&self) -> &'static str {
        match self {
            KeyAlg::Dir => "dir",
            KeyAlg::A256Kw => "A256KW",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dir" => Ok(KeyAlg::Dir),
            "A256KW" => Ok(KeyAlg::A256Kw),
            other => Err(Error::EnvelopeParse(format!(
                "unsupported alg {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    enc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

/// A parsed JWE compact envelope
#[derive(Debug, Clone)]
pub struct Envelope {
    protected_b64: String,
    header: Header,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

/// Seals `plaintext` under `key`, embedding `kid` in the protected header
///
/// With [`KeyAlg::Dir`] the key is used directly as the content encryption
/// key and the encrypted-key segment is empty. With [`KeyAlg::A256Kw`] a
/// fresh content encryption key is generated and AES-KW wrapped under `key`.
pub fn seal(
    alg: KeyAlg,
    kid: &KeyId,
    key: &[u8; AES256_KEY_SIZE],
    plaintext: &[u8],
) -> Result<String> {
    if plaintext.len() > GCM_MAX_DATA_SIZE {
        return Err(Error::InvalidArgument("plaintext too large for GCM".into()));
    }

    let header = Header {
        alg: alg.as_str().to_string(),
        enc: ENC_A256GCM.to_string(),
        kid: Some(kid.to_string()),
    };
    let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

    let mut cek = [0_u8; AES256_KEY_SIZE];
    let encrypted_key = match alg {
        KeyAlg::Dir => {
            cek.copy_from_slice(key);
            Vec::new()
        }
        KeyAlg::A256Kw => {
            util::fill_random(&mut cek);
            let kek = KekAes256::try_from(&key[..])
                .map_err(|e| Error::KeyWrap(format!("bad wrapping key: {e}")))?;
            kek.wrap_vec(&cek)
                .map_err(|e| Error::KeyWrap(format!("wrap failed: {e}")))?
        }
    };

    let mut iv = [0_u8; GCM_IV_SIZE];
    util::fill_random(&mut iv);

    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&cek));
    let sealed = cipher.encrypt(
        Nonce::from_slice(&iv),
        Payload {
            msg: plaintext,
            aad: protected_b64.as_bytes(),
        },
    );
    cek.zeroize();
    let mut sealed = sealed.map_err(|_| Error::KeyWrap("content encryption refused".into()))?;

    // Ciphertext and tag travel as separate segments
    let tag_offset = sealed.len() - GCM_TAG_SIZE;
    let tag = sealed.split_off(tag_offset);

    Ok(format!(
        "{}.{}.{}.{}.{}",
        protected_b64,
        URL_SAFE_NO_PAD.encode(&encrypted_key),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(&sealed),
        URL_SAFE_NO_PAD.encode(&tag),
    ))
}

/// Parses a compact envelope without decrypting it
pub fn parse(compact: &str) -> Result<Envelope> {
    let segments: Vec<&str> = compact.split('.').collect();
    if segments.len() != 5 {
        return Err(Error::EnvelopeParse(format!(
            "expected 5 segments, got {}",
            segments.len()
        )));
    }

    let decode = |name: &str, segment: &str| -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| Error::EnvelopeParse(format!("{name} segment: {e}")))
    };

    let header_bytes = decode("header", segments[0])?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|e| Error::EnvelopeParse(format!("protected header: {e}")))?;

    if header.enc != ENC_A256GCM {
        return Err(Error::EnvelopeParse(format!(
            "unsupported enc {:?}",
            header.enc
        )));
    }
    let alg = KeyAlg::from_str(&header.alg)?;

    let encrypted_key = decode("encrypted key", segments[1])?;
    if alg == KeyAlg::Dir && !encrypted_key.is_empty() {
        return Err(Error::EnvelopeParse(
            "dir envelope carries an encrypted key".into(),
        ));
    }

    let iv = decode("iv", segments[2])?;
    if iv.len() != GCM_IV_SIZE {
        return Err(Error::EnvelopeParse(format!(
            "iv must be {GCM_IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }

    let ciphertext = decode("ciphertext", segments[3])?;

    let tag = decode("tag", segments[4])?;
    if tag.len() != GCM_TAG_SIZE {
        return Err(Error::EnvelopeParse(format!(
            "tag must be {GCM_TAG_SIZE} bytes, got {}",
            tag.len()
        )));
    }

    Ok(Envelope {
        protected_b64: segments[0].to_string(),
        header,
        encrypted_key,
        iv,
        ciphertext,
        tag,
    })
}

impl Envelope {
    /// The key management algorithm named by the header
    pub fn alg(&self) -> KeyAlg {
        // Validated during parse
        match self.header.alg.as_str() {
            "dir" => KeyAlg::Dir,
            _ => KeyAlg::A256Kw,
        }
    }

    /// The wrapping key id named by the header
    pub fn kid(&self) -> Result<KeyId> {
        let kid = self.header.kid.as_deref().ok_or(Error::KidMissing)?;
        KeyId::parse(kid)
    }

    /// Decrypts the envelope with the named wrapping key
    pub fn open(&self, key: &[u8; AES256_KEY_SIZE]) -> Result<Vec<u8>> {
        let mut cek = [0_u8; AES256_KEY_SIZE];
        match self.alg() {
            KeyAlg::Dir => cek.copy_from_slice(key),
            KeyAlg::A256Kw => {
                if self.encrypted_key.len() != WRAPPED_CEK_SIZE {
                    return Err(Error::KeyWrap(format!(
                        "wrapped key must be {WRAPPED_CEK_SIZE} bytes, got {}",
                        self.encrypted_key.len()
                    )));
                }
                let kek = KekAes256::try_from(&key[..])
                    .map_err(|e| Error::KeyWrap(format!("bad wrapping key: {e}")))?;
                let mut unwrapped = kek
                    .unwrap_vec(&self.encrypted_key)
                    .map_err(|e| Error::KeyWrap(format!("unwrap failed: {e}")))?;
                cek.copy_from_slice(&unwrapped);
                unwrapped.zeroize();
            }
        }

        let mut sealed = Vec::with_capacity(self.ciphertext.len() + GCM_TAG_SIZE);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&cek));
        let opened = cipher.decrypt(
            Nonce::from_slice(&self.iv),
            Payload {
                msg: &sealed,
                aad: self.protected_b64.as_bytes(),
            },
        );
        cek.zeroize();

        opened.map_err(|_| Error::AuthenticatedDecryption("AEAD tag mismatch".into()))
    }
}
