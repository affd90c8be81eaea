use base64::Engine as _;
use crypto_secretbox::{
    aead::{Aead as _, KeyInit as _},
    Nonce, XSalsa20Poly1305,
};
use rand::Rng as _;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::kdf::{self, KdfEngine, KdfSpec};
use crate::{
    config::{Argon2Variant, KdfConfig, KdfKind, SaltPolicy},
    errors::MirrorError,
};

pub const METADATA_VERSION: u8 = 1;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;

pub const CIPHER_TAG: &str = "secretbox";
/// Cipher tag written by early app builds; same XSalsa20-Poly1305 construction.
const CIPHER_TAG_LEGACY: &str = "tweetnacl-secretbox";

/// Cost parameters as persisted. Which fields are present depends on the KDF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCostParams {
    #[serde(rename = "N", default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m_cost: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_cost: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_cost: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Argon2Variant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfCostParams>,
    /// Base64.
    pub salt: String,
    /// Base64.
    pub nonce: String,
}

/// Everything needed to re-derive the key and open the ciphertext, except the password.
///
/// Blobs written before versioning carry no `version` and read as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub kdf: Option<String>,
    #[serde(default, alias = "crypto")]
    pub cipher: Option<String>,
    #[serde(default)]
    pub params: Option<KdfParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub meta: EncryptionMetadata,
    /// Base64 of the secretbox output (tag then ciphertext).
    pub data: String,
}

impl EncryptedBlob {
    /// KDF tag recorded in the metadata, if any.
    pub fn kdf_tag(&self) -> Option<&str> {
        self.meta.kdf.as_deref()
    }
}

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_salt(policy: SaltPolicy) -> [u8; SALT_LEN] {
    let mut s = [0_u8; SALT_LEN];
    fill_random(&mut s);
    if policy == SaltPolicy::LegacyAscii {
        for b in &mut s {
            *b %= 0x80;
            if *b == 0 {
                *b = 1;
            }
        }
    }
    s
}

fn spec_for(cfg: &KdfConfig) -> KdfSpec {
    match cfg.default {
        KdfKind::Scrypt => KdfSpec::Scrypt(cfg.scrypt),
        KdfKind::Argon2 => KdfSpec::Argon2(cfg.argon2),
    }
}

/// Encrypt `plaintext` under a key derived from `password`. Salt and nonce are fresh on
/// every call.
pub fn encrypt(
    password: &SecretString,
    plaintext: &[u8],
    cfg: &KdfConfig,
) -> Result<EncryptedBlob, MirrorError> {
    let salt = random_salt(cfg.salt_policy);
    let mut nonce = [0_u8; NONCE_LEN];
    fill_random(&mut nonce);

    let spec = spec_for(cfg);
    let key = kdf::derive_with(password, &spec, &salt)?;
    let cipher = XSalsa20Poly1305::new(key.as_bytes().into());
    let ct = cipher.encrypt(Nonce::from_slice(&nonce), plaintext)?;

    let b64 = base64::engine::general_purpose::STANDARD;
    Ok(EncryptedBlob {
        meta: EncryptionMetadata {
            version: METADATA_VERSION,
            kdf: Some(spec.tag().to_owned()),
            cipher: Some(CIPHER_TAG.to_owned()),
            params: Some(KdfParams {
                kdf: Some(spec.cost_params()),
                salt: b64.encode(salt),
                nonce: b64.encode(nonce),
            }),
        },
        data: b64.encode(ct),
    })
}

/// Open a blob. The key is derived before the cipher tag is checked, so metadata problems
/// in the KDF section are reported first.
pub fn decrypt(
    engine: &KdfEngine,
    password: &SecretString,
    blob: &EncryptedBlob,
) -> Result<Zeroizing<Vec<u8>>, MirrorError> {
    let meta = &blob.meta;
    if meta.version > METADATA_VERSION {
        return Err(MirrorError::InvalidMetadata(format!(
            "unsupported metadata version {}",
            meta.version
        )));
    }
    let key = engine.derive(password, meta)?;

    match meta.cipher.as_deref() {
        Some(CIPHER_TAG | CIPHER_TAG_LEGACY) => {}
        Some(other) => return Err(MirrorError::InvalidAlgorithm(format!("cipher {other}"))),
        None => return Err(MirrorError::InvalidAlgorithm("cipher missing".to_owned())),
    }

    let b64 = base64::engine::general_purpose::STANDARD;
    let nonce = meta
        .params
        .as_ref()
        .map(|p| b64.decode(&p.nonce))
        .transpose()
        .map_err(|e| MirrorError::InvalidMetadata(format!("nonce: {e}")))?
        .unwrap_or_default();
    if nonce.len() != NONCE_LEN {
        return Err(MirrorError::InvalidMetadata(format!(
            "nonce must be {NONCE_LEN} bytes"
        )));
    }
    let ct = b64
        .decode(&blob.data)
        .map_err(|e| MirrorError::CorruptRecord(format!("ciphertext: {e}")))?;

    let cipher = XSalsa20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .map(Zeroizing::new)
        .map_err(MirrorError::from)
}
