//! Password key derivation.
//!
//! Persisted metadata is parsed once into [`KdfSpec`]; everything past that point matches on
//! the enum, so an unknown algorithm can only surface at the parsing boundary.

use argon2::{Algorithm, Argon2, Version};
use base64::Engine as _;
use secrecy::{ExposeSecret as _, SecretString};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::crypto::{EncryptionMetadata, KdfCostParams};
use crate::config::{Argon2Cost, Argon2Variant, ScryptCost};
use crate::errors::MirrorError;

pub const KEY_LEN: usize = 32;

pub const KDF_TAG_SCRYPT: &str = "scrypt";
pub const KDF_TAG_ARGON2: &str = "argon2";
/// Tag written by early app builds for the same Argon2 derivation.
const KDF_TAG_ARGON2_LEGACY: &str = "signal-argon2";

// Ceilings for cost parameters read from a persisted blob. Anything above is treated as a
// corrupt record rather than an allocation request.
const SCRYPT_MAX_LOG_N: u32 = 20;
const SCRYPT_MAX_R_TIMES_P: u64 = 1 << 16;
/// scrypt needs `128 * N * r` bytes of scratch memory.
const SCRYPT_MAX_MEMORY: u64 = 1 << 30;
/// KiB, so 1 GiB.
const ARGON2_MAX_M_COST: u32 = 1 << 20;
const ARGON2_MAX_T_COST: u32 = 64;
const ARGON2_MAX_P_COST: u32 = 16;

/// 256-bit symmetric key, wiped on drop. Deliberately neither `Clone` nor `Debug`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfSpec {
    Scrypt(ScryptCost),
    Argon2(Argon2Cost),
}

impl KdfSpec {
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Scrypt(_) => KDF_TAG_SCRYPT,
            Self::Argon2(_) => KDF_TAG_ARGON2,
        }
    }

    pub const fn cost_params(&self) -> KdfCostParams {
        match *self {
            Self::Scrypt(c) => KdfCostParams {
                n: Some(c.n),
                r: Some(c.r),
                p: Some(c.p),
                m_cost: None,
                t_cost: None,
                p_cost: None,
                variant: None,
            },
            Self::Argon2(c) => KdfCostParams {
                n: None,
                r: None,
                p: None,
                m_cost: Some(c.m_cost),
                t_cost: Some(c.t_cost),
                p_cost: Some(c.p_cost),
                variant: Some(c.variant),
            },
        }
    }
}

/// Derives keys from passwords. Holds the caller's Argon2 configuration, which applies to
/// Argon2 blobs that predate per-blob cost parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct KdfEngine {
    argon2: Argon2Cost,
}

impl KdfEngine {
    pub const fn new(argon2: Argon2Cost) -> Self {
        Self { argon2 }
    }

    /// Derive the key described by `meta`. Same password and metadata always give the same key.
    pub fn derive(
        &self,
        password: &SecretString,
        meta: &EncryptionMetadata,
    ) -> Result<DerivedKey, MirrorError> {
        let (spec, salt) = self.resolve(meta)?;
        derive_with(password, &spec, &salt)
    }

    /// Turn loosely-typed persisted metadata into a concrete derivation and its salt.
    pub fn resolve(&self, meta: &EncryptionMetadata) -> Result<(KdfSpec, Vec<u8>), MirrorError> {
        let (Some(tag), Some(params)) = (meta.kdf.as_deref(), meta.params.as_ref()) else {
            return Err(MirrorError::InvalidMetadata(
                "kdf and params are required".to_owned(),
            ));
        };

        let spec = match tag {
            KDF_TAG_SCRYPT => {
                let cost = params.kdf.as_ref().ok_or_else(|| {
                    MirrorError::InvalidMetadata("scrypt cost parameters missing".to_owned())
                })?;
                let (Some(n), Some(r), Some(p)) = (cost.n, cost.r, cost.p) else {
                    return Err(MirrorError::InvalidMetadata(
                        "scrypt requires N, r and p".to_owned(),
                    ));
                };
                KdfSpec::Scrypt(ScryptCost { n, r, p })
            }
            KDF_TAG_ARGON2 | KDF_TAG_ARGON2_LEGACY => {
                let mut cost = self.argon2;
                if let Some(c) = params.kdf.as_ref() {
                    cost.m_cost = c.m_cost.unwrap_or(cost.m_cost);
                    cost.t_cost = c.t_cost.unwrap_or(cost.t_cost);
                    cost.p_cost = c.p_cost.unwrap_or(cost.p_cost);
                    cost.variant = c.variant.unwrap_or(cost.variant);
                }
                KdfSpec::Argon2(cost)
            }
            other => return Err(MirrorError::InvalidAlgorithm(format!("kdf {other}"))),
        };

        let salt = base64::engine::general_purpose::STANDARD
            .decode(&params.salt)
            .map_err(|e| MirrorError::InvalidMetadata(format!("salt: {e}")))?;
        if salt.is_empty() {
            return Err(MirrorError::InvalidMetadata("empty salt".to_owned()));
        }
        Ok((spec, salt))
    }
}

pub fn derive_with(
    password: &SecretString,
    spec: &KdfSpec,
    salt: &[u8],
) -> Result<DerivedKey, MirrorError> {
    let mut out = [0_u8; KEY_LEN];
    let pw = password.expose_secret().as_bytes();
    let res = match *spec {
        KdfSpec::Scrypt(cost) => derive_scrypt(pw, salt, cost, &mut out),
        KdfSpec::Argon2(cost) => derive_argon2(pw, salt, cost, &mut out),
    };
    match res {
        Ok(()) => Ok(DerivedKey(out)),
        Err(e) => {
            out.zeroize();
            Err(e)
        }
    }
}

fn derive_scrypt(
    pw: &[u8],
    salt: &[u8],
    cost: ScryptCost,
    out: &mut [u8; KEY_LEN],
) -> Result<(), MirrorError> {
    check_scrypt_cost(cost)?;
    let log_n = u8::try_from(cost.n.trailing_zeros())
        .map_err(|e| MirrorError::InvalidMetadata(format!("scrypt N: {e}")))?;
    let params = scrypt::Params::new(log_n, cost.r, cost.p, KEY_LEN)
        .map_err(|e| MirrorError::InvalidMetadata(format!("scrypt params: {e}")))?;
    scrypt::scrypt(pw, salt, &params, out)
        .map_err(|e| MirrorError::InvalidMetadata(format!("scrypt output: {e}")))
}

fn check_scrypt_cost(cost: ScryptCost) -> Result<(), MirrorError> {
    if cost.n < 2 || !cost.n.is_power_of_two() {
        return Err(MirrorError::InvalidMetadata(format!(
            "scrypt N must be a power of two > 1, got {}",
            cost.n
        )));
    }
    if cost.n.trailing_zeros() > SCRYPT_MAX_LOG_N {
        return Err(MirrorError::InvalidMetadata(format!(
            "scrypt N {} exceeds 2^{SCRYPT_MAX_LOG_N}",
            cost.n
        )));
    }
    if cost.r == 0 || cost.p == 0 {
        return Err(MirrorError::InvalidMetadata(
            "scrypt r and p must be positive".to_owned(),
        ));
    }
    let r = u64::from(cost.r);
    if r.saturating_mul(u64::from(cost.p)) > SCRYPT_MAX_R_TIMES_P {
        return Err(MirrorError::InvalidMetadata(format!(
            "scrypt r*p exceeds {SCRYPT_MAX_R_TIMES_P}"
        )));
    }
    if cost.n.saturating_mul(r).saturating_mul(128) > SCRYPT_MAX_MEMORY {
        return Err(MirrorError::InvalidMetadata(
            "scrypt memory cost exceeds 1 GiB".to_owned(),
        ));
    }
    Ok(())
}

fn check_argon2_cost(cost: Argon2Cost) -> Result<(), MirrorError> {
    if cost.m_cost > ARGON2_MAX_M_COST {
        return Err(MirrorError::InvalidMetadata(format!(
            "argon2 m_cost {} KiB exceeds {ARGON2_MAX_M_COST}",
            cost.m_cost
        )));
    }
    if cost.t_cost > ARGON2_MAX_T_COST || cost.p_cost > ARGON2_MAX_P_COST {
        return Err(MirrorError::InvalidMetadata(format!(
            "argon2 t_cost {} / p_cost {} out of range",
            cost.t_cost, cost.p_cost
        )));
    }
    Ok(())
}

fn derive_argon2(
    pw: &[u8],
    salt: &[u8],
    cost: Argon2Cost,
    out: &mut [u8; KEY_LEN],
) -> Result<(), MirrorError> {
    check_argon2_cost(cost)?;
    let algorithm = match cost.variant {
        Argon2Variant::Argon2d => Algorithm::Argon2d,
        Argon2Variant::Argon2i => Algorithm::Argon2i,
        Argon2Variant::Argon2id => Algorithm::Argon2id,
    };
    let params = argon2::Params::new(cost.m_cost, cost.t_cost, cost.p_cost, Some(KEY_LEN))
        .map_err(|e| MirrorError::InvalidMetadata(format!("argon2 params: {e}")))?;
    Argon2::new(algorithm, Version::V0x13, params)
        .hash_password_into(pw, salt, out)
        .map_err(|e| MirrorError::InvalidMetadata(format!("argon2: {e}")))
}
