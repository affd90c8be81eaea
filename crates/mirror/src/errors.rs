use serde::Serialize;
use thiserror::Error;

/// A structured error suitable for printing to a CLI caller as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct CliError {
    pub code: &'static str,
    pub message: String,
}

impl CliError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// Private key input is not 64 hex characters (after optional `0x`).
    #[error("private key must be 64 hex characters")]
    InvalidKeyFormat,

    /// Unknown KDF or cipher tag in persisted metadata.
    #[error("unsupported algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("invalid encryption metadata: {0}")]
    InvalidMetadata(String),

    /// Authentication failed while opening a blob. Wrong password and tampered
    /// ciphertext both land here.
    #[error("invalid key")]
    InvalidKey,

    #[error("biometric authorization failed")]
    Unauthorized,

    #[error("remote status fetch failed: {0}")]
    TransientFetch(String),

    #[error("an order for {0} is already in progress")]
    OrderAlreadyInProgress(String),

    #[error("wallet is not initialized")]
    WalletNotInitialized,

    #[error("store busy")]
    StoreBusy,

    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl MirrorError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidKeyFormat => "invalid_key_format",
            Self::InvalidAlgorithm(_) => "invalid_algorithm",
            Self::InvalidMetadata(_) => "invalid_metadata",
            Self::InvalidKey => "invalid_key",
            Self::Unauthorized => "unauthorized",
            Self::TransientFetch(_) => "transient_fetch",
            Self::OrderAlreadyInProgress(_) => "order_already_in_progress",
            Self::WalletNotInitialized => "wallet_not_initialized",
            Self::StoreBusy => "store_busy",
            Self::CorruptRecord(_) => "corrupt_record",
        }
    }
}

/// AEAD failures carry no detail. Wrong key and tampered data both end up here.
impl From<crypto_secretbox::aead::Error> for MirrorError {
    fn from(_: crypto_secretbox::aead::Error) -> Self {
        Self::InvalidKey
    }
}

impl From<MirrorError> for CliError {
    fn from(e: MirrorError) -> Self {
        match e {
            // Wrong password and tampering share one message on purpose.
            MirrorError::InvalidKey => Self::new(e.code(), "password not matched"),
            MirrorError::StoreBusy => Self::new(e.code(), "store busy; retry the operation"),
            MirrorError::InvalidKeyFormat
            | MirrorError::InvalidAlgorithm(_)
            | MirrorError::InvalidMetadata(_)
            | MirrorError::Unauthorized
            | MirrorError::TransientFetch(_)
            | MirrorError::OrderAlreadyInProgress(_)
            | MirrorError::WalletNotInitialized
            | MirrorError::CorruptRecord(_) => Self::new(e.code(), e.to_string()),
        }
    }
}

/// Find the typed cause carried by an `eyre::Report`, if any.
pub fn mirror_error(report: &eyre::Report) -> Option<&MirrorError> {
    report
        .chain()
        .find_map(|cause| cause.downcast_ref::<MirrorError>())
}

pub fn is_invalid_key(report: &eyre::Report) -> bool {
    matches!(mirror_error(report), Some(MirrorError::InvalidKey))
}

pub fn cli_error(report: &eyre::Report) -> CliError {
    mirror_error(report).map_or_else(
        || CliError::new("internal_error", format!("{report:#}")),
        |e| CliError::from(e.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::{ContextCompat as _, WrapErr as _};

    #[test]
    fn typed_cause_survives_context_wrapping() -> eyre::Result<()> {
        let r: eyre::Result<()> = Err(MirrorError::InvalidKey.into());
        let report = r
            .wrap_err("unlock wallet")
            .err()
            .context("expected an error")?;
        assert!(is_invalid_key(&report), "InvalidKey lost under context");
        assert_eq!(cli_error(&report).code, "invalid_key");
        Ok(())
    }

    #[test]
    fn wrong_password_and_corruption_have_distinct_codes() {
        let wrong = CliError::from(MirrorError::InvalidKey);
        let corrupt = CliError::from(MirrorError::CorruptRecord("credential".to_owned()));
        assert_eq!(wrong.message, "password not matched");
        assert_ne!(wrong.code, corrupt.code);
    }

    #[test]
    fn untyped_reports_map_to_internal_error() {
        let report = eyre::eyre!("disk on fire");
        assert_eq!(cli_error(&report).code, "internal_error");
        assert!(!is_invalid_key(&report));
    }
}
