pub mod crypto;
pub mod kdf;

use crate::{
    audit::AuditLog,
    biometric::BiometricGate,
    config::{KdfConfig, MirrorConfig},
    errors::MirrorError,
    ledger::OfferLedger,
    paths::MirrorPaths,
    prefs::PrefsStore,
    wallet::{self, WalletCredential, CREDENTIAL_VERSION},
};
use eyre::Context as _;
use fs2::FileExt as _;
use secrecy::SecretString;
use serde_json::json;
use std::{fs::File, sync::Arc};
use zeroize::Zeroizing;

use self::{crypto::EncryptedBlob, kdf::KdfEngine};

/// Exclusive advisory lock on the credential record, released on drop.
struct WriteLock(File);

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.0) {
            tracing::debug!(error = %e, "credential unlock failed");
        }
    }
}

/// Owner of the single wallet credential: address plus password-encrypted private key.
///
/// All methods are blocking (KDF work included). Async callers go through
/// [`CredentialStore::offload`].
#[derive(Clone)]
pub struct CredentialStore {
    paths: MirrorPaths,
    kdf: KdfConfig,
    engine: KdfEngine,
    address_hrp: String,
    prefs: PrefsStore,
    audit: AuditLog,
    biometrics: Arc<dyn BiometricGate>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("paths", &self.paths)
            .field("kdf", &self.kdf)
            .field("address_hrp", &self.address_hrp)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn open(
        paths: MirrorPaths,
        cfg: &MirrorConfig,
        biometrics: Arc<dyn BiometricGate>,
    ) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        Ok(Self {
            prefs: PrefsStore::new(&paths),
            audit: AuditLog::new(&paths),
            engine: KdfEngine::new(cfg.kdf.argon2),
            kdf: cfg.kdf.clone(),
            address_hrp: cfg.wallet.address_hrp.clone(),
            paths,
            biometrics,
        })
    }

    pub const fn prefs(&self) -> &PrefsStore {
        &self.prefs
    }

    /// Fail fast when another process holds the lock instead of queueing behind it.
    fn acquire_write_lock(&self) -> eyre::Result<WriteLock> {
        let f = crate::fsutil::open_lock_file(&self.paths.credential_lock())?;
        match f.try_lock_exclusive() {
            Ok(()) => Ok(WriteLock(f)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(MirrorError::StoreBusy.into())
            }
            Err(e) => Err(eyre::Report::new(e).wrap_err("lock credential")),
        }
    }

    fn load_credential(&self) -> eyre::Result<Option<WalletCredential>> {
        let cred: Option<WalletCredential> =
            crate::fsutil::load_json(&self.paths.credential_file(), "credential")?;
        if let Some(c) = &cred {
            if c.version > CREDENTIAL_VERSION {
                return Err(MirrorError::CorruptRecord(format!(
                    "credential version {} is newer than supported",
                    c.version
                ))
                .into());
            }
        }
        Ok(cred)
    }

    fn require_credential(&self) -> eyre::Result<WalletCredential> {
        self.load_credential()?
            .ok_or_else(|| MirrorError::WalletNotInitialized.into())
    }

    pub fn has_wallet(&self) -> eyre::Result<bool> {
        Ok(self
            .load_credential()?
            .is_some_and(|c| !c.address.is_empty()))
    }

    pub fn address(&self) -> eyre::Result<String> {
        Ok(self.require_credential()?.address)
    }

    /// Encrypt `key` under `password` and replace the stored credential. Caller holds the lock.
    fn write_key(&self, key: &[u8; 32], password: &SecretString) -> eyre::Result<String> {
        let address = wallet::address_from_private_key(key, &self.address_hrp)?;
        let plaintext = Zeroizing::new(hex::encode(key));
        let encrypted_key = crypto::encrypt(password, plaintext.as_bytes(), &self.kdf)?;
        let cred = WalletCredential {
            version: CREDENTIAL_VERSION,
            address: address.clone(),
            encrypted_key,
        };
        crate::fsutil::save_json(&self.paths.credential_file(), &cred, "credential")?;
        Ok(address)
    }

    fn open_blob(
        &self,
        blob: &EncryptedBlob,
        password: &SecretString,
    ) -> eyre::Result<Zeroizing<[u8; 32]>> {
        let plaintext = crypto::decrypt(&self.engine, password, blob)?;
        let s = std::str::from_utf8(&plaintext)
            .map_err(|e| MirrorError::CorruptRecord(format!("private key is not text: {e}")))?;
        let Ok(key) = wallet::parse_private_key_hex(s) else {
            return Err(
                MirrorError::CorruptRecord("stored private key is malformed".to_owned()).into(),
            );
        };
        Ok(key)
    }

    /// Store a new wallet, replacing any existing one. Returns the derived address.
    pub fn create(&self, private_key_hex: &str, password: &SecretString) -> eyre::Result<String> {
        let key = wallet::parse_private_key_hex(private_key_hex)?;
        let _lock = self.acquire_write_lock()?;
        let address = self.write_key(&key, password)?;
        tracing::info!(%address, "wallet credential stored");
        self.audit
            .record(json!({ "event": "create", "address": address, "result": "ok" }));
        Ok(address)
    }

    /// Recover a wallet from a BIP39 phrase and store it like [`CredentialStore::create`].
    pub fn recover(
        &self,
        phrase: &str,
        coin_type: u32,
        password: &SecretString,
    ) -> eyre::Result<String> {
        let key = wallet::private_key_from_mnemonic(phrase, coin_type)?;
        let key_hex = Zeroizing::new(hex::encode(key.as_slice()));
        self.create(&key_hex, password)
    }

    pub fn unlock(&self, password: &SecretString) -> eyre::Result<SecretString> {
        let cred = self.require_credential()?;
        match self.open_blob(&cred.encrypted_key, password) {
            Ok(key) => Ok(SecretString::new(hex::encode(key.as_slice()).into())),
            Err(e) => {
                let code = crate::errors::mirror_error(&e).map(MirrorError::code);
                self.audit.record(json!({
                    "event": "unlock",
                    "address": cred.address,
                    "result": "error",
                    "error_code": code,
                }));
                Err(e)
            }
        }
    }

    /// Lend the raw key to `f` for one call. The bytes are wiped when `f` returns.
    pub fn with_private_key<T>(
        &self,
        password: &SecretString,
        f: impl FnOnce(&[u8; 32]) -> T,
    ) -> eyre::Result<T> {
        let cred = self.require_credential()?;
        let key = self.open_blob(&cred.encrypted_key, password)?;
        Ok(f(&key))
    }

    /// `false` only for a wrong password. Corruption and unknown algorithms still fail.
    pub fn check_password(&self, password: &SecretString) -> eyre::Result<bool> {
        let cred = self.require_credential()?;
        match self.open_blob(&cred.encrypted_key, password) {
            Ok(_) => Ok(true),
            Err(e) if crate::errors::is_invalid_key(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Re-encrypt the stored key under `new`. Biometric unlock, when enabled, is re-armed with
    /// the new password once the new blob is on disk; if the rewrite fails the old entry and
    /// the old blob stay paired.
    pub fn change_password(&self, old: &SecretString, new: &SecretString) -> eyre::Result<()> {
        let _lock = self.acquire_write_lock()?;
        let cred = self.require_credential()?;
        let key = self.open_blob(&cred.encrypted_key, old)?;

        let bio = self.prefs.load()?.use_biometrics;
        self.write_key(&key, new)?;
        if bio {
            self.biometrics.clear()?;
            if let Err(e) = self.biometrics.store(new, "Confirm to keep biometric unlock") {
                tracing::warn!(error = %e, "biometric re-enable failed after password change");
                self.prefs.update(|p| p.use_biometrics = false)?;
            }
        }

        tracing::info!(address = %cred.address, "wallet password changed");
        self.audit.record(
            json!({ "event": "change_password", "address": cred.address, "result": "ok" }),
        );
        Ok(())
    }

    /// Re-encrypt under the configured default KDF when the stored blob uses anything else.
    /// Returns whether a rewrite happened.
    pub fn migrate_kdf(&self, password: &SecretString) -> eyre::Result<bool> {
        let _lock = self.acquire_write_lock()?;
        let cred = self.require_credential()?;
        let key = self.open_blob(&cred.encrypted_key, password)?;

        let (current, _) = self.engine.resolve(&cred.encrypted_key.meta)?;
        let wanted = match self.kdf.default {
            crate::config::KdfKind::Scrypt => kdf::KdfSpec::Scrypt(self.kdf.scrypt),
            crate::config::KdfKind::Argon2 => kdf::KdfSpec::Argon2(self.kdf.argon2),
        };
        let up_to_date = current == wanted
            && cred.encrypted_key.meta.version == crypto::METADATA_VERSION
            && cred.version == CREDENTIAL_VERSION;
        if up_to_date {
            return Ok(false);
        }

        self.write_key(&key, password)?;
        tracing::info!(from = current.tag(), to = wanted.tag(), "credential kdf migrated");
        self.audit.record(json!({
            "event": "migrate_kdf",
            "address": cred.address,
            "result": "ok",
        }));
        Ok(true)
    }

    /// Turn biometric unlock on (after verifying `password`) or off.
    pub fn set_biometrics(
        &self,
        password: &SecretString,
        enabled: bool,
        prompt: &str,
    ) -> eyre::Result<()> {
        if enabled {
            if !self.biometrics.is_available() {
                return Err(MirrorError::Unauthorized).wrap_err("no biometric hardware");
            }
            if !self.check_password(password)? {
                return Err(MirrorError::InvalidKey.into());
            }
            self.biometrics.store(password, prompt)?;
        } else {
            self.biometrics.clear()?;
        }
        self.prefs.update(|p| p.use_biometrics = enabled)?;
        Ok(())
    }

    /// Fetch the password behind the biometric prompt and confirm it still opens the wallet.
    pub fn load_biometric_password(&self, prompt: &str) -> eyre::Result<SecretString> {
        if !self.prefs.load()?.use_biometrics {
            return Err(MirrorError::Unauthorized.into());
        }
        let password = self.biometrics.retrieve(prompt)?;
        if !self.check_password(&password)? {
            return Err(MirrorError::InvalidKey).wrap_err("stored biometric password is stale");
        }
        Ok(password)
    }

    /// Forget the wallet: credential, preferences, order ledger, trackers, biometric entry.
    /// The credential goes first so a partial failure never leaves a usable wallet behind.
    pub fn reset(&self) -> eyre::Result<()> {
        let _lock = self.acquire_write_lock()?;
        let address = self.load_credential().ok().flatten().map(|c| c.address);

        crate::fsutil::remove_if_exists(&self.paths.credential_file())?;
        self.prefs.clear()?;
        OfferLedger::open(&self.paths).clear()?;
        crate::tracker::clear_all(&self.paths)?;
        self.biometrics.clear()?;

        tracing::info!("wallet reset");
        self.audit
            .record(json!({ "event": "reset", "address": address, "result": "ok" }));
        Ok(())
    }

    /// Run blocking credential work off the async executor.
    pub async fn offload<T, F>(&self, f: F) -> eyre::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> eyre::Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .context("credential task panicked")?
    }
}

/// Password wrapper for callers holding a plain `String`.
pub fn secret(s: impl Into<String>) -> SecretString {
    SecretString::new(s.into().into())
}
