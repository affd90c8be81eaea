//! Boundary to the OS-backed biometric secret store.
//!
//! The gate only remembers the wallet password behind a prompt. It never sees the private key
//! or the derived symmetric key.

use crate::errors::MirrorError;
use secrecy::{ExposeSecret as _, SecretString};
use std::sync::{Arc, Mutex};

pub trait BiometricGate: Send + Sync {
    /// Remember `password` behind a biometric prompt, replacing any previous entry.
    fn store(&self, password: &SecretString, prompt: &str) -> eyre::Result<()>;

    /// Fails with [`MirrorError::Unauthorized`] when the prompt is declined, fails, or no
    /// password is stored.
    fn retrieve(&self, prompt: &str) -> eyre::Result<SecretString>;

    fn clear(&self) -> eyre::Result<()>;

    /// Whether the device can show a biometric prompt at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Devices without biometric hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiometrics;

impl BiometricGate for NoBiometrics {
    fn store(&self, _password: &SecretString, _prompt: &str) -> eyre::Result<()> {
        Err(MirrorError::Unauthorized.into())
    }

    fn retrieve(&self, _prompt: &str) -> eyre::Result<SecretString> {
        Err(MirrorError::Unauthorized.into())
    }

    fn clear(&self) -> eyre::Result<()> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct MemoryState {
    password: Option<SecretString>,
    decline: bool,
}

/// Process-local gate for embedders without an OS keychain binding, and for tests, which can
/// make the next prompts fail with [`MemoryBiometrics::set_declining`].
#[derive(Clone, Default)]
pub struct MemoryBiometrics {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryBiometrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBiometrics").finish_non_exhaustive()
    }
}

impl MemoryBiometrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_declining(&self, decline: bool) -> eyre::Result<()> {
        self.state
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .decline = decline;
        Ok(())
    }

    pub fn has_entry(&self) -> eyre::Result<bool> {
        Ok(self
            .state
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .password
            .is_some())
    }
}

impl BiometricGate for MemoryBiometrics {
    fn store(&self, password: &SecretString, prompt: &str) -> eyre::Result<()> {
        let mut st = self
            .state
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        if st.decline {
            tracing::debug!(prompt, "biometric store declined");
            return Err(MirrorError::Unauthorized.into());
        }
        st.password = Some(SecretString::new(
            password.expose_secret().to_owned().into(),
        ));
        Ok(())
    }

    fn retrieve(&self, prompt: &str) -> eyre::Result<SecretString> {
        let st = self
            .state
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        if st.decline {
            tracing::debug!(prompt, "biometric retrieve declined");
            return Err(MirrorError::Unauthorized.into());
        }
        st.password
            .as_ref()
            .map(|p| SecretString::new(p.expose_secret().to_owned().into()))
            .ok_or_else(|| MirrorError::Unauthorized.into())
    }

    fn clear(&self) -> eyre::Result<()> {
        self.state
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .password = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    #[test]
    fn declined_prompt_is_unauthorized() -> eyre::Result<()> {
        let gate = MemoryBiometrics::new();
        gate.store(&SecretString::new("000000".to_owned().into()), "enable")?;
        gate.set_declining(true)?;
        let err = gate.retrieve("unlock").err().context("declined")?;
        assert!(matches!(
            crate::errors::mirror_error(&err),
            Some(MirrorError::Unauthorized)
        ));

        gate.set_declining(false)?;
        assert_eq!(gate.retrieve("unlock")?.expose_secret(), "000000");
        gate.clear()?;
        assert!(!gate.has_entry()?);
        assert!(gate.retrieve("unlock").is_err());
        Ok(())
    }

    #[test]
    fn no_biometrics_never_stores() {
        let gate = NoBiometrics;
        assert!(!gate.is_available());
        assert!(gate
            .store(&SecretString::new("x".to_owned().into()), "p")
            .is_err());
        assert!(gate.clear().is_ok());
    }
}
