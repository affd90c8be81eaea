use crate::paths::MirrorPaths;
use eyre::Context as _;
use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use std::{fs::File, path::PathBuf};

/// Per-device preferences derived from the wallet. Cleared together with the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub use_biometrics: bool,
    /// Re-prompt for the password after this many idle seconds. `None` means never.
    pub password_lock_seconds: Option<u64>,
    pub skip_onboarding: bool,
    pub hide_balance: bool,
    pub favorites: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PrefsStore {
    path: PathBuf,
    lock_path: PathBuf,
}

struct PrefsLock(File);

impl Drop for PrefsLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.0) {
            tracing::debug!(error = %e, "prefs unlock failed");
        }
    }
}

impl PrefsStore {
    pub fn new(paths: &MirrorPaths) -> Self {
        Self {
            path: paths.prefs_file(),
            lock_path: paths.prefs_lock(),
        }
    }

    fn lock(&self) -> eyre::Result<PrefsLock> {
        let f = crate::fsutil::open_lock_file(&self.lock_path)?;
        f.lock_exclusive().context("lock prefs")?;
        Ok(PrefsLock(f))
    }

    pub fn load(&self) -> eyre::Result<Preferences> {
        Ok(crate::fsutil::load_json(&self.path, "prefs")?.unwrap_or_default())
    }

    pub fn save(&self, prefs: &Preferences) -> eyre::Result<()> {
        crate::fsutil::save_json(&self.path, prefs, "prefs")
    }

    /// Read-modify-write under the prefs file lock.
    pub fn update(&self, f: impl FnOnce(&mut Preferences)) -> eyre::Result<Preferences> {
        let _lock = self.lock()?;
        let mut p = self.load()?;
        f(&mut p);
        self.save(&p)?;
        Ok(p)
    }

    pub fn clear(&self) -> eyre::Result<()> {
        let _lock = self.lock()?;
        crate::fsutil::remove_if_exists(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_persists_and_clear_restores_defaults() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let store = PrefsStore::new(&MirrorPaths::under(td.path()));
        assert_eq!(store.load()?, Preferences::default());

        store.update(|p| {
            p.hide_balance = true;
            p.favorites.push("uluna".to_owned());
        })?;
        let got = store.load()?;
        assert!(got.hide_balance);
        assert_eq!(got.favorites, vec!["uluna".to_owned()]);

        store.clear()?;
        assert_eq!(store.load()?, Preferences::default());
        Ok(())
    }

    #[test]
    fn concurrent_updates_are_not_lost() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = MirrorPaths::under(td.path());
        let workers: Vec<_> = (0_u8..8)
            .map(|i| {
                // Separate stores, as separate processes would have.
                let store = PrefsStore::new(&paths);
                std::thread::spawn(move || store.update(|p| p.favorites.push(format!("denom{i}"))))
            })
            .collect();
        for w in workers {
            w.join().map_err(|_e| eyre::eyre!("writer thread panicked"))??;
        }
        let got = PrefsStore::new(&paths).load()?.favorites;
        assert_eq!(got.len(), 8, "{got:?}");
        Ok(())
    }
}
