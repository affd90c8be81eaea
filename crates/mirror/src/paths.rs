use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MirrorPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl MirrorPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("MIRROR_DATA_DIR"),
            std::env::var("MIRROR_CONFIG_DIR"),
        ) {
            return Ok(Self::from_dirs(
                PathBuf::from(config_dir),
                PathBuf::from(data_dir),
            ));
        }

        // macOS: ~/Library/Application Support/mirror
        // Linux: ~/.config/mirror, ~/.local/share/mirror
        let proj = ProjectDirs::from("", "", "mirror").context("failed to resolve project dirs")?;
        Ok(Self::from_dirs(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("mirror.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn credential_file(&self) -> PathBuf {
        self.data_dir.join("credential.json")
    }

    pub fn credential_lock(&self) -> PathBuf {
        self.data_dir.join("credential.lock")
    }

    pub fn prefs_file(&self) -> PathBuf {
        self.data_dir.join("prefs.json")
    }

    pub fn prefs_lock(&self) -> PathBuf {
        self.data_dir.join("prefs.lock")
    }

    pub fn offers_file(&self) -> PathBuf {
        self.data_dir.join("offers.json")
    }

    pub fn offers_lock(&self) -> PathBuf {
        self.data_dir.join("offers.lock")
    }

    pub fn trackers_dir(&self) -> PathBuf {
        self.data_dir.join("trackers")
    }

    pub fn tracker_file(&self, provider: &str) -> PathBuf {
        self.trackers_dir().join(format!("{provider}.json"))
    }

    pub fn tracker_lock(&self, provider: &str) -> PathBuf {
        self.trackers_dir().join(format!("{provider}.lock"))
    }

    pub fn audit_log(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    /// Isolated layout under one directory, used by tests.
    #[cfg(test)]
    pub fn under(root: &std::path::Path) -> Self {
        Self::from_dirs(root.join("cfg"), root.join("data"))
    }
}
