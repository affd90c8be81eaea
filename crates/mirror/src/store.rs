use crate::{
    config::{MirrorConfig, NetworkMode, SaltPolicy},
    paths::MirrorPaths,
};
use eyre::Context as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn parse_network_mode_env(s: &str) -> Option<NetworkMode> {
    match s.trim().to_lowercase().as_str() {
        "mainnet" | "main" | "columbus" | "prod" => Some(NetworkMode::Mainnet),
        "testnet" | "test" | "tequila" | "dev" => Some(NetworkMode::Testnet),
        _ => None,
    }
}

/// Apply environment variable overrides (endpoints, secrets, poll cadence).
fn apply_env_overrides(cfg: &mut MirrorConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("MIRROR_NETWORK", |v| {
        if let Some(m) = parse_network_mode_env(v) {
            cfg.network_mode = m;
        }
    });
    apply_env("MIRROR_SWITCHAIN_API_KEY", |v| {
        cfg.switchain.api_key = Some(v.to_owned());
    });
    apply_env("MIRROR_SWITCHAIN_BASE_URL", |v| {
        v.clone_into(&mut cfg.switchain.base_url_mainnet);
        v.clone_into(&mut cfg.switchain.base_url_testnet);
    });
    apply_env("MIRROR_TRANSAK_API_SECRET", |v| {
        cfg.transak.partner_api_secret = Some(v.to_owned());
    });
    apply_env("MIRROR_MOONPAY_GRAPHQL_URL", |v| {
        cfg.moonpay.graphql_url = Some(v.to_owned());
    });
    apply_env("MIRROR_SALT_POLICY", |v| match v {
        "legacy_ascii" => cfg.kdf.salt_policy = SaltPolicy::LegacyAscii,
        "full_entropy" => cfg.kdf.salt_policy = SaltPolicy::FullEntropy,
        _ => {}
    });
    if let Ok(v) = std::env::var("MIRROR_POLL_INTERVAL_SECONDS") {
        if let Ok(n) = v.trim().parse::<u64>() {
            if n > 0 {
                cfg.poller.interval_seconds = n;
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &MirrorPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<MirrorConfig> {
        let Some(s) = crate::fsutil::read_optional(&self.path)? else {
            let mut cfg = MirrorConfig::default();
            // Env overrides (API secrets included) never reach the file.
            self.save(&cfg)?;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        };

        let mut cfg: MirrorConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &MirrorConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_atomic_private(&self.path, s.as_bytes()).context("write config.toml")
    }
}
