use eyre::Context as _;
use rand::Rng as _;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

use crate::errors::MirrorError;

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if dir.exists() {
        if is_symlink(dir)? {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        if !fs::metadata(dir)
            .with_context(|| format!("stat {}", dir.display()))?
            .is_dir()
        {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    // Clamp group/other bits on Unix.
    #[cfg(unix)]
    {
        let mode = fs::metadata(dir)
            .with_context(|| format!("stat {}", dir.display()))?
            .permissions()
            .mode();
        if (mode & 0o077) != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {MODE_DIR_PRIVATE:o} {}", dir.display()))?;
        }
    }

    Ok(())
}

fn private_open_options() -> OpenOptions {
    let mut oo = OpenOptions::new();
    #[cfg(unix)]
    {
        oo.mode(MODE_FILE_PRIVATE);
    }
    oo
}

fn tmp_path_for(parent: &Path, final_name: &Path) -> PathBuf {
    let base = final_name
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let mut rand_bytes = [0_u8; 8];
    rand::rng().fill_bytes(&mut rand_bytes);
    parent.join(format!(".{base}.tmp.{}", hex::encode(rand_bytes)))
}

/// Replace `path` with `bytes` through a fsynced temp file and a rename.
pub fn write_atomic_private(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;

    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = tmp_path_for(parent, path);
    let mut f = private_open_options()
        .create_new(true)
        .write(true)
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    drop(f);

    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Read a file that may legitimately be absent. Missing is `Ok(None)`, any other
/// failure is an error.
pub fn read_optional(path: &Path) -> eyre::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("read {}", path.display()))),
    }
}

/// Load a JSON record. Unparseable content is reported as `CorruptRecord` so callers can
/// tell it apart from a missing record.
pub fn load_json<T: DeserializeOwned>(path: &Path, label: &str) -> eyre::Result<Option<T>> {
    let Some(s) = read_optional(path)? else {
        return Ok(None);
    };
    if s.trim().is_empty() {
        return Ok(None);
    }
    let v = serde_json::from_str(&s)
        .map_err(|e| MirrorError::CorruptRecord(format!("{label}: {e}")))?;
    Ok(Some(v))
}

pub fn save_json<T: Serialize>(path: &Path, value: &T, label: &str) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(value).with_context(|| format!("serialize {label}"))?;
    write_atomic_private(path, s.as_bytes()).with_context(|| format!("write {label}"))
}

pub fn remove_if_exists(path: &Path) -> eyre::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("remove {}", path.display()))),
    }
}

pub fn open_lock_file(path: &Path) -> eyre::Result<File> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    private_open_options()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

pub fn append_line_private(path: &Path, line: &str) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let mut f = private_open_options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(f, "{line}").with_context(|| format!("append {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn missing_record_is_none_and_garbage_is_corrupt() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let p = td.path().join("sub").join("x.json");
        assert_eq!(load_json::<Sample>(&p, "sample")?, None);

        write_atomic_private(&p, b"{not json")?;
        let err = load_json::<Sample>(&p, "sample")
            .err()
            .ok_or_else(|| eyre::eyre!("garbage must not parse"))?;
        assert!(matches!(
            crate::errors::mirror_error(&err),
            Some(MirrorError::CorruptRecord(_))
        ));
        Ok(())
    }

    #[test]
    fn save_then_load_replaces_atomically() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let p = td.path().join("x.json");
        save_json(&p, &Sample { n: 1 }, "sample")?;
        save_json(&p, &Sample { n: 2 }, "sample")?;
        assert_eq!(load_json::<Sample>(&p, "sample")?, Some(Sample { n: 2 }));

        let leftovers = fs::read_dir(td.path())?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
        remove_if_exists(&p)?;
        remove_if_exists(&p)?;
        assert!(!p.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_private() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let p = td.path().join("secret.json");
        write_atomic_private(&p, b"{}")?;
        let mode = fs::metadata(&p)?.permissions().mode() & 0o777;
        assert_eq!(mode, MODE_FILE_PRIVATE);
        Ok(())
    }
}
