use assert_cmd::Command;
use eyre::{Context as _, ContextCompat as _};
use predicates::prelude::*;

const KEY: &str = "d1f2a3b4c5d6e7f80911223344556677889900aabbccddeeff00112233445566";

struct Sandbox {
    cfg_dir: tempfile::TempDir,
    data_dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> eyre::Result<Self> {
        Ok(Self {
            cfg_dir: tempfile::tempdir()?,
            data_dir: tempfile::tempdir()?,
        })
    }

    fn mirror(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mirror"));
        cmd.env("MIRROR_CONFIG_DIR", self.cfg_dir.path())
            .env("MIRROR_DATA_DIR", self.data_dir.path())
            .env_remove("RUST_LOG")
            .arg("--password-stdin")
            .args(args);
        cmd
    }

    fn json(&self, args: &[&str], stdin: &str) -> eyre::Result<serde_json::Value> {
        let out = self.mirror(args).write_stdin(stdin).output()?;
        assert!(
            out.status.success(),
            "mirror {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        serde_json::from_slice(&out.stdout).with_context(|| format!("parse output of {args:?}"))
    }

    fn create(&self, password: &str) -> eyre::Result<String> {
        let v = self.json(&["wallet", "create"], &format!("{KEY}\n{password}\n"))?;
        Ok(v.get("address")
            .and_then(serde_json::Value::as_str)
            .context("address in output")?
            .to_owned())
    }
}

#[test]
fn create_then_unlock_with_right_and_wrong_password() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let address = sb.create("000000")?;
    assert!(address.starts_with("terra1"), "{address}");

    let v = sb.json(&["wallet", "unlock", "--reveal"], "000000\n")?;
    assert_eq!(v.get("private_key").and_then(|x| x.as_str()), Some(KEY));

    sb.mirror(&["wallet", "unlock"])
        .write_stdin("111111\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid_key"))
        .stderr(predicate::str::contains("password not matched"));

    let v = sb.json(&["wallet", "check"], "111111\n")?;
    assert_eq!(v.get("matches").and_then(serde_json::Value::as_bool), Some(false));
    Ok(())
}

#[test]
fn malformed_private_key_is_rejected() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.mirror(&["wallet", "create"])
        .write_stdin("0xabc\n000000\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid_key_format"));

    let v = sb.json(&["wallet", "status"], "")?;
    assert_eq!(v.get("has_wallet").and_then(serde_json::Value::as_bool), Some(false));
    Ok(())
}

#[test]
fn typed_key_is_trimmed_before_parsing() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let v = sb.json(&["wallet", "create"], &format!("  0x{KEY}\t\n000000\n"))?;
    assert!(v.get("address").is_some_and(serde_json::Value::is_string));
    let v = sb.json(&["wallet", "unlock", "--reveal"], "000000\n")?;
    assert_eq!(v.get("private_key").and_then(|x| x.as_str()), Some(KEY));
    Ok(())
}

#[test]
fn change_password_retires_the_old_one() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.create("000000")?;

    let v = sb.json(&["wallet", "change-password"], "000000\n222222\n")?;
    assert_eq!(v.get("changed").and_then(serde_json::Value::as_bool), Some(true));

    sb.mirror(&["wallet", "unlock"])
        .write_stdin("000000\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid_key"));
    let v = sb.json(&["wallet", "unlock", "--reveal"], "222222\n")?;
    assert_eq!(v.get("private_key").and_then(|x| x.as_str()), Some(KEY));
    Ok(())
}

#[test]
fn address_before_create_reports_not_initialized() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.mirror(&["wallet", "address"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("wallet_not_initialized"));
    Ok(())
}

#[test]
fn reset_forgets_wallet_and_trackers() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.create("000000")?;
    sb.json(&["tracker", "open", "transak", "--order-id", "tk-1"], "")?;
    let state = sb.json(&["tracker", "show", "transak"], "")?;
    assert_eq!(
        state.get("watched_order_id").and_then(|x| x.as_str()),
        Some("tk-1")
    );

    sb.mirror(&["wallet", "reset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
    sb.json(&["wallet", "reset", "--yes"], "")?;

    let v = sb.json(&["wallet", "status"], "")?;
    assert_eq!(v.get("has_wallet").and_then(serde_json::Value::as_bool), Some(false));
    let state = sb.json(&["tracker", "show", "transak"], "")?;
    assert!(state.get("watched_order_id").is_some_and(serde_json::Value::is_null));
    Ok(())
}

#[test]
fn empty_ledger_commands() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    assert_eq!(sb.json(&["offers", "pending"], "")?, serde_json::json!([]));
    assert_eq!(
        sb.json(&["offers", "ack", "BTC-UST"], "")?,
        serde_json::json!({ "acknowledged": false })
    );
    assert_eq!(
        sb.json(&["offers", "prune"], "")?,
        serde_json::json!({ "pruned": 0 })
    );
    Ok(())
}

#[test]
fn paths_reports_sandbox_dirs() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let v = sb.json(&["paths"], "")?;
    let data = v
        .get("data_dir")
        .and_then(|x| x.as_str())
        .context("data_dir")?;
    assert_eq!(std::path::Path::new(data), sb.data_dir.path());
    Ok(())
}
