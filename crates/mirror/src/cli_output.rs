//! Centralised helpers for user-facing CLI I/O. Prompts and notices go to stderr; stdout
//! carries only JSON results.

use eyre::Context as _;
use secrecy::SecretString;
use std::io::{BufRead as _, IsTerminal as _, Write as _};
use zeroize::Zeroizing;

fn stderr_write(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    let _flush = stderr.flush();
}

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

/// One JSON document per line on stdout.
pub fn print_json(v: &impl serde::Serialize) -> eyre::Result<()> {
    let s = serde_json::to_string(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")
}

/// Structured error for scripts, on stderr.
pub fn print_error(err: &mirror::errors::CliError) {
    match serde_json::to_string(&serde_json::json!({ "error": err })) {
        Ok(s) => stderr_writeln(&s),
        Err(_) => stderr_writeln(&err.message),
    }
}

/// Show a freshly generated recovery phrase to the operator. Never written to stdout.
pub fn print_mnemonic_notice(phrase: &str) {
    stderr_writeln(&format!(
        "Mirror: new wallet recovery phrase (write it down, it is shown once):\n\n  {phrase}\n"
    ));
}

/// Where secret input comes from: the terminal (no echo) or newline-separated stdin.
#[derive(Debug)]
pub enum SecretInput {
    Prompt,
    /// Locked on first read.
    Stdin(Option<std::io::Lines<std::io::StdinLock<'static>>>),
}

impl SecretInput {
    pub const fn new(from_stdin: bool) -> Self {
        if from_stdin {
            Self::Stdin(None)
        } else {
            Self::Prompt
        }
    }

    pub fn line(&mut self, prompt: &str) -> eyre::Result<Zeroizing<String>> {
        let raw = match self {
            Self::Prompt => rpassword::prompt_password(prompt).context("read from terminal")?,
            Self::Stdin(lines) => lines
                .get_or_insert_with(|| std::io::stdin().lock().lines())
                .next()
                .ok_or_else(|| eyre::eyre!("stdin closed before {}", prompt.trim()))?
                .context("read stdin")?,
        };
        let raw = Zeroizing::new(raw);
        Ok(Zeroizing::new(raw.trim_end_matches(['\r', '\n']).to_owned()))
    }

    pub fn secret(&mut self, prompt: &str) -> eyre::Result<SecretString> {
        let s = self.line(prompt)?;
        if s.is_empty() {
            eyre::bail!("{} must not be empty", prompt.trim().trim_end_matches(':'));
        }
        Ok(SecretString::new(s.as_str().into()))
    }

    /// New password. On a terminal it is asked twice.
    pub fn new_secret(&mut self, prompt: &str) -> eyre::Result<SecretString> {
        use secrecy::ExposeSecret as _;
        let first = self.secret(prompt)?;
        if matches!(self, Self::Prompt) {
            let again = self.secret("Repeat password: ")?;
            if again.expose_secret() != first.expose_secret() {
                eyre::bail!("passwords do not match");
            }
        }
        Ok(first)
    }
}

/// Prompt the user on stderr to confirm a wallet reset, or bail if non-interactive.
pub fn confirm_reset_or_bail(yes: bool) -> eyre::Result<()> {
    if yes {
        return Ok(());
    }
    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    if !interactive {
        eyre::bail!("refusing to reset non-interactively; pass --yes");
    }

    stderr_writeln("Mirror reset deletes the wallet credential, pending orders and settings.");
    stderr_write("Continue? [y/N] ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| eyre::eyre!("read confirmation: {e}"))?;
    let ans = line.trim().to_ascii_lowercase();
    if ans == "y" || ans == "yes" {
        Ok(())
    } else {
        eyre::bail!("reset cancelled")
    }
}
