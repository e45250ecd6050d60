//! Usage: Encryption capability for the credential file, plus the GnuPG-backed implementation.
//!
//! The credential file carries no marker telling whether it is encrypted; the
//! caller decides by passing (or not passing) a backend.

use crate::shared::error::AppResult;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

pub trait EncryptionBackend {
    /// Encrypt the credential JSON text for the configured recipient.
    fn encrypt(&self, plaintext: &str) -> AppResult<String>;

    fn decrypt(&self, ciphertext: &str) -> AppResult<String>;
}

/// Shells out to `gpg`, producing ASCII-armored output for one recipient.
#[derive(Debug, Clone)]
pub struct GpgBackend {
    program: PathBuf,
    recipient: String,
    home_dir: Option<PathBuf>,
}

impl GpgBackend {
    /// `recipient` is a key fingerprint or e-mail address known to the keyring.
    pub fn new(recipient: impl Into<String>, home_dir: Option<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("gpg"),
            recipient: recipient.into(),
            home_dir,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(home) = self.home_dir.as_ref() {
            cmd.arg("--homedir").arg(home);
        }
        cmd.args(["--batch", "--yes", "--quiet"]);
        cmd
    }

    fn run(&self, mut cmd: Command, input: &str, action: &str) -> AppResult<String> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                format!(
                    "SYSTEM_ERROR: failed to run {} for {action}: {e}",
                    self.program.display()
                )
            })?;

        let writer = child.stdin.take().map(|mut stdin| {
            let input = input.to_string();
            std::thread::spawn(move || stdin.write_all(input.as_bytes()))
        });

        let output = child
            .wait_with_output()
            .map_err(|e| format!("SYSTEM_ERROR: gpg {action} did not finish: {e}"))?;
        let written = writer.map(|handle| handle.join());
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "ENCRYPTION_ERROR: gpg {action} failed ({}): {}",
                output.status,
                stderr.trim().chars().take(400).collect::<String>()
            )
            .into());
        }
        match written {
            Some(Ok(Err(e))) => {
                return Err(format!("SYSTEM_ERROR: gpg {action} stdin write failed: {e}").into())
            }
            Some(Err(_)) => {
                return Err(format!("SYSTEM_ERROR: gpg {action} stdin writer panicked").into())
            }
            _ => {}
        }

        String::from_utf8(output.stdout)
            .map_err(|e| format!("ENCRYPTION_ERROR: gpg {action} produced non-utf8 output: {e}").into())
    }
}

impl EncryptionBackend for GpgBackend {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let mut cmd = self.command();
        cmd.args(["--armor", "--trust-model", "always", "--encrypt", "--recipient"])
            .arg(&self.recipient);
        tracing::debug!(recipient = %self.recipient, "encrypting credential file");
        self.run(cmd, plaintext, "encrypt")
    }

    fn decrypt(&self, ciphertext: &str) -> AppResult<String> {
        let mut cmd = self.command();
        cmd.arg("--decrypt");
        tracing::debug!("decrypting credential file");
        self.run(cmd, ciphertext, "decrypt")
    }
}
