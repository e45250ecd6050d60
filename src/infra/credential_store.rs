//! Usage: Load/save the credential file, optionally through an encryption backend.

use crate::domain::credentials::CredentialFile;
use crate::infra::encryption::EncryptionBackend;
use crate::shared::error::{AppResult, ConfigError};
use std::path::Path;

fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create dir {}: {e}", parent.display()))?;
        }
    }

    let file_name = path.file_name().and_then(|v| v.to_str()).unwrap_or("credentials");
    let tmp_path = path.with_file_name(format!("{file_name}.oauth2ms-tmp"));

    write_private(&tmp_path, bytes)
        .map_err(|e| format!("failed to write temp file {}: {e}", tmp_path.display()))?;

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(format!("failed to finalize file {}: {err}", path.display()));
    }

    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

/// Read the credential record at `path`.
///
/// `Ok(None)` means "run the interactive flow": the file is absent or holds no token cache.
pub fn load(
    path: &Path,
    encryption: Option<&dyn EncryptionBackend>,
) -> AppResult<Option<CredentialFile>> {
    let raw = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no credential file");
            return Ok(None);
        }
        Err(err) => {
            return Err(format!(
                "SYSTEM_ERROR: failed to read credential file {}: {err}",
                path.display()
            )
            .into())
        }
    };

    let text = String::from_utf8(raw).map_err(|e| ConfigError::Malformed {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;

    let text = match encryption {
        Some(backend) => backend.decrypt(&text).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?,
        None => text,
    };

    Ok(CredentialFile::parse(&text, path)?)
}

/// Replace the credential file atomically. On unix the file is created `0600`.
pub fn save(
    path: &Path,
    record: &CredentialFile,
    encryption: Option<&dyn EncryptionBackend>,
) -> AppResult<()> {
    let text = record
        .to_json_string()
        .map_err(|e| format!("SYSTEM_ERROR: failed to serialize credentials: {e}"))?;
    let text = match encryption {
        Some(backend) => backend.encrypt(&text)?,
        None => text,
    };

    write_file_atomic(path, text.as_bytes())
        .map_err(|e| format!("SYSTEM_ERROR: failed to save credentials: {e}"))?;
    tracing::info!(
        path = %path.display(),
        encrypted = encryption.is_some(),
        "credential file saved"
    );
    Ok(())
}
