//! Usage: Deliver the authorization URL to the user (system browser or printed prompt).

use crate::shared::error::AppResult;
use std::io::Write;
use std::process::{Command, Stdio};

/// Fire-and-forget navigation to the authorization URL.
///
/// Called after the redirect listener is bound, so an implementation may
/// complete the redirect immediately.
pub trait UserAgent {
    fn navigate(&self, url: &str) -> AppResult<()>;
}

/// Opens the URL with the platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn navigate(&self, url: &str) -> AppResult<()> {
        let mut cmd = open_browser_command(url)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        tracing::debug!("browser launched for authorization url");
        Ok(())
    }
}

/// Prints the URL on stderr; stdout is reserved for the token.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintUrl;

impl UserAgent for PrintUrl {
    fn navigate(&self, url: &str) -> AppResult<()> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "Please navigate to this url: {url}")
            .and_then(|_| stderr.flush())
            .map_err(|e| format!("SYSTEM_ERROR: failed to print authorization url: {e}").into())
    }
}

#[allow(unreachable_code)]
fn open_browser_command(url: &str) -> AppResult<Command> {
    #[cfg(target_os = "windows")]
    {
        let mut cmd = Command::new("rundll32.exe");
        // The URL protocol handler always picks the default browser.
        cmd.arg("url.dll,FileProtocolHandler").arg(url);
        return Ok(cmd);
    }

    #[cfg(target_os = "macos")]
    {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        return Ok(cmd);
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        return Ok(cmd);
    }

    Err("SYSTEM_ERROR: browser open is unsupported on this platform"
        .to_string()
        .into())
}
