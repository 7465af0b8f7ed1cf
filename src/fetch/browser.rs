use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{BrowserProfile, FetchMethod, FetchTier};
use crate::config::FetchSettings;
use crate::error::TierError;

/// Last resort: an external headless-browser helper run as
/// `<command> <helper> <url>` that prints the rendered page to stdout.
pub struct BrowserTier {
    command: String,
    helper: Option<PathBuf>,
    timeout: Duration,
}

impl BrowserTier {
    pub fn new(command: impl Into<String>, helper: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            helper,
            timeout,
        }
    }

    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self::new(
            settings.browser_command.clone(),
            settings.browser_helper.clone(),
            settings.browser_timeout(),
        )
    }
}

#[async_trait]
impl FetchTier for BrowserTier {
    fn method(&self) -> FetchMethod {
        FetchMethod::ScriptedBrowser
    }

    fn is_available(&self) -> bool {
        self.helper.as_deref().is_some_and(|p| p.is_file())
    }

    async fn attempt(&self, url: &str, _profile: &BrowserProfile) -> Result<String, TierError> {
        let mut cmd = Command::new(&self.command);
        if let Some(helper) = &self.helper {
            cmd.arg(helper);
        }
        cmd.arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TierError::Timeout(self.timeout))?
            .map_err(TierError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TierError::Exit {
                code: output.status.code(),
                stderr: if stderr.is_empty() {
                    "Empty response".to_string()
                } else {
                    stderr
                },
            });
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            return Err(TierError::EmptyBody);
        }
        Ok(html)
    }
}
