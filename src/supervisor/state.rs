//! Files owned by the supervisor: PID file, backend log and persisted backend configuration.

use crate::errors::SupervisorError;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const PID_FILE: &str = "backend.pid";
const LOG_FILE: &str = "backend.log";
const CONFIG_FILE: &str = "backend.json";

/// Only the end of the log is read when tailing.
const TAIL_WINDOW: u64 = 64 * 1024;

/// Persisted backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub auto_start: bool,
    pub log_level: String,
}

/// Partial update of [`BackendConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_start: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl BackendConfig {
    /// Apply a patch, rejecting values the backend could not be started with.
    pub fn apply(&self, patch: BackendConfigPatch) -> Result<BackendConfig, SupervisorError> {
        let updated = BackendConfig {
            host: patch.host.unwrap_or_else(|| self.host.clone()),
            port: patch.port.unwrap_or(self.port),
            auto_start: patch.auto_start.unwrap_or(self.auto_start),
            log_level: patch.log_level.unwrap_or_else(|| self.log_level.clone()),
        };

        if updated.host.is_empty() || updated.host.contains(char::is_whitespace) {
            return Err(SupervisorError::InvalidConfig(format!(
                "invalid host '{}'",
                updated.host
            )));
        }
        if updated.port == 0 {
            return Err(SupervisorError::InvalidConfig(
                "port must not be 0".to_string(),
            ));
        }
        if updated.log_level.is_empty() || updated.log_level.contains(char::is_whitespace) {
            return Err(SupervisorError::InvalidConfig(format!(
                "invalid log level '{}'",
                updated.log_level
            )));
        }
        Ok(updated)
    }
}

/// Paths inside the supervisor state directory
#[derive(Debug, Clone)]
pub struct StateFiles {
    dir: PathBuf,
}

impl StateFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub async fn ensure_dir(&self) -> Result<(), SupervisorError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| state_error(&self.dir, e))
    }

    /// Tracked PID, if any. A PID file with unreadable content is discarded.
    pub async fn read_pid(&self) -> Result<Option<u32>, SupervisorError> {
        let path = self.pid_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(state_error(&path, e)),
        };

        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 1 => Ok(Some(pid)),
            _ => {
                tracing::warn!(path = %path.display(), "discarding malformed pid file");
                self.clear_pid().await?;
                Ok(None)
            }
        }
    }

    pub async fn write_pid(&self, pid: u32) -> Result<(), SupervisorError> {
        self.ensure_dir().await?;
        let path = self.pid_path();
        tokio::fs::write(&path, format!("{}\n", pid))
            .await
            .map_err(|e| state_error(&path, e))
    }

    pub async fn clear_pid(&self) -> Result<(), SupervisorError> {
        let path = self.pid_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(state_error(&path, e)),
        }
    }

    pub async fn read_config(&self) -> Result<Option<BackendConfig>, SupervisorError> {
        let path = self.config_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(state_error(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| state_error(&path, e))
    }

    /// Write the config through a temporary file so readers never see a partial document.
    pub async fn write_config(&self, config: &BackendConfig) -> Result<(), SupervisorError> {
        self.ensure_dir().await?;
        let path = self.config_path();
        let tmp = self.dir.join(format!("{}.tmp", CONFIG_FILE));
        let content = serde_json::to_string_pretty(config).map_err(|e| state_error(&path, e))?;
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| state_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| state_error(&path, e))
    }

    /// Open the backend log for appending; the handle is given to the child as stdout/stderr.
    pub fn open_log(&self) -> Result<std::fs::File, SupervisorError> {
        let path = self.log_path();
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| state_error(&path, e))
    }

    /// Last `lines` lines of the backend log. A missing log is empty.
    pub async fn log_tail(&self, lines: usize) -> Result<String, SupervisorError> {
        let path = self.log_path();
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(state_error(&path, e)),
        };

        let len = file
            .metadata()
            .await
            .map_err(|e| state_error(&path, e))?
            .len();
        let start = len.saturating_sub(TAIL_WINDOW);
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| state_error(&path, e))?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .await
            .map_err(|e| state_error(&path, e))?;

        Ok(last_lines(&String::from_utf8_lossy(&buffer), lines))
    }
}

fn last_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(lines);
    all[skip..].join("\n")
}

fn state_error(path: &Path, err: impl std::fmt::Display) -> SupervisorError {
    SupervisorError::StateFile(path.display().to_string(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            auto_start: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_apply_patch() {
        let updated = config()
            .apply(BackendConfigPatch {
                port: Some(9100),
                auto_start: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.port, 9100);
        assert!(updated.auto_start);
        assert_eq!(updated.host, "127.0.0.1");

        assert!(
            config()
                .apply(BackendConfigPatch {
                    port: Some(0),
                    ..Default::default()
                })
                .is_err()
        );
        assert!(
            config()
                .apply(BackendConfigPatch {
                    log_level: Some("very loud".to_string()),
                    ..Default::default()
                })
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path().join("state"));

        assert_eq!(files.read_pid().await.unwrap(), None);
        files.write_pid(4242).await.unwrap();
        assert_eq!(files.read_pid().await.unwrap(), Some(4242));
        files.clear_pid().await.unwrap();
        files.clear_pid().await.unwrap();
        assert_eq!(files.read_pid().await.unwrap(), None);

        tokio::fs::write(files.pid_path(), "garbage").await.unwrap();
        assert_eq!(files.read_pid().await.unwrap(), None);
        assert!(!files.pid_path().exists());
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path());

        assert!(files.read_config().await.unwrap().is_none());
        files.write_config(&config()).await.unwrap();
        assert_eq!(files.read_config().await.unwrap(), Some(config()));
    }

    #[tokio::test]
    async fn test_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path());
        assert_eq!(files.log_tail(5).await.unwrap(), "");

        let content: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        tokio::fs::write(files.log_path(), content).await.unwrap();
        assert_eq!(files.log_tail(2).await.unwrap(), "line 9\nline 10");
        assert_eq!(files.log_tail(100).await.unwrap().lines().count(), 10);
    }
}
