//! Daemon lifecycle management
//!
//! The daemon is the long-running process that hosts the wake scheduler.
//! `DaemonManager` handles:
//! - PID file management (`<data_dir>/somnus.pid`)
//! - Detection of an already-running daemon, including stale PID files
//! - SIGTERM / Ctrl-C handling and graceful shutdown
//! - `stop` and `status` from a separate CLI process
//!
//! # Examples
//!
//! ```no_run
//! use somnus_engine::config::Config;
//! use somnus_engine::daemon::DaemonManager;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! let status = DaemonManager::status(&config)?;
//! println!("Daemon running: {}", status.is_running);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::Config;
use crate::db::Database;
use crate::scheduler::Scheduler;
use sdk::errors::EngineError;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Daemon status information
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,

    /// Process ID if running
    pub pid: Option<u32>,

    pub pid_file: PathBuf,

    /// Configured language-model backend
    pub provider: String,

    /// Seconds between wake-check scans
    pub scan_interval_secs: u64,
}

/// Owns the PID file and shutdown flag of the daemon process.
///
/// # Graceful Shutdown
///
/// On SIGTERM (sent by `somnus stop`) or Ctrl-C:
/// 1. The shutdown flag is set and the scheduler stops scanning
/// 2. In-flight runs get up to 30 seconds to finish
/// 3. The SQLite WAL is flushed
/// 4. The PID file is removed
pub struct DaemonManager {
    pid_file: PathBuf,
    shutdown_flag: Arc<AtomicBool>,
}

impl DaemonManager {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            pid_file: Self::get_pid_file_path(config),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Claim the PID file and install signal handlers.
    ///
    /// Fails with `DaemonAlreadyRunning` if another live process holds the
    /// PID file.
    pub fn start(&self) -> Result<()> {
        if self.is_daemon_running()? {
            return Err(EngineError::DaemonAlreadyRunning);
        }

        self.write_pid_file()?;

        let _signal_handle = Self::setup_signal_handler(Arc::clone(&self.shutdown_flag));
        tracing::info!("Shutdown signal handler installed");

        Ok(())
    }

    /// Run the scheduler until shutdown, then clean up.
    pub async fn serve(&self, scheduler: Arc<Scheduler>, database: &Database) -> Result<()> {
        Arc::clone(&scheduler)
            .run_until(Arc::clone(&self.shutdown_flag))
            .await;

        self.graceful_shutdown(database).await
    }

    /// Send SIGTERM to the running daemon and wait for it to exit
    pub async fn stop(config: &Config) -> Result<()> {
        let pid_file = Self::get_pid_file_path(config);
        let pid = Self::read_pid_file(&pid_file)?;

        if !Self::is_process_running(pid) {
            tracing::info!("Daemon process {} is not running, removing stale PID file", pid);
            fs::remove_file(&pid_file).map_err(EngineError::Io)?;
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            tracing::info!("Sending SIGTERM to daemon process {}", pid);
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
                EngineError::Io(std::io::Error::other(format!(
                    "Failed to send SIGTERM: {}",
                    e
                )))
            })?;
        }

        #[cfg(not(unix))]
        {
            return Err(EngineError::Config(
                "Daemon stop is only supported on Unix".to_string(),
            ));
        }

        #[cfg(unix)]
        {
            tracing::info!("Waiting for daemon to shut down gracefully");
            let wait_result = timeout(Duration::from_secs(35), async {
                while Self::is_process_running(pid) {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await;

            if wait_result.is_err() {
                tracing::warn!("Daemon did not stop within 35 seconds");
            } else {
                tracing::info!("Daemon stopped successfully");
            }

            if pid_file.exists() {
                fs::remove_file(&pid_file).map_err(EngineError::Io)?;
            }

            Ok(())
        }
    }

    pub fn status(config: &Config) -> Result<DaemonStatus> {
        let pid_file = Self::get_pid_file_path(config);

        let pid = Self::read_pid_file(&pid_file)
            .ok()
            .filter(|&pid| Self::is_process_running(pid));

        Ok(DaemonStatus {
            is_running: pid.is_some(),
            pid,
            pid_file,
            provider: config.llm.default_provider.clone(),
            scan_interval_secs: config.scheduler.scan_interval_secs,
        })
    }

    /// Set the shutdown flag; the scheduler loop exits on its next check
    pub fn signal_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown_signaled(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file
    }

    async fn graceful_shutdown(&self, database: &Database) -> Result<()> {
        tracing::info!("Starting graceful shutdown");
        self.signal_shutdown();

        match database.flush_wal().await {
            Ok(_) => tracing::info!("SQLite WAL flushed successfully"),
            Err(e) => tracing::error!("Failed to flush SQLite WAL: {}", e),
        }

        self.remove_own_pid_file();

        tracing::info!("Graceful shutdown completed");
        Ok(())
    }

    #[cfg(unix)]
    fn setup_signal_handler(shutdown_flag: Arc<AtomicBool>) -> JoinHandle<()> {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown_flag.store(true, Ordering::Relaxed);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C"),
            }
            shutdown_flag.store(true, Ordering::Relaxed);
        })
    }

    #[cfg(not(unix))]
    fn setup_signal_handler(shutdown_flag: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
            }
            shutdown_flag.store(true, Ordering::Relaxed);
        })
    }

    fn is_daemon_running(&self) -> Result<bool> {
        if !self.pid_file.exists() {
            return Ok(false);
        }

        let pid = match Self::read_pid_file(&self.pid_file) {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!("Unreadable PID file, replacing it: {}", e);
                fs::remove_file(&self.pid_file).map_err(EngineError::Io)?;
                return Ok(false);
            }
        };

        if Self::is_process_running(pid) {
            Ok(true)
        } else {
            // Stale PID file
            fs::remove_file(&self.pid_file).map_err(EngineError::Io)?;
            Ok(false)
        }
    }

    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();

        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).map_err(EngineError::Io)?;
        }

        fs::write(&self.pid_file, pid.to_string()).map_err(EngineError::Io)?;

        tracing::info!("Wrote PID {} to {:?}", pid, self.pid_file);

        Ok(())
    }

    /// Remove the PID file only if it still names this process
    fn remove_own_pid_file(&self) {
        match Self::read_pid_file(&self.pid_file) {
            Ok(pid) if pid == std::process::id() => {
                if let Err(e) = fs::remove_file(&self.pid_file) {
                    tracing::error!("Failed to remove PID file: {}", e);
                }
            }
            _ => {}
        }
    }

    fn read_pid_file(pid_file: &Path) -> Result<u32> {
        let content = fs::read_to_string(pid_file).map_err(EngineError::Io)?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| EngineError::Config(format!("Invalid PID in file: {}", e)))
    }

    fn is_process_running(_pid: u32) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            // Signal 0 only checks that the process exists
            kill(Pid::from_raw(_pid as i32), None).is_ok()
        }

        #[cfg(not(unix))]
        {
            false
        }
    }

    /// `core.data_dir` is already expanded by config validation
    fn get_pid_file_path(config: &Config) -> PathBuf {
        config.core.data_dir.join("somnus.pid")
    }
}

impl Drop for DaemonManager {
    fn drop(&mut self) {
        self.remove_own_pid_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default_config();
        config.core.data_dir = temp_dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_pid_file_lives_in_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::new(&test_config(&temp_dir)).unwrap();
        assert_eq!(manager.pid_file_path(), temp_dir.path().join("somnus.pid"));
    }

    #[test]
    fn test_status_without_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let status = DaemonManager::status(&test_config(&temp_dir)).unwrap();
        assert!(!status.is_running);
        assert!(status.pid.is_none());
        assert_eq!(status.provider, "openai");
    }

    #[test]
    fn test_own_pid_counts_as_running() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let manager = DaemonManager::new(&config).unwrap();

        manager.write_pid_file().unwrap();
        let status = DaemonManager::status(&config).unwrap();
        assert!(status.is_running);
        assert_eq!(status.pid, Some(std::process::id()));

        let second = DaemonManager::new(&config).unwrap();
        assert!(matches!(
            second.is_daemon_running(),
            Ok(true)
        ));
    }

    #[test]
    fn test_garbage_pid_file_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::new(&test_config(&temp_dir)).unwrap();
        fs::write(manager.pid_file_path(), "not-a-pid").unwrap();

        assert!(!manager.is_daemon_running().unwrap());
        assert!(!manager.pid_file_path().exists());
    }

    #[test]
    fn test_drop_removes_own_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::new(&test_config(&temp_dir)).unwrap();
        manager.write_pid_file().unwrap();
        let path = manager.pid_file_path().to_path_buf();

        drop(manager);
        assert!(!path.exists());
    }

    #[test]
    fn test_shutdown_flag() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::new(&test_config(&temp_dir)).unwrap();
        assert!(!manager.is_shutdown_signaled());
        manager.signal_shutdown();
        assert!(manager.is_shutdown_signaled());
    }
}
