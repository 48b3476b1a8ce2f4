//! Log-state inference.
//!
//! The server speaks no structured protocol, so every lifecycle signal comes
//! from matching marker lines in `msa.std` (and `eula.txt`). All predicates
//! re-read the files on each call; nothing is cached.

use std::path::{Path, PathBuf};

use crate::eula;

pub const LOG_FILE: &str = "msa.std";

const READY_PREFIX: &str = "[Server thread/INFO]: Done (";
const READY_SUFFIX: &str = ")! For help, type \"help\"";
const PORT_BIND_FAILED: &str = "[Server thread/WARN]: **** FAILED TO BIND TO PORT!";
const OFFLINE_MODE: &str = "[Server thread/WARN]: **** SERVER IS RUNNING IN OFFLINE/INSECURE MODE!";
const PREPARING_LEVEL: &str = "[Server thread/INFO]: Preparing level \"";

pub fn is_ready(log: &str) -> bool {
    // The duration between the parentheses is free-form; the first prefix is
    // enough because any later one sits after it.
    log.find(READY_PREFIX)
        .is_some_and(|i| log[i + READY_PREFIX.len()..].contains(READY_SUFFIX))
}

pub fn has_port_bind_failure(log: &str) -> bool {
    log.contains(PORT_BIND_FAILED)
}

/// Online mode is assumed until the server says otherwise, so this reads
/// `true` while the server is still booting.
pub fn is_online_mode(log: &str) -> bool {
    !log.contains(OFFLINE_MODE)
}

/// Returns the whole matched marker, e.g.
/// `[Server thread/INFO]: Preparing level "world"`, not only the name.
pub fn find_world_marker(log: &str) -> Option<&str> {
    let start = log.find(PREPARING_LEVEL)?;
    let name_at = start + PREPARING_LEVEL.len();
    let close = log[name_at..].find('"')?;
    Some(&log[start..name_at + close + 1])
}

/// Terminal outcome of a boot, as far as the log can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSignal {
    Ready,
    PortBindFailed,
    Pending,
}

pub fn boot_signal(log: &str) -> BootSignal {
    if is_ready(log) {
        BootSignal::Ready
    } else if has_port_bind_failure(log) {
        BootSignal::PortBindFailed
    } else {
        BootSignal::Pending
    }
}

/// Disk-backed view over one instance directory.
#[derive(Debug, Clone)]
pub struct LogClassifier {
    dir: PathBuf,
}

impl LogClassifier {
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn read_log(&self) -> std::io::Result<String> {
        let raw = tokio::fs::read(self.log_path()).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub async fn eula_accepted(&self) -> bool {
        eula::is_accepted(&self.dir).await
    }

    pub async fn port_bind_failed(&self) -> bool {
        match self.read_log().await {
            Ok(log) => has_port_bind_failure(&log),
            Err(_) => false,
        }
    }

    pub async fn running_online_mode(&self) -> bool {
        match self.read_log().await {
            Ok(log) => is_online_mode(&log),
            Err(_) => false,
        }
    }

    pub async fn used_world_name(&self) -> Option<String> {
        let log = self.read_log().await.ok()?;
        find_world_marker(&log).map(str::to_string)
    }

    pub async fn boot_signal(&self) -> std::io::Result<BootSignal> {
        Ok(boot_signal(&self.read_log().await?))
    }
}
