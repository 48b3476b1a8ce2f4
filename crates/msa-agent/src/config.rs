use std::{
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

const DEFAULT_DATA_ROOT: &str = "./file";
const DEFAULT_JAVA_BIN: &str = "java";
const DEFAULT_SERVER_JAR: &str = "../../jar/server-1.19.2.jar";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:25001";

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 120_000;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Polling cadence and budgets shared by the start and stop watchdogs.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTiming {
    pub poll_interval: Duration,
    pub startup_budget: Duration,
    /// `None` keeps the shutdown watchdog polling until the process exits.
    pub stop_timeout: Option<Duration>,
}

impl Default for WatchdogTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            startup_budget: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            stop_timeout: None,
        }
    }
}

impl WatchdogTiming {
    pub fn from_env() -> Self {
        let poll_interval = Duration::from_millis(
            env_u64("MSA_POLL_INTERVAL_MS")
                .map(|v| v.clamp(50, 10_000))
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );
        let startup_budget = Duration::from_millis(
            env_u64("MSA_STARTUP_TIMEOUT_MS")
                .map(|v| v.clamp(1_000, 60 * 60 * 1000))
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS),
        );
        let stop_timeout = env_u64("MSA_STOP_TIMEOUT_MS")
            .filter(|v| *v > 0)
            .map(|v| Duration::from_millis(v.clamp(1_000, 24 * 60 * 60 * 1000)));

        Self {
            poll_interval,
            startup_budget,
            stop_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Parent of every instance directory (`<server_root>/<id>/`).
    pub server_root: PathBuf,
    pub java_bin: String,
    /// Jar path, relative to the instance working directory.
    pub server_jar: String,
    pub listen_addr: SocketAddr,
    pub timing: WatchdogTiming,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let data_root = absolutize(PathBuf::from(
            env_string("MSA_DATA_ROOT").unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string()),
        ));

        let listen_raw =
            env_string("MSA_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = listen_raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid MSA_LISTEN_ADDR {listen_raw:?}: {e}"))?;

        Ok(Self {
            server_root: data_root.join("server"),
            java_bin: env_string("MSA_JAVA_BIN").unwrap_or_else(|| DEFAULT_JAVA_BIN.to_string()),
            server_jar: env_string("MSA_SERVER_JAR")
                .unwrap_or_else(|| DEFAULT_SERVER_JAR.to_string()),
            listen_addr,
            timing: WatchdogTiming::from_env(),
        })
    }

    /// Config rooted at `server_root` with every other knob at its default.
    pub fn with_server_root(server_root: impl Into<PathBuf>) -> Self {
        Self {
            server_root: server_root.into(),
            java_bin: DEFAULT_JAVA_BIN.to_string(),
            server_jar: DEFAULT_SERVER_JAR.to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 25001)),
            timing: WatchdogTiming::default(),
        }
    }

    pub fn instance_dir(&self, id: &str) -> PathBuf {
        self.server_root.join(id)
    }
}

fn absolutize(p: PathBuf) -> PathBuf {
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };

    // Don't fail if the directory doesn't exist yet.
    std::fs::canonicalize(&abs).unwrap_or(abs)
}

/// Rejects ids that would escape the server root when joined as a path.
pub fn is_safe_instance_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_layout() {
        let cfg = AgentConfig::with_server_root("/srv/msa/server");
        assert_eq!(cfg.java_bin, "java");
        assert_eq!(cfg.server_jar, "../../jar/server-1.19.2.jar");
        assert_eq!(cfg.timing.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.timing.startup_budget, Duration::from_secs(120));
        assert!(cfg.timing.stop_timeout.is_none());
        assert_eq!(
            cfg.instance_dir("abc"),
            PathBuf::from("/srv/msa/server").join("abc")
        );
    }

    #[test]
    fn instance_id_safety() {
        assert!(is_safe_instance_id("0b6f3a9e-2f4c-4b7e-9a51-2a7d1c6f0e11"));
        assert!(is_safe_instance_id("lobby_1"));
        assert!(!is_safe_instance_id(""));
        assert!(!is_safe_instance_id(".."));
        assert!(!is_safe_instance_id("a/b"));
        assert!(!is_safe_instance_id("a\\b"));
    }
}
