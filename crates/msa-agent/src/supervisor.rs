use std::{process::Stdio, sync::Arc};

use msa_process::{InstanceId, InstanceState, InstanceStatus};
use tokio::process::Command;

use crate::classifier::{LOG_FILE, LogClassifier};
use crate::config::AgentConfig;
use crate::console::{ConsoleLimit, tail_records};
use crate::error::{ConflictReason, IoContext, Result, SupervisorError};
use crate::eula;
use crate::launch::{MAX_PORT, MIN_PORT, resolve_launch_spec};
use crate::registry::{ProcessHandle, Registry};
use crate::watchdog::{Watchdog, WatchdogObserver};

pub const STOP_COMMAND: &str = "stop";

const NEED_EULA: &str = "need to accept eula";
const BIND_FAILED: &str = "fail to bind port";

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    // If the agent dies, take the server down with it.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Owns every managed server process on this host.
#[derive(Clone)]
pub struct Supervisor {
    config: Arc<AgentConfig>,
    registry: Registry,
    watchdog: Watchdog,
}

impl Supervisor {
    /// Loads the registry from `config.server_root`.
    pub async fn new(config: AgentConfig, observer: Arc<dyn WatchdogObserver>) -> Result<Self> {
        let registry = Registry::load(config.server_root.clone()).await?;
        let watchdog = Watchdog::new(registry.clone(), observer, config.timing);
        Ok(Self {
            config: Arc::new(config),
            registry,
            watchdog,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn create(&self) -> Result<InstanceId> {
        let id = InstanceId::new();
        let dir = self.config.instance_dir(id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .io_context(|| format!("create {}", dir.display()))?;
        self.registry.add(&id).await?;
        tracing::info!(instance_id = %id, dir = %dir.display(), "server created");
        Ok(id)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.registry.remove(id).await
    }

    pub async fn agree_eula(&self, id: &str) -> Result<()> {
        let slot = self.registry.get(id).await?;
        eula::agree(&slot.dir).await
    }

    /// Probing state query. A dead process found here is reaped.
    pub async fn state(&self, id: &str) -> Result<InstanceState> {
        Ok(self.registry.get(id).await?.state())
    }

    /// Launches the server and returns as soon as the process is spawned.
    /// Readiness is tracked by the startup watchdog.
    pub async fn start(
        &self,
        id: &str,
        ram_gb: u32,
        port: u16,
        world_name: Option<&str>,
    ) -> Result<()> {
        let mut slot = self.registry.get(id).await?;
        if ram_gb == 0 {
            return Err(SupervisorError::invalid("ram_gb cannot <= 0"));
        }
        if !(MIN_PORT..=MAX_PORT).contains(&port) {
            return Err(SupervisorError::invalid(format!(
                "port must be within {MIN_PORT}..={MAX_PORT} (got {port})"
            )));
        }
        if slot.handle.is_some() {
            return Err(SupervisorError::Conflict(ConflictReason::AlreadyRunning));
        }

        let log_path = slot.dir.join(LOG_FILE);
        match tokio::fs::remove_file(&log_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SupervisorError::io(
                    format!("discard {}", log_path.display()),
                    e,
                ));
            }
        }
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)
            .await
            .io_context(|| format!("open {}", log_path.display()))?
            .into_std()
            .await;
        let stdout = log
            .try_clone()
            .io_context(|| "duplicate console log handle".to_string())?;
        let stderr = log
            .try_clone()
            .io_context(|| "duplicate console log handle".to_string())?;

        let world_name = world_name.filter(|w| !w.is_empty()).map(str::to_string);
        let spec = resolve_launch_spec(&self.config, ram_gb, port, world_name.as_deref());

        let mut cmd = Command::new(&spec.exec);
        cmd.current_dir(&slot.dir)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(set_parent_death_signal);
        }

        let mut child = cmd
            .spawn()
            .io_context(|| format!("spawn {} (cwd {})", spec.exec, slot.dir.display()))?;
        let Some(stdin) = child.stdin.take() else {
            let _ = child.start_kill();
            return Err(SupervisorError::io(
                "spawn",
                std::io::Error::other("server stdin was not captured"),
            ));
        };

        let generation = self.registry.next_generation();
        let mut handle = ProcessHandle::new(
            generation,
            child,
            stdin,
            tokio::fs::File::from_std(log),
            port,
            ram_gb,
            world_name,
        );
        handle.starting = true;

        tracing::info!(
            instance_id = %slot.id,
            generation,
            pid = ?handle.pid(),
            port,
            ram_gb = handle.ram_gb,
            world = ?handle.world_name,
            cmd = %spec.command_line(),
            "server start requested"
        );

        handle.track_watchdog(self.watchdog.spawn_startup(slot.id.clone(), generation));
        slot.handle = Some(handle);
        Ok(())
    }

    /// Sends `stop` to the server and returns; the shutdown watchdog reaps
    /// the process once it exits.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let mut slot = self.registry.get(id).await?;
        let slot_id = slot.id.clone();
        let handle = slot
            .handle
            .as_mut()
            .ok_or(SupervisorError::Conflict(ConflictReason::NotRunning))?;
        if handle.stopping {
            return Err(SupervisorError::Conflict(ConflictReason::AlreadyStopping));
        }

        handle.send_line(STOP_COMMAND).await?;
        handle.stopping = true;
        let generation = handle.generation;
        handle.track_watchdog(self.watchdog.spawn_shutdown(slot_id.clone(), generation));

        tracing::info!(instance_id = %slot_id, generation, "server stop requested");
        Ok(())
    }

    /// Fire-and-forget console command. `stop` goes through [`Self::stop`].
    pub async fn send_command(&self, id: &str, command: &str) -> Result<()> {
        let mut slot = self.registry.get(id).await?;
        if command.trim().is_empty() {
            return Err(SupervisorError::invalid("command is required"));
        }
        if command.contains(['\n', '\r']) {
            return Err(SupervisorError::invalid("command must be a single line"));
        }
        if command == STOP_COMMAND {
            drop(slot);
            return self.stop(id).await;
        }

        let handle = slot
            .handle
            .as_mut()
            .ok_or(SupervisorError::Conflict(ConflictReason::NotRunning))?;
        handle.send_line(command).await?;
        tracing::debug!(instance_id = %id, command, "console command sent");
        Ok(())
    }

    /// Full console transcript, or its last `limit` records.
    pub async fn read_console(&self, id: &str, limit: Option<ConsoleLimit>) -> Result<String> {
        let path = {
            let slot = self.registry.get(id).await?;
            if slot.handle.is_none() {
                return Err(SupervisorError::Conflict(ConflictReason::NotRunning));
            }
            slot.dir.join(LOG_FILE)
        };

        let raw = tokio::fs::read(&path)
            .await
            .io_context(|| format!("read {}", path.display()))?;
        let text = String::from_utf8_lossy(&raw).into_owned();
        Ok(match limit {
            Some(limit) => tail_records(&text, limit),
            None => text,
        })
    }

    /// Status rows for every instance, sorted by id. Does not probe.
    pub async fn statuses(&self) -> Vec<InstanceStatus> {
        let mut out = Vec::new();
        for slot in self.registry.snapshot().await {
            let (id, dir, state, port) = {
                let slot = slot.lock().await;
                if slot.is_removed() {
                    continue;
                }
                (
                    slot.id.clone(),
                    slot.dir.clone(),
                    slot.state(),
                    slot.handle.as_ref().map(|h| h.port),
                )
            };

            let classifier = LogClassifier::for_dir(dir);
            let mut row = InstanceStatus::bare(id, state);
            match state {
                InstanceState::Stopped => {
                    row.last_error = last_error(&classifier).await;
                }
                InstanceState::Running => {
                    row.address = port.map(|p| format!("localhost:{p}"));
                    row.online_mode = Some(classifier.running_online_mode().await);
                    row.world_name = classifier.used_world_name().await;
                }
                InstanceState::Starting | InstanceState::Stopping => {}
            }
            out.push(row);
        }
        out
    }

    /// Kills every attached server. Used when the agent exits.
    pub async fn shutdown(&self) {
        for slot in self.registry.snapshot().await {
            let mut slot = slot.lock().await;
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            handle.abort_watchdogs();
            let status = handle.terminate().await;
            tracing::info!(instance_id = %slot.id, ?status, "server killed on agent shutdown");
        }
    }
}

async fn last_error(classifier: &LogClassifier) -> Option<String> {
    if !classifier.eula_accepted().await {
        return Some(NEED_EULA.to_string());
    }
    if classifier.port_bind_failed().await {
        return Some(BIND_FAILED.to_string());
    }
    None
}
