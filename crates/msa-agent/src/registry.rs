//! Instance registry.
//!
//! Lock discipline: the id → slot map has its own mutex, held only long
//! enough to clone a slot `Arc`. Each slot has its own async mutex. Nothing
//! awaits a slot lock while holding the map lock, and no code path holds two
//! slot locks at once.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use msa_process::{InstanceId, InstanceState};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin},
    sync::{Mutex, OwnedMutexGuard},
    task::AbortHandle,
};

use crate::config::is_safe_instance_id;
use crate::error::{ConflictReason, IoContext, Result, SupervisorError};

const REAP_GRACE: Duration = Duration::from_secs(5);

/// Live child process attached to an instance.
///
/// Owns the stdin write end and the append handle on `msa.std`; both are
/// closed when the handle is dropped.
#[derive(Debug)]
pub struct ProcessHandle {
    pub(crate) generation: u64,
    pub(crate) port: u16,
    pub(crate) ram_gb: u32,
    pub(crate) world_name: Option<String>,
    pub(crate) starting: bool,
    pub(crate) stopping: bool,
    child: Child,
    stdin: ChildStdin,
    log: tokio::fs::File,
    watchdogs: Vec<AbortHandle>,
}

impl ProcessHandle {
    pub(crate) fn new(
        generation: u64,
        child: Child,
        stdin: ChildStdin,
        log: tokio::fs::File,
        port: u16,
        ram_gb: u32,
        world_name: Option<String>,
    ) -> Self {
        Self {
            generation,
            port,
            ram_gb,
            world_name,
            starting: false,
            stopping: false,
            child,
            stdin,
            log,
            watchdogs: Vec::new(),
        }
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::derive(true, self.starting, self.stopping)
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Liveness probe: the child has not reported an exit status. Reaps it
    /// if it has exited.
    pub(crate) fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Writes one command line to the child and mirrors it into the log so
    /// the transcript interleaves issued commands with server output.
    pub(crate) async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        self.stdin
            .write_all(buf.as_bytes())
            .await
            .io_context(|| "write to server stdin".to_string())?;
        self.stdin
            .flush()
            .await
            .io_context(|| "flush server stdin".to_string())?;

        self.log
            .write_all(buf.as_bytes())
            .await
            .io_context(|| "append command to console log".to_string())?;
        self.log
            .flush()
            .await
            .io_context(|| "flush console log".to_string())?;
        Ok(())
    }

    pub(crate) fn track_watchdog(&mut self, handle: AbortHandle) {
        self.watchdogs.retain(|h| !h.is_finished());
        self.watchdogs.push(handle);
    }

    pub(crate) fn abort_watchdogs(&self) {
        for h in &self.watchdogs {
            h.abort();
        }
    }

    /// Kills the child (idempotent) and waits briefly for it to be reaped.
    /// Dropping `self` afterwards closes stdin and the log descriptor.
    pub(crate) async fn terminate(mut self) -> Option<ExitStatus> {
        if let Err(err) = self.child.start_kill() {
            // Already exited and reaped.
            tracing::debug!(generation = self.generation, %err, "kill skipped");
        }
        match tokio::time::timeout(REAP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                tracing::warn!(generation = self.generation, %err, "wait after kill failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    generation = self.generation,
                    "child not reaped within {}ms of kill",
                    REAP_GRACE.as_millis()
                );
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct Slot {
    pub(crate) id: InstanceId,
    pub(crate) dir: PathBuf,
    pub(crate) handle: Option<ProcessHandle>,
    removed: bool,
}

impl Slot {
    pub fn state(&self) -> InstanceState {
        self.handle
            .as_ref()
            .map(ProcessHandle::state)
            .unwrap_or(InstanceState::Stopped)
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed
    }

    /// The attached handle, if it is still the one a watchdog was started for.
    pub(crate) fn current(&mut self, generation: u64) -> Option<&mut ProcessHandle> {
        self.handle
            .as_mut()
            .filter(|h| h.generation == generation)
    }
}

/// Kills and detaches a handle whose process no longer answers the probe.
/// Returns whether a repair happened.
pub(crate) async fn probe_and_repair(slot: &mut Slot) -> bool {
    let Some(handle) = slot.handle.as_mut() else {
        return false;
    };
    if handle.is_alive() {
        return false;
    }
    let Some(handle) = slot.handle.take() else {
        return false;
    };
    let generation = handle.generation;
    let status = handle.terminate().await;
    tracing::warn!(
        instance_id = %slot.id,
        generation,
        ?status,
        "server process is gone; handle cleared"
    );
    true
}

#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    slots: Arc<Mutex<BTreeMap<String, Arc<Mutex<Slot>>>>>,
    generations: Arc<AtomicU64>,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            slots: Arc::new(Mutex::new(BTreeMap::new())),
            generations: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Creates the server root if needed and registers every instance
    /// directory already under it, all without a process.
    pub async fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self::new(root);
        tokio::fs::create_dir_all(&registry.root)
            .await
            .io_context(|| format!("create server root {}", registry.root.display()))?;

        let mut rd = tokio::fs::read_dir(&registry.root)
            .await
            .io_context(|| format!("read server root {}", registry.root.display()))?;
        while let Some(entry) = rd
            .next_entry()
            .await
            .io_context(|| format!("read server root {}", registry.root.display()))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_safe_instance_id(&name) {
                tracing::warn!(dir = %entry.path().display(), "skipping unsafe instance dir name");
                continue;
            }
            registry.add(&InstanceId(name)).await?;
        }

        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn add(&self, id: &InstanceId) -> Result<()> {
        if !is_safe_instance_id(id.as_str()) {
            return Err(SupervisorError::invalid(format!("invalid server id: {id}")));
        }

        let mut map = self.slots.lock().await;
        if map.contains_key(id.as_str()) {
            return Err(SupervisorError::AlreadyExists(id.to_string()));
        }
        map.insert(
            id.0.clone(),
            Arc::new(Mutex::new(Slot {
                id: id.clone(),
                dir: self.root.join(id.as_str()),
                handle: None,
                removed: false,
            })),
        );
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Slots in id order. Callers lock them one at a time.
    pub(crate) async fn snapshot(&self) -> Vec<Arc<Mutex<Slot>>> {
        self.slots.lock().await.values().cloned().collect()
    }

    /// Snapshot of every instance with its derived state. No probing.
    pub async fn list(&self) -> Vec<(InstanceId, InstanceState)> {
        let mut out = Vec::new();
        for slot in self.snapshot().await {
            let slot = slot.lock().await;
            if slot.removed {
                continue;
            }
            out.push((slot.id.clone(), slot.state()));
        }
        out
    }

    /// Locks an instance without probing. Used by the watchdogs, which run
    /// their own probe and report its outcome.
    pub(crate) async fn lock(&self, id: &str) -> Result<OwnedMutexGuard<Slot>> {
        let slot = {
            let map = self.slots.lock().await;
            map.get(id).cloned()
        }
        .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        let guard = slot.lock_owned().await;
        if guard.removed {
            return Err(SupervisorError::NotFound(id.to_string()));
        }
        Ok(guard)
    }

    /// Locks an instance and runs the liveness probe on its handle. A dead
    /// process is killed and detached before the guard is handed out.
    pub async fn get(&self, id: &str) -> Result<OwnedMutexGuard<Slot>> {
        let mut guard = self.lock(id).await?;
        probe_and_repair(&mut guard).await;
        Ok(guard)
    }

    /// Deletes the instance directory and forgets the id. Refused while a
    /// process is attached.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut guard = self.get(id).await?;
        if guard.handle.is_some() {
            return Err(SupervisorError::Conflict(ConflictReason::StillRunning));
        }

        match tokio::fs::remove_dir_all(&guard.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SupervisorError::io(
                    format!("delete {}", guard.dir.display()),
                    e,
                ));
            }
        }
        guard.removed = true;
        drop(guard);

        self.slots.lock().await.remove(id);
        tracing::info!(instance_id = %id, "server deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_rejects_duplicates_and_unsafe_ids() {
        let root = tempfile::tempdir().unwrap();
        let reg = Registry::new(root.path());

        let id = InstanceId("alpha".to_string());
        reg.add(&id).await.unwrap();
        let err = reg.add(&id).await.unwrap_err();
        assert_eq!(err.code(), "already_exists");

        let err = reg.add(&InstanceId("../etc".to_string())).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let reg = Registry::new(root.path());
        let err = reg.get("missing").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
        let err = reg.remove("missing").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn load_rediscovers_instance_dirs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("b-instance")).unwrap();
        std::fs::create_dir(root.path().join("a-instance")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "not an instance").unwrap();

        let reg = Registry::load(root.path()).await.unwrap();
        let listed: Vec<String> = reg.list().await.into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(listed, vec!["a-instance", "b-instance"]);
        assert!(
            reg.list()
                .await
                .iter()
                .all(|(_, st)| *st == InstanceState::Stopped)
        );
    }

    #[tokio::test]
    async fn load_creates_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let server_root = root.path().join("file").join("server");
        let reg = Registry::load(&server_root).await.unwrap();
        assert!(server_root.is_dir());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn remove_deletes_directory_and_entry() {
        let root = tempfile::tempdir().unwrap();
        let reg = Registry::new(root.path());
        let id = InstanceId("gone".to_string());
        std::fs::create_dir(root.path().join("gone")).unwrap();
        std::fs::write(root.path().join("gone").join("eula.txt"), "eula=true\n").unwrap();
        reg.add(&id).await.unwrap();

        reg.remove("gone").await.unwrap();
        assert!(!root.path().join("gone").exists());
        assert!(reg.is_empty().await);
        assert_eq!(reg.get("gone").await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn generations_increase() {
        let reg = Registry::new("/nonexistent");
        let a = reg.next_generation();
        let b = reg.next_generation();
        assert!(b > a);
    }
}
