//! Forwarding process supervisor.
//!
//! Owns one external forwarding process per tunnel id and a registry of
//! handles to them. All operations on a single tunnel are serialised by a
//! per-tunnel async lock, so a `start` racing a `stop` (or the auto-restart
//! inside `is_active`) for the same id can never leave two processes behind.
//! Different tunnels proceed in parallel.
//!
//! Lifecycle of a start:
//!
//! 1. stop whatever is registered for the id, then let the port settle
//! 2. build the invocation and resolve the binary
//! 3. if nothing of ours held the port, sweep it for strays of an earlier run
//! 4. open the log sink and spawn in a new session
//! 5. grace wait, exit poll, advisory port probe
//! 6. register the handle

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::command::Invocation;
use super::engine::{file_stem, ForwardEngine};
use super::error::{ForwardError, ForwardResult};
use super::log_sink::{read_tail, LogSink, DIAGNOSTIC_TAIL_CHARS};
use super::probe::PortProber;
use super::sweep;

/// Delays and timeouts used by a [`Supervisor`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// How long a new process must survive before it counts as started.
    pub startup_grace: Duration,
    /// Pause after stopping an old process before its replacement binds.
    pub settle: Duration,
    /// Pause between the grace check and the port probe.
    pub probe_delay: Duration,
    pub prober: PortProber,
    /// SIGTERM → SIGKILL escalation window.
    pub stop_timeout: Duration,
    /// SIGTERM → SIGKILL window for the port sweep.
    pub sweep_wait: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_millis(1500),
            settle: Duration::from_millis(500),
            probe_delay: Duration::from_millis(500),
            prober: PortProber::default(),
            stop_timeout: Duration::from_secs(5),
            sweep_wait: Duration::from_secs(1),
        }
    }
}

/// A live, supervised process.
#[derive(Debug)]
struct RegistryEntry<C> {
    child: Child,
    pid: Option<u32>,
    /// Held open for the life of the process; dropping closes it.
    log: LogSink,
    config: C,
}

/// Where the most recent process ran, kept after pruning so a later stop
/// can still sweep for strays.
#[derive(Debug, Clone)]
struct Footprint {
    port: u16,
    /// File name of the resolved executable.
    binary: String,
}

#[derive(Debug)]
struct Slot<C> {
    entry: Option<RegistryEntry<C>>,
    footprint: Option<Footprint>,
}

impl<C> Default for Slot<C> {
    fn default() -> Self {
        Self {
            entry: None,
            footprint: None,
        }
    }
}

impl<C> Slot<C> {
    fn is_idle(&self) -> bool {
        self.entry.is_none() && self.footprint.is_none()
    }
}

type SharedSlot<C> = Arc<tokio::sync::Mutex<Slot<C>>>;

pub struct Supervisor<E: ForwardEngine> {
    engine: E,
    workdir: PathBuf,
    timings: SupervisorTimings,
    slots: parking_lot::Mutex<HashMap<String, SharedSlot<E::Config>>>,
}

impl<E: ForwardEngine> Supervisor<E> {
    /// `workdir` receives log files and generated engine configs; it is
    /// created on first start.
    pub fn new(engine: E, workdir: impl Into<PathBuf>, timings: SupervisorTimings) -> Self {
        Self {
            engine,
            workdir: workdir.into(),
            timings,
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start a process for `tunnel_id`, replacing any existing one.
    ///
    /// On error nothing is registered for the id and no process spawned by
    /// this call is left running.
    pub async fn start(&self, tunnel_id: &str, config: E::Config) -> ForwardResult<()> {
        let slot = self.slot(tunnel_id);
        let result = {
            let mut guard = slot.lock().await;
            self.start_locked(tunnel_id, &mut guard, config).await
        };
        self.release_if_idle(tunnel_id, &slot);
        result
    }

    /// Stop the process for `tunnel_id`. Idempotent, never fails.
    pub async fn stop(&self, tunnel_id: &str) {
        let Some(slot) = self.existing_slot(tunnel_id) else {
            tracing::debug!("{} stop for {tunnel_id}: nothing registered", self.engine.name());
            return;
        };
        {
            let mut guard = slot.lock().await;
            self.stop_locked(tunnel_id, &mut guard).await;
        }
        self.release_if_idle(tunnel_id, &slot);
    }

    /// Whether `tunnel_id` has a running process.
    ///
    /// A registered process found dead is restarted once with its recorded
    /// config; the answer reflects the outcome of that restart.
    pub async fn is_active(&self, tunnel_id: &str) -> bool {
        let Some(slot) = self.existing_slot(tunnel_id) else {
            return false;
        };
        let active = {
            let mut guard = slot.lock().await;
            self.check_locked(tunnel_id, &mut guard).await
        };
        self.release_if_idle(tunnel_id, &slot);
        active
    }

    /// Tunnel ids whose process is alive. Dead entries are pruned without
    /// restarting them.
    ///
    /// Never waits on a tunnel lock: a tunnel with a start, stop or restart
    /// in flight is reported as active.
    pub async fn list_active(&self) -> BTreeSet<String> {
        let mut active = BTreeSet::new();
        for (tunnel_id, slot) in self.snapshot() {
            let Ok(mut guard) = slot.try_lock() else {
                active.insert(tunnel_id);
                continue;
            };
            let Some(entry) = guard.entry.as_mut() else {
                continue;
            };
            match entry.child.try_wait() {
                Ok(None) => {
                    active.insert(tunnel_id);
                }
                Ok(Some(status)) => {
                    tracing::info!(
                        "{} process for tunnel {tunnel_id} exited ({status}), pruning",
                        self.engine.name()
                    );
                    guard.entry = None;
                }
                Err(e) => {
                    tracing::warn!(
                        "{} process for tunnel {tunnel_id} status unknown, pruning: {e}",
                        self.engine.name()
                    );
                    guard.entry = None;
                }
            }
        }
        active
    }

    /// Stop every registered tunnel concurrently.
    pub async fn cleanup_all(&self) {
        let ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        tracing::info!("Stopping {} {} process(es)", ids.len(), self.engine.name());
        futures_util::future::join_all(ids.iter().map(|id| self.stop(id))).await;
    }

    // ── Introspection ────────────────────────────────────────────

    /// PID of the registered process, if any. Does not check liveness.
    pub async fn pid(&self, tunnel_id: &str) -> Option<u32> {
        let slot = self.existing_slot(tunnel_id)?;
        let guard = slot.lock().await;
        guard.entry.as_ref().and_then(|e| e.pid)
    }

    /// Config the registered process was started with.
    pub async fn config(&self, tunnel_id: &str) -> Option<E::Config> {
        let slot = self.existing_slot(tunnel_id)?;
        let guard = slot.lock().await;
        guard.entry.as_ref().map(|e| e.config.clone())
    }

    /// Ids with registry state, including pruned entries awaiting a stop.
    pub fn tunnel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered entries, live or not yet pruned.
    pub async fn len(&self) -> usize {
        let mut count = 0;
        for (_, slot) in self.snapshot() {
            if slot.lock().await.entry.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Log file used for `tunnel_id`, whether or not it exists yet.
    pub fn log_path(&self, tunnel_id: &str) -> PathBuf {
        self.workdir
            .join(format!("{}_{}.log", self.engine.name(), file_stem(tunnel_id)))
    }

    /// Last `max_chars` characters of the tunnel's log.
    pub fn log_tail(&self, tunnel_id: &str, max_chars: usize) -> String {
        read_tail(&self.log_path(tunnel_id), max_chars)
    }

    // ── Internals ────────────────────────────────────────────────

    fn slot(&self, tunnel_id: &str) -> SharedSlot<E::Config> {
        self.slots
            .lock()
            .entry(tunnel_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, tunnel_id: &str) -> Option<SharedSlot<E::Config>> {
        self.slots.lock().get(tunnel_id).cloned()
    }

    fn snapshot(&self) -> Vec<(String, SharedSlot<E::Config>)> {
        self.slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect()
    }

    /// Drop the map entry for an idle slot nobody else is waiting on.
    fn release_if_idle(&self, tunnel_id: &str, slot: &SharedSlot<E::Config>) {
        let mut slots = self.slots.lock();
        let Some(current) = slots.get(tunnel_id) else {
            return;
        };
        // Two references: the map's and the caller's.
        if !Arc::ptr_eq(current, slot) || Arc::strong_count(slot) != 2 {
            return;
        }
        let idle = slot.try_lock().map(|g| g.is_idle()).unwrap_or(false);
        if idle {
            slots.remove(tunnel_id);
        }
    }

    async fn start_locked(
        &self,
        tunnel_id: &str,
        slot: &mut Slot<E::Config>,
        config: E::Config,
    ) -> ForwardResult<()> {
        let name = self.engine.name();

        let previous_port = if slot.is_idle() {
            None
        } else {
            if slot.entry.is_some() {
                tracing::warn!("{name} for tunnel {tunnel_id} already running, restarting");
            }
            let port = slot.footprint.as_ref().map(|f| f.port);
            self.stop_locked(tunnel_id, slot).await;
            tokio::time::sleep(self.timings.settle).await;
            port
        };

        std::fs::create_dir_all(&self.workdir).map_err(|source| ForwardError::Io {
            path: self.workdir.clone(),
            source,
        })?;

        let args = self.engine.prepare(tunnel_id, &config, &self.workdir)?;
        let program = self.engine.locator().resolve()?;
        let binary = program
            .file_name()
            .map_or_else(|| name.to_string(), |n| n.to_string_lossy().into_owned());
        let invocation = Invocation::new(program, args);
        let port = self.engine.local_port(&config);

        // An untracked port may still be held by a forwarder orphaned when a
        // previous supervisor died.
        if previous_port != Some(port)
            && !sweep::sweep_port(port, &binary, self.timings.sweep_wait)
                .await
                .is_empty()
        {
            tokio::time::sleep(self.timings.settle).await;
        }

        let mut log = LogSink::create(&self.log_path(tunnel_id))?;
        log.line(&format!(
            "Starting {name} with command: {}",
            invocation.command_line()
        ));
        log.line(&format!("Tunnel ID: {tunnel_id}"));
        log.line(&self.engine.describe(&config));
        log.line(&format!("Started at: {}", chrono::Utc::now().to_rfc3339()));

        let (stdout, stderr) = log.child_stdio()?;
        let mut child = spawn(&invocation, &self.workdir, stdout, stderr)
            .map_err(|source| ForwardError::SpawnFailed { binary: name, source })?;
        slot.footprint = Some(Footprint { port, binary });

        let pid = child.id();
        match pid {
            Some(pid) => log.line(&format!("Process started with PID: {pid}")),
            None => log.line("Process started"),
        }

        tokio::time::sleep(self.timings.startup_grace).await;
        if let Some(status) = exited(&mut child) {
            return Err(self.exited_immediately(status, &log));
        }

        tokio::time::sleep(self.timings.probe_delay).await;
        if self.timings.prober.is_listening(port).await {
            tracing::info!("{name} listening on port {port} for tunnel {tunnel_id}");
        } else if let Some(status) = exited(&mut child) {
            return Err(self.exited_immediately(status, &log));
        } else {
            tracing::warn!(
                "Port {port} not listening after start, but process is running. PID: {}",
                display_pid(pid)
            );
        }

        tracing::info!(
            "Started {name} for tunnel {tunnel_id}: port {port}, PID {}",
            display_pid(pid)
        );
        slot.entry = Some(RegistryEntry {
            child,
            pid,
            log,
            config,
        });
        Ok(())
    }

    async fn stop_locked(&self, tunnel_id: &str, slot: &mut Slot<E::Config>) {
        let name = self.engine.name();

        if let Some(mut entry) = slot.entry.take() {
            self.terminate(tunnel_id, &mut entry.child).await;
            drop(entry.log);
            tracing::info!(
                "Stopped {name} for tunnel {tunnel_id} (PID {})",
                display_pid(entry.pid)
            );
        }

        if let Some(footprint) = slot.footprint.take() {
            sweep::sweep_port(footprint.port, &footprint.binary, self.timings.sweep_wait).await;
        }
    }

    async fn check_locked(&self, tunnel_id: &str, slot: &mut Slot<E::Config>) -> bool {
        let name = self.engine.name();
        let Some(entry) = slot.entry.as_mut() else {
            return false;
        };

        let reason = match entry.child.try_wait() {
            Ok(None) => return true,
            Ok(Some(status)) => status.to_string(),
            Err(e) => format!("status unknown: {e}"),
        };
        let config = entry.config.clone();

        tracing::warn!("{name} process for tunnel {tunnel_id} died ({reason}), attempting restart");
        match self.start_locked(tunnel_id, slot, config).await {
            Ok(()) => {
                tracing::info!("Restarted {name} for tunnel {tunnel_id}");
                true
            }
            Err(e) => {
                tracing::error!("Failed to restart {name} for tunnel {tunnel_id}: {e}");
                false
            }
        }
    }

    /// SIGTERM the process group, wait up to `stop_timeout`, then SIGKILL.
    async fn terminate(&self, tunnel_id: &str, child: &mut Child) {
        let name = self.engine.name();

        match child.try_wait() {
            // Reaped already; its PID may belong to someone else by now.
            Ok(Some(status)) => {
                tracing::debug!("{name} for tunnel {tunnel_id} had already exited ({status})");
                return;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("{name} for tunnel {tunnel_id}: try_wait failed: {e}"),
        }

        if let Some(pid) = child.id() {
            sweep::terminate_group(pid);
        }

        match tokio::time::timeout(self.timings.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("{name} for tunnel {tunnel_id} exited ({status})");
            }
            Ok(Err(e)) => {
                tracing::warn!("waiting for {name} of tunnel {tunnel_id} failed: {e}");
                self.force_kill(tunnel_id, child).await;
            }
            Err(_) => {
                tracing::warn!(
                    "{name} for tunnel {tunnel_id} ignored SIGTERM for {:?}, killing",
                    self.timings.stop_timeout
                );
                self.force_kill(tunnel_id, child).await;
            }
        }
    }

    /// SIGKILL the process group and reap the child, waiting at most
    /// `stop_timeout` more if the first attempt fails.
    async fn force_kill(&self, tunnel_id: &str, child: &mut Child) {
        let name = self.engine.name();

        if let Some(pid) = child.id() {
            sweep::kill_group(pid);
        }
        let Err(e) = child.kill().await else {
            return;
        };
        tracing::warn!("killing {name} for tunnel {tunnel_id} failed: {e}, retrying");

        if let Err(e) = child.start_kill() {
            tracing::debug!("second SIGKILL for {name} of tunnel {tunnel_id} failed: {e}");
        }
        match tokio::time::timeout(self.timings.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("{name} for tunnel {tunnel_id} exited ({status})"),
            Ok(Err(e)) => tracing::error!("cannot reap {name} for tunnel {tunnel_id}: {e}"),
            Err(_) => tracing::error!(
                "{name} for tunnel {tunnel_id} still running after SIGKILL"
            ),
        }
    }

    fn exited_immediately(&self, status: ExitStatus, log: &LogSink) -> ForwardError {
        let log_tail = log.tail(DIAGNOSTIC_TAIL_CHARS);
        tracing::error!(
            "{} exited during startup ({status}): {}",
            self.engine.name(),
            log_tail.trim()
        );
        ForwardError::ProcessExitedImmediately {
            binary: self.engine.name(),
            status: status.to_string(),
            log_tail,
        }
    }
}

impl<E: ForwardEngine + std::fmt::Debug> std::fmt::Debug for Supervisor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("engine", &self.engine)
            .field("workdir", &self.workdir)
            .field("tunnels", &self.slots.lock().len())
            .finish()
    }
}

fn spawn(
    invocation: &Invocation,
    workdir: &Path,
    stdout: Stdio,
    stderr: Stdio,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(invocation.program());
    cmd.args(&invocation.args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);

    // Session leader, so stop can signal the whole group and terminal
    // signals aimed at the supervisor do not reach the forwarder.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Exit status if the child is gone. A failed status query counts as alive.
fn exited(child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(status) => status,
        Err(e) => {
            tracing::debug!("try_wait failed: {e}");
            None
        }
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
}
