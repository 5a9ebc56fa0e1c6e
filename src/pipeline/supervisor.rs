//! Encoder process supervision
//!
//! One encoder per source id. The supervisor owns every [`ProcessState`];
//! the only other writer is the exit watcher task spawned with each process,
//! and it only touches the state of the generation it was spawned for.
//!
//! Stop removes the tracked process from the map before killing it, so a
//! start racing with the stop never sees a handle that is about to die.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, watch};

use crate::capture::{CaptureLock, OrphanReconciler, ProcessTable};
use crate::config::{OutputMode, OutputState, Platform, ProfileStore, SourceConfig};
use crate::error::{Error, ErrorResponse, Result};
use crate::hub::HubRegistry;

use super::command::{build_command, EncoderCommand, OutputTarget};
use super::config::SupervisorConfig;
use super::launcher::{EncoderChild, EncoderLauncher};
use super::pump::{pump_output, OutputDecoder};
use super::state::{LifecycleState, ProcessState, ProcessStatus, TrackedProcess};

type StateMap = Mutex<HashMap<String, ProcessState>>;

fn state_key(source_id: &str) -> String {
    source_id.to_ascii_lowercase()
}

/// Result of a successful start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub source_id: String,
    /// False when the source was already running and nothing was spawned
    pub started: bool,
    pub pid: Option<u32>,
    pub mode: OutputMode,
    pub command: String,
}

impl StartOutcome {
    fn new(source_id: &str, started: bool, pid: Option<u32>, command: &EncoderCommand) -> Self {
        Self {
            source_id: source_id.to_string(),
            started,
            pid,
            mode: command.mode,
            command: command.display(),
        }
    }
}

/// Per-source entry of a batch start
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub source_id: String,
    pub outcome: Option<StartOutcome>,
    pub error: Option<ErrorResponse>,
    /// Not attempted (manual stop in effect)
    pub skipped: bool,
}

impl StartReport {
    pub fn from_result(source_id: &str, result: Result<StartOutcome>) -> Self {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => (None, Some(ErrorResponse::from(e))),
        };
        Self {
            source_id: source_id.to_string(),
            outcome,
            error,
            skipped: false,
        }
    }

    pub fn skipped(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            outcome: None,
            error: None,
            skipped: true,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Starts, tracks and stops encoder processes
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    platform: Platform,
    profiles: Arc<ProfileStore>,
    launcher: Arc<dyn EncoderLauncher>,
    reconciler: Option<OrphanReconciler>,
    hubs: Arc<HubRegistry>,
    capture: CaptureLock,
    states: Arc<StateMap>,
    /// Serializes start requests per source
    start_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        platform: Platform,
        profiles: Arc<ProfileStore>,
        launcher: Arc<dyn EncoderLauncher>,
        hubs: Arc<HubRegistry>,
    ) -> Self {
        let capture = CaptureLock::new(config.capture_capacity);
        Self {
            config,
            platform,
            profiles,
            launcher,
            reconciler: None,
            hubs,
            capture,
            states: Arc::new(Mutex::new(HashMap::new())),
            start_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile orphans against `table` before each start
    ///
    /// Has no effect when `kill_orphans` is disabled in the config.
    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        let executable = self.platform.executable_name(&self.config.encoder_path);
        self.reconciler = Some(OrphanReconciler::new(table, executable));
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn capture_lock(&self) -> &CaptureLock {
        &self.capture
    }

    pub fn hubs(&self) -> &Arc<HubRegistry> {
        &self.hubs
    }

    /// Start the encoder for `source`
    ///
    /// Without `restart` or `force`, a running source is left alone and the
    /// outcome reports `started: false`.
    pub async fn start(
        &self,
        source: &SourceConfig,
        output: &OutputState,
        restart: bool,
        force: bool,
    ) -> Result<StartOutcome> {
        if !source.enabled {
            return Err(Error::SourceDisabled(source.id.clone()));
        }

        let key = state_key(&source.id);
        let (mut cancel, epoch) = {
            let mut states = self.states.lock();
            let state = states
                .entry(key.clone())
                .or_insert_with(|| ProcessState::new(&source.id));
            let rx = state.stop_signal.subscribe();
            let epoch = *rx.borrow();
            (rx, epoch)
        };

        let gate = self.start_gate(&key);
        let _gate = tokio::select! {
            guard = gate.lock_owned() => guard,
            _ = cancel.changed() => return Err(self.cancelled(source)),
        };

        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(&key) {
                if state.is_running() && !restart && !force {
                    state.manual_stop = false;
                    if let Some(tracked) = state.tracked.as_ref() {
                        tracing::debug!(source = %source.id, pid = ?tracked.pid, "Encoder already running");
                        return Ok(StartOutcome::new(&source.id, false, tracked.pid, &tracked.command));
                    }
                }
            }
        }

        if restart || force {
            self.stop_key(&key, false, false).await;
        }

        let prior = {
            let mut states = self.states.lock();
            let state = states
                .entry(key.clone())
                .or_insert_with(|| ProcessState::new(&source.id));
            std::mem::replace(&mut state.lifecycle, LifecycleState::Starting)
        };

        let result = self.launch(source, output, &key, &mut cancel, epoch).await;

        if let Err(ref e) = result {
            {
                let mut states = self.states.lock();
                if let Some(state) = states.get_mut(&key) {
                    if state.lifecycle == LifecycleState::Starting {
                        state.lifecycle = prior;
                    }
                }
            }
            tracing::warn!(source = %source.id, error = %e, code = e.code(), "Encoder start failed");
        }

        result
    }

    /// Start every enabled source in `sources`
    ///
    /// Each source succeeds or fails on its own.
    pub async fn start_all(
        &self,
        sources: &[SourceConfig],
        output: &OutputState,
        restart: bool,
        force: bool,
    ) -> Vec<StartReport> {
        let mut reports = Vec::new();
        for source in sources.iter().filter(|s| s.enabled) {
            let result = self.start(source, output, restart, force).await;
            reports.push(StartReport::from_result(&source.id, result));
        }
        reports
    }

    /// Stop one source, or every tracked source when `source_id` is `None`
    ///
    /// `manual` marks the stop as user-requested so an auto-restart loop
    /// leaves the source alone. Returns the ids that were actually running.
    pub async fn stop(&self, source_id: Option<&str>, manual: bool) -> Vec<String> {
        let keys: Vec<String> = match source_id {
            Some(id) => {
                if manual {
                    self.ensure_state(id);
                }
                vec![state_key(id)]
            }
            None => {
                let mut keys: Vec<String> = self.states.lock().keys().cloned().collect();
                keys.sort();
                keys
            }
        };

        let mut stopped = Vec::new();
        for key in keys {
            if let Some(id) = self.stop_key(&key, manual, true).await {
                stopped.push(id);
            }
        }
        stopped
    }

    pub fn set_manual_stop(&self, source_id: &str, manual_stop: bool) {
        self.ensure_state(source_id);
        if let Some(state) = self.states.lock().get_mut(&state_key(source_id)) {
            state.manual_stop = manual_stop;
        }
    }

    pub fn is_manual_stop(&self, source_id: &str) -> bool {
        self.states
            .lock()
            .get(&state_key(source_id))
            .map(|s| s.manual_stop)
            .unwrap_or(false)
    }

    pub fn is_running(&self, source_id: &str) -> bool {
        self.states
            .lock()
            .get(&state_key(source_id))
            .map(|s| s.is_running())
            .unwrap_or(false)
    }

    pub fn status(&self, source_id: &str) -> Option<ProcessStatus> {
        self.states
            .lock()
            .get(&state_key(source_id))
            .map(|s| s.status())
    }

    /// Status of every source seen so far, ordered by id
    pub fn statuses(&self) -> Vec<ProcessStatus> {
        let mut statuses: Vec<ProcessStatus> =
            self.states.lock().values().map(|s| s.status()).collect();
        statuses.sort_by(|a, b| state_key(&a.source_id).cmp(&state_key(&b.source_id)));
        statuses
    }

    fn ensure_state(&self, source_id: &str) {
        self.states
            .lock()
            .entry(state_key(source_id))
            .or_insert_with(|| ProcessState::new(source_id));
    }

    fn start_gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.start_gates.lock().entry(key.to_string()).or_default())
    }

    fn cancelled(&self, source: &SourceConfig) -> Error {
        tracing::info!(source = %source.id, "Pending start cancelled by stop");
        Error::StartCancelled {
            source_id: source.id.clone(),
        }
    }

    async fn launch(
        &self,
        source: &SourceConfig,
        output: &OutputState,
        key: &str,
        cancel: &mut watch::Receiver<u64>,
        epoch: u64,
    ) -> Result<StartOutcome> {
        let profile_args = self.profiles.get_active_args();
        let command = build_command(&self.config, self.platform, source, &profile_args, output);

        if self.config.kill_orphans {
            if let Some(reconciler) = self.reconciler.clone() {
                let source_id = source.id.clone();
                let signature = command.signature.clone();
                let scan = tokio::task::spawn_blocking(move || {
                    reconciler.reconcile(&source_id, &signature, None);
                });
                if let Err(e) = scan.await {
                    tracing::warn!(source = %source.id, error = %e, "Orphan scan task failed");
                }
            }
        }

        let permit = tokio::select! {
            permit = self.capture.acquire(&source.id, self.config.lock_timeout) => permit?,
            _ = cancel.changed() => return Err(self.cancelled(source)),
        };

        if let OutputTarget::Hls { ref dir, .. } = command.output {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                permit.release();
                return Err(Error::SpawnFailed {
                    source_id: source.id.clone(),
                    reason: format!("cannot create {}: {}", dir.display(), e),
                });
            }
        }

        let mut child = match self.launcher.launch(&source.id, &command) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    source = %source.id,
                    program = %command.program,
                    error = %e,
                    "Failed to spawn encoder"
                );
                permit.release();
                return Err(Error::SpawnFailed {
                    source_id: source.id.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let pid = child.id();

        // A failed spawn must not disconnect current subscribers
        let hub = if command.mode.is_piped() {
            Some(self.hubs.reset(&source.id).await)
        } else {
            None
        };

        let pump = match (hub, child.take_stdout(), OutputDecoder::for_mode(command.mode)) {
            (Some(hub), Some(stdout), Some(decoder)) => Some(tokio::spawn(pump_output(
                source.id.clone(),
                stdout,
                decoder,
                hub,
                self.config.read_chunk_size,
            ))),
            _ => None,
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let mut states = self.states.lock();
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| ProcessState::new(&source.id));

        if *state.stop_signal.borrow() != epoch {
            drop(states);
            if let Some(pump) = pump {
                pump.abort();
            }
            abandon(child);
            permit.release();
            return Err(self.cancelled(source));
        }

        state.generation += 1;
        let generation = state.generation;
        tokio::spawn(watch_exit(
            Arc::downgrade(&self.states),
            key.to_string(),
            generation,
            child,
            kill_rx,
            exit_tx,
        ));

        let outcome = StartOutcome::new(&source.id, true, pid, &command);
        state.tracked = Some(TrackedProcess {
            pid,
            generation,
            command,
            kill_tx: Some(kill_tx),
            exit_rx: Some(exit_rx),
            pump,
        });
        state.permit = Some(permit);
        state.lifecycle = LifecycleState::Running;
        state.started_at = Some(Utc::now());
        state.manual_stop = false;
        state.source_id = source.id.clone();
        drop(states);

        tracing::info!(
            source = %source.id,
            pid = ?pid,
            mode = %outcome.mode,
            "Encoder started"
        );

        Ok(outcome)
    }

    /// Remove the tracked process, then kill it and release its permit
    async fn stop_key(&self, key: &str, manual: bool, cancel_pending: bool) -> Option<String> {
        let (source_id, mut tracked, permit) = {
            let mut states = self.states.lock();
            let state = states.get_mut(key)?;
            if cancel_pending {
                state.stop_signal.send_modify(|epoch| *epoch += 1);
            }
            if manual {
                state.manual_stop = true;
            }
            let tracked = state.tracked.take()?;
            state.lifecycle = LifecycleState::Stopping;
            (state.source_id.clone(), tracked, state.permit.take())
        };

        tracing::info!(source = %source_id, pid = ?tracked.pid, manual = manual, "Stopping encoder");

        if let Some(kill) = tracked.kill_tx.take() {
            let _ = kill.send(());
        }

        let code = match tracked.exit_rx.take() {
            Some(exit) => match tokio::time::timeout(self.config.stop_timeout, exit).await {
                Ok(Ok(code)) => code,
                Ok(Err(_)) => None,
                Err(_) => {
                    tracing::warn!(
                        source = %source_id,
                        pid = ?tracked.pid,
                        "Encoder did not exit within stop timeout"
                    );
                    None
                }
            },
            None => None,
        };

        if let Some(pump) = tracked.pump.take() {
            pump.abort();
        }
        if let Some(permit) = permit {
            permit.release();
        }
        if tracked.command.mode.is_piped() {
            self.hubs.remove(&source_id).await;
        }

        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(key) {
                state.record_exit(code);
                if state.tracked.is_none() && state.generation == tracked.generation {
                    state.lifecycle = LifecycleState::Stopped;
                }
            }
        }

        tracing::info!(source = %source_id, exit_code = ?code, "Encoder stopped");
        Some(source_id)
    }
}

/// Kill a child nobody will track and reap it in the background
fn abandon(mut child: Box<dyn EncoderChild>) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Kill of abandoned encoder failed");
    }
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}

/// Own the child until it exits
///
/// Exits requested through `kill_rx` are reported to the stopper via
/// `exit_tx`. Any other exit is a crash and is recorded here.
async fn watch_exit(
    states: Weak<StateMap>,
    key: String,
    generation: u64,
    mut child: Box<dyn EncoderChild>,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<Option<i32>>,
) {
    let (status, requested) = tokio::select! {
        status = child.wait() => (status, false),
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(source = %key, error = %e, "Kill failed, encoder may have exited");
            }
            (child.wait().await, true)
        }
    };

    let code = match status {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(source = %key, error = %e, "Failed to reap encoder");
            None
        }
    };

    if !requested {
        if let Some(states) = states.upgrade() {
            record_crash(&states, &key, generation, code);
        }
    }

    let _ = exit_tx.send(code);
}

fn record_crash(states: &StateMap, key: &str, generation: u64, code: Option<i32>) {
    let mut states = states.lock();
    let state = match states.get_mut(key) {
        Some(state) => state,
        None => return,
    };

    let current = state
        .tracked
        .as_ref()
        .map(|t| t.generation == generation)
        .unwrap_or(false);
    if !current {
        // A stop already took this process
        return;
    }

    state.tracked = None;
    if let Some(permit) = state.permit.take() {
        permit.release();
    }
    state.record_exit(code);
    state.lifecycle = LifecycleState::Crashed;

    tracing::warn!(source = %state.source_id, exit_code = ?code, "Encoder exited unexpectedly");
}
