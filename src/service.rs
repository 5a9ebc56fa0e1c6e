//! Request surface
//!
//! [`CaptureService`] is what an HTTP or WebSocket layer talks to. It joins
//! the configuration stores, the supervisor and the hubs, and persists
//! configuration changes through a [`ConfigStore`]. Every operation reports
//! failures as values; nothing here panics on bad input.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::capture::SystemProcessTable;
use crate::config::{
    ConfigDocument, ConfigStore, OutputMode, OutputState, Platform, ProfileConfig, ProfileStore,
    SaveOutcome, SourceConfig, SourceRegistry,
};
use crate::error::{Error, Result};
use crate::hub::{HubRegistry, HubStats, Subscription};
use crate::pipeline::{
    EncoderLauncher, ProcessStatus, ProcessSupervisor, StartReport, SupervisorConfig,
};

/// Requested and resolved active profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProfile {
    /// As requested: `auto` or a profile name
    pub selection: String,
    /// Profile actually used, if any
    pub resolved: Option<String>,
    pub args: String,
}

/// Result of changing the active profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChange {
    pub active: String,
    pub saved: SaveOutcome,
}

/// Capture pipeline service
pub struct CaptureService {
    supervisor: ProcessSupervisor,
    sources: Arc<SourceRegistry>,
    output: RwLock<OutputState>,
    store: Arc<dyn ConfigStore>,
}

impl CaptureService {
    pub fn new(
        supervisor: ProcessSupervisor,
        sources: Arc<SourceRegistry>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            supervisor,
            sources,
            output: RwLock::new(OutputState::default()),
            store,
        }
    }

    /// Build the whole service from a loaded configuration document
    ///
    /// Orphans are looked up in the host's process table.
    pub fn from_document(
        config: SupervisorConfig,
        platform: Platform,
        document: ConfigDocument,
        launcher: Arc<dyn EncoderLauncher>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let profiles = Arc::new(ProfileStore::with_profiles(
            platform,
            document.profiles,
            document.active_profile,
        ));
        let sources = Arc::new(SourceRegistry::with_sources(document.sources));
        let hubs = Arc::new(HubRegistry::new(config.hub_capacity));
        let supervisor = ProcessSupervisor::new(config, platform, profiles, launcher, hubs)
            .with_process_table(Arc::new(SystemProcessTable::new()));

        tracing::info!(
            platform = %platform,
            sources = sources.len(),
            "Capture service configured"
        );

        Self::new(supervisor, sources, store)
    }

    /// Set the initial output flags
    pub fn with_output_state(self, output: OutputState) -> Self {
        *self.output.write() = output;
        self
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    // Pipelines

    /// Start one source, or every enabled source when `source_id` is `None`
    ///
    /// With `manual_start == false` (an automatic restart) sources stopped by
    /// the user are skipped. A manual start clears their manual-stop flag.
    pub async fn start_pipeline(
        &self,
        source_id: Option<&str>,
        restart: bool,
        manual_start: bool,
    ) -> Vec<StartReport> {
        let output = self.output_state();

        let sources = match source_id {
            Some(id) => match self.sources.get(id) {
                Some(source) => vec![source],
                None => {
                    return vec![StartReport::from_result(id, Err(Error::source_not_found(id)))]
                }
            },
            None => self.sources.enabled(),
        };

        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            if manual_start {
                self.supervisor.set_manual_stop(&source.id, false);
            } else if self.supervisor.is_manual_stop(&source.id) {
                tracing::debug!(source = %source.id, "Skipping start, stopped manually");
                reports.push(StartReport::skipped(&source.id));
                continue;
            }

            let result = self.supervisor.start(&source, &output, restart, false).await;
            reports.push(StartReport::from_result(&source.id, result));
        }
        reports
    }

    /// Stop one source or all of them; returns the ids that were running
    pub async fn stop_pipeline(&self, source_id: Option<&str>, manual: bool) -> Vec<String> {
        self.supervisor.stop(source_id, manual).await
    }

    /// Stop everything without marking sources as manually stopped
    pub async fn shutdown(&self) -> Vec<String> {
        let stopped = self.supervisor.stop(None, false).await;
        tracing::info!(stopped = stopped.len(), "Capture service shut down");
        stopped
    }

    pub fn status(&self, source_id: &str) -> Option<ProcessStatus> {
        self.supervisor.status(source_id)
    }

    pub fn statuses(&self) -> Vec<ProcessStatus> {
        self.supervisor.statuses()
    }

    // Output

    pub fn output_state(&self) -> OutputState {
        self.output.read().clone()
    }

    /// Replace the output flags, returning the mode they select
    ///
    /// Running encoders keep their mode until restarted.
    pub fn set_output_state(&self, output: OutputState) -> OutputMode {
        let mode = output.mode();
        *self.output.write() = output;
        tracing::info!(mode = %mode, "Output state updated");
        mode
    }

    // Profiles

    pub fn profiles(&self) -> Vec<ProfileConfig> {
        self.supervisor.profiles().get_all()
    }

    pub fn replace_profiles(&self, profiles: Vec<ProfileConfig>) {
        self.supervisor.profiles().replace_all(profiles);
    }

    pub fn active_profile(&self) -> ActiveProfile {
        let profiles = self.supervisor.profiles();
        ActiveProfile {
            selection: profiles.selection(),
            resolved: profiles.active_name(),
            args: profiles.get_active_args(),
        }
    }

    /// Select the active profile and persist the selection
    pub fn set_active_profile(&self, name: &str) -> Result<ProfileChange> {
        let profiles = self.supervisor.profiles();
        let active = profiles.set_active(name)?;
        let saved = self.store.save_active_profile(&profiles.selection());
        Ok(ProfileChange { active, saved })
    }

    // Sources

    pub fn sources(&self) -> Vec<SourceConfig> {
        self.sources.get_all()
    }

    pub fn source(&self, source_id: &str) -> Option<SourceConfig> {
        self.sources.get(source_id)
    }

    /// Add or replace a source and persist the list
    pub fn upsert_source(&self, source: SourceConfig) -> SaveOutcome {
        let id = source.id.clone();
        let replaced = self.sources.upsert(source);
        tracing::info!(source = %id, replaced = replaced, "Source saved");
        self.store.save_sources(&self.sources.get_all())
    }

    /// Replace the source list and persist it
    pub fn replace_sources(&self, sources: Vec<SourceConfig>) -> SaveOutcome {
        self.sources.replace_all(sources);
        self.store.save_sources(&self.sources.get_all())
    }

    // Live streams

    pub async fn hub_stats(&self, source_id: &str) -> Option<HubStats> {
        self.supervisor.hubs().stats(source_id).await
    }

    pub async fn all_hub_stats(&self) -> Vec<HubStats> {
        self.supervisor.hubs().all_stats().await
    }

    /// Subscribe to a configured source's live stream
    ///
    /// The subscription survives until the encoder restarts; reconnect after
    /// [`Error::HubClosed`].
    pub async fn subscribe(&self, source_id: &str) -> Result<Subscription> {
        let source = self
            .sources
            .get(source_id)
            .ok_or_else(|| Error::source_not_found(source_id))?;
        Ok(self.supervisor.hubs().subscribe(&source.id).await)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::{MemoryConfigStore, SourceKind};
    use crate::pipeline::{EncoderChild, EncoderCommand, EncoderOutput};

    /// Child that runs until killed
    struct IdleChild {
        pid: u32,
        kill: Option<oneshot::Sender<()>>,
        killed: Option<oneshot::Receiver<()>>,
    }

    #[async_trait]
    impl EncoderChild for IdleChild {
        fn id(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn take_stdout(&mut self) -> Option<EncoderOutput> {
            None
        }

        fn start_kill(&mut self) -> io::Result<()> {
            if let Some(kill) = self.kill.take() {
                let _ = kill.send(());
            }
            Ok(())
        }

        async fn wait(&mut self) -> io::Result<Option<i32>> {
            match self.killed.take() {
                Some(rx) => {
                    let _ = rx.await;
                    Ok(None)
                }
                None => Ok(None),
            }
        }
    }

    #[derive(Default)]
    struct IdleLauncher {
        next_pid: AtomicU32,
    }

    impl EncoderLauncher for IdleLauncher {
        fn launch(&self, _source_id: &str, _command: &EncoderCommand) -> io::Result<Box<dyn EncoderChild>> {
            let (tx, rx) = oneshot::channel();
            Ok(Box::new(IdleChild {
                pid: 100 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                kill: Some(tx),
                killed: Some(rx),
            }))
        }
    }

    fn service(sources: Vec<SourceConfig>) -> (CaptureService, Arc<MemoryConfigStore>) {
        let store = Arc::new(MemoryConfigStore::new());
        let document = ConfigDocument {
            sources,
            ..Default::default()
        };
        let service = CaptureService::from_document(
            SupervisorConfig::default()
                .capture_capacity(4)
                .kill_orphans(false)
                .lock_timeout(std::time::Duration::from_millis(50)),
            Platform::Linux,
            document,
            Arc::new(IdleLauncher::default()),
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        )
        .with_output_state(OutputState {
            flv: true,
            ..Default::default()
        });
        (service, store)
    }

    fn cam(id: &str) -> SourceConfig {
        SourceConfig::new(id, SourceKind::Rtsp, format!("rtsp://10.0.0.1/{}", id))
    }

    #[tokio::test]
    async fn test_start_all_enabled() {
        let (service, _) = service(vec![cam("a"), cam("b").disabled(), cam("c")]);

        let reports = service.start_pipeline(None, false, true).await;
        let ids: Vec<&str> = reports.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(reports.iter().all(|r| r.is_ok()));

        let stopped = service.stop_pipeline(None, false).await;
        assert_eq!(stopped, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_targeted_start_errors() {
        let (service, _) = service(vec![cam("a"), cam("b").disabled()]);

        let reports = service.start_pipeline(Some("missing"), false, true).await;
        assert_eq!(reports[0].error.as_ref().unwrap().code, "NOT_FOUND");

        let reports = service.start_pipeline(Some("B"), false, true).await;
        assert_eq!(reports[0].error.as_ref().unwrap().code, "SOURCE_DISABLED");
    }

    #[tokio::test]
    async fn test_auto_restart_skips_manual_stop() {
        let (service, _) = service(vec![cam("a"), cam("b")]);
        service.start_pipeline(None, false, true).await;
        service.stop_pipeline(Some("a"), true).await;
        service.stop_pipeline(Some("b"), false).await;

        let reports = service.start_pipeline(None, false, false).await;
        assert!(reports[0].skipped);
        assert!(!reports[1].skipped);
        assert!(reports[1].outcome.as_ref().unwrap().started);
        assert!(!service.supervisor().is_running("a"));

        let reports = service.start_pipeline(Some("a"), false, true).await;
        assert!(reports[0].outcome.as_ref().unwrap().started);
        assert!(!service.supervisor().is_manual_stop("a"));
    }

    #[tokio::test]
    async fn test_output_state_mode() {
        let (service, _) = service(Vec::new());

        let mode = service.set_output_state(OutputState {
            hls: true,
            mjpeg: true,
            mjpeg_passthrough: true,
            ..Default::default()
        });
        assert_eq!(mode, OutputMode::MjpegPassthrough);
        assert!(service.output_state().mjpeg_passthrough);
    }

    #[tokio::test]
    async fn test_active_profile_persisted() {
        let (service, store) = service(Vec::new());
        assert_eq!(service.active_profile().selection, "auto");
        assert_eq!(
            service.active_profile().resolved.as_deref(),
            Some("linux-x264")
        );

        let change = service.set_active_profile("QUALITY").unwrap();
        assert_eq!(change.active, "quality");
        assert!(change.saved.ok);
        assert_eq!(store.document().active_profile, "quality");

        let err = service.set_active_profile("nope").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(service.active_profile().resolved.as_deref(), Some("quality"));
    }

    #[tokio::test]
    async fn test_source_mutations_persisted() {
        let (service, store) = service(vec![cam("a")]);

        let saved = service.upsert_source(cam("A").with_name("Front"));
        assert!(saved.ok);
        assert_eq!(service.sources().len(), 1);
        assert_eq!(store.document().sources[0].name, "Front");

        service.replace_sources(vec![cam("x"), cam("y")]);
        assert_eq!(store.document().sources.len(), 2);
        assert!(service.source("a").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_requires_known_source() {
        let (service, _) = service(vec![cam("a")]);

        assert!(matches!(
            service.subscribe("zzz").await,
            Err(Error::NotFound { .. })
        ));

        let sub = service.subscribe("A").await.unwrap();
        assert_eq!(sub.source_id(), "a");
        assert_eq!(service.hub_stats("a").await.unwrap().subscribers_active, 1);
        assert_eq!(service.all_hub_stats().await.len(), 1);
    }
}
