//! Checkin and restore sessions
//!
//! One [`Orchestrator::run`] is one agent invocation:
//!
//! 1. optional random wait, so a fleet does not check in all at once
//! 2. quiet exit when the agent is not provisioned yet
//! 3. quiet exit when the go/no-go program says no
//! 4. the `burrow-ping` lock, held until the run ends
//! 5. one coordinator call, then one session per storage unit, in turn
//!
//! Each session starts a transfer daemon, waits for it to settle, and opens
//! a reverse tunnel to the storage unit, which drives the transfer and
//! closes the tunnel when done.

pub mod plan;
pub mod rsyncd;
pub mod runner;
pub mod tunnel;

pub use plan::{PlannedSource, RestoreTarget, SessionPlan};
pub use runner::ProcessSessionRunner;

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;

use burrow_core::{ResolvedConfig, RuntimeLock};
use burrow_protocol::{PingRequest, SourceAssignment};

use crate::error::SessionError;
use crate::gonogo;
use crate::traits::{Coordinator, SessionRunner};

/// Lock held for the whole of a checkin or restore run
pub const PING_LOCK_NAME: &str = "burrow-ping";

/// What the coordinator is asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Checkin,
    /// Expose the restore directory to one storage unit
    Restore { storage: Option<String> },
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct PingOptions {
    pub mode: Mode,
    /// Upper bound of the random wait before starting
    pub wait: Option<Duration>,
    /// Go/no-go argv; empty means always go
    pub gonogo: Vec<String>,
    /// Ask the storage unit for verbose transfers (checkin only)
    pub verbose: bool,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Checkin,
            wait: None,
            gonogo: Vec::new(),
            verbose: false,
        }
    }
}

/// Why a run ended without contacting any storage unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Identity material or the coordinator URL is missing
    Uninitialized,
    /// The go/no-go program declined
    GoNoGoVeto,
    /// The coordinator has nothing for this machine right now
    NothingScheduled,
}

/// Result of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed { sessions: usize },
}

/// Sleep a random duration up to `max`
pub async fn jitter(max: Option<Duration>) {
    let Some(max) = max.filter(|max| !max.is_zero()) else {
        return;
    };
    let wait = Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max.as_secs_f64()));
    tracing::debug!("Waiting {:.3} seconds", wait.as_secs_f64());
    tokio::time::sleep(wait).await;
}

/// Drives checkin and restore runs
pub struct Orchestrator<C, R> {
    config: ResolvedConfig,
    coordinator: C,
    runner: R,
}

impl<C, R> Orchestrator<C, R>
where
    C: Coordinator,
    R: SessionRunner,
{
    pub fn new(config: ResolvedConfig, coordinator: C, runner: R) -> Self {
        Self {
            config,
            coordinator,
            runner,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Identity for coordinator requests, if the agent is fully provisioned
    fn identity(&self) -> Option<PingRequest> {
        let key = self.config.ssh_key.as_ref()?;
        if !key.private_key_file.is_file() {
            return None;
        }
        self.config.api_url.as_ref()?;
        let uuid = self.config.machine_uuid.as_ref()?;
        let secret = self.config.machine_secret.as_ref()?;
        Some(PingRequest::new(uuid.clone(), secret.clone()))
    }

    /// Run once
    pub async fn run(&self, options: &PingOptions) -> Result<RunOutcome, SessionError> {
        jitter(options.wait).await;

        let Some(request) = self.identity() else {
            tracing::debug!("Agent is not provisioned yet, nothing to do");
            return Ok(RunOutcome::Skipped(SkipReason::Uninitialized));
        };

        if !gonogo::allows(&options.gonogo).await {
            return Ok(RunOutcome::Skipped(SkipReason::GoNoGoVeto));
        }

        let _lock = RuntimeLock::acquire(PING_LOCK_NAME, self.config.lock_dir.as_deref())?;

        let plans = match &options.mode {
            Mode::Checkin => {
                let reply = self.coordinator.checkin(&request).await?;
                plan::checkin_plans(
                    &self.config,
                    &reply.machine.scheduled_sources,
                    options.verbose,
                )
            }
            Mode::Restore { storage } => {
                tracing::info!("Entering restore mode.");
                let reply = self.coordinator.restore(&request).await?;
                self.log_holdings(&reply.machine.sources);
                let session =
                    plan::restore_plan(&self.config, &reply.machine.sources, storage.as_deref())?;
                self.log_restore_guidance(&session);
                vec![session]
            }
        };

        if plans.is_empty() {
            tracing::debug!("No sources scheduled for this machine");
            return Ok(RunOutcome::Skipped(SkipReason::NothingScheduled));
        }

        for plan in &plans {
            self.runner.run(plan).await?;
        }

        Ok(RunOutcome::Completed {
            sessions: plans.len(),
        })
    }

    fn log_holdings(&self, holdings: &BTreeMap<String, SourceAssignment>) {
        let groups = plan::group_by_storage(&self.config, holdings);
        if groups.is_empty() {
            return;
        }
        tracing::info!("This machine's sources are on the following storage units:");
        for (storage, (_, sources)) in &groups {
            tracing::info!("    {}", storage);
            for source in sources {
                tracing::info!("        {}", source);
            }
        }
    }

    fn log_restore_guidance(&self, plan: &SessionPlan) {
        let config = &self.config;
        let uuid = config.machine_uuid.as_deref().unwrap_or_default();

        tracing::info!("Machine UUID: {}", uuid);
        if let Some(environment) = &config.environment_name {
            tracing::info!("Machine environment: {}", environment);
        }
        if let Some(service) = &config.service_name {
            tracing::info!("Machine service: {}", service);
        }
        tracing::info!("Machine unit: {}", config.unit_name());
        tracing::info!("Storage unit: {}", plan.storage.name);

        if let Some(restore) = &plan.restore {
            tracing::info!("Local destination path: {}", restore.path.display());
            tracing::info!("Sample restore usage from storage unit:");
            tracing::info!("    cd /var/lib/burrow-storage/machines/{}/", uuid);
            tracing::info!(
                "    RSYNC_PASSWORD={} rsync -avzP --numeric-ids ${{P?}}/ rsync://{}@127.0.0.1:{}/{}/",
                restore.credentials.password,
                restore.credentials.username,
                plan.port,
                restore.module
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use async_trait::async_trait;
    use burrow_core::config::SshKeyPair;
    use burrow_core::{LockError, SourceConfig};
    use burrow_protocol::{
        CheckinMachine, CheckinReply, RestoreMachine, RestoreReply, SessionAction,
        SourceAssignment, StorageUnit, UpdateConfigRequest,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn storage(name: &str) -> StorageUnit {
        StorageUnit {
            name: name.to_string(),
            ssh_ping_host: format!("{}.example", name),
            ssh_ping_host_keys: vec!["ssh-ed25519 AAAAhost".to_string()],
            ssh_ping_port: 22,
            ssh_ping_user: "burrow".to_string(),
        }
    }

    fn assigned(names: &[(&str, &str)]) -> BTreeMap<String, SourceAssignment> {
        names
            .iter()
            .map(|(source, unit)| {
                (
                    source.to_string(),
                    SourceAssignment {
                        storage: Some(storage(unit)),
                    },
                )
            })
            .collect()
    }

    #[derive(Default)]
    struct FakeCoordinator {
        scheduled: BTreeMap<String, SourceAssignment>,
        holdings: BTreeMap<String, SourceAssignment>,
        fail: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeCoordinator {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn failure() -> ApiError {
            ApiError::Decode {
                url: "http://coord.test/".to_string(),
                message: "boom".to_string(),
            }
        }
    }

    #[async_trait]
    impl Coordinator for FakeCoordinator {
        async fn checkin(&self, _request: &PingRequest) -> Result<CheckinReply, ApiError> {
            self.calls.lock().unwrap().push("checkin");
            if self.fail {
                return Err(Self::failure());
            }
            Ok(CheckinReply {
                machine: CheckinMachine {
                    scheduled_sources: self.scheduled.clone(),
                },
            })
        }

        async fn restore(&self, _request: &PingRequest) -> Result<RestoreReply, ApiError> {
            self.calls.lock().unwrap().push("restore");
            if self.fail {
                return Err(Self::failure());
            }
            Ok(RestoreReply {
                machine: RestoreMachine {
                    sources: self.holdings.clone(),
                },
            })
        }

        async fn update_config(&self, _request: &UpdateConfigRequest) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push("update_config");
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        plans: Mutex<Vec<SessionPlan>>,
    }

    impl RecordingRunner {
        fn plans(&self) -> Vec<SessionPlan> {
            self.plans.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionRunner for RecordingRunner {
        async fn run(&self, plan: &SessionPlan) -> Result<(), SessionError> {
            self.plans.lock().unwrap().push(plan.clone());
            Ok(())
        }
    }

    /// A provisioned config whose state lives in a temp dir
    fn provisioned(dir: &TempDir) -> ResolvedConfig {
        let private_key_file = dir.path().join("ssh_key");
        std::fs::write(&private_key_file, "PRIVATE").unwrap();

        let mut config = ResolvedConfig::default();
        config.var_dir = dir.path().to_path_buf();
        config.lock_dir = Some(dir.path().to_path_buf());
        config.api_url = Some("http://coord.test/".to_string());
        config.machine_uuid = Some("uuid-1".to_string());
        config.machine_secret = Some("secret-1".to_string());
        config.ssh_key = Some(SshKeyPair {
            public_key_file: dir.path().join("ssh_key.pub"),
            private_key_file,
            public_key: "ssh-ed25519 AAAA burrow-agent".to_string(),
        });

        let mut src_a = SourceConfig::new("/srv/a");
        src_a.username = Some("user-a".to_string());
        src_a.password = Some("pass-a".to_string());
        config.sources.insert("srcA".to_string(), src_a);
        config.sources.insert("srcB".to_string(), SourceConfig::new("/srv/b"));
        config
    }

    fn restore_options(storage: Option<&str>) -> PingOptions {
        PingOptions {
            mode: Mode::Restore {
                storage: storage.map(str::to_string),
            },
            ..PingOptions::default()
        }
    }

    #[tokio::test]
    async fn test_checkin_one_session_per_storage() {
        let dir = TempDir::new().unwrap();
        let coordinator = FakeCoordinator {
            scheduled: assigned(&[("srcA", "unit1")]),
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(provisioned(&dir), coordinator, RecordingRunner::default());

        let outcome = orchestrator.run(&PingOptions::default()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { sessions: 1 });

        let plans = orchestrator.runner.plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].storage.name, "unit1");
        assert_eq!(plans[0].action, SessionAction::Checkin);
        let request = plans[0].request();
        assert_eq!(request.sources["srcA"].username, "user-a");
        assert_eq!(request.sources["srcA"].password, "pass-a");
        assert_eq!(orchestrator.coordinator.calls(), vec!["checkin"]);
    }

    #[tokio::test]
    async fn test_unknown_source_means_no_sessions() {
        let dir = TempDir::new().unwrap();
        let coordinator = FakeCoordinator {
            scheduled: assigned(&[("elsewhere", "unit1")]),
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(provisioned(&dir), coordinator, RecordingRunner::default());

        let outcome = orchestrator.run(&PingOptions::default()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NothingScheduled));
        assert!(orchestrator.runner.plans().is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_agent_exits_quietly() {
        let dir = TempDir::new().unwrap();
        let mut config = provisioned(&dir);
        config.machine_secret = None;
        let orchestrator =
            Orchestrator::new(config, FakeCoordinator::default(), RecordingRunner::default());

        let outcome = orchestrator.run(&PingOptions::default()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::Uninitialized));
        assert!(orchestrator.coordinator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_private_key_file_exits_quietly() {
        let dir = TempDir::new().unwrap();
        let config = provisioned(&dir);
        std::fs::remove_file(dir.path().join("ssh_key")).unwrap();
        let orchestrator =
            Orchestrator::new(config, FakeCoordinator::default(), RecordingRunner::default());

        let outcome = orchestrator.run(&PingOptions::default()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::Uninitialized));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_gonogo_veto_skips_run() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            provisioned(&dir),
            FakeCoordinator::default(),
            RecordingRunner::default(),
        );
        let options = PingOptions {
            gonogo: vec!["false".to_string()],
            ..PingOptions::default()
        };

        let outcome = orchestrator.run(&options).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::GoNoGoVeto));
        assert!(orchestrator.coordinator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_is_fatal() {
        let dir = TempDir::new().unwrap();
        let _held = RuntimeLock::acquire(PING_LOCK_NAME, Some(dir.path())).unwrap();
        let orchestrator = Orchestrator::new(
            provisioned(&dir),
            FakeCoordinator::default(),
            RecordingRunner::default(),
        );

        let result = orchestrator.run(&PingOptions::default()).await;
        assert!(matches!(
            result,
            Err(SessionError::Lock(LockError::Held { .. }))
        ));
        assert!(orchestrator.coordinator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_api_failure_propagates_and_releases_lock() {
        let dir = TempDir::new().unwrap();
        let coordinator = FakeCoordinator {
            fail: true,
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(provisioned(&dir), coordinator, RecordingRunner::default());

        let result = orchestrator.run(&PingOptions::default()).await;
        assert!(matches!(result, Err(SessionError::Api(_))));
        assert!(orchestrator.runner.plans().is_empty());

        RuntimeLock::acquire(PING_LOCK_NAME, Some(dir.path())).unwrap();
    }

    #[tokio::test]
    async fn test_restore_auto_selects_single_storage() {
        let dir = TempDir::new().unwrap();
        let coordinator = FakeCoordinator {
            holdings: assigned(&[("srcA", "unit1"), ("srcB", "unit1")]),
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(provisioned(&dir), coordinator, RecordingRunner::default());

        let outcome = orchestrator.run(&restore_options(None)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { sessions: 1 });

        let plans = orchestrator.runner.plans();
        assert_eq!(plans[0].action, SessionAction::Restore);
        assert!(plans[0].verbose);
        let restore = plans[0].restore.as_ref().unwrap();
        assert_eq!(restore.module, "burrow-restore");
        assert_ne!(restore.credentials.username, "user-a");
        assert_eq!(orchestrator.coordinator.calls(), vec!["restore"]);
    }

    #[tokio::test]
    async fn test_restore_needs_choice_between_storages() {
        let dir = TempDir::new().unwrap();
        let coordinator = FakeCoordinator {
            holdings: assigned(&[("srcA", "unit1"), ("srcB", "unit2")]),
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(provisioned(&dir), coordinator, RecordingRunner::default());

        let result = orchestrator.run(&restore_options(None)).await;
        assert!(matches!(result, Err(SessionError::AmbiguousStorage(_))));
        assert!(orchestrator.runner.plans().is_empty());

        let outcome = orchestrator.run(&restore_options(Some("unit2"))).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { sessions: 1 });
        assert_eq!(orchestrator.runner.plans()[0].storage.name, "unit2");
    }

    #[tokio::test]
    async fn test_restore_unknown_storage_is_fatal() {
        let dir = TempDir::new().unwrap();
        let coordinator = FakeCoordinator {
            holdings: assigned(&[("srcA", "unit1")]),
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(provisioned(&dir), coordinator, RecordingRunner::default());

        let result = orchestrator.run(&restore_options(Some("unit9"))).await;
        assert!(matches!(result, Err(SessionError::UnknownStorage { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_bounded() {
        let start = tokio::time::Instant::now();
        jitter(Some(Duration::from_secs(10))).await;
        assert!(start.elapsed() <= Duration::from_secs(10));

        let start = tokio::time::Instant::now();
        jitter(None).await;
        jitter(Some(Duration::ZERO)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
