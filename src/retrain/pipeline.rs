// Retrain Pipeline
//
// Runs the retrain stages in order after every `threshold`-th accepted
// feedback, with per-stage timeouts and status tracking.

use crate::config::{RetrainConfig, RetrainMode};
use crate::error::PlantwiseError;
use crate::storage::FeedbackStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{sleep, timeout};

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Stage execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stage execution failed: {0}")]
    ExecutionError(String),

    #[error(transparent)]
    Plantwise(#[from] PlantwiseError),
}

/// Report generated after a stage completes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Records or rules consumed by the stage
    pub items_processed: usize,

    /// Rules added, model samples, etc.
    pub changes_made: usize,

    #[serde(with = "serde_duration_millis")]
    pub duration: Duration,

    /// Human-readable summary
    pub detail: Option<String>,
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// One step of the retrain pipeline
#[async_trait]
pub trait RetrainStage: Send + Sync {
    /// Stage name (for logging and tracking)
    fn name(&self) -> &str;

    /// Run the stage to completion
    async fn run(&self) -> Result<StageReport, StageError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
}

impl StageStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed | StageStatus::TimedOut)
    }
}

/// Execution record of one stage within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRun {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub report: Option<StageReport>,
    pub error: Option<String>,
}

impl StageRun {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            report: None,
            error: None,
        }
    }
}

/// Why a pipeline run started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RetrainTrigger {
    /// Accepted-feedback count reached a multiple of the threshold
    FeedbackThreshold { accepted: u64 },
    /// Explicit request
    Manual,
    /// Resumption of a failed run
    Retry { run_id: String },
}

/// Execution record of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub trigger: RetrainTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRun>,
}

impl PipelineRun {
    fn new(trigger: RetrainTrigger, stage_names: &[String]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trigger,
            started_at: Utc::now(),
            completed_at: None,
            stages: stage_names.iter().map(|n| StageRun::pending(n)).collect(),
        }
    }

    /// Index of the stage that stopped the run
    pub fn failed_stage(&self) -> Option<usize> {
        self.stages.iter().position(|s| s.status.is_failure())
    }

    pub fn succeeded(&self) -> bool {
        self.completed_at.is_some()
            && self
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Succeeded)
    }

    /// The failure as an error value, if the run failed
    pub fn error(&self) -> Option<PlantwiseError> {
        let stage = &self.stages[self.failed_stage()?];
        Some(PlantwiseError::RetrainStage {
            stage: stage.name.clone(),
            message: stage
                .error
                .clone()
                .unwrap_or_else(|| format!("{:?}", stage.status)),
        })
    }
}

/// Result of notifying the orchestrator about accepted feedback
#[derive(Debug, Clone)]
pub enum RetrainOutcome {
    /// Threshold not reached
    NotDue { accepted: u64 },
    /// Pipeline ran to completion or failure (blocking mode)
    Completed(Box<PipelineRun>),
    /// Pipeline started on a background task
    Scheduled { accepted: u64 },
    /// A background run was active; one more run will follow it
    Coalesced { accepted: u64 },
}

struct Inner {
    stages: Vec<Arc<dyn RetrainStage>>,
    feedback: Arc<dyn FeedbackStore>,
    threshold: u64,
    mode: RetrainMode,
    stage_timeout: Duration,
    history_limit: usize,
    running: AtomicBool,
    rerun: AtomicBool,
    run_lock: tokio::sync::Mutex<()>,
    history: Mutex<VecDeque<PipelineRun>>,
}

/// Counts accepted feedback and drives the retrain stages
#[derive(Clone)]
pub struct RetrainOrchestrator {
    inner: Arc<Inner>,
}

impl RetrainOrchestrator {
    pub fn new(config: &RetrainConfig, feedback: Arc<dyn FeedbackStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                stages: Vec::new(),
                feedback,
                threshold: config.threshold.max(1),
                mode: config.mode,
                stage_timeout: config.stage_timeout,
                history_limit: config.history_limit.max(1),
                running: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                run_lock: tokio::sync::Mutex::new(()),
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Append a stage; stages run in registration order
    pub fn with_stage(mut self, stage: Arc<dyn RetrainStage>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.stages.push(stage),
            None => tracing::warn!(
                "Cannot register stage {} on a shared orchestrator",
                stage.name()
            ),
        }
        self
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.inner
            .stages
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn mode(&self) -> RetrainMode {
        self.inner.mode
    }

    /// True while a background run is active
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Called after an accepted feedback record was stored
    pub async fn on_feedback_accepted(&self) -> Result<RetrainOutcome, PlantwiseError> {
        let accepted = self.inner.feedback.count(Some(true)).await?;
        tracing::debug!(
            "Accepted feedback count: {} (threshold {})",
            accepted,
            self.inner.threshold
        );

        if accepted == 0 || accepted % self.inner.threshold != 0 {
            return Ok(RetrainOutcome::NotDue { accepted });
        }

        tracing::info!("Retrain triggered at {} accepted feedback records", accepted);
        let trigger = RetrainTrigger::FeedbackThreshold { accepted };

        match self.inner.mode {
            RetrainMode::Blocking => {
                let run = self.inner.execute(trigger, None).await;
                Ok(RetrainOutcome::Completed(Box::new(run)))
            }
            RetrainMode::Background => {
                if self.inner.running.swap(true, Ordering::SeqCst) {
                    self.inner.rerun.store(true, Ordering::SeqCst);
                    tracing::info!("Retrain already running, queued one more run");
                    return Ok(RetrainOutcome::Coalesced { accepted });
                }
                self.spawn_background(trigger);
                Ok(RetrainOutcome::Scheduled { accepted })
            }
        }
    }

    fn spawn_background(&self, trigger: RetrainTrigger) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut trigger = trigger;
            loop {
                inner.execute(trigger, None).await;
                trigger = RetrainTrigger::Manual;

                if inner.rerun.swap(false, Ordering::SeqCst) {
                    continue;
                }
                inner.running.store(false, Ordering::SeqCst);
                // A trigger may have set the flag between the swap and the store
                if inner.rerun.swap(false, Ordering::SeqCst)
                    && !inner.running.swap(true, Ordering::SeqCst)
                {
                    continue;
                }
                break;
            }
        });
    }

    /// Run the whole pipeline now and wait for it
    pub async fn run_now(&self) -> PipelineRun {
        self.inner.execute(RetrainTrigger::Manual, None).await
    }

    /// Resume the most recent run from its failed stage
    pub async fn retry_failed(&self) -> Result<PipelineRun, PlantwiseError> {
        let previous = self.last_run().ok_or_else(|| {
            PlantwiseError::InvalidOperation("No retrain run to retry".to_string())
        })?;
        let failed = previous.failed_stage().ok_or_else(|| {
            PlantwiseError::InvalidOperation(format!(
                "Last retrain run {} did not fail",
                previous.id
            ))
        })?;

        tracing::info!(
            "Retrying run {} from stage {}",
            previous.id,
            previous.stages[failed].name
        );
        let trigger = RetrainTrigger::Retry {
            run_id: previous.id.clone(),
        };
        Ok(self.inner.execute(trigger, Some((&previous, failed))).await)
    }

    /// Wait until no background run is active
    pub async fn wait_idle(&self) {
        while self.is_running() {
            sleep(Duration::from_millis(10)).await;
        }
        // Blocking runs hold the run lock
        let _guard = self.inner.run_lock.lock().await;
    }

    /// Most recent run, if any
    pub fn last_run(&self) -> Option<PipelineRun> {
        self.inner.history().back().cloned()
    }

    /// Recorded runs, oldest first
    pub fn history(&self) -> Vec<PipelineRun> {
        self.inner.history().iter().cloned().collect()
    }
}

impl Inner {
    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<PipelineRun>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Execute stages, optionally resuming `resume.0` from stage `resume.1`
    async fn execute(
        &self,
        trigger: RetrainTrigger,
        resume: Option<(&PipelineRun, usize)>,
    ) -> PipelineRun {
        let _guard = self.run_lock.lock().await;

        let names: Vec<String> = self.stages.iter().map(|s| s.name().to_string()).collect();
        let mut run = PipelineRun::new(trigger, &names);
        let start = match resume {
            Some((previous, from)) => {
                for (i, stage) in previous.stages.iter().take(from).enumerate() {
                    if let Some(slot) = run.stages.get_mut(i) {
                        *slot = stage.clone();
                    }
                }
                from
            }
            None => 0,
        };

        tracing::info!("Starting retrain run {} ({} stages)", run.id, names.len());

        for index in start..self.stages.len() {
            let stage = &self.stages[index];
            let started = Instant::now();
            run.stages[index].status = StageStatus::Running;
            run.stages[index].started_at = Some(Utc::now());

            let result = timeout(self.stage_timeout, stage.run()).await;
            let record = &mut run.stages[index];
            record.completed_at = Some(Utc::now());

            match result {
                Ok(Ok(mut report)) => {
                    if report.duration.is_zero() {
                        report.duration = started.elapsed();
                    }
                    tracing::info!(
                        "Stage {} completed: {} processed, {} changes in {:?}",
                        stage.name(),
                        report.items_processed,
                        report.changes_made,
                        report.duration
                    );
                    record.status = StageStatus::Succeeded;
                    record.report = Some(report);
                }
                Ok(Err(e)) => {
                    tracing::error!("Stage {} failed: {}", stage.name(), e);
                    record.status = StageStatus::Failed;
                    record.error = Some(e.to_string());
                }
                Err(_) => {
                    tracing::error!(
                        "Stage {} timed out after {:?}",
                        stage.name(),
                        self.stage_timeout
                    );
                    record.status = StageStatus::TimedOut;
                    record.error = Some(StageError::Timeout(self.stage_timeout).to_string());
                }
            }

            if record.status.is_failure() {
                for later in run.stages.iter_mut().skip(index + 1) {
                    later.status = StageStatus::Skipped;
                }
                break;
            }
        }

        run.completed_at = Some(Utc::now());
        if run.succeeded() {
            tracing::info!("Retrain run {} succeeded", run.id);
        } else {
            tracing::warn!("Retrain run {} stopped early", run.id);
        }

        let mut history = self.history();
        history.push_back(run.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{Attribute, CondSet, NewFeedback};
    use std::sync::atomic::AtomicUsize;

    struct TestStage {
        name: String,
        fail_times: AtomicUsize,
        delay: Duration,
        runs: Arc<AtomicUsize>,
    }

    impl TestStage {
        fn ok(name: &str, runs: Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_times: AtomicUsize::new(0),
                delay: Duration::ZERO,
                runs,
            })
        }

        fn failing_once(name: &str, runs: Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_times: AtomicUsize::new(1),
                delay: Duration::ZERO,
                runs,
            })
        }

        fn slow(name: &str, delay: Duration, runs: Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_times: AtomicUsize::new(0),
                delay,
                runs,
            })
        }
    }

    #[async_trait]
    impl RetrainStage for TestStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self) -> Result<StageReport, StageError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.store(remaining - 1, Ordering::SeqCst);
                return Err(StageError::ExecutionError("Test failure".to_string()));
            }
            Ok(StageReport {
                items_processed: 10,
                changes_made: 1,
                duration: Duration::from_millis(5),
                detail: None,
            })
        }
    }

    fn config(mode: RetrainMode) -> RetrainConfig {
        RetrainConfig {
            threshold: 3,
            mode,
            stage_timeout: Duration::from_secs(5),
            history_limit: 4,
        }
    }

    async fn accept(store: &MemoryStore, n: usize) {
        for _ in 0..n {
            store
                .append(NewFeedback {
                    conditions: CondSet::new().with(Attribute::HasPet, "No").unwrap(),
                    suggested_item: "Fern".to_string(),
                    accepted: true,
                })
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_stage_report_serialization() {
        let report = StageReport {
            items_processed: 100,
            changes_made: 10,
            duration: Duration::from_millis(500),
            detail: Some("ok".to_string()),
        };

        let json = serde_json::to_string(&report).unwrap();
        let deserialized: StageReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, deserialized);
    }

    #[tokio::test]
    async fn test_triggers_on_threshold_multiples() {
        let store = Arc::new(MemoryStore::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let orchestrator = RetrainOrchestrator::new(&config(RetrainMode::Blocking), store.clone())
            .with_stage(TestStage::ok("model", runs.clone()));

        accept(&store, 2).await;
        assert!(matches!(
            orchestrator.on_feedback_accepted().await.unwrap(),
            RetrainOutcome::NotDue { accepted: 2 }
        ));

        accept(&store, 1).await;
        match orchestrator.on_feedback_accepted().await.unwrap() {
            RetrainOutcome::Completed(run) => assert!(run.succeeded()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_count_never_triggers() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = RetrainOrchestrator::new(&config(RetrainMode::Blocking), store);
        assert!(matches!(
            orchestrator.on_feedback_accepted().await.unwrap(),
            RetrainOutcome::NotDue { accepted: 0 }
        ));
    }

    #[tokio::test]
    async fn test_failure_skips_later_stages_and_retry_resumes() {
        let store = Arc::new(MemoryStore::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let orchestrator = RetrainOrchestrator::new(&config(RetrainMode::Blocking), store)
            .with_stage(TestStage::ok("model", first.clone()))
            .with_stage(TestStage::failing_once("mining", second.clone()))
            .with_stage(TestStage::ok("kb_merge", third.clone()));

        let run = orchestrator.run_now().await;
        let statuses: Vec<_> = run.stages.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StageStatus::Succeeded, StageStatus::Failed, StageStatus::Skipped]
        );
        assert!(matches!(
            run.error(),
            Some(PlantwiseError::RetrainStage { ref stage, .. }) if stage == "mining"
        ));

        let retried = orchestrator.retry_failed().await.unwrap();
        assert!(retried.succeeded());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(third.load(Ordering::SeqCst), 1);

        // Nothing left to retry
        assert!(orchestrator.retry_failed().await.is_err());
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let store = Arc::new(MemoryStore::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut cfg = config(RetrainMode::Blocking);
        cfg.stage_timeout = Duration::from_millis(20);
        let orchestrator = RetrainOrchestrator::new(&cfg, store)
            .with_stage(TestStage::slow("model", Duration::from_secs(5), runs.clone()))
            .with_stage(TestStage::ok("mining", runs.clone()));

        let run = orchestrator.run_now().await;
        assert_eq!(run.stages[0].status, StageStatus::TimedOut);
        assert_eq!(run.stages[1].status, StageStatus::Skipped);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_background_runs_coalesce() {
        let store = Arc::new(MemoryStore::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let orchestrator = RetrainOrchestrator::new(&config(RetrainMode::Background), store.clone())
            .with_stage(TestStage::slow("model", Duration::from_millis(50), runs.clone()));

        accept(&store, 3).await;
        assert!(matches!(
            orchestrator.on_feedback_accepted().await.unwrap(),
            RetrainOutcome::Scheduled { accepted: 3 }
        ));
        accept(&store, 3).await;
        assert!(matches!(
            orchestrator.on_feedback_accepted().await.unwrap(),
            RetrainOutcome::Coalesced { accepted: 6 }
        ));
        accept(&store, 3).await;
        assert!(matches!(
            orchestrator.on_feedback_accepted().await.unwrap(),
            RetrainOutcome::Coalesced { accepted: 9 }
        ));

        orchestrator.wait_idle().await;
        // Initial run plus exactly one coalesced rerun
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.history().len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let orchestrator = RetrainOrchestrator::new(&config(RetrainMode::Blocking), store)
            .with_stage(TestStage::ok("model", runs));

        for _ in 0..6 {
            orchestrator.run_now().await;
        }
        assert_eq!(orchestrator.history().len(), 4);
    }
}
