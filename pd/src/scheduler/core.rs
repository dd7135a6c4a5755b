//! Scheduler implementation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Platform, PlatformError, TaskId};
use crate::queue::{QueueError, QueueManager, ShutdownReport, Task, TaskStatus, operation_fn};
use crate::ratelimit::{RateLimitDecision, RateLimitTracker};

use super::config::SchedulerConfig;
use super::error::SchedulerError;
use super::interval::AdaptiveInterval;
use super::jobs::{Job, JobHandler, TaskKind};

/// What happened to one platform during a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlatformOutcome {
    Completed { task_id: TaskId },
    Failed { task_id: TaskId, error: PlatformError },
    Cancelled { task_id: TaskId },
    /// No local rate-limit capacity; nothing was submitted
    Throttled { retry_after: Duration },
}

/// Result of one scheduling cycle for one job kind
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub kind: TaskKind,
    pub outcomes: Vec<(Platform, PlatformOutcome)>,
    pub next_interval: Duration,
}

impl CycleReport {
    /// True when every platform was disabled and nothing was attempted
    pub fn is_skipped(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PlatformOutcome::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PlatformOutcome::Failed { .. }))
            .count()
    }

    pub fn throttled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PlatformOutcome::Throttled { .. }))
            .count()
    }
}

/// Interval state of one loop for status display
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub kind: TaskKind,
    pub baseline: Duration,
    pub current: Duration,
    pub running: bool,
}

/// Configuration and the loop intervals derived from it.
///
/// Both live under one lock so a config update and the interval rebase it
/// implies are seen together.
struct Schedule {
    config: SchedulerConfig,
    intervals: HashMap<TaskKind, AdaptiveInterval>,
}

impl Schedule {
    fn new(config: SchedulerConfig) -> Self {
        let intervals = TaskKind::ALL
            .into_iter()
            .map(|kind| (kind, AdaptiveInterval::new(config.interval(kind))))
            .collect();
        Self { config, intervals }
    }

    fn current_interval(&self, kind: TaskKind) -> Duration {
        self.intervals
            .get(&kind)
            .map_or_else(|| self.config.interval(kind), AdaptiveInterval::current)
    }

    fn rebase(&mut self, kind: TaskKind) {
        let baseline = self.config.interval(kind);
        self.intervals
            .entry(kind)
            .or_insert_with(|| AdaptiveInterval::new(baseline))
            .rebase(baseline);
    }
}

/// State shared by the scheduler handle and its loops
struct SchedulerState {
    schedule: RwLock<Schedule>,
    queue: Arc<QueueManager>,
    tracker: Arc<RateLimitTracker>,
    jobs: Arc<dyn JobHandler>,
}

impl SchedulerState {
    fn schedule(&self) -> RwLockReadGuard<'_, Schedule> {
        self.schedule.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule_mut(&self) -> RwLockWriteGuard<'_, Schedule> {
        self.schedule.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_interval(&self, kind: TaskKind) -> Duration {
        self.schedule().current_interval(kind)
    }

    fn relax(&self, kind: TaskKind) {
        let mut schedule = self.schedule_mut();
        let factor = schedule.config.relax_factor;
        if let Some(interval) = schedule.intervals.get_mut(&kind)
            && interval.is_stretched()
        {
            interval.relax(factor);
            debug!(%kind, current = ?interval.current(), "SchedulerState::relax: interval relaxed");
        }
    }

    fn stretch(&self, kinds: impl IntoIterator<Item = TaskKind>, retry_after: Duration) {
        let mut schedule = self.schedule_mut();
        let cap = schedule.config.max_interval();
        for kind in kinds {
            if let Some(interval) = schedule.intervals.get_mut(&kind) {
                interval.stretch(retry_after, cap);
                info!(%kind, next = ?interval.current(), "Interval stretched");
            }
        }
    }

    fn handle_platform_error(&self, platform: Platform, err: &PlatformError) -> bool {
        debug!(%platform, error = %err, "SchedulerState::handle_platform_error: called");
        match err {
            PlatformError::RateLimited { class, retry_after } => {
                warn!(%platform, %class, ?retry_after, "Rate limited, stretching intervals");
                self.tracker.block(platform, *class, *retry_after);
                self.stretch(
                    TaskKind::ALL.into_iter().filter(|k| k.operation_class() == *class),
                    *retry_after,
                );
                true
            }
            PlatformError::Unauthorized(msg) => {
                error!(%platform, %msg, "Authentication failed, disabling platform");
                self.schedule_mut().config.platforms.get_mut(platform).enabled = false;
                true
            }
            PlatformError::NotFound(msg) => {
                warn!(%platform, %msg, "Resource not found");
                true
            }
            PlatformError::Unclassified(msg) => {
                error!(%platform, %msg, "Unhandled platform error");
                false
            }
        }
    }

    async fn run_cycle(&self, kind: TaskKind) -> Result<CycleReport, SchedulerError> {
        debug!(%kind, "SchedulerState::run_cycle: called");
        let (platforms, priority) = {
            let schedule = self.schedule();
            let config = &schedule.config;
            let platforms: Vec<(Platform, u32)> = config
                .platforms
                .enabled()
                .into_iter()
                .map(|p| (p, config.platforms.get(p).retry_limit))
                .collect();
            (platforms, config.priority(kind))
        };

        let mut report = CycleReport {
            kind,
            outcomes: Vec::new(),
            next_interval: Duration::ZERO,
        };

        if platforms.is_empty() {
            info!(%kind, "All platforms disabled, skipping cycle");
            report.next_interval = self.current_interval(kind);
            return Ok(report);
        }

        let class = kind.operation_class();
        let mut rate_limited = false;
        let mut submitted: Vec<(Platform, TaskId)> = Vec::new();
        let mut enqueue_error = None;

        for (platform, retry_limit) in platforms {
            // Do not take capacity for a task the queue will refuse
            if self.queue.is_shutting_down() {
                enqueue_error = Some(QueueError::ShuttingDown);
                break;
            }

            match self.tracker.check_and_reserve_for(platform, class, priority) {
                RateLimitDecision::Allowed { .. } => {}
                RateLimitDecision::Denied {
                    retry_after,
                    reserved: true,
                } => {
                    // Only the high-priority reserve is left: this kind backs off alone
                    info!(%platform, %kind, %priority, ?retry_after, "Capacity reserved for high priority work");
                    self.stretch([kind], retry_after);
                    report.outcomes.push((platform, PlatformOutcome::Throttled { retry_after }));
                    rate_limited = true;
                    continue;
                }
                RateLimitDecision::Denied {
                    retry_after,
                    reserved: false,
                } => {
                    self.handle_platform_error(platform, &PlatformError::RateLimited { class, retry_after });
                    report.outcomes.push((platform, PlatformOutcome::Throttled { retry_after }));
                    rate_limited = true;
                    continue;
                }
            }

            let job = Job { kind, platform };
            let jobs = Arc::clone(&self.jobs);
            let task = Task::new(
                priority,
                operation_fn(move |ctx| {
                    let jobs = Arc::clone(&jobs);
                    async move { jobs.run(job, ctx).await }
                }),
            )
            .with_max_retries(retry_limit)
            .with_label(job.to_string());

            match self.queue.enqueue(task) {
                Ok(task_id) => {
                    debug!(%job, %task_id, "SchedulerState::run_cycle: submitted");
                    submitted.push((platform, task_id));
                }
                Err(e) => {
                    warn!(%job, error = %e, "Queue refused task");
                    enqueue_error = Some(e);
                    break;
                }
            }
        }

        let results = join_all(submitted.iter().map(|(_, id)| self.queue.wait_for(id))).await;

        for ((platform, task_id), result) in submitted.into_iter().zip(results) {
            let outcome = match result {
                Ok(snapshot) if snapshot.status == TaskStatus::Completed => {
                    self.tracker.record_success(platform, class);
                    PlatformOutcome::Completed { task_id }
                }
                Ok(snapshot) if snapshot.status == TaskStatus::Failed => {
                    let err = snapshot
                        .error
                        .unwrap_or_else(|| PlatformError::unclassified("task failed without an error"));
                    self.tracker.record_failure(platform, class, &err);
                    rate_limited |= err.is_rate_limit();
                    self.handle_platform_error(platform, &err);
                    PlatformOutcome::Failed { task_id, error: err }
                }
                Ok(_) => PlatformOutcome::Cancelled { task_id },
                Err(e) => {
                    warn!(%platform, %task_id, error = %e, "Lost track of submitted task");
                    PlatformOutcome::Cancelled { task_id }
                }
            };
            report.outcomes.push((platform, outcome));
        }

        if let Some(e) = enqueue_error {
            return Err(e.into());
        }

        if report.completed() > 0 && !rate_limited {
            self.relax(kind);
        }

        report.next_interval = self.current_interval(kind);
        info!(
            %kind,
            completed = report.completed(),
            failed = report.failed(),
            throttled = report.throttled(),
            next_interval = ?report.next_interval,
            "Cycle finished"
        );
        Ok(report)
    }
}

/// One recurring loop: sleep for the current interval, then run a cycle
async fn run_loop(state: Arc<SchedulerState>, kind: TaskKind, cancel: CancellationToken) {
    info!(%kind, "Scheduler loop started");

    loop {
        let interval = state.current_interval(kind);
        debug!(%kind, ?interval, "run_loop: sleeping");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = state.run_cycle(kind) => match result {
                Ok(_) => {}
                Err(SchedulerError::Queue(QueueError::ShuttingDown)) => {
                    info!(%kind, "Queue shutting down, loop exiting");
                    break;
                }
                Err(e) => error!(%kind, error = %e, "Scheduling cycle failed"),
            }
        }
    }

    info!(%kind, "Scheduler loop stopped");
}

/// Drives the recurring content, reply and metrics jobs.
///
/// Each job kind has its own loop with an adaptive interval. A cycle fans out
/// one task per enabled platform onto the shared [`QueueManager`], waits for
/// them, and reacts to their failures.
pub struct TaskScheduler {
    state: Arc<SchedulerState>,
    loops: Mutex<HashMap<TaskKind, JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
}

impl TaskScheduler {
    /// Create a scheduler with its own queue and rate limit tracker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SchedulerConfig, jobs: Arc<dyn JobHandler>) -> Result<Self, SchedulerError> {
        config.validate()?;
        let queue = Arc::new(QueueManager::spawn(config.queue.clone()));
        let tracker = Arc::new(RateLimitTracker::new(
            Platform::ALL.map(|p| (p, config.platforms.get(p).rate_limit())),
        ));
        Self::with_parts(config, jobs, queue, tracker)
    }

    /// Create a scheduler on top of an existing queue and tracker
    pub fn with_parts(
        config: SchedulerConfig,
        jobs: Arc<dyn JobHandler>,
        queue: Arc<QueueManager>,
        tracker: Arc<RateLimitTracker>,
    ) -> Result<Self, SchedulerError> {
        debug!(?config, "TaskScheduler::with_parts: called");
        config.validate()?;

        Ok(Self {
            state: Arc::new(SchedulerState {
                schedule: RwLock::new(Schedule::new(config)),
                queue,
                tracker,
                jobs,
            }),
            loops: Mutex::new(HashMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    fn loops(&self) -> MutexGuard<'_, HashMap<TaskKind, JoinHandle<()>>> {
        self.loops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the three recurring loops
    pub fn start(&self) {
        let mut loops = self.loops();
        if !loops.is_empty() {
            warn!("Scheduler already started");
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = cancel.clone();

        for kind in TaskKind::ALL {
            let handle = tokio::spawn(run_loop(Arc::clone(&self.state), kind, cancel.child_token()));
            loops.insert(kind, handle);
        }
        info!("Scheduler started with {} loops", loops.len());
    }

    /// Stop every loop and wait until all of them have finished.
    ///
    /// Tasks already handed to the queue keep running; use [`shutdown`] to
    /// drain the queue as well.
    ///
    /// [`shutdown`]: TaskScheduler::shutdown
    pub async fn stop(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();

        let loops: Vec<(TaskKind, JoinHandle<()>)> = self.loops().drain().collect();
        info!("Stopping {} scheduler loops", loops.len());

        for (kind, handle) in loops {
            handle.abort();
            match handle.await {
                Ok(()) => debug!(%kind, "TaskScheduler::stop: loop finished"),
                Err(e) if e.is_cancelled() => debug!(%kind, "TaskScheduler::stop: loop aborted"),
                Err(e) => error!(%kind, error = %e, "Scheduler loop panicked"),
            }
        }
        info!("Scheduler stopped");
    }

    /// Stop the loops, then drain the queue within `timeout`
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.stop().await;
        self.state.queue.shutdown(timeout).await
    }

    pub fn is_running(&self) -> bool {
        !self.loops().is_empty()
    }

    /// Abort handles of the running loops
    pub fn loop_handles(&self) -> Vec<(TaskKind, AbortHandle)> {
        let mut handles: Vec<_> = self
            .loops()
            .iter()
            .map(|(kind, handle)| (*kind, handle.abort_handle()))
            .collect();
        handles.sort_by_key(|(kind, _)| *kind);
        handles
    }

    /// Run one cycle of `kind` right away, outside the loops
    pub async fn run_cycle(&self, kind: TaskKind) -> Result<CycleReport, SchedulerError> {
        self.state.run_cycle(kind).await
    }

    /// React to a classified platform failure.
    ///
    /// Returns true when the error was recognized and handled; unknown errors
    /// return false and never disable a platform.
    pub fn handle_platform_error(&self, platform: Platform, err: &PlatformError) -> bool {
        self.state.handle_platform_error(platform, err)
    }

    /// Replace the whole configuration.
    ///
    /// Intervals, tracker limits and queue concurrency are switched over while
    /// the schedule lock is held, so loops never see the new config paired
    /// with old intervals or limits. Any stretch is discarded.
    pub fn update_config(&self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        debug!(?config, "TaskScheduler::update_config: called");
        config.validate()?;

        let mut schedule = self.state.schedule_mut();
        for platform in Platform::ALL {
            self.state.tracker.configure(platform, config.platforms.get(platform).rate_limit());
        }
        self.state.queue.reconfigure(config.queue.clone());
        schedule.config = config;
        for kind in TaskKind::ALL {
            schedule.rebase(kind);
        }
        drop(schedule);

        info!("Scheduler configuration updated");
        Ok(())
    }

    /// Change one loop's baseline interval. Takes effect from its next sleep.
    pub fn update_interval(&self, kind: TaskKind, interval: Duration) -> Result<(), SchedulerError> {
        debug!(%kind, ?interval, "TaskScheduler::update_interval: called");
        if interval.as_secs() == 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "{} interval must be at least 1s",
                kind
            )));
        }
        let interval = Duration::from_secs(interval.as_secs());

        let mut schedule = self.state.schedule_mut();
        schedule.config.set_interval(kind, interval);
        schedule.rebase(kind);
        drop(schedule);

        info!(%kind, ?interval, "Interval updated");
        Ok(())
    }

    /// Turn a platform on or off, e.g. after re-authenticating
    pub fn set_platform_enabled(&self, platform: Platform, enabled: bool) {
        info!(%platform, enabled, "Platform enablement changed");
        self.state.schedule_mut().config.platforms.get_mut(platform).enabled = enabled;
    }

    pub fn config(&self) -> SchedulerConfig {
        self.state.schedule().config.clone()
    }

    pub fn current_interval(&self, kind: TaskKind) -> Duration {
        self.state.current_interval(kind)
    }

    pub fn loop_status(&self) -> Vec<LoopStatus> {
        let running: Vec<TaskKind> = self.loops().keys().copied().collect();
        let schedule = self.state.schedule();
        TaskKind::ALL
            .into_iter()
            .filter_map(|kind| {
                schedule.intervals.get(&kind).map(|interval| LoopStatus {
                    kind,
                    baseline: interval.baseline(),
                    current: interval.current(),
                    running: running.contains(&kind),
                })
            })
            .collect()
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.state.queue
    }

    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.state.tracker
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OperationClass;
    use crate::queue::{OperationResult, TaskContext};
    use async_trait::async_trait;

    /// Handler that succeeds unless told to fail a given job
    #[derive(Default)]
    struct ScriptedJobs {
        calls: Mutex<Vec<Job>>,
        failures: Mutex<HashMap<Job, PlatformError>>,
    }

    impl ScriptedJobs {
        fn fail(&self, kind: TaskKind, platform: Platform, err: PlatformError) {
            self.failures.lock().unwrap().insert(Job { kind, platform }, err);
        }

        fn calls(&self) -> Vec<Job> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedJobs {
        async fn run(&self, job: Job, _ctx: TaskContext) -> OperationResult {
            self.calls.lock().unwrap().push(job);
            let failure = self.failures.lock().unwrap().get(&job).cloned();
            match failure {
                Some(err) => Err(err),
                None => Ok(serde_json::json!({ "job": job.to_string() })),
            }
        }
    }

    fn test_config() -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.platforms.twitter.retry_limit = 0;
        config.platforms.bluesky.retry_limit = 0;
        config.queue.retry_base_delay_ms = 1;
        config
    }

    fn scheduler(config: SchedulerConfig) -> (TaskScheduler, Arc<ScriptedJobs>) {
        let jobs = Arc::new(ScriptedJobs::default());
        let scheduler = TaskScheduler::new(config, jobs.clone()).unwrap();
        (scheduler, jobs)
    }

    #[tokio::test]
    async fn test_unclassified_error_is_not_handled() {
        let (scheduler, _) = scheduler(test_config());

        let handled = scheduler.handle_platform_error(Platform::Twitter, &PlatformError::unclassified("boom"));

        assert!(!handled);
        assert!(scheduler.config().platforms.twitter.enabled);
    }

    #[tokio::test]
    async fn test_unauthorized_disables_platform() {
        let (scheduler, _) = scheduler(test_config());

        let handled = scheduler.handle_platform_error(
            Platform::Twitter,
            &PlatformError::Unauthorized("token revoked".to_string()),
        );

        assert!(handled);
        assert!(!scheduler.config().platforms.twitter.enabled);
        assert!(scheduler.config().platforms.bluesky.enabled);
    }

    #[tokio::test]
    async fn test_not_found_changes_nothing() {
        let (scheduler, _) = scheduler(test_config());
        let before = scheduler.config();

        let handled =
            scheduler.handle_platform_error(Platform::Bluesky, &PlatformError::NotFound("post 42".to_string()));

        assert!(handled);
        assert_eq!(scheduler.config(), before);
        assert_eq!(scheduler.current_interval(TaskKind::ReplyCheck), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_stretches_matching_loops() {
        let (scheduler, _) = scheduler(test_config());

        let handled = scheduler.handle_platform_error(
            Platform::Twitter,
            &PlatformError::RateLimited {
                class: OperationClass::Read,
                retry_after: Duration::from_secs(120),
            },
        );

        assert!(handled);
        assert!(scheduler.current_interval(TaskKind::ReplyCheck) >= Duration::from_secs(420));
        assert_eq!(scheduler.current_interval(TaskKind::MetricsCollection), Duration::from_secs(720));
        assert_eq!(scheduler.current_interval(TaskKind::ContentGeneration), Duration::from_secs(3600));

        let bucket = scheduler.tracker().status(Platform::Twitter, OperationClass::Read);
        assert_eq!(bucket.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_runs_each_enabled_platform() {
        let (scheduler, jobs) = scheduler(test_config());

        let report = scheduler.run_cycle(TaskKind::ContentGeneration).await.unwrap();

        assert_eq!(report.completed(), 2);
        assert_eq!(report.next_interval, Duration::from_secs(3600));
        let mut platforms: Vec<_> = jobs.calls().into_iter().map(|j| j.platform).collect();
        platforms.sort();
        assert_eq!(platforms, vec![Platform::Twitter, Platform::Bluesky]);

        let bucket = scheduler.tracker().status(Platform::Twitter, OperationClass::Write);
        assert_eq!(bucket.used, 1);
        assert_eq!(bucket.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_rate_limit_failure_stretches_interval() {
        let (scheduler, jobs) = scheduler(test_config());
        jobs.fail(
            TaskKind::ReplyCheck,
            Platform::Twitter,
            PlatformError::RateLimited {
                class: OperationClass::Read,
                retry_after: Duration::from_secs(120),
            },
        );

        let report = scheduler.run_cycle(TaskKind::ReplyCheck).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.completed(), 1);
        assert!(report.next_interval >= Duration::from_secs(420));

        // Twitter's read bucket is now blocked, so the next cycle skips it
        let report = scheduler.run_cycle(TaskKind::ReplyCheck).await.unwrap();
        assert_eq!(report.throttled(), 1);
        assert!(matches!(
            report.outcomes.iter().find(|(p, _)| *p == Platform::Twitter),
            Some((_, PlatformOutcome::Throttled { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_unauthorized_disables_platform() {
        let (scheduler, jobs) = scheduler(test_config());
        jobs.fail(
            TaskKind::MetricsCollection,
            Platform::Bluesky,
            PlatformError::Unauthorized("expired session".to_string()),
        );

        let report = scheduler.run_cycle(TaskKind::MetricsCollection).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert!(!scheduler.config().platforms.bluesky.enabled);

        let report = scheduler.run_cycle(TaskKind::MetricsCollection).await.unwrap();
        let platforms: Vec<_> = report.outcomes.iter().map(|(p, _)| *p).collect();
        assert_eq!(platforms, vec![Platform::Twitter]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skipped_when_all_platforms_disabled() {
        let (scheduler, jobs) = scheduler(test_config());
        scheduler.set_platform_enabled(Platform::Twitter, false);
        scheduler.set_platform_enabled(Platform::Bluesky, false);

        let report = scheduler.run_cycle(TaskKind::ReplyCheck).await.unwrap();

        assert!(report.is_skipped());
        assert!(jobs.calls().is_empty());
        assert_eq!(report.next_interval, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_capacity_denial_throttles() {
        let mut config = test_config();
        config.platforms.twitter.max_requests_per_window = 1;
        config.platforms.twitter.high_priority_reserve = 0;
        let (scheduler, jobs) = scheduler(config);

        scheduler.run_cycle(TaskKind::ReplyCheck).await.unwrap();
        let report = scheduler.run_cycle(TaskKind::ReplyCheck).await.unwrap();

        assert_eq!(report.throttled(), 1);
        let twitter_calls = jobs.calls().iter().filter(|j| j.platform == Platform::Twitter).count();
        assert_eq!(twitter_calls, 1);
        assert!(scheduler.current_interval(TaskKind::ReplyCheck) > Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_denial_leaves_high_priority_capacity() {
        let mut config = test_config();
        config.platforms.twitter.max_requests_per_window = 3;
        config.platforms.twitter.high_priority_reserve = 1;
        config.platforms.bluesky.enabled = false;
        let (scheduler, jobs) = scheduler(config);

        for _ in 0..2 {
            let report = scheduler.run_cycle(TaskKind::MetricsCollection).await.unwrap();
            assert_eq!(report.completed(), 1);
        }
        let report = scheduler.run_cycle(TaskKind::MetricsCollection).await.unwrap();
        assert_eq!(report.throttled(), 1);

        // Only the denied kind backs off; the bucket keeps its reserve
        assert!(scheduler.current_interval(TaskKind::MetricsCollection) > Duration::from_secs(600));
        assert_eq!(scheduler.current_interval(TaskKind::ReplyCheck), Duration::from_secs(300));
        let bucket = scheduler.tracker().status(Platform::Twitter, OperationClass::Read);
        assert_eq!(bucket.used, 2);
        assert_eq!(bucket.remaining, 1);

        let report = scheduler.run_cycle(TaskKind::ReplyCheck).await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(report.throttled(), 0);
        assert_eq!(report.next_interval, Duration::from_secs(300));
        assert_eq!(
            jobs.calls().iter().filter(|j| j.kind == TaskKind::ReplyCheck).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cycle_after_queue_shutdown_reserves_nothing() {
        let (scheduler, jobs) = scheduler(test_config());
        scheduler.queue().shutdown(Duration::from_secs(1)).await;

        assert!(matches!(
            scheduler.run_cycle(TaskKind::ContentGeneration).await,
            Err(SchedulerError::Queue(QueueError::ShuttingDown))
        ));
        assert!(jobs.calls().is_empty());
        for platform in Platform::ALL {
            assert_eq!(scheduler.tracker().status(platform, OperationClass::Write).used, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_relaxes_stretched_interval() {
        let (scheduler, _) = scheduler(test_config());
        scheduler.handle_platform_error(
            Platform::Bluesky,
            &PlatformError::RateLimited {
                class: OperationClass::Write,
                retry_after: Duration::from_secs(3600),
            },
        );
        assert_eq!(scheduler.current_interval(TaskKind::ContentGeneration), Duration::from_secs(7200));

        // Bluesky's write bucket is still blocked
        scheduler.set_platform_enabled(Platform::Bluesky, false);
        let report = scheduler.run_cycle(TaskKind::ContentGeneration).await.unwrap();

        assert_eq!(report.completed(), 1);
        assert_eq!(report.next_interval, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_update_config_applies_everywhere() {
        let (scheduler, _) = scheduler(test_config());

        let mut config = test_config();
        config.reply_check_interval_secs = 60;
        config.queue.max_concurrent_tasks = 2;
        config.platforms.twitter.max_requests_per_window = 7;
        scheduler.update_config(config.clone()).unwrap();

        assert_eq!(scheduler.config(), config);
        assert_eq!(scheduler.current_interval(TaskKind::ReplyCheck), Duration::from_secs(60));
        assert_eq!(scheduler.queue().get_queue_status().max_concurrent, 2);
        assert_eq!(scheduler.tracker().limit(Platform::Twitter).max_requests, 7);
    }

    #[tokio::test]
    async fn test_update_config_discards_stretch_with_new_limits() {
        let (scheduler, _) = scheduler(test_config());
        scheduler.handle_platform_error(
            Platform::Twitter,
            &PlatformError::RateLimited {
                class: OperationClass::Read,
                retry_after: Duration::from_secs(600),
            },
        );
        assert!(scheduler.current_interval(TaskKind::ReplyCheck) > Duration::from_secs(300));

        let mut config = test_config();
        config.reply_check_interval_secs = 120;
        config.platforms.twitter.max_requests_per_window = 9;
        config.platforms.twitter.high_priority_reserve = 2;
        scheduler.update_config(config.clone()).unwrap();

        assert_eq!(scheduler.config(), config);
        for status in scheduler.loop_status() {
            assert_eq!(status.baseline, config.interval(status.kind));
            assert_eq!(status.current, status.baseline);
        }
        assert_eq!(scheduler.tracker().limit(Platform::Twitter), config.platforms.twitter.rate_limit());
        assert_eq!(scheduler.tracker().limit(Platform::Bluesky), config.platforms.bluesky.rate_limit());
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let (scheduler, _) = scheduler(test_config());
        let before = scheduler.config();

        let bad = SchedulerConfig {
            reply_check_interval_secs: 0,
            ..test_config()
        };
        assert!(matches!(
            scheduler.update_config(bad),
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert_eq!(scheduler.config(), before);
    }

    #[tokio::test]
    async fn test_update_interval_changes_one_loop() {
        let (scheduler, _) = scheduler(test_config());

        scheduler
            .update_interval(TaskKind::MetricsCollection, Duration::from_secs(45))
            .unwrap();

        assert_eq!(scheduler.current_interval(TaskKind::MetricsCollection), Duration::from_secs(45));
        assert_eq!(scheduler.config().metrics_collection_interval_secs, 45);
        assert_eq!(scheduler.current_interval(TaskKind::ReplyCheck), Duration::from_secs(300));
        assert!(
            scheduler
                .update_interval(TaskKind::ReplyCheck, Duration::from_millis(10))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_stop_finishes_all_loops() {
        let (scheduler, _) = scheduler(test_config());
        scheduler.start();
        scheduler.start();

        let handles = scheduler.loop_handles();
        assert_eq!(handles.len(), 3);
        assert!(scheduler.is_running());

        scheduler.stop().await;

        assert!(handles.iter().all(|(_, h)| h.is_finished()));
        assert!(!scheduler.is_running());
        assert!(scheduler.loop_handles().is_empty());
    }

    #[tokio::test]
    async fn test_loop_status_tracks_running_loops() {
        let (scheduler, _) = scheduler(test_config());

        let status = scheduler.loop_status();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| !s.running));
        let reply = status.iter().find(|s| s.kind == TaskKind::ReplyCheck).unwrap();
        assert_eq!(reply.baseline, Duration::from_secs(300));

        scheduler.start();
        assert!(scheduler.loop_status().iter().all(|s| s.running));

        scheduler.stop().await;
        assert!(scheduler.loop_status().iter().all(|s| !s.running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_run_cycles_on_interval() {
        let mut config = test_config();
        config.reply_check_interval_secs = 1;
        let (scheduler, jobs) = scheduler(config);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await;

        let reply_checks = jobs.calls().iter().filter(|j| j.kind == TaskKind::ReplyCheck).count();
        assert_eq!(reply_checks, 4);
        assert!(jobs.calls().iter().all(|j| j.kind == TaskKind::ReplyCheck));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loops_and_queue() {
        let (scheduler, _) = scheduler(test_config());
        scheduler.start();

        let report = scheduler.shutdown(Duration::from_secs(1)).await;

        assert_eq!(report, ShutdownReport::default());
        assert!(!scheduler.is_running());
        assert!(scheduler.queue().is_shutting_down());
        assert!(matches!(
            scheduler.run_cycle(TaskKind::ReplyCheck).await,
            Err(SchedulerError::Queue(QueueError::ShuttingDown))
        ));
    }
}
