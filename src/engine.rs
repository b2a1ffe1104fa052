//! The load engine and the runs it owns.
//!
//! A [`LoadEngine`] runs at most one load test at a time. [`LoadEngine::start`] checks
//! the configuration, materializes the request once, and spawns the tick loop on the
//! current Tokio runtime. It returns a [`RunHandle`] that is used to follow the run:
//!
//!  - [`subscribe`](LoadEngine::subscribe) returns a receiver of [`MetricSample`]s,
//!    one per completed tick, ending with the run,
//!  - [`cancel`](LoadEngine::cancel) stops the run after the current tick,
//!  - [`wait`](LoadEngine::wait) resolves with the [`RunSummary`] once the run is over,
//!  - [`result`](LoadEngine::result) returns the summary without waiting, or
//!    [`GoslingError::NotFinished`].
//!
//! Every run owns its own cancellation token, sample series and summary, so nothing
//! leaks from one run into the next.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{HttpExecutor, ReqwestExecutor};
use crate::config::GoslingConfiguration;
use crate::metrics::{Aggregator, MetricSample, RunSummary, SampleSeries};
use crate::profile::{ProfileConfig, ProfilePoint};
use crate::request::RequestSpec;
use crate::scheduler::TickScheduler;
use crate::{GoslingError, RunState};

// Nothing holding these locks can leave the data half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything that belongs to one run.
struct Run {
    id: usize,
    profile: ProfileConfig,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
    series: SampleSeries,
    summary: Mutex<Option<RunSummary>>,
}

impl Run {
    fn new(id: usize, profile: ProfileConfig) -> Self {
        let (state, _) = watch::channel(RunState::NotStarted);
        Run {
            id,
            profile,
            cancel: CancellationToken::new(),
            state,
            series: SampleSeries::new(),
            summary: Mutex::new(None),
        }
    }

    fn state(&self) -> RunState {
        *self.state.borrow()
    }

    // Drive the scheduler to the end, then publish the summary before the terminal
    // state so that anyone who observes the state also finds the summary.
    async fn execute(self: Arc<Self>, scheduler: TickScheduler) {
        let mut aggregator = Aggregator::new(self.profile.duration);
        let state = scheduler.run(&mut aggregator, &self.series).await;
        let summary = aggregator.summarize(state);
        info!(
            "[run {}] {} after {} ticks: {} requests, {} errors",
            self.id, state, summary.ticks, summary.total_requests, summary.error_count
        );
        *lock(&self.summary) = Some(summary);
        self.series.close();
        self.state.send_replace(state);
    }
}

/// A cheap, cloneable reference to one run.
///
/// Handles remain usable after the run has finished, and after newer runs have been
/// started on the same engine.
#[derive(Clone)]
pub struct RunHandle {
    run: Arc<Run>,
}
impl RunHandle {
    /// Identifier of this run, unique per engine.
    pub fn id(&self) -> usize {
        self.run.id
    }

    /// The profile this run was started with.
    pub fn profile(&self) -> &ProfileConfig {
        &self.run.profile
    }

    /// Request cancellation. Safe to call any number of times, from any thread, and a
    /// no-op once the run has finished.
    pub fn cancel(&self) {
        if self.run.state().is_terminal() || self.run.cancel.is_cancelled() {
            return;
        }
        info!("[run {}] cancel requested", self.run.id);
        self.run.cancel.cancel();
    }
}
impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.run.id)
            .field("state", &self.run.state())
            .finish()
    }
}

/// Runs load tests, one at a time.
pub struct LoadEngine {
    executor: Arc<dyn HttpExecutor>,
    active: Mutex<Option<RunHandle>>,
    run_counter: AtomicUsize,
}

impl LoadEngine {
    /// Create an engine that sends requests through `executor`.
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        LoadEngine {
            executor,
            active: Mutex::new(None),
            run_counter: AtomicUsize::new(0),
        }
    }

    /// Create an engine backed by [`reqwest`](https://docs.rs/reqwest/), using the
    /// request timeout from `configuration`.
    pub fn with_reqwest(configuration: &GoslingConfiguration) -> Result<Self, GoslingError> {
        let executor = ReqwestExecutor::new(configuration.request_timeout()?)?;
        Ok(LoadEngine::new(Arc::new(executor)))
    }

    /// Start a new run on the current Tokio runtime.
    ///
    /// Fails with [`GoslingError::InvalidConfig`] or [`GoslingError::InvalidUrl`]
    /// without creating a run, or with [`GoslingError::AlreadyRunning`] if a previous
    /// run on this engine hasn't finished.
    pub fn start(
        &self,
        spec: RequestSpec,
        profile: ProfileConfig,
    ) -> Result<RunHandle, GoslingError> {
        profile.validate()?;
        let template = spec.materialize()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| GoslingError::NoRuntime {
            detail: e.to_string(),
        })?;

        let mut active = lock(&self.active);
        if let Some(handle) = active.as_ref() {
            if !handle.run.state().is_terminal() {
                return Err(GoslingError::AlreadyRunning {
                    run_id: handle.run.id,
                });
            }
        }

        let id = self.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let run = Arc::new(Run::new(id, profile.clone()));
        run.state.send_replace(RunState::Running);
        info!(
            "[run {}] starting {} {}: {} profile, {} users, {} seconds, {} seconds ramp-up",
            id,
            template.method,
            template.url,
            profile.profile,
            profile.max_users,
            profile.duration,
            profile.ramp_up
        );

        let scheduler = TickScheduler::new(
            id,
            template,
            profile,
            Arc::clone(&self.executor),
            run.cancel.clone(),
        );
        runtime.spawn(Arc::clone(&run).execute(scheduler));

        let handle = RunHandle { run };
        *active = Some(handle.clone());
        Ok(handle)
    }

    /// Cancel a run. Idempotent.
    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancel();
    }

    /// Follow a run's samples.
    ///
    /// The receiver first yields every sample already published, then each new sample
    /// as its tick completes, and disconnects once the run has finished. Every call
    /// returns a new, independent receiver.
    pub fn subscribe(&self, handle: &RunHandle) -> flume::Receiver<MetricSample> {
        handle.run.series.subscribe()
    }

    /// A snapshot of the samples published so far.
    pub fn samples(&self, handle: &RunHandle) -> Vec<MetricSample> {
        handle.run.series.snapshot()
    }

    /// The current state of a run.
    pub fn state(&self, handle: &RunHandle) -> RunState {
        handle.run.state()
    }

    /// The summary of a finished run, or [`GoslingError::NotFinished`].
    pub fn result(&self, handle: &RunHandle) -> Result<RunSummary, GoslingError> {
        let state = handle.run.state();
        let summary = if state.is_terminal() {
            lock(&handle.run.summary).clone()
        } else {
            None
        };
        summary.ok_or(GoslingError::NotFinished {
            run_id: handle.run.id,
            state,
        })
    }

    /// Wait for a run to finish and return its summary.
    pub async fn wait(&self, handle: &RunHandle) -> Result<RunSummary, GoslingError> {
        let mut state = handle.run.state.subscribe();
        if state.wait_for(|state| state.is_terminal()).await.is_err() {
            // The sender lives as long as the run, which the handle keeps alive.
            warn!("[run {}] state channel closed", handle.run.id);
        }
        self.result(handle)
    }

    /// The currently active run, if any.
    pub fn active_run(&self) -> Option<RunHandle> {
        lock(&self.active)
            .as_ref()
            .filter(|handle| !handle.run.state().is_terminal())
            .cloned()
    }

    /// Sample a profile for display before starting a run.
    pub fn preview_profile(profile: &ProfileConfig) -> Vec<ProfilePoint> {
        profile.preview()
    }
}

/// Dropping the engine cancels its active run.
impl Drop for LoadEngine {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.active).as_ref() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RequestOutcome;
    use crate::profile::LoadProfile;
    use crate::request::{Method, RequestTemplate};
    use async_trait::async_trait;
    use std::time::Duration;

    struct InstantExecutor;
    #[async_trait]
    impl HttpExecutor for InstantExecutor {
        async fn execute(&self, _template: &RequestTemplate) -> RequestOutcome {
            tokio::time::sleep(Duration::from_millis(5)).await;
            RequestOutcome::success(5.0, 204)
        }
    }

    fn engine() -> LoadEngine {
        LoadEngine::new(Arc::new(InstantExecutor))
    }

    fn spec() -> RequestSpec {
        RequestSpec::new(Method::GET, "http://example.com/")
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_creates_no_run() {
        let engine = engine();
        let error = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 0, 5))
            .unwrap_err();
        assert!(matches!(error, GoslingError::InvalidConfig { .. }));
        let error = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 5, 0))
            .unwrap_err();
        assert!(matches!(error, GoslingError::InvalidConfig { .. }));
        assert!(engine.active_run().is_none());

        let error = engine
            .start(
                RequestSpec::new(Method::GET, "not a url"),
                ProfileConfig::new(LoadProfile::Fixed, 1, 1),
            )
            .unwrap_err();
        assert!(matches!(error, GoslingError::InvalidUrl { .. }));
        assert!(engine.active_run().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn one_run_at_a_time() {
        let engine = engine();
        let first = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 2, 3))
            .unwrap();
        assert_eq!(engine.state(&first), RunState::Running);

        let error = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 2, 3))
            .unwrap_err();
        assert!(matches!(error, GoslingError::AlreadyRunning { run_id: 1 }));

        // The rejected start didn't disturb the first run.
        let summary = engine.wait(&first).await.unwrap();
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.total_requests, 6);

        // Finished runs make room for a fresh one.
        let second = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 1, 1))
            .unwrap();
        assert_eq!(second.id(), 2);
        let summary = engine.wait(&second).await.unwrap();
        assert_eq!(summary.total_requests, 1);
        assert_eq!(engine.samples(&second).len(), 1);
        // The first run's data is untouched.
        assert_eq!(engine.samples(&first).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn result_before_finish() {
        let engine = engine();
        let handle = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 1, 5))
            .unwrap();
        let error = engine.result(&handle).unwrap_err();
        assert!(matches!(
            error,
            GoslingError::NotFinished {
                run_id: 1,
                state: RunState::Running
            }
        ));
        engine.wait(&handle).await.unwrap();
        assert!(engine.result(&handle).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let engine = engine();
        let handle = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 1, 60))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        engine.cancel(&handle);
        engine.cancel(&handle);
        let summary = engine.wait(&handle).await.unwrap();
        assert_eq!(summary.state, RunState::Cancelled);
        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.success_count + summary.error_count, summary.total_requests);

        // Canceling a finished run changes nothing.
        engine.cancel(&handle);
        assert_eq!(engine.state(&handle), RunState::Cancelled);
        assert_eq!(engine.result(&handle).unwrap().ticks, 3);
    }

    #[test]
    fn start_outside_runtime() {
        let engine = engine();
        let error = engine
            .start(spec(), ProfileConfig::new(LoadProfile::Fixed, 1, 1))
            .unwrap_err();
        assert!(matches!(error, GoslingError::NoRuntime { .. }));
    }
}
