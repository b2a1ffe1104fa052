//! The tick loop.
//!
//! Once per second the scheduler asks the profile how many virtual users are active,
//! launches that many requests at the same time, and waits for every one of them to
//! settle before sampling the tick. Ticks are a full barrier: nothing from tick `t + 1`
//! starts before tick `t` has joined. A slow tick simply starts the next one late;
//! ticks are never skipped or merged.
//!
//! Cancellation is checked before each tick, while joining a tick's requests, and
//! while sleeping between ticks. Requests already in flight are never aborted. If the
//! join is interrupted, the requests that already settled are kept for the summary,
//! stragglers finish on their own and are dropped, and no sample is published for the
//! partial tick.
//!
//! Stragglers are not tied to the run's lifetime. The run reaches its terminal state as
//! soon as the join is abandoned, so a new run on the same engine may start while the
//! previous run's unsettled requests are still in flight. Each of them ends within the
//! executor's request timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::{HttpExecutor, RequestOutcome};
use crate::metrics::{Aggregator, SampleSeries};
use crate::profile::ProfileConfig;
use crate::request::RequestTemplate;
use crate::util;
use crate::RunState;

/// Target length of one tick.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// How a tick's fan-out ended.
#[derive(Debug)]
enum TickOutcome {
    /// Every request settled.
    Joined(Vec<RequestOutcome>),
    /// Canceled while waiting, holds whatever settled first.
    Interrupted(Vec<RequestOutcome>),
}

pub(crate) struct TickScheduler {
    run_id: usize,
    template: Arc<RequestTemplate>,
    profile: ProfileConfig,
    executor: Arc<dyn HttpExecutor>,
    cancel: CancellationToken,
}

impl TickScheduler {
    pub(crate) fn new(
        run_id: usize,
        template: RequestTemplate,
        profile: ProfileConfig,
        executor: Arc<dyn HttpExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        TickScheduler {
            run_id,
            template: Arc::new(template),
            profile,
            executor,
            cancel,
        }
    }

    /// Run every tick, returning the terminal state of the run.
    pub(crate) async fn run(self, aggregator: &mut Aggregator, series: &SampleSeries) -> RunState {
        let duration = self.profile.duration;
        for tick in 0..duration {
            if self.cancel.is_cancelled() {
                info!("[run {}] canceled before tick {}", self.run_id, tick + 1);
                return RunState::Cancelled;
            }

            let tick_started = tokio::time::Instant::now();
            let users = self.profile.active_users(tick);
            debug!("[run {}] tick {}: launching {} users", self.run_id, tick + 1, users);

            match self.fan_out(users).await {
                TickOutcome::Joined(outcomes) => {
                    let sample = aggregator.complete_tick(users, &outcomes);
                    debug!("[run {}] {}", self.run_id, sample);
                    series.publish(sample);
                }
                TickOutcome::Interrupted(outcomes) => {
                    info!(
                        "[run {}] canceled during tick {}, {} of {} requests settled",
                        self.run_id,
                        tick + 1,
                        outcomes.len(),
                        users
                    );
                    aggregator.record_partial_tick(&outcomes);
                    return RunState::Cancelled;
                }
            }

            // The last tick doesn't wait for a boundary that no tick will use.
            if tick + 1 < duration
                && !util::sleep_minus_drift(TICK_PERIOD, tick_started, &self.cancel).await
            {
                info!("[run {}] canceled after tick {}", self.run_id, tick + 1);
                return RunState::Cancelled;
            }
        }
        RunState::Completed
    }

    // Launch `users` concurrent requests and join on all of them.
    async fn fan_out(&self, users: usize) -> TickOutcome {
        let (outcome_tx, outcome_rx) = flume::unbounded();
        for _ in 0..users {
            let executor = Arc::clone(&self.executor);
            let template = Arc::clone(&self.template);
            let outcome_tx = outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = executor.execute(&template).await;
                // Nobody is listening any more if the tick was canceled.
                let _ = outcome_tx.send(outcome);
            });
        }
        drop(outcome_tx);

        let mut outcomes = Vec::with_capacity(users);
        while outcomes.len() < users {
            tokio::select! {
                received = outcome_rx.recv_async() => match received {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(_) => {
                        // Every sender is gone, a virtual user task must have panicked.
                        warn!(
                            "[run {}] only {} of {} requests reported back",
                            self.run_id,
                            outcomes.len(),
                            users
                        );
                        break;
                    }
                },
                _ = self.cancel.cancelled() => {
                    outcomes.extend(outcome_rx.try_iter());
                    if outcomes.len() < users {
                        return TickOutcome::Interrupted(outcomes);
                    }
                }
            }
        }
        TickOutcome::Joined(outcomes)
    }
}
