//! Owned periodic background jobs.
//!
//! A [`ScheduledJob`] is a single tokio task that runs a closure on a fixed
//! period until it is shut down, dropped, or the closure asks to stop.
//! Ticks run one after another on that one task, so a job never overlaps
//! with itself. The components that own a job (the result cache and the
//! rate limiter) take their usual lock inside the closure, which keeps
//! background sweeps serialized with foreground calls.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::{PictorError, Result};

/// Handle to a running periodic task.
///
/// Dropping the handle aborts the task; [`shutdown()`](Self::shutdown)
/// stops it cleanly and waits for the current tick to finish.
pub struct ScheduledJob {
    name: &'static str,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ScheduledJob {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first tick fires one full period after spawning. Returning
    /// `ControlFlow::Break(())` from `tick` ends the job.
    ///
    /// Fails with [`PictorError::Configuration`] when called outside a
    /// tokio runtime or with a zero period.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(PictorError::Configuration(format!(
                "{name}: period must be non-zero"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PictorError::Configuration(format!("{name}: requires a tokio runtime"))
        })?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if tick().is_break() {
                            break;
                        }
                    }
                }
            }
            debug!(job = name, "scheduled job stopped");
        });

        debug!(job = name, period_ms = period.as_millis() as u64, "scheduled job started");
        Ok(Self {
            name,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
