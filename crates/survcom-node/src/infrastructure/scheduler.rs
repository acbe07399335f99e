//! Owner of the node's background tasks.
//!
//! Every long-running loop (announce broadcast, discovery listener, sync
//! pass, relay accept loop) is spawned through a [`Scheduler`] so shutdown
//! can cancel them all in one place instead of relying on process exit.
//!
//! Repeating jobs run on a `tokio::time::Interval` with
//! [`MissedTickBehavior::Delay`]: if a job overruns its period, the next run
//! starts as soon as it finishes and the schedule shifts from there; missed
//! runs are never replayed as a burst.  A job is awaited before the next
//! tick, so runs of the same job never overlap.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` first after `initial_delay`, then every `period`.
    ///
    /// A zero `period` is treated as one millisecond.
    pub fn spawn_repeating<F, Fut>(
        &mut self,
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        mut job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(Duration::from_millis(1));
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(task = %task_name, "running scheduled job");
                job().await;
            }
        });
        info!(task = %name, ?initial_delay, ?period, "scheduled repeating task");
        self.tasks.push(ScheduledTask { name, handle });
    }

    /// Runs a long-lived future until it finishes or the scheduler shuts down.
    pub fn spawn_task<Fut>(&mut self, name: impl Into<String>, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(task);
        debug!(task = %name, "spawned background task");
        self.tasks.push(ScheduledTask { name, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `true` while the named task has not finished or been cancelled.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.name == name && !t.handle.is_finished())
    }

    /// Cancels every task.  Jobs are aborted at their next await point.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.handle.abort();
            debug!(task = %task.name, "cancelled background task");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
