//! Timer-driven background tasks.
//!
//! All tasks of a runner share one thread hosting a current-thread tokio
//! runtime. Each task gets its own interval; ticks are short synchronous
//! store calls, so tasks interleave cooperatively. A shutdown request is
//! observed between ticks, never in the middle of one.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info_span, warn};

use crate::error::Result;
use crate::maintenance::Maintenance;
use crate::worker::{ProcessGuard, Scheduler};

/// A unit of periodic work.
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn run_once(&self) -> Result<()>;
}

/// Collects tasks and starts them on a dedicated thread.
#[derive(Default)]
pub struct PeriodicRunner {
    tasks: Vec<(Arc<dyn PeriodicTask>, Duration)>,
    run_immediately: bool,
}

impl PeriodicRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: Arc<dyn PeriodicTask>, period: Duration) -> Self {
        self.tasks.push((task, period));
        self
    }

    /// Run every task once right after start instead of waiting one period.
    pub fn run_immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn start(self, thread_name: &str) -> std::io::Result<RunnerHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self.tasks;
        let run_immediately = self.run_immediately;

        let thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to build periodic runtime");
                        return;
                    }
                };

                rt.block_on(async move {
                    let loops = tasks.into_iter().map(|(task, period)| {
                        tokio::spawn(task_loop(task, period, run_immediately, shutdown_rx.clone()))
                    });
                    for result in futures_util::future::join_all(loops).await {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Periodic task loop panicked");
                        }
                    }
                });
            })?;

        Ok(RunnerHandle {
            shutdown: shutdown_tx,
            thread: Some(thread),
        })
    }
}

async fn task_loop(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    run_immediately: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !run_immediately {
        timer.tick().await; // skip immediate first tick
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {},
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let span = info_span!("tick", task = task.name());
        let _enter = span.enter();
        if let Err(e) = task.run_once() {
            warn!(error = %e, "Periodic task failed, will retry next tick");
        }
    }
}

/// Owner of a running [`PeriodicRunner`]. Dropping it stops the runner
/// without waiting for the thread.
pub struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Signals every task loop to exit after its current tick.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stops the runner and waits for its thread to finish.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Periodic runner thread panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PeriodicTask for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn run_once(&self) -> Result<()> {
        self.tick().map(|_| ())
    }
}

impl PeriodicTask for ProcessGuard {
    fn name(&self) -> &'static str {
        "process_guard"
    }

    fn run_once(&self) -> Result<()> {
        self.sweep()?;
        Ok(())
    }
}

impl PeriodicTask for Maintenance {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    fn run_once(&self) -> Result<()> {
        self.run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VigilError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        count: AtomicUsize,
        fail: bool,
    }

    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn run_once(&self) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(VigilError::InvalidRequest("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn counter(fail: bool) -> Arc<Counter> {
        Arc::new(Counter {
            count: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn test_runner_ticks_and_stops() {
        let task = counter(false);
        let handle = PeriodicRunner::new()
            .with_task(task.clone(), Duration::from_millis(10))
            .start("test-runner")
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        handle.join();

        let ticks = task.count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(task.count.load(Ordering::SeqCst), ticks);
    }

    #[test]
    fn test_failing_task_keeps_running() {
        let task = counter(true);
        let handle = PeriodicRunner::new()
            .with_task(task.clone(), Duration::from_millis(10))
            .start("test-runner-fail")
            .unwrap();

        std::thread::sleep(Duration::from_millis(80));
        handle.join();
        assert!(task.count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_run_immediately() {
        let task = counter(false);
        let handle = PeriodicRunner::new()
            .with_task(task.clone(), Duration::from_secs(3600))
            .run_immediately(true)
            .start("test-runner-now")
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        handle.join();
        assert_eq!(task.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_wakes_long_interval() {
        let task = counter(false);
        let handle = PeriodicRunner::new()
            .with_task(task.clone(), Duration::from_secs(3600))
            .start("test-runner-idle")
            .unwrap();

        handle.stop();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.is_finished());
        handle.join();
        assert_eq!(task.count.load(Ordering::SeqCst), 0);
    }
}
