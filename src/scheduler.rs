//! Fixed-period tick driver.

use log::{info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

/// Runs a tick callback every period on a single task.
///
/// A tick that overruns pushes the next one back instead of overlapping it.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *stopped.borrow() {
                    break;
                }
                tick();
            }
        });

        info!("sampling every {:?}", period);
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Cancel future ticks and wait for one in flight to finish.
    /// No tick runs after this returns.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("scheduler task ended abnormally: {}", e);
            }
        }
        info!("sampling stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let scheduler = Scheduler::start(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        let at_stop = ticks.load(Ordering::SeqCst);
        assert!(at_stop >= 2, "only {} ticks", at_stop);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_stop);
    }

    #[tokio::test]
    async fn slow_ticks_never_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let (r, o) = (running.clone(), overlaps.clone());

        let scheduler = Scheduler::start(Duration::from_millis(5), move || {
            if r.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(15));
            r.fetch_sub(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}
