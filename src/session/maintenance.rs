//! Background upkeep for the session store.
//!
//! # Responsibilities
//! - Sweep expired sessions every `gc_interval_secs`
//! - Ping the store every five minutes
//! - Log best/poor/average store timings every `statistics_interval_secs`
//!
//! Every task stops when the shutdown signal fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::session::store::SessionStore;

/// Interval between store health checks.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

async fn every<F, Fut>(
    task: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => tick().await,
            _ = shutdown.recv() => {
                debug!(task, "Session maintenance task stopped");
                return;
            }
        }
    }
}

/// Remove sessions older than `max_age` on every `period`.
pub async fn run_gc(
    store: Arc<dyn SessionStore>,
    period: Duration,
    max_age: Duration,
    shutdown: broadcast::Receiver<()>,
) {
    every("gc", period, shutdown, || {
        let store = store.clone();
        async move {
            match store.gc(max_age).await {
                Ok(0) => {}
                Ok(removed) => debug!(store = store.name(), removed, "Expired sessions swept"),
                Err(e) => error!(store = store.name(), error = %e, "Session sweep failed"),
            }
        }
    })
    .await
}

/// Ping the store on every `period`, logging failures.
pub async fn run_health_check(
    store: Arc<dyn SessionStore>,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) {
    every("health_check", period, shutdown, || {
        let store = store.clone();
        async move {
            if let Err(e) = store.ping().await {
                error!(store = store.name(), error = %e, "Session store health check failed");
            }
        }
    })
    .await
}

/// Log and reset the store's timing window on every `period`.
pub async fn run_statistics(
    store: Arc<dyn SessionStore>,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) {
    every("statistics", period, shutdown, || {
        let store = store.clone();
        async move {
            let Some(statistics) = store.statistics() else {
                return;
            };
            let snapshot = statistics.take();
            info!(
                store = store.name(),
                best_ms = snapshot.best.as_secs_f64() * 1000.0,
                poor_ms = snapshot.poor.as_secs_f64() * 1000.0,
                avg_ms = snapshot.avg.as_secs_f64() * 1000.0,
                total = snapshot.total,
                "Session store statistics"
            );
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn gc_task_sweeps_until_shutdown() {
        let memory = MemoryStore::new();
        memory
            .write("dead", b"{}".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let store: Arc<dyn SessionStore> = Arc::new(memory.clone());
        let task = tokio::spawn(run_gc(
            store,
            Duration::from_secs(10),
            Duration::from_secs(60),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(memory.is_empty());

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
