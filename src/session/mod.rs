//! Session manager: the heart of the daemon.
//!
//! A single dedicated task owns `refcount` and `timers` for every fingerprint
//! and serialises all mutations through one `mpsc` channel, following the
//! teacher's "one goroutine/task per shared resource" idiom (see
//! `cron::Scheduler`'s timer-as-spawned-task pattern) rather than per-key
//! locking. `acquire`/`release` are cheap async calls on a `Clone` handle
//! that send a message and await a bounded `oneshot` ack — the ack never
//! waits on driver I/O.

mod pump;
mod svc;

pub use pump::run_pumps;
pub use svc::{Connected, Svc, SvcError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::{BoxStatus, Database};
use crate::driver::ContainerDriver;

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

enum LoopMsg {
    ConnChange {
        fingerprint: String,
        delta: i64,
        container_id: Option<String>,
        ack: oneshot::Sender<()>,
    },
    ShutdownTick {
        fingerprint: String,
        container_id: String,
    },
}

/// Cheap, `Clone`-able handle to the session manager's event loop.
#[derive(Clone)]
pub struct SessionManager {
    tx: mpsc::Sender<LoopMsg>,
}

impl SessionManager {
    /// Spawn the event-loop task with the default shutdown grace period.
    pub fn spawn(driver: Arc<dyn ContainerDriver>, db: Arc<Database>) -> Self {
        Self::spawn_with_grace(driver, db, SHUTDOWN_GRACE)
    }

    /// Spawn the event-loop task and return a handle to it.
    pub fn spawn_with_grace(
        driver: Arc<dyn ContainerDriver>,
        db: Arc<Database>,
        shutdown_grace: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let manager = Self { tx: tx.clone() };
        tokio::spawn(run_event_loop(rx, tx, driver, db, shutdown_grace));
        manager
    }

    /// Increment the refcount for `fingerprint`, cancelling any pending
    /// shutdown timer (race-free reconnect cancellation).
    pub async fn acquire(&self, fingerprint: &str) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(LoopMsg::ConnChange {
                fingerprint: fingerprint.to_string(),
                delta: 1,
                container_id: None,
                ack: ack_tx,
            })
            .await;
        let _ = ack_rx.await;
    }

    /// Decrement the refcount for `fingerprint`. If it reaches zero, arms a
    /// delayed shutdown for `container_id`.
    pub async fn release(&self, fingerprint: &str, container_id: &str) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(LoopMsg::ConnChange {
                fingerprint: fingerprint.to_string(),
                delta: -1,
                container_id: Some(container_id.to_string()),
                ack: ack_tx,
            })
            .await;
        let _ = ack_rx.await;
    }
}

async fn run_event_loop(
    mut rx: mpsc::Receiver<LoopMsg>,
    self_tx: mpsc::Sender<LoopMsg>,
    driver: Arc<dyn ContainerDriver>,
    db: Arc<Database>,
    shutdown_grace: Duration,
) {
    let mut refcounts: HashMap<String, i64> = HashMap::new();
    let mut timers: HashMap<String, CancellationToken> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            LoopMsg::ConnChange {
                fingerprint,
                delta,
                container_id,
                ack,
            } => {
                handle_conn_change(
                    &mut refcounts,
                    &mut timers,
                    &self_tx,
                    &db,
                    fingerprint,
                    delta,
                    container_id,
                    shutdown_grace,
                );
                let _ = ack.send(());
            }
            LoopMsg::ShutdownTick {
                fingerprint,
                container_id,
            } => {
                timers.remove(&fingerprint);

                // Present and > 0 means a reconnect arrived after the timer
                // fired but before this tick was processed; drop the tick.
                if refcounts.get(&fingerprint).is_some_and(|&rc| rc > 0) {
                    debug!(%fingerprint, "shutdown tick superseded by reconnect");
                    continue;
                }

                let driver = driver.clone();
                let db = db.clone();
                tokio::spawn(async move {
                    if let Err(e) = driver.stop(&container_id).await {
                        warn!(%container_id, error = %e, "shutdown stop failed, reconciled on next connect");
                    }
                    if let Err(e) = db.boxes().update_status(&fingerprint, BoxStatus::Paused).await {
                        warn!(%fingerprint, error = %e, "failed to mark box paused after shutdown");
                    }
                });
            }
        }
    }
}

fn handle_conn_change(
    refcounts: &mut HashMap<String, i64>,
    timers: &mut HashMap<String, CancellationToken>,
    self_tx: &mpsc::Sender<LoopMsg>,
    db: &Arc<Database>,
    fingerprint: String,
    delta: i64,
    container_id: Option<String>,
    shutdown_grace: Duration,
) {
    if delta > 0 {
        *refcounts.entry(fingerprint.clone()).or_insert(0) += 1;
        if let Some(timer) = timers.remove(&fingerprint) {
            timer.cancel();
        }
        return;
    }

    let rc = refcounts.entry(fingerprint.clone()).or_insert(0);
    *rc -= 1;

    if *rc <= 0 {
        refcounts.remove(&fingerprint);

        let db = db.clone();
        let fp = fingerprint.clone();
        tokio::spawn(async move {
            if let Err(e) = db.boxes().touch(&fp).await {
                warn!(fingerprint = %fp, error = %e, "failed to touch box on refcount reaching zero");
            }
        });

        let Some(container_id) = container_id else {
            return;
        };

        let token = CancellationToken::new();
        let child = token.clone();
        let tx = self_tx.clone();
        let fp = fingerprint.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(shutdown_grace) => {
                    let _ = tx
                        .send(LoopMsg::ShutdownTick {
                            fingerprint: fp,
                            container_id,
                        })
                        .await;
                }
            }
        });

        timers.insert(fingerprint, token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AttachHandle, DriverError, DriverResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeDriver {
        stop_calls: AtomicUsize,
        stopped: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerDriver for FakeDriver {
        async fn create(&self, box_id: uuid::Uuid) -> DriverResult<String> {
            Ok(format!("container-{box_id}"))
        }
        async fn ensure_running(&self, _container_id: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn attach(&self, _container_id: &str) -> DriverResult<AttachHandle> {
            Err(DriverError::NotFound("unsupported in fake".into()))
        }
        async fn stop(&self, container_id: &str) -> DriverResult<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stopped.lock().unwrap().push(container_id.to_string());
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn list_managed(&self) -> DriverResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn release_to_zero_arms_shutdown_after_grace() {
        let driver: Arc<dyn ContainerDriver> = Arc::new(FakeDriver::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.boxes().create("fp-1", "container-1").await.unwrap();

        let mgr = SessionManager::spawn(driver.clone(), db.clone());
        mgr.acquire("fp-1").await;
        mgr.release("fp-1", "container-1").await;

        tokio::time::sleep(SHUTDOWN_GRACE + Duration::from_millis(200)).await;

        let row = db.boxes().get_by_fingerprint("fp-1").await.unwrap().unwrap();
        assert_eq!(row.status, BoxStatus::Paused);
    }

    #[tokio::test]
    async fn reconnect_within_grace_cancels_shutdown() {
        let driver: Arc<dyn ContainerDriver> = Arc::new(FakeDriver::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.boxes().create("fp-1", "container-1").await.unwrap();

        let mgr = SessionManager::spawn(driver, db.clone());
        mgr.acquire("fp-1").await;
        mgr.release("fp-1", "container-1").await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        mgr.acquire("fp-1").await;

        tokio::time::sleep(SHUTDOWN_GRACE + Duration::from_millis(200)).await;

        let row = db.boxes().get_by_fingerprint("fp-1").await.unwrap().unwrap();
        assert_eq!(row.status, BoxStatus::Running);
    }
}
