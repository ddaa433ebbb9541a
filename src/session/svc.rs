//! `Svc::connect` — the per-connection orchestration in spec §4.3: validate,
//! acquire, look up or create the box, ensure the container is running,
//! attach, and hand back a guard that guarantees the matching `release` runs
//! exactly once, even if the caller's pump task panics.

use std::sync::Arc;

use scopeguard::ScopeGuard;
use thiserror::Error;
use tracing::warn;

use super::SessionManager;
use crate::db::{BoxStatus, Database, DatabaseError};
use crate::driver::{AttachHandle, ContainerDriver, DriverError};

#[derive(Debug, Error)]
pub enum SvcError {
    #[error("fingerprint must not be empty")]
    EmptyFingerprint,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// The result of a successful `Svc::connect`: the container id to attach to
/// and a guard that releases the session exactly once when dropped or
/// explicitly finished.
pub struct Connected {
    pub container_id: String,
    pub attach: AttachHandle,
    pub guard: ReleaseGuard,
}

/// Orchestrates the container driver, box store, and session manager behind
/// the single `connect` entry point the router's WebSocket handler calls.
#[derive(Clone)]
pub struct Svc {
    driver: Arc<dyn ContainerDriver>,
    db: Arc<Database>,
    sessions: SessionManager,
}

impl Svc {
    pub fn new(driver: Arc<dyn ContainerDriver>, db: Arc<Database>, sessions: SessionManager) -> Self {
        Self { driver, db, sessions }
    }

    pub async fn connect(&self, fingerprint: &str) -> Result<Connected, SvcError> {
        let fingerprint = fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(SvcError::EmptyFingerprint);
        }

        self.sessions.acquire(fingerprint).await;

        // From here on every error path must release before returning.
        match self.connect_inner(fingerprint).await {
            Ok(connected) => Ok(connected),
            Err((err, container_id)) => {
                self.sessions
                    .release(fingerprint, container_id.as_deref().unwrap_or(""))
                    .await;
                Err(err)
            }
        }
    }

    async fn connect_inner(&self, fingerprint: &str) -> Result<Connected, (SvcError, Option<String>)> {
        let existing = self
            .db
            .boxes()
            .get_by_fingerprint(fingerprint)
            .await
            .map_err(|e| (SvcError::from(e), None))?;

        let container_id = match existing {
            None => {
                let box_id = uuid::Uuid::new_v4();
                let container_id = self
                    .driver
                    .create(box_id)
                    .await
                    .map_err(|e| (SvcError::from(e), None))?;

                self.driver
                    .ensure_running(&container_id)
                    .await
                    .map_err(|e| (SvcError::from(e), Some(container_id.clone())))?;

                self.db
                    .boxes()
                    .create(fingerprint, &container_id)
                    .await
                    .map_err(|e| (SvcError::from(e), Some(container_id.clone())))?;

                container_id
            }
            Some(existing) => {
                self.driver
                    .ensure_running(&existing.container_id)
                    .await
                    .map_err(|e| (SvcError::from(e), Some(existing.container_id.clone())))?;

                // Advisory only: log-only on failure, reconciled on next
                // reaper sweep or connect.
                if let Err(e) = self
                    .db
                    .boxes()
                    .update_status(fingerprint, BoxStatus::Running)
                    .await
                {
                    warn!(%fingerprint, error = %e, "failed to mark box running on reconnect");
                }

                existing.container_id
            }
        };

        if let Err(e) = self.db.boxes().touch(fingerprint).await {
            warn!(%fingerprint, error = %e, "failed to touch box on connect");
        }

        let attach = self
            .driver
            .attach(&container_id)
            .await
            .map_err(|e| (SvcError::from(e), Some(container_id.clone())))?;

        Ok(Connected {
            container_id: container_id.clone(),
            attach,
            guard: ReleaseGuard::new(self.sessions.clone(), fingerprint.to_string(), container_id),
        })
    }
}

type ReleaseState = (SessionManager, String, String);

/// Fallback path: a panic inside the pump task unwinds through this guard
/// before `finish()` ever gets to run. `release` can't be awaited from
/// `Drop`, so it's spawned — the event loop's ack is still bounded, it just
/// isn't waited on here.
fn release_on_unwind(state: ReleaseState) {
    let (sessions, fingerprint, container_id) = state;
    tokio::spawn(async move {
        sessions.release(&fingerprint, &container_id).await;
    });
}

/// Guarantees `SessionManager::release` runs exactly once for the acquire
/// this guard was created from — on the happy path via an explicit
/// `finish()` call, or on an unwind (panic in the pump task) via the
/// wrapped `scopeguard`.
pub struct ReleaseGuard {
    inner: ScopeGuard<ReleaseState, fn(ReleaseState)>,
}

impl ReleaseGuard {
    fn new(sessions: SessionManager, fingerprint: String, container_id: String) -> Self {
        Self {
            inner: scopeguard::guard((sessions, fingerprint, container_id), release_on_unwind),
        }
    }

    /// Normal-path release, awaited by the caller once the stream pump
    /// returns and the attach handle has been closed.
    pub async fn finish(self) {
        let (sessions, fingerprint, container_id) = ScopeGuard::into_inner(self.inner);
        sessions.release(&fingerprint, &container_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverResult;
    use async_trait::async_trait;
    use futures_util::{stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeDriver {
        create_calls: AtomicUsize,
        ensure_running_calls: AtomicUsize,
    }

    #[async_trait]
    impl ContainerDriver for FakeDriver {
        async fn create(&self, box_id: uuid::Uuid) -> DriverResult<String> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("container-{box_id}"))
        }
        async fn ensure_running(&self, _container_id: &str) -> DriverResult<()> {
            self.ensure_running_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn attach(&self, _container_id: &str) -> DriverResult<AttachHandle> {
            Ok(AttachHandle {
                input: Box::pin(tokio::io::sink()),
                output: stream::empty().boxed(),
            })
        }
        async fn stop(&self, _container_id: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn list_managed(&self) -> DriverResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn make_svc(driver: Arc<FakeDriver>) -> (Svc, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sessions = SessionManager::spawn(driver.clone(), db.clone());
        (Svc::new(driver, db.clone(), sessions), db)
    }

    #[tokio::test]
    async fn cold_connect_creates_box_and_calls_create_once() {
        let driver = Arc::new(FakeDriver::default());
        let (svc, db) = make_svc(driver.clone());

        let connected = svc.connect("alice").await.unwrap();
        assert_eq!(driver.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.ensure_running_calls.load(Ordering::SeqCst), 1);

        let row = db.boxes().get_by_fingerprint("alice").await.unwrap().unwrap();
        assert_eq!(row.container_id, connected.container_id);
        assert_eq!(row.status, BoxStatus::Running);

        connected.guard.finish().await;
    }

    #[tokio::test]
    async fn warm_reconnect_reuses_container_without_create() {
        let driver = Arc::new(FakeDriver::default());
        let (svc, _db) = make_svc(driver.clone());

        let first = svc.connect("bob").await.unwrap();
        let first_id = first.container_id.clone();
        first.guard.finish().await;

        let second = svc.connect("bob").await.unwrap();
        assert_eq!(second.container_id, first_id);
        assert_eq!(driver.create_calls.load(Ordering::SeqCst), 1);
        assert!(driver.ensure_running_calls.load(Ordering::SeqCst) >= 2);

        second.guard.finish().await;
    }

    #[tokio::test]
    async fn empty_fingerprint_is_rejected_without_touching_driver() {
        let driver = Arc::new(FakeDriver::default());
        let (svc, _db) = make_svc(driver.clone());

        let err = svc.connect("   ").await.unwrap_err();
        assert!(matches!(err, SvcError::EmptyFingerprint));
        assert_eq!(driver.create_calls.load(Ordering::SeqCst), 0);
    }
}
