//! Migration jobs
//!
//! A job copies namespaces to a target through the [`Migrator`] the embedder
//! supplies. Jobs run on the tokio runtime; the coordinator tracks status
//! and a per-job cancel flag polled between namespaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use parquedb_core::clock::{Clock, SystemClock};
use parquedb_core::ulid::{Ulid, UlidGenerator};

use crate::auth::{Claims, ControlError, TokenVerifier};

pub type JobId = Ulid;

/// Moves one namespace of data to the target named in the request.
#[async_trait]
pub trait Migrator: Send + Sync + 'static {
    async fn migrate_namespace(&self, ns: &str, to: &str) -> parquedb_core::Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub to: String,
    pub namespaces_total: usize,
    pub namespaces_done: usize,
    pub rows_migrated: u64,
    pub started_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub to: String,
    pub namespaces: Vec<String>,
}

struct Job {
    status: JobStatus,
    cancel: Arc<AtomicBool>,
}

pub struct MigrationCoordinator {
    verifier: Arc<dyn TokenVerifier>,
    migrator: Arc<dyn Migrator>,
    clock: Arc<dyn Clock>,
    ids: Arc<UlidGenerator>,
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl std::fmt::Debug for MigrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCoordinator")
            .field("jobs", &self.jobs.lock().len())
            .finish_non_exhaustive()
    }
}

impl MigrationCoordinator {
    pub fn new(verifier: Arc<dyn TokenVerifier>, migrator: Arc<dyn Migrator>) -> Self {
        Self {
            verifier,
            migrator,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn authorize(&self, token: Option<&str>) -> Result<Claims, ControlError> {
        let token = token.ok_or(ControlError::Unauthorized)?;
        self.verifier.verify(token)
    }

    /// Start a migration job. Returns the job id immediately; the work runs
    /// on the runtime.
    pub fn start_migration(
        &self,
        token: Option<&str>,
        request: MigrationRequest,
    ) -> Result<JobId, ControlError> {
        let claims = self.authorize(token)?;
        if request.to.is_empty() {
            return Err(ControlError::InvalidRequest("migration target is empty".into()));
        }
        if request.namespaces.is_empty() {
            return Err(ControlError::InvalidRequest("no namespaces requested".into()));
        }

        let now = self.clock.now_ns();
        let id = self.ids.generate(self.clock.now_ms() as u64);
        let cancel = Arc::new(AtomicBool::new(false));
        let status = JobStatus {
            id,
            state: JobState::Pending,
            to: request.to.clone(),
            namespaces_total: request.namespaces.len(),
            namespaces_done: 0,
            rows_migrated: 0,
            started_by: claims.subject,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().insert(
            id,
            Job {
                status,
                cancel: Arc::clone(&cancel),
            },
        );

        let jobs = Arc::clone(&self.jobs);
        let migrator = Arc::clone(&self.migrator);
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            run_job(jobs, migrator, clock, id, request, cancel).await;
        });
        Ok(id)
    }

    pub fn status(&self, token: Option<&str>, id: JobId) -> Result<JobStatus, ControlError> {
        self.authorize(token)?;
        self.jobs
            .lock()
            .get(&id)
            .map(|job| job.status.clone())
            .ok_or_else(|| ControlError::JobNotFound(id.to_string()))
    }

    /// Request cooperative cancellation. Returns whether the job was still
    /// cancellable.
    pub fn cancel(&self, token: Option<&str>, id: JobId) -> Result<bool, ControlError> {
        self.authorize(token)?;
        let jobs = self.jobs.lock();
        let job = jobs
            .get(&id)
            .ok_or_else(|| ControlError::JobNotFound(id.to_string()))?;
        match job.status.state {
            JobState::Pending | JobState::Running => {
                job.cancel.store(true, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn list_jobs(&self, token: Option<&str>) -> Result<Vec<JobStatus>, ControlError> {
        self.authorize(token)?;
        let mut statuses: Vec<JobStatus> = self
            .jobs
            .lock()
            .values()
            .map(|job| job.status.clone())
            .collect();
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }
}

async fn run_job(
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
    migrator: Arc<dyn Migrator>,
    clock: Arc<dyn Clock>,
    id: JobId,
    request: MigrationRequest,
    cancel: Arc<AtomicBool>,
) {
    let update = |f: &dyn Fn(&mut JobStatus)| {
        let mut jobs = jobs.lock();
        if let Some(job) = jobs.get_mut(&id) {
            f(&mut job.status);
            job.status.updated_at = clock.now_ns();
        }
    };

    update(&|status| status.state = JobState::Running);
    info!(job = %id, to = %request.to, namespaces = request.namespaces.len(), "migration started");

    for ns in &request.namespaces {
        // cancellation is polled between namespaces
        if cancel.load(Ordering::SeqCst) {
            update(&|status| status.state = JobState::Cancelled);
            info!(job = %id, "migration cancelled");
            return;
        }
        match migrator.migrate_namespace(ns, &request.to).await {
            Ok(rows) => update(&|status| {
                status.namespaces_done += 1;
                status.rows_migrated += rows;
            }),
            Err(e) => {
                warn!(job = %id, ns, error = %e, "migration failed");
                let message = e.to_string();
                update(&|status| {
                    status.state = JobState::Failed;
                    status.error = Some(message.clone());
                });
                return;
            }
        }
    }
    update(&|status| status.state = JobState::Completed);
    info!(job = %id, "migration completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{DenyAllVerifier, StaticTokenVerifier};
    use parquedb_core::error::Error;
    use std::time::Duration;

    struct CountingMigrator {
        delay: Duration,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Migrator for CountingMigrator {
        async fn migrate_namespace(&self, ns: &str, _to: &str) -> parquedb_core::Result<u64> {
            tokio::time::sleep(self.delay).await;
            if self.fail_on == Some(ns) {
                return Err(Error::Permanent(format!("cannot migrate {ns}")));
            }
            Ok(10)
        }
    }

    fn coordinator(fail_on: Option<&'static str>, delay: Duration) -> MigrationCoordinator {
        MigrationCoordinator::new(
            Arc::new(StaticTokenVerifier::new().allow("token", "amy")),
            Arc::new(CountingMigrator { delay, fail_on }),
        )
    }

    fn request() -> MigrationRequest {
        MigrationRequest {
            to: "s3://other-bucket".into(),
            namespaces: vec!["posts".into(), "users".into()],
        }
    }

    async fn wait_for_terminal(coordinator: &MigrationCoordinator, id: JobId) -> JobStatus {
        for _ in 0..200 {
            let status = coordinator.status(Some("token"), id).unwrap();
            if !matches!(status.state, JobState::Pending | JobState::Running) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn all_operations_require_a_token() {
        let coordinator = coordinator(None, Duration::ZERO);
        assert_eq!(
            coordinator.start_migration(None, request()).unwrap_err().status(),
            401
        );
        assert_eq!(coordinator.list_jobs(None).unwrap_err().status(), 401);
        assert_eq!(
            coordinator.status(Some("bad-token"), Ulid::NIL).unwrap_err().status(),
            401
        );
        assert_eq!(coordinator.cancel(None, Ulid::NIL).unwrap_err().status(), 401);
    }

    #[tokio::test]
    async fn without_verifier_everything_is_401() {
        let coordinator = MigrationCoordinator::new(
            Arc::new(DenyAllVerifier),
            Arc::new(CountingMigrator {
                delay: Duration::ZERO,
                fail_on: None,
            }),
        );
        assert_eq!(
            coordinator
                .start_migration(Some("any-token"), request())
                .unwrap_err()
                .status(),
            401
        );
    }

    #[tokio::test]
    async fn job_runs_to_completion() {
        let coordinator = coordinator(None, Duration::ZERO);
        let id = coordinator.start_migration(Some("token"), request()).unwrap();
        let status = wait_for_terminal(&coordinator, id).await;
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.namespaces_done, 2);
        assert_eq!(status.rows_migrated, 20);
        assert_eq!(status.started_by, "amy");

        let listed = coordinator.list_jobs(Some("token")).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn failures_surface_in_status() {
        let coordinator = coordinator(Some("users"), Duration::ZERO);
        let id = coordinator.start_migration(Some("token"), request()).unwrap();
        let status = wait_for_terminal(&coordinator, id).await;
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.namespaces_done, 1);
        assert!(status.error.unwrap().contains("users"));
    }

    #[tokio::test]
    async fn cancellation_between_namespaces() {
        let coordinator = coordinator(None, Duration::from_millis(50));
        let id = coordinator
            .start_migration(
                Some("token"),
                MigrationRequest {
                    to: "target".into(),
                    namespaces: (0..50).map(|n| format!("ns{n}")).collect(),
                },
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.cancel(Some("token"), id).unwrap());
        let status = wait_for_terminal(&coordinator, id).await;
        assert_eq!(status.state, JobState::Cancelled);
        assert!(status.namespaces_done < 50);
    }

    #[tokio::test]
    async fn empty_requests_rejected() {
        let coordinator = coordinator(None, Duration::ZERO);
        let err = coordinator
            .start_migration(
                Some("token"),
                MigrationRequest {
                    to: String::new(),
                    namespaces: vec!["posts".into()],
                },
            )
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
