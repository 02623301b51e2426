// parquedb-migrate - Migration coordinator
//
// Four control operations (start, status, cancel, list), each gated by a
// bearer token. HTTP framing and JWT verification plumbing live outside this
// crate; the coordinator only consumes a TokenVerifier. Without one
// configured, every call is rejected with the 401 contract. Cancellation is
// cooperative: a running job polls its cancel flag between namespaces.

pub mod auth;
pub mod coordinator;

pub use auth::{Claims, ControlError, DenyAllVerifier, StaticTokenVerifier, TokenVerifier};
pub use coordinator::{
    JobId, JobState, JobStatus, MigrationCoordinator, MigrationRequest, Migrator,
};
