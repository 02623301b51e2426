// Backend construction
//
// A deployment points at exactly one backend. Credential problems surface
// here, at construction, never on first use.

use opendal::Operator;

use parquedb_core::error::{Error, Result};

pub use crate::opendal_store::OpendalStore;

/// In-memory backend, primarily for tests and ephemeral datasets.
#[cfg(feature = "services-memory")]
pub fn new_memory() -> Result<OpendalStore> {
    let op = Operator::new(opendal::services::Memory::default())
        .map_err(construction_error)?
        .finish();
    Ok(OpendalStore::new(op))
}

/// Filesystem backend rooted at a directory.
#[cfg(feature = "services-fs")]
pub fn new_fs(root: &str) -> Result<OpendalStore> {
    if root.is_empty() {
        return Err(Error::InvalidInput("fs backend requires a root".into()));
    }
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder).map_err(construction_error)?.finish();
    Ok(OpendalStore::new(op))
}

/// S3-compatible backend: `bucket + '/' + prefix`, optional custom endpoint.
#[cfg(feature = "services-s3")]
pub fn new_s3(
    bucket: &str,
    region: &str,
    prefix: Option<&str>,
    endpoint: Option<&str>,
    access_key_id: Option<&str>,
    secret_access_key: Option<&str>,
) -> Result<OpendalStore> {
    if bucket.is_empty() {
        return Err(Error::InvalidInput("s3 backend requires a bucket".into()));
    }
    // Explicit credentials must come as a pair; with neither set the
    // ambient provider chain applies.
    if access_key_id.is_some() != secret_access_key.is_some() {
        return Err(Error::InvalidInput(
            "s3 credentials require both access key id and secret".into(),
        ));
    }

    let mut builder = opendal::services::S3::default().bucket(bucket).region(region);
    if let Some(prefix) = prefix {
        builder = builder.root(&format!("/{}", prefix.trim_matches('/')));
    }
    if let Some(endpoint) = endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(key) = access_key_id {
        builder = builder.access_key_id(key);
    }
    if let Some(secret) = secret_access_key {
        builder = builder.secret_access_key(secret);
    }

    let op = Operator::new(builder).map_err(construction_error)?.finish();
    Ok(OpendalStore::new(op))
}

/// R2 backend (Cloudflare) over the S3-compatible endpoint.
#[cfg(feature = "services-s3")]
pub fn new_r2(
    bucket: &str,
    endpoint: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<OpendalStore> {
    if access_key_id.is_empty() || secret_access_key.is_empty() {
        return Err(Error::InvalidInput(
            "r2 backend requires explicit credentials".into(),
        ));
    }
    new_s3(
        bucket,
        "auto",
        None,
        Some(endpoint),
        Some(access_key_id),
        Some(secret_access_key),
    )
}

/// KV-SQLite blob plane: objects stored as rows in a local SQLite table.
#[cfg(feature = "services-sqlite")]
pub fn new_sqlite(connection_string: &str, table: &str) -> Result<OpendalStore> {
    if connection_string.is_empty() {
        return Err(Error::InvalidInput(
            "sqlite backend requires a connection string".into(),
        ));
    }
    let builder = opendal::services::Sqlite::default()
        .connection_string(connection_string)
        .table(if table.is_empty() { "parquedb_blobs" } else { table })
        .key_field("key")
        .value_field("value");
    let op = Operator::new(builder).map_err(construction_error)?.finish();
    Ok(OpendalStore::new(op))
}

fn construction_error(e: opendal::Error) -> Error {
    Error::Permanent(format!("backend construction failed: {e}"))
}
