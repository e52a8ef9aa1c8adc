//! Artifact store construction.

use opendal::{services, Operator};

use crate::config::StorageConfig;

/// S3-compatible operator. Path-style addressing is the default, which is
/// what MinIO and most self-hosted stores expect.
pub fn s3_operator(config: &StorageConfig) -> Result<Operator, opendal::Error> {
    let mut builder = services::S3::default()
        .bucket(&config.bucket)
        .region(&config.region);

    if let Some(ref endpoint) = config.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(ref access_key) = config.access_key {
        builder = builder.access_key_id(access_key);
    }
    if let Some(ref secret_key) = config.secret_key {
        builder = builder.secret_access_key(secret_key);
    }

    let operator = Operator::new(builder)?.finish();
    tracing::info!(
        bucket = %config.bucket,
        region = %config.region,
        endpoint = config.endpoint.as_deref().unwrap_or("default"),
        "Artifact store initialized"
    );
    Ok(operator)
}
