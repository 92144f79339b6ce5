//! OpenDAL Operator factory for possum blob stores

use opendal::Operator;

use possum_core::{PossumError, PossumResult};

/// Connection settings for an S3-compatible endpoint
/// (bucket layout lives in possum-core's StorageConfig)
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Build an OpenDAL Operator for any S3-compatible endpoint
///
/// Uses path-style addressing (default in opendal 0.55), which MinIO and
/// SeaweedFS require. Do NOT call enable_virtual_host_style() for these.
pub fn build_operator(cfg: &S3Settings) -> PossumResult<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator from possum-core config + loaded credentials.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &possum_core::config::StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> PossumResult<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            return Err(PossumError::Config(format!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            )));
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    build_operator(&S3Settings {
        endpoint: storage.endpoint.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key.to_string(),
    })
}

/// In-process operator backed by OpenDAL's memory service.
pub fn build_memory_operator() -> PossumResult<Operator> {
    let op = Operator::new(opendal::services::Memory::default())?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}
