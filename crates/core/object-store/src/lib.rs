//! Object store construction and the publication [`Store`] wrapper.
//!
//! The replication objects live in a single S3-compatible bucket. This crate
//! builds the underlying [`object_store`] client from explicit options and
//! wraps it in a [`Store`] that handles content-type inference, the canned
//! ACL, and per-operation metrics.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};
use object_store::{aws::AmazonS3Builder, ClientOptions, ObjectStore};

mod store;

pub use self::store::{Store, StoreError, StoreMetrics};

/// The canned ACL request header applied to every operation on the store.
/// S3 only honors it on writes.
const ACL_HEADER: HeaderName = HeaderName::from_static("x-amz-acl");

/// Connection options for an S3-compatible object store.
///
/// Unlike stores configured purely from `AWS_*` environment variables, the
/// publisher receives explicit credentials through its own configuration.
#[derive(Debug, Clone)]
pub struct S3Options {
    /// Custom endpoint for S3-compatible stores. `None` selects the AWS
    /// endpoint for `region`.
    pub endpoint: Option<String>,
    pub bucket_name: String,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Canned ACL name, e.g. `public-read`.
    pub acl: Option<String>,
}

/// Creates an S3 object store client from the given options.
pub fn new_s3(options: &S3Options) -> Result<Arc<dyn ObjectStore>, ObjectStoreCreationError> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(&options.bucket_name);

    if let Some(endpoint) = &options.endpoint {
        // Custom endpoints are commonly plain HTTP inside the cluster.
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    if let Some(region) = &options.region {
        builder = builder.with_region(region);
    }
    if let Some(access_key) = &options.access_key {
        builder = builder.with_access_key_id(access_key);
    }
    if let Some(secret_key) = &options.secret_key {
        builder = builder.with_secret_access_key(secret_key);
    }
    if let Some(acl) = &options.acl {
        let value =
            HeaderValue::from_str(acl).map_err(|_| ObjectStoreCreationError::InvalidAcl {
                acl: acl.clone(),
            })?;
        let mut headers = HeaderMap::new();
        headers.insert(ACL_HEADER, value);
        builder =
            builder.with_client_options(ClientOptions::default().with_default_headers(headers));
    }

    let store = builder
        .build()
        .map_err(|source| ObjectStoreCreationError::Builder {
            bucket: options.bucket_name.clone(),
            source,
        })?;
    Ok(Arc::new(store))
}

/// Failed to create the object store client.
///
/// The options were read successfully but the underlying client could not be
/// instantiated. Common causes are missing credentials, a malformed endpoint
/// URL, or an unknown region.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreCreationError {
    #[error("failed to create object store for bucket {bucket}")]
    Builder {
        bucket: String,
        #[source]
        source: object_store::Error,
    },

    /// The configured canned ACL is not a valid header value.
    #[error("invalid canned ACL: {acl}")]
    InvalidAcl { acl: String },
}
