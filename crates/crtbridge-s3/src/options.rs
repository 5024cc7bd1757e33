//! Client and meta-request options.
//!
//! These are plain data holders. Required fields are optional in the type so
//! a half-built value can exist; [`S3ClientOptions::validate`] rejects it
//! before any native call is made.

use std::fmt;
use std::sync::Arc;

use crtbridge_core::config::DEFAULT_PART_SIZE;
use crtbridge_core::{
    ClientBootstrap, CredentialsProvider, CrtConfig, CrtError, CrtResult, TlsContext,
};
use crtbridge_http::HttpRequest;
use http::Uri;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::handler::S3MetaRequestResponseHandler;

/// Default throughput target in gigabits per second.
pub const DEFAULT_THROUGHPUT_TARGET_GBPS: f64 = 10.0;

/// Kind of transfer a meta-request performs.
///
/// Typed kinds let the engine split the transfer into parallel part
/// requests; [`Default`](Self::Default) sends the request as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaRequestType {
    /// Send the request unchanged.
    #[default]
    Default,
    /// Ranged, parallel download.
    GetObject,
    /// Multipart upload.
    PutObject,
    /// Server-side copy.
    CopyObject,
}

impl MetaRequestType {
    /// The engine's numeric value.
    #[must_use]
    pub fn native_value(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::GetObject => 1,
            Self::PutObject => 2,
            Self::CopyObject => 3,
        }
    }

    /// Look up a kind by its engine value.
    #[must_use]
    pub fn from_native(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::GetObject),
            2 => Some(Self::PutObject),
            3 => Some(Self::CopyObject),
            _ => None,
        }
    }
}

/// Retry backoff jitter strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JitterMode {
    /// The engine's default strategy.
    #[default]
    Default,
    /// No jitter.
    None,
    /// Full jitter.
    Full,
    /// Decorrelated jitter.
    Decorrelated,
}

/// Standard retry strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct StandardRetryOptions {
    /// Maximum retries per request.
    #[builder(default = 10)]
    pub max_retries: u32,

    /// Base backoff in milliseconds.
    #[builder(default = 500)]
    pub backoff_scale_factor_ms: u32,

    /// Jitter applied to the backoff.
    #[builder(default)]
    pub jitter_mode: JitterMode,

    /// Initial capacity of the retry token bucket.
    #[builder(default = 500)]
    pub initial_bucket_capacity: u64,
}

impl Default for StandardRetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_scale_factor_ms: 500,
            jitter_mode: JitterMode::Default,
            initial_bucket_capacity: 500,
        }
    }
}

/// Options for an [`S3Client`](crate::S3Client).
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use crtbridge_core::{ClientBootstrap, CredentialsProvider};
/// # fn options(bootstrap: Arc<ClientBootstrap>, credentials: Arc<CredentialsProvider>) {
/// use crtbridge_s3::S3ClientOptions;
///
/// let options = S3ClientOptions::builder()
///     .region("us-west-2")
///     .client_bootstrap(bootstrap)
///     .credentials_provider(credentials)
///     .part_size(16 * 1024 * 1024)
///     .build();
/// assert!(options.validate().is_ok());
/// # }
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct S3ClientOptions {
    /// Signing region. Required.
    #[builder(default, setter(into, strip_option))]
    pub region: Option<String>,

    /// Endpoint override (host name).
    #[builder(default, setter(into, strip_option))]
    pub endpoint: Option<String>,

    /// Bootstrap used to open connections. Required.
    #[builder(default, setter(strip_option))]
    pub client_bootstrap: Option<Arc<ClientBootstrap>>,

    /// Default signing credentials. Required.
    #[builder(default, setter(strip_option))]
    pub credentials_provider: Option<Arc<CredentialsProvider>>,

    /// TLS context; its presence turns TLS on.
    #[builder(default, setter(strip_option))]
    pub tls_context: Option<Arc<TlsContext>>,

    /// Use TLS even without an explicit context.
    #[builder(default = true)]
    pub tls_enabled: bool,

    /// Part size for split transfers, in bytes.
    #[builder(default = DEFAULT_PART_SIZE)]
    pub part_size: u64,

    /// Throughput target in gigabits per second.
    #[builder(default = DEFAULT_THROUGHPUT_TARGET_GBPS)]
    pub throughput_target_gbps: f64,

    /// Connection cap; `0` lets the engine derive it from the throughput
    /// target.
    #[builder(default = 0)]
    pub max_connections: usize,

    /// Retry strategy; `None` uses the engine default.
    #[builder(default, setter(strip_option))]
    pub standard_retry_options: Option<StandardRetryOptions>,

    /// Compute `Content-MD5` for uploads.
    #[builder(default = false)]
    pub compute_content_md5: bool,
}

impl S3ClientOptions {
    /// Check that required options are present and sane.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidConfiguration`] naming the first problem.
    pub fn validate(&self) -> CrtResult<()> {
        if self.region.as_deref().is_none_or(str::is_empty) {
            return Err(invalid("region is required"));
        }
        if self.client_bootstrap.is_none() {
            return Err(invalid("client bootstrap is required"));
        }
        if self.credentials_provider.is_none() {
            return Err(invalid("credentials provider is required"));
        }
        if self.part_size == 0 {
            return Err(invalid("part size must be positive"));
        }
        if !(self.throughput_target_gbps.is_finite() && self.throughput_target_gbps > 0.0) {
            return Err(invalid("throughput target must be a positive number"));
        }
        Ok(())
    }

    /// Fill unset or defaulted values from runtime configuration.
    ///
    /// The region is taken from `config` only when missing; part size and
    /// throughput target only when they still hold the built-in defaults.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn with_config_defaults(mut self, config: &CrtConfig) -> Self {
        if self.region.is_none() {
            self.region = Some(config.default_region.clone());
        }
        if self.part_size == DEFAULT_PART_SIZE {
            self.part_size = config.default_part_size;
        }
        if self.throughput_target_gbps == DEFAULT_THROUGHPUT_TARGET_GBPS {
            self.throughput_target_gbps = config.default_throughput_target_gbps;
        }
        self
    }

    /// Whether a client built from these options uses TLS by default.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.tls_context.is_some() || self.tls_enabled
    }
}

fn invalid(reason: &str) -> CrtError {
    CrtError::InvalidConfiguration(reason.to_owned())
}

/// Options for one meta-request.
///
/// Missing `http_request` or `response_handler` is rejected at dispatch by
/// [`S3Client::make_meta_request`](crate::S3Client::make_meta_request).
#[derive(TypedBuilder)]
pub struct S3MetaRequestOptions {
    /// Kind of transfer.
    #[builder(default)]
    pub meta_request_type: MetaRequestType,

    /// The request to send.
    #[builder(default, setter(strip_option))]
    pub http_request: Option<HttpRequest>,

    /// Receives the response from engine threads.
    #[builder(default, setter(strip_option))]
    pub response_handler: Option<Box<dyn S3MetaRequestResponseHandler>>,

    /// Signing credentials for this request only. Kept alive until the
    /// meta-request shuts down.
    #[builder(default, setter(strip_option))]
    pub credentials_provider: Option<Arc<CredentialsProvider>>,

    /// Endpoint override; replaces the `Host` header and decides TLS and
    /// port.
    #[builder(default, setter(strip_option))]
    pub uri: Option<Uri>,
}

impl fmt::Debug for S3MetaRequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3MetaRequestOptions")
            .field("meta_request_type", &self.meta_request_type)
            .field("http_request", &self.http_request)
            .field("has_response_handler", &self.response_handler.is_some())
            .field("credentials_provider", &self.credentials_provider)
            .field("uri", &self.uri)
            .finish()
    }
}
