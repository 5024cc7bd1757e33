//! S3 client and meta-requests over the native engine.
//!
//! An [`S3Client`] turns one logical transfer (a meta-request) into as many
//! part requests as the engine sees fit. The caller supplies an
//! [`HttpRequest`](crtbridge_http::HttpRequest) and an
//! [`S3MetaRequestResponseHandler`]; the engine streams headers and body
//! parts back and finishes with exactly one [`S3FinishedResponseContext`].
//!
//! # Examples
//!
//! ```no_run
//! # use crtbridge_s3::S3Client;
//! # fn download(client: &S3Client) -> crtbridge_core::CrtResult<()> {
//! use crtbridge_http::HttpRequest;
//! use crtbridge_s3::{BufferedResponseHandler, MetaRequestType, S3MetaRequestOptions};
//!
//! # tokio_test::block_on(async {
//! let (handler, response) = BufferedResponseHandler::new();
//! let request = HttpRequest::new(http::Method::GET, "/bucket/key")
//!     .with_header("Host", "bucket.s3.us-east-1.amazonaws.com");
//! let options = S3MetaRequestOptions::builder()
//!     .meta_request_type(MetaRequestType::GetObject)
//!     .http_request(request)
//!     .response_handler(Box::new(handler))
//!     .build();
//!
//! let meta_request = client.make_meta_request(options)?;
//! let response = response.await?;
//! meta_request.close();
//! println!("{} bytes", response.body.len());
//! # Ok(())
//! # })
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod handler;
pub mod meta_request;
pub mod options;

#[cfg(test)]
mod testing;

pub use client::S3Client;
pub use engine::{ClientConfig, MetaRequestDispatch, S3Engine};
pub use handler::{
    BufferedResponse, BufferedResponseHandler, MetaRequestAdapter, MetaRequestSink,
    S3FinishedResponseContext, S3MetaRequestResponseHandler,
};
pub use meta_request::S3MetaRequest;
pub use options::{
    DEFAULT_THROUGHPUT_TARGET_GBPS, JitterMode, MetaRequestType, S3ClientOptions,
    S3MetaRequestOptions, StandardRetryOptions,
};
