//! HTTP request dispatch over the native engine.
//!
//! This crate provides:
//!
//! - **Requests** ([`request`], [`body`]): the request representation, its
//!   marshalled image, and lazily pulled body sources.
//! - **Dispatch** ([`dispatch`]): TLS, port and `Host` resolution shared with
//!   the S3 client.
//! - **Responses** ([`response`]): handler traits and the adapter that
//!   enforces exactly-once completion.
//! - **Pooling** ([`manager`], [`connection`], [`stream`]): connection leasing,
//!   per-connection requests, and in-flight streams.
//! - **Engine boundary** ([`engine`]): the [`HttpEngine`] trait.

pub mod body;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod manager;
pub mod request;
pub mod response;
pub mod stream;

#[cfg(test)]
mod testing;

pub use body::{BytesBodyStream, HttpRequestBodyStream};
pub use connection::HttpClientConnection;
pub use dispatch::PreparedRequest;
pub use engine::{AcquireCallback, ConnectionManagerConfig, HttpEngine};
pub use error::{HttpError, HttpResult};
pub use manager::{AcquireConnection, HttpClientConnectionManager, HttpClientConnectionManagerOptions};
pub use request::{HttpHeader, HttpRequest};
pub use response::{HeaderBlock, HttpStreamResponseHandler, StreamAdapter, StreamSink};
pub use stream::HttpStream;
