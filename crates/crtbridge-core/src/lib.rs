//! Native handle lifecycle and completion bridging for crtbridge.
//!
//! crtbridge presents safe, callback-driven objects over a native,
//! event-loop-driven transfer engine. This crate holds the pieces every
//! wrapper shares:
//!
//! - [`NativeHandle`]: opaque identity of an engine-owned object.
//! - [`ResourceLifecycle`]: acquisition, idempotent release, and the
//!   immediate/deferred release policies.
//! - [`ReferenceGraph`]: explicit keep-alive edges between wrappers.
//! - [`CompletionBridge`]: exactly-once delivery of engine-thread callbacks.
//! - [`io`]: the event loop group, bootstrap, TLS context, and credentials
//!   provider resources that clients depend on.
//!
//! # Architecture
//!
//! ```text
//! caller ──> wrapper (Client / Connection / MetaRequest)
//!               │  owns
//!               v
//!        ResourceLifecycle ──edges──> ReferenceGraph ──> dependencies
//!               ^
//!               │ shutdown complete
//! engine thread ┴──> CompletionBridge ──> future / handler
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod graph;
pub mod handle;
pub mod io;
pub mod lifecycle;

pub use bridge::{CompletionBridge, CompletionFuture, Delivery};
pub use config::CrtConfig;
pub use error::{CrtError, CrtResult, ErrorCode};
pub use graph::ReferenceGraph;
pub use handle::{NativeHandle, ResourceId};
pub use io::{
    ClientBootstrap, Credentials, CredentialsProvider, EventLoopGroup, IoEngine, TlsContext,
    TlsContextOptions,
};
pub use lifecycle::{
    CrtResource, LifecycleStatus, ReleasePolicy, ResourceLifecycle, ShutdownCallback,
    ShutdownSignal,
};
