//! An in-process engine for crtbridge.
//!
//! [`LoopbackEngine`] implements the I/O, HTTP and S3 engine boundaries
//! without sockets: requests are served from an in-memory
//! [`ObjectStore`](store::ObjectStore) and callbacks run on tokio tasks, the
//! way a native engine calls back from its event loop threads. It follows
//! the same teardown protocol as a native engine, so wrappers can be tested
//! end to end:
//!
//! - meta-requests and streams report shutdown only after both their
//!   terminal callback and their release;
//! - a client reports shutdown after it was destroyed and all of its
//!   meta-requests have shut down;
//! - a connection pool reports shutdown synchronously once it is released
//!   with nothing leased.
//!
//! Every boundary call is recorded ([`LoopbackEngine::calls`]) and any
//! fallible call can be made to fail once ([`LoopbackEngine::fail_next`]).

pub mod engine;
mod io;
mod pool;
mod s3;
pub mod service;
pub mod store;

pub use engine::{CallRecord, INVALID_RESPONSE_STATUS, LoopbackEngine};
pub use store::{ObjectStore, StoredObject};
