//! Recording engine fakes shared by this crate's unit tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crtbridge_core::{
    ClientBootstrap, Credentials, CredentialsProvider, ErrorCode, EventLoopGroup, IoEngine,
    NativeHandle, ShutdownCallback, TlsContextOptions,
};
use parking_lot::Mutex;

use crate::client::S3Client;
use crate::engine::{ClientConfig, MetaRequestDispatch, S3Engine};
use crate::handler::MetaRequestSink;
use crate::options::S3ClientOptions;

/// Hands out fresh handles for I/O resources.
#[derive(Debug, Default)]
pub(crate) struct IoStub(AtomicU64);

impl IoStub {
    fn mint(&self) -> Result<NativeHandle, ErrorCode> {
        let raw = self.0.fetch_add(1, Ordering::SeqCst) + 1000;
        Ok(NativeHandle::from_raw(raw).expect("non-null"))
    }
}

impl IoEngine for IoStub {
    fn new_event_loop_group(&self, _threads: usize) -> Result<NativeHandle, ErrorCode> {
        self.mint()
    }

    fn new_client_bootstrap(
        &self,
        _event_loop_group: NativeHandle,
        _host_resolver_max_entries: usize,
    ) -> Result<NativeHandle, ErrorCode> {
        self.mint()
    }

    fn new_tls_context(&self, _options: &TlsContextOptions) -> Result<NativeHandle, ErrorCode> {
        self.mint()
    }

    fn new_static_credentials_provider(
        &self,
        _credentials: &Credentials,
    ) -> Result<NativeHandle, ErrorCode> {
        self.mint()
    }

    fn release_io_resource(&self, _handle: NativeHandle) {}
}

/// Synchronous S3 engine that records every boundary call.
///
/// Meta-requests never progress on their own; tests drive them through
/// [`last_sink`](Self::last_sink).
#[derive(Default)]
pub(crate) struct RecordingS3Engine {
    next: AtomicU64,
    pub calls: Mutex<Vec<(&'static str, NativeHandle)>>,
    pub fail_with: Mutex<Option<ErrorCode>>,
    pub configs: Mutex<Vec<ClientConfig>>,
    pub dispatches: Mutex<Vec<MetaRequestDispatch>>,
    client_shutdowns: Mutex<Vec<ShutdownCallback>>,
    sinks: Mutex<Vec<Arc<dyn MetaRequestSink>>>,
}

impl fmt::Debug for RecordingS3Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingS3Engine")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl RecordingS3Engine {
    fn mint(&self) -> NativeHandle {
        let raw = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        NativeHandle::from_raw(raw).expect("non-null handle")
    }

    fn record(&self, operation: &'static str, handle: NativeHandle) {
        self.calls.lock().push((operation, handle));
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|(op, _)| *op == operation).count()
    }

    /// Report every destroyed client as shut down.
    pub fn finish_client_shutdowns(&self) {
        let callbacks: Vec<_> = self.client_shutdowns.lock().drain(..).collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn last_sink(&self) -> Option<Arc<dyn MetaRequestSink>> {
        self.sinks.lock().last().cloned()
    }

    fn fault(&self) -> Result<(), ErrorCode> {
        match *self.fail_with.lock() {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

impl S3Engine for RecordingS3Engine {
    fn new_client(
        &self,
        config: &ClientConfig,
        on_shutdown: ShutdownCallback,
    ) -> Result<NativeHandle, ErrorCode> {
        self.fault()?;
        let handle = self.mint();
        self.record("new_client", handle);
        self.configs.lock().push(config.clone());
        self.client_shutdowns.lock().push(on_shutdown);
        Ok(handle)
    }

    fn destroy_client(&self, client: NativeHandle) {
        self.record("destroy_client", client);
    }

    fn make_meta_request(
        &self,
        client: NativeHandle,
        dispatch: MetaRequestDispatch,
        sink: Arc<dyn MetaRequestSink>,
    ) -> Result<NativeHandle, ErrorCode> {
        self.fault()?;
        self.record("make_meta_request", client);
        self.dispatches.lock().push(dispatch);
        self.sinks.lock().push(sink);
        Ok(self.mint())
    }

    fn cancel_meta_request(&self, meta_request: NativeHandle) {
        self.record("cancel_meta_request", meta_request);
    }

    fn increment_read_window(&self, meta_request: NativeHandle, _bytes: u64) {
        self.record("increment_read_window", meta_request);
    }

    fn destroy_meta_request(&self, meta_request: NativeHandle) {
        self.record("destroy_meta_request", meta_request);
    }
}

/// A recording engine plus the I/O resources a client needs.
pub(crate) struct Fixture {
    pub engine: Arc<RecordingS3Engine>,
    pub io: Arc<IoStub>,
    pub bootstrap: Arc<ClientBootstrap>,
    pub credentials: Arc<CredentialsProvider>,
}

impl Fixture {
    pub fn new() -> Self {
        let io = Arc::new(IoStub::default());
        let group = EventLoopGroup::new(io.clone(), 1).expect("event loop group");
        let bootstrap = ClientBootstrap::new(io.clone(), group, 8).expect("bootstrap");
        let credentials = CredentialsProvider::new_static(io.clone(), &Credentials::new("AKID", "secret"))
            .expect("credentials provider");
        Self {
            engine: Arc::new(RecordingS3Engine::default()),
            io,
            bootstrap,
            credentials,
        }
    }

    /// Valid client options over this fixture's resources.
    pub fn options(&self) -> S3ClientOptions {
        S3ClientOptions::builder()
            .region("us-east-1")
            .client_bootstrap(self.bootstrap.clone())
            .credentials_provider(self.credentials.clone())
            .build()
    }

    pub fn client(&self, options: S3ClientOptions) -> S3Client {
        S3Client::new(self.engine.clone(), options).expect("s3 client")
    }

    pub fn credentials_provider(&self, credentials: &Credentials) -> Arc<CredentialsProvider> {
        CredentialsProvider::new_static(self.io.clone(), credentials).expect("credentials provider")
    }
}
