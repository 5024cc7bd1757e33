//! S3 clients and meta-requests.
//!
//! A meta-request runs as one tokio task: it reads the request body, serves
//! the request from the object store and streams the response body back in
//! `part_size` pieces with their object ranges. A client is torn down only
//! after it was destroyed and every meta-request it started has shut down.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crtbridge_core::{ErrorCode, NativeHandle, ShutdownCallback};
use crtbridge_http::HttpRequest;
use crtbridge_s3::{
    ClientConfig, MetaRequestDispatch, MetaRequestSink, MetaRequestType, S3Engine,
    S3FinishedResponseContext,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::{INVALID_RESPONSE_STATUS, Inner, LoopbackEngine, Teardown, read_body};
use crate::service;

pub(crate) struct ClientState {
    config: ClientConfig,
    progress: Mutex<ClientProgress>,
    on_shutdown: Mutex<Option<ShutdownCallback>>,
}

#[derive(Debug, Default)]
struct ClientProgress {
    in_flight: usize,
    destroyed: bool,
}

impl ClientState {
    fn part_size(&self) -> usize {
        usize::try_from(self.config.part_size).unwrap_or(usize::MAX).max(1)
    }
}

pub(crate) struct MetaRequestState {
    client: NativeHandle,
    sink: Arc<dyn MetaRequestSink>,
    cancelled: AtomicBool,
    teardown: Teardown,
}

impl MetaRequestState {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MetaRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRequestState")
            .field("client", &self.client)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn client(&self, handle: NativeHandle) -> Option<Arc<ClientState>> {
        self.clients.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    fn meta_request(&self, handle: NativeHandle) -> Option<Arc<MetaRequestState>> {
        self.meta_requests
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Tear a meta-request down and let its client go if that was the last.
    fn shut_down_meta_request(&self, handle: NativeHandle) {
        let Some((_, state)) = self.meta_requests.remove(&handle) else {
            return;
        };
        debug!(meta_request = ?handle, "loopback meta request shut down");
        state.sink.on_shutdown();

        let Some(client) = self.client(state.client) else {
            return;
        };
        let due = {
            let mut progress = client.progress.lock();
            progress.in_flight = progress.in_flight.saturating_sub(1);
            progress.destroyed && progress.in_flight == 0
        };
        if due {
            self.shut_down_client(state.client);
        }
    }

    fn shut_down_client(&self, handle: NativeHandle) {
        let Some((_, client)) = self.clients.remove(&handle) else {
            return;
        };
        let callback = client.on_shutdown.lock().take();
        debug!(client = ?handle, "loopback s3 client shut down");
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl S3Engine for LoopbackEngine {
    fn new_client(
        &self,
        config: &ClientConfig,
        on_shutdown: ShutdownCallback,
    ) -> Result<NativeHandle, ErrorCode> {
        let inner = &self.inner;
        inner.check_fault("new_client")?;
        let dependencies = [Some(config.bootstrap), Some(config.credentials_provider), config.tls_context];
        if !dependencies.into_iter().flatten().all(|h| self.is_live_io(h)) {
            warn!(region = %config.region, "loopback client refers to released i/o resources");
            return Err(ErrorCode::INVALID_ARGUMENT);
        }

        let handle = inner.mint();
        inner.record("new_client", Some(handle));
        inner.clients.insert(
            handle,
            Arc::new(ClientState {
                config: config.clone(),
                progress: Mutex::new(ClientProgress::default()),
                on_shutdown: Mutex::new(Some(on_shutdown)),
            }),
        );
        debug!(client = ?handle, region = %config.region, part_size = config.part_size, "loopback s3 client created");
        Ok(handle)
    }

    fn destroy_client(&self, client: NativeHandle) {
        let inner = &self.inner;
        inner.record("destroy_client", Some(client));
        let Some(state) = inner.client(client) else {
            return;
        };
        let due = {
            let mut progress = state.progress.lock();
            progress.destroyed = true;
            progress.in_flight == 0
        };
        if due {
            let task_inner = Arc::clone(inner);
            inner.spawn(async move { task_inner.shut_down_client(client) });
        }
    }

    fn make_meta_request(
        &self,
        client: NativeHandle,
        dispatch: MetaRequestDispatch,
        sink: Arc<dyn MetaRequestSink>,
    ) -> Result<NativeHandle, ErrorCode> {
        let inner = &self.inner;
        inner.check_fault("make_meta_request")?;
        let Some(client_state) = inner.client(client) else {
            return Err(ErrorCode::INVALID_ARGUMENT);
        };
        if let Some(credentials) = dispatch.credentials_provider {
            if self.access_key_id(credentials).is_none() {
                warn!(?credentials, "loopback meta request signed with released credentials");
                return Err(ErrorCode::INVALID_ARGUMENT);
            }
        }
        {
            let mut progress = client_state.progress.lock();
            if progress.destroyed {
                return Err(ErrorCode::INVALID_ARGUMENT);
            }
            progress.in_flight += 1;
        }

        let handle = inner.mint();
        inner.record("make_meta_request", Some(handle));
        let state = Arc::new(MetaRequestState {
            client,
            sink,
            cancelled: AtomicBool::new(false),
            teardown: Teardown::default(),
        });
        inner.meta_requests.insert(handle, Arc::clone(&state));

        let part_size = client_state.part_size();
        let task_inner = Arc::clone(inner);
        inner.spawn(async move {
            run_meta_request(&task_inner, &state, dispatch, part_size).await;
            if state.teardown.finish() {
                task_inner.shut_down_meta_request(handle);
            }
        });
        Ok(handle)
    }

    fn cancel_meta_request(&self, meta_request: NativeHandle) {
        self.inner.record("cancel_meta_request", Some(meta_request));
        if let Some(state) = self.inner.meta_request(meta_request) {
            state.cancelled.store(true, Ordering::Release);
        }
    }

    fn increment_read_window(&self, meta_request: NativeHandle, bytes: u64) {
        self.inner.record("increment_read_window", Some(meta_request));
        debug!(?meta_request, bytes, "loopback read window grown");
    }

    fn destroy_meta_request(&self, meta_request: NativeHandle) {
        let inner = &self.inner;
        inner.record("destroy_meta_request", Some(meta_request));
        let Some(state) = inner.meta_request(meta_request) else {
            return;
        };
        state.cancelled.store(true, Ordering::Release);
        if state.teardown.release() {
            let task_inner = Arc::clone(inner);
            inner.spawn(async move { task_inner.shut_down_meta_request(meta_request) });
        }
    }
}

async fn run_meta_request(
    inner: &Inner,
    state: &MetaRequestState,
    dispatch: MetaRequestDispatch,
    part_size: usize,
) {
    tokio::task::yield_now().await;
    let sink = &state.sink;
    let cancelled = || state.is_cancelled();
    if cancelled() {
        sink.on_finished(S3FinishedResponseContext::failed(ErrorCode::CANCELED));
        return;
    }

    let request = match HttpRequest::unmarshal(&dispatch.request) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "loopback meta request carries a malformed request");
            sink.on_finished(S3FinishedResponseContext::failed(ErrorCode::INVALID_ARGUMENT));
            return;
        }
    };
    let Some(body) = read_body(dispatch.body.as_ref(), part_size, cancelled) else {
        sink.on_finished(S3FinishedResponseContext::failed(ErrorCode::CANCELED));
        return;
    };

    let copy = dispatch.meta_request_type == MetaRequestType::CopyObject;
    let response = service::serve(&inner.store, &request, body, copy);
    debug!(
        kind = ?dispatch.meta_request_type,
        method = %request.method(),
        path = request.encoded_path(),
        status = response.status,
        "loopback meta request served"
    );

    sink.on_response_headers(response.status, &response.headers);
    if !response.is_success() {
        sink.on_finished(S3FinishedResponseContext {
            error_code: INVALID_RESPONSE_STATUS,
            response_status: response.status,
            error_payload: response.body,
        });
        return;
    }

    let mut start = content_range_start(&response.headers).unwrap_or(0);
    for part in response.body.chunks(part_size) {
        tokio::task::yield_now().await;
        if cancelled() {
            sink.on_finished(S3FinishedResponseContext::failed(ErrorCode::CANCELED));
            return;
        }
        let end = start + part.len() as u64;
        sink.on_response_body(part, start, end);
        start = end;
    }
    sink.on_finished(S3FinishedResponseContext::success(response.status));
}

fn content_range_start(headers: &[crtbridge_http::HttpHeader]) -> Option<u64> {
    let range = headers.iter().find(|h| h.is("content-range"))?.value();
    range
        .strip_prefix("bytes ")?
        .split('-')
        .next()?
        .parse()
        .ok()
}
