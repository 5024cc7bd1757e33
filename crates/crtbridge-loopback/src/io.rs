use crtbridge_core::{Credentials, ErrorCode, IoEngine, NativeHandle, TlsContextOptions};
use tracing::debug;

use crate::engine::LoopbackEngine;

/// An I/O resource the engine has handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IoResource {
    EventLoopGroup,
    ClientBootstrap,
    TlsContext,
    CredentialsProvider { access_key_id: String },
}

impl LoopbackEngine {
    fn new_io_resource(
        &self,
        operation: &'static str,
        resource: IoResource,
    ) -> Result<NativeHandle, ErrorCode> {
        let inner = &self.inner;
        inner.check_fault(operation)?;
        let handle = inner.mint();
        inner.record(operation, Some(handle));
        inner.io.insert(handle, resource);
        Ok(handle)
    }

    pub(crate) fn is_live_io(&self, handle: NativeHandle) -> bool {
        self.inner.io.contains_key(&handle)
    }

    /// Access key id behind a live credentials provider handle.
    pub(crate) fn access_key_id(&self, handle: NativeHandle) -> Option<String> {
        self.inner.io.get(&handle).and_then(|entry| match entry.value() {
            IoResource::CredentialsProvider { access_key_id } => Some(access_key_id.clone()),
            _ => None,
        })
    }
}

impl IoEngine for LoopbackEngine {
    fn new_event_loop_group(&self, threads: usize) -> Result<NativeHandle, ErrorCode> {
        debug!(threads, "loopback event loop group");
        self.new_io_resource("new_event_loop_group", IoResource::EventLoopGroup)
    }

    fn new_client_bootstrap(
        &self,
        event_loop_group: NativeHandle,
        _host_resolver_max_entries: usize,
    ) -> Result<NativeHandle, ErrorCode> {
        if !self.is_live_io(event_loop_group) {
            return Err(ErrorCode::INVALID_ARGUMENT);
        }
        self.new_io_resource("new_client_bootstrap", IoResource::ClientBootstrap)
    }

    fn new_tls_context(&self, _options: &TlsContextOptions) -> Result<NativeHandle, ErrorCode> {
        self.new_io_resource("new_tls_context", IoResource::TlsContext)
    }

    fn new_static_credentials_provider(
        &self,
        credentials: &Credentials,
    ) -> Result<NativeHandle, ErrorCode> {
        self.new_io_resource(
            "new_static_credentials_provider",
            IoResource::CredentialsProvider {
                access_key_id: credentials.access_key_id.clone(),
            },
        )
    }

    fn release_io_resource(&self, handle: NativeHandle) {
        self.inner.record("release_io_resource", Some(handle));
        self.inner.io.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crtbridge_core::{ClientBootstrap, CredentialsProvider, CrtResource, EventLoopGroup};

    use super::*;

    #[tokio::test]
    async fn test_should_track_io_resources_until_released() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let group = EventLoopGroup::new(engine.clone(), 2).unwrap();
        let bootstrap = ClientBootstrap::new(engine.clone(), group, 16).unwrap();
        let credentials =
            CredentialsProvider::new_static(engine.clone(), &Credentials::new("AKID", "secret")).unwrap();
        assert_eq!(engine.open_handles(), 3);

        let handle = credentials.lifecycle().handle().unwrap();
        assert_eq!(engine.access_key_id(handle).as_deref(), Some("AKID"));

        drop(credentials);
        assert!(!engine.is_live_io(handle));
        drop(bootstrap);
        assert_eq!(engine.open_handles(), 0);
        assert_eq!(engine.call_count("release_io_resource"), 3);
    }

    #[tokio::test]
    async fn test_should_fail_injected_acquisitions() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        engine.fail_next("new_tls_context", ErrorCode::UNKNOWN);

        let err = crtbridge_core::TlsContext::new(engine.clone(), &TlsContextOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            crtbridge_core::CrtError::AcquisitionFailed { resource: "tls context", code } if code == ErrorCode::UNKNOWN
        ));
        assert!(crtbridge_core::TlsContext::new(engine.clone(), &TlsContextOptions::default()).is_ok());
    }
}
