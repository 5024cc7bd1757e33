//! Resource lifecycle and teardown ordering tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crtbridge_core::{
        ClientBootstrap, CrtResource, EventLoopGroup, LifecycleStatus, ReferenceGraph,
    };
    use crtbridge_s3::MetaRequestType;
    use http::Method;

    use crate::{Harness, request, start, test_object_path};

    #[tokio::test]
    async fn test_should_keep_event_loop_group_alive_through_bootstrap() {
        let harness = Harness::new();
        let engine = harness.into_engine();
        let group = EventLoopGroup::new(engine.clone(), 1).unwrap();
        let weak_group = Arc::downgrade(&group);
        let bootstrap = ClientBootstrap::new(engine.clone(), group, 8).unwrap();

        assert!(weak_group.upgrade().is_some());
        let group_id = weak_group.upgrade().unwrap().lifecycle().id();
        assert!(bootstrap.lifecycle().strong_references().contains(&group_id));

        drop(bootstrap);
        assert!(weak_group.upgrade().is_none());
        assert_eq!(engine.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_should_record_client_dependencies_in_reference_graph() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        let bootstrap_id = harness.bootstrap.lifecycle().id();
        let credentials_id = harness.credentials.lifecycle().id();
        let client_id = client.lifecycle().id();

        let graph = ReferenceGraph::global();
        assert!(graph.holds(client_id, bootstrap_id));
        assert!(graph.holds(client_id, credentials_id));
        assert!(graph.dependents_of(bootstrap_id).contains(&client_id));

        let shutdown = client.wait_for_shutdown();
        client.close();
        shutdown.await;
        assert!(!graph.holds(client_id, bootstrap_id));
        assert!(client.lifecycle().strong_references().is_empty());
    }

    #[tokio::test]
    async fn test_should_hold_client_dependencies_until_native_shutdown() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        let Harness {
            engine,
            bootstrap,
            credentials,
        } = harness;
        let weak_bootstrap = Arc::downgrade(&bootstrap);
        let weak_credentials = Arc::downgrade(&credentials);
        drop(bootstrap);
        drop(credentials);

        client.close();
        assert_eq!(client.lifecycle().status(), LifecycleStatus::Releasing);
        assert!(weak_bootstrap.upgrade().is_some());
        assert!(weak_credentials.upgrade().is_some());

        client.wait_for_shutdown().await;
        assert!(weak_bootstrap.upgrade().is_none());
        assert!(weak_credentials.upgrade().is_none());
        assert_eq!(engine.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_should_wait_for_in_flight_meta_requests_before_client_shutdown() {
        let harness = Harness::new();
        let client = harness.s3_client(8);
        let path = test_object_path("in-flight");
        harness.engine.put_object(&path, "a".repeat(64));

        let (meta_request, response) = start(&client, MetaRequestType::GetObject, request(Method::GET, &path));
        let client_shutdown = client.wait_for_shutdown();
        client.close();
        tokio::task::yield_now().await;
        assert!(!client.is_shutdown_complete());

        let response = response.await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.body.len(), 64);
        assert!(!client.is_shutdown_complete());

        let meta_shutdown = meta_request.wait_for_shutdown();
        drop(meta_request);
        meta_shutdown.await;
        client_shutdown.await;
        assert!(client.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_should_release_client_once() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);

        client.close();
        client.close();
        drop(client);

        assert_eq!(harness.engine.call_count("destroy_client"), 1);
    }

    #[tokio::test]
    async fn test_should_wake_every_shutdown_waiter() {
        let harness = Harness::new();
        let manager = harness.connection_manager(1);
        let first = manager.wait_for_shutdown();
        let second = manager.wait_for_shutdown();

        manager.close();
        first.await;
        second.await;
        manager.wait_for_shutdown().await;
        assert!(manager.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_should_leave_no_native_handles_after_full_teardown() {
        let harness = Harness::new();
        let client = harness.s3_client(16);
        let manager = harness.connection_manager(2);
        let path = test_object_path("teardown");
        harness.engine.put_object(&path, "bye");

        let (meta_request, response) = start(&client, MetaRequestType::GetObject, request(Method::GET, &path));
        let connection = manager.acquire_connection().await.unwrap();
        assert!(response.await.unwrap().is_success());

        let meta_shutdown = meta_request.wait_for_shutdown();
        let client_shutdown = client.wait_for_shutdown();
        let manager_shutdown = manager.wait_for_shutdown();
        drop(meta_request);
        drop(connection);
        drop(client);
        drop(manager);
        let engine = harness.into_engine();

        meta_shutdown.await;
        client_shutdown.await;
        manager_shutdown.await;
        assert_eq!(engine.open_handles(), 0, "calls: {:?}", engine.calls());
    }
}
