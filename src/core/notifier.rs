//! Fan-out of committed state changes to observers.
//!
//! Services call the notifier only after their storage transaction has
//! committed. Registry failures are returned to the caller, which logs them;
//! they never undo the commit.
//!
//! `refresh` reads the committed state under the publish lock, so whichever
//! refresh runs last after a burst of concurrent commits publishes the latest
//! row, and a row deleted meanwhile is retired rather than re-published.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::resource::{
    HandlerRequest, HandlerResponse, Method, MethodHandler, RegistryError, ResourceId, ResourceRegistry,
};
use crate::core::transport::{NotifyFlags, SessionId};
use crate::core::DotsError;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("reading committed state failed: {0}")]
    Load(#[from] DotsError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What a refresh did to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refreshed {
    /// Published, reaching this many observers
    Published(usize),
    /// The state is gone; whether a resource had been bound
    Retired(bool),
}

/// URI of the observable session configuration resource
pub fn session_config_uri(customer_id: i32, session_id: i32) -> String {
    format!("/.well-known/dots/config/customer={}/sid={}", customer_id, session_id)
}

/// URI of the observable alias resource
pub fn alias_uri(customer_id: i32, cuid: &str, name: &str) -> String {
    format!("/data/customer={}/dots-client={}/aliases/alias={}", customer_id, cuid, name)
}

fn not_found_handler() -> MethodHandler {
    Arc::new(|_: &HandlerRequest| HandlerResponse::not_found())
}

#[derive(Clone)]
pub struct Notifier {
    registry: Arc<ResourceRegistry>,
    // Serialises lookup-then-create so one URI never gets two resources
    publish_lock: Arc<Mutex<()>>,
}

impl Notifier {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Bind the catch-all resource, answering 4.04 to every method
    pub async fn install_unknown(&self) -> Result<ResourceId, RegistryError> {
        let id = self.registry.init_unknown().await?;
        for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
            self.registry.register_handler(id, method, not_found_handler()).await?;
        }
        self.registry.bind(id).await?;
        Ok(id)
    }

    /// Bring the resource at `uri` in line with the committed state.
    ///
    /// `current` loads the representation from storage, `None` when the row
    /// no longer exists. It runs under the publish lock.
    pub async fn refresh<F, Fut>(&self, uri: &str, resource_type: &str, current: F) -> Result<Refreshed, RefreshError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Value>, DotsError>>,
    {
        let _guard = self.publish_lock.lock().await;
        match current().await? {
            Some(body) => Ok(Refreshed::Published(self.publish(uri, resource_type, body).await?)),
            None => Ok(Refreshed::Retired(self.retire(uri).await?)),
        }
    }

    /// Make `body` the current representation at `uri` and notify observers.
    ///
    /// The resource is created, marked observable and bound on first use.
    /// Returns the number of observers reached. Runs under the publish lock.
    async fn publish(&self, uri: &str, resource_type: &str, body: Value) -> Result<usize, RegistryError> {
        let id = match self.registry.find_by_query(uri).await {
            Some(id) => id,
            None => self.create(uri, resource_type).await?,
        };

        let snapshot = Arc::new(body);
        let handler: MethodHandler = Arc::new(move |_: &HandlerRequest| HandlerResponse::content(snapshot.as_ref().clone()));
        self.registry.register_handler(id, Method::Get, handler).await?;

        let sent = self.registry.notify_observers(id).await?;
        debug!("Published {} to {} observers", uri, sent);
        Ok(sent)
    }

    async fn create(&self, uri: &str, resource_type: &str) -> Result<ResourceId, RegistryError> {
        let id = self.registry.init(uri, NotifyFlags::NotifyCon).await?;
        self.registry.add_attribute(id, "rt", Some(resource_type)).await;
        self.registry.add_attribute(id, "obs", None).await;

        let published = async {
            self.registry.set_observable(id).await?;
            self.registry.bind(id).await
        }
        .await;

        if let Err(e) = published {
            if let Err(unbind_error) = self.registry.unbind(id).await {
                warn!("Failed to discard half-created resource {}: {}", uri, unbind_error);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Tell observers the resource at `uri` is gone, then unbind it.
    ///
    /// Returns whether a resource was bound there. Runs under the publish lock.
    async fn retire(&self, uri: &str) -> Result<bool, RegistryError> {
        let Some(id) = self.registry.find_by_query(uri).await else {
            return Ok(false);
        };

        self.registry.register_handler(id, Method::Get, not_found_handler()).await?;
        if let Err(e) = self.registry.notify_observers(id).await {
            warn!("Failed to notify removal of {}: {}", uri, e);
        }
        self.registry.unbind(id).await?;
        debug!("Retired {}", uri);
        Ok(true)
    }

    /// Subscribe to the resource at `uri` and return its current representation
    pub async fn observe(
        &self,
        uri: &str,
        session: SessionId,
        token: &[u8],
        query: &str,
    ) -> Result<HandlerResponse, RegistryError> {
        let id = self
            .registry
            .find_by_query(uri)
            .await
            .ok_or_else(|| RegistryError::UnknownUri(uri.to_string()))?;
        self.registry.subscribe(id, session, query, token).await?;

        let request = HandlerRequest {
            session: Some(session),
            token: token.to_vec(),
            query: query.to_string(),
            body: None,
        };
        Ok(self.registry.handle_request(uri, Method::Get, &request).await)
    }

    /// Cancel a subscription. Returns whether one existed.
    pub async fn cancel(&self, uri: &str, session: SessionId, token: &[u8]) -> Result<bool, RegistryError> {
        match self.registry.find_by_query(uri).await {
            Some(id) => self.registry.unsubscribe(id, session, token).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{LocalTransport, NativeHandle, TransportError};
    use crate::core::transport::MockTransport;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn notifier() -> (Arc<LocalTransport>, Notifier) {
        let transport = Arc::new(LocalTransport::new());
        let registry = Arc::new(ResourceRegistry::new(transport.clone()));
        (transport, Notifier::new(registry))
    }

    #[test]
    fn test_uris() {
        assert_eq!(session_config_uri(7, 5), "/.well-known/dots/config/customer=7/sid=5");
        assert_eq!(alias_uri(7, "cuid123", "A1"), "/data/customer=7/dots-client=cuid123/aliases/alias=A1");
    }

    #[tokio::test]
    async fn test_publish_creates_observable_resource_once() {
        let (transport, notifier) = notifier();

        assert_eq!(notifier.publish("/r", "dots", json!(1)).await, Ok(0));
        assert_eq!(notifier.publish("/r", "dots", json!(2)).await, Ok(0));
        assert_eq!(transport.resource_count(), 1);

        let id = notifier.registry().find_by_query("/r").await.unwrap();
        let names: Vec<_> = notifier.registry().attributes(id).await.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["rt", "obs"]);
    }

    #[tokio::test]
    async fn test_observe_then_publish_delivers_latest() {
        let (transport, notifier) = notifier();
        let (session, mut rx) = transport.open_session().unwrap();
        notifier.publish("/r", "dots", json!({ "v": 1 })).await.unwrap();

        let current = notifier.observe("/r", session, b"tok", "").await.unwrap();
        assert_eq!(current, HandlerResponse::content(json!({ "v": 1 })));

        assert_eq!(notifier.publish("/r", "dots", json!({ "v": 2 })).await, Ok(1));
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.code, 205);
        assert_eq!(notification.body, Some(json!({ "v": 2 })));

        assert_eq!(notifier.cancel("/r", session, b"tok").await, Ok(true));
        assert_eq!(notifier.publish("/r", "dots", json!({ "v": 3 })).await, Ok(0));
    }

    #[tokio::test]
    async fn test_retire_sends_not_found_then_unbinds() {
        let (transport, notifier) = notifier();
        let (session, mut rx) = transport.open_session().unwrap();
        notifier.publish("/r", "dots", json!(1)).await.unwrap();
        notifier.observe("/r", session, b"tok", "").await.unwrap();

        assert_eq!(notifier.retire("/r").await, Ok(true));
        assert_eq!(rx.try_recv().unwrap().code, 404);
        assert_eq!(notifier.registry().find_by_query("/r").await, None);
        assert_eq!(transport.resource_count(), 0);
        assert_eq!(notifier.retire("/r").await, Ok(false));
    }

    #[tokio::test]
    async fn test_refresh_follows_committed_state() {
        let (transport, notifier) = notifier();
        let (session, mut rx) = transport.open_session().unwrap();

        let refreshed = notifier.refresh("/r", "dots", || async { Ok(Some(json!(1))) }).await;
        assert!(matches!(refreshed, Ok(Refreshed::Published(0))));
        notifier.observe("/r", session, b"tok", "").await.unwrap();

        let refreshed = notifier.refresh("/r", "dots", || async { Ok(Some(json!(2))) }).await;
        assert!(matches!(refreshed, Ok(Refreshed::Published(1))));
        assert_eq!(rx.try_recv().unwrap().body, Some(json!(2)));

        let failed = notifier
            .refresh("/r", "dots", || async { Err(DotsError::OperationFailed("down".to_string())) })
            .await;
        assert!(matches!(failed, Err(RefreshError::Load(_))));
        assert!(notifier.registry().find_by_query("/r").await.is_some());

        let refreshed = notifier.refresh("/r", "dots", || async { Ok(None) }).await;
        assert!(matches!(refreshed, Ok(Refreshed::Retired(true))));
        assert_eq!(rx.try_recv().unwrap().code, 404);
        assert_eq!(notifier.registry().find_by_query("/r").await, None);

        let refreshed = notifier.refresh("/r", "dots", || async { Ok(None) }).await;
        assert!(matches!(refreshed, Ok(Refreshed::Retired(false))));
    }

    #[tokio::test]
    async fn test_observe_unknown_uri() {
        let (transport, notifier) = notifier();
        let (session, _rx) = transport.open_session().unwrap();

        assert_eq!(
            notifier.observe("/missing", session, b"tok", "").await,
            Err(RegistryError::UnknownUri("/missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_resource_answers_not_found() {
        let (_transport, notifier) = notifier();
        assert_ok!(notifier.install_unknown().await);

        for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
            let response = notifier
                .registry()
                .handle_request("/no/such/path", method, &HandlerRequest::default())
                .await;
            assert_eq!(response, HandlerResponse::not_found());
        }
    }

    #[tokio::test]
    async fn test_failed_bind_discards_resource() {
        let mut transport = MockTransport::new();
        transport
            .expect_create_resource()
            .returning(|_, _| Ok(NativeHandle(4)));
        transport.expect_add_attribute().returning(|_, _| Ok(()));
        transport.expect_set_observable().returning(|_| Ok(()));
        transport
            .expect_add_resource()
            .returning(|_| Err(TransportError::Unavailable("stack stopped".to_string())));
        transport.expect_release_resource().times(1).return_const(());
        let notifier = Notifier::new(Arc::new(ResourceRegistry::new(Arc::new(transport))));

        assert!(notifier.publish("/r", "dots", json!(1)).await.is_err());
        assert_eq!(notifier.registry().find_by_native(NativeHandle(4)).await, None);
    }
}
