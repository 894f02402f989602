//! Registry of URI-addressable, observable resources.
//!
//! Resources live in a generation-tagged arena owned by the registry. A
//! `ResourceId` is only an index plus generation, so once a resource is
//! unbound every copy of its id stops resolving, while the native handle is
//! released by the transport only after the registry has forgotten it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use metrics::increment_counter;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::monitoring::{NOTIFICATIONS_FAILED, NOTIFICATIONS_SENT, RESOURCES_BOUND};
use crate::core::transport::{
    Attribute, NativeHandle, Notification, NotifyFlags, Observer, SessionId, Transport, TransportError,
};

/// Errors that can occur during registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource {0} not found")]
    NotFound(ResourceId),
    #[error("resource {0} is not observable")]
    NotObservable(ResourceId),
    #[error("no resource bound at {0}")]
    UnknownUri(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Stable reference to a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Request methods a resource can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Request handed to a method handler
#[derive(Debug, Clone, Default)]
pub struct HandlerRequest {
    pub session: Option<SessionId>,
    pub token: Vec<u8>,
    pub query: String,
    pub body: Option<Value>,
}

/// Response produced by a method handler, codes in `class * 100 + detail` form
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub code: u16,
    pub body: Option<Value>,
}

impl HandlerResponse {
    pub fn content(body: Value) -> Self {
        Self { code: 205, body: Some(body) }
    }

    pub fn not_found() -> Self {
        Self { code: 404, body: None }
    }

    pub fn method_not_allowed() -> Self {
        Self { code: 405, body: None }
    }
}

/// Method handler. Handlers run while the registry is locked and must not
/// call back into it.
pub type MethodHandler = Arc<dyn Fn(&HandlerRequest) -> HandlerResponse + Send + Sync>;

struct ResourceEntry {
    uri: Option<String>,
    flags: NotifyFlags,
    native: Option<NativeHandle>,
    handlers: HashMap<Method, MethodHandler>,
    attributes: Vec<Attribute>,
    observable: bool,
    bound: bool,
    observers: Vec<Observer>,
}

struct Slot {
    generation: u32,
    entry: Option<ResourceEntry>,
}

#[derive(Default)]
struct RegistryIndex {
    by_native: HashMap<NativeHandle, ResourceId>,
    by_uri: HashMap<String, ResourceId>,
    unknown: Option<ResourceId>,
}

#[derive(Default)]
struct RegistryState {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: RegistryIndex,
}

impl RegistryState {
    fn entry(&self, id: ResourceId) -> Option<&ResourceEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: ResourceId) -> Option<&mut ResourceEntry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn allocate(&mut self, entry: ResourceEntry) -> ResourceId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ResourceId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                ResourceId { index, generation: 0 }
            }
        }
    }

    /// Invalidates the slot behind `id`; every outstanding copy of the id stops resolving.
    fn release(&mut self, id: ResourceId) -> Option<ResourceEntry> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry)
    }
}

fn normalize_uri(uri: &str) -> String {
    format!("/{}", uri.trim_start_matches('/'))
}

/// Registry binding logical resources to transport handles
pub struct ResourceRegistry {
    transport: Arc<dyn Transport>,
    state: RwLock<RegistryState>,
}

impl ResourceRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Create a resource addressed by `uri`. It is not reachable until bound.
    pub async fn init(&self, uri: &str, flags: NotifyFlags) -> Result<ResourceId, RegistryError> {
        let uri = normalize_uri(uri);
        let native = self.transport.create_resource(&uri, flags)?;
        Ok(self.insert(Some(uri), flags, native).await)
    }

    /// Create the catch-all resource answering paths with no static match.
    pub async fn init_unknown(&self) -> Result<ResourceId, RegistryError> {
        let native = self.transport.create_unknown_resource()?;
        Ok(self.insert(None, NotifyFlags::NotifyNon, native).await)
    }

    async fn insert(&self, uri: Option<String>, flags: NotifyFlags, native: NativeHandle) -> ResourceId {
        let mut state = self.state.write().await;
        let id = state.allocate(ResourceEntry {
            uri,
            flags,
            native: Some(native),
            handlers: HashMap::new(),
            attributes: Vec::new(),
            observable: false,
            bound: false,
            observers: Vec::new(),
        });
        state.index.by_native.insert(native, id);
        id
    }

    /// Publish a resource on the transport
    pub async fn bind(&self, id: ResourceId) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(id).ok_or(RegistryError::NotFound(id))?;
        let native = entry.native.ok_or(RegistryError::NotFound(id))?;
        self.transport.add_resource(native)?;
        entry.bound = true;
        let uri = entry.uri.clone();

        match uri {
            Some(uri) => {
                debug!("Bound resource {} at {}", id, uri);
                if let Some(previous) = state.index.by_uri.insert(uri.clone(), id) {
                    if previous != id {
                        warn!("Resource {} replaced {} at {}", id, previous, uri);
                    }
                }
            }
            None => {
                debug!("Bound catch-all resource {}", id);
                state.index.unknown = Some(id);
            }
        }
        increment_counter!(RESOURCES_BOUND);
        Ok(())
    }

    /// Remove one resource.
    ///
    /// The entry leaves the index and its handle is cleared before the
    /// transport is told to release the native state.
    pub async fn unbind(&self, id: ResourceId) -> Result<(), RegistryError> {
        let native = {
            let mut state = self.state.write().await;
            let mut entry = state.release(id).ok_or(RegistryError::NotFound(id))?;
            let native = entry.native.take();
            if let Some(native) = native {
                state.index.by_native.remove(&native);
            }
            if let Some(uri) = &entry.uri {
                if state.index.by_uri.get(uri) == Some(&id) {
                    state.index.by_uri.remove(uri);
                }
            }
            if state.index.unknown == Some(id) {
                state.index.unknown = None;
            }
            native
        };

        if let Some(native) = native {
            self.transport.release_resource(native);
        }
        debug!("Unbound resource {}", id);
        Ok(())
    }

    /// Release every resource.
    ///
    /// The live index is swapped for an empty one and every slot invalidated
    /// in the same critical section; the transport releases native state after.
    pub async fn unbind_all(&self) {
        let detached = {
            let mut state = self.state.write().await;
            let detached = std::mem::take(&mut state.index);
            let RegistryState { slots, free, .. } = &mut *state;
            for (index, slot) in slots.iter_mut().enumerate() {
                if let Some(mut entry) = slot.entry.take() {
                    entry.native = None;
                    slot.generation = slot.generation.wrapping_add(1);
                    free.push(index as u32);
                }
            }
            detached
        };

        self.transport.release_all_resources();
        info!("Released {} resources", detached.by_native.len());
    }

    /// Attach metadata to a resource.
    ///
    /// Returns `None` when the resource is gone or the transport refuses the
    /// attribute; callers treat that as lost metadata, not a failed request.
    pub async fn add_attribute(&self, id: ResourceId, name: &str, value: Option<&str>) -> Option<Attribute> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(id)?;
        let native = entry.native?;
        let attribute = Attribute {
            name: name.to_string(),
            value: value.map(str::to_string),
        };

        match self.transport.add_attribute(native, &attribute) {
            Ok(()) => {
                entry.attributes.push(attribute.clone());
                Some(attribute)
            }
            Err(e) => {
                warn!("Failed to add attribute {} to resource {}: {}", name, id, e);
                None
            }
        }
    }

    /// Mark a resource as eligible for subscription
    pub async fn set_observable(&self, id: ResourceId) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(id).ok_or(RegistryError::NotFound(id))?;
        let native = entry.native.ok_or(RegistryError::NotFound(id))?;
        self.transport.set_observable(native)?;
        entry.observable = true;
        Ok(())
    }

    pub async fn register_handler(&self, id: ResourceId, method: Method, handler: MethodHandler) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(id).ok_or(RegistryError::NotFound(id))?;
        entry.handlers.insert(method, handler);
        Ok(())
    }

    /// Add an observer. Subscribing again with the same session and token
    /// replaces the query of the existing observer.
    pub async fn subscribe(
        &self,
        id: ResourceId,
        session: SessionId,
        query: &str,
        token: &[u8],
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(id).ok_or(RegistryError::NotFound(id))?;
        if !entry.observable {
            return Err(RegistryError::NotObservable(id));
        }
        let native = entry.native.ok_or(RegistryError::NotFound(id))?;
        let observer = Observer {
            session,
            token: token.to_vec(),
            query: query.to_string(),
        };

        if let Err(e) = self.transport.add_observer(native, &observer) {
            warn!("Failed to add observer {} to resource {}: {}", session, id, e);
            return Err(e.into());
        }

        match entry
            .observers
            .iter_mut()
            .find(|o| o.session == session && o.token == token)
        {
            Some(existing) => existing.query = observer.query,
            None => entry.observers.push(observer),
        }
        Ok(())
    }

    /// Remove an observer. Returns whether one was registered.
    pub async fn unsubscribe(&self, id: ResourceId, session: SessionId, token: &[u8]) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(id).ok_or(RegistryError::NotFound(id))?;
        let native = entry.native.ok_or(RegistryError::NotFound(id))?;
        let Some(position) = entry
            .observers
            .iter()
            .position(|o| o.session == session && o.token == token)
        else {
            return Ok(false);
        };

        if let Err(e) = self.transport.remove_observer(native, session, token) {
            warn!("Failed to remove observer {} from resource {}: {}", session, id, e);
            return Err(e.into());
        }
        entry.observers.remove(position);
        Ok(true)
    }

    /// Find a bound resource by its URI path
    pub async fn find_by_query(&self, query: &str) -> Option<ResourceId> {
        if query.is_empty() {
            return None;
        }
        let state = self.state.read().await;
        state.index.by_uri.get(&normalize_uri(query)).copied()
    }

    /// Find the resource owning a native handle
    #[cfg(test)]
    pub(crate) async fn find_by_native(&self, native: NativeHandle) -> Option<ResourceId> {
        self.state.read().await.index.by_native.get(&native).copied()
    }

    /// The resource serving `uri`: an exact match, else the catch-all resource
    pub async fn resolve(&self, uri: &str) -> Option<ResourceId> {
        let state = self.state.read().await;
        state
            .index
            .by_uri
            .get(&normalize_uri(uri))
            .copied()
            .or(state.index.unknown)
    }

    /// The native handle of a resource, `None` once it has been unbound
    pub async fn native_handle(&self, id: ResourceId) -> Option<NativeHandle> {
        self.state.read().await.entry(id).and_then(|entry| entry.native)
    }

    pub async fn is_bound(&self, id: ResourceId) -> bool {
        self.state.read().await.entry(id).map_or(false, |entry| entry.bound)
    }

    pub async fn uri(&self, id: ResourceId) -> Option<String> {
        self.state.read().await.entry(id).and_then(|entry| entry.uri.clone())
    }

    pub async fn observers(&self, id: ResourceId) -> Vec<Observer> {
        self.state
            .read()
            .await
            .entry(id)
            .map(|entry| entry.observers.clone())
            .unwrap_or_default()
    }

    pub async fn attributes(&self, id: ResourceId) -> Vec<Attribute> {
        self.state
            .read()
            .await
            .entry(id)
            .map(|entry| entry.attributes.clone())
            .unwrap_or_default()
    }

    /// Dispatch a request to the handler registered on the resource serving `uri`
    pub async fn handle_request(&self, uri: &str, method: Method, request: &HandlerRequest) -> HandlerResponse {
        let state = self.state.read().await;
        let entry = state
            .index
            .by_uri
            .get(&normalize_uri(uri))
            .copied()
            .or(state.index.unknown)
            .and_then(|id| state.entry(id));

        match entry {
            Some(entry) => match entry.handlers.get(&method) {
                Some(handler) => handler(request),
                None => HandlerResponse::method_not_allowed(),
            },
            None => HandlerResponse::not_found(),
        }
    }

    /// Push the current representation of a resource to all of its observers.
    ///
    /// The GET handler renders the payload once per observer, with that
    /// observer's token and query. A failed delivery is logged and dropped for
    /// that observer. Returns the number of notifications delivered.
    pub async fn notify_observers(&self, id: ResourceId) -> Result<usize, RegistryError> {
        let state = self.state.read().await;
        let entry = state.entry(id).ok_or(RegistryError::NotFound(id))?;
        if !entry.observable {
            return Err(RegistryError::NotObservable(id));
        }
        let native = entry.native.ok_or(RegistryError::NotFound(id))?;
        let Some(handler) = entry.handlers.get(&Method::Get) else {
            warn!("Resource {} has no GET handler, skipping notification", id);
            return Ok(0);
        };
        let uri = entry.uri.clone().unwrap_or_default();

        let mut sent = 0;
        for observer in &entry.observers {
            let response = handler(&HandlerRequest {
                session: Some(observer.session),
                token: observer.token.clone(),
                query: observer.query.clone(),
                body: None,
            });
            let notification = Notification {
                uri: uri.clone(),
                token: observer.token.clone(),
                code: response.code,
                body: response.body,
                confirmable: entry.flags == NotifyFlags::NotifyCon,
            };

            match self.transport.notify(native, observer, &notification) {
                Ok(()) => {
                    sent += 1;
                    increment_counter!(NOTIFICATIONS_SENT);
                }
                Err(e) => {
                    warn!("Dropped notification of {} for {}: {}", uri, observer.session, e);
                    increment_counter!(NOTIFICATIONS_FAILED);
                }
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{LocalTransport, MockTransport};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> (Arc<LocalTransport>, ResourceRegistry) {
        let transport = Arc::new(LocalTransport::new());
        let registry = ResourceRegistry::new(transport.clone());
        (transport, registry)
    }

    async fn observable(registry: &ResourceRegistry, uri: &str) -> ResourceId {
        let id = registry.init(uri, NotifyFlags::NotifyCon).await.unwrap();
        registry.set_observable(id).await.unwrap();
        registry.bind(id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_bind_and_find_by_query() {
        let (transport, registry) = registry();
        let id = registry.init("dots/config", NotifyFlags::NotifyNon).await.unwrap();

        assert_eq!(registry.find_by_query("/dots/config").await, None);
        assert_ok!(registry.bind(id).await);

        assert_eq!(registry.find_by_query("/dots/config").await, Some(id));
        assert_eq!(registry.find_by_query("dots/config").await, Some(id));
        assert_eq!(registry.find_by_query("").await, None);
        assert!(registry.is_bound(id).await);

        let native = registry.native_handle(id).await.unwrap();
        assert!(transport.is_published(native));
        assert_eq!(registry.find_by_native(native).await, Some(id));
    }

    #[tokio::test]
    async fn test_unbind_clears_handle_and_index() {
        let (transport, registry) = registry();
        let id = observable(&registry, "/a").await;
        let native = registry.native_handle(id).await.unwrap();

        assert_ok!(registry.unbind(id).await);

        assert_eq!(registry.native_handle(id).await, None);
        assert_eq!(registry.find_by_query("/a").await, None);
        assert_eq!(registry.find_by_native(native).await, None);
        assert_eq!(transport.resource_count(), 0);
        assert_eq!(registry.unbind(id).await, Err(RegistryError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_stale_id_does_not_resolve_to_reused_slot() {
        let (_transport, registry) = registry();
        let first = observable(&registry, "/first").await;
        registry.unbind(first).await.unwrap();

        let second = observable(&registry, "/second").await;
        assert_ne!(first, second);
        assert_eq!(registry.native_handle(first).await, None);
        assert_eq!(registry.uri(second).await.as_deref(), Some("/second"));
        assert_err!(registry.subscribe(first, SessionId(1), "", b"t").await);
    }

    #[tokio::test]
    async fn test_unbind_all_clears_every_reference() {
        let (transport, registry) = registry();
        let a = observable(&registry, "/a").await;
        let b = observable(&registry, "/b").await;
        let unknown = registry.init_unknown().await.unwrap();
        registry.bind(unknown).await.unwrap();
        let unbound = registry.init("/never-bound", NotifyFlags::NotifyNon).await.unwrap();

        registry.unbind_all().await;

        for id in [a, b, unknown, unbound] {
            assert_eq!(registry.native_handle(id).await, None);
            assert!(!registry.is_bound(id).await);
        }
        assert_eq!(registry.find_by_query("/a").await, None);
        assert_eq!(registry.find_by_query("/b").await, None);
        assert_eq!(registry.resolve("/anything").await, None);
        assert_eq!(transport.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_replaces_query() {
        let (transport, registry) = registry();
        let (session, _rx) = transport.open_session().unwrap();
        let id = observable(&registry, "/a").await;

        registry.subscribe(id, session, "q=1", b"tok").await.unwrap();
        registry.subscribe(id, session, "q=2", b"tok").await.unwrap();
        registry.subscribe(id, session, "", b"other").await.unwrap();

        let observers = registry.observers(id).await;
        assert_eq!(observers.len(), 2);
        assert_eq!(observers[0].query, "q=2");

        assert_eq!(registry.unsubscribe(id, session, b"tok").await, Ok(true));
        assert_eq!(registry.unsubscribe(id, session, b"tok").await, Ok(false));
        assert_eq!(registry.observers(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_requires_observable() {
        let (transport, registry) = registry();
        let (session, _rx) = transport.open_session().unwrap();
        let id = registry.init("/plain", NotifyFlags::NotifyNon).await.unwrap();
        registry.bind(id).await.unwrap();

        assert_eq!(
            registry.subscribe(id, session, "", b"t").await,
            Err(RegistryError::NotObservable(id))
        );
    }

    #[tokio::test]
    async fn test_notify_renders_per_observer() {
        let (transport, registry) = registry();
        let (s1, mut rx1) = transport.open_session().unwrap();
        let (s2, mut rx2) = transport.open_session().unwrap();
        let id = observable(&registry, "/a").await;
        let handler: MethodHandler = Arc::new(|req: &HandlerRequest| HandlerResponse::content(json!({ "query": req.query })));
        registry.register_handler(id, Method::Get, handler).await.unwrap();

        registry.subscribe(id, s1, "x", b"1").await.unwrap();
        registry.subscribe(id, s2, "y", b"2").await.unwrap();

        assert_eq!(registry.notify_observers(id).await, Ok(2));
        let n1 = rx1.try_recv().unwrap();
        assert_eq!(n1.body, Some(json!({ "query": "x" })));
        assert_eq!(n1.token, b"1".to_vec());
        assert!(n1.confirmable);
        assert_eq!(rx2.try_recv().unwrap().body, Some(json!({ "query": "y" })));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_dropped_not_fatal() {
        let (transport, registry) = registry();
        let (alive, mut rx) = transport.open_session().unwrap();
        let (gone, gone_rx) = transport.open_session().unwrap();
        let id = observable(&registry, "/a").await;
        let handler: MethodHandler = Arc::new(|_: &HandlerRequest| HandlerResponse::content(json!(1)));
        registry.register_handler(id, Method::Get, handler).await.unwrap();
        registry.subscribe(id, gone, "", b"g").await.unwrap();
        registry.subscribe(id, alive, "", b"a").await.unwrap();
        drop(gone_rx);

        assert_eq!(registry.notify_observers(id).await, Ok(1));
        assert!(rx.try_recv().is_ok());
        assert_eq!(registry.observers(id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_request_falls_back_to_unknown() {
        let (_transport, registry) = registry();
        let id = observable(&registry, "/a").await;
        let handler: MethodHandler = Arc::new(|_: &HandlerRequest| HandlerResponse::content(json!("a")));
        registry.register_handler(id, Method::Get, handler).await.unwrap();

        let request = HandlerRequest::default();
        assert_eq!(registry.handle_request("/b", Method::Get, &request).await, HandlerResponse::not_found());

        let unknown = registry.init_unknown().await.unwrap();
        let fallback: MethodHandler = Arc::new(|_: &HandlerRequest| HandlerResponse { code: 402, body: None });
        registry.register_handler(unknown, Method::Put, fallback).await.unwrap();
        registry.bind(unknown).await.unwrap();

        assert_eq!(registry.resolve("/b").await, Some(unknown));
        assert_eq!(registry.handle_request("/b", Method::Put, &request).await.code, 402);
        assert_eq!(registry.handle_request("/a", Method::Get, &request).await.code, 205);
        assert_eq!(
            registry.handle_request("/a", Method::Delete, &request).await,
            HandlerResponse::method_not_allowed()
        );
    }

    #[tokio::test]
    async fn test_attribute_failure_is_absent() {
        let mut transport = MockTransport::new();
        transport
            .expect_create_resource()
            .returning(|_, _| Ok(NativeHandle(7)));
        transport
            .expect_add_attribute()
            .returning(|_, attribute| match attribute.name.as_str() {
                "rt" => Ok(()),
                _ => Err(TransportError::Unavailable("out of memory".to_string())),
            });
        let registry = ResourceRegistry::new(Arc::new(transport));
        let id = registry.init("/a", NotifyFlags::NotifyNon).await.unwrap();

        let attribute = registry.add_attribute(id, "rt", Some("dots")).await;
        assert_eq!(attribute.map(|a| a.value), Some(Some("dots".to_string())));
        assert!(registry.add_attribute(id, "obs", None).await.is_none());
        assert_eq!(registry.attributes(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_transport_failure_abandons_mutation() {
        let mut transport = MockTransport::new();
        transport
            .expect_create_resource()
            .returning(|_, _| Ok(NativeHandle(1)));
        transport.expect_set_observable().returning(|_| Ok(()));
        transport.expect_add_resource().returning(|_| Ok(()));
        transport
            .expect_add_observer()
            .returning(|_, observer| Err(TransportError::UnknownSession(observer.session)));
        let registry = ResourceRegistry::new(Arc::new(transport));
        let id = observable(&registry, "/a").await;

        assert_eq!(
            registry.subscribe(id, SessionId(3), "", b"t").await,
            Err(RegistryError::Transport(TransportError::UnknownSession(SessionId(3))))
        );
        assert!(registry.observers(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_unbind_releases_native_after_index_cleared() {
        let mut transport = MockTransport::new();
        transport
            .expect_create_resource()
            .returning(|_, _| Ok(NativeHandle(9)));
        transport.expect_add_resource().returning(|_| Ok(()));
        transport
            .expect_release_resource()
            .withf(|handle| *handle == NativeHandle(9))
            .times(1)
            .return_const(());
        let registry = ResourceRegistry::new(Arc::new(transport));
        let id = registry.init("/a", NotifyFlags::NotifyNon).await.unwrap();
        registry.bind(id).await.unwrap();

        registry.unbind(id).await.unwrap();
        assert_eq!(registry.find_by_native(NativeHandle(9)).await, None);
    }
}
