//! Transport collaborator for the resource registry.
//!
//! The registry never talks to a CoAP stack directly. It goes through the
//! `Transport` trait, which owns native resource handles, observer state and
//! notification delivery. `LocalTransport` is the in-process implementation
//! used by the server binary and the tests: native handles are plain counters
//! and notifications are pushed into per-session channels.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by the transport layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown native resource {0}")]
    UnknownResource(NativeHandle),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Opaque handle to transport-owned resource state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native#{}", self.0)
    }
}

/// Identity of a peer session on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Name/value metadata attached to a resource, e.g. `rt` or `obs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

/// Notification delivery semantics of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyFlags {
    /// Notifications are sent as non-confirmable messages
    NotifyNon,
    /// Notifications are sent as confirmable messages
    NotifyCon,
}

/// One subscription: who, under which token, with which query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observer {
    pub session: SessionId,
    pub token: Vec<u8>,
    pub query: String,
}

/// A pushed representation of an observed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub uri: String,
    pub token: Vec<u8>,
    pub code: u16,
    pub body: Option<serde_json::Value>,
    pub confirmable: bool,
}

/// Operations the registry needs from the underlying CoAP stack.
///
/// All methods are local and non-blocking.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Allocates native state for a resource addressed by `uri`.
    fn create_resource(&self, uri: &str, flags: NotifyFlags) -> Result<NativeHandle, TransportError>;

    /// Allocates native state for the catch-all resource.
    fn create_unknown_resource(&self) -> Result<NativeHandle, TransportError>;

    /// Publishes a resource so that requests can reach it.
    fn add_resource(&self, handle: NativeHandle) -> Result<(), TransportError>;

    /// Releases the native state of one resource.
    fn release_resource(&self, handle: NativeHandle);

    /// Releases the native state of every resource.
    fn release_all_resources(&self);

    fn add_attribute(&self, handle: NativeHandle, attribute: &Attribute) -> Result<(), TransportError>;

    fn set_observable(&self, handle: NativeHandle) -> Result<(), TransportError>;

    fn add_observer(&self, handle: NativeHandle, observer: &Observer) -> Result<(), TransportError>;

    fn remove_observer(&self, handle: NativeHandle, session: SessionId, token: &[u8]) -> Result<(), TransportError>;

    /// Sends one notification to one observer.
    fn notify(&self, handle: NativeHandle, observer: &Observer, notification: &Notification) -> Result<(), TransportError>;
}

#[derive(Debug)]
struct NativeResource {
    uri: Option<String>,
    flags: NotifyFlags,
    published: bool,
    observable: bool,
    attributes: Vec<Attribute>,
    // (session, token) of each subscription
    observers: Vec<(SessionId, Vec<u8>)>,
}

#[derive(Default)]
struct LocalState {
    resources: HashMap<NativeHandle, NativeResource>,
    sessions: HashMap<SessionId, mpsc::UnboundedSender<Notification>>,
}

/// In-process transport delivering notifications over tokio channels
#[derive(Default)]
pub struct LocalTransport {
    next_handle: AtomicU64,
    next_session: AtomicU64,
    state: Mutex<LocalState>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a peer session and returns the receiving end of its notifications.
    pub fn open_session(&self) -> Result<(SessionId, mpsc::UnboundedReceiver<Notification>), TransportError> {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()?.sessions.insert(session, tx);
        debug!("Opened {}", session);
        Ok((session, rx))
    }

    pub fn close_session(&self, session: SessionId) -> Result<(), TransportError> {
        self.lock()?.sessions.remove(&session);
        debug!("Closed {}", session);
        Ok(())
    }

    /// Number of native resources currently allocated.
    pub fn resource_count(&self) -> usize {
        self.lock().map(|state| state.resources.len()).unwrap_or_default()
    }

    pub fn is_published(&self, handle: NativeHandle) -> bool {
        self.lock()
            .map(|state| state.resources.get(&handle).map_or(false, |r| r.published))
            .unwrap_or(false)
    }

    pub fn observer_count(&self, handle: NativeHandle) -> usize {
        self.lock()
            .map(|state| state.resources.get(&handle).map_or(0, |r| r.observers.len()))
            .unwrap_or_default()
    }

    pub fn attributes(&self, handle: NativeHandle) -> Vec<Attribute> {
        self.lock()
            .ok()
            .and_then(|state| state.resources.get(&handle).map(|r| r.attributes.clone()))
            .unwrap_or_default()
    }

    fn allocate(&self, uri: Option<String>, flags: NotifyFlags) -> Result<NativeHandle, TransportError> {
        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock()?.resources.insert(
            handle,
            NativeResource {
                uri,
                flags,
                published: false,
                observable: false,
                attributes: Vec::new(),
                observers: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LocalState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Unavailable("transport state poisoned".to_string()))
    }
}

impl Transport for LocalTransport {
    fn create_resource(&self, uri: &str, flags: NotifyFlags) -> Result<NativeHandle, TransportError> {
        self.allocate(Some(uri.to_string()), flags)
    }

    fn create_unknown_resource(&self) -> Result<NativeHandle, TransportError> {
        self.allocate(None, NotifyFlags::NotifyNon)
    }

    fn add_resource(&self, handle: NativeHandle) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(TransportError::UnknownResource(handle))?;
        resource.published = true;
        debug!("Published {} ({:?}, {:?})", handle, resource.uri, resource.flags);
        Ok(())
    }

    fn release_resource(&self, handle: NativeHandle) {
        if let Ok(mut state) = self.lock() {
            state.resources.remove(&handle);
        }
    }

    fn release_all_resources(&self) {
        if let Ok(mut state) = self.lock() {
            state.resources.clear();
        }
    }

    fn add_attribute(&self, handle: NativeHandle, attribute: &Attribute) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(TransportError::UnknownResource(handle))?;
        resource.attributes.push(attribute.clone());
        Ok(())
    }

    fn set_observable(&self, handle: NativeHandle) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(TransportError::UnknownResource(handle))?;
        resource.observable = true;
        Ok(())
    }

    fn add_observer(&self, handle: NativeHandle, observer: &Observer) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if !state.sessions.contains_key(&observer.session) {
            return Err(TransportError::UnknownSession(observer.session));
        }
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(TransportError::UnknownResource(handle))?;
        let key = (observer.session, observer.token.clone());
        if !resource.observers.contains(&key) {
            resource.observers.push(key);
        }
        Ok(())
    }

    fn remove_observer(&self, handle: NativeHandle, session: SessionId, token: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let resource = state
            .resources
            .get_mut(&handle)
            .ok_or(TransportError::UnknownResource(handle))?;
        resource
            .observers
            .retain(|(s, t)| !(*s == session && t.as_slice() == token));
        Ok(())
    }

    fn notify(&self, handle: NativeHandle, observer: &Observer, notification: &Notification) -> Result<(), TransportError> {
        let state = self.lock()?;
        let resource = state
            .resources
            .get(&handle)
            .ok_or(TransportError::UnknownResource(handle))?;
        if !resource.observable {
            return Err(TransportError::UnknownResource(handle));
        }
        let sender = state
            .sessions
            .get(&observer.session)
            .ok_or(TransportError::UnknownSession(observer.session))?;
        sender
            .send(notification.clone())
            .map_err(|_| TransportError::SessionClosed(observer.session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification {
            uri: "/test".to_string(),
            token: vec![1],
            code: 205,
            body: None,
            confirmable: false,
        }
    }

    #[test]
    fn test_notify_reaches_open_session() {
        let transport = LocalTransport::new();
        let (session, mut rx) = transport.open_session().unwrap();
        let handle = transport.create_resource("/test", NotifyFlags::NotifyNon).unwrap();
        transport.set_observable(handle).unwrap();
        let observer = Observer { session, token: vec![1], query: String::new() };

        transport.add_observer(handle, &observer).unwrap();
        transport.add_observer(handle, &observer).unwrap();
        assert_eq!(transport.observer_count(handle), 1);
        transport.notify(handle, &observer, &notification()).unwrap();

        assert_eq!(rx.try_recv().unwrap(), notification());
    }

    #[test]
    fn test_notify_closed_session_fails() {
        let transport = LocalTransport::new();
        let (session, rx) = transport.open_session().unwrap();
        let handle = transport.create_resource("/test", NotifyFlags::NotifyCon).unwrap();
        transport.set_observable(handle).unwrap();
        let observer = Observer { session, token: vec![1], query: String::new() };
        drop(rx);

        assert_eq!(
            transport.notify(handle, &observer, &notification()),
            Err(TransportError::SessionClosed(session))
        );

        transport.close_session(session).unwrap();
        assert_eq!(
            transport.add_observer(handle, &observer),
            Err(TransportError::UnknownSession(session))
        );
    }

    #[test]
    fn test_release_all() {
        let transport = LocalTransport::new();
        let a = transport.create_resource("/a", NotifyFlags::NotifyNon).unwrap();
        transport.create_unknown_resource().unwrap();
        transport.add_resource(a).unwrap();
        assert!(transport.is_published(a));

        transport.release_all_resources();
        assert_eq!(transport.resource_count(), 0);
        assert!(!transport.is_published(a));
    }
}
