//! Core functionality for the DOTS server.
//!
//! This module contains the core components of the service: the resource
//! registry, session configuration negotiation and alias management, along
//! with the storage and transport collaborators they run against.

pub mod alias;
pub mod client;
pub mod mitigation;
pub mod monitoring;
pub mod notifier;
pub mod resource;
pub mod session_config;
pub mod storage;
pub mod transport;

use log::error;
use thiserror::Error;

use crate::core::storage::StoreError;

/// Request-level errors, resolved at the boundary of a single request
#[derive(Error, Debug)]
pub enum DotsError {
    #[error("Missing a mandatory attribute: {0}")]
    MissingAttribute(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Bad attribute: {0}")]
    BadAttribute(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl DotsError {
    /// Log a server-side failure with the request context. Client errors pass through.
    pub fn log_failure(self, context: &str) -> Self {
        if let DotsError::OperationFailed(reason) = &self {
            error!("{}: {}", context, reason);
        }
        self
    }
}

impl From<StoreError> for DotsError {
    fn from(err: StoreError) -> Self {
        DotsError::OperationFailed(err.to_string())
    }
}

/// Whether an upsert created a new row or overwrote an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
        }
    }
}

pub use alias::{Alias, AliasManager, AliasService};
pub use client::{Client, Customer};
pub use mitigation::MitigationScope;
pub use notifier::Notifier;
pub use resource::{ResourceId, ResourceRegistry};
pub use session_config::{SessionConfigNegotiator, SignalSessionConfiguration, SystemDefaultConfiguration};
pub use storage::{Store, Transaction};
pub use transport::{LocalTransport, Transport};
