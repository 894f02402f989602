//! Storage collaborator.
//!
//! Every request runs inside one `Transaction`: opened before the first
//! lookup, committed only after every write succeeded, rolled back on any
//! error. A transaction dropped without `commit` is aborted.

pub mod memory;
pub mod redis_store;
#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::core::alias::Alias;
use crate::core::client::Client;
use crate::core::mitigation::MitigationScope;
use crate::core::session_config::SignalSessionConfiguration;
use crate::core::DotsError;
use crate::models::{StorageBackend, StorageConfig};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Transaction aborted by a concurrent modification")]
    Conflict,
}

/// Opens transactions against a backend
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// Typed row accessors scoped to one transaction
#[async_trait]
pub trait Transaction: Send {
    async fn find_client(&mut self, customer_id: i32, cuid: &str) -> Result<Option<Client>, StoreError>;

    async fn save_client(&mut self, client: &Client) -> Result<(), StoreError>;

    async fn find_session_configuration(
        &mut self,
        customer_id: i32,
        session_id: i32,
    ) -> Result<Option<SignalSessionConfiguration>, StoreError>;

    /// Insert or overwrite the row keyed by (customer, session id)
    async fn save_session_configuration(
        &mut self,
        customer_id: i32,
        configuration: &SignalSessionConfiguration,
    ) -> Result<(), StoreError>;

    /// Returns whether a row was removed
    async fn delete_session_configuration(&mut self, customer_id: i32, session_id: i32) -> Result<bool, StoreError>;

    /// Removes every row of the customer and returns the removed session ids
    async fn delete_session_configurations(&mut self, customer_id: i32) -> Result<Vec<i32>, StoreError>;

    /// All alias rows of a client, expired ones included
    async fn find_aliases(&mut self, client_id: Uuid) -> Result<Vec<Alias>, StoreError>;

    async fn find_alias(&mut self, client_id: Uuid, name: &str) -> Result<Option<Alias>, StoreError>;

    /// Insert or overwrite the row keyed by (client, name)
    async fn save_alias(&mut self, alias: &Alias) -> Result<(), StoreError>;

    async fn delete_alias(&mut self, client_id: Uuid, name: &str) -> Result<bool, StoreError>;

    async fn find_mitigation_scope(
        &mut self,
        customer_id: i32,
        cuid: &str,
        mitigation_id: i32,
    ) -> Result<Option<MitigationScope>, StoreError>;

    async fn find_mitigation_scopes(&mut self, customer_id: i32, cuid: &str) -> Result<Vec<MitigationScope>, StoreError>;

    async fn save_mitigation_scope(&mut self, scope: &MitigationScope) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Commit `tx` if `result` is a success, roll it back otherwise
pub async fn finish<T>(tx: Box<dyn Transaction>, result: Result<T, DotsError>) -> Result<T, DotsError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback_error);
            }
            Err(e)
        }
    }
}

/// Open the store selected by the configuration
pub fn connect(config: &StorageConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
        StorageBackend::Redis => {
            info!("Using Redis store at {}", config.redis_url);
            let client = redis::Client::open(config.redis_url.as_str())?;
            Ok(Arc::new(redis_store::RedisStore::new(client)))
        }
    }
}
