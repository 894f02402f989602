//! Store wrapper for interleaving tests.
//!
//! `GatedStore::hold_next_commit` arms a gate: the next transaction begun
//! commits normally, then waits for the gate before returning, leaving other
//! requests free to run between its commit and whatever follows it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::alias::Alias;
use crate::core::client::Client;
use crate::core::mitigation::MitigationScope;
use crate::core::session_config::SignalSessionConfiguration;
use crate::core::storage::memory::MemoryStore;
use crate::core::storage::{Store, StoreError, Transaction};

#[derive(Clone, Default)]
pub struct GatedStore {
    inner: MemoryStore,
    armed: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the commit of the next transaction until the returned gate is notified
    pub fn hold_next_commit(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.armed.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let inner = self.inner.begin().await?;
        let gate = self.armed.lock().unwrap().take();
        Ok(Box::new(GatedTransaction { inner, gate }))
    }
}

struct GatedTransaction {
    inner: Box<dyn Transaction>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Transaction for GatedTransaction {
    async fn find_client(&mut self, customer_id: i32, cuid: &str) -> Result<Option<Client>, StoreError> {
        self.inner.find_client(customer_id, cuid).await
    }

    async fn save_client(&mut self, client: &Client) -> Result<(), StoreError> {
        self.inner.save_client(client).await
    }

    async fn find_session_configuration(
        &mut self,
        customer_id: i32,
        session_id: i32,
    ) -> Result<Option<SignalSessionConfiguration>, StoreError> {
        self.inner.find_session_configuration(customer_id, session_id).await
    }

    async fn save_session_configuration(
        &mut self,
        customer_id: i32,
        configuration: &SignalSessionConfiguration,
    ) -> Result<(), StoreError> {
        self.inner.save_session_configuration(customer_id, configuration).await
    }

    async fn delete_session_configuration(&mut self, customer_id: i32, session_id: i32) -> Result<bool, StoreError> {
        self.inner.delete_session_configuration(customer_id, session_id).await
    }

    async fn delete_session_configurations(&mut self, customer_id: i32) -> Result<Vec<i32>, StoreError> {
        self.inner.delete_session_configurations(customer_id).await
    }

    async fn find_aliases(&mut self, client_id: Uuid) -> Result<Vec<Alias>, StoreError> {
        self.inner.find_aliases(client_id).await
    }

    async fn find_alias(&mut self, client_id: Uuid, name: &str) -> Result<Option<Alias>, StoreError> {
        self.inner.find_alias(client_id, name).await
    }

    async fn save_alias(&mut self, alias: &Alias) -> Result<(), StoreError> {
        self.inner.save_alias(alias).await
    }

    async fn delete_alias(&mut self, client_id: Uuid, name: &str) -> Result<bool, StoreError> {
        self.inner.delete_alias(client_id, name).await
    }

    async fn find_mitigation_scope(
        &mut self,
        customer_id: i32,
        cuid: &str,
        mitigation_id: i32,
    ) -> Result<Option<MitigationScope>, StoreError> {
        self.inner.find_mitigation_scope(customer_id, cuid, mitigation_id).await
    }

    async fn find_mitigation_scopes(&mut self, customer_id: i32, cuid: &str) -> Result<Vec<MitigationScope>, StoreError> {
        self.inner.find_mitigation_scopes(customer_id, cuid).await
    }

    async fn save_mitigation_scope(&mut self, scope: &MitigationScope) -> Result<(), StoreError> {
        self.inner.save_mitigation_scope(scope).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let GatedTransaction { inner, gate } = *self;
        inner.commit().await?;
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
