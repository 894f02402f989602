//! In-memory store.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! copy of the state, which replaces the shared state on commit. Transactions
//! are therefore serialisable, and dropping one discards its writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::core::alias::Alias;
use crate::core::client::Client;
use crate::core::mitigation::MitigationScope;
use crate::core::session_config::SignalSessionConfiguration;
use crate::core::storage::{Store, StoreError, Transaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    clients: HashMap<(i32, String), Client>,
    session_configurations: BTreeMap<(i32, i32), SignalSessionConfiguration>,
    aliases: BTreeMap<(Uuid, String), Alias>,
    mitigation_scopes: BTreeMap<(i32, String, i32), MitigationScope>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_client(&mut self, customer_id: i32, cuid: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.working.clients.get(&(customer_id, cuid.to_string())).cloned())
    }

    async fn save_client(&mut self, client: &Client) -> Result<(), StoreError> {
        self.working
            .clients
            .insert((client.customer_id, client.cuid.clone()), client.clone());
        Ok(())
    }

    async fn find_session_configuration(
        &mut self,
        customer_id: i32,
        session_id: i32,
    ) -> Result<Option<SignalSessionConfiguration>, StoreError> {
        Ok(self.working.session_configurations.get(&(customer_id, session_id)).cloned())
    }

    async fn save_session_configuration(
        &mut self,
        customer_id: i32,
        configuration: &SignalSessionConfiguration,
    ) -> Result<(), StoreError> {
        self.working
            .session_configurations
            .insert((customer_id, configuration.session_id), configuration.clone());
        Ok(())
    }

    async fn delete_session_configuration(&mut self, customer_id: i32, session_id: i32) -> Result<bool, StoreError> {
        Ok(self
            .working
            .session_configurations
            .remove(&(customer_id, session_id))
            .is_some())
    }

    async fn delete_session_configurations(&mut self, customer_id: i32) -> Result<Vec<i32>, StoreError> {
        let session_ids: Vec<i32> = self
            .working
            .session_configurations
            .keys()
            .filter(|(customer, _)| *customer == customer_id)
            .map(|(_, session_id)| *session_id)
            .collect();
        for session_id in &session_ids {
            self.working.session_configurations.remove(&(customer_id, *session_id));
        }
        Ok(session_ids)
    }

    async fn find_aliases(&mut self, client_id: Uuid) -> Result<Vec<Alias>, StoreError> {
        Ok(self
            .working
            .aliases
            .iter()
            .filter(|((owner, _), _)| *owner == client_id)
            .map(|(_, alias)| alias.clone())
            .collect())
    }

    async fn find_alias(&mut self, client_id: Uuid, name: &str) -> Result<Option<Alias>, StoreError> {
        Ok(self.working.aliases.get(&(client_id, name.to_string())).cloned())
    }

    async fn save_alias(&mut self, alias: &Alias) -> Result<(), StoreError> {
        self.working
            .aliases
            .insert((alias.client_id, alias.name.clone()), alias.clone());
        Ok(())
    }

    async fn delete_alias(&mut self, client_id: Uuid, name: &str) -> Result<bool, StoreError> {
        Ok(self.working.aliases.remove(&(client_id, name.to_string())).is_some())
    }

    async fn find_mitigation_scope(
        &mut self,
        customer_id: i32,
        cuid: &str,
        mitigation_id: i32,
    ) -> Result<Option<MitigationScope>, StoreError> {
        Ok(self
            .working
            .mitigation_scopes
            .get(&(customer_id, cuid.to_string(), mitigation_id))
            .cloned())
    }

    async fn find_mitigation_scopes(&mut self, customer_id: i32, cuid: &str) -> Result<Vec<MitigationScope>, StoreError> {
        Ok(self
            .working
            .mitigation_scopes
            .iter()
            .filter(|((customer, client, _), _)| *customer == customer_id && client == cuid)
            .map(|(_, scope)| scope.clone())
            .collect())
    }

    async fn save_mitigation_scope(&mut self, scope: &MitigationScope) -> Result<(), StoreError> {
        self.working.mitigation_scopes.insert(
            (scope.customer_id, scope.client_identifier.clone(), scope.mitigation_id),
            scope.clone(),
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
