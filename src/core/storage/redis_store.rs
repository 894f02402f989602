//! Redis-backed store.
//!
//! Rows are JSON values in Redis hashes. Each transaction owns a dedicated
//! connection: every key it reads is `WATCH`ed, writes are staged locally and
//! flushed in one `MULTI`/`EXEC` pipeline at commit. If another writer touched
//! a watched key in the meantime, `EXEC` is discarded and the commit fails
//! with `StoreError::Conflict`, leaving the stored state untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use log::debug;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::core::alias::Alias;
use crate::core::client::Client;
use crate::core::mitigation::MitigationScope;
use crate::core::session_config::SignalSessionConfiguration;
use crate::core::storage::{Store, StoreError, Transaction};
use crate::utils::format_key;

fn clients_key(customer_id: i32) -> String {
    format_key("dots:clients", &customer_id.to_string())
}

fn session_configurations_key(customer_id: i32) -> String {
    format_key("dots:session_configurations", &customer_id.to_string())
}

fn aliases_key(client_id: Uuid) -> String {
    format_key("dots:aliases", &client_id.to_string())
}

fn mitigation_scopes_key(customer_id: i32, cuid: &str) -> String {
    format_key("dots:mitigation_scopes", &format!("{}:{}", customer_id, cuid))
}

/// Redis store
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let conn = self.client.get_async_connection().await?;
        Ok(Box::new(RedisTransaction {
            conn,
            watched: HashSet::new(),
            staged: HashMap::new(),
        }))
    }
}

/// Pending changes to one hash
#[derive(Default)]
struct StagedHash {
    cleared: bool,
    fields: BTreeMap<String, Option<String>>,
}

struct RedisTransaction {
    conn: redis::aio::Connection,
    watched: HashSet<String>,
    staged: HashMap<String, StagedHash>,
}

impl RedisTransaction {
    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        if self.watched.insert(key.to_string()) {
            redis::cmd("WATCH").arg(key).query_async::<_, ()>(&mut self.conn).await?;
        }
        Ok(())
    }

    async fn get_field(&mut self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        if let Some(staged) = self.staged.get(key) {
            if let Some(value) = staged.fields.get(field) {
                return Ok(value.clone());
            }
            if staged.cleared {
                return Ok(None);
            }
        }
        self.watch(key).await?;
        let value: Option<String> = self.conn.hget(key, field).await?;
        Ok(value)
    }

    async fn get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut values = BTreeMap::new();
        let cleared = self.staged.get(key).map_or(false, |staged| staged.cleared);
        if !cleared {
            self.watch(key).await?;
            let stored: HashMap<String, String> = self.conn.hgetall(key).await?;
            values.extend(stored);
        }
        if let Some(staged) = self.staged.get(key) {
            for (field, value) in &staged.fields {
                match value {
                    Some(value) => values.insert(field.clone(), value.clone()),
                    None => values.remove(field),
                };
            }
        }
        Ok(values)
    }

    async fn get_row<T: DeserializeOwned>(&mut self, key: &str, field: &str) -> Result<Option<T>, StoreError> {
        match self.get_field(key, field).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_rows<T: DeserializeOwned>(&mut self, key: &str) -> Result<Vec<T>, StoreError> {
        self.get_all(key)
            .await?
            .values()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    fn put_row<T: Serialize>(&mut self, key: String, field: String, row: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(row)?;
        self.staged.entry(key).or_default().fields.insert(field, Some(json));
        Ok(())
    }

    fn remove_row(&mut self, key: String, field: String) {
        self.staged.entry(key).or_default().fields.insert(field, None);
    }

    fn clear(&mut self, key: String) {
        let staged = self.staged.entry(key).or_default();
        staged.cleared = true;
        staged.fields.clear();
    }
}

#[async_trait]
impl Transaction for RedisTransaction {
    async fn find_client(&mut self, customer_id: i32, cuid: &str) -> Result<Option<Client>, StoreError> {
        self.get_row(&clients_key(customer_id), cuid).await
    }

    async fn save_client(&mut self, client: &Client) -> Result<(), StoreError> {
        self.put_row(clients_key(client.customer_id), client.cuid.clone(), client)
    }

    async fn find_session_configuration(
        &mut self,
        customer_id: i32,
        session_id: i32,
    ) -> Result<Option<SignalSessionConfiguration>, StoreError> {
        self.get_row(&session_configurations_key(customer_id), &session_id.to_string())
            .await
    }

    async fn save_session_configuration(
        &mut self,
        customer_id: i32,
        configuration: &SignalSessionConfiguration,
    ) -> Result<(), StoreError> {
        self.put_row(
            session_configurations_key(customer_id),
            configuration.session_id.to_string(),
            configuration,
        )
    }

    async fn delete_session_configuration(&mut self, customer_id: i32, session_id: i32) -> Result<bool, StoreError> {
        let key = session_configurations_key(customer_id);
        let field = session_id.to_string();
        let existed = self.get_field(&key, &field).await?.is_some();
        if existed {
            self.remove_row(key, field);
        }
        Ok(existed)
    }

    async fn delete_session_configurations(&mut self, customer_id: i32) -> Result<Vec<i32>, StoreError> {
        let key = session_configurations_key(customer_id);
        let mut session_ids: Vec<i32> = self
            .get_all(&key)
            .await?
            .keys()
            .filter_map(|field| field.parse().ok())
            .collect();
        session_ids.sort_unstable();
        self.clear(key);
        Ok(session_ids)
    }

    async fn find_aliases(&mut self, client_id: Uuid) -> Result<Vec<Alias>, StoreError> {
        self.get_rows(&aliases_key(client_id)).await
    }

    async fn find_alias(&mut self, client_id: Uuid, name: &str) -> Result<Option<Alias>, StoreError> {
        self.get_row(&aliases_key(client_id), name).await
    }

    async fn save_alias(&mut self, alias: &Alias) -> Result<(), StoreError> {
        self.put_row(aliases_key(alias.client_id), alias.name.clone(), alias)
    }

    async fn delete_alias(&mut self, client_id: Uuid, name: &str) -> Result<bool, StoreError> {
        let key = aliases_key(client_id);
        let existed = self.get_field(&key, name).await?.is_some();
        if existed {
            self.remove_row(key, name.to_string());
        }
        Ok(existed)
    }

    async fn find_mitigation_scope(
        &mut self,
        customer_id: i32,
        cuid: &str,
        mitigation_id: i32,
    ) -> Result<Option<MitigationScope>, StoreError> {
        self.get_row(&mitigation_scopes_key(customer_id, cuid), &mitigation_id.to_string())
            .await
    }

    async fn find_mitigation_scopes(&mut self, customer_id: i32, cuid: &str) -> Result<Vec<MitigationScope>, StoreError> {
        self.get_rows(&mitigation_scopes_key(customer_id, cuid)).await
    }

    async fn save_mitigation_scope(&mut self, scope: &MitigationScope) -> Result<(), StoreError> {
        self.put_row(
            mitigation_scopes_key(scope.customer_id, &scope.client_identifier),
            scope.mitigation_id.to_string(),
            scope,
        )
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = *self;
        if this.staged.is_empty() {
            redis::cmd("UNWATCH").query_async::<_, ()>(&mut this.conn).await?;
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, staged) in &this.staged {
            if staged.cleared {
                pipe.del(key).ignore();
            }
            for (field, value) in &staged.fields {
                match value {
                    Some(value) => pipe.hset(key, field, value).ignore(),
                    None => pipe.hdel(key, field).ignore(),
                };
            }
        }

        let result: Option<()> = pipe.query_async(&mut this.conn).await?;
        debug!("Committed {} staged hashes", this.staged.len());
        result.ok_or(StoreError::Conflict)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = *self;
        redis::cmd("UNWATCH").query_async::<_, ()>(&mut this.conn).await?;
        Ok(())
    }
}
