//! Alias management.
//!
//! Aliases are named traffic descriptions owned by a client. Each one carries
//! a `valid_through` instant that is pushed forward on every create or update;
//! expiry is evaluated lazily against the caller's clock, so an expired row
//! may still be stored but is never returned.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::client::{resolve_client, Client, Customer};
use crate::core::notifier::{alias_uri, Notifier};
use crate::core::session_config::SettingsError;
use crate::core::storage::{finish, Store, StoreError, Transaction};
use crate::core::{DotsError, UpsertOutcome};
use crate::messages::AliasesDocument;
use crate::models::AliasConfig;

pub const DEFAULT_ALIAS_LIFETIME_MINUTES: i64 = 7 * 1440;
/// Longest lifetime accepted from the settings, one year
pub const MAX_ALIAS_LIFETIME_MINUTES: i64 = 366 * 1440;

const RESOURCE_TYPE: &str = "ietf-dots-data-channel:aliases";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    /// Traffic description, opaque to this layer
    pub traffic: Map<String, Value>,
    pub valid_through: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alias {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_through
    }
}

/// Expiry-aware alias operations inside a caller-supplied transaction
#[derive(Debug, Clone)]
pub struct AliasManager {
    lifetime: Duration,
}

impl Default for AliasManager {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_ALIAS_LIFETIME_MINUTES))
    }
}

impl AliasManager {
    pub fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }

    /// Manager with the configured lifetime, which must be 1 minute to 1 year
    pub fn from_settings(settings: &AliasConfig) -> Result<Self, SettingsError> {
        match settings.lifetime_minutes {
            minutes @ 1..=MAX_ALIAS_LIFETIME_MINUTES => Ok(Self::new(Duration::minutes(minutes))),
            minutes => Err(SettingsError::AliasLifetime(minutes)),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Live aliases of `client`, ordered by name
    pub async fn find_all(
        &self,
        tx: &mut dyn Transaction,
        client: &Client,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alias>, StoreError> {
        let mut aliases: Vec<Alias> = tx
            .find_aliases(client.id)
            .await?
            .into_iter()
            .filter(|alias| !alias.is_expired(now))
            .collect();
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(aliases)
    }

    pub async fn find_by_name(
        &self,
        tx: &mut dyn Transaction,
        client: &Client,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Alias>, StoreError> {
        Ok(tx
            .find_alias(client.id, name)
            .await?
            .filter(|alias| !alias.is_expired(now)))
    }

    /// Create the alias, or overwrite its traffic and extend its validity.
    ///
    /// An expired row counts as absent and is replaced.
    pub async fn upsert(
        &self,
        tx: &mut dyn Transaction,
        client: &Client,
        name: &str,
        traffic: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(UpsertOutcome, Alias), StoreError> {
        let valid_through = now + self.lifetime;
        let (outcome, alias) = match self.find_by_name(tx, client, name, now).await? {
            Some(existing) => (
                UpsertOutcome::Updated,
                Alias {
                    traffic,
                    valid_through,
                    updated_at: now,
                    ..existing
                },
            ),
            None => (
                UpsertOutcome::Created,
                Alias {
                    id: Uuid::new_v4(),
                    client_id: client.id,
                    name: name.to_string(),
                    traffic,
                    valid_through,
                    created_at: now,
                    updated_at: now,
                },
            ),
        };
        tx.save_alias(&alias).await?;
        Ok((outcome, alias))
    }

    /// Delete a live alias. Returns whether one was removed.
    pub async fn delete_by_name(
        &self,
        tx: &mut dyn Transaction,
        client: &Client,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.find_by_name(tx, client, name, now).await? {
            Some(_) => tx.delete_alias(client.id, name).await,
            None => Ok(false),
        }
    }
}

fn require(value: &str, attribute: &str) -> Result<(), DotsError> {
    if value.is_empty() {
        Err(DotsError::MissingAttribute(attribute.to_string()))
    } else {
        Ok(())
    }
}

/// Request-level alias operations: one transaction per call, client resolved
/// inside it, observers notified after commit
pub struct AliasService {
    store: Arc<dyn Store>,
    manager: AliasManager,
    notifier: Notifier,
}

impl AliasService {
    pub fn new(store: Arc<dyn Store>, manager: AliasManager, notifier: Notifier) -> Self {
        Self {
            store,
            manager,
            notifier,
        }
    }

    pub async fn get_all(&self, customer: &Customer, cuid: &str, now: DateTime<Utc>) -> Result<Vec<Alias>, DotsError> {
        require(cuid, "'cuid'")?;
        info!("GET aliases of client {} of customer {}", cuid, customer.id);

        let mut tx = self.store.begin().await?;
        let result = async {
            let client = resolve_client(tx.as_mut(), customer, cuid).await?;
            Ok::<_, DotsError>(self.manager.find_all(tx.as_mut(), &client, now).await?)
        }
        .await;

        finish(tx, result)
            .await
            .map_err(|e| e.log_failure(&format!("GET aliases of client {} of customer {}", cuid, customer.id)))
    }

    pub async fn get(&self, customer: &Customer, cuid: &str, name: &str, now: DateTime<Utc>) -> Result<Alias, DotsError> {
        require(cuid, "'cuid'")?;
        require(name, "alias 'name'")?;
        info!("GET alias {} of client {} of customer {}", name, cuid, customer.id);

        let mut tx = self.store.begin().await?;
        let result = async {
            let client = resolve_client(tx.as_mut(), customer, cuid).await?;
            match self.manager.find_by_name(tx.as_mut(), &client, name, now).await? {
                Some(alias) => Ok(alias),
                None => Err(DotsError::NotFound(format!("alias '{}'", name))),
            }
        }
        .await;

        finish(tx, result)
            .await
            .map_err(|e| e.log_failure(&format!("GET alias {} of client {} of customer {}", name, cuid, customer.id)))
    }

    /// Validate `document` against the path name and upsert its single entry
    pub async fn put(
        &self,
        customer: &Customer,
        cuid: &str,
        name: &str,
        document: AliasesDocument,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, DotsError> {
        require(cuid, "'cuid'")?;
        require(name, "alias 'name'")?;
        let traffic = document.into_traffic(name)?;
        info!("PUT alias {} of client {} of customer {}", name, cuid, customer.id);

        let mut tx = self.store.begin().await?;
        let result = async {
            let client = resolve_client(tx.as_mut(), customer, cuid).await?;
            Ok::<_, DotsError>(self.manager.upsert(tx.as_mut(), &client, name, traffic, now).await?)
        }
        .await;

        let (outcome, _) = finish(tx, result)
            .await
            .map_err(|e| e.log_failure(&format!("PUT alias {} of client {} of customer {}", name, cuid, customer.id)))?;
        info!("Alias {} of client {} {}", name, cuid, outcome.as_str());

        self.refresh(customer, cuid, name, now).await;
        Ok(outcome)
    }

    pub async fn delete(&self, customer: &Customer, cuid: &str, name: &str, now: DateTime<Utc>) -> Result<(), DotsError> {
        require(cuid, "'cuid'")?;
        require(name, "alias 'name'")?;
        info!("DELETE alias {} of client {} of customer {}", name, cuid, customer.id);

        let mut tx = self.store.begin().await?;
        let result = async {
            let client = resolve_client(tx.as_mut(), customer, cuid).await?;
            if self.manager.delete_by_name(tx.as_mut(), &client, name, now).await? {
                Ok(())
            } else {
                Err(DotsError::NotFound(format!("alias '{}'", name)))
            }
        }
        .await;

        finish(tx, result)
            .await
            .map_err(|e| e.log_failure(&format!("DELETE alias {} of client {} of customer {}", name, cuid, customer.id)))?;

        self.refresh(customer, cuid, name, now).await;
        Ok(())
    }

    /// Publish the committed alias to its observers, or retire the resource
    /// when the alias is gone or expired
    async fn refresh(&self, customer: &Customer, cuid: &str, name: &str, now: DateTime<Utc>) {
        let uri = alias_uri(customer.id, cuid, name);
        let current = move || async move {
            let mut tx = self.store.begin().await?;
            let found = async {
                match tx.find_client(customer.id, cuid).await? {
                    Some(client) => Ok::<_, DotsError>(self.manager.find_by_name(tx.as_mut(), &client, name, now).await?),
                    None => Ok(None),
                }
            }
            .await;
            let Some(alias) = finish(tx, found).await? else {
                return Ok(None);
            };
            let document = AliasesDocument::from_aliases(std::slice::from_ref(&alias), now);
            serde_json::to_value(document)
                .map(Some)
                .map_err(|e| DotsError::OperationFailed(e.to_string()))
        };
        if let Err(e) = self.notifier.refresh(&uri, RESOURCE_TYPE, current).await {
            warn!("Failed to refresh {}: {}", uri, e);
        }
    }
}
