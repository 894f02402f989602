//! DOTS clients and the customer/client resolver.

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::storage::{finish, Store, Transaction};
use crate::core::{DotsError, UpsertOutcome};

/// Authenticated customer on whose behalf a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i32,
}

/// A DOTS client registered under a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub customer_id: i32,
    /// Client identifier, unique within the customer
    pub cuid: String,
    /// Client domain identifier
    pub cdid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Resolve `cuid` to a client owned by `customer` inside `tx`
pub async fn resolve_client(tx: &mut dyn Transaction, customer: &Customer, cuid: &str) -> Result<Client, DotsError> {
    match tx.find_client(customer.id, cuid).await {
        Ok(Some(client)) => Ok(client),
        Ok(None) => Err(DotsError::NotFound(format!("dots-client '{}'", cuid))),
        Err(e) => {
            error!("Failed to look up client {} of customer {}: {}", cuid, customer.id, e);
            Err(e.into())
        }
    }
}

/// Register a client, or refresh its domain identifier if it already exists
pub async fn register_client(
    store: &dyn Store,
    customer: &Customer,
    cuid: &str,
    cdid: Option<String>,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, DotsError> {
    if cuid.is_empty() {
        return Err(DotsError::MissingAttribute("'cuid'".to_string()));
    }

    let mut tx = store.begin().await?;
    let result = async {
        let (client, outcome) = match tx.find_client(customer.id, cuid).await? {
            Some(existing) => (Client { cdid, ..existing }, UpsertOutcome::Updated),
            None => (
                Client {
                    id: Uuid::new_v4(),
                    customer_id: customer.id,
                    cuid: cuid.to_string(),
                    cdid,
                    created_at: now,
                },
                UpsertOutcome::Created,
            ),
        };
        tx.save_client(&client).await?;
        Ok::<_, DotsError>(outcome)
    }
    .await;

    let outcome = finish(tx, result)
        .await
        .map_err(|e| e.log_failure(&format!("Registering client {} of customer {}", cuid, customer.id)))?;
    info!("Client {} of customer {} {}", cuid, customer.id, outcome.as_str());
    Ok(outcome)
}
