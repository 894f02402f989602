//! Mitigation scope rows.
//!
//! Scopes are written by the mitigation workflow; this layer only reads and
//! updates them in place through the storage collaborator. Rows are never
//! removed here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mitigation status as signalled to the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MitigationStatus {
    AttackMitigationInProgress,
    AttackSuccessfullyMitigated,
    AttackStopped,
    AttackExceededCapability,
    DotsClientWithdrawnMitigation,
    AttackMitigationTerminated,
    AttackMitigationWithdrawn,
    AttackMitigationSignalLoss,
}

impl MitigationStatus {
    pub fn code(&self) -> u8 {
        match self {
            MitigationStatus::AttackMitigationInProgress => 1,
            MitigationStatus::AttackSuccessfullyMitigated => 2,
            MitigationStatus::AttackStopped => 3,
            MitigationStatus::AttackExceededCapability => 4,
            MitigationStatus::DotsClientWithdrawnMitigation => 5,
            MitigationStatus::AttackMitigationTerminated => 6,
            MitigationStatus::AttackMitigationWithdrawn => 7,
            MitigationStatus::AttackMitigationSignalLoss => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => MitigationStatus::AttackMitigationInProgress,
            2 => MitigationStatus::AttackSuccessfullyMitigated,
            3 => MitigationStatus::AttackStopped,
            4 => MitigationStatus::AttackExceededCapability,
            5 => MitigationStatus::DotsClientWithdrawnMitigation,
            6 => MitigationStatus::AttackMitigationTerminated,
            7 => MitigationStatus::AttackMitigationWithdrawn,
            8 => MitigationStatus::AttackMitigationSignalLoss,
            _ => return None,
        })
    }
}

/// Attack status reported by the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AttackStatus {
    UnderAttack,
    AttackSuccessfullyMitigated,
}

/// One mitigation request of one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationScope {
    pub customer_id: i32,
    pub client_identifier: String,
    pub client_domain_identifier: Option<String>,
    pub mitigation_id: i32,
    pub status: MitigationStatus,
    /// Lifetime in seconds, negative for indefinite
    pub lifetime: i32,
    pub attack_status: Option<AttackStatus>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}
