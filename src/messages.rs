//! Wire messages of the signal and data channels.
//!
//! Bodies are JSON with YANG-style kebab-case member names. Floats appear only
//! here; they are converted to and from fixed-point at this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::alias::Alias;
use crate::core::session_config::{Bound, ConfigurationView, SignalSessionConfiguration, SystemDefaultConfiguration};
use crate::core::DotsError;
use crate::utils::{decimal_from_f64, decimal_to_f64, minutes_remaining};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentValue<T> {
    #[serde(rename = "current-value")]
    pub current_value: T,
}

/// Proposed parameters of one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MitigatingConfigRequest {
    pub session_id: Option<i32>,
    pub heartbeat_interval: Option<CurrentValue<i32>>,
    pub missing_hb_allowed: Option<CurrentValue<i32>>,
    pub max_retransmit: Option<CurrentValue<i32>>,
    pub ack_timeout: Option<CurrentValue<i32>>,
    pub ack_random_factor: Option<CurrentValue<f64>>,
    pub trigger_mitigation: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalConfigs {
    #[serde(rename = "mitigating-config")]
    pub mitigating_config: Option<MitigatingConfigRequest>,
}

/// Body of a session configuration PUT
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalConfigRequest {
    #[serde(rename = "ietf-dots-signal-channel:signal-config")]
    pub signal_config: Option<SignalConfigs>,
}

fn required<T>(value: Option<CurrentValue<T>>, attribute: &str) -> Result<T, DotsError> {
    value
        .map(|v| v.current_value)
        .ok_or_else(|| DotsError::MissingAttribute(format!("'{}'", attribute)))
}

impl SignalConfigRequest {
    /// Build the proposed configuration. `path_sid` is the session id from the
    /// URI path, 0 when the path carries none.
    pub fn into_configuration(self, path_sid: i32) -> Result<SignalSessionConfiguration, DotsError> {
        let config = self
            .signal_config
            .and_then(|configs| configs.mitigating_config)
            .ok_or_else(|| DotsError::MissingAttribute("'mitigating-config'".to_string()))?;

        let session_id = match (config.session_id, path_sid) {
            (Some(sid), 0) => sid,
            (Some(sid), path) if sid == path => sid,
            (Some(sid), path) => {
                return Err(DotsError::BadAttribute(format!(
                    "session-id {} does not match sid={} in the path",
                    sid, path
                )))
            }
            (None, 0) => return Err(DotsError::MissingAttribute("'session-id'".to_string())),
            (None, path) => path,
        };

        let ack_random_factor = required(config.ack_random_factor, "ack-random-factor")?;
        Ok(SignalSessionConfiguration {
            session_id,
            heartbeat_interval: required(config.heartbeat_interval, "heartbeat-interval")?,
            missing_hb_allowed: required(config.missing_hb_allowed, "missing-hb-allowed")?,
            max_retransmit: required(config.max_retransmit, "max-retransmit")?,
            ack_timeout: required(config.ack_timeout, "ack-timeout")?,
            ack_random_factor: decimal_from_f64(ack_random_factor)
                .map_err(|_| DotsError::InvalidValue(format!("ack-random-factor {}", ack_random_factor)))?,
            trigger_mitigation: config.trigger_mitigation.unwrap_or(true),
        })
    }
}

/// A parameter together with its permitted range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Parameter<T> {
    pub max_value: T,
    pub min_value: T,
    pub current_value: T,
}

impl Parameter<i32> {
    fn integer(bound: &Bound<i32>, current_value: i32) -> Self {
        Self {
            max_value: bound.max,
            min_value: bound.min,
            current_value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MitigatingConfigResponse {
    pub heartbeat_interval: Parameter<i32>,
    pub missing_hb_allowed: Parameter<i32>,
    pub max_retransmit: Parameter<i32>,
    pub ack_timeout: Parameter<i32>,
    pub ack_random_factor: Parameter<f64>,
    pub trigger_mitigation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalConfigsResponse {
    #[serde(rename = "session-id", skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<i32>,
    #[serde(rename = "mitigating-config")]
    pub mitigating_config: MitigatingConfigResponse,
}

/// Body of a session configuration GET, also pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationResponse {
    #[serde(rename = "ietf-dots-signal-channel:signal-config")]
    pub signal_config: SignalConfigsResponse,
}

impl ConfigurationResponse {
    pub fn new(view: &ConfigurationView, envelope: &SystemDefaultConfiguration) -> Self {
        let configuration = &view.configuration;
        Self {
            signal_config: SignalConfigsResponse {
                session_id: (!view.is_default).then_some(configuration.session_id),
                mitigating_config: MitigatingConfigResponse {
                    heartbeat_interval: Parameter::integer(&envelope.heartbeat_interval, configuration.heartbeat_interval),
                    missing_hb_allowed: Parameter::integer(&envelope.missing_hb_allowed, configuration.missing_hb_allowed),
                    max_retransmit: Parameter::integer(&envelope.max_retransmit, configuration.max_retransmit),
                    ack_timeout: Parameter::integer(&envelope.ack_timeout, configuration.ack_timeout),
                    ack_random_factor: Parameter {
                        max_value: decimal_to_f64(&envelope.ack_random_factor.max),
                        min_value: decimal_to_f64(&envelope.ack_random_factor.min),
                        current_value: decimal_to_f64(&configuration.ack_random_factor),
                    },
                    trigger_mitigation: configuration.trigger_mitigation,
                },
            },
        }
    }
}

/// One alias on the wire: its name, the remaining lifetime on responses, and
/// the traffic description fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AliasEntry {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "pending-lifetime", skip_serializing_if = "Option::is_none", default)]
    pub pending_lifetime: Option<i64>,
    #[serde(flatten)]
    pub traffic: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AliasList {
    #[serde(default)]
    pub alias: Vec<AliasEntry>,
}

/// Alias request and response body
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AliasesDocument {
    #[serde(rename = "ietf-dots-data-channel:aliases")]
    pub aliases: AliasList,
}

impl AliasesDocument {
    pub fn from_aliases(aliases: &[Alias], now: DateTime<Utc>) -> Self {
        Self {
            aliases: AliasList {
                alias: aliases
                    .iter()
                    .map(|alias| AliasEntry {
                        name: alias.name.clone(),
                        pending_lifetime: Some(minutes_remaining(alias.valid_through, now)),
                        traffic: alias.traffic.clone(),
                    })
                    .collect(),
            },
        }
    }

    /// The traffic description of the single alias named `name`.
    ///
    /// A client-supplied `pending-lifetime` is discarded.
    pub fn into_traffic(self, name: &str) -> Result<Map<String, Value>, DotsError> {
        let mut entries = self.aliases.alias;
        if entries.len() != 1 {
            return Err(DotsError::BadAttribute(format!(
                "exactly one alias expected, got {}",
                entries.len()
            )));
        }
        let entry = entries.remove(0);
        if entry.name.is_empty() {
            return Err(DotsError::BadAttribute("alias 'name' is empty".to_string()));
        }
        if entry.name != name {
            return Err(DotsError::BadAttribute(format!(
                "alias name '{}' does not match '{}' in the path",
                entry.name, name
            )));
        }
        Ok(entry.traffic)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DotsClientEntry {
    pub cuid: String,
    #[serde(default)]
    pub cdid: Option<String>,
}

/// Body of a client registration PUT
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DotsClientRequest {
    #[serde(rename = "ietf-dots-data-channel:dots-client", default)]
    pub dots_client: Vec<DotsClientEntry>,
}

impl DotsClientRequest {
    /// The domain identifier for `cuid`, checking the body names the same client
    pub fn into_cdid(self, cuid: &str) -> Result<Option<String>, DotsError> {
        match self.dots_client.as_slice() {
            [] => Ok(None),
            [entry] if entry.cuid == cuid => Ok(entry.cdid.clone()),
            [entry] => Err(DotsError::BadAttribute(format!(
                "cuid '{}' does not match '{}' in the path",
                entry.cuid, cuid
            ))),
            _ => Err(DotsError::BadAttribute("exactly one dots-client expected".to_string())),
        }
    }
}

/// Error body returned with every 4xx/5xx response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorBody {
    pub error_tag: String,
    pub error_message: String,
}
