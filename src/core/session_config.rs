//! Session configuration negotiation.
//!
//! Per-session signaling parameters are negotiated against a process-wide
//! envelope of defaults and [min, max] bounds. The envelope is built once from
//! the settings at startup and shared read-only; session id 0 always answers
//! with it, whatever rows the customer has stored.

use std::fmt;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::alias::MAX_ALIAS_LIFETIME_MINUTES;
use crate::core::client::Customer;
use crate::core::notifier::{session_config_uri, Notifier};
use crate::core::storage::{finish, Store};
use crate::core::{DotsError, UpsertOutcome};
use crate::messages::ConfigurationResponse;
use crate::models::{DecimalBound, IntegerBound, SignalConfigSettings};
use crate::utils::{decimal_from_f64, fits_scale, DECIMAL_SCALE};

const RESOURCE_TYPE: &str = "ietf-dots-signal-channel:signal-config";

/// Signaling parameters of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSessionConfiguration {
    pub session_id: i32,
    pub heartbeat_interval: i32,
    pub missing_hb_allowed: i32,
    pub max_retransmit: i32,
    pub ack_timeout: i32,
    pub ack_random_factor: BigDecimal,
    pub trigger_mitigation: bool,
}

/// Inclusive range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bound<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd> Bound<T> {
    pub fn contains(&self, value: &T) -> bool {
        *value >= self.min && *value <= self.max
    }
}

/// Errors in the configured settings, detected at startup
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("{field}: default {default} is outside [{min}, {max}]")]
    DefaultOutOfBounds {
        field: &'static str,
        default: String,
        min: String,
        max: String,
    },
    #[error("{field}: {value} is not a finite decimal")]
    InvalidDecimal { field: &'static str, value: f64 },
    #[error("alias lifetime of {0} minutes is outside [1, {max}]", max = MAX_ALIAS_LIFETIME_MINUTES)]
    AliasLifetime(i64),
}

fn check_bound<T: PartialOrd + fmt::Display>(
    field: &'static str,
    default: &T,
    bound: &Bound<T>,
) -> Result<(), SettingsError> {
    if bound.contains(default) {
        Ok(())
    } else {
        Err(SettingsError::DefaultOutOfBounds {
            field,
            default: default.to_string(),
            min: bound.min.to_string(),
            max: bound.max.to_string(),
        })
    }
}

fn integer_bound(field: &'static str, setting: &IntegerBound) -> Result<Bound<i32>, SettingsError> {
    let bound = Bound {
        min: setting.min,
        max: setting.max,
    };
    check_bound(field, &setting.default, &bound)?;
    Ok(bound)
}

fn decimal_bound(field: &'static str, setting: &DecimalBound) -> Result<(BigDecimal, Bound<BigDecimal>), SettingsError> {
    let convert = |value: f64| decimal_from_f64(value).map_err(|_| SettingsError::InvalidDecimal { field, value });
    let default = convert(setting.default)?;
    let bound = Bound {
        min: convert(setting.min)?,
        max: convert(setting.max)?,
    };
    check_bound(field, &default, &bound)?;
    Ok((default, bound))
}

/// Default values and permitted ranges, shared by every session
#[derive(Debug, Clone, PartialEq)]
pub struct SystemDefaultConfiguration {
    /// Session id 0 with the default values and `trigger_mitigation` set
    pub defaults: SignalSessionConfiguration,
    pub heartbeat_interval: Bound<i32>,
    pub missing_hb_allowed: Bound<i32>,
    pub max_retransmit: Bound<i32>,
    pub ack_timeout: Bound<i32>,
    pub ack_random_factor: Bound<BigDecimal>,
}

impl SystemDefaultConfiguration {
    pub fn from_settings(settings: &SignalConfigSettings) -> Result<Self, SettingsError> {
        let heartbeat_interval = integer_bound("heartbeat-interval", &settings.heartbeat_interval)?;
        let missing_hb_allowed = integer_bound("missing-hb-allowed", &settings.missing_hb_allowed)?;
        let max_retransmit = integer_bound("max-retransmit", &settings.max_retransmit)?;
        let ack_timeout = integer_bound("ack-timeout", &settings.ack_timeout)?;
        let (ack_random_factor_default, ack_random_factor) =
            decimal_bound("ack-random-factor", &settings.ack_random_factor)?;

        Ok(Self {
            defaults: SignalSessionConfiguration {
                session_id: 0,
                heartbeat_interval: settings.heartbeat_interval.default,
                missing_hb_allowed: settings.missing_hb_allowed.default,
                max_retransmit: settings.max_retransmit.default,
                ack_timeout: settings.ack_timeout.default,
                ack_random_factor: ack_random_factor_default,
                trigger_mitigation: true,
            },
            heartbeat_interval,
            missing_hb_allowed,
            max_retransmit,
            ack_timeout,
            ack_random_factor,
        })
    }

    /// Wire names of the fields of `configuration` outside their bounds
    pub fn out_of_bounds(&self, configuration: &SignalSessionConfiguration) -> Vec<&'static str> {
        let checks = [
            ("heartbeat-interval", self.heartbeat_interval.contains(&configuration.heartbeat_interval)),
            ("missing-hb-allowed", self.missing_hb_allowed.contains(&configuration.missing_hb_allowed)),
            ("max-retransmit", self.max_retransmit.contains(&configuration.max_retransmit)),
            ("ack-timeout", self.ack_timeout.contains(&configuration.ack_timeout)),
            ("ack-random-factor", self.ack_random_factor.contains(&configuration.ack_random_factor)),
        ];
        checks
            .into_iter()
            .filter(|(_, within)| !within)
            .map(|(field, _)| field)
            .collect()
    }
}

/// A rule a proposed configuration must satisfy before it is stored.
///
/// Returns a human-readable reason on rejection.
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, configuration: &SignalSessionConfiguration, customer: &Customer) -> Result<(), String>;
}

/// Requires a positive session id, every field inside the envelope and
/// decimals no finer than `DECIMAL_SCALE` places
pub struct EnvelopeValidator {
    envelope: Arc<SystemDefaultConfiguration>,
}

impl EnvelopeValidator {
    pub fn new(envelope: Arc<SystemDefaultConfiguration>) -> Self {
        Self { envelope }
    }
}

impl ConfigValidator for EnvelopeValidator {
    fn validate(&self, configuration: &SignalSessionConfiguration, _customer: &Customer) -> Result<(), String> {
        let mut offending = Vec::new();
        if configuration.session_id <= 0 {
            offending.push("session-id");
        }
        offending.extend(self.envelope.out_of_bounds(configuration));

        let mut reasons = Vec::new();
        if !offending.is_empty() {
            reasons.push(format!("out of range: {}", offending.join(", ")));
        }
        if !fits_scale(&configuration.ack_random_factor) {
            reasons.push(format!(
                "ack-random-factor {} has more than {} decimal places",
                configuration.ack_random_factor, DECIMAL_SCALE
            ));
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons.join("; "))
        }
    }
}

/// Configuration returned by a GET
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationView {
    pub configuration: SignalSessionConfiguration,
    /// Whether these are the system defaults rather than a stored session
    pub is_default: bool,
}

/// Session id carried in a `sid=<n>` path segment, 0 when there is none.
///
/// Any other segment is rejected, so a mistyped path never falls back to
/// the customer-wide session id 0.
pub fn parse_sid(segments: &[&str]) -> Result<i32, DotsError> {
    let mut sid = 0;
    for segment in segments {
        let value = segment
            .strip_prefix("sid=")
            .ok_or_else(|| DotsError::InvalidValue(format!("unexpected path segment '{}'", segment)))?;
        sid = value
            .parse()
            .map_err(|_| DotsError::InvalidValue(format!("sid '{}' is not an integer", value)))?;
        if sid < 0 {
            return Err(DotsError::InvalidValue(format!("sid {} is negative", sid)));
        }
    }
    Ok(sid)
}

pub struct SessionConfigNegotiator {
    store: Arc<dyn Store>,
    envelope: Arc<SystemDefaultConfiguration>,
    validators: Vec<Arc<dyn ConfigValidator>>,
    notifier: Notifier,
}

impl SessionConfigNegotiator {
    pub fn new(store: Arc<dyn Store>, envelope: Arc<SystemDefaultConfiguration>, notifier: Notifier) -> Self {
        let validators: Vec<Arc<dyn ConfigValidator>> = vec![Arc::new(EnvelopeValidator::new(envelope.clone()))];
        Self {
            store,
            envelope,
            validators,
            notifier,
        }
    }

    /// Add a rule run after the envelope check
    pub fn with_validator(mut self, validator: Arc<dyn ConfigValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn envelope(&self) -> &SystemDefaultConfiguration {
        &self.envelope
    }

    /// Run every validator, collecting all rejection reasons
    pub fn validate(&self, configuration: &SignalSessionConfiguration, customer: &Customer) -> Result<(), DotsError> {
        let reasons: Vec<String> = self
            .validators
            .iter()
            .filter_map(|validator| validator.validate(configuration, customer).err())
            .collect();

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(DotsError::BadAttribute(reasons.join("; ")))
        }
    }

    pub async fn get(&self, customer: &Customer, session_id: i32) -> Result<ConfigurationView, DotsError> {
        if session_id == 0 {
            return Ok(ConfigurationView {
                configuration: self.envelope.defaults.clone(),
                is_default: true,
            });
        }

        let mut tx = self.store.begin().await?;
        let result = async {
            match tx.find_session_configuration(customer.id, session_id).await? {
                Some(configuration) => Ok(ConfigurationView {
                    configuration,
                    is_default: false,
                }),
                None => Err(DotsError::NotFound(format!("session configuration sid={}", session_id))),
            }
        }
        .await;

        finish(tx, result).await.map_err(|e| {
            e.log_failure(&format!(
                "GET session configuration {} of customer {}",
                session_id, customer.id
            ))
        })
    }

    /// Validate and store `configuration`, keyed by its session id.
    ///
    /// A rejected configuration never reaches the store.
    pub async fn put(
        &self,
        customer: &Customer,
        configuration: SignalSessionConfiguration,
    ) -> Result<UpsertOutcome, DotsError> {
        info!(
            "Session configuration of customer {}: session-id={} heartbeat-interval={} missing-hb-allowed={} \
             max-retransmit={} ack-timeout={} ack-random-factor={} trigger-mitigation={}",
            customer.id,
            configuration.session_id,
            configuration.heartbeat_interval,
            configuration.missing_hb_allowed,
            configuration.max_retransmit,
            configuration.ack_timeout,
            configuration.ack_random_factor,
            configuration.trigger_mitigation
        );

        if let Err(e) = self.validate(&configuration, customer) {
            warn!("Rejected session configuration of customer {}: {}", customer.id, e);
            return Err(e);
        }

        let mut tx = self.store.begin().await?;
        let result = async {
            let outcome = match tx
                .find_session_configuration(customer.id, configuration.session_id)
                .await?
            {
                Some(_) => UpsertOutcome::Updated,
                None => UpsertOutcome::Created,
            };
            tx.save_session_configuration(customer.id, &configuration).await?;
            Ok::<_, DotsError>(outcome)
        }
        .await;

        let outcome = finish(tx, result).await.map_err(|e| {
            e.log_failure(&format!(
                "PUT session configuration {} of customer {}",
                configuration.session_id, customer.id
            ))
        })?;
        info!(
            "Session configuration {} of customer {} {}",
            configuration.session_id,
            customer.id,
            outcome.as_str()
        );

        self.refresh(customer, configuration.session_id).await;
        Ok(outcome)
    }

    /// Delete one session's row, or every row of the customer when `session_id` is 0
    pub async fn delete(&self, customer: &Customer, session_id: i32) -> Result<(), DotsError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let removed = if session_id == 0 {
                tx.delete_session_configurations(customer.id).await?
            } else if tx.delete_session_configuration(customer.id, session_id).await? {
                vec![session_id]
            } else {
                return Err(DotsError::NotFound(format!("session configuration sid={}", session_id)));
            };
            Ok::<_, DotsError>(removed)
        }
        .await;

        let removed = finish(tx, result).await.map_err(|e| {
            e.log_failure(&format!(
                "DELETE session configuration {} of customer {}",
                session_id, customer.id
            ))
        })?;
        info!("Deleted {} session configurations of customer {}", removed.len(), customer.id);

        for sid in removed {
            self.refresh(customer, sid).await;
        }
        Ok(())
    }

    /// Publish the committed row of `session_id` to its observers, or retire
    /// the resource when the row is gone
    async fn refresh(&self, customer: &Customer, session_id: i32) {
        let uri = session_config_uri(customer.id, session_id);
        let current = move || async move {
            let mut tx = self.store.begin().await?;
            let found = tx
                .find_session_configuration(customer.id, session_id)
                .await
                .map_err(DotsError::from);
            let Some(configuration) = finish(tx, found).await? else {
                return Ok(None);
            };
            let view = ConfigurationView {
                configuration,
                is_default: false,
            };
            serde_json::to_value(ConfigurationResponse::new(&view, &self.envelope))
                .map(Some)
                .map_err(|e| DotsError::OperationFailed(e.to_string()))
        };
        if let Err(e) = self.notifier.refresh(&uri, RESOURCE_TYPE, current).await {
            warn!("Failed to refresh {}: {}", uri, e);
        }
    }
}
