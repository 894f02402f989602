//! Monitoring for the DOTS server.
//!
//! Metric names shared by the core components and the Prometheus recorder
//! backing the `/metrics` endpoint.

use log::info;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::models::MonitoringConfig;

/// Requests handled, labelled by `resource` and `outcome`
pub const REQUESTS: &str = "dots_requests_total";
/// Notifications delivered to observers
pub const NOTIFICATIONS_SENT: &str = "dots_notifications_sent_total";
/// Notifications dropped because delivery failed
pub const NOTIFICATIONS_FAILED: &str = "dots_notifications_failed_total";
/// Resources published on the transport
pub const RESOURCES_BOUND: &str = "dots_resources_bound_total";

/// Install the global Prometheus recorder when monitoring is enabled
pub fn install_recorder(config: &MonitoringConfig) -> Result<Option<PrometheusHandle>, BuildError> {
    if !config.enabled {
        info!("Monitoring disabled, metrics are not recorded");
        return Ok(None);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus recorder installed");
    Ok(Some(handle))
}
