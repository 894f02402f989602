//! API endpoints for the DOTS server.
//!
//! This module maps the signal channel session configuration resource and the
//! data channel client and alias resources onto HTTP routes, and renders
//! request errors as `{"error-tag", "error-message"}` bodies.

use std::future::{ready, Ready};
use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::error::ErrorUnauthorized;
use actix_web::http::StatusCode;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, Responder, ResponseError};
use chrono::Utc;
use metrics::increment_counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::client::register_client;
use crate::core::monitoring::REQUESTS;
use crate::core::session_config::{parse_sid, SettingsError};
use crate::core::{
    AliasManager, AliasService, Customer, DotsError, Notifier, SessionConfigNegotiator, Store,
    SystemDefaultConfiguration, UpsertOutcome,
};
use crate::messages::{AliasesDocument, ConfigurationResponse, DotsClientRequest, ErrorBody, SignalConfigRequest};
use crate::models::Config;

/// Header carrying the customer authenticated by the TLS terminator
pub const CUSTOMER_HEADER: &str = "x-dots-customer-id";

pub struct ApiState {
    pub negotiator: SessionConfigNegotiator,
    pub aliases: AliasService,
    pub store: Arc<dyn Store>,
    pub metrics: Option<PrometheusHandle>,
}

impl ApiState {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        notifier: Notifier,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, SettingsError> {
        let envelope = Arc::new(SystemDefaultConfiguration::from_settings(&config.signal_config)?);
        let manager = AliasManager::from_settings(&config.alias)?;
        Ok(Self {
            negotiator: SessionConfigNegotiator::new(store.clone(), envelope, notifier.clone()),
            aliases: AliasService::new(store.clone(), manager, notifier),
            store,
            metrics,
        })
    }
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/metrics").route(web::get().to(render_metrics)))
        .service(
            web::scope("/.well-known/dots/config")
                .service(
                    web::resource("")
                        .route(web::get().to(get_default_config))
                        .route(web::put().to(put_config))
                        .route(web::delete().to(delete_all_configs)),
                )
                .service(
                    web::resource("/{segment}")
                        .route(web::get().to(get_session_config))
                        .route(web::put().to(put_session_config))
                        .route(web::delete().to(delete_session_config)),
                ),
        )
        .service(
            web::scope("/data/dots-client/{cuid}")
                .service(web::resource("").route(web::put().to(put_client)))
                .service(web::resource("/aliases").route(web::get().to(get_aliases)))
                .service(
                    web::resource("/aliases/{name}")
                        .route(web::get().to(get_alias))
                        .route(web::put().to(put_alias))
                        .route(web::delete().to(delete_alias)),
                ),
        );
}

impl ResponseError for DotsError {
    fn status_code(&self) -> StatusCode {
        match self {
            DotsError::MissingAttribute(_) | DotsError::InvalidValue(_) | DotsError::BadAttribute(_) => {
                StatusCode::BAD_REQUEST
            }
            DotsError::NotFound(_) => StatusCode::NOT_FOUND,
            DotsError::OperationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (tag, message) = match self {
            DotsError::MissingAttribute(m) => ("missing-attribute", format!("Missing a mandatory attribute: {}", m)),
            DotsError::InvalidValue(m) => ("invalid-value", m.clone()),
            DotsError::BadAttribute(m) => ("bad-attribute", m.clone()),
            DotsError::NotFound(m) => ("invalid-value", format!("Not found: {}", m)),
            DotsError::OperationFailed(_) => ("operation-failed", "operation failed".to_string()),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error_tag: tag.to_string(),
            error_message: message,
        })
    }
}

impl FromRequest for Customer {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let customer = req
            .headers()
            .get(CUSTOMER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i32>().ok())
            .map(|id| Customer { id });

        ready(customer.ok_or_else(|| ErrorUnauthorized("missing or invalid customer identity")))
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, DotsError> {
    if body.is_empty() {
        return Err(DotsError::InvalidValue("empty request body".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| DotsError::InvalidValue(format!("Invalid body data format: {}", e)))
}

fn upserted(outcome: UpsertOutcome) -> HttpResponse {
    match outcome {
        UpsertOutcome::Created => HttpResponse::Created().finish(),
        UpsertOutcome::Updated => HttpResponse::NoContent().finish(),
    }
}

/// Count the request by resource and response status
fn record(resource: &'static str, result: Result<HttpResponse, DotsError>) -> Result<HttpResponse, DotsError> {
    let status = match &result {
        Ok(response) => response.status(),
        Err(e) => e.status_code(),
    };
    increment_counter!(REQUESTS, "resource" => resource, "outcome" => status.as_u16().to_string());
    result
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

async fn get_config(state: &ApiState, customer: &Customer, session_id: i32) -> Result<HttpResponse, DotsError> {
    let view = state.negotiator.get(customer, session_id).await?;
    Ok(HttpResponse::Ok().json(ConfigurationResponse::new(&view, state.negotiator.envelope())))
}

async fn get_default_config(state: web::Data<ApiState>, customer: Customer) -> Result<HttpResponse, DotsError> {
    record("config", get_config(&state, &customer, 0).await)
}

async fn get_session_config(
    state: web::Data<ApiState>,
    customer: Customer,
    segment: web::Path<String>,
) -> Result<HttpResponse, DotsError> {
    let result = async {
        let session_id = parse_sid(&[segment.as_str()])?;
        get_config(&state, &customer, session_id).await
    }
    .await;
    record("config", result)
}

async fn store_config(state: &ApiState, customer: &Customer, path_sid: i32, body: &[u8]) -> Result<HttpResponse, DotsError> {
    let request: SignalConfigRequest = parse_body(body)?;
    let configuration = request.into_configuration(path_sid)?;
    let outcome = state.negotiator.put(customer, configuration).await?;
    Ok(upserted(outcome))
}

async fn put_config(state: web::Data<ApiState>, customer: Customer, body: web::Bytes) -> Result<HttpResponse, DotsError> {
    record("config", store_config(&state, &customer, 0, &body).await)
}

async fn put_session_config(
    state: web::Data<ApiState>,
    customer: Customer,
    segment: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, DotsError> {
    let result = async {
        let path_sid = parse_sid(&[segment.as_str()])?;
        store_config(&state, &customer, path_sid, &body).await
    }
    .await;
    record("config", result)
}

async fn remove_config(state: &ApiState, customer: &Customer, session_id: i32) -> Result<HttpResponse, DotsError> {
    state.negotiator.delete(customer, session_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn delete_all_configs(state: web::Data<ApiState>, customer: Customer) -> Result<HttpResponse, DotsError> {
    record("config", remove_config(&state, &customer, 0).await)
}

async fn delete_session_config(
    state: web::Data<ApiState>,
    customer: Customer,
    segment: web::Path<String>,
) -> Result<HttpResponse, DotsError> {
    let result = async {
        let session_id = parse_sid(&[segment.as_str()])?;
        remove_config(&state, &customer, session_id).await
    }
    .await;
    record("config", result)
}

async fn put_client(
    state: web::Data<ApiState>,
    customer: Customer,
    cuid: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, DotsError> {
    let result = async {
        let cdid = if body.is_empty() {
            None
        } else {
            parse_body::<DotsClientRequest>(&body)?.into_cdid(&cuid)?
        };
        let outcome = register_client(state.store.as_ref(), &customer, &cuid, cdid, Utc::now()).await?;
        Ok::<_, DotsError>(upserted(outcome))
    }
    .await;
    record("dots-client", result)
}

async fn get_aliases(
    state: web::Data<ApiState>,
    customer: Customer,
    cuid: web::Path<String>,
) -> Result<HttpResponse, DotsError> {
    let now = Utc::now();
    let result = state
        .aliases
        .get_all(&customer, &cuid, now)
        .await
        .map(|aliases| HttpResponse::Ok().json(AliasesDocument::from_aliases(&aliases, now)));
    record("aliases", result)
}

async fn get_alias(
    state: web::Data<ApiState>,
    customer: Customer,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, DotsError> {
    let (cuid, name) = path.into_inner();
    let now = Utc::now();
    let result = state
        .aliases
        .get(&customer, &cuid, &name, now)
        .await
        .map(|alias| HttpResponse::Ok().json(AliasesDocument::from_aliases(&[alias], now)));
    record("aliases", result)
}

async fn put_alias(
    state: web::Data<ApiState>,
    customer: Customer,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> Result<HttpResponse, DotsError> {
    let (cuid, name) = path.into_inner();
    let result = async {
        let document: AliasesDocument = parse_body(&body)?;
        let outcome = state.aliases.put(&customer, &cuid, &name, document, Utc::now()).await?;
        Ok::<_, DotsError>(upserted(outcome))
    }
    .await;
    record("aliases", result)
}

async fn delete_alias(
    state: web::Data<ApiState>,
    customer: Customer,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, DotsError> {
    let (cuid, name) = path.into_inner();
    let result = state
        .aliases
        .delete(&customer, &cuid, &name, Utc::now())
        .await
        .map(|_| HttpResponse::NoContent().finish());
    record("aliases", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::memory::MemoryStore;
    use crate::core::{LocalTransport, ResourceRegistry};
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn state() -> web::Data<ApiState> {
        let registry = Arc::new(ResourceRegistry::new(Arc::new(LocalTransport::new())));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        web::Data::new(ApiState::new(&Config::default(), store, Notifier::new(registry), None).unwrap())
    }

    fn session_config(session_id: i32, heartbeat_interval: i32) -> Value {
        json!({
            "ietf-dots-signal-channel:signal-config": {
                "mitigating-config": {
                    "session-id": session_id,
                    "heartbeat-interval": { "current-value": heartbeat_interval },
                    "missing-hb-allowed": { "current-value": 3 },
                    "max-retransmit": { "current-value": 3 },
                    "ack-timeout": { "current-value": 2 },
                    "ack-random-factor": { "current-value": 0.5 },
                    "trigger-mitigation": true
                }
            }
        })
    }

    fn alias(name: &str, port: u16) -> Value {
        json!({
            "ietf-dots-data-channel:aliases": {
                "alias": [{ "name": name, "target-prefix": ["192.0.2.0/24"], "target-port-range": [{ "lower-port": port }] }]
            }
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(App::new().configure(config)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_missing_customer_is_unauthorized() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::get().uri("/.well-known/dots/config").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "not-a-number"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_session_config_lifecycle() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::put()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(session_config(5, 30))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri("/.well-known/dots/config/sid=5")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let signal_config = &body["ietf-dots-signal-channel:signal-config"];
        let mitigating = &signal_config["mitigating-config"];
        assert_eq!(signal_config["session-id"], 5);
        assert_eq!(mitigating["heartbeat-interval"]["current-value"], 30);
        assert_eq!(mitigating["heartbeat-interval"]["min-value"], 15);
        assert_eq!(mitigating["missing-hb-allowed"]["current-value"], 3);
        assert_eq!(mitigating["max-retransmit"]["current-value"], 3);
        assert_eq!(mitigating["ack-timeout"]["current-value"], 2);
        assert_eq!(mitigating["ack-random-factor"]["current-value"], 0.5);
        assert_eq!(mitigating["trigger-mitigation"], true);

        let req = test::TestRequest::delete()
            .uri("/.well-known/dots/config/sid=5")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri("/.well-known/dots/config/sid=5")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_session_config_errors() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::put()
            .uri("/.well-known/dots/config/sid=5")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(session_config(5, 1000))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error-tag"], "bad-attribute");

        let req = test::TestRequest::put()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_payload("{not json")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error-tag"], "invalid-value");

        let req = test::TestRequest::get()
            .uri("/.well-known/dots/config/sid=x")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_malformed_segment_deletes_nothing() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let req = test::TestRequest::put()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(session_config(5, 30))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::delete()
            .uri("/.well-known/dots/config/foo")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error-tag"], "invalid-value");

        let req = test::TestRequest::get()
            .uri("/.well-known/dots/config/sid=5")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_ack_random_factor_is_not_rounded_into_range() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let mut body = session_config(5, 30);
        body["ietf-dots-signal-channel:signal-config"]["mitigating-config"]["ack-random-factor"]["current-value"] =
            json!(4.004);

        let req = test::TestRequest::put()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error-tag"], "bad-attribute");
    }

    #[::core::prelude::v1::test]
    fn test_invalid_alias_lifetime_is_rejected_at_startup() {
        let mut config = Config::default();
        config.alias.lifetime_minutes = 0;
        let registry = Arc::new(ResourceRegistry::new(Arc::new(LocalTransport::new())));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        assert!(matches!(
            ApiState::new(&config, store, Notifier::new(registry), None),
            Err(SettingsError::AliasLifetime(0))
        ));
    }

    #[actix_web::test]
    async fn test_default_config() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::get()
            .uri("/.well-known/dots/config")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let signal_config = &body["ietf-dots-signal-channel:signal-config"];
        assert!(signal_config.get("session-id").is_none());
        assert_eq!(signal_config["mitigating-config"]["heartbeat-interval"]["current-value"], 30);
        assert_eq!(signal_config["mitigating-config"]["trigger-mitigation"], true);
    }

    #[actix_web::test]
    async fn test_alias_lifecycle() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::put()
            .uri("/data/dots-client/cuid123")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::put()
            .uri("/data/dots-client/cuid123/aliases/A1")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(alias("A1", 80))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::put()
            .uri("/data/dots-client/cuid123/aliases/A1")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(alias("A1", 443))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(test::read_body(resp).await.is_empty());

        let req = test::TestRequest::get()
            .uri("/data/dots-client/cuid123/aliases/A1")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let entry = &body["ietf-dots-data-channel:aliases"]["alias"][0];
        assert_eq!(entry["target-port-range"][0]["lower-port"], 443);
        assert!(entry["pending-lifetime"].as_i64().unwrap() > 10000);

        let req = test::TestRequest::delete()
            .uri("/data/dots-client/cuid123/aliases/A1")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri("/data/dots-client/cuid123/aliases/A1")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_alias_of_unregistered_client_is_not_found() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::get()
            .uri("/data/dots-client/nobody/aliases")
            .insert_header((CUSTOMER_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri("/data/dots-client/cuid123")
            .insert_header((CUSTOMER_HEADER, "1"))
            .set_json(json!({ "ietf-dots-data-channel:dots-client": [{ "cuid": "other" }] }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
