//! The OSB v2.13 HTTP surface: routing, header validation, the error
//! envelope, and the request/response shapes each endpoint speaks. Shared
//! state is `broker_core::{ConfigStore, Provisioner, OperationManager}`
//! behind a single `web::Data<AppState<S>>`.

use std::fmt;

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use serde::Deserialize;
use serde_json::{json, Value};

use broker_core::config::Config;
use broker_core::error::{Error, ErrorKind};
use broker_core::operation::OperationKind;
use broker_core::provisioner::Readiness;
use broker_core::registry::{Entry, EntryKind};
use broker_core::resource_store::ResourceStore;
use broker_core::{ConfigStore, OperationManager, Provisioner};

/// Minimum `X-Broker-Api-Version` this broker speaks.
const MIN_BROKER_API_VERSION: f64 = 2.13;

/// Shared application state behind `web::Data`. Holding `Provisioner<S>`
/// directly (rather than behind a further `Arc`) is fine since `Provisioner`
/// is itself a cheap `Arc`-backed clone (broker_core::registry's pattern).
pub struct AppState<S: ResourceStore> {
    pub config_store: ConfigStore,
    pub provisioner: Provisioner<S>,
    pub operations: OperationManager,
    pub namespace: String,
    pub token: String,
}

impl<S: ResourceStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            config_store: self.config_store.clone(),
            provisioner: self.provisioner.clone(),
            operations: self.operations.clone(),
            namespace: self.namespace.clone(),
            token: self.token.clone(),
        }
    }
}

/// Wraps `broker_core::Error` so this crate can implement the foreign
/// `ResponseError` trait on it (orphan rules forbid doing so on the bare
/// `broker_core::Error` from here). Carries `instance_usable` separately
/// since that flag depends on which OSB operation failed, not on the error
/// itself.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    instance_usable: Option<bool>,
}

impl ApiError {
    pub fn update_failed(error: Error) -> Self {
        ApiError { error, instance_usable: Some(true) }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError { error, instance_usable: None }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        match self.error.kind().osb_token() {
            Some(token) => {
                let mut body = json!({"error": token, "description": self.error.to_string()});
                if let Some(usable) = self.instance_usable {
                    body["instance_usable"] = json!(usable);
                }
                HttpResponse::build(self.status_code()).json(body)
            }
            // Unauthorized / Unsupported carry no JSON body.
            None => HttpResponse::build(self.status_code()).finish(),
        }
    }
}

/// Authorization, `X-Broker-Api-Version`, and `Content-Type` checks, run
/// before any handler touches application state.
fn validate_request<S: ResourceStore>(req: &HttpRequest, state: &AppState<S>) -> Result<(), ApiError> {
    let auth_ok = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", state.token))
        .unwrap_or(false);
    if !auth_ok {
        return Err(Error::from(ErrorKind::Unauthorized).into());
    }

    let version: Option<f64> = req.headers().get("X-Broker-Api-Version").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok());
    match version {
        None => return Err(Error::from(ErrorKind::QueryError("missing or unparseable X-Broker-Api-Version header".into())).into()),
        Some(v) if v < MIN_BROKER_API_VERSION => {
            return Err(Error::from(ErrorKind::Unsupported(format!("requires X-Broker-Api-Version >= {}", MIN_BROKER_API_VERSION))).into())
        }
        Some(_) => {}
    }

    let content_length: u64 = req.headers().get(header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok()).unwrap_or(0);
    if content_length > 0 {
        let ct_ok = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if !ct_ok {
            return Err(Error::from(ErrorKind::ParameterError("Content-Type must be application/json".into())).into());
        }
    }

    Ok(())
}

/// `503` with no body if the active configuration is unusable. In practice
/// `ConfigStore::load` refuses to start on an invalid configuration and a
/// rejected `update` leaves the prior one active, so this is a
/// belt-and-braces check, not the common path.
fn require_config<S: ResourceStore>(state: &AppState<S>) -> Result<Config, HttpResponse> {
    let config = state.config_store.snapshot();
    if config.services.is_empty() {
        return Err(HttpResponse::ServiceUnavailable().finish());
    }
    Ok(config)
}

fn accepts_incomplete(flag: &Option<String>) -> bool {
    flag.as_deref() == Some("true")
}

fn validate_against_schema(schema: Option<&Value>, parameters: &Value) -> Result<(), ApiError> {
    let Some(schema) = schema else { return Ok(()) };
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| ApiError::from(Error::from(ErrorKind::ConfigurationError(format!("invalid parameter schema: {}", e)))))?;
    if let Err(errors) = compiled.validate(parameters) {
        let msg = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(Error::from(ErrorKind::ValidationError(msg)).into());
    }
    Ok(())
}

#[derive(Deserialize)]
struct AsyncQuery {
    accepts_incomplete: Option<String>,
}

#[derive(Deserialize)]
struct ProvisionRequest {
    service_id: String,
    plan_id: String,
    #[serde(default)]
    context: Value,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct UpdateRequest {
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct BindRequest {
    service_id: String,
    plan_id: String,
    #[serde(default)]
    parameters: Value,
}

async fn readyz<S: ResourceStore>(state: web::Data<AppState<S>>) -> HttpResponse {
    let condition = state.config_store.condition();
    if condition.valid {
        HttpResponse::Ok().json(json!({"status": "ok"}))
    } else {
        HttpResponse::ServiceUnavailable().json(json!({"status": condition.reason}))
    }
}

async fn catalog<S: ResourceStore>(req: HttpRequest, state: web::Data<AppState<S>>) -> Result<HttpResponse, ApiError> {
    let config = match require_config(&state) {
        Ok(c) => c,
        Err(resp) => return Ok(resp),
    };
    validate_request(&req, &state)?;
    Ok(HttpResponse::Ok().json(broker_core::catalog::render(&config)))
}

fn instance_status_body(entry: &Entry) -> (String, Value) {
    let status = entry.get_string("operation-status").ok().flatten().unwrap_or_else(|| "in_progress".into());
    let mut body = json!({});
    if let Some(url) = entry.get("dashboard-url") {
        body["dashboard_url"] = url.clone();
    }
    (status, body)
}

fn render_instance_response(entry: &Entry) -> HttpResponse {
    let (status, body) = instance_status_body(entry);
    if status == "succeeded" {
        HttpResponse::Ok().json(body)
    } else if status.starts_with("failed") {
        HttpResponse::UnprocessableEntity().json(json!({"error": "ProvisionError", "description": status}))
    } else {
        HttpResponse::Accepted().json(body)
    }
}

async fn put_service_instance<S: ResourceStore>(
    path: web::Path<String>,
    query: web::Query<AsyncQuery>,
    body: web::Json<ProvisionRequest>,
    req: HttpRequest,
    state: web::Data<AppState<S>>,
) -> Result<HttpResponse, ApiError> {
    let config = match require_config(&state) {
        Ok(c) => c,
        Err(resp) => return Ok(resp),
    };
    validate_request(&req, &state)?;
    if !accepts_incomplete(&query.accepts_incomplete) {
        return Err(Error::from(ErrorKind::AsyncRequired).into());
    }
    let instance_id = path.into_inner();

    let mut entry = state.provisioner.registry().open(EntryKind::ServiceInstance, &instance_id).await?;
    if entry.exists() {
        let same = entry.get("service-id") == Some(&json!(body.service_id))
            && entry.get("plan-id") == Some(&json!(body.plan_id))
            && entry.get("parameters") == Some(&body.parameters);
        if !same {
            return Err(Error::from(ErrorKind::ResourceConflict(format!("instance {} already exists with different attributes", instance_id))).into());
        }
        return Ok(render_instance_response(&entry));
    }

    let (service, plan) = config.resolve(&body.service_id, &body.plan_id)?;
    let create_schema = plan.schemas.as_ref().and_then(|s| s.service_instance.as_ref()).and_then(|si| si.create.as_ref()).map(|ps| &ps.parameters);
    validate_against_schema(create_schema, &body.parameters)?;
    let _ = service; // resolved only to reach its schema/plan through `config`

    let key = format!("instance:{}", instance_id);
    let lease = state.operations.acquire(&key).await?;

    let binding = state
        .provisioner
        .prepare_instance(&config, &mut entry, &body.service_id, &body.plan_id, &state.namespace, &body.context, &body.parameters)
        .await?;
    entry.set("operation", json!(OperationKind::Provision.as_str()))?;
    entry.set("operation-status", json!("in_progress"))?;
    state.provisioner.registry().commit(&mut entry).await?;

    let provisioner = state.provisioner.clone();
    let (operation, _rx) = state.operations.dispatch(lease, OperationKind::Provision, move |_lease| async move {
        provisioner.provision(&config, &binding, entry).await.map(|_| ())
    });

    Ok(HttpResponse::Accepted().json(json!({"operation": operation.id})))
}

async fn get_service_instance<S: ResourceStore>(path: web::Path<String>, req: HttpRequest, state: web::Data<AppState<S>>) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = require_config(&state) {
        return Ok(resp);
    }
    validate_request(&req, &state)?;
    let entry = state.provisioner.registry().open(EntryKind::ServiceInstance, &path).await?;
    if !entry.exists() {
        return Ok(HttpResponse::NotFound().finish());
    }
    let mut body = json!({
        "service_id": entry.get_string("service-id")?.unwrap_or_default(),
        "plan_id": entry.get_string("plan-id")?.unwrap_or_default(),
        "parameters": entry.get("parameters").cloned().unwrap_or(Value::Null),
    });
    if let Some(url) = entry.get("dashboard-url") {
        body["dashboard_url"] = url.clone();
    }
    Ok(HttpResponse::Ok().json(body))
}

async fn patch_service_instance<S: ResourceStore>(
    path: web::Path<String>,
    query: web::Query<AsyncQuery>,
    body: web::Json<UpdateRequest>,
    req: HttpRequest,
    state: web::Data<AppState<S>>,
) -> Result<HttpResponse, ApiError> {
    let config = match require_config(&state) {
        Ok(c) => c,
        Err(resp) => return Ok(resp),
    };
    validate_request(&req, &state)?;
    if !accepts_incomplete(&query.accepts_incomplete) {
        return Err(Error::from(ErrorKind::AsyncRequired).into());
    }
    let instance_id = path.into_inner();

    let mut entry = state.provisioner.registry().open(EntryKind::ServiceInstance, &instance_id).await?;
    if !entry.exists() {
        return Err(Error::from(ErrorKind::ResourceNotFound(instance_id)).into());
    }

    let service_id = entry.get_string("service-id")?.unwrap_or_default();
    let current_plan_id = entry.get_string("plan-id")?.unwrap_or_default();
    let target_plan_id = body.plan_id.clone().unwrap_or_else(|| current_plan_id.clone());
    let (service, plan) = config.resolve(&service_id, &target_plan_id)?;
    if target_plan_id != current_plan_id && !service.plan_updatable_for(plan) {
        return Err(ApiError::update_failed(Error::from(ErrorKind::ValidationError(format!(
            "plan '{}' does not permit changing plans",
            current_plan_id
        )))));
    }
    let update_schema = plan.schemas.as_ref().and_then(|s| s.service_instance.as_ref()).and_then(|si| si.update.as_ref()).map(|ps| &ps.parameters);
    validate_against_schema(update_schema, &body.parameters).map_err(|e| ApiError::update_failed(e.error))?;
    let binding_cfg = config.binding_for(service, plan)?.clone();

    entry.set("parameters", body.parameters.clone())?;
    entry.set("operation", json!(OperationKind::Update.as_str()))?;
    entry.set("operation-status", json!("in_progress"))?;
    state.provisioner.registry().commit(&mut entry).await?;

    let key = format!("instance:{}", instance_id);
    let lease = state.operations.acquire(&key).await.map_err(ApiError::update_failed)?;
    let provisioner = state.provisioner.clone();
    let new_plan_id = body.plan_id.clone();
    let (operation, _rx) = state.operations.dispatch(lease, OperationKind::Update, move |_lease| async move {
        provisioner.update(&config, &binding_cfg, new_plan_id.as_deref(), entry).await.map(|_| ())
    });

    Ok(HttpResponse::Accepted().json(json!({"operation": operation.id})))
}

async fn delete_service_instance<S: ResourceStore>(
    path: web::Path<String>,
    query: web::Query<AsyncQuery>,
    req: HttpRequest,
    state: web::Data<AppState<S>>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = require_config(&state) {
        return Ok(resp);
    }
    validate_request(&req, &state)?;
    if !accepts_incomplete(&query.accepts_incomplete) {
        return Err(Error::from(ErrorKind::AsyncRequired).into());
    }
    let instance_id = path.into_inner();
    let entry = state.provisioner.registry().open(EntryKind::ServiceInstance, &instance_id).await?;
    if !entry.exists() {
        return Ok(HttpResponse::Gone().json(json!({})));
    }

    let key = format!("instance:{}", instance_id);
    let lease = state.operations.acquire(&key).await?;
    let provisioner = state.provisioner.clone();
    let (operation, _rx) = state.operations.dispatch(lease, OperationKind::Deprovision, move |_lease| async move { provisioner.delete(entry).await });

    Ok(HttpResponse::Accepted().json(json!({"operation": operation.id})))
}

fn render_last_operation(entry: &Entry) -> HttpResponse {
    let status = entry.get_string("operation-status").ok().flatten().unwrap_or_else(|| "in_progress".into());
    if status == "succeeded" {
        HttpResponse::Ok().json(json!({"state": "succeeded"}))
    } else if let Some(reason) = status.strip_prefix("failed: ") {
        HttpResponse::Ok().json(json!({"state": "failed", "description": reason}))
    } else {
        HttpResponse::Ok().json(json!({"state": "in progress"}))
    }
}

/// Re-run a still-in-progress provision's readiness checks against the live
/// resource store and freeze the result once ready. Called from the polling
/// endpoint itself rather than from the background provision task, so a
/// resource that becomes ready long after provisioning kicked off is still
/// observed - readiness has no hard deadline.
async fn refresh_provision_readiness<S: ResourceStore>(config: &Config, provisioner: &Provisioner<S>, entry: &mut Entry) -> Result<(), Error> {
    if entry.get_string("operation").ok().flatten().as_deref() != Some(OperationKind::Provision.as_str()) {
        return Ok(());
    }
    if entry.get_string("operation-status").ok().flatten().as_deref() != Some("in_progress") {
        return Ok(());
    }
    let service_id = entry.get_string("service-id")?.unwrap_or_default();
    let plan_id = entry.get_string("plan-id")?.unwrap_or_default();
    let (service, plan) = config.resolve(&service_id, &plan_id)?;
    let binding = config.binding_for(service, plan)?;
    if let Readiness::Ready = provisioner.check_readiness(&binding.instance.checks, entry).await? {
        entry.set("operation-status", json!("succeeded"))?;
        provisioner.registry().commit(entry).await?;
    }
    Ok(())
}

async fn get_instance_last_operation<S: ResourceStore>(path: web::Path<String>, req: HttpRequest, state: web::Data<AppState<S>>) -> Result<HttpResponse, ApiError> {
    let config = match require_config(&state) {
        Ok(c) => c,
        Err(resp) => return Ok(resp),
    };
    validate_request(&req, &state)?;
    let mut entry = state.provisioner.registry().open(EntryKind::ServiceInstance, &path).await?;
    if !entry.exists() {
        return Ok(HttpResponse::NotFound().finish());
    }
    refresh_provision_readiness(&config, &state.provisioner, &mut entry).await?;
    Ok(render_last_operation(&entry))
}

fn render_binding_response(entry: &Entry) -> HttpResponse {
    let status = entry.get_string("operation-status").ok().flatten().unwrap_or_else(|| "in_progress".into());
    if status == "succeeded" {
        HttpResponse::Ok().json(json!({"credentials": entry.get("credentials").cloned().unwrap_or(json!({}))}))
    } else if status.starts_with("failed") {
        HttpResponse::UnprocessableEntity().json(json!({"error": "BindError", "description": status}))
    } else {
        HttpResponse::Accepted().json(json!({}))
    }
}

async fn put_service_binding<S: ResourceStore>(
    path: web::Path<(String, String)>,
    query: web::Query<AsyncQuery>,
    body: web::Json<BindRequest>,
    req: HttpRequest,
    state: web::Data<AppState<S>>,
) -> Result<HttpResponse, ApiError> {
    let config = match require_config(&state) {
        Ok(c) => c,
        Err(resp) => return Ok(resp),
    };
    validate_request(&req, &state)?;
    if !accepts_incomplete(&query.accepts_incomplete) {
        return Err(Error::from(ErrorKind::AsyncRequired).into());
    }
    let (instance_id, binding_id) = path.into_inner();

    let instance_entry = state.provisioner.registry().open(EntryKind::ServiceInstance, &instance_id).await?;
    if !instance_entry.exists() {
        return Err(Error::from(ErrorKind::ResourceNotFound(instance_id.clone())).into());
    }

    let mut entry = state.provisioner.registry().open(EntryKind::ServiceBinding, &binding_id).await?;
    if entry.exists() {
        let same = entry.get("service-id") == Some(&json!(body.service_id))
            && entry.get("plan-id") == Some(&json!(body.plan_id))
            && entry.get("parameters") == Some(&body.parameters);
        if !same {
            return Err(Error::from(ErrorKind::ResourceConflict(format!("binding {} already exists with different attributes", binding_id))).into());
        }
        return Ok(render_binding_response(&entry));
    }

    let (_service, plan) = config.resolve(&body.service_id, &body.plan_id)?;
    let create_schema = plan.schemas.as_ref().and_then(|s| s.service_binding.as_ref()).and_then(|sb| sb.create.as_ref()).map(|ps| &ps.parameters);
    validate_against_schema(create_schema, &body.parameters)?;

    let key = format!("binding:{}", binding_id);
    let lease = state.operations.acquire(&key).await?;

    let binding_list = state
        .provisioner
        .prepare_binding(&config, &mut entry, &instance_id, &body.service_id, &body.plan_id, &state.namespace, &body.parameters)
        .await?;
    entry.set("operation", json!(OperationKind::Bind.as_str()))?;
    entry.set("operation-status", json!("in_progress"))?;
    state.provisioner.registry().commit(&mut entry).await?;

    let provisioner = state.provisioner.clone();
    let (operation, _rx) = state.operations.dispatch(lease, OperationKind::Bind, move |_lease| async move {
        provisioner.bind(&config, &binding_list, entry).await.map(|_| ())
    });

    Ok(HttpResponse::Accepted().json(json!({"operation": operation.id})))
}

async fn get_service_binding<S: ResourceStore>(path: web::Path<(String, String)>, req: HttpRequest, state: web::Data<AppState<S>>) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = require_config(&state) {
        return Ok(resp);
    }
    validate_request(&req, &state)?;
    let (_instance_id, binding_id) = path.into_inner();
    let entry = state.provisioner.registry().open(EntryKind::ServiceBinding, &binding_id).await?;
    if !entry.exists() {
        return Ok(HttpResponse::NotFound().finish());
    }
    Ok(HttpResponse::Ok().json(json!({"credentials": entry.get("credentials").cloned().unwrap_or(json!({}))})))
}

async fn delete_service_binding<S: ResourceStore>(
    path: web::Path<(String, String)>,
    query: web::Query<AsyncQuery>,
    req: HttpRequest,
    state: web::Data<AppState<S>>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = require_config(&state) {
        return Ok(resp);
    }
    validate_request(&req, &state)?;
    if !accepts_incomplete(&query.accepts_incomplete) {
        return Err(Error::from(ErrorKind::AsyncRequired).into());
    }
    let (_instance_id, binding_id) = path.into_inner();
    let entry = state.provisioner.registry().open(EntryKind::ServiceBinding, &binding_id).await?;
    if !entry.exists() {
        return Ok(HttpResponse::Gone().json(json!({})));
    }

    let key = format!("binding:{}", binding_id);
    let lease = state.operations.acquire(&key).await?;
    let provisioner = state.provisioner.clone();
    let (operation, _rx) = state.operations.dispatch(lease, OperationKind::Unbind, move |_lease| async move { provisioner.delete(entry).await });

    Ok(HttpResponse::Accepted().json(json!({"operation": operation.id})))
}

async fn get_binding_last_operation<S: ResourceStore>(path: web::Path<(String, String)>, req: HttpRequest, state: web::Data<AppState<S>>) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = require_config(&state) {
        return Ok(resp);
    }
    validate_request(&req, &state)?;
    let (_instance_id, binding_id) = path.into_inner();
    let entry = state.provisioner.registry().open(EntryKind::ServiceBinding, &binding_id).await?;
    if !entry.exists() {
        return Ok(HttpResponse::NotFound().finish());
    }
    Ok(render_last_operation(&entry))
}

/// Registers every OSB route against a concrete
/// `ResourceStore` implementation. Kept free of `App`'s own (verbose,
/// generic-over-the-service-factory) type so callers can `.configure()` it
/// without naming that type themselves.
pub fn configure_routes<S: ResourceStore>(cfg: &mut web::ServiceConfig) {
    cfg.route("/readyz", web::get().to(readyz::<S>))
        .route("/v2/catalog", web::get().to(catalog::<S>))
        .route("/v2/service_instances/{instance_id}", web::put().to(put_service_instance::<S>))
        .route("/v2/service_instances/{instance_id}", web::get().to(get_service_instance::<S>))
        .route("/v2/service_instances/{instance_id}", web::patch().to(patch_service_instance::<S>))
        .route("/v2/service_instances/{instance_id}", web::delete().to(delete_service_instance::<S>))
        .route("/v2/service_instances/{instance_id}/last_operation", web::get().to(get_instance_last_operation::<S>))
        .route("/v2/service_instances/{instance_id}/service_bindings/{binding_id}", web::put().to(put_service_binding::<S>))
        .route("/v2/service_instances/{instance_id}/service_bindings/{binding_id}", web::get().to(get_service_binding::<S>))
        .route("/v2/service_instances/{instance_id}/service_bindings/{binding_id}", web::delete().to(delete_service_binding::<S>))
        .route("/v2/service_instances/{instance_id}/service_bindings/{binding_id}/last_operation", web::get().to(get_binding_last_operation::<S>));
}

/// A PEM-encoded TLS key pair, read off disk by the startup glue and handed to `run` rather than re-reading the files itself.
pub struct Certificate {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// The server's only CLI-adjacent surface: `{ Namespace, Token, Certificate
/// }`. Everything upstream of this (flag parsing, reading the token/cert
/// files, looking up the namespace environment variable) is startup glue
/// living in `main.rs`, out of this crate's scope.
pub struct ServerConfig {
    pub namespace: String,
    pub token: String,
    pub certificate: Certificate,
}

fn rustls_server_config(certificate: &Certificate) -> std::io::Result<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut &certificate.cert_pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("invalid TLS certificate: {}", e)))?;
    let key = rustls_pemfile::private_key(&mut &certificate.key_pem[..])
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("invalid TLS private key: {}", e)))?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found in BROKER_TLS_KEY_FILE"))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("invalid TLS key pair: {}", e)))
}

/// Blocking entry point: serves `:8443` with TLS until a fatal error.
/// `config_store`/`provisioner` are constructed by the caller (so `main.rs`
/// can load the declarative configuration file and decide the resource
/// store implementation) and handed in already wired up.
pub async fn run<S: ResourceStore>(cfg: ServerConfig, config_store: ConfigStore, provisioner: Provisioner<S>) -> std::io::Result<()> {
    let tls_config = rustls_server_config(&cfg.certificate)?;
    let state = AppState { config_store, provisioner, operations: OperationManager::new(), namespace: cfg.namespace, token: cfg.token };

    info!("starting OSB broker on 0.0.0.0:8443");
    actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure_routes::<S>)
    })
    .bind_rustls_0_23(("0.0.0.0", 8443), tls_config)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use broker_core::resource_store::test_support::InMemoryStore;
    use broker_core::{Config, ConfigBinding, Plan, ServiceOffering, Template, TemplateList};
    use std::collections::BTreeMap;

    fn test_config() -> Config {
        let mut templates = BTreeMap::new();
        templates.insert("t".to_string(), Template { resource: json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "x"}}), parameters: vec![], singleton: false });
        Config {
            services: vec![ServiceOffering {
                id: "svc-1".into(),
                name: "svc".into(),
                description: "d".into(),
                bindable: false,
                tags: vec![],
                dashboard_client: None,
                plan_updatable: false,
                plans: vec![Plan {
                    id: "plan-1".into(),
                    name: "plan".into(),
                    description: "d".into(),
                    bindable: None,
                    schemas: None,
                    maintenance_info: None,
                    plan_updatable: None,
                    metadata: Value::Null,
                }],
                metadata: Value::Null,
            }],
            templates,
            bindings: vec![ConfigBinding {
                service_name: "svc".into(),
                plan_name: "plan".into(),
                instance: TemplateList { registry_values: vec![], templates: vec!["t".into()], checks: vec![] },
                binding: None,
            }],
        }
    }

    fn test_state() -> AppState<InMemoryStore> {
        AppState {
            config_store: ConfigStore::load(test_config()).unwrap(),
            provisioner: Provisioner::new(InMemoryStore::default()),
            operations: OperationManager::new(),
            namespace: "ns".into(),
            token: "s3cr3t".into(),
        }
    }

    #[actix_web::test]
    async fn readyz_reports_ok_without_auth() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::get().uri("/readyz").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn catalog_without_bearer_token_is_unauthorized() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::get().uri("/v2/catalog").insert_header(("X-Broker-Api-Version", "2.14")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn catalog_missing_version_header_is_bad_request() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::get().uri("/v2/catalog").insert_header(("Authorization", "Bearer s3cr3t")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn catalog_stale_version_is_precondition_failed() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::get()
            .uri("/v2/catalog")
            .insert_header(("Authorization", "Bearer s3cr3t"))
            .insert_header(("X-Broker-Api-Version", "2.1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[actix_web::test]
    async fn catalog_with_valid_headers_returns_rendered_services() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::get()
            .uri("/v2/catalog")
            .insert_header(("Authorization", "Bearer s3cr3t"))
            .insert_header(("X-Broker-Api-Version", "2.14"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["services"][0]["id"], json!("svc-1"));
    }

    #[actix_web::test]
    async fn provision_without_accepts_incomplete_is_async_required() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::put()
            .uri("/v2/service_instances/inst-1")
            .insert_header(("Authorization", "Bearer s3cr3t"))
            .insert_header(("X-Broker-Api-Version", "2.14"))
            .insert_header(("Content-Type", "application/json"))
            .set_json(json!({"service_id": "svc-1", "plan_id": "plan-1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn provision_then_poll_reaches_succeeded() {
        let app = test::init_service(App::new().app_data(web::Data::new(test_state())).configure(configure_routes::<InMemoryStore>)).await;
        let req = test::TestRequest::put()
            .uri("/v2/service_instances/inst-1?accepts_incomplete=true")
            .insert_header(("Authorization", "Bearer s3cr3t"))
            .insert_header(("X-Broker-Api-Version", "2.14"))
            .insert_header(("Content-Type", "application/json"))
            .set_json(json!({"service_id": "svc-1", "plan_id": "plan-1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let req = test::TestRequest::get()
            .uri("/v2/service_instances/inst-1/last_operation")
            .insert_header(("Authorization", "Bearer s3cr3t"))
            .insert_header(("X-Broker-Api-Version", "2.14"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], json!("succeeded"));
    }
}
