use crate::errors::PaymentError;
use crate::landlord_config::LandlordConfigManager;
use crate::metrics;
use crate::models::{
    AssignPaymentRequest, CashPaymentRequest, ListPaymentsQuery, SavePaymentConfigRequest,
};
use crate::reconciliation::ReconciliationEngine;
use crate::security_middleware::{JwtAuth, LandlordIdentity};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;

/// Shared handler state, built once in `main`
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub config_manager: Arc<LandlordConfigManager>,
    /// Public base URL the gateway calls back on; falls back to the request host
    pub callback_base_url: Option<String>,
}

impl AppState {
    fn callback_base_url(&self, req: &HttpRequest) -> String {
        match self.callback_base_url.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => base.trim_end_matches('/').to_string(),
            _ => format!("https://{}", req.connection_info().host()),
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "payment-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// C2B validation callback
pub async fn c2b_validation(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    HttpResponse::Ok().json(state.engine.handle_validation(&body))
}

/// C2B confirmation callback; always answers 200 with ResultCode 0
pub async fn c2b_confirmation(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let ack = state.engine.handle_confirmation(&body).await;
    HttpResponse::Ok().json(ack)
}

/// Save gateway credentials and register callback URLs
pub async fn save_payment_config(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
    req: HttpRequest,
    request: web::Json<SavePaymentConfigRequest>,
) -> Result<HttpResponse, PaymentError> {
    let base_url = state.callback_base_url(&req);
    let response = state
        .config_manager
        .save_config(identity.landlord_id, request.into_inner(), &base_url)
        .await?;

    Ok(HttpResponse::Ok().json(response))
}

/// Read the landlord's gateway configuration
pub async fn get_payment_config(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
) -> Result<HttpResponse, PaymentError> {
    let config = state.config_manager.get_config(identity.landlord_id).await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Re-run C2B URL registration
pub async fn register_payment_urls(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
    req: HttpRequest,
) -> Result<HttpResponse, PaymentError> {
    let base_url = state.callback_base_url(&req);
    let outcome = state
        .config_manager
        .register_urls(identity.landlord_id, &base_url)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "registration": outcome })))
}

/// List the landlord's payment ledger, newest first
pub async fn list_payments(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
    query: web::Query<ListPaymentsQuery>,
) -> Result<HttpResponse, PaymentError> {
    let payments = state
        .engine
        .list_payments(identity.landlord_id, &query)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "count": payments.len(),
        "payments": payments
    })))
}

/// Record a cash payment against a tenant
pub async fn record_cash_payment(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
    request: web::Json<CashPaymentRequest>,
) -> Result<HttpResponse, PaymentError> {
    let payment = state
        .engine
        .record_cash_payment(identity.landlord_id, request.into_inner())
        .await?;

    Ok(HttpResponse::Created().json(payment))
}

/// Assign a pending payment to a tenant
pub async fn assign_payment(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
    payment_id: web::Path<i64>,
    request: web::Json<AssignPaymentRequest>,
) -> Result<HttpResponse, PaymentError> {
    let payment = state
        .engine
        .assign_payment(identity.landlord_id, payment_id.into_inner(), request.tenant_id)
        .await?;

    Ok(HttpResponse::Ok().json(payment))
}

/// A tenant's payment history
pub async fn tenant_history(
    state: web::Data<AppState>,
    identity: LandlordIdentity,
    tenant_id: web::Path<i64>,
) -> Result<HttpResponse, PaymentError> {
    let tenant_id = tenant_id.into_inner();
    let payments = state
        .engine
        .tenant_history(identity.landlord_id, tenant_id)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "tenant_id": tenant_id,
        "payments": payments
    })))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, jwt_secret: &str) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        PaymentError::Validation(err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        PaymentError::Validation(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        PaymentError::Validation(err.to_string()).into()
    }))
    // Gateway callbacks are unauthenticated and must be matched before the
    // JWT-protected scope
    .service(
        web::scope("/api/v1/payments/c2b")
            .route("/validation", web::post().to(c2b_validation))
            .route("/confirmation", web::post().to(c2b_confirmation)),
    )
    .service(
        web::scope("/api/v1")
            .wrap(JwtAuth::new(jwt_secret.to_string()))
            .route("/config/mpesa", web::post().to(save_payment_config))
            .route("/config/mpesa", web::get().to(get_payment_config))
            .route("/config/mpesa/register", web::post().to(register_payment_urls))
            .route("/payments", web::get().to(list_payments))
            .route("/payments/cash", web::post().to(record_cash_payment))
            .route("/payments/{id}/assign", web::patch().to(assign_payment))
            .route("/tenants/{tenant_id}/history", web::get().to(tenant_history)),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
