// M-Pesa Daraja API client: OAuth token exchange and C2B URL registration

use crate::errors::{PaymentError, Result};
use crate::metrics;
use crate::models::GatewayEnvironment;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
pub const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

/// Upper bound on any single gateway call
pub const MAX_GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const REGISTER_URL_PATH: &str = "/mpesa/c2b/v2/registerurl";
const ALREADY_REGISTERED_CODE: &str = "500.003.1001";

#[derive(Debug, Clone)]
pub struct GatewayEndpoints {
    pub sandbox: String,
    pub production: String,
}

impl Default for GatewayEndpoints {
    fn default() -> Self {
        Self {
            sandbox: SANDBOX_BASE_URL.to_string(),
            production: PRODUCTION_BASE_URL.to_string(),
        }
    }
}

impl GatewayEndpoints {
    pub fn base_url(&self, environment: GatewayEnvironment) -> &str {
        let base = match environment {
            GatewayEnvironment::Sandbox => &self.sandbox,
            GatewayEnvironment::Production => &self.production,
        };
        base.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
}

impl AccessToken {
    pub fn expires_in_secs(&self) -> Option<u64> {
        match self.expires_in.as_ref()? {
            ExpiresIn::Seconds(secs) => Some(*secs),
            ExpiresIn::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterUrlRequest {
    pub short_code: String,
    pub response_type: String,
    #[serde(rename = "ConfirmationURL")]
    pub confirmation_url: String,
    #[serde(rename = "ValidationURL")]
    pub validation_url: String,
}

impl RegisterUrlRequest {
    /// Registration for `short_code` pointing at this service's callbacks.
    pub fn for_callback_base(short_code: &str, callback_base_url: &str) -> Self {
        let base = callback_base_url.trim_end_matches('/');
        Self {
            short_code: short_code.to_string(),
            response_type: "Completed".to_string(),
            confirmation_url: format!("{}/api/v1/payments/c2b/confirmation", base),
            validation_url: format!("{}/api/v1/payments/c2b/validation", base),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterUrlResponse {
    #[serde(default)]
    response_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationOutcome {
    Registered,
    AlreadyRegistered,
}

pub struct DarajaClient {
    endpoints: GatewayEndpoints,
    http_client: Client,
}

impl DarajaClient {
    pub fn new(endpoints: GatewayEndpoints, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout.min(MAX_GATEWAY_TIMEOUT))
            .build()
            .map_err(|e| PaymentError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoints,
            http_client,
        })
    }

    pub fn endpoints(&self) -> &GatewayEndpoints {
        &self.endpoints
    }

    /// Exchange consumer credentials for a short-lived bearer token.
    pub async fn generate_token(
        &self,
        environment: GatewayEnvironment,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<AccessToken> {
        let url = format!("{}{}", self.endpoints.base_url(environment), TOKEN_PATH);
        let credentials = STANDARD.encode(format!("{}:{}", consumer_key, consumer_secret));

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Basic {}", credentials))
            .send()
            .await
            .map_err(|e| {
                metrics::record_gateway_call("token", "unavailable");
                PaymentError::GatewayUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            metrics::record_gateway_call("token", "error");
            warn!(status = status.as_u16(), environment = environment.as_str(), "Token request rejected");
            return Err(PaymentError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        let token: AccessToken = response.json().await.map_err(|e| {
            metrics::record_gateway_call("token", "error");
            PaymentError::Gateway {
                status: status.as_u16(),
                body: format!("unreadable token response: {}", e),
            }
        })?;

        if token.access_token.is_empty() {
            metrics::record_gateway_call("token", "error");
            return Err(PaymentError::Gateway {
                status: status.as_u16(),
                body: "empty access_token".to_string(),
            });
        }

        metrics::record_gateway_call("token", "ok");
        debug!(
            environment = environment.as_str(),
            expires_in = ?token.expires_in_secs(),
            "Obtained gateway access token"
        );
        Ok(token)
    }

    /// Register confirmation and validation URLs for a short code.
    pub async fn register_urls(
        &self,
        environment: GatewayEnvironment,
        access_token: &str,
        request: &RegisterUrlRequest,
    ) -> Result<RegistrationOutcome> {
        let url = format!("{}{}", self.endpoints.base_url(environment), REGISTER_URL_PATH);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                metrics::record_gateway_call("register_url", "unavailable");
                PaymentError::GatewayUnavailable(e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if is_already_registered(&body) {
                metrics::record_gateway_call("register_url", "already_registered");
                info!(short_code = %request.short_code, "URLs already registered with gateway");
                return Ok(RegistrationOutcome::AlreadyRegistered);
            }

            metrics::record_gateway_call("register_url", "error");
            warn!(
                short_code = %request.short_code,
                status = status.as_u16(),
                "URL registration rejected"
            );
            return Err(PaymentError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        let description = serde_json::from_str::<RegisterUrlResponse>(&body)
            .ok()
            .and_then(|r| r.response_description)
            .unwrap_or_default();

        metrics::record_gateway_call("register_url", "ok");
        info!(
            short_code = %request.short_code,
            environment = environment.as_str(),
            description = %description,
            "✅ C2B URLs registered"
        );

        Ok(RegistrationOutcome::Registered)
    }
}

fn is_already_registered(body: &str) -> bool {
    body.contains(ALREADY_REGISTERED_CODE) || body.to_lowercase().contains("already registered")
}
