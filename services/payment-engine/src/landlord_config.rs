// Landlord gateway configuration: encrypted credential storage and C2B URL
// registration with the Daraja API

use crate::daraja_client::{DarajaClient, RegisterUrlRequest, RegistrationOutcome};
use crate::errors::{PaymentError, Result};
use crate::models::{
    GatewayEnvironment, PaymentConfigUpsert, PaymentConfigView, SavePaymentConfigRequest,
    ShortCodeType,
};
use crate::store::LedgerStore;
use security::CredentialVault;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};
use validator::Validate;

#[derive(Debug, Clone, Serialize)]
pub struct SaveConfigResponse {
    pub config: PaymentConfigView,
    pub registration: RegistrationOutcome,
}

pub struct LandlordConfigManager {
    store: Arc<dyn LedgerStore>,
    vault: Arc<CredentialVault>,
    gateway: Arc<DarajaClient>,
    deadline: Duration,
}

impl LandlordConfigManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        vault: Arc<CredentialVault>,
        gateway: Arc<DarajaClient>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            vault,
            gateway,
            deadline,
        }
    }

    /// Validate, encrypt and upsert the landlord's credentials, then register
    /// callback URLs with the gateway.
    pub async fn save_config(
        &self,
        landlord_id: i64,
        request: SavePaymentConfigRequest,
        callback_base_url: &str,
    ) -> Result<SaveConfigResponse> {
        request.validate()?;
        let short_code_type: ShortCodeType = request.short_code_type.trim().parse()?;
        let environment: GatewayEnvironment = request.environment.trim().parse()?;

        let encrypted_key = self.vault.encrypt(request.consumer_key.trim())?;
        let encrypted_secret = self.vault.encrypt(request.consumer_secret.trim())?;

        let saved = self
            .store
            .upsert_payment_config(PaymentConfigUpsert {
                landlord_id,
                short_code: request.short_code.clone(),
                short_code_type,
                encrypted_key,
                encrypted_secret,
                environment,
                validation_enabled: request.validation_enabled,
            })
            .await?;

        info!(
            landlord_id,
            short_code = %saved.short_code,
            short_code_type = %saved.short_code_type,
            environment = %saved.environment,
            "Payment configuration saved"
        );

        let registration = self.register_urls(landlord_id, callback_base_url).await?;

        Ok(SaveConfigResponse {
            config: PaymentConfigView::from(&saved),
            registration,
        })
    }

    /// Register the landlord's confirmation and validation URLs. The token
    /// exchange and the registration call share one deadline.
    pub async fn register_urls(&self, landlord_id: i64, callback_base_url: &str) -> Result<RegistrationOutcome> {
        if callback_base_url.trim().is_empty() {
            return Err(PaymentError::Validation(
                "callback base URL is not configured".to_string(),
            ));
        }

        timeout(self.deadline, self.register_with_gateway(landlord_id, callback_base_url))
            .await
            .map_err(|_| {
                error!(landlord_id, "URL registration exceeded {:?}", self.deadline);
                PaymentError::Timeout(format!("URL registration exceeded {:?}", self.deadline))
            })?
    }

    async fn register_with_gateway(&self, landlord_id: i64, callback_base_url: &str) -> Result<RegistrationOutcome> {
        let config = self
            .store
            .get_payment_config(landlord_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Payment configuration".to_string()))?;

        let environment: GatewayEnvironment = config.environment.parse()?;

        let consumer_key = self.decrypt_credential(landlord_id, &config.consumer_key)?;
        let consumer_secret = self.decrypt_credential(landlord_id, &config.consumer_secret)?;

        let token = self
            .gateway
            .generate_token(environment, &consumer_key, &consumer_secret)
            .await?;

        let request = RegisterUrlRequest::for_callback_base(&config.short_code, callback_base_url);
        let outcome = self
            .gateway
            .register_urls(environment, &token.access_token, &request)
            .await?;

        info!(
            landlord_id,
            short_code = %config.short_code,
            environment = environment.as_str(),
            outcome = ?outcome,
            "C2B registration complete"
        );

        Ok(outcome)
    }

    fn decrypt_credential(&self, landlord_id: i64, blob: &str) -> Result<String> {
        self.vault.decrypt(blob).map_err(|e| {
            error!(landlord_id, error = %e, "Stored credential failed to decrypt; landlord must re-save");
            PaymentError::from(e)
        })
    }

    /// Stored configuration without credentials.
    pub async fn get_config(&self, landlord_id: i64) -> Result<PaymentConfigView> {
        self.store
            .get_payment_config(landlord_id)
            .await?
            .map(|config| PaymentConfigView::from(&config))
            .ok_or_else(|| PaymentError::NotFound("Payment configuration".to_string()))
    }
}
