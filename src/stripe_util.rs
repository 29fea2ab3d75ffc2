use async_trait::async_trait;
use stripe::{Client, CreateCustomer, Customer, RequestStrategy};

use crate::errors::AuthError;

/// Creates customer records with the external payment provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Returns the provider's identifier for the new customer. Repeated calls
    /// with the same `idempotency_key` resolve to the same customer.
    async fn create_customer(&self, idempotency_key: &str, email: Option<&str>, name: Option<&str>) -> Result<String, AuthError>;
}

#[derive(Clone)]
pub struct StripeHandler {
    stripe_client: Client,
}

impl StripeHandler {

    pub fn new(stripe_secret_key: &str) -> StripeHandler {
        return StripeHandler {
            stripe_client: Client::new(stripe_secret_key.to_owned()),
        }
    }
}

#[async_trait]
impl BillingProvider for StripeHandler {

    async fn create_customer(&self, idempotency_key: &str, email: Option<&str>, name: Option<&str>) -> Result<String, AuthError> {
        let client = self.stripe_client.clone()
            .with_strategy(RequestStrategy::Idempotent(idempotency_key.to_string()));
        let customer = Customer::create(
            &client,
            CreateCustomer {
                email,
                name,
                ..Default::default()
            },
        )
            .await?;

        log::info!("created stripe customer {}", customer.id);
        Ok(customer.id.to_string())
    }
}
