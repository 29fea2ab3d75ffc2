use crate::data_structs::user::{User, UserUpdate};
use crate::errors::AuthError;
use crate::session_store::SessionStore;
use crate::stripe_util::BillingProvider;

const RECONCILE_BATCH: u32 = 50;
/// Users younger than this may still have their create hook in flight.
const RECONCILE_GRACE_SECS: i64 = 10 * 60;
/// A user whose provisioning failed is skipped for this long.
const RECONCILE_RETRY_SECS: i64 = 60 * 60;

pub fn customer_idempotency_key(user_id: &str) -> String {
    format!("create-customer-{}", user_id)
}

/// Runs once, right after the user row is first inserted.
///
/// Creates the billing customer and stores its id on the user. Failures are
/// returned to the caller; users left without a customer id are picked up by
/// [`reconcile_billing_customers`].
pub async fn on_create_user(store: &dyn SessionStore, billing: &dyn BillingProvider, user: &User) -> Result<User, AuthError> {
    if user.stripe_customer_id.is_some() {
        return Ok(user.clone());
    }

    let customer_id = billing.create_customer(
        &customer_idempotency_key(&user.id),
        user.email.as_deref(),
        user.name.as_deref(),
    ).await?;

    let update = UserUpdate {
        stripe_customer_id: Some(customer_id),
        ..Default::default()
    };
    store.update_user(&user.id, &update).await
}

/// Provisions billing customers for users whose create hook did not finish.
/// Returns how many users were repaired.
pub async fn reconcile_billing_customers(store: &dyn SessionStore, billing: &dyn BillingProvider, now: i64) -> Result<usize, AuthError> {
    let pending = store.users_missing_billing_customer(
        now - RECONCILE_GRACE_SECS,
        now - RECONCILE_RETRY_SECS,
        RECONCILE_BATCH,
    ).await?;
    let mut repaired = 0;

    for user in &pending {
        match on_create_user(store, billing, user).await {
            Ok(_) => repaired += 1,
            Err(err) => {
                log::warn!("could not provision billing customer for user {}: {}", user.id, err);
                store.record_billing_failure(&user.id, now).await?;
            }
        }
    }

    Ok(repaired)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::session_store::memory::MemoryStore;

    /// Records every call and hands out sequential ids.
    #[derive(Default)]
    pub struct CountingBilling {
        pub calls: Mutex<Vec<(Option<String>, Option<String>)>>,
        pub keys: Mutex<Vec<String>>,
        pub fail: bool,
        /// emails the provider refuses
        pub rejected_email: Option<String>,
    }

    #[async_trait]
    impl BillingProvider for CountingBilling {
        async fn create_customer(&self, idempotency_key: &str, email: Option<&str>, name: Option<&str>) -> Result<String, AuthError> {
            self.keys.lock().unwrap().push(idempotency_key.to_string());
            let mut calls = self.calls.lock().unwrap();
            calls.push((email.map(str::to_string), name.map(str::to_string)));
            if self.fail || (email.is_some() && email == self.rejected_email.as_deref()) {
                return Err(AuthError::Billing(stripe::StripeError::ClientError("billing offline".to_string())));
            }
            Ok(format!("cus_{}", calls.len()))
        }
    }

    fn new_user(id: &str, email: Option<&str>, name: Option<&str>) -> User {
        User {
            id: id.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            image: None,
            username: None,
            email_verified: None,
            stripe_customer_id: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn creates_customer_and_stores_its_id() {
        let store = MemoryStore::default();
        let billing = CountingBilling::default();
        let user = new_user("u1", Some("a@x.com"), Some("A"));
        store.insert(user.clone());

        let updated = on_create_user(&store, &billing, &user).await.unwrap();

        assert_eq!(
            *billing.calls.lock().unwrap(),
            vec![(Some("a@x.com".to_string()), Some("A".to_string()))]
        );
        assert_eq!(updated.stripe_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(store.user("u1").unwrap().stripe_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(*billing.keys.lock().unwrap(), vec!["create-customer-u1".to_string()]);
    }

    #[tokio::test]
    async fn absent_profile_fields_are_passed_as_none() {
        let store = MemoryStore::default();
        let billing = CountingBilling::default();
        let user = new_user("u1", None, None);
        store.insert(user.clone());

        on_create_user(&store, &billing, &user).await.unwrap();

        assert_eq!(*billing.calls.lock().unwrap(), vec![(None, None)]);
    }

    #[tokio::test]
    async fn billing_failure_leaves_user_without_customer() {
        let store = MemoryStore::default();
        let billing = CountingBilling { fail: true, ..Default::default() };
        let user = new_user("u1", Some("a@x.com"), Some("A"));
        store.insert(user.clone());

        assert!(on_create_user(&store, &billing, &user).await.is_err());
        assert!(store.user("u1").unwrap().stripe_customer_id.is_none());
        assert!(store.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_only_touches_users_without_customer() {
        let store = MemoryStore::default();
        let billing = CountingBilling::default();
        store.insert(new_user("u1", Some("a@x.com"), Some("A")));
        let mut provisioned = new_user("u2", Some("b@x.com"), Some("B"));
        provisioned.stripe_customer_id = Some("cus_existing".to_string());
        store.insert(provisioned);
        let mut fresh = new_user("u3", Some("c@x.com"), Some("C"));
        fresh.created_at = 10_000;
        store.insert(fresh);

        let now = 10_060;
        assert_eq!(reconcile_billing_customers(&store, &billing, now).await.unwrap(), 1);
        assert_eq!(billing.calls.lock().unwrap().len(), 1);
        assert_eq!(store.user("u2").unwrap().stripe_customer_id.as_deref(), Some("cus_existing"));

        assert_eq!(reconcile_billing_customers(&store, &billing, now).await.unwrap(), 0);
        assert_eq!(billing.calls.lock().unwrap().len(), 1);
        assert!(store.user("u3").unwrap().stripe_customer_id.is_none());
    }

    #[tokio::test]
    async fn failing_users_do_not_block_later_ones() {
        let store = MemoryStore::default();
        let billing = CountingBilling { rejected_email: Some("bad".to_string()), ..Default::default() };
        for i in 0..RECONCILE_BATCH {
            let mut user = new_user(&format!("bad-{:02}", i), Some("bad"), None);
            user.created_at = i as i64;
            store.insert(user);
        }
        let mut good = new_user("z-good", Some("good@x.com"), None);
        good.created_at = 1_000;
        store.insert(good);

        let now = 10_000;
        assert_eq!(reconcile_billing_customers(&store, &billing, now).await.unwrap(), 0);
        assert_eq!(reconcile_billing_customers(&store, &billing, now + 60).await.unwrap(), 1);
        assert!(store.user("z-good").unwrap().stripe_customer_id.is_some());
        assert_eq!(billing.calls.lock().unwrap().len(), RECONCILE_BATCH as usize + 1);

        // failed users come back once the retry window has passed
        let later = now + RECONCILE_RETRY_SECS + 1;
        assert_eq!(reconcile_billing_customers(&store, &billing, later).await.unwrap(), 0);
        assert_eq!(billing.calls.lock().unwrap().len(), 2 * RECONCILE_BATCH as usize + 1);
    }
}
