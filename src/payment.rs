//! Payment provider boundary.
//!
//! The engine talks to the external payment provider through the
//! [`PaymentProvider`] trait: one call to open an order for a booking's
//! total. Callback verification does not go back to the provider; the
//! provider signs `"{order_ref}|{payment_ref}"` with the shared key secret
//! and the engine recomputes that HMAC locally.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

/// Error from the external payment provider.
///
/// `Rejected` is terminal for the order; `Unreachable` is transient and the
/// caller may retry the whole reservation.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider rejected the order: {0}")]
    Rejected(String),

    #[error("provider unreachable: {0}")]
    Unreachable(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// An order opened with the provider, correlating a booking to its payment
/// session.
#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub order_ref: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Abstraction over the external payment provider.
pub trait PaymentProvider: Send + Sync {
    /// Open an order for `amount_minor` in the smallest currency unit.
    /// An I/O boundary; the engine never holds a lock across the call.
    fn open_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Pin<Box<dyn Future<Output = ProviderResult<ProviderOrder>> + Send>>;
}

/// HMAC-SHA256 of `data` under `key`.
fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    const BLOCK: usize = 64;

    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner_pad = [0u8; BLOCK];
    let mut outer_pad = [0u8; BLOCK];
    for i in 0..BLOCK {
        inner_pad[i] = key_block[i] ^ 0x36;
        outer_pad[i] = key_block[i] ^ 0x5c;
    }

    let mut hasher = Sha256::new();
    hasher.update(inner_pad);
    hasher.update(data);
    let inner = hasher.finalize();

    let mut hasher = Sha256::new();
    hasher.update(outer_pad);
    hasher.update(inner);
    hasher.finalize().into()
}

/// Signature the provider attaches to a payment callback.
pub fn payment_signature(key_secret: &str, order_ref: &str, payment_ref: &str) -> String {
    let payload = format!("{order_ref}|{payment_ref}");
    hex::encode(hmac_sha256(key_secret.as_bytes(), payload.as_bytes()))
}

/// Constant-time check of a callback signature.
pub fn verify_signature(
    key_secret: &str,
    order_ref: &str,
    payment_ref: &str,
    signature: &str,
) -> bool {
    let expected = payment_signature(key_secret, order_ref, payment_ref);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// In-process provider for development and tests.
///
/// Hands out sequential order references and signs callbacks with the same
/// key secret the engine verifies with, so tests can forge valid callbacks
/// via [`MockProvider::signature_for`].
pub struct MockProvider {
    key_secret: String,
    fail_orders: bool,
    next_order: AtomicU64,
}

impl MockProvider {
    pub fn new(key_secret: impl Into<String>) -> Self {
        Self {
            key_secret: key_secret.into(),
            fail_orders: false,
            next_order: AtomicU64::new(1),
        }
    }

    /// A provider whose `open_order` always fails, for exercising the
    /// rollback path.
    pub fn failing(key_secret: impl Into<String>) -> Self {
        Self {
            fail_orders: true,
            ..Self::new(key_secret)
        }
    }

    pub fn shared(key_secret: impl Into<String>) -> Arc<dyn PaymentProvider> {
        Arc::new(Self::new(key_secret))
    }

    /// The signature a real provider would attach to a successful payment.
    pub fn signature_for(&self, order_ref: &str, payment_ref: &str) -> String {
        payment_signature(&self.key_secret, order_ref, payment_ref)
    }
}

impl PaymentProvider for MockProvider {
    fn open_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Pin<Box<dyn Future<Output = ProviderResult<ProviderOrder>> + Send>> {
        if self.fail_orders {
            let receipt = receipt.to_string();
            return Box::pin(async move {
                Err(ProviderError::Unreachable(format!(
                    "mock provider down (receipt {receipt})"
                )))
            });
        }

        let order_ref = format!("order_{:08}", self.next_order.fetch_add(1, Ordering::Relaxed));
        let currency = currency.to_string();

        info!(
            order = %order_ref,
            amount_minor,
            currency = %currency,
            receipt,
            "mock provider order opened"
        );

        Box::pin(async move {
            Ok(ProviderOrder {
                order_ref,
                amount_minor,
                currency,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let sig = payment_signature("secret", "order_1", "pay_1");
        assert!(verify_signature("secret", "order_1", "pay_1", &sig));
    }

    #[test]
    fn tampered_signature_rejected() {
        let sig = payment_signature("secret", "order_1", "pay_1");
        assert!(!verify_signature("secret", "order_1", "pay_2", &sig));
        assert!(!verify_signature("other_secret", "order_1", "pay_1", &sig));
        assert!(!verify_signature("secret", "order_1", "pay_1", "deadbeef"));
    }

    #[test]
    fn signature_is_hex_of_fixed_length() {
        let sig = payment_signature("secret", "order_1", "pay_1");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn long_keys_are_hashed_down() {
        let long_key = "k".repeat(100);
        let sig = payment_signature(&long_key, "order_1", "pay_1");
        assert!(verify_signature(&long_key, "order_1", "pay_1", &sig));
    }

    #[tokio::test]
    async fn mock_provider_hands_out_unique_orders() {
        let provider = MockProvider::new("secret");
        let a = provider.open_order(1000, "INR", "receipt_1").await.unwrap();
        let b = provider.open_order(2000, "INR", "receipt_2").await.unwrap();
        assert_ne!(a.order_ref, b.order_ref);
        assert_eq!(a.amount_minor, 1000);
        assert_eq!(a.currency, "INR");
    }

    #[tokio::test]
    async fn failing_provider_rejects_orders() {
        let provider = MockProvider::failing("secret");
        let result = provider.open_order(1000, "INR", "receipt_1").await;
        assert!(matches!(result, Err(ProviderError::Unreachable(_))));
    }

    #[test]
    fn mock_signature_matches_verifier() {
        let provider = MockProvider::new("secret");
        let sig = provider.signature_for("order_00000001", "pay_42");
        assert!(verify_signature("secret", "order_00000001", "pay_42", &sig));
    }
}
