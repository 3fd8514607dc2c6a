use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Confirmation handed back by the payment gateway after checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub amount: i64,
}

#[cfg(test)]
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow::anyhow!("Bad payment secret: {}", err))?;
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks the gateway signature and that the captured amount matches the
/// course price.
pub fn verify(secret: &str, confirmation: &PaymentConfirmation, price: i64) -> Result<(), Error> {
    if secret.is_empty() {
        return Err(Error::InternalError {
            kind: "ConfigError",
            message: "Payment secret is not configured".to_string(),
        });
    }
    if confirmation.order_id.is_empty() || confirmation.payment_id.is_empty() {
        return Err(Error::invalid("`order_id` and `payment_id` are required"));
    }
    let signature = hex::decode(&confirmation.signature).map_err(|_| Error::PaymentRejected {
        message: "Signature is not valid hex".to_string(),
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|err| {
        Error::InternalError {
            kind: "ConfigError",
            message: err.to_string(),
        }
    })?;
    mac.update(format!("{}|{}", confirmation.order_id, confirmation.payment_id).as_bytes());
    mac.verify_slice(&signature).map_err(|_| Error::PaymentRejected {
        message: format!(
            "Signature mismatch for payment `{}`",
            confirmation.payment_id
        ),
    })?;

    if confirmation.amount != price {
        return Err(Error::invalid(format!(
            "Paid amount {} does not match course price {}",
            confirmation.amount, price
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn confirmation(signature: String, amount: i64) -> PaymentConfirmation {
        PaymentConfirmation {
            order_id: "order_9A33XWu170gUtm".to_string(),
            payment_id: "pay_29QQoUBi66xm2f".to_string(),
            signature,
            amount,
        }
    }

    #[test]
    fn accepts_gateway_signature() {
        let sig = sign(SECRET, "order_9A33XWu170gUtm", "pay_29QQoUBi66xm2f").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify(SECRET, &confirmation(sig, 49_900), 49_900).is_ok());
    }

    #[test]
    fn rejects_tampered_signature() {
        let sig = sign("other-secret", "order_9A33XWu170gUtm", "pay_29QQoUBi66xm2f").unwrap();
        let err = verify(SECRET, &confirmation(sig, 49_900), 49_900).unwrap_err();
        assert!(matches!(err, Error::PaymentRejected { .. }));

        let err = verify(SECRET, &confirmation("zz".to_string(), 49_900), 49_900).unwrap_err();
        assert!(matches!(err, Error::PaymentRejected { .. }));
    }

    #[test]
    fn rejects_wrong_amount() {
        let sig = sign(SECRET, "order_9A33XWu170gUtm", "pay_29QQoUBi66xm2f").unwrap();
        let err = verify(SECRET, &confirmation(sig, 100), 49_900).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
    }

    #[test]
    fn unconfigured_secret_is_internal() {
        let err = verify("", &confirmation(String::new(), 0), 0).unwrap_err();
        assert!(matches!(err, Error::InternalError { .. }));
    }
}
