use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::{from_minor_units, PaymentError, ORDER_ID_METADATA_KEY};
use crate::errors::ServiceError;
use crate::services::order_state::PaymentOutcome;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("webhook secret is not a usable key")]
    InvalidSecret,
    #[error("signature header is missing")]
    MissingHeader,
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature timestamp is outside the tolerance window")]
    TimestampOutOfTolerance,
    #[error("no signature matched the payload")]
    Mismatch,
}

impl From<SignatureError> for ServiceError {
    fn from(err: SignatureError) -> Self {
        ServiceError::SignatureVerification(err.to_string())
    }
}

/// Verifies `t=<unix>,v1=<hex>` signatures over `"{t}." + raw body`
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("configured", &self.secret.is_some())
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn verify(&self, header: Option<&str>, payload: &[u8]) -> Result<(), SignatureError> {
        self.verify_at(header, payload, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        header: Option<&str>,
        payload: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let secret = self.secret.as_deref().ok_or(SignatureError::MissingSecret)?;
        let header = header.ok_or(SignatureError::MissingHeader)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| SignatureError::MalformedHeader)?,
                    )
                }
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(SignatureError::MalformedHeader);
        }

        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(SignatureError::TimestampOutOfTolerance);
        }

        let mac = signing_mac(secret, timestamp, payload)?;
        let matched = signatures
            .iter()
            .filter_map(|sig| hex::decode(sig).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

fn signing_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex signature a sender would put in the `v1` slot
pub fn compute_signature(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, SignatureError> {
    let mac = signing_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    amount_refunded: i64,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    refunds: Option<RefundList>,
}

#[derive(Debug, Deserialize)]
struct RefundList {
    #[serde(default)]
    data: Vec<RefundObject>,
}

#[derive(Debug, Deserialize)]
struct RefundObject {
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// What an inbound event means for an order
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Succeeded {
        order_id: Option<Uuid>,
        payment_intent_id: String,
    },
    Processing {
        order_id: Option<Uuid>,
        payment_intent_id: String,
    },
    Failed {
        order_id: Option<Uuid>,
        payment_intent_id: String,
        message: String,
    },
    Refunded {
        order_id: Option<Uuid>,
        payment_intent_id: Option<String>,
        refund_id: String,
        amount: Decimal,
    },
    Ignored {
        event_type: String,
    },
}

impl PaymentEvent {
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            PaymentEvent::Succeeded { order_id, .. }
            | PaymentEvent::Processing { order_id, .. }
            | PaymentEvent::Failed { order_id, .. }
            | PaymentEvent::Refunded { order_id, .. } => *order_id,
            PaymentEvent::Ignored { .. } => None,
        }
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        match self {
            PaymentEvent::Succeeded {
                payment_intent_id, ..
            }
            | PaymentEvent::Processing {
                payment_intent_id, ..
            }
            | PaymentEvent::Failed {
                payment_intent_id, ..
            } => Some(payment_intent_id),
            PaymentEvent::Refunded {
                payment_intent_id, ..
            } => payment_intent_id.as_deref(),
            PaymentEvent::Ignored { .. } => None,
        }
    }

    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match self {
            PaymentEvent::Succeeded {
                payment_intent_id, ..
            } => Some(PaymentOutcome::Succeeded {
                payment_intent_id: payment_intent_id.clone(),
            }),
            PaymentEvent::Processing {
                payment_intent_id, ..
            } => Some(PaymentOutcome::Processing {
                payment_intent_id: payment_intent_id.clone(),
            }),
            PaymentEvent::Failed {
                payment_intent_id,
                message,
                ..
            } => Some(PaymentOutcome::Failed {
                payment_intent_id: payment_intent_id.clone(),
                message: Some(message.clone()),
            }),
            PaymentEvent::Refunded {
                refund_id, amount, ..
            } => Some(PaymentOutcome::Refunded {
                refund_id: refund_id.clone(),
                amount: *amount,
            }),
            PaymentEvent::Ignored { .. } => None,
        }
    }
}

fn order_id_from(metadata: &HashMap<String, String>) -> Option<Uuid> {
    metadata
        .get(ORDER_ID_METADATA_KEY)
        .and_then(|id| Uuid::parse_str(id).ok())
}

impl WebhookEvent {
    pub fn classify(&self) -> PaymentEvent {
        let classified = match self.event_type.as_str() {
            "payment_intent.succeeded" => self.intent().map(|pi| PaymentEvent::Succeeded {
                order_id: order_id_from(&pi.metadata),
                payment_intent_id: pi.id,
            }),
            "payment_intent.processing" => self.intent().map(|pi| PaymentEvent::Processing {
                order_id: order_id_from(&pi.metadata),
                payment_intent_id: pi.id,
            }),
            "payment_intent.payment_failed" => self.intent().map(|pi| PaymentEvent::Failed {
                order_id: order_id_from(&pi.metadata),
                message: pi
                    .last_payment_error
                    .and_then(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Payment failed".to_string()),
                payment_intent_id: pi.id,
            }),
            "charge.refunded" => serde_json::from_value::<ChargeObject>(self.data.object.clone())
                .map(|charge| {
                    let refund_id = charge
                        .refunds
                        .and_then(|r| r.data.into_iter().next())
                        .map(|r| r.id)
                        .unwrap_or_else(|| charge.id.clone());
                    PaymentEvent::Refunded {
                        order_id: order_id_from(&charge.metadata),
                        payment_intent_id: charge.payment_intent,
                        refund_id,
                        amount: from_minor_units(charge.amount_refunded),
                    }
                }),
            "refund.created" => serde_json::from_value::<RefundObject>(self.data.object.clone())
                .map(|refund| PaymentEvent::Refunded {
                    order_id: order_id_from(&refund.metadata),
                    payment_intent_id: refund.payment_intent,
                    refund_id: refund.id,
                    amount: from_minor_units(refund.amount),
                }),
            other => {
                return PaymentEvent::Ignored {
                    event_type: other.to_string(),
                }
            }
        };

        classified.unwrap_or_else(|err| {
            warn!(event_id = %self.id, event_type = %self.event_type, error = %err, "malformed event object");
            PaymentEvent::Ignored {
                event_type: self.event_type.clone(),
            }
        })
    }

    fn intent(&self) -> Result<IntentObject, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}
