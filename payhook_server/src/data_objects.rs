//! Response body shapes for the webhook routes.

use serde::{Deserialize, Serialize};

/// Acknowledgment body for the Stripe webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

impl StripeAck {
    pub fn received() -> Self {
        Self { received: true, duplicate: None }
    }

    pub fn duplicate() -> Self {
        Self { received: true, duplicate: Some(true) }
    }
}

/// Acknowledgment body for the PsiFi webhook. `action` tells the provider's dashboard what we did with the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsiFiAck {
    pub received: bool,
    pub action: String,
}

impl PsiFiAck {
    pub fn action<S: Into<String>>(action: S) -> Self {
        Self { received: true, action: action.into() }
    }
}

/// Acknowledgment body for the PayGate365 callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
    pub message: String,
}

impl CallbackAck {
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self { message: message.into() }
    }
}
