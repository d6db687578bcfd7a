//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Webhook handlers always follow the same order: check that the provider's secret is configured, verify against the
//! RAW body bytes, and only then parse and hand the normalized event to the [`ReconcilerApi`]. Once verification has
//! passed, the handlers prefer 200 responses: unknown orders, duplicates and below-threshold payments are all
//! acknowledged with a marker so that the provider does not keep re-delivering an event we have already decided on.
//! Persistence failures are the exception: they return 500 on purpose, so that the provider's retry machinery
//! re-delivers an authentic event once the database is reachable again.

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use log::*;
use payhook_engine::{events::PaymentEventResult, traits::ReconcilerDatabase, ReconcilerApi};

use crate::{
    config::ServerConfig,
    data_objects::{CallbackAck, PsiFiAck, StripeAck},
    errors::ServerError,
    providers::{paygate, psifi, stripe, VerifyError},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

//----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Stripe  ----------------------------------------------------
route!(stripe_webhook => Post "/webhook/stripe" impl ReconcilerDatabase);
/// Route handler for Stripe subscription lifecycle webhooks.
pub async fn stripe_webhook<B: ReconcilerDatabase>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<ReconcilerApi<B>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    let secret = config
        .providers
        .stripe_webhook_secret
        .as_ref()
        .ok_or_else(|| ServerError::ConfigurationError("PHK_STRIPE_WEBHOOK_SECRET is not set".into()))?;
    let sig_header = req
        .headers()
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(VerifyError::MissingHeaders)
        .map_err(|e| {
            warn!("🧾️ Stripe webhook arrived without a signature header");
            e
        })?;
    stripe::verify_signature(&body, sig_header, secret.reveal(), Utc::now()).map_err(|e| {
        warn!("🧾️ Stripe webhook signature verification failed. {e}");
        e
    })?;
    let event = stripe::parse_event(&body).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    let Some(event) = event else {
        return Ok(HttpResponse::Ok().json(StripeAck::received()));
    };
    let result = api
        .process_subscription_event(event)
        .await
        .map_err(|e| ServerError::BackendError(format!("Could not apply subscription event. {e}")))?;
    use payhook_engine::events::SubscriptionEventResult::*;
    let ack = match result {
        Duplicate => StripeAck::duplicate(),
        Applied { .. } | SubscriptionNotFound => StripeAck::received(),
    };
    Ok(HttpResponse::Ok().json(ack))
}

//----------------------------------------------   PsiFi  ----------------------------------------------------
route!(psifi_webhook => Post "/webhook/psifi" impl ReconcilerDatabase);
/// Route handler for PsiFi (Svix-delivered) payment webhooks.
pub async fn psifi_webhook<B: ReconcilerDatabase>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<ReconcilerApi<B>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    let secret = config
        .providers
        .psifi_webhook_secret
        .as_ref()
        .ok_or_else(|| ServerError::ConfigurationError("PHK_PSIFI_WEBHOOK_SECRET is not set".into()))?;
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let (msg_id, timestamp, signatures) = match (header("svix-id"), header("svix-timestamp"), header("svix-signature"))
    {
        (Some(id), Some(ts), Some(sig)) => (id, ts, sig),
        _ => {
            warn!("💰️ PsiFi webhook arrived without the svix headers");
            return Err(VerifyError::MissingHeaders.into());
        },
    };
    psifi::verify_signature(&body, &msg_id, &timestamp, &signatures, secret.reveal(), Utc::now()).map_err(|e| {
        warn!("💰️ PsiFi webhook signature verification failed. {e}");
        e
    })?;
    let event = psifi::parse_event(&body).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    let Some(event) = event else {
        return Ok(HttpResponse::Ok().json(PsiFiAck::action("skipped_no_order_id")));
    };
    let result = api
        .process_payment_event(event)
        .await
        .map_err(|e| ServerError::BackendError(format!("Could not apply payment event. {e}")))?;
    let ack = match result {
        PaymentEventResult::MarkedPaid(_) => PsiFiAck::action("processed"),
        PaymentEventResult::AlreadyPaid => PsiFiAck::action("already_paid"),
        PaymentEventResult::OrderNotFound => PsiFiAck::action("order_not_found"),
        PaymentEventResult::BelowThreshold { .. } => PsiFiAck::action("below_threshold"),
        PaymentEventResult::MarkedFailed { status } => PsiFiAck::action(format!("status_{status}")),
        PaymentEventResult::StatusUpdated { status } => PsiFiAck::action(format!("status_{status}")),
    };
    Ok(HttpResponse::Ok().json(ack))
}

//----------------------------------------------  PayGate365  ----------------------------------------------------
route!(paygate_callback => Get "/callback/paygate365" impl ReconcilerDatabase);
/// Route handler for PayGate365 GET callbacks.
pub async fn paygate_callback<B: ReconcilerDatabase>(
    query: web::Query<paygate::CallbackParams>,
    api: web::Data<ReconcilerApi<B>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    let secret = config
        .providers
        .paygate_nonce_secret
        .as_ref()
        .ok_or_else(|| ServerError::ConfigurationError("PHK_PAYGATE365_NONCE_SECRET is not set".into()))?;
    let params = query.into_inner();
    paygate::verify_nonce(&params.order_id, &params.nonce, secret.reveal()).map_err(|e| {
        warn!("💰️ Nonce mismatch for order {}", params.order_id);
        e
    })?;
    let event = paygate::normalize(&params);
    let result = api
        .process_payment_event(event)
        .await
        .map_err(|e| ServerError::BackendError(format!("Could not apply payment event. {e}")))?;
    let ack = match result {
        PaymentEventResult::MarkedPaid(_) => CallbackAck::message("Order marked as paid"),
        PaymentEventResult::AlreadyPaid => CallbackAck::message("already_paid"),
        PaymentEventResult::OrderNotFound => CallbackAck::message("order_not_found"),
        PaymentEventResult::BelowThreshold { .. } => CallbackAck::message("below_threshold"),
        PaymentEventResult::MarkedFailed { status } | PaymentEventResult::StatusUpdated { status } => {
            CallbackAck::message(format!("status_{status}"))
        },
    };
    Ok(HttpResponse::Ok().json(ack))
}
