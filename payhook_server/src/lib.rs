//! # Payhook server
//! This module hosts the HTTP boundary of payhook. It is responsible for:
//! Listening for incoming webhook requests from the payment providers.
//! Verifying each request against the raw body bytes before any parsing happens.
//! Normalizing provider payloads and handing them to the reconciliation engine.
//! Draining the side-effect outbox via a background dispatch worker.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhook/stripe`: Stripe subscription lifecycle webhooks (POST, `stripe-signature` header).
//! * `/webhook/psifi`: PsiFi payment webhooks delivered through Svix (POST, `svix-*` headers).
//! * `/callback/paygate365`: PayGate365 payment callbacks (GET, HMAC nonce query parameter).

pub mod config;
pub mod data_objects;
pub mod dispatch_worker;
pub mod errors;
pub mod helpers;
pub mod providers;
pub mod routes;
pub mod server;

#[cfg(test)]
mod test;
