//! Credential-translation core for an API mediation gateway.
//!
//! Fronts legacy mainframe backends that cannot consume the gateway's own
//! tokens: an inbound JWT or client certificate is translated into whatever
//! each backend demands, per its registration metadata.
//!
//! # Features
//!
//! - **Scheme registry**: pluggable per-scheme translations (PassTicket
//!   `Basic` headers, provider session cookies, certificate identity
//!   headers, bypass), resolved from service metadata
//! - **Command cache**: translations are built once per
//!   `(service, scheme, applid)` and rebuilt on expiry
//! - **Version-aware provider facade**: speaks the right z/OSMF protocol
//!   level, modern or legacy, cached per version
//! - **Distributed invalidation**: revocations are shared across gateway
//!   instances and pushed to the provider when it issued the token

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod invalidation;
pub mod scheme;
pub mod service_auth;
pub mod source;
pub mod zosmf;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
