//! Tradera API Client
//!
//! An async client for the Tradera v3 SOAP services (Search, Public, Listing,
//! Restricted, Order and Buyer) with optional middleware around every call.
//! Callers supply complete SOAP envelopes; the client routes them to the right
//! endpoint and applies the middleware.
//!
//! # Features
//!
//! - **Rate limiting**: token bucket shared by all services, cancellable waits
//! - **Retry**: exponential backoff with jitter for transient failures only
//! - **Caching**: in-memory TTL cache with a background sweeper
//! - **Cancellation**: every suspension point honours a `CancellationToken`
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use tokio_util::sync::CancellationToken;
//! use tradera_client::{Config, TraderaClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?
//!         .with_rate_limit(5.0)
//!         .with_retry(3, Duration::from_secs(1))
//!         .with_cache(Duration::from_secs(300));
//!     let client = TraderaClient::new(config)?;
//!
//!     let cancel = CancellationToken::new();
//!     // Envelopes, including the authentication headers, are built by the caller.
//!     let envelope = std::fs::read_to_string("get_official_time.xml")?;
//!     let response = client.public().send(&cancel, "GetOfficalTime", envelope).await?;
//!     println!("{response}");
//!
//!     client.close()?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod middleware;

pub use client::{
    Dispatcher, HttpTransport, Service, ServiceClient, SoapRequest, TraderaClient, Transport,
};
pub use config::Config;
pub use error::{Cancelled, ClientError, ClientResult, is_retryable};
pub use middleware::{Cache, RateLimiter, RetryError, RetryPolicy, Retryer};
