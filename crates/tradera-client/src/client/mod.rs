//! Tradera API client.
//!
//! Provides:
//! - One [`ServiceClient`] per SOAP service, built eagerly
//! - Authentication guard for the user-authorized services
//! - Optional rate limiting, retry with exponential backoff and response caching,
//!   shared by every service through a single [`Dispatcher`]

mod dispatch;
mod service;
mod transport;

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use dispatch::Dispatcher;
pub use service::Service;
pub use transport::{HttpTransport, SoapRequest, Transport, cache_key, parse_fault};

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::middleware::Cache;

/// Tradera API client.
///
/// Cloning is cheap; clones share the middleware and the transport.
#[derive(Clone)]
pub struct TraderaClient {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    search: ServiceClient,
    public: ServiceClient,
    listing: ServiceClient,
    restricted: ServiceClient,
    order: ServiceClient,
    buyer: ServiceClient,
}

impl TraderaClient {
    /// Create a new client with the given configuration.
    ///
    /// Must be called from within a Tokio runtime when caching is enabled.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or HTTP client
    /// initialization fails.
    pub fn new(config: Config) -> ClientResult<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client that sends requests through a custom transport.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let dispatcher = Arc::new(Dispatcher::new(&config)?);
        let responses = dispatcher.cache::<String, String>()?;

        let build = |service: Service| ServiceClient {
            service,
            endpoint: service.endpoint(&config.base_url),
            config: Arc::clone(&config),
            dispatcher: Arc::clone(&dispatcher),
            transport: Arc::clone(&transport),
            responses: responses.clone(),
        };

        let client = Self {
            search: build(Service::Search),
            public: build(Service::Public),
            listing: build(Service::Listing),
            restricted: build(Service::Restricted),
            order: build(Service::Order),
            buyer: build(Service::Buyer),
            config: Arc::clone(&config),
            dispatcher: Arc::clone(&dispatcher),
        };

        tracing::info!(
            app_id = config.app_id,
            user_auth = config.has_user_auth(),
            base_url = %config.base_url,
            "Tradera client created"
        );

        Ok(client)
    }

    /// Item search operations.
    #[must_use]
    pub fn search(&self) -> &ServiceClient {
        &self.search
    }

    /// Public data operations (items, categories, users).
    #[must_use]
    pub fn public(&self) -> &ServiceClient {
        &self.public
    }

    /// Listing operations.
    #[must_use]
    pub fn listing(&self) -> &ServiceClient {
        &self.listing
    }

    /// Seller operations. Requires user authorization.
    #[must_use]
    pub fn restricted(&self) -> &ServiceClient {
        &self.restricted
    }

    /// Order management. Requires user authorization.
    #[must_use]
    pub fn order(&self) -> &ServiceClient {
        &self.order
    }

    /// Buyer operations. Requires user authorization.
    #[must_use]
    pub fn buyer(&self) -> &ServiceClient {
        &self.buyer
    }

    /// Client for the given service.
    #[must_use]
    pub const fn service(&self, service: Service) -> &ServiceClient {
        match service {
            Service::Search => &self.search,
            Service::Public => &self.public,
            Service::Listing => &self.listing,
            Service::Restricted => &self.restricted,
            Service::Order => &self.order,
            Service::Buyer => &self.buyer,
        }
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The middleware shared by every service.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop background work (cache sweepers).
    ///
    /// In-flight and later calls still run; cached responses then expire lazily.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyClosed`] on a second call.
    pub fn close(&self) -> ClientResult<()> {
        self.dispatcher.close()?;
        tracing::debug!("Tradera client closed");
        Ok(())
    }
}

impl std::fmt::Debug for TraderaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraderaClient")
            .field("app_id", &self.config.app_id)
            .field("has_user_auth", &self.config.has_user_auth())
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

/// Handle for one Tradera service.
#[derive(Clone)]
pub struct ServiceClient {
    service: Service,
    endpoint: String,
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    responses: Option<Cache<String, String>>,
}

impl ServiceClient {
    /// The service this handle talks to.
    #[must_use]
    pub const fn service(&self) -> Service {
        self.service
    }

    /// Full endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fail with [`ClientError::AuthRequired`] if this service needs user
    /// authorization and none is configured.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn require_user_auth(&self) -> ClientResult<()> {
        if self.service.requires_user_auth() && !self.config.has_user_auth() {
            return Err(ClientError::AuthRequired);
        }
        Ok(())
    }

    /// Run `operation` through the auth guard and the shared middleware.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        self.require_user_auth()?;
        self.dispatcher.execute(cancel, operation).await
    }

    /// Like [`ServiceClient::execute`], serving fresh values from `cache`.
    pub async fn execute_cached<K, V, F, Fut>(
        &self,
        cache: Option<&Cache<K, V>>,
        key: K,
        cancel: &CancellationToken,
        operation: F,
    ) -> ClientResult<V>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<V>>,
    {
        self.require_user_auth()?;
        self.dispatcher.execute_cached(cache, key, cancel, operation).await
    }

    /// Send a prebuilt envelope for `action` and return the response body.
    ///
    /// # Errors
    ///
    /// Returns the classified transport error, or a retry or cancellation
    /// error from the middleware.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        action: &str,
        envelope: impl Into<String>,
    ) -> ClientResult<String> {
        let request = self.request(action, envelope.into());
        let transport = &self.transport;
        self.execute(cancel, || transport.send(&request)).await
    }

    /// Like [`ServiceClient::send`], but serve the response from the client's
    /// response cache when caching is enabled.
    ///
    /// The cache key covers the service, the action and the whole envelope.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::send`].
    pub async fn send_cached(
        &self,
        cancel: &CancellationToken,
        action: &str,
        envelope: impl Into<String>,
    ) -> ClientResult<String> {
        let request = self.request(action, envelope.into());
        let key = cache_key(self.service, action, &[("envelope", request.envelope.as_str())]);
        let transport = &self.transport;
        self.execute_cached(self.responses.as_ref(), key, cancel, || transport.send(&request))
            .await
    }

    fn request(&self, action: &str, envelope: String) -> SoapRequest {
        SoapRequest { endpoint: self.endpoint.clone(), action: action.to_string(), envelope }
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.service)
            .field("endpoint", &self.endpoint)
            .field("cached", &self.responses.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Transport for Echo {
        async fn send(&self, request: &SoapRequest) -> ClientResult<String> {
            Ok(request.action.clone())
        }
    }

    #[tokio::test]
    async fn test_service_clients_are_built_eagerly() {
        let client = TraderaClient::with_transport(
            Config::for_testing("http://localhost:1"),
            Arc::new(Echo),
        )
        .unwrap();

        for service in Service::ALL {
            let handle = client.service(service);
            assert_eq!(handle.service(), service);
            assert!(handle.endpoint().ends_with(service.endpoint_path()));
        }
        assert_eq!(client.public().service(), Service::Public);
    }

    #[tokio::test]
    async fn test_auth_guard() {
        let client = TraderaClient::with_transport(
            Config::for_testing("http://localhost:1"),
            Arc::new(Echo),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(client.search().send(&cancel, "Search", "").await.unwrap(), "Search");
        assert!(matches!(
            client.order().send(&cancel, "GetSellerOrders", "").await,
            Err(ClientError::AuthRequired)
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = TraderaClient::with_transport(Config::new(0, "key"), Arc::new(Echo));
        assert!(matches!(result, Err(ClientError::InvalidAppId)));
    }

    #[tokio::test]
    async fn test_debug_hides_secrets() {
        let config = Config::for_testing("http://localhost:1").with_user_auth(7, "s3cret-token");
        let client = TraderaClient::with_transport(config, Arc::new(Echo)).unwrap();
        let debug = format!("{client:?}");

        assert!(debug.contains("has_user_auth: true"));
        assert!(!debug.contains("test-app-key"));
        assert!(!debug.contains("s3cret-token"));
    }
}
