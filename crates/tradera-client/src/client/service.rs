//! The six Tradera SOAP services.

use std::fmt;

/// A Tradera v3 SOAP service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Item search.
    Search,
    /// Public data (items, categories, users).
    Public,
    /// Listing information.
    Listing,
    /// Seller operations.
    Restricted,
    /// Order management.
    Order,
    /// Buyer operations.
    Buyer,
}

impl Service {
    /// Every service, in declaration order.
    pub const ALL: [Self; 6] =
        [Self::Search, Self::Public, Self::Listing, Self::Restricted, Self::Order, Self::Buyer];

    /// Path of the service endpoint relative to the API base URL.
    #[must_use]
    pub const fn endpoint_path(self) -> &'static str {
        match self {
            Self::Search => "SearchService.asmx",
            Self::Public => "PublicService.asmx",
            Self::Listing => "ListingService.asmx",
            Self::Restricted => "RestrictedService.asmx",
            Self::Order => "OrderService.asmx",
            Self::Buyer => "BuyerService.asmx",
        }
    }

    /// Short lowercase name used in logs and cache keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Public => "public",
            Self::Listing => "listing",
            Self::Restricted => "restricted",
            Self::Order => "order",
            Self::Buyer => "buyer",
        }
    }

    /// Whether calls need a user ID and token in addition to the app credentials.
    #[must_use]
    pub const fn requires_user_auth(self) -> bool {
        matches!(self, Self::Restricted | Self::Order | Self::Buyer)
    }

    /// Full endpoint URL under `base_url`.
    #[must_use]
    pub fn endpoint(self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.endpoint_path())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
