//! REST Clients
//!
//! Request/response wrappers over the HTTP backends:
//!
//! - **client**: backends and CRUD resource clients
//! - **market**: cached CoinMarketCap and exchange-rates clients
//! - **cache**: TTL response cache used by the market clients
//! - **envelope** / **error** / **params**: shared request and response types

pub mod cache;
pub mod client;
pub mod envelope;
pub mod error;
pub mod market;
pub mod params;

pub use cache::ResponseCache;
pub use client::{ApiCredential, ResourceClient, RestBackend};
pub use envelope::ResponseEnvelope;
pub use error::{ApiError, ApiErrorKind, classify_transport_error, rejection};
pub use market::{
    CryptoData, CryptoService, ExchangeRatesData, ExchangeRatesService, ListingsResponse,
    QuoteData, QuotesResponse,
};
pub use params::{ParamValue, QueryParams, normalize_symbols};
