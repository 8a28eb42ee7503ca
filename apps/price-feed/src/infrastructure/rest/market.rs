//! Market-Data Clients
//!
//! Cached clients for the CoinMarketCap cryptocurrency API and the
//! exchange-rates API. Each client owns its [`ResponseCache`]s; the
//! underlying [`ResourceClient`] does the HTTP work.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::cache::ResponseCache;
use super::client::{ApiCredential, ResourceClient, RestBackend};
use super::envelope::ResponseEnvelope;
use super::error::ApiError;
use super::params::{QueryParams, normalize_symbols};
use crate::infrastructure::config::ApiSettings;

/// Header carrying the CoinMarketCap key.
pub const CMC_API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// Query parameter carrying the exchange-rates key.
pub const EXCHANGE_RATES_KEY_PARAM: &str = "access_key";

// =============================================================================
// Response Types
// =============================================================================

/// Price quote in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteData {
    /// Latest price, if the upstream has one.
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// One cryptocurrency as returned by CoinMarketCap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoData {
    /// CoinMarketCap id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Quotes keyed by convert currency (e.g. `USD`).
    #[serde(default)]
    pub quote: HashMap<String, QuoteData>,
}

impl CryptoData {
    /// USD price, if quoted.
    #[must_use]
    pub fn usd_price(&self) -> Option<Decimal> {
        self.quote.get("USD").and_then(|q| q.price)
    }
}

/// `GET /listings/latest` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingsResponse {
    /// Listed currencies.
    #[serde(default)]
    pub data: Vec<CryptoData>,
}

/// `GET /quotes/latest` body, keyed by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotesResponse {
    /// Quoted currencies.
    #[serde(default)]
    pub data: HashMap<String, CryptoData>,
}

/// `GET /latest` body of the exchange-rates API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRatesData {
    /// Upstream success flag.
    #[serde(default)]
    pub success: bool,
    /// Unix timestamp of the rates.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Base currency.
    #[serde(default)]
    pub base: String,
    /// Date of the rates.
    #[serde(default)]
    pub date: Option<String>,
    /// Rate per currency code.
    #[serde(default)]
    pub rates: BTreeMap<String, Decimal>,
}

// =============================================================================
// CoinMarketCap
// =============================================================================

/// Cached CoinMarketCap client (`/v1/cryptocurrency`).
#[derive(Debug)]
pub struct CryptoService {
    resource: ResourceClient,
    listings: ResponseCache<ResponseEnvelope<ListingsResponse>>,
    quotes: ResponseCache<ResponseEnvelope<QuotesResponse>>,
}

impl CryptoService {
    /// Wrap a backend. Cached entries live for the settings' TTL.
    #[must_use]
    pub fn new(backend: Arc<RestBackend>, settings: &ApiSettings) -> Self {
        Self {
            resource: ResourceClient::new(backend, "/v1/cryptocurrency"),
            listings: ResponseCache::new(
                "cmc_listings",
                settings.cache_ttl,
                settings.cache_max_entries,
            ),
            quotes: ResponseCache::new("cmc_quotes", settings.cache_ttl, settings.cache_max_entries),
        }
    }

    /// Build from settings. Returns `Ok(None)` when no key is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be built.
    pub fn from_settings(settings: &ApiSettings) -> Result<Option<Self>, ApiError> {
        let Some(key) = settings.cmc.api_key.clone() else {
            return Ok(None);
        };

        let backend = RestBackend::new(
            "cmc",
            &settings.cmc.base_url,
            settings.http_timeout,
            Some(ApiCredential::Header {
                name: CMC_API_KEY_HEADER,
                key,
            }),
        )?;

        Ok(Some(Self::new(Arc::new(backend), settings)))
    }

    /// Latest listings.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` if the upstream call fails.
    pub async fn listings_latest(
        &self,
        params: &QueryParams,
    ) -> Result<ResponseEnvelope<ListingsResponse>, ApiError> {
        let key = params.cache_key("listings_latest");
        self.listings
            .get_or_fetch(&key, self.listings.ttl(), || {
                self.resource.get_path("/listings/latest", params)
            })
            .await
    }

    /// Latest quotes for `symbols`. Order and duplicates do not matter.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unexpected` for an empty symbol list, otherwise
    /// an `ApiError` if the upstream call fails.
    pub async fn quotes_latest<S: AsRef<str> + Sync>(
        &self,
        symbols: &[S],
    ) -> Result<ResponseEnvelope<QuotesResponse>, ApiError> {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return Err(ApiError::unexpected("at least one symbol is required"));
        }

        let params = QueryParams::new().with("symbol", symbols.join(","));
        let key = params.cache_key("quotes_latest");
        self.quotes
            .get_or_fetch(&key, self.quotes.ttl(), || {
                self.resource.get_path("/quotes/latest", &params)
            })
            .await
    }

    /// Drop all cached responses.
    pub fn clear_cache(&self) {
        self.listings.clear();
        self.quotes.clear();
    }
}

// =============================================================================
// Exchange Rates
// =============================================================================

/// Cached exchange-rates client (`/v1`).
#[derive(Debug)]
pub struct ExchangeRatesService {
    resource: ResourceClient,
    latest: ResponseCache<ResponseEnvelope<ExchangeRatesData>>,
}

impl ExchangeRatesService {
    /// Wrap a backend. The backend should already carry the key and
    /// `format=1` defaults (see [`Self::from_settings`]).
    #[must_use]
    pub fn new(backend: Arc<RestBackend>, settings: &ApiSettings) -> Self {
        Self {
            resource: ResourceClient::new(backend, "/v1"),
            latest: ResponseCache::new(
                "exchange_rates_latest",
                settings.cache_ttl,
                settings.cache_max_entries,
            ),
        }
    }

    /// Build from settings. Returns `Ok(None)` when no key is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be built.
    pub fn from_settings(settings: &ApiSettings) -> Result<Option<Self>, ApiError> {
        let Some(key) = settings.exchange_rates.api_key.clone() else {
            return Ok(None);
        };

        let backend = RestBackend::new(
            "exchange_rates",
            &settings.exchange_rates.base_url,
            settings.http_timeout,
            Some(ApiCredential::Query {
                param: EXCHANGE_RATES_KEY_PARAM,
                key,
            }),
        )?
        .with_default_query(QueryParams::new().with("format", 1));

        Ok(Some(Self::new(Arc::new(backend), settings)))
    }

    /// Latest rates.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` if the upstream call fails.
    pub async fn latest(
        &self,
        params: &QueryParams,
    ) -> Result<ResponseEnvelope<ExchangeRatesData>, ApiError> {
        let key = params.cache_key("latest");
        self.latest
            .get_or_fetch(&key, self.latest.ttl(), || {
                self.resource.get_path("/latest", params)
            })
            .await
    }

    /// Drop all cached responses.
    pub fn clear_cache(&self) {
        self.latest.clear();
    }
}
