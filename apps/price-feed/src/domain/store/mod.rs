//! Price Store
//!
//! Reactive record of the last-known price per symbol plus the current
//! connection state of the price stream.
//!
//! # Design
//!
//! The store is an explicitly constructed object shared by `Arc`:
//! - The connection manager is its only writer
//! - Readers take point lookups or a consistent [`PriceSnapshot`]
//! - Connection state changes are observable through a `watch` channel
//!
//! Prices are last-write-wins per symbol. There is no history.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::domain::streaming::{ConnectionState, PriceTick, Symbol};

/// Shared price store reference.
pub type SharedPriceStore = Arc<PriceStore>;

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of the store contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceSnapshot {
    /// Connection state when the snapshot was taken.
    pub connection_status: ConnectionState,
    /// Last-known price per symbol, ordered by symbol.
    pub prices: BTreeMap<Symbol, Decimal>,
    /// Total ticks applied since the store was created.
    pub ticks_applied: u64,
    /// Wall-clock time of the most recent tick.
    pub last_tick_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Price Store
// =============================================================================

/// Process-wide price record, written by the connection manager.
///
/// # Example
///
/// ```rust
/// use price_feed::domain::store::PriceStore;
/// use price_feed::domain::streaming::{ConnectionState, PriceTick};
/// use rust_decimal::Decimal;
///
/// let store = PriceStore::new();
/// store.apply_tick(PriceTick::new("BTC", Decimal::from(50_000)));
/// store.apply_tick(PriceTick::new("BTC", Decimal::from(50_100)));
///
/// assert_eq!(store.price("BTC"), Some(Decimal::from(50_100)));
/// assert_eq!(store.connection_status(), ConnectionState::Disconnected);
/// ```
#[derive(Debug)]
pub struct PriceStore {
    prices: RwLock<HashMap<Symbol, Decimal>>,
    status: watch::Sender<ConnectionState>,
    ticks_applied: AtomicU64,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
}

impl Default for PriceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceStore {
    /// Create an empty store in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            prices: RwLock::new(HashMap::new()),
            status,
            ticks_applied: AtomicU64::new(0),
            last_tick_at: RwLock::new(None),
        }
    }

    /// Create an empty store wrapped for sharing.
    #[must_use]
    pub fn shared() -> SharedPriceStore {
        Arc::new(Self::new())
    }

    /// Overwrite the price for a symbol.
    pub fn update_price(&self, symbol: impl Into<Symbol>, price: Decimal) {
        self.prices.write().insert(symbol.into(), price);
        *self.last_tick_at.write() = Some(Utc::now());
        self.ticks_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Apply a tick to the store.
    pub fn apply_tick(&self, tick: PriceTick) {
        self.update_price(tick.symbol, tick.price);
    }

    /// Set the connection state, returning the previous one.
    pub fn set_connection_status(&self, state: ConnectionState) -> ConnectionState {
        self.status.send_replace(state)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Get the last-known price for a symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }

    /// Get all last-known prices, ordered by symbol.
    #[must_use]
    pub fn prices(&self) -> BTreeMap<Symbol, Decimal> {
        self.prices
            .read()
            .iter()
            .map(|(symbol, price)| (symbol.clone(), *price))
            .collect()
    }

    /// Number of symbols with a known price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    /// Check if no price has been received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }

    /// Total ticks applied since creation.
    #[must_use]
    pub fn ticks_applied(&self) -> u64 {
        self.ticks_applied.load(Ordering::Relaxed)
    }

    /// Wall-clock time of the most recent tick.
    #[must_use]
    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        *self.last_tick_at.read()
    }

    /// Take a consistent copy of prices and connection state.
    #[must_use]
    pub fn snapshot(&self) -> PriceSnapshot {
        let prices = self.prices.read();
        PriceSnapshot {
            connection_status: self.connection_status(),
            prices: prices
                .iter()
                .map(|(symbol, price)| (symbol.clone(), *price))
                .collect(),
            ticks_applied: self.ticks_applied(),
            last_tick_at: *self.last_tick_at.read(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn new_store_is_empty_and_disconnected() {
        let store = PriceStore::new();
        assert!(store.is_empty());
        assert_eq!(store.connection_status(), ConnectionState::Disconnected);
        assert_eq!(store.ticks_applied(), 0);
        assert!(store.snapshot().last_tick_at.is_none());
    }

    #[test]
    fn update_overwrites_previous_price() {
        let store = PriceStore::new();
        store.update_price("BTC", Decimal::from(50_000));
        store.update_price("BTC", Decimal::from(49_500));

        assert_eq!(store.price("BTC"), Some(Decimal::from(49_500)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.ticks_applied(), 2);
    }

    #[test]
    fn unknown_symbol_has_no_price() {
        let store = PriceStore::new();
        store.update_price("BTC", Decimal::from(1));
        assert_eq!(store.price("ETH"), None);
    }

    #[test]
    fn set_status_returns_previous() {
        let store = PriceStore::new();
        let previous = store.set_connection_status(ConnectionState::Connecting);
        assert_eq!(previous, ConnectionState::Disconnected);

        let previous = store.set_connection_status(ConnectionState::Connected);
        assert_eq!(previous, ConnectionState::Connecting);
        assert_eq!(store.connection_status(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn watchers_observe_status_changes() {
        let store = PriceStore::shared();
        let mut rx = store.watch_status();

        store.set_connection_status(ConnectionState::Connected);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
    }

    #[test]
    fn snapshot_is_ordered_by_symbol() {
        let store = PriceStore::new();
        store.update_price("ETH", Decimal::from(3_000));
        store.update_price("BTC", Decimal::from(50_000));
        store.set_connection_status(ConnectionState::Connected);

        let snapshot = store.snapshot();
        let symbols: Vec<_> = snapshot.prices.keys().cloned().collect();
        assert_eq!(symbols, vec!["BTC", "ETH"]);
        assert_eq!(snapshot.connection_status, ConnectionState::Connected);
        assert!(snapshot.last_tick_at.is_some());
    }

    #[test]
    fn isolated_stores_do_not_share_state() {
        let a = PriceStore::new();
        let b = PriceStore::new();
        a.update_price("BTC", Decimal::from(1));
        assert!(b.is_empty());
    }

    proptest! {
        #[test]
        fn last_write_wins_per_symbol(
            updates in prop::collection::vec((0usize..4, -1_000_000i64..1_000_000), 1..64)
        ) {
            const SYMBOLS: [&str; 4] = ["BTC", "ETH", "SOL", "ADA"];
            let store = PriceStore::new();
            let mut expected: HashMap<&str, Decimal> = HashMap::new();

            for (idx, raw) in &updates {
                let price = Decimal::new(*raw, 2);
                store.apply_tick(PriceTick::new(SYMBOLS[*idx], price));
                expected.insert(SYMBOLS[*idx], price);
            }

            for (symbol, price) in expected {
                prop_assert_eq!(store.price(symbol), Some(price));
            }
            prop_assert_eq!(store.ticks_applied(), updates.len() as u64);
        }
    }
}
