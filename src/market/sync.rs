//! Background tasks that keep the offer book aligned with the feeds.

use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::info;

use super::MarketOfferStore;
use crate::feeds::ReferencePrices;

/// The authoritative reconciliation loop.
///
/// Reconciles once at startup, then re-runs on every reference price
/// change, on every offer-count change (purchases), and on a fixed timer
/// as a backstop. All four triggers funnel into the same
/// [`MarketOfferStore::reconcile_now`] call.
pub fn spawn_offer_sync(
    store: Arc<MarketOfferStore>,
    mut refs: ReferencePrices,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📉 offer sync task started");
        let mut count_rx = store.subscribe_count();
        let mut ticker = tokio::time::interval(tick);
        // The interval fires immediately, covering the startup pass.
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = refs.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = count_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            store.reconcile_now(refs.pair());
        }
    })
}

/// Cosmetic market movement: random walks and occasional fresh offers,
/// floor-clamped so the reconciler's invariants survive every tick.
pub fn spawn_liveliness_simulator(
    store: Arc<MarketOfferStore>,
    refs: ReferencePrices,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        loop {
            ticker.tick().await;
            store.liveliness_tick(refs.pair());
        }
    })
}
