//! Simulated market offer book.
//!
//! The book is the only state touched by more than one background task
//! (reconciler, liveliness simulator, purchases), so every writer goes
//! through [`MarketOfferStore::update`], which applies a
//! compute-next-from-previous closure under the write lock. Interleaved
//! tasks therefore never lose each other's updates.

pub mod reconcile;
pub mod sellers;
pub mod sync;

pub use reconcile::{reconcile, RefPair, PRICE_EPSILON};
pub use sellers::{random_seller, Seller, SELLERS};
pub use sync::{spawn_liveliness_simulator, spawn_offer_sync};

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::models::{CertificateType, MarketOffer};

/// In-memory offer book shared across the API and background tasks.
pub struct MarketOfferStore {
    offers: RwLock<Vec<MarketOffer>>,
    // Offer count, published on change. Doubles as the purchase hook for
    // the reconciler and as the WS offers-changed event source.
    count_tx: watch::Sender<usize>,
}

impl MarketOfferStore {
    pub fn new() -> Arc<Self> {
        let (count_tx, _) = watch::channel(0);
        Arc::new(Self {
            offers: RwLock::new(Vec::new()),
            count_tx,
        })
    }

    pub fn snapshot(&self) -> Vec<MarketOffer> {
        self.offers.read().clone()
    }

    pub fn offers_of(&self, instrument: CertificateType) -> Vec<MarketOffer> {
        self.offers
            .read()
            .iter()
            .filter(|o| o.certificate_type == instrument)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.offers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.read().is_empty()
    }

    /// Subscribe to offer count changes.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    /// Apply a functional update to the book.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(Vec<MarketOffer>) -> Vec<MarketOffer>,
    {
        let mut guard = self.offers.write();
        let next = f(std::mem::take(&mut *guard));
        *guard = next;
        let len = guard.len();
        drop(guard);

        self.count_tx.send_if_modified(|count| {
            if *count != len {
                *count = len;
                true
            } else {
                false
            }
        });
    }

    /// Remove and return an offer by id (purchase path).
    pub fn take_offer(&self, id: Uuid) -> Option<MarketOffer> {
        let mut taken = None;
        self.update(|mut offers| {
            if let Some(pos) = offers.iter().position(|o| o.id == id) {
                taken = Some(offers.remove(pos));
            }
            offers
        });
        taken
    }

    /// Run the reconciliation pass against the given reference prices.
    /// Returns true when the book was rewritten.
    pub fn reconcile_now(&self, refs: RefPair) -> bool {
        let mut changed = false;
        self.update(|offers| {
            let mut rng = rand::thread_rng();
            match reconcile::reconcile(&offers, refs, &mut rng) {
                Some(next) => {
                    changed = true;
                    next
                }
                None => offers,
            }
        });

        if changed {
            debug!(offer_count = self.len(), "offer book reconciled");
        }
        changed
    }

    /// One liveliness pass: small random walks on existing offers and the
    /// occasional fresh offer. Prices never fall below the known floor.
    pub fn liveliness_tick(&self, refs: RefPair) {
        if self.is_empty() {
            return;
        }

        self.update(|offers| {
            let mut rng = rand::thread_rng();
            let mut next: Vec<MarketOffer> = offers
                .into_iter()
                .map(|mut offer| {
                    if rng.gen::<f64>() < 0.3 {
                        let step = round2(rng.gen_range(-0.25..0.25));
                        let floor = refs
                            .price_for(offer.certificate_type)
                            .unwrap_or(match offer.certificate_type {
                                CertificateType::Cea => 37.0,
                                CertificateType::Eua => 57.0,
                            });
                        offer.price = round2((offer.price + step).max(floor));
                        offer.timestamp = Utc::now();
                    }
                    offer
                })
                .collect();

            if rng.gen::<f64>() < 0.05 {
                let instrument = if rng.gen::<f64>() < 0.6 {
                    CertificateType::Cea
                } else {
                    CertificateType::Eua
                };
                let base = refs.price_for(instrument).unwrap_or(match instrument {
                    CertificateType::Cea => 40.0,
                    CertificateType::Eua => 62.0,
                });
                let spread = match instrument {
                    CertificateType::Cea => rng.gen_range(0.0..5.0),
                    CertificateType::Eua => rng.gen_range(0.0..8.0),
                };
                let seller = random_seller(instrument, &mut rng);

                next.push(MarketOffer {
                    id: Uuid::new_v4(),
                    seller_id: seller.id.clone(),
                    seller_name: seller.name.clone(),
                    certificate_type: instrument,
                    amount: reconcile::weighted_volume(instrument, &mut rng),
                    price: round2(base + 0.5 + spread),
                    timestamp: Utc::now(),
                });

                next = reconcile::sorted_by_type(next);
            }

            next
        });
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known_refs() -> RefPair {
        RefPair {
            cea: Some(40.0),
            eua: Some(70.0),
        }
    }

    #[test]
    fn test_take_offer_shrinks_book_and_notifies() {
        let store = MarketOfferStore::new();
        store.reconcile_now(known_refs());
        let before = store.len();
        let mut count_rx = store.subscribe_count();
        count_rx.mark_unchanged();

        let target = store.snapshot()[0].clone();
        let taken = store.take_offer(target.id).expect("offer must exist");

        assert_eq!(taken.id, target.id);
        assert_eq!(store.len(), before - 1);
        assert!(count_rx.has_changed().unwrap());
    }

    #[test]
    fn test_take_missing_offer_is_noop() {
        let store = MarketOfferStore::new();
        store.reconcile_now(known_refs());
        let before = store.len();

        assert!(store.take_offer(Uuid::new_v4()).is_none());
        assert_eq!(store.len(), before);
    }

    #[test]
    fn test_liveliness_respects_floor() {
        let store = MarketOfferStore::new();
        let refs = known_refs();
        store.reconcile_now(refs);

        for _ in 0..50 {
            store.liveliness_tick(refs);
        }

        for offer in store.snapshot() {
            let floor = refs.price_for(offer.certificate_type).unwrap();
            assert!(offer.price >= floor);
        }
    }

    #[test]
    fn test_liveliness_skips_empty_book() {
        let store = MarketOfferStore::new();
        store.liveliness_tick(known_refs());
        assert!(store.is_empty());
    }
}
