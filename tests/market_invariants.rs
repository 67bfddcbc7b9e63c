//! End-to-end checks of the offer book invariants across reconciliation,
//! liveliness noise, and purchases.

use std::sync::Arc;

use nihao_carbon_backend::auth::{models::derive_user_id, UserStore};
use nihao_carbon_backend::market::{MarketOfferStore, RefPair, PRICE_EPSILON};
use nihao_carbon_backend::models::CertificateType;
use nihao_carbon_backend::portfolio::{BlobStore, PortfolioManager};
use tempfile::NamedTempFile;

fn refs(cea: f64, eua: f64) -> RefPair {
    RefPair {
        cea: Some(cea),
        eua: Some(eua),
    }
}

fn assert_book_invariants(store: &MarketOfferStore, pair: RefPair) {
    for instrument in [CertificateType::Cea, CertificateType::Eua] {
        let floor = pair.price_for(instrument).unwrap();
        let offers = store.offers_of(instrument);
        assert!(!offers.is_empty(), "{instrument:?} side must not be empty");

        let best = offers
            .iter()
            .map(|o| o.price)
            .fold(f64::INFINITY, f64::min);
        assert!(
            (best - floor).abs() <= PRICE_EPSILON,
            "best {instrument:?} offer {best} must track reference {floor}"
        );
        assert!(
            offers.iter().all(|o| o.price >= floor),
            "no {instrument:?} offer may sit below the reference"
        );
    }
}

#[test]
fn reconciliation_tracks_reference_prices() {
    let store = MarketOfferStore::new();

    // First reference prices arrive: the book is generated from scratch.
    let initial = refs(61.23, 75.4);
    assert!(store.reconcile_now(initial));
    assert_book_invariants(&store, initial);

    let best_cea = store
        .offers_of(CertificateType::Cea)
        .iter()
        .map(|o| o.price)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(best_cea, 61.23);

    // Reference moves: every tick restores the invariants.
    for pair in [refs(60.10, 74.0), refs(63.5, 74.0), refs(63.4, 76.25)] {
        store.reconcile_now(pair);
        assert_book_invariants(&store, pair);
    }
}

#[test]
fn book_is_cleared_when_references_disappear() {
    let store = MarketOfferStore::new();
    store.reconcile_now(refs(40.0, 70.0));
    assert!(!store.is_empty());

    assert!(store.reconcile_now(RefPair::default()));
    assert!(store.is_empty());

    // And regenerated once they come back.
    assert!(store.reconcile_now(refs(41.0, 71.0)));
    assert_book_invariants(&store, refs(41.0, 71.0));
}

#[test]
fn liveliness_noise_never_breaks_the_floor() {
    let store = MarketOfferStore::new();
    let pair = refs(40.0, 70.0);
    store.reconcile_now(pair);

    for _ in 0..100 {
        store.liveliness_tick(pair);
        store.reconcile_now(pair);
        assert_book_invariants(&store, pair);
    }
}

#[tokio::test]
async fn purchase_removes_offer_and_reconciliation_refills() {
    let auth_file = NamedTempFile::new().unwrap();
    let blob_file = NamedTempFile::new().unwrap();

    let users = Arc::new(UserStore::new(auth_file.path().to_str().unwrap()).unwrap());
    let market = MarketOfferStore::new();
    let manager = PortfolioManager::new(
        users.clone(),
        market.clone(),
        BlobStore::new(blob_file.path().to_str().unwrap()).unwrap(),
    )
    .unwrap();

    let pair = refs(45.0, 72.0);
    market.reconcile_now(pair);
    let before = market.len();

    let user_id = derive_user_id("Victor");
    let offer = market.offers_of(CertificateType::Cea)[0].clone();
    manager.purchase(user_id, offer.id).await.unwrap();

    assert_eq!(market.len(), before - 1);
    assert!(market.snapshot().iter().all(|o| o.id != offer.id));

    // The next tick keeps the book consistent (and may refill it).
    market.reconcile_now(pair);
    assert_book_invariants(&market, pair);

    let portfolio = manager.portfolio(user_id).unwrap();
    assert_eq!(portfolio.certificates.len(), 1);
    assert_eq!(portfolio.certificates[0].amount, offer.amount);
}
