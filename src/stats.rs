//! Display-only market rollups for the dashboard.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;

use crate::market::MarketOfferStore;
use crate::models::{CertificateType, MarketStatistics, PriceHistoryDay, Transaction};

const HISTORY_DAYS: usize = 30;

struct StatsState {
    price_history: Vec<PriceHistoryDay>,
    last_average_cea: f64,
    last_average_eua: f64,
}

/// Derives averages, 24h volumes, and the daily price series from the
/// offer book and a user's transaction log.
pub struct StatsAggregator {
    market: Arc<MarketOfferStore>,
    state: RwLock<StatsState>,
}

impl StatsAggregator {
    pub fn new(market: Arc<MarketOfferStore>) -> Self {
        Self {
            market,
            state: RwLock::new(StatsState {
                price_history: seed_price_history(&mut rand::thread_rng()),
                last_average_cea: 0.0,
                last_average_eua: 0.0,
            }),
        }
    }

    /// Current rollups. Today's history entry is overwritten in place with
    /// the latest averages; the series stays capped at 30 days.
    pub fn snapshot(&self, transactions: &[Transaction]) -> MarketStatistics {
        let offers = self.market.snapshot();
        let mut state = self.state.write();

        let average_price_cea = average_price(&offers, CertificateType::Cea)
            .unwrap_or(state.last_average_cea);
        let average_price_eua = average_price(&offers, CertificateType::Eua)
            .unwrap_or(state.last_average_eua);
        state.last_average_cea = average_price_cea;
        state.last_average_eua = average_price_eua;

        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let volume_cea = volume_since(transactions, CertificateType::Cea, cutoff);
        let volume_eua = volume_since(transactions, CertificateType::Eua, cutoff);

        let today = Utc::now().date_naive();
        match state
            .price_history
            .iter_mut()
            .find(|entry| entry.date == today)
        {
            Some(entry) => {
                entry.price_cea = average_price_cea;
                entry.price_eua = average_price_eua;
            }
            None => {
                state.price_history.push(PriceHistoryDay {
                    date: today,
                    price_cea: average_price_cea,
                    price_eua: average_price_eua,
                });
                while state.price_history.len() > HISTORY_DAYS {
                    state.price_history.remove(0);
                }
            }
        }

        MarketStatistics {
            average_price_cea,
            average_price_eua,
            volume_cea,
            volume_eua,
            price_history: state.price_history.clone(),
        }
    }
}

fn average_price(
    offers: &[crate::models::MarketOffer],
    instrument: CertificateType,
) -> Option<f64> {
    let prices: Vec<f64> = offers
        .iter()
        .filter(|o| o.certificate_type == instrument)
        .map(|o| o.price)
        .collect();
    if prices.is_empty() {
        return None;
    }
    Some(round2(prices.iter().sum::<f64>() / prices.len() as f64))
}

fn volume_since(
    transactions: &[Transaction],
    instrument: CertificateType,
    cutoff: chrono::DateTime<Utc>,
) -> u64 {
    transactions
        .iter()
        .filter(|tx| tx.certificate_type == instrument && tx.timestamp > cutoff)
        .map(|tx| tx.amount as u64)
        .sum()
}

/// Thirty days of synthetic history with a gentle upward trend, so the
/// chart has something to draw before live data accumulates.
fn seed_price_history<R: Rng>(rng: &mut R) -> Vec<PriceHistoryDay> {
    let today = Utc::now().date_naive();

    (0..HISTORY_DAYS)
        .map(|i| {
            let date = today - ChronoDuration::days((HISTORY_DAYS - 1 - i) as i64);
            let progress = i as f64 / HISTORY_DAYS as f64;
            let base_cea = 36.0 + progress * 5.0;
            let base_eua = 55.0 + progress * 7.0;

            PriceHistoryDay {
                date,
                price_cea: round2(base_cea + rng.gen_range(-1.5..1.5)),
                price_eua: round2(base_eua + rng.gen_range(-1.5..1.5)),
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::RefPair;
    use uuid::Uuid;

    fn transaction(
        instrument: CertificateType,
        amount: u32,
        age_hours: i64,
    ) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: "S-CHN-1001".to_string(),
            certificate_type: instrument,
            amount,
            price: 42.0,
            total_value: 42.0 * amount as f64,
            timestamp: Utc::now() - ChronoDuration::hours(age_hours),
        }
    }

    #[test]
    fn test_seeded_history_spans_thirty_days() {
        let history = seed_price_history(&mut rand::thread_rng());
        assert_eq!(history.len(), HISTORY_DAYS);
        assert_eq!(history.last().unwrap().date, Utc::now().date_naive());
        assert!(history.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_averages_follow_the_offer_book() {
        let market = MarketOfferStore::new();
        market.reconcile_now(RefPair {
            cea: Some(40.0),
            eua: Some(70.0),
        });
        let stats = StatsAggregator::new(market.clone());

        let snapshot = stats.snapshot(&[]);
        // The best offer sits at the reference, the rest above it.
        assert!(snapshot.average_price_cea >= 40.0);
        assert!(snapshot.average_price_eua >= 70.0);
    }

    #[test]
    fn test_volume_counts_only_last_24_hours() {
        let market = MarketOfferStore::new();
        let stats = StatsAggregator::new(market);

        let transactions = vec![
            transaction(CertificateType::Cea, 1000, 1),
            transaction(CertificateType::Cea, 500, 23),
            transaction(CertificateType::Cea, 9999, 25), // outside the window
            transaction(CertificateType::Eua, 300, 2),
        ];

        let snapshot = stats.snapshot(&transactions);
        assert_eq!(snapshot.volume_cea, 1500);
        assert_eq!(snapshot.volume_eua, 300);
    }

    #[test]
    fn test_todays_entry_is_overwritten_not_appended() {
        let market = MarketOfferStore::new();
        market.reconcile_now(RefPair {
            cea: Some(40.0),
            eua: Some(70.0),
        });
        let stats = StatsAggregator::new(market);

        let first = stats.snapshot(&[]);
        let second = stats.snapshot(&[]);

        assert_eq!(first.price_history.len(), second.price_history.len());
        assert_eq!(
            second.price_history.last().unwrap().date,
            Utc::now().date_naive()
        );
    }

    #[test]
    fn test_empty_book_keeps_previous_averages() {
        let market = MarketOfferStore::new();
        market.reconcile_now(RefPair {
            cea: Some(40.0),
            eua: Some(70.0),
        });
        let stats = StatsAggregator::new(market.clone());
        let with_offers = stats.snapshot(&[]);

        // Book cleared (feeds went away): averages hold their last value.
        market.reconcile_now(RefPair::default());
        let without_offers = stats.snapshot(&[]);

        assert_eq!(
            with_offers.average_price_cea,
            without_offers.average_price_cea
        );
    }
}
