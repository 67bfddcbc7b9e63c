//! Portfolio, certificate lifecycle, and emissions accounting.
//!
//! Owns the per-user trading state: certificates, the transaction log,
//! emissions counters, and the market-wide activity history. The four
//! purchase effects (balance debit, certificate, transaction, offer
//! removal) are ordered so every fallible step happens before the first
//! observable one; callers never see a partial purchase.

pub mod store;

pub use store::BlobStore;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::UserStore,
    market::{MarketOfferStore, SELLERS},
    models::{
        Activity, ActivityType, Certificate, CertificateStatus, CertificateType, Co2Emissions,
        Portfolio, Transaction,
    },
};

/// Fee charged when starting a CEA -> EUA conversion.
pub const CONVERSION_FEE: f64 = 2.0;

/// How long a conversion takes to complete.
pub const CONVERSION_DURATION_MINS: i64 = 5;

const VERIFY_ROUNDTRIP_MS: u64 = 1500;
const SURRENDER_ROUNDTRIP_MS: u64 = 2000;

#[derive(Debug)]
pub enum PortfolioError {
    UserNotFound,
    OfferNotFound,
    CertificateNotFound,
    InsufficientBalance { required: f64, available: f64 },
    InvalidState(&'static str),
    Storage(anyhow::Error),
}

impl std::fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortfolioError::UserNotFound => write!(f, "user not found"),
            PortfolioError::OfferNotFound => write!(f, "offer no longer available"),
            PortfolioError::CertificateNotFound => write!(f, "certificate not found"),
            PortfolioError::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "insufficient balance: need {required:.2} EUR, have {available:.2} EUR"
            ),
            PortfolioError::InvalidState(msg) => write!(f, "{msg}"),
            PortfolioError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for PortfolioError {}

impl From<anyhow::Error> for PortfolioError {
    fn from(e: anyhow::Error) -> Self {
        PortfolioError::Storage(e)
    }
}

#[derive(Debug, Clone, Default)]
struct UserState {
    portfolio: Portfolio,
    transactions: Vec<Transaction>,
    emissions: Co2Emissions,
}

/// Per-user holdings manager backed by the flat blob store.
pub struct PortfolioManager {
    users: Arc<UserStore>,
    market: Arc<MarketOfferStore>,
    store: BlobStore,
    state: RwLock<HashMap<Uuid, UserState>>,
    // Market-wide audit log, newest first.
    activity: RwLock<Vec<Activity>>,
}

impl PortfolioManager {
    pub fn new(
        users: Arc<UserStore>,
        market: Arc<MarketOfferStore>,
        store: BlobStore,
    ) -> anyhow::Result<Arc<Self>> {
        let activity = match store.load_activity()? {
            Some(existing) => existing,
            None => {
                // First run: seed the log so the history view isn't empty.
                let seeded = seed_activity_history(&mut rand::thread_rng());
                store.save_activity(&seeded)?;
                seeded
            }
        };

        Ok(Arc::new(Self {
            users,
            market,
            store,
            state: RwLock::new(HashMap::new()),
            activity: RwLock::new(activity),
        }))
    }

    /// Buy a standing offer. Debits the balance, creates the certificate,
    /// records transaction + activity, and removes the offer, or does
    /// nothing at all.
    pub async fn purchase(
        &self,
        user_id: Uuid,
        offer_id: Uuid,
    ) -> Result<Certificate, PortfolioError> {
        self.ensure_loaded(user_id)?;

        let user = self
            .users
            .get_user(&user_id)
            .map_err(PortfolioError::Storage)?
            .ok_or(PortfolioError::UserNotFound)?;

        let offer = self
            .market
            .snapshot()
            .into_iter()
            .find(|o| o.id == offer_id)
            .ok_or(PortfolioError::OfferNotFound)?;

        let total_cost = offer.price * offer.amount as f64;
        if user.balance < total_cost {
            return Err(PortfolioError::InsufficientBalance {
                required: total_cost,
                available: user.balance,
            });
        }

        // Claim the offer first: once it's ours the remaining effects are
        // infallible, so no partial purchase can be observed.
        let offer = self
            .market
            .take_offer(offer_id)
            .ok_or(PortfolioError::OfferNotFound)?;

        if let Err(e) = self.users.update_balance(&user_id, user.balance - total_cost) {
            // Put the offer back so the failed purchase leaves no trace.
            let restored = offer.clone();
            self.market.update(|mut offers| {
                offers.push(restored);
                offers
            });
            return Err(PortfolioError::Storage(e));
        }

        let timestamp = Utc::now();
        let certificate = Certificate {
            id: Uuid::new_v4(),
            certificate_type: offer.certificate_type,
            amount: offer.amount,
            price: offer.price,
            status: CertificateStatus::Available,
            seller: Some(offer.seller_name.clone()),
            purchased_at: timestamp,
            conversion_started_at: None,
            conversion_completed_at: None,
            verified_at: None,
        };

        let transaction = Transaction {
            id: Uuid::new_v4(),
            buyer_id: user_id,
            seller_id: offer.seller_id.clone(),
            certificate_type: offer.certificate_type,
            amount: offer.amount,
            price: offer.price,
            total_value: total_cost,
            timestamp,
        };

        {
            let mut state = self.state.write();
            let entry = state.entry(user_id).or_default();
            entry.portfolio.certificates.push(certificate.clone());
            entry.portfolio.recompute_totals();
            entry.transactions.push(transaction);
            self.persist_user(&user_id, entry);
        }

        self.record_activity(Activity {
            id: Uuid::new_v4(),
            user_id,
            timestamp,
            activity_type: ActivityType::Purchase,
            certificate_id: Some(certificate.id),
            seller_id: Some(offer.seller_id),
            amount: Some(offer.amount),
            price: Some(offer.price),
            total_value: Some(total_cost),
            details: Some(format!(
                "{} certificate from {}",
                offer.certificate_type.as_str().to_uppercase(),
                offer.seller_name
            )),
        });

        info!(
            user = %user_id,
            amount = offer.amount,
            price = offer.price,
            "certificate purchased"
        );

        Ok(certificate)
    }

    /// Start a CEA -> EUA conversion. Completion is handled by the ticker.
    pub async fn convert(
        &self,
        user_id: Uuid,
        certificate_id: Uuid,
    ) -> Result<Certificate, PortfolioError> {
        self.ensure_loaded(user_id)?;

        let user = self
            .users
            .get_user(&user_id)
            .map_err(PortfolioError::Storage)?
            .ok_or(PortfolioError::UserNotFound)?;

        if user.balance < CONVERSION_FEE {
            return Err(PortfolioError::InsufficientBalance {
                required: CONVERSION_FEE,
                available: user.balance,
            });
        }

        self.check_certificate(
            user_id,
            certificate_id,
            CertificateType::Cea,
            CertificateStatus::Available,
            "only available CEA certificates can be converted",
        )?;

        self.users
            .update_balance(&user_id, user.balance - CONVERSION_FEE)
            .map_err(PortfolioError::Storage)?;

        let timestamp = Utc::now();
        let (updated, amount) = {
            let mut state = self.state.write();
            let entry = state.get_mut(&user_id).ok_or(PortfolioError::UserNotFound)?;
            let cert = entry
                .portfolio
                .certificates
                .iter_mut()
                .find(|c| c.id == certificate_id)
                .ok_or(PortfolioError::CertificateNotFound)?;

            cert.status = CertificateStatus::Converting;
            cert.conversion_started_at = Some(timestamp);
            let updated = cert.clone();
            let amount = cert.amount;
            entry.portfolio.recompute_totals();
            self.persist_user(&user_id, entry);
            (updated, amount)
        };

        self.record_activity(Activity {
            id: Uuid::new_v4(),
            user_id,
            timestamp,
            activity_type: ActivityType::ConversionStart,
            certificate_id: Some(certificate_id),
            seller_id: None,
            amount: Some(amount),
            price: None,
            total_value: None,
            details: Some(format!(
                "Started conversion of {amount} tons CEA certificate"
            )),
        });

        Ok(updated)
    }

    /// Verify an EUA certificate against the external registry (simulated).
    pub async fn verify(
        &self,
        user_id: Uuid,
        certificate_id: Uuid,
    ) -> Result<Certificate, PortfolioError> {
        self.ensure_loaded(user_id)?;
        self.check_certificate(
            user_id,
            certificate_id,
            CertificateType::Eua,
            CertificateStatus::Available,
            "only available EUA certificates can be verified",
        )?;

        // Simulated registry round trip. The state may have moved while we
        // were away, so the mutation re-validates.
        tokio::time::sleep(std::time::Duration::from_millis(VERIFY_ROUNDTRIP_MS)).await;

        let timestamp = Utc::now();
        let (updated, amount) = {
            let mut state = self.state.write();
            let entry = state.get_mut(&user_id).ok_or(PortfolioError::UserNotFound)?;
            let cert = entry
                .portfolio
                .certificates
                .iter_mut()
                .find(|c| c.id == certificate_id)
                .ok_or(PortfolioError::CertificateNotFound)?;

            if cert.status != CertificateStatus::Available {
                return Err(PortfolioError::InvalidState(
                    "certificate is not available for verification",
                ));
            }

            cert.status = CertificateStatus::Verified;
            cert.verified_at = Some(timestamp);
            let updated = cert.clone();
            let amount = cert.amount;
            entry.portfolio.recompute_totals();
            self.persist_user(&user_id, entry);
            (updated, amount)
        };

        self.record_activity(Activity {
            id: Uuid::new_v4(),
            user_id,
            timestamp,
            activity_type: ActivityType::Verification,
            certificate_id: Some(certificate_id),
            seller_id: None,
            amount: Some(amount),
            price: None,
            total_value: None,
            details: Some(format!("Verified {amount} tons EUA certificate")),
        });

        Ok(updated)
    }

    /// Surrender a verified EUA certificate against the emissions
    /// obligation. Removes it from the portfolio for good.
    pub async fn surrender(
        &self,
        user_id: Uuid,
        certificate_id: Uuid,
    ) -> Result<Co2Emissions, PortfolioError> {
        self.ensure_loaded(user_id)?;
        self.check_certificate(
            user_id,
            certificate_id,
            CertificateType::Eua,
            CertificateStatus::Verified,
            "only verified EUA certificates can be surrendered",
        )?;

        tokio::time::sleep(std::time::Duration::from_millis(SURRENDER_ROUNDTRIP_MS)).await;

        let timestamp = Utc::now();
        let (emissions, amount) = {
            let mut state = self.state.write();
            let entry = state.get_mut(&user_id).ok_or(PortfolioError::UserNotFound)?;
            let pos = entry
                .portfolio
                .certificates
                .iter()
                .position(|c| c.id == certificate_id)
                .ok_or(PortfolioError::CertificateNotFound)?;

            if entry.portfolio.certificates[pos].status != CertificateStatus::Verified {
                return Err(PortfolioError::InvalidState(
                    "certificate is not verified for surrender",
                ));
            }

            let cert = entry.portfolio.certificates.remove(pos);
            entry.emissions.record_surrender(cert.amount);
            entry.portfolio.recompute_totals();
            self.persist_user(&user_id, entry);
            (entry.emissions, cert.amount)
        };

        self.record_activity(Activity {
            id: Uuid::new_v4(),
            user_id,
            timestamp,
            activity_type: ActivityType::Surrender,
            certificate_id: Some(certificate_id),
            seller_id: None,
            amount: Some(amount),
            price: None,
            total_value: None,
            details: Some(format!(
                "Surrendered {amount} tons EUA certificate for emissions compliance"
            )),
        });

        Ok(emissions)
    }

    /// Promote every conversion whose window elapsed by `now`.
    /// Returns the number of completed conversions.
    pub fn run_conversion_pass(&self, now: DateTime<Utc>) -> usize {
        let deadline = ChronoDuration::minutes(CONVERSION_DURATION_MINS);
        let mut completed: Vec<Activity> = Vec::new();

        {
            let mut state = self.state.write();
            for (user_id, entry) in state.iter_mut() {
                let mut changed = false;
                for cert in entry.portfolio.certificates.iter_mut() {
                    let due = cert.status == CertificateStatus::Converting
                        && cert
                            .conversion_started_at
                            .map(|started| started + deadline <= now)
                            .unwrap_or(false);
                    if !due {
                        continue;
                    }

                    cert.certificate_type = CertificateType::Eua;
                    cert.status = CertificateStatus::Available;
                    cert.conversion_completed_at = Some(now);
                    changed = true;

                    completed.push(Activity {
                        id: Uuid::new_v4(),
                        user_id: *user_id,
                        timestamp: now,
                        activity_type: ActivityType::ConversionComplete,
                        certificate_id: Some(cert.id),
                        seller_id: None,
                        amount: Some(cert.amount),
                        price: None,
                        total_value: None,
                        details: Some(format!(
                            "Completed conversion of {} tons CEA to EUA certificate",
                            cert.amount
                        )),
                    });
                }

                if changed {
                    entry.portfolio.recompute_totals();
                    self.persist_user(user_id, entry);
                }
            }
        }

        let count = completed.len();
        for activity in completed {
            self.record_activity(activity);
        }

        if count > 0 {
            debug!(completed = count, "conversions promoted");
        }
        count
    }

    pub fn portfolio(&self, user_id: Uuid) -> Result<Portfolio, PortfolioError> {
        self.ensure_loaded(user_id)?;
        Ok(self
            .state
            .read()
            .get(&user_id)
            .map(|s| s.portfolio.clone())
            .unwrap_or_default())
    }

    pub fn transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, PortfolioError> {
        self.ensure_loaded(user_id)?;
        Ok(self
            .state
            .read()
            .get(&user_id)
            .map(|s| s.transactions.clone())
            .unwrap_or_default())
    }

    pub fn emissions(&self, user_id: Uuid) -> Result<Co2Emissions, PortfolioError> {
        self.ensure_loaded(user_id)?;
        Ok(self
            .state
            .read()
            .get(&user_id)
            .map(|s| s.emissions)
            .unwrap_or_default())
    }

    /// The user's slice of the activity log, newest first.
    pub fn activity_for(&self, user_id: Uuid, limit: usize) -> Vec<Activity> {
        self.activity
            .read()
            .iter()
            .filter(|a| a.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn ensure_loaded(&self, user_id: Uuid) -> Result<(), PortfolioError> {
        if self.state.read().contains_key(&user_id) {
            return Ok(());
        }

        let mut loaded = UserState {
            portfolio: self
                .store
                .load_portfolio(&user_id)
                .map_err(PortfolioError::Storage)?
                .unwrap_or_default(),
            transactions: self
                .store
                .load_transactions(&user_id)
                .map_err(PortfolioError::Storage)?
                .unwrap_or_default(),
            emissions: self
                .store
                .load_emissions(&user_id)
                .map_err(PortfolioError::Storage)?
                .unwrap_or_default(),
        };
        loaded.portfolio.recompute_totals();

        self.state.write().entry(user_id).or_insert(loaded);
        Ok(())
    }

    // Persistence is best-effort: the in-memory state is authoritative and
    // the next mutation rewrites the same blobs anyway.
    fn persist_user(&self, user_id: &Uuid, entry: &UserState) {
        if let Err(e) = self.store.save_portfolio(user_id, &entry.portfolio) {
            warn!(user = %user_id, error = %e, "failed to persist portfolio");
        }
        if let Err(e) = self.store.save_transactions(user_id, &entry.transactions) {
            warn!(user = %user_id, error = %e, "failed to persist transactions");
        }
        if let Err(e) = self.store.save_emissions(user_id, &entry.emissions) {
            warn!(user = %user_id, error = %e, "failed to persist emissions");
        }
    }

    fn record_activity(&self, activity: Activity) {
        let mut log = self.activity.write();
        log.insert(0, activity);
        if let Err(e) = self.store.save_activity(&log) {
            warn!(error = %e, "failed to persist activity history");
        }
    }

    fn check_certificate(
        &self,
        user_id: Uuid,
        certificate_id: Uuid,
        expected_type: CertificateType,
        expected_status: CertificateStatus,
        message: &'static str,
    ) -> Result<(), PortfolioError> {
        let state = self.state.read();
        let entry = state.get(&user_id).ok_or(PortfolioError::UserNotFound)?;
        let cert = entry
            .portfolio
            .certificates
            .iter()
            .find(|c| c.id == certificate_id)
            .ok_or(PortfolioError::CertificateNotFound)?;

        if cert.certificate_type != expected_type || cert.status != expected_status {
            return Err(PortfolioError::InvalidState(message));
        }
        Ok(())
    }
}

/// Background ticker promoting finished conversions.
pub fn spawn_conversion_ticker(
    manager: Arc<PortfolioManager>,
    tick: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        loop {
            ticker.tick().await;
            manager.run_conversion_pass(Utc::now());
        }
    })
}

/// Mock market-wide activity from the last six months, newest first.
/// Gives the history view something to show before the user trades.
fn seed_activity_history<R: Rng>(rng: &mut R) -> Vec<Activity> {
    let now = Utc::now();
    let mut entries: Vec<Activity> = (0..50)
        .map(|_| {
            let activity_type = match rng.gen_range(0..5) {
                0 => ActivityType::Purchase,
                1 => ActivityType::ConversionStart,
                2 => ActivityType::ConversionComplete,
                3 => ActivityType::Verification,
                _ => ActivityType::Surrender,
            };
            let is_purchase = activity_type == ActivityType::Purchase;
            let seller = &SELLERS[rng.gen_range(0..SELLERS.len())];
            let amount = rng.gen_range(100..5100);
            let timestamp = now - ChronoDuration::seconds(rng.gen_range(0..180 * 24 * 3600));

            Activity {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                timestamp,
                activity_type,
                certificate_id: Some(Uuid::new_v4()),
                seller_id: is_purchase.then(|| seller.id.clone()),
                amount: Some(amount),
                price: is_purchase.then(|| round2(rng.gen_range(40.0..50.0))),
                total_value: is_purchase.then(|| round2(rng.gen_range(10_000.0..510_000.0))),
                details: None,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
