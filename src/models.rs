use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Certificate instrument types traded on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    /// Chinese emission allowance. Convertible to EUA.
    Cea,
    /// EU emission allowance. Verifiable and surrenderable.
    Eua,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::Cea => "cea",
            CertificateType::Eua => "eua",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cea" => Some(CertificateType::Cea),
            "eua" => Some(CertificateType::Eua),
            _ => None,
        }
    }
}

/// Lifecycle state of an owned certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Available,
    Converting,
    Verified,
}

/// A certificate held in a user's portfolio.
///
/// Created on purchase as `Available`. CEA certificates may enter
/// `Converting` and become EUA after the conversion window elapses.
/// EUA certificates may be `Verified` and then surrendered, which removes
/// them from the portfolio entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub certificate_type: CertificateType,
    /// Tons of CO2 covered.
    pub amount: u32,
    /// EUR per ton at time of purchase.
    pub price: f64,
    pub status: CertificateStatus,
    pub seller: Option<String>,
    pub purchased_at: DateTime<Utc>,
    pub conversion_started_at: Option<DateTime<Utc>>,
    pub conversion_completed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// A standing sell order in the simulated book. Market-wide shared state,
/// mutated only by the offer store's own tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOffer {
    pub id: Uuid,
    pub seller_id: String,
    pub seller_name: String,
    pub certificate_type: CertificateType,
    pub amount: u32,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only purchase record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: String,
    pub certificate_type: CertificateType,
    pub amount: u32,
    pub price: f64,
    pub total_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Kinds of entries in the per-user audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Purchase,
    ConversionStart,
    ConversionComplete,
    Verification,
    Surrender,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Purchase => "purchase",
            ActivityType::ConversionStart => "conversion_start",
            ActivityType::ConversionComplete => "conversion_complete",
            ActivityType::Verification => "verification",
            ActivityType::Surrender => "surrender",
        }
    }
}

/// Append-only audit log entry, persisted newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub activity_type: ActivityType,
    pub certificate_id: Option<Uuid>,
    pub seller_id: Option<String>,
    pub amount: Option<u32>,
    pub price: Option<f64>,
    pub total_value: Option<f64>,
    pub details: Option<String>,
}

/// Per-user emissions obligation counters.
///
/// `remaining = total - surrendered` must hold after every surrender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Co2Emissions {
    pub total: u64,
    pub surrendered: u64,
    pub remaining: u64,
}

impl Default for Co2Emissions {
    fn default() -> Self {
        // 5 million tons baseline obligation for the demo account.
        Self {
            total: 5_000_000,
            surrendered: 0,
            remaining: 5_000_000,
        }
    }
}

impl Co2Emissions {
    pub fn record_surrender(&mut self, amount: u32) {
        self.surrendered += amount as u64;
        self.remaining = self.total.saturating_sub(self.surrendered);
    }
}

/// A user's certificate holdings plus derived totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub certificates: Vec<Certificate>,
    pub total_cea: u64,
    pub total_eua: u64,
    pub converting_cea: u64,
}

impl Portfolio {
    /// Recompute the derived totals from the certificate list.
    pub fn recompute_totals(&mut self) {
        self.total_cea = self
            .certificates
            .iter()
            .filter(|c| {
                c.certificate_type == CertificateType::Cea
                    && c.status == CertificateStatus::Available
            })
            .map(|c| c.amount as u64)
            .sum();
        self.total_eua = self
            .certificates
            .iter()
            .filter(|c| {
                c.certificate_type == CertificateType::Eua
                    && c.status == CertificateStatus::Available
            })
            .map(|c| c.amount as u64)
            .sum();
        self.converting_cea = self
            .certificates
            .iter()
            .filter(|c| c.status == CertificateStatus::Converting)
            .map(|c| c.amount as u64)
            .sum();
    }
}

/// One day in the market price history series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryDay {
    pub date: chrono::NaiveDate,
    pub price_cea: f64,
    pub price_eua: f64,
}

/// Display-only market rollups served to the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketStatistics {
    pub average_price_cea: f64,
    pub average_price_eua: f64,
    pub volume_cea: u64,
    pub volume_eua: u64,
    pub price_history: Vec<PriceHistoryDay>,
}

/// Events pushed to connected WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsServerEvent {
    PriceUpdate {
        instrument: CertificateType,
        price: f64,
        change_24h: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    OffersChanged {
        offer_count: usize,
    },
}

/// Application configuration.
///
/// Resolved from (lowest to highest precedence) built-in defaults, an
/// optional TOML config file, then environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    /// Base URL of the external reference price API.
    pub price_api_url: String,
    pub price_poll_secs: u64,
    pub reconcile_secs: u64,
    pub liveliness_secs: u64,
    pub conversion_poll_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            data_dir: ".".to_string(),
            price_api_url: "http://localhost:8080/api".to_string(),
            price_poll_secs: 300,
            reconcile_secs: 5,
            liveliness_secs: 30,
            conversion_poll_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(v) = std::env::var("PORT") {
            config.port = v.parse().unwrap_or(config.port);
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            config.data_dir = v;
        }
        if let Ok(v) = std::env::var("PRICE_API_URL") {
            config.price_api_url = v;
        }
        if let Ok(v) = std::env::var("PRICE_POLL_SECS") {
            config.price_poll_secs = v.parse().unwrap_or(config.price_poll_secs);
        }
        if let Ok(v) = std::env::var("RECONCILE_SECS") {
            config.reconcile_secs = v.parse().unwrap_or(config.reconcile_secs);
        }
        if let Ok(v) = std::env::var("LIVELINESS_SECS") {
            config.liveliness_secs = v.parse().unwrap_or(config.liveliness_secs);
        }
        if let Ok(v) = std::env::var("CONVERSION_POLL_SECS") {
            config.conversion_poll_secs = v.parse().unwrap_or(config.conversion_poll_secs);
        }

        Ok(config)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_type_roundtrip() {
        assert_eq!(CertificateType::from_str("CEA"), Some(CertificateType::Cea));
        assert_eq!(CertificateType::from_str("eua"), Some(CertificateType::Eua));
        assert_eq!(CertificateType::from_str("btc"), None);

        let json = serde_json::to_string(&CertificateType::Cea).unwrap();
        assert_eq!(json, r#""cea""#);
    }

    #[test]
    fn test_emissions_invariant_after_surrender() {
        let mut emissions = Co2Emissions::default();
        emissions.record_surrender(2500);
        emissions.record_surrender(1500);

        assert_eq!(emissions.surrendered, 4000);
        assert_eq!(emissions.remaining, emissions.total - emissions.surrendered);
    }

    #[test]
    fn test_portfolio_totals() {
        let mut portfolio = Portfolio::default();
        let base = Certificate {
            id: Uuid::new_v4(),
            certificate_type: CertificateType::Cea,
            amount: 1000,
            price: 40.0,
            status: CertificateStatus::Available,
            seller: None,
            purchased_at: Utc::now(),
            conversion_started_at: None,
            conversion_completed_at: None,
            verified_at: None,
        };
        portfolio.certificates.push(base.clone());
        portfolio.certificates.push(Certificate {
            id: Uuid::new_v4(),
            certificate_type: CertificateType::Eua,
            amount: 500,
            ..base.clone()
        });
        portfolio.certificates.push(Certificate {
            id: Uuid::new_v4(),
            status: CertificateStatus::Converting,
            amount: 250,
            ..base
        });

        portfolio.recompute_totals();
        assert_eq!(portfolio.total_cea, 1000);
        assert_eq!(portfolio.total_eua, 500);
        assert_eq!(portfolio.converting_cea, 250);
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str("port = 9000\nprice_poll_secs = 60").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.price_poll_secs, 60);
        // Unspecified fields fall back to defaults
        assert_eq!(config.reconcile_secs, 5);
    }
}
