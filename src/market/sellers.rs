//! Static roster of simulated market participants.

use lazy_static::lazy_static;
use rand::Rng;

use crate::models::CertificateType;

/// Which instrument(s) a seller quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Cea,
    Eua,
    Both,
}

impl Coverage {
    fn covers(&self, instrument: CertificateType) -> bool {
        match (self, instrument) {
            (Coverage::Both, _) => true,
            (Coverage::Cea, CertificateType::Cea) => true,
            (Coverage::Eua, CertificateType::Eua) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Seller {
    pub id: String,
    pub name: String,
    pub country: String,
    pub coverage: Coverage,
}

impl Seller {
    fn new(id: &str, name: &str, country: &str, coverage: Coverage) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            country: country.to_string(),
            coverage,
        }
    }
}

lazy_static! {
    pub static ref SELLERS: Vec<Seller> = vec![
        Seller::new("S-CHN-1001", "China Carbon Exchange", "China", Coverage::Cea),
        Seller::new("S-CHN-1002", "Beijing Climate Exchange", "China", Coverage::Cea),
        Seller::new("S-CHN-1003", "Shenzhen Energy Group", "China", Coverage::Cea),
        Seller::new("S-EU-2001", "European Carbon Registry", "EU", Coverage::Eua),
        Seller::new("S-DE-2002", "Deutsche Carbon Handel", "Germany", Coverage::Eua),
        Seller::new("S-FR-2003", "Carbone de Paris", "France", Coverage::Eua),
        Seller::new("S-UK-2004", "London Carbon Solutions", "UK", Coverage::Eua),
        Seller::new("S-CH-3001", "Swiss Carbon Alliance", "Switzerland", Coverage::Both),
        Seller::new("S-US-3002", "Global Carbon Fund", "USA", Coverage::Both),
        Seller::new("S-SG-3003", "Singapore Green Finance", "Singapore", Coverage::Both),
    ];
}

/// Pick a random seller eligible for the given instrument.
pub fn random_seller<R: Rng>(instrument: CertificateType, rng: &mut R) -> &'static Seller {
    let eligible: Vec<&Seller> = SELLERS
        .iter()
        .filter(|s| s.coverage.covers(instrument))
        .collect();
    eligible[rng.gen_range(0..eligible.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_seller_respects_coverage() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let seller = random_seller(CertificateType::Cea, &mut rng);
            assert!(seller.coverage.covers(CertificateType::Cea));

            let seller = random_seller(CertificateType::Eua, &mut rng);
            assert!(seller.coverage.covers(CertificateType::Eua));
        }
    }

    #[test]
    fn test_roster_has_dedicated_and_dual_sellers() {
        assert_eq!(SELLERS.len(), 10);
        assert!(SELLERS.iter().any(|s| s.coverage == Coverage::Cea));
        assert!(SELLERS.iter().any(|s| s.coverage == Coverage::Eua));
        assert!(SELLERS.iter().any(|s| s.coverage == Coverage::Both));
    }
}
