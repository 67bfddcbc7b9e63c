//! KYC data structures: profile, workflow, documents, assessments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    NeedsUpdate,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::InReview => "in_review",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
            KycStatus::NeedsUpdate => "needs_update",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(KycStatus::Pending),
            "in_review" => Some(KycStatus::InReview),
            "approved" => Some(KycStatus::Approved),
            "rejected" => Some(KycStatus::Rejected),
            "needs_update" => Some(KycStatus::NeedsUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// Document categories accepted by the onboarding flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    CompanyRegistration,
    FinancialStatement,
    TaxCertificate,
    EuEtsProof,
    PowerOfAttorney,
    IdDocument,
    AddressProof,
    BeneficialOwnership,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::CompanyRegistration => "company_registration",
            DocumentType::FinancialStatement => "financial_statement",
            DocumentType::TaxCertificate => "tax_certificate",
            DocumentType::EuEtsProof => "eu_ets_proof",
            DocumentType::PowerOfAttorney => "power_of_attorney",
            DocumentType::IdDocument => "id_document",
            DocumentType::AddressProof => "address_proof",
            DocumentType::BeneficialOwnership => "beneficial_ownership",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "company_registration" => Some(DocumentType::CompanyRegistration),
            "financial_statement" => Some(DocumentType::FinancialStatement),
            "tax_certificate" => Some(DocumentType::TaxCertificate),
            "eu_ets_proof" => Some(DocumentType::EuEtsProof),
            "power_of_attorney" => Some(DocumentType::PowerOfAttorney),
            "id_document" => Some(DocumentType::IdDocument),
            "address_proof" => Some(DocumentType::AddressProof),
            "beneficial_ownership" => Some(DocumentType::BeneficialOwnership),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "verified" => Some(VerificationStatus::Verified),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

/// Steps of the onboarding workflow. The first five are the client-facing
/// pages; the rest are back-office states after submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    DocumentCollection,
    EuEtsVerification,
    SuitabilityAssessment,
    AppropriatenessAssessment,
    FinalReview,
    IdentityVerification,
    Approved,
    Rejected,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::DocumentCollection => "document_collection",
            WorkflowStep::EuEtsVerification => "eu_ets_verification",
            WorkflowStep::SuitabilityAssessment => "suitability_assessment",
            WorkflowStep::AppropriatenessAssessment => "appropriateness_assessment",
            WorkflowStep::FinalReview => "final_review",
            WorkflowStep::IdentityVerification => "identity_verification",
            WorkflowStep::Approved => "approved",
            WorkflowStep::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "document_collection" => Some(WorkflowStep::DocumentCollection),
            "eu_ets_verification" => Some(WorkflowStep::EuEtsVerification),
            "suitability_assessment" => Some(WorkflowStep::SuitabilityAssessment),
            "appropriateness_assessment" => Some(WorkflowStep::AppropriatenessAssessment),
            "final_review" => Some(WorkflowStep::FinalReview),
            "identity_verification" => Some(WorkflowStep::IdentityVerification),
            "approved" => Some(WorkflowStep::Approved),
            "rejected" => Some(WorkflowStep::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    InProgress,
    Completed,
    Rejected,
    OnHold,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Rejected => "rejected",
            WorkflowStatus::OnHold => "on_hold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(WorkflowStatus::InProgress),
            "completed" => Some(WorkflowStatus::Completed),
            "rejected" => Some(WorkflowStatus::Rejected),
            "on_hold" => Some(WorkflowStatus::OnHold),
            _ => None,
        }
    }
}

/// Metadata record for one uploaded document. Multiple documents per type
/// are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_type: DocumentType,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub verification_status: VerificationStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Per-user onboarding workflow record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycWorkflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub current_step: WorkflowStep,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// KYC profile attached to a platform user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub company_name: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub kyc_status: KycStatus,
    pub risk_level: RiskLevel,
    pub kyc_submitted_at: Option<DateTime<Utc>>,
    pub eu_ets_registry_account: Option<String>,
    pub eu_ets_registry_country: Option<String>,
    pub eu_ets_registry_verified: bool,
    pub eu_ets_registry_verified_at: Option<DateTime<Utc>>,
    pub suitability_assessment: Option<SuitabilityOutcome>,
    pub appropriateness_assessment: Option<AppropriatenessOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Onboarding registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingRequest {
    pub company_name: String,
    pub address: String,
    pub contact_person: String,
    pub phone: String,
}

/// EU ETS registry account reference.
#[derive(Debug, Clone, Deserialize)]
pub struct EtsAccount {
    pub account_number: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtsAccountStatus {
    Active,
    Inactive,
    Suspended,
    Unknown,
}

/// Result of a registry account check.
#[derive(Debug, Clone, Serialize)]
pub struct EtsVerification {
    pub verified: bool,
    pub account_number: String,
    pub country: Option<String>,
    pub status: EtsAccountStatus,
    pub verified_at: DateTime<Utc>,
    pub verification_method: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingObjective {
    Compliance,
    Hedging,
    Investment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Suitability assessment payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SuitabilityRequest {
    pub objectives: TradingObjective,
    pub risk_tolerance: RiskTolerance,
    pub experience: ExperienceLevel,
    #[serde(default)]
    pub knowledge_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuitabilityLevel {
    Suitable,
    SuitableWithWarnings,
    NotSuitable,
}

/// Stored suitability assessment result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuitabilityOutcome {
    pub suitable: bool,
    pub level: SuitabilityLevel,
    pub score: u32,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeTestResult {
    pub correct_answers: u32,
    pub total_questions: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperienceDeclaration {
    #[serde(default)]
    pub has_traded_carbon_certificates: bool,
    #[serde(default)]
    pub has_traded_similar_products: bool,
    #[serde(default)]
    pub has_financial_experience: bool,
}

/// Appropriateness assessment payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AppropriatenessRequest {
    pub knowledge_test: KnowledgeTestResult,
    pub experience_declaration: ExperienceDeclaration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppropriatenessStatus {
    Approved,
    ApprovedWithEducation,
    NeedsEducation,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    FullAccess,
    LimitedAccess,
    NoAccess,
}

/// Stored appropriateness assessment result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppropriatenessOutcome {
    pub status: AppropriatenessStatus,
    pub level: AccessLevel,
    pub knowledge_score: f64,
    pub has_experience: bool,
    pub recommendations: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

/// One question of the appropriateness knowledge test.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeQuestion {
    pub id: u32,
    pub question: &'static str,
    pub options: [&'static str; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_string_roundtrip() {
        for step in [
            WorkflowStep::DocumentCollection,
            WorkflowStep::EuEtsVerification,
            WorkflowStep::SuitabilityAssessment,
            WorkflowStep::AppropriatenessAssessment,
            WorkflowStep::FinalReview,
            WorkflowStep::IdentityVerification,
        ] {
            assert_eq!(WorkflowStep::from_str(step.as_str()), Some(step));
        }
        assert_eq!(WorkflowStep::from_str("coffee_break"), None);
    }

    #[test]
    fn test_document_type_serde_matches_wire_format() {
        let json = serde_json::to_string(&DocumentType::EuEtsProof).unwrap();
        assert_eq!(json, r#""eu_ets_proof""#);

        let parsed: DocumentType = serde_json::from_str(r#""power_of_attorney""#).unwrap();
        assert_eq!(parsed, DocumentType::PowerOfAttorney);
    }
}
