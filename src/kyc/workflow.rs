//! The onboarding workflow as a pure state descriptor.
//!
//! Navigation between the five client steps is free; only concrete actions
//! move the persisted step, and only forward. The final-submission gate is
//! evaluated here, transport-free, so the API layer and the tests share
//! one source of truth.

use super::models::{DocumentType, KycDocument, WorkflowStep};

/// The client-facing steps in order.
pub const CLIENT_STEPS: [WorkflowStep; 5] = [
    WorkflowStep::DocumentCollection,
    WorkflowStep::EuEtsVerification,
    WorkflowStep::SuitabilityAssessment,
    WorkflowStep::AppropriatenessAssessment,
    WorkflowStep::FinalReview,
];

/// Document types that must each have at least one upload before the
/// dossier can be submitted.
pub const REQUIRED_DOCUMENTS: [DocumentType; 5] = [
    DocumentType::CompanyRegistration,
    DocumentType::FinancialStatement,
    DocumentType::TaxCertificate,
    DocumentType::EuEtsProof,
    DocumentType::PowerOfAttorney,
];

/// Actions that may advance the persisted workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    /// Onboarding (re)registered; resets to document collection.
    Registered,
    /// All required document types now have at least one upload.
    DocumentsComplete,
    /// Registry account verified successfully.
    RegistryVerified,
    SuitabilitySubmitted,
    AppropriatenessSubmitted,
    /// Final dossier submitted for review.
    Submitted,
}

/// Ordinal of a step within the linear flow (back-office states included,
/// so `advance` never moves a reviewed dossier backwards).
fn step_index(step: WorkflowStep) -> usize {
    match step {
        WorkflowStep::DocumentCollection => 0,
        WorkflowStep::EuEtsVerification => 1,
        WorkflowStep::SuitabilityAssessment => 2,
        WorkflowStep::AppropriatenessAssessment => 3,
        WorkflowStep::FinalReview => 4,
        WorkflowStep::IdentityVerification => 5,
        WorkflowStep::Approved => 6,
        WorkflowStep::Rejected => 6,
    }
}

/// Compute the next persisted step. Registration resets the flow; every
/// other action moves forward at most, never back.
pub fn advance(current: WorkflowStep, action: WorkflowAction) -> WorkflowStep {
    let target = match action {
        WorkflowAction::Registered => return WorkflowStep::DocumentCollection,
        WorkflowAction::DocumentsComplete => WorkflowStep::EuEtsVerification,
        WorkflowAction::RegistryVerified => WorkflowStep::SuitabilityAssessment,
        WorkflowAction::SuitabilitySubmitted => WorkflowStep::AppropriatenessAssessment,
        WorkflowAction::AppropriatenessSubmitted => WorkflowStep::FinalReview,
        WorkflowAction::Submitted => WorkflowStep::IdentityVerification,
    };

    if step_index(target) > step_index(current) {
        target
    } else {
        current
    }
}

/// Required document types with no upload yet.
pub fn missing_documents(documents: &[KycDocument]) -> Vec<DocumentType> {
    REQUIRED_DOCUMENTS
        .iter()
        .copied()
        .filter(|required| !documents.iter().any(|d| d.document_type == *required))
        .collect()
}

pub fn has_all_required_documents(documents: &[KycDocument]) -> bool {
    missing_documents(documents).is_empty()
}

/// Evaluation of the final-submission gate.
#[derive(Debug, Clone)]
pub struct SubmissionGate {
    pub allowed: bool,
    pub missing_documents: Vec<DocumentType>,
    pub registry_verified: bool,
}

/// The two hard preconditions for submitting the dossier: every required
/// document type uploaded, and the registry account verified.
pub fn can_submit(documents: &[KycDocument], registry_verified: bool) -> SubmissionGate {
    let missing = missing_documents(documents);
    SubmissionGate {
        allowed: missing.is_empty() && registry_verified,
        missing_documents: missing,
        registry_verified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kyc::models::VerificationStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn doc(document_type: DocumentType) -> KycDocument {
        KycDocument {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            document_type,
            file_name: "file.pdf".to_string(),
            file_size: 1024,
            mime_type: "application/pdf".to_string(),
            verification_status: VerificationStatus::Pending,
            uploaded_at: Utc::now(),
        }
    }

    fn all_required_docs() -> Vec<KycDocument> {
        REQUIRED_DOCUMENTS.iter().map(|t| doc(*t)).collect()
    }

    #[test]
    fn test_submission_blocked_without_documents() {
        let gate = can_submit(&[], true);
        assert!(!gate.allowed);
        assert_eq!(gate.missing_documents.len(), REQUIRED_DOCUMENTS.len());
    }

    #[test]
    fn test_submission_blocked_with_one_type_missing() {
        let mut docs = all_required_docs();
        docs.retain(|d| d.document_type != DocumentType::PowerOfAttorney);
        // A duplicate of another type doesn't paper over the hole.
        docs.push(doc(DocumentType::TaxCertificate));

        let gate = can_submit(&docs, true);
        assert!(!gate.allowed);
        assert_eq!(
            gate.missing_documents,
            vec![DocumentType::PowerOfAttorney]
        );
    }

    #[test]
    fn test_submission_blocked_without_registry_verification() {
        let gate = can_submit(&all_required_docs(), false);
        assert!(!gate.allowed);
        assert!(gate.missing_documents.is_empty());
        assert!(!gate.registry_verified);
    }

    #[test]
    fn test_submission_allowed_when_both_preconditions_hold() {
        let gate = can_submit(&all_required_docs(), true);
        assert!(gate.allowed);
    }

    #[test]
    fn test_optional_document_types_do_not_count() {
        let mut docs = all_required_docs();
        docs.push(doc(DocumentType::IdDocument));
        docs.push(doc(DocumentType::AddressProof));

        assert!(has_all_required_documents(&docs));
        docs.retain(|d| d.document_type != DocumentType::EuEtsProof);
        assert!(!has_all_required_documents(&docs));
    }

    #[test]
    fn test_actions_advance_in_order() {
        let mut step = WorkflowStep::DocumentCollection;
        for (action, expected) in [
            (
                WorkflowAction::DocumentsComplete,
                WorkflowStep::EuEtsVerification,
            ),
            (
                WorkflowAction::RegistryVerified,
                WorkflowStep::SuitabilityAssessment,
            ),
            (
                WorkflowAction::SuitabilitySubmitted,
                WorkflowStep::AppropriatenessAssessment,
            ),
            (
                WorkflowAction::AppropriatenessSubmitted,
                WorkflowStep::FinalReview,
            ),
            (
                WorkflowAction::Submitted,
                WorkflowStep::IdentityVerification,
            ),
        ] {
            step = advance(step, action);
            assert_eq!(step, expected);
        }
    }

    #[test]
    fn test_actions_never_regress() {
        // Re-uploading documents while already past that step stays put.
        let step = advance(
            WorkflowStep::FinalReview,
            WorkflowAction::DocumentsComplete,
        );
        assert_eq!(step, WorkflowStep::FinalReview);

        let step = advance(
            WorkflowStep::IdentityVerification,
            WorkflowAction::RegistryVerified,
        );
        assert_eq!(step, WorkflowStep::IdentityVerification);
    }

    #[test]
    fn test_registration_resets_the_flow() {
        let step = advance(WorkflowStep::FinalReview, WorkflowAction::Registered);
        assert_eq!(step, WorkflowStep::DocumentCollection);
    }
}
