//! KYC onboarding: workflow state machine, documents, registry
//! verification, and assessments.

pub mod assessment;
pub mod models;
pub mod registry;
pub mod store;
pub mod workflow;

pub use models::*;
pub use registry::EtsRegistryVerifier;
pub use store::KycStore;
pub use workflow::{can_submit, SubmissionGate, WorkflowAction, REQUIRED_DOCUMENTS};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::info;
use uuid::Uuid;

const MAX_DOCUMENT_SIZE: u64 = 16 * 1024 * 1024; // 16 MB
const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "png", "jpg", "jpeg", "doc", "docx"];
const STATUS_CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum KycError {
    /// Onboarding has not started; the status endpoint maps this to 404.
    NotStarted,
    InvalidRequest(String),
    DocumentNotFound,
    InvalidDocumentType(String),
    InvalidFile(String),
    MissingDocuments(Vec<DocumentType>),
    RegistryNotVerified,
    Storage(anyhow::Error),
}

impl std::fmt::Display for KycError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KycError::NotStarted => write!(f, "KYC onboarding not started"),
            KycError::InvalidRequest(msg) => write!(f, "{msg}"),
            KycError::DocumentNotFound => write!(f, "document not found"),
            KycError::InvalidDocumentType(t) => write!(f, "invalid document type: {t}"),
            KycError::InvalidFile(msg) => write!(f, "invalid file: {msg}"),
            KycError::MissingDocuments(missing) => {
                let names: Vec<&str> = missing.iter().map(|d| d.as_str()).collect();
                write!(f, "missing required documents: {}", names.join(", "))
            }
            KycError::RegistryNotVerified => {
                write!(f, "EU ETS registry account is not verified")
            }
            KycError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for KycError {}

impl From<anyhow::Error> for KycError {
    fn from(e: anyhow::Error) -> Self {
        KycError::Storage(e)
    }
}

/// Combined profile + workflow view returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct KycStatusView {
    pub user: KycProfile,
    pub workflow: KycWorkflow,
}

/// KYC orchestration service. Owns its own short-TTL status cache so
/// polling clients inside the window share one database read.
pub struct KycService {
    store: KycStore,
    status_cache: Mutex<HashMap<Uuid, (KycStatusView, Instant)>>,
}

impl KycService {
    pub fn new(store: KycStore) -> Self {
        Self {
            store,
            status_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) onboarding with company details.
    pub fn register(
        &self,
        user_id: Uuid,
        username: &str,
        request: &OnboardingRequest,
    ) -> Result<KycWorkflow, KycError> {
        if request.company_name.trim().is_empty()
            || request.address.trim().is_empty()
            || request.contact_person.trim().is_empty()
            || request.phone.trim().is_empty()
        {
            return Err(KycError::InvalidRequest(
                "all registration fields are required".to_string(),
            ));
        }

        self.store
            .ensure_profile(&user_id, username, &placeholder_email(username))?;
        self.store.update_contact_details(
            &user_id,
            request.company_name.trim(),
            request.address.trim(),
            request.contact_person.trim(),
            request.phone.trim(),
        )?;

        // Registration (re)starts the flow at document collection.
        self.store.ensure_workflow(&user_id)?;
        self.store
            .set_workflow_step(&user_id, WorkflowStep::DocumentCollection)?;
        self.invalidate_status(&user_id);

        info!(user = %user_id, "onboarding started");
        self.store
            .get_workflow(&user_id)?
            .ok_or(KycError::NotStarted)
    }

    /// Current status, cached for a few seconds. `NotStarted` when no
    /// workflow exists yet.
    pub fn status(&self, user_id: Uuid) -> Result<KycStatusView, KycError> {
        {
            let cache = self.status_cache.lock();
            if let Some((view, fetched_at)) = cache.get(&user_id) {
                if fetched_at.elapsed() < STATUS_CACHE_TTL {
                    return Ok(view.clone());
                }
            }
        }

        let profile = self.store.get_profile(&user_id)?.ok_or(KycError::NotStarted)?;
        let workflow = self.store.get_workflow(&user_id)?.ok_or(KycError::NotStarted)?;

        let view = KycStatusView {
            user: profile,
            workflow,
        };
        self.status_cache
            .lock()
            .insert(user_id, (view.clone(), Instant::now()));
        Ok(view)
    }

    /// Record an uploaded document. Creates profile and workflow on the
    /// fly so uploads may precede formal registration.
    pub fn upload_document(
        &self,
        user_id: Uuid,
        username: &str,
        document_type: &str,
        file_name: &str,
        file_size: u64,
        mime_type: &str,
    ) -> Result<KycDocument, KycError> {
        let document_type = DocumentType::from_str(document_type)
            .ok_or_else(|| KycError::InvalidDocumentType(document_type.to_string()))?;
        validate_file(file_name, file_size)?;

        self.store
            .ensure_profile(&user_id, username, &placeholder_email(username))?;
        let workflow = self.store.ensure_workflow(&user_id)?;

        let document = KycDocument {
            id: Uuid::new_v4(),
            user_id,
            document_type,
            file_name: file_name.to_string(),
            file_size,
            mime_type: mime_type.to_string(),
            verification_status: VerificationStatus::Pending,
            uploaded_at: Utc::now(),
        };
        self.store.insert_document(&document)?;

        // Completing the required set advances the persisted step.
        let documents = self.store.list_documents(&user_id)?;
        if workflow::has_all_required_documents(&documents) {
            let next = workflow::advance(workflow.current_step, WorkflowAction::DocumentsComplete);
            self.store.set_workflow_step(&user_id, next)?;
        }
        self.invalidate_status(&user_id);

        Ok(document)
    }

    pub fn documents(&self, user_id: Uuid) -> Result<Vec<KycDocument>, KycError> {
        Ok(self.store.list_documents(&user_id)?)
    }

    pub fn delete_document(&self, user_id: Uuid, document_id: Uuid) -> Result<(), KycError> {
        if !self.store.delete_document(&user_id, &document_id)? {
            return Err(KycError::DocumentNotFound);
        }
        self.invalidate_status(&user_id);
        Ok(())
    }

    /// Verify the EU ETS registry account. Success persists the account
    /// and advances the workflow.
    pub fn verify_ets_account(
        &self,
        user_id: Uuid,
        account: &EtsAccount,
    ) -> Result<EtsVerification, KycError> {
        let workflow = self.store.get_workflow(&user_id)?.ok_or(KycError::NotStarted)?;

        let verification =
            EtsRegistryVerifier::verify(&account.account_number, &account.country);

        if verification.verified {
            self.store.set_registry_verified(
                &user_id,
                &verification.account_number,
                verification.country.as_deref().unwrap_or_default(),
                verification.verified_at,
            )?;
            let next = workflow::advance(workflow.current_step, WorkflowAction::RegistryVerified);
            self.store.set_workflow_step(&user_id, next)?;
            self.invalidate_status(&user_id);
        }

        Ok(verification)
    }

    pub fn submit_suitability(
        &self,
        user_id: Uuid,
        request: &SuitabilityRequest,
    ) -> Result<SuitabilityOutcome, KycError> {
        let workflow = self.store.get_workflow(&user_id)?.ok_or(KycError::NotStarted)?;

        let outcome = assessment::assess_suitability(request);
        self.store.set_suitability(&user_id, &outcome)?;
        let next = workflow::advance(workflow.current_step, WorkflowAction::SuitabilitySubmitted);
        self.store.set_workflow_step(&user_id, next)?;
        self.invalidate_status(&user_id);

        Ok(outcome)
    }

    pub fn submit_appropriateness(
        &self,
        user_id: Uuid,
        request: &AppropriatenessRequest,
    ) -> Result<AppropriatenessOutcome, KycError> {
        let workflow = self.store.get_workflow(&user_id)?.ok_or(KycError::NotStarted)?;

        let outcome = assessment::assess_appropriateness(request);
        self.store.set_appropriateness(&user_id, &outcome)?;
        let next = workflow::advance(
            workflow.current_step,
            WorkflowAction::AppropriatenessSubmitted,
        );
        self.store.set_workflow_step(&user_id, next)?;
        self.invalidate_status(&user_id);

        Ok(outcome)
    }

    /// The gate the client uses to enable/disable the submit button.
    pub fn submission_gate(&self, user_id: Uuid) -> Result<SubmissionGate, KycError> {
        let profile = self.store.get_profile(&user_id)?.ok_or(KycError::NotStarted)?;
        let documents = self.store.list_documents(&user_id)?;
        Ok(workflow::can_submit(
            &documents,
            profile.eu_ets_registry_verified,
        ))
    }

    /// Submit the dossier for review. Enforces the same two preconditions
    /// the client gates on.
    pub fn submit(&self, user_id: Uuid) -> Result<KycStatus, KycError> {
        let profile = self.store.get_profile(&user_id)?.ok_or(KycError::NotStarted)?;
        let workflow = self.store.get_workflow(&user_id)?.ok_or(KycError::NotStarted)?;
        let documents = self.store.list_documents(&user_id)?;

        let gate = workflow::can_submit(&documents, profile.eu_ets_registry_verified);
        if !gate.missing_documents.is_empty() {
            return Err(KycError::MissingDocuments(gate.missing_documents));
        }
        if !gate.registry_verified {
            return Err(KycError::RegistryNotVerified);
        }

        self.store.mark_submitted(&user_id, Utc::now())?;
        let next = workflow::advance(workflow.current_step, WorkflowAction::Submitted);
        self.store.set_workflow_step(&user_id, next)?;
        self.invalidate_status(&user_id);

        info!(user = %user_id, "KYC dossier submitted for review");
        Ok(KycStatus::InReview)
    }

    pub fn knowledge_questions(&self) -> &'static [KnowledgeQuestion] {
        &assessment::KNOWLEDGE_QUESTIONS
    }

    /// All profiles, for the admin console.
    pub fn list_profiles(&self) -> Result<Vec<KycProfile>, KycError> {
        Ok(self.store.list_profiles()?)
    }

    fn invalidate_status(&self, user_id: &Uuid) {
        self.status_cache.lock().remove(user_id);
    }
}

fn validate_file(file_name: &str, file_size: u64) -> Result<(), KycError> {
    if file_size == 0 {
        return Err(KycError::InvalidFile("file is empty".to_string()));
    }
    if file_size > MAX_DOCUMENT_SIZE {
        return Err(KycError::InvalidFile(format!(
            "file exceeds maximum size of {} MB",
            MAX_DOCUMENT_SIZE / (1024 * 1024)
        )));
    }

    let extension = file_name
        .rsplit('.')
        .next()
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    if file_name.contains('.') && ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(KycError::InvalidFile(format!(
            "unsupported file type, allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

fn placeholder_email(username: &str) -> String {
    format!("{}@nihao-carbon.com", username.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn service() -> (KycService, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = KycStore::new(temp.path().to_str().unwrap()).unwrap();
        (KycService::new(store), temp)
    }

    fn registration() -> OnboardingRequest {
        OnboardingRequest {
            company_name: "Acme Industrie GmbH".to_string(),
            address: "Marktplatz 1, Berlin".to_string(),
            contact_person: "V. Ionescu".to_string(),
            phone: "+40 721 000 000".to_string(),
        }
    }

    fn upload_all_required(service: &KycService, user: Uuid) {
        for doc_type in REQUIRED_DOCUMENTS {
            service
                .upload_document(
                    user,
                    "Victor",
                    doc_type.as_str(),
                    "document.pdf",
                    4096,
                    "application/pdf",
                )
                .unwrap();
        }
    }

    #[test]
    fn test_status_is_not_started_before_registration() {
        let (service, _temp) = service();
        assert!(matches!(
            service.status(Uuid::new_v4()),
            Err(KycError::NotStarted)
        ));
    }

    #[test]
    fn test_register_creates_workflow_at_document_collection() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();

        let workflow = service.register(user, "Victor", &registration()).unwrap();
        assert_eq!(workflow.current_step, WorkflowStep::DocumentCollection);

        let status = service.status(user).unwrap();
        assert_eq!(status.user.company_name.as_deref(), Some("Acme Industrie GmbH"));
        assert_eq!(status.user.kyc_status, KycStatus::Pending);
    }

    #[test]
    fn test_submit_blocked_until_documents_and_registry() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();
        service.register(user, "Victor", &registration()).unwrap();

        // No documents at all.
        let err = service.submit(user).unwrap_err();
        assert!(matches!(err, KycError::MissingDocuments(ref m) if m.len() == 5));

        // All documents, registry unverified.
        upload_all_required(&service, user);
        let err = service.submit(user).unwrap_err();
        assert!(matches!(err, KycError::RegistryNotVerified));

        // Registry verified: submission goes through.
        let verification = service
            .verify_ets_account(
                user,
                &EtsAccount {
                    account_number: "EU12345678".to_string(),
                    country: "DE".to_string(),
                },
            )
            .unwrap();
        assert!(verification.verified);

        let status = service.submit(user).unwrap();
        assert_eq!(status, KycStatus::InReview);

        let view = service.status(user).unwrap();
        assert_eq!(view.user.kyc_status, KycStatus::InReview);
        assert_eq!(
            view.workflow.current_step,
            WorkflowStep::IdentityVerification
        );
    }

    #[test]
    fn test_deleting_a_required_document_reblocks_submission() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();
        service.register(user, "Victor", &registration()).unwrap();
        upload_all_required(&service, user);
        service
            .verify_ets_account(
                user,
                &EtsAccount {
                    account_number: "EU12345678".to_string(),
                    country: "DE".to_string(),
                },
            )
            .unwrap();

        let docs = service.documents(user).unwrap();
        let tax_doc = docs
            .iter()
            .find(|d| d.document_type == DocumentType::TaxCertificate)
            .unwrap();
        service.delete_document(user, tax_doc.id).unwrap();

        let gate = service.submission_gate(user).unwrap();
        assert!(!gate.allowed);
        assert_eq!(gate.missing_documents, vec![DocumentType::TaxCertificate]);

        let err = service.submit(user).unwrap_err();
        assert!(matches!(err, KycError::MissingDocuments(_)));
    }

    #[test]
    fn test_document_completion_advances_workflow() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();
        service.register(user, "Victor", &registration()).unwrap();

        upload_all_required(&service, user);
        let status = service.status(user).unwrap();
        assert_eq!(
            status.workflow.current_step,
            WorkflowStep::EuEtsVerification
        );
    }

    #[test]
    fn test_upload_before_registration_bootstraps_profile() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();

        service
            .upload_document(
                user,
                "Victor",
                "company_registration",
                "registration.pdf",
                1024,
                "application/pdf",
            )
            .unwrap();

        let status = service.status(user).unwrap();
        assert_eq!(
            status.workflow.current_step,
            WorkflowStep::DocumentCollection
        );
    }

    #[test]
    fn test_file_validation() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();

        let too_big = service.upload_document(
            user,
            "Victor",
            "tax_certificate",
            "huge.pdf",
            MAX_DOCUMENT_SIZE + 1,
            "application/pdf",
        );
        assert!(matches!(too_big, Err(KycError::InvalidFile(_))));

        let bad_ext = service.upload_document(
            user,
            "Victor",
            "tax_certificate",
            "malware.exe",
            1024,
            "application/octet-stream",
        );
        assert!(matches!(bad_ext, Err(KycError::InvalidFile(_))));

        let bad_type = service.upload_document(
            user,
            "Victor",
            "selfie",
            "photo.png",
            1024,
            "image/png",
        );
        assert!(matches!(bad_type, Err(KycError::InvalidDocumentType(_))));
    }

    #[test]
    fn test_failed_registry_verification_does_not_advance() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();
        service.register(user, "Victor", &registration()).unwrap();

        let verification = service
            .verify_ets_account(
                user,
                &EtsAccount {
                    account_number: "bad!".to_string(),
                    country: "DE".to_string(),
                },
            )
            .unwrap();
        assert!(!verification.verified);

        let status = service.status(user).unwrap();
        assert!(!status.user.eu_ets_registry_verified);
        assert_eq!(
            status.workflow.current_step,
            WorkflowStep::DocumentCollection
        );
    }

    #[test]
    fn test_assessments_advance_workflow() {
        let (service, _temp) = service();
        let user = Uuid::new_v4();
        service.register(user, "Victor", &registration()).unwrap();
        upload_all_required(&service, user);
        service
            .verify_ets_account(
                user,
                &EtsAccount {
                    account_number: "EU12345678".to_string(),
                    country: "DE".to_string(),
                },
            )
            .unwrap();

        service
            .submit_suitability(
                user,
                &SuitabilityRequest {
                    objectives: TradingObjective::Compliance,
                    risk_tolerance: RiskTolerance::Moderate,
                    experience: ExperienceLevel::Intermediate,
                    knowledge_score: 80.0,
                },
            )
            .unwrap();
        assert_eq!(
            service.status(user).unwrap().workflow.current_step,
            WorkflowStep::AppropriatenessAssessment
        );

        service
            .submit_appropriateness(
                user,
                &AppropriatenessRequest {
                    knowledge_test: KnowledgeTestResult {
                        correct_answers: 4,
                        total_questions: 5,
                    },
                    experience_declaration: ExperienceDeclaration {
                        has_financial_experience: true,
                        ..Default::default()
                    },
                },
            )
            .unwrap();
        assert_eq!(
            service.status(user).unwrap().workflow.current_step,
            WorkflowStep::FinalReview
        );
    }
}
