//! KYC onboarding endpoints.

use axum::{
    extract::{Multipart, Path, State},
    response::Json,
    Extension,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::{
    auth::Identity,
    kyc::{
        AppropriatenessOutcome, AppropriatenessRequest, EtsAccount, EtsVerification,
        KnowledgeQuestion, KycDocument, KycWorkflow, OnboardingRequest, SubmissionGate,
        SuitabilityOutcome, SuitabilityRequest,
    },
};

#[derive(Serialize)]
pub struct WorkflowResponse {
    pub message: &'static str,
    pub workflow: KycWorkflow,
}

pub async fn post_register(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<OnboardingRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let username = username_for(&state, &identity)?;
    let workflow = state.kyc.register(identity.user_id, &username, &request)?;

    Ok(Json(WorkflowResponse {
        message: "Onboarding started",
        workflow,
    }))
}

/// Combined profile + workflow + submission gate. Returns 404
/// (`KYC_NOT_FOUND`) until onboarding starts; the client treats that as
/// "not started", not as an error.
pub async fn get_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.kyc.status(identity.user_id)?;
    let gate = state.kyc.submission_gate(identity.user_id)?;

    Ok(Json(StatusResponse {
        user: status.user,
        workflow: status.workflow,
        submission: gate_json(&gate),
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub user: crate::kyc::KycProfile,
    pub workflow: KycWorkflow,
    pub submission: Value,
}

#[derive(Serialize)]
pub struct DocumentsResponse {
    pub documents: Vec<KycDocument>,
}

pub async fn get_documents(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    Ok(Json(DocumentsResponse {
        documents: state.kyc.documents(identity.user_id)?,
    }))
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub document: KycDocument,
}

/// Multipart upload: a `file` part plus a `document_type` field. Only the
/// metadata is retained; the simulation has no real document storage.
pub async fn post_document_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file_name: Option<String> = None;
    let mut mime_type = "application/octet-stream".to_string();
    let mut file_size: u64 = 0;
    let mut document_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                if let Some(ct) = field.content_type() {
                    mime_type = ct.to_string();
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?;
                file_size = bytes.len() as u64;
            }
            Some("document_type") => {
                document_type = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("invalid field: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let file_name =
        file_name.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;
    let document_type = document_type
        .ok_or_else(|| ApiError::BadRequest("document_type is required".to_string()))?;

    let username = username_for(&state, &identity)?;
    let document = state.kyc.upload_document(
        identity.user_id,
        &username,
        &document_type,
        &file_name,
        file_size,
        &mime_type,
    )?;

    Ok(Json(UploadResponse { document }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.kyc.delete_document(identity.user_id, document_id)?;
    Ok(Json(json!({ "message": "Document deleted successfully" })))
}

pub async fn post_submit(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    let status = state.kyc.submit(identity.user_id)?;
    Ok(Json(json!({
        "message": "KYC dossier submitted for review",
        "status": status,
    })))
}

#[derive(Serialize)]
pub struct EtsVerifyResponse {
    pub message: &'static str,
    pub verification: EtsVerification,
}

pub async fn post_ets_verify(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(account): Json<EtsAccount>,
) -> Result<Json<EtsVerifyResponse>, ApiError> {
    let verification = state.kyc.verify_ets_account(identity.user_id, &account)?;
    Ok(Json(EtsVerifyResponse {
        message: "EU ETS Registry verification completed",
        verification,
    }))
}

#[derive(Serialize)]
pub struct SuitabilityResponse {
    pub message: &'static str,
    pub assessment: SuitabilityOutcome,
}

pub async fn post_suitability(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<SuitabilityRequest>,
) -> Result<Json<SuitabilityResponse>, ApiError> {
    let assessment = state.kyc.submit_suitability(identity.user_id, &request)?;
    Ok(Json(SuitabilityResponse {
        message: "Suitability assessment submitted",
        assessment,
    }))
}

#[derive(Serialize)]
pub struct AppropriatenessResponse {
    pub message: &'static str,
    pub assessment: AppropriatenessOutcome,
}

pub async fn post_appropriateness(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<AppropriatenessRequest>,
) -> Result<Json<AppropriatenessResponse>, ApiError> {
    let assessment = state
        .kyc
        .submit_appropriateness(identity.user_id, &request)?;
    Ok(Json(AppropriatenessResponse {
        message: "Appropriateness assessment submitted",
        assessment,
    }))
}

#[derive(Serialize)]
pub struct KnowledgeQuestionsResponse {
    pub questions: &'static [KnowledgeQuestion],
}

pub async fn get_knowledge_questions(
    State(state): State<AppState>,
) -> Json<KnowledgeQuestionsResponse> {
    Json(KnowledgeQuestionsResponse {
        questions: state.kyc.knowledge_questions(),
    })
}

fn username_for(state: &AppState, identity: &Identity) -> Result<String, ApiError> {
    let user = state
        .users
        .get_user(&identity.user_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    Ok(user.username)
}

fn gate_json(gate: &SubmissionGate) -> Value {
    let missing: Vec<&str> = gate.missing_documents.iter().map(|d| d.as_str()).collect();
    json!({
        "allowed": gate.allowed,
        "missing_documents": missing,
        "registry_verified": gate.registry_verified,
    })
}
