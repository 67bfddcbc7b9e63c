//! KYC Storage
//! Mission: Persist profiles, workflows, and document metadata with SQLite

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::models::{
    AppropriatenessOutcome, DocumentType, KycDocument, KycProfile, KycStatus, KycWorkflow,
    RiskLevel, SuitabilityOutcome, VerificationStatus, WorkflowStatus, WorkflowStep,
};

pub struct KycStore {
    db_path: String,
}

impl KycStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kyc_profiles (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                email TEXT NOT NULL,
                company_name TEXT,
                address TEXT,
                contact_person TEXT,
                phone TEXT,
                kyc_status TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                kyc_submitted_at TEXT,
                ets_account TEXT,
                ets_country TEXT,
                ets_verified INTEGER NOT NULL DEFAULT 0,
                ets_verified_at TEXT,
                suitability TEXT,
                appropriateness TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kyc_workflows (
                id TEXT PRIMARY KEY,
                user_id TEXT UNIQUE NOT NULL,
                current_step TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                FOREIGN KEY (user_id) REFERENCES kyc_profiles(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kyc_documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                document_type TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                verification_status TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Create a bare profile if none exists (first document upload may
    /// arrive before formal registration).
    pub fn ensure_profile(&self, user_id: &Uuid, username: &str, email: &str) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO kyc_profiles
                (id, username, email, kyc_status, risk_level, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user_id.to_string(),
                username,
                email,
                KycStatus::Pending.as_str(),
                RiskLevel::Low.as_str(),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn update_contact_details(
        &self,
        user_id: &Uuid,
        company_name: &str,
        address: &str,
        contact_person: &str,
        phone: &str,
    ) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        let rows = conn.execute(
            "UPDATE kyc_profiles
             SET company_name = ?1, address = ?2, contact_person = ?3, phone = ?4,
                 kyc_status = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                company_name,
                address,
                contact_person,
                phone,
                KycStatus::Pending.as_str(),
                Utc::now().to_rfc3339(),
                user_id.to_string(),
            ],
        )?;
        if rows == 0 {
            anyhow::bail!("profile not found");
        }
        Ok(())
    }

    pub fn get_profile(&self, user_id: &Uuid) -> Result<Option<KycProfile>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, username, email, company_name, address, contact_person, phone,
                    kyc_status, risk_level, kyc_submitted_at, ets_account, ets_country,
                    ets_verified, ets_verified_at, suitability, appropriateness,
                    created_at, updated_at
             FROM kyc_profiles WHERE id = ?1",
        )?;

        stmt.query_row(params![user_id.to_string()], |row| {
            let suitability: Option<String> = row.get(14)?;
            let appropriateness: Option<String> = row.get(15)?;
            Ok(KycProfile {
                id: parse_uuid(row.get::<_, String>(0)?),
                username: row.get(1)?,
                email: row.get(2)?,
                company_name: row.get(3)?,
                address: row.get(4)?,
                contact_person: row.get(5)?,
                phone: row.get(6)?,
                kyc_status: KycStatus::from_str(&row.get::<_, String>(7)?)
                    .unwrap_or(KycStatus::Pending),
                risk_level: RiskLevel::from_str(&row.get::<_, String>(8)?)
                    .unwrap_or(RiskLevel::Low),
                kyc_submitted_at: parse_datetime(row.get(9)?),
                eu_ets_registry_account: row.get(10)?,
                eu_ets_registry_country: row.get(11)?,
                eu_ets_registry_verified: row.get::<_, i64>(12)? != 0,
                eu_ets_registry_verified_at: parse_datetime(row.get(13)?),
                suitability_assessment: suitability
                    .and_then(|raw| serde_json::from_str::<SuitabilityOutcome>(&raw).ok()),
                appropriateness_assessment: appropriateness
                    .and_then(|raw| serde_json::from_str::<AppropriatenessOutcome>(&raw).ok()),
                created_at: parse_datetime(row.get(16)?).unwrap_or_else(Utc::now),
                updated_at: parse_datetime(row.get(17)?).unwrap_or_else(Utc::now),
            })
        })
        .optional()
        .context("failed to load KYC profile")
    }

    /// Create the workflow on first contact, or return the existing one.
    pub fn ensure_workflow(&self, user_id: &Uuid) -> Result<KycWorkflow> {
        if let Some(workflow) = self.get_workflow(user_id)? {
            return Ok(workflow);
        }

        let workflow = KycWorkflow {
            id: Uuid::new_v4(),
            user_id: *user_id,
            current_step: WorkflowStep::DocumentCollection,
            status: WorkflowStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        };

        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT OR IGNORE INTO kyc_workflows
                (id, user_id, current_step, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                workflow.id.to_string(),
                workflow.user_id.to_string(),
                workflow.current_step.as_str(),
                workflow.status.as_str(),
                workflow.started_at.to_rfc3339(),
            ],
        )?;

        Ok(workflow)
    }

    pub fn get_workflow(&self, user_id: &Uuid) -> Result<Option<KycWorkflow>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, current_step, status, started_at, completed_at
             FROM kyc_workflows WHERE user_id = ?1",
        )?;

        stmt.query_row(params![user_id.to_string()], |row| {
            Ok(KycWorkflow {
                id: parse_uuid(row.get::<_, String>(0)?),
                user_id: parse_uuid(row.get::<_, String>(1)?),
                current_step: WorkflowStep::from_str(&row.get::<_, String>(2)?)
                    .unwrap_or(WorkflowStep::DocumentCollection),
                status: WorkflowStatus::from_str(&row.get::<_, String>(3)?)
                    .unwrap_or(WorkflowStatus::InProgress),
                started_at: parse_datetime(row.get(4)?).unwrap_or_else(Utc::now),
                completed_at: parse_datetime(row.get(5)?),
            })
        })
        .optional()
        .context("failed to load KYC workflow")
    }

    pub fn set_workflow_step(&self, user_id: &Uuid, step: WorkflowStep) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "UPDATE kyc_workflows SET current_step = ?1 WHERE user_id = ?2",
            params![step.as_str(), user_id.to_string()],
        )?;
        Ok(())
    }

    pub fn insert_document(&self, document: &KycDocument) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO kyc_documents
                (id, user_id, document_type, file_name, file_size, mime_type,
                 verification_status, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                document.id.to_string(),
                document.user_id.to_string(),
                document.document_type.as_str(),
                document.file_name,
                document.file_size as i64,
                document.mime_type,
                document.verification_status.as_str(),
                document.uploaded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_documents(&self, user_id: &Uuid) -> Result<Vec<KycDocument>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, document_type, file_name, file_size, mime_type,
                    verification_status, uploaded_at
             FROM kyc_documents WHERE user_id = ?1 ORDER BY uploaded_at DESC",
        )?;

        let documents = stmt
            .query_map(params![user_id.to_string()], |row| {
                Ok(KycDocument {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    user_id: parse_uuid(row.get::<_, String>(1)?),
                    document_type: DocumentType::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or(DocumentType::IdDocument),
                    file_name: row.get(3)?,
                    file_size: row.get::<_, i64>(4)? as u64,
                    mime_type: row.get(5)?,
                    verification_status: VerificationStatus::from_str(&row.get::<_, String>(6)?)
                        .unwrap_or(VerificationStatus::Pending),
                    uploaded_at: parse_datetime(row.get(7)?).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(documents)
    }

    /// Delete a document owned by the user. Returns false when no such
    /// document exists.
    pub fn delete_document(&self, user_id: &Uuid, document_id: &Uuid) -> Result<bool> {
        let conn = Connection::open(&self.db_path)?;
        let rows = conn.execute(
            "DELETE FROM kyc_documents WHERE id = ?1 AND user_id = ?2",
            params![document_id.to_string(), user_id.to_string()],
        )?;
        Ok(rows > 0)
    }

    pub fn set_registry_verified(
        &self,
        user_id: &Uuid,
        account_number: &str,
        country: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "UPDATE kyc_profiles
             SET ets_account = ?1, ets_country = ?2, ets_verified = 1,
                 ets_verified_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                account_number,
                country,
                verified_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                user_id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn set_suitability(&self, user_id: &Uuid, outcome: &SuitabilityOutcome) -> Result<()> {
        let raw = serde_json::to_string(outcome)?;
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "UPDATE kyc_profiles SET suitability = ?1, updated_at = ?2 WHERE id = ?3",
            params![raw, Utc::now().to_rfc3339(), user_id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_appropriateness(
        &self,
        user_id: &Uuid,
        outcome: &AppropriatenessOutcome,
    ) -> Result<()> {
        let raw = serde_json::to_string(outcome)?;
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "UPDATE kyc_profiles SET appropriateness = ?1, updated_at = ?2 WHERE id = ?3",
            params![raw, Utc::now().to_rfc3339(), user_id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_submitted(&self, user_id: &Uuid, submitted_at: DateTime<Utc>) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "UPDATE kyc_profiles
             SET kyc_status = ?1, kyc_submitted_at = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                KycStatus::InReview.as_str(),
                submitted_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                user_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// All profiles, for the admin console.
    pub fn list_profiles(&self) -> Result<Vec<KycProfile>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare("SELECT id FROM kyc_profiles")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut profiles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(profile) = self.get_profile(&parse_uuid(id))? {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }
}

fn parse_uuid(raw: String) -> Uuid {
    Uuid::parse_str(&raw).unwrap_or_default()
}

fn parse_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_store() -> (KycStore, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = KycStore::new(temp.path().to_str().unwrap()).unwrap();
        (store, temp)
    }

    fn doc(user_id: Uuid, document_type: DocumentType) -> KycDocument {
        KycDocument {
            id: Uuid::new_v4(),
            user_id,
            document_type,
            file_name: "statement.pdf".to_string(),
            file_size: 2048,
            mime_type: "application/pdf".to_string(),
            verification_status: VerificationStatus::Pending,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_profile_lifecycle() {
        let (store, _temp) = test_store();
        let user = Uuid::new_v4();

        assert!(store.get_profile(&user).unwrap().is_none());

        store.ensure_profile(&user, "Victor", "victor@example.com").unwrap();
        store
            .update_contact_details(&user, "Acme GmbH", "1 Main St", "V. Ionescu", "+40123")
            .unwrap();

        let profile = store.get_profile(&user).unwrap().unwrap();
        assert_eq!(profile.company_name.as_deref(), Some("Acme GmbH"));
        assert_eq!(profile.kyc_status, KycStatus::Pending);
        assert!(!profile.eu_ets_registry_verified);
    }

    #[test]
    fn test_workflow_created_once_and_advanced() {
        let (store, _temp) = test_store();
        let user = Uuid::new_v4();
        store.ensure_profile(&user, "u", "u@example.com").unwrap();

        let first = store.ensure_workflow(&user).unwrap();
        assert_eq!(first.current_step, WorkflowStep::DocumentCollection);

        store
            .set_workflow_step(&user, WorkflowStep::SuitabilityAssessment)
            .unwrap();
        let second = store.ensure_workflow(&user).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.current_step, WorkflowStep::SuitabilityAssessment);
    }

    #[test]
    fn test_documents_scoped_per_user() {
        let (store, _temp) = test_store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store
            .insert_document(&doc(alice, DocumentType::TaxCertificate))
            .unwrap();
        let bobs_doc = doc(bob, DocumentType::TaxCertificate);
        store.insert_document(&bobs_doc).unwrap();

        assert_eq!(store.list_documents(&alice).unwrap().len(), 1);

        // Alice cannot delete Bob's document.
        assert!(!store.delete_document(&alice, &bobs_doc.id).unwrap());
        assert!(store.delete_document(&bob, &bobs_doc.id).unwrap());
        assert!(store.list_documents(&bob).unwrap().is_empty());
    }

    #[test]
    fn test_registry_verification_and_submission() {
        let (store, _temp) = test_store();
        let user = Uuid::new_v4();
        store.ensure_profile(&user, "u", "u@example.com").unwrap();

        store
            .set_registry_verified(&user, "EU12345678", "DE", Utc::now())
            .unwrap();
        let profile = store.get_profile(&user).unwrap().unwrap();
        assert!(profile.eu_ets_registry_verified);
        assert_eq!(profile.eu_ets_registry_account.as_deref(), Some("EU12345678"));

        store.mark_submitted(&user, Utc::now()).unwrap();
        let profile = store.get_profile(&user).unwrap().unwrap();
        assert_eq!(profile.kyc_status, KycStatus::InReview);
        assert!(profile.kyc_submitted_at.is_some());
    }
}
