//! MiFID-style suitability and appropriateness scoring.

use chrono::Utc;

use super::models::{
    AccessLevel, AppropriatenessOutcome, AppropriatenessRequest, AppropriatenessStatus,
    ExperienceLevel, KnowledgeQuestion, RiskTolerance, SuitabilityLevel, SuitabilityOutcome,
    SuitabilityRequest, TradingObjective,
};

const SUITABLE_THRESHOLD: u32 = 70;
const SUITABLE_WITH_WARNINGS_THRESHOLD: u32 = 50;

const MIN_KNOWLEDGE_SCORE: f64 = 70.0;
const MIN_KNOWLEDGE_SCORE_WITH_EDUCATION: f64 = 50.0;

/// Score a suitability questionnaire 0-100: objectives (30), risk
/// tolerance (25), experience (25), knowledge (20).
pub fn assess_suitability(request: &SuitabilityRequest) -> SuitabilityOutcome {
    let mut score = 0u32;
    let mut recommendations = Vec::new();
    let mut warnings = Vec::new();

    score += match request.objectives {
        TradingObjective::Compliance => {
            recommendations
                .push("Carbon certificates are ideal for compliance purposes".to_string());
            30
        }
        TradingObjective::Hedging => {
            recommendations
                .push("Carbon certificates can be used for hedging emissions risk".to_string());
            25
        }
        TradingObjective::Investment => {
            warnings.push(
                "Carbon certificates are primarily compliance instruments, not investment products"
                    .to_string(),
            );
            20
        }
    };

    score += match request.risk_tolerance {
        RiskTolerance::Conservative => {
            warnings.push(
                "Carbon certificate prices can be volatile. Consider your risk tolerance."
                    .to_string(),
            );
            15
        }
        RiskTolerance::Moderate => 25,
        RiskTolerance::Aggressive => {
            warnings.push("High risk tolerance may lead to significant losses".to_string());
            20
        }
    };

    score += match request.experience {
        ExperienceLevel::Advanced => 25,
        ExperienceLevel::Intermediate => {
            recommendations.push(
                "Consider starting with smaller positions until you gain more experience"
                    .to_string(),
            );
            20
        }
        ExperienceLevel::Beginner => {
            warnings
                .push("Limited trading experience. Please ensure you understand the risks.".to_string());
            recommendations.push(
                "We recommend starting with small positions and gradually increasing exposure"
                    .to_string(),
            );
            10
        }
    };

    let knowledge = request.knowledge_score.clamp(0.0, 100.0);
    score += (knowledge * 0.2) as u32;

    if knowledge < 50.0 {
        warnings
            .push("Low knowledge score. Please review educational materials before trading.".to_string());
        recommendations
            .push("Complete our educational resources on carbon certificate trading".to_string());
    } else if knowledge < 70.0 {
        warnings.push("Moderate knowledge score. Consider additional education.".to_string());
    }

    let (suitable, level) = if score >= SUITABLE_THRESHOLD {
        (true, SuitabilityLevel::Suitable)
    } else if score >= SUITABLE_WITH_WARNINGS_THRESHOLD {
        (true, SuitabilityLevel::SuitableWithWarnings)
    } else {
        warnings.push("Overall suitability score is below minimum threshold".to_string());
        recommendations
            .push("Please improve your knowledge and experience before trading".to_string());
        (false, SuitabilityLevel::NotSuitable)
    };

    SuitabilityOutcome {
        suitable,
        level,
        score,
        recommendations,
        warnings,
        submitted_at: Utc::now(),
    }
}

/// Score the appropriateness test from the knowledge-test percentage and
/// the self-declared experience flags.
pub fn assess_appropriateness(request: &AppropriatenessRequest) -> AppropriatenessOutcome {
    let total = request.knowledge_test.total_questions.max(1);
    let knowledge_score =
        (request.knowledge_test.correct_answers.min(total) as f64 / total as f64) * 100.0;

    let declaration = &request.experience_declaration;
    let has_experience = declaration.has_traded_carbon_certificates
        || declaration.has_traded_similar_products
        || declaration.has_financial_experience;

    let mut recommendations = Vec::new();

    let (status, level) = if knowledge_score >= MIN_KNOWLEDGE_SCORE {
        if has_experience {
            recommendations.push(
                "You have been approved for full access to carbon certificate trading".to_string(),
            );
            (AppropriatenessStatus::Approved, AccessLevel::FullAccess)
        } else {
            recommendations.push(
                "You have been approved but with limited access. Please complete educational materials."
                    .to_string(),
            );
            recommendations.push(
                "Consider starting with smaller positions until you gain more experience"
                    .to_string(),
            );
            (
                AppropriatenessStatus::ApprovedWithEducation,
                AccessLevel::LimitedAccess,
            )
        }
    } else if knowledge_score >= MIN_KNOWLEDGE_SCORE_WITH_EDUCATION {
        recommendations.push("Your knowledge score is below the minimum threshold".to_string());
        recommendations.push(
            "Please complete our educational resources on carbon certificate trading".to_string(),
        );
        recommendations
            .push("You can retake the knowledge test after completing the education".to_string());
        (AppropriatenessStatus::NeedsEducation, AccessLevel::NoAccess)
    } else {
        recommendations
            .push("Your knowledge score is too low for trading carbon certificates".to_string());
        recommendations
            .push("Please complete comprehensive education on carbon markets and EU ETS".to_string());
        (AppropriatenessStatus::Rejected, AccessLevel::NoAccess)
    };

    AppropriatenessOutcome {
        status,
        level,
        knowledge_score,
        has_experience,
        recommendations,
        submitted_at: Utc::now(),
    }
}

/// Question bank for the appropriateness knowledge test. Correct answers
/// are graded client-side; the backend only receives the tally.
pub const KNOWLEDGE_QUESTIONS: [KnowledgeQuestion; 5] = [
    KnowledgeQuestion {
        id: 1,
        question: "What does one EUA certificate entitle its holder to emit?",
        options: [
            "One ton of CO2",
            "One kilogram of CO2",
            "Unlimited CO2 for one year",
            "One ton of any greenhouse gas, unverified",
        ],
    },
    KnowledgeQuestion {
        id: 2,
        question: "What happens when a certificate is surrendered?",
        options: [
            "It is permanently retired against an emissions obligation",
            "It is sold back to the market",
            "It converts into a different certificate type",
            "It is lent to another operator",
        ],
    },
    KnowledgeQuestion {
        id: 3,
        question: "Which factor most directly drives EUA price changes?",
        options: [
            "EU ETS supply and demand policy",
            "Gold prices",
            "Domestic electricity tariffs only",
            "Fixed government price setting",
        ],
    },
    KnowledgeQuestion {
        id: 4,
        question: "CEA certificates can be converted into which instrument on this platform?",
        options: [
            "EUA certificates",
            "Verified carbon offsets",
            "Renewable energy credits",
            "They cannot be converted",
        ],
    },
    KnowledgeQuestion {
        id: 5,
        question: "What is the main risk of holding carbon certificates?",
        options: [
            "Price volatility driven by regulation and market conditions",
            "They expire every week",
            "They cannot be sold",
            "There is no risk",
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kyc::models::{ExperienceDeclaration, KnowledgeTestResult};

    fn suitability(
        objectives: TradingObjective,
        risk: RiskTolerance,
        experience: ExperienceLevel,
        knowledge: f64,
    ) -> SuitabilityOutcome {
        assess_suitability(&SuitabilityRequest {
            objectives,
            risk_tolerance: risk,
            experience,
            knowledge_score: knowledge,
        })
    }

    #[test]
    fn test_best_profile_is_suitable() {
        let outcome = suitability(
            TradingObjective::Compliance,
            RiskTolerance::Moderate,
            ExperienceLevel::Advanced,
            100.0,
        );
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.level, SuitabilityLevel::Suitable);
        assert!(outcome.suitable);
    }

    #[test]
    fn test_weak_profile_is_not_suitable() {
        let outcome = suitability(
            TradingObjective::Investment,
            RiskTolerance::Conservative,
            ExperienceLevel::Beginner,
            0.0,
        );
        // 20 + 15 + 10 + 0 = 45, below both thresholds.
        assert_eq!(outcome.score, 45);
        assert_eq!(outcome.level, SuitabilityLevel::NotSuitable);
        assert!(!outcome.suitable);
        assert!(!outcome.warnings.is_empty());
    }

    #[test]
    fn test_middle_profile_is_suitable_with_warnings() {
        let outcome = suitability(
            TradingObjective::Investment,
            RiskTolerance::Conservative,
            ExperienceLevel::Intermediate,
            50.0,
        );
        // 20 + 15 + 20 + 10 = 65.
        assert_eq!(outcome.score, 65);
        assert_eq!(outcome.level, SuitabilityLevel::SuitableWithWarnings);
        assert!(outcome.suitable);
    }

    #[test]
    fn test_appropriateness_full_access_needs_knowledge_and_experience() {
        let outcome = assess_appropriateness(&AppropriatenessRequest {
            knowledge_test: KnowledgeTestResult {
                correct_answers: 4,
                total_questions: 5,
            },
            experience_declaration: ExperienceDeclaration {
                has_traded_carbon_certificates: true,
                has_traded_similar_products: false,
                has_financial_experience: false,
            },
        });

        assert_eq!(outcome.status, AppropriatenessStatus::Approved);
        assert_eq!(outcome.level, AccessLevel::FullAccess);
        assert_eq!(outcome.knowledge_score, 80.0);
    }

    #[test]
    fn test_appropriateness_without_experience_limits_access() {
        let outcome = assess_appropriateness(&AppropriatenessRequest {
            knowledge_test: KnowledgeTestResult {
                correct_answers: 5,
                total_questions: 5,
            },
            experience_declaration: ExperienceDeclaration {
                has_traded_carbon_certificates: false,
                has_traded_similar_products: false,
                has_financial_experience: false,
            },
        });

        assert_eq!(outcome.status, AppropriatenessStatus::ApprovedWithEducation);
        assert_eq!(outcome.level, AccessLevel::LimitedAccess);
    }

    #[test]
    fn test_appropriateness_low_scores() {
        let needs_education = assess_appropriateness(&AppropriatenessRequest {
            knowledge_test: KnowledgeTestResult {
                correct_answers: 3,
                total_questions: 5,
            },
            experience_declaration: ExperienceDeclaration::default(),
        });
        assert_eq!(
            needs_education.status,
            AppropriatenessStatus::NeedsEducation
        );

        let rejected = assess_appropriateness(&AppropriatenessRequest {
            knowledge_test: KnowledgeTestResult {
                correct_answers: 1,
                total_questions: 5,
            },
            experience_declaration: ExperienceDeclaration::default(),
        });
        assert_eq!(rejected.status, AppropriatenessStatus::Rejected);
        assert_eq!(rejected.level, AccessLevel::NoAccess);
    }
}
