//! Overall assessment and priority actions
//!
//! Both are derived from the three model scores on every inference call. A
//! model that failed contributes no score; the overall assessment is then an
//! error and that model fires no action threshold.

use serde::{Deserialize, Serialize};

/// Weights and thresholds used to combine model scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentPolicy {
    pub burnout_weight: f64,
    pub wellbeing_weight: f64,
    pub efficiency_weight: f64,

    /// Burnout at or above this is critical
    pub burnout_critical: f64,
    /// Burnout at or above this is at risk
    pub burnout_at_risk: f64,
    /// Burnout below this is required for thriving
    pub burnout_thriving_below: f64,

    /// Wellbeing below this is at risk
    pub wellbeing_at_risk_below: f64,
    pub wellbeing_thriving: f64,
    pub wellbeing_stable: f64,
    /// Wellbeing below this triggers the wellness program action
    pub wellbeing_support_below: f64,

    pub efficiency_thriving: f64,
    pub efficiency_stable: f64,
    /// Efficiency below this triggers the blocker review action
    pub efficiency_blocker_below: f64,
    /// Efficiency below this triggers the training action
    pub efficiency_training_below: f64,
}

impl Default for AssessmentPolicy {
    fn default() -> Self {
        Self {
            burnout_weight: 40.0,
            wellbeing_weight: 40.0,
            efficiency_weight: 20.0,
            burnout_critical: 0.7,
            burnout_at_risk: 0.5,
            burnout_thriving_below: 0.3,
            wellbeing_at_risk_below: 40.0,
            wellbeing_thriving: 70.0,
            wellbeing_stable: 60.0,
            wellbeing_support_below: 60.0,
            efficiency_thriving: 70.0,
            efficiency_stable: 60.0,
            efficiency_blocker_below: 40.0,
            efficiency_training_below: 60.0,
        }
    }
}

/// Scores of one inference call; `None` marks a failed model
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelScores {
    pub burnout: Option<f64>,
    pub wellbeing: Option<f64>,
    pub efficiency: Option<f64>,
}

impl ModelScores {
    pub fn all(&self) -> Option<(f64, f64, f64)> {
        Some((self.burnout?, self.wellbeing?, self.efficiency?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Critical,
    AtRisk,
    Thriving,
    Stable,
    NeedsAttention,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Moderate,
    Normal,
    Maintain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub burnout_impact: f64,
    pub wellbeing_impact: f64,
    pub efficiency_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub status: AssessmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_health_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Breakdown>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Burnout,
    Wellbeing,
    Efficiency,
    Recognition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAction {
    pub priority: Priority,
    pub category: ActionCategory,
    pub action_text: String,
    pub icon: String,
}

impl PriorityAction {
    fn new(priority: Priority, category: ActionCategory, action_text: &str, icon: &str) -> Self {
        Self {
            priority,
            category,
            action_text: action_text.to_string(),
            icon: icon.to_string(),
        }
    }
}

impl AssessmentPolicy {
    /// Weighted health score in 0-100
    pub fn composite_health_score(&self, burnout: f64, wellbeing: f64, efficiency: f64) -> f64 {
        (1.0 - burnout) * self.burnout_weight
            + (wellbeing / 100.0) * self.wellbeing_weight
            + (efficiency / 100.0) * self.efficiency_weight
    }

    /// First matching rule wins
    pub fn overall_assessment(&self, scores: &ModelScores) -> OverallAssessment {
        let Some((b, w, e)) = scores.all() else {
            return OverallAssessment {
                status: AssessmentStatus::Error,
                priority: None,
                message: "One or more models failed to produce predictions".to_string(),
                composite_health_score: None,
                breakdown: None,
            };
        };

        let (status, priority, message) = if b >= self.burnout_critical {
            (
                AssessmentStatus::Critical,
                Priority::Urgent,
                "🚨 CRITICAL: Employee shows high burnout risk - immediate intervention required",
            )
        } else if b >= self.burnout_at_risk || w < self.wellbeing_at_risk_below {
            (
                AssessmentStatus::AtRisk,
                Priority::High,
                "⚠️ AT RISK: Employee needs support and monitoring",
            )
        } else if w >= self.wellbeing_thriving
            && e >= self.efficiency_thriving
            && b < self.burnout_thriving_below
        {
            (
                AssessmentStatus::Thriving,
                Priority::Maintain,
                "✅ THRIVING: Employee performing well with good wellbeing",
            )
        } else if w >= self.wellbeing_stable && e >= self.efficiency_stable {
            (
                AssessmentStatus::Stable,
                Priority::Normal,
                "➡️ STABLE: Employee in good condition, continue monitoring",
            )
        } else {
            (
                AssessmentStatus::NeedsAttention,
                Priority::Moderate,
                "⚠️ NEEDS ATTENTION: Some metrics require improvement",
            )
        };

        OverallAssessment {
            status,
            priority: Some(priority),
            message: message.to_string(),
            composite_health_score: Some(round1(self.composite_health_score(b, w, e))),
            breakdown: Some(Breakdown {
                burnout_impact: round1((1.0 - b) * 100.0),
                wellbeing_impact: round1(w),
                efficiency_impact: round1(e),
            }),
        }
    }

    /// Actions in fixed order: urgent, then high, then medium
    ///
    /// The recognition action is emitted only when all three models
    /// succeeded and none of the thresholds fired.
    pub fn priority_actions(&self, scores: &ModelScores) -> Vec<PriorityAction> {
        let burnout_at = |t: f64| scores.burnout.is_some_and(|b| b >= t);
        let wellbeing_below = |t: f64| scores.wellbeing.is_some_and(|w| w < t);
        let efficiency_below = |t: f64| scores.efficiency.is_some_and(|e| e < t);

        let mut actions = Vec::new();

        if burnout_at(self.burnout_critical) {
            actions.push(PriorityAction::new(
                Priority::Urgent,
                ActionCategory::Burnout,
                "Schedule immediate intervention meeting",
                "🚨",
            ));
        }
        if wellbeing_below(self.wellbeing_at_risk_below) {
            actions.push(PriorityAction::new(
                Priority::Urgent,
                ActionCategory::Wellbeing,
                "Provide mental health and wellbeing support",
                "❤️",
            ));
        }
        if burnout_at(self.burnout_at_risk) {
            actions.push(PriorityAction::new(
                Priority::High,
                ActionCategory::Burnout,
                "Review and reduce workload",
                "⚠️",
            ));
        }
        if wellbeing_below(self.wellbeing_support_below) {
            actions.push(PriorityAction::new(
                Priority::High,
                ActionCategory::Wellbeing,
                "Offer wellness program enrollment",
                "💚",
            ));
        }
        if efficiency_below(self.efficiency_blocker_below) {
            actions.push(PriorityAction::new(
                Priority::High,
                ActionCategory::Efficiency,
                "Identify and remove productivity blockers",
                "🔧",
            ));
        }
        if efficiency_below(self.efficiency_training_below) {
            actions.push(PriorityAction::new(
                Priority::Medium,
                ActionCategory::Efficiency,
                "Provide training and development opportunities",
                "📚",
            ));
        }

        if actions.is_empty() && scores.all().is_some() {
            actions.push(PriorityAction::new(
                Priority::Maintain,
                ActionCategory::Recognition,
                "Recognize strong performance and maintain support",
                "⭐",
            ));
        }

        actions
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
