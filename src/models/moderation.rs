use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Priority added by a manual escalation
pub const ESCALATION_BOOST: u32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Content,
    Comment,
    User,
    Live,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Open,
    Resolved,
}

/// A user's complaint about a target; one open report per reporter and target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub reporter_id: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub reason: String,
    pub details: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

impl Document for Report {
    const COLLECTION: &'static str = "reports";
    const NAME: &'static str = "Report";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Report {
    pub fn doc_id(reporter_id: &str, kind: TargetKind, target_id: &str) -> String {
        let kind = match kind {
            TargetKind::Content => "content",
            TargetKind::Comment => "comment",
            TargetKind::User => "user",
            TargetKind::Live => "live",
        };
        format!("{}_{}_{}", reporter_id, kind, target_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueReason {
    HighRiskScore,
    UserReports,
    AutomatedFlag,
    RepeatOffender,
    AppealSubmitted,
    ManualEscalation,
    RandomAudit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn from_priority(priority: u32) -> Self {
        match priority {
            90.. => PriorityLevel::Critical,
            70..=89 => PriorityLevel::High,
            40..=69 => PriorityLevel::Medium,
            _ => PriorityLevel::Low,
        }
    }

    /// Target time from enqueue to completed review
    pub fn sla(self) -> Duration {
        match self {
            PriorityLevel::Critical => Duration::minutes(15),
            PriorityLevel::High => Duration::hours(1),
            PriorityLevel::Medium => Duration::hours(6),
            PriorityLevel::Low => Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Assigned,
    InReview,
    Completed,
    Escalated,
}

impl QueueStatus {
    pub fn is_open(self) -> bool {
        !matches!(self, QueueStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Remove,
    Warn,
    Ban,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskFactors {
    /// 0-100 score from automated classification
    #[serde(default)]
    pub automated_score: f64,
    #[serde(default)]
    pub report_count: u32,
    #[serde(default)]
    pub creator_strikes: u32,
    #[serde(default)]
    pub previous_violations: u32,
    /// 0-100 reach estimate
    #[serde(default)]
    pub virality: f64,
}

impl RiskFactors {
    /// Weighted 0-100 review priority
    pub fn priority(&self) -> u32 {
        let score = 0.40 * self.automated_score
            + 0.25 * (self.report_count as f64 * 5.0)
            + 0.15 * (self.creator_strikes as f64 * 10.0)
            + 0.10 * (self.previous_violations as f64 * 8.0)
            + 0.10 * self.virality;
        score.round().clamp(0.0, 100.0) as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub creator_id: Option<String>,
    pub reason: QueueReason,
    pub risk: RiskFactors,
    pub priority: u32,
    pub level: PriorityLevel,
    pub sla_due_at: DateTime<Utc>,
    pub sla_breached: bool,
    pub status: QueueStatus,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub review_duration_secs: Option<i64>,
    pub decision: Option<Decision>,
    pub notes: Option<String>,
    pub escalation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for QueueItem {
    const COLLECTION: &'static str = "moderation_queue";
    const NAME: &'static str = "Queue item";

    fn id(&self) -> &str {
        &self.id
    }
}

impl QueueItem {
    /// Sets priority; the level only ever rises and the SLA deadline
    /// (measured from creation) only ever moves earlier
    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority.min(100);
        let derived = PriorityLevel::from_priority(self.priority);
        self.level = self.level.max(derived);
        self.sla_due_at = self.sla_due_at.min(self.created_at + derived.sla());
    }

    /// Recomputes from the risk factors without undoing an earlier boost
    pub fn reprioritize(&mut self) {
        self.set_priority(self.risk.priority().max(self.priority));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_formula() {
        let risk = RiskFactors {
            automated_score: 50.0,
            report_count: 4,
            creator_strikes: 2,
            previous_violations: 1,
            virality: 30.0,
        };
        // 20 + 5 + 3 + 0.8 + 3 = 31.8
        assert_eq!(risk.priority(), 32);
    }

    #[test]
    fn test_priority_caps_at_100() {
        let risk = RiskFactors {
            automated_score: 100.0,
            report_count: 100,
            creator_strikes: 10,
            previous_violations: 10,
            virality: 100.0,
        };
        assert_eq!(risk.priority(), 100);
    }

    #[test]
    fn test_levels_and_sla() {
        assert_eq!(PriorityLevel::from_priority(95), PriorityLevel::Critical);
        assert_eq!(PriorityLevel::from_priority(90), PriorityLevel::Critical);
        assert_eq!(PriorityLevel::from_priority(70), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_priority(40), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_priority(39), PriorityLevel::Low);
        assert_eq!(PriorityLevel::Critical.sla(), Duration::minutes(15));
        assert_eq!(PriorityLevel::Low.sla(), Duration::hours(24));
    }
}
