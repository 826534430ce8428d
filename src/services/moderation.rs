//! User reports and the moderation review queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{
    db::{with_retry, Batch, Db, Direction, Query, Versioned},
    error::{AppError, AppResult},
    models::{
        moderation::ESCALATION_BOOST, new_id, Comment, CommentStatus, Content, ContentStatus,
        Decision, LiveStatus, LiveStream, Page, PageParams, PriorityLevel, QueueItem, QueueReason,
        QueueStatus, Report, ReportStatus, RiskFactors, TargetKind, User, UserStatus,
    },
    services::live,
};

const MAX_REASON_LEN: usize = 200;
const MAX_DETAILS_LEN: usize = 1000;
const OPEN_STATUSES: [QueueStatus; 4] = [
    QueueStatus::Pending,
    QueueStatus::Assigned,
    QueueStatus::InReview,
    QueueStatus::Escalated,
];

#[derive(Debug, Deserialize)]
pub struct ReportInput {
    pub target_kind: TargetKind,
    pub target_id: String,
    pub reason: String,
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportReceipt {
    pub report: Report,
    pub queue_item_id: String,
    pub priority: u32,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueInput {
    pub target_kind: TargetKind,
    pub target_id: String,
    pub creator_id: Option<String>,
    pub reason: QueueReason,
    #[serde(default)]
    pub risk: RiskFactors,
}

#[derive(Debug, Deserialize)]
pub struct CompleteInput {
    pub decision: Decision,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueFilters {
    pub status: Option<QueueStatus>,
    pub level: Option<PriorityLevel>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SweepResult {
    pub breached: usize,
    pub escalated: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub by_status: HashMap<QueueStatus, usize>,
    pub by_level: BTreeMap<PriorityLevel, usize>,
    pub open: usize,
    pub sla_breached: usize,
    pub open_reports: usize,
    pub average_review_secs: Option<i64>,
}

/// 0-100 reach estimate from view counts, logarithmic
fn virality(views: u64) -> f64 {
    ((views as f64 + 1.0).log10() * 20.0).clamp(0.0, 100.0)
}

/// Who is accountable for a target, and how widely it has spread
async fn resolve_target(db: &Db, kind: TargetKind, target_id: &str) -> AppResult<(String, f64)> {
    Ok(match kind {
        TargetKind::Content => {
            let content = db.require::<Content>(target_id).await?;
            (content.user_id.clone(), virality(content.stats.views))
        }
        TargetKind::Comment => {
            let comment = db.require::<Comment>(target_id).await?;
            (comment.user_id.clone(), virality(comment.likes))
        }
        TargetKind::User => {
            let user = db.require::<User>(target_id).await?;
            (user.id.clone(), virality(user.stats.followers))
        }
        TargetKind::Live => {
            let stream = db.require::<LiveStream>(target_id).await?;
            (stream.host_id.clone(), virality(stream.stats.total_views))
        }
    })
}

async fn open_item_for(db: &Db, kind: TargetKind, target_id: &str) -> AppResult<Option<Versioned<QueueItem>>> {
    Ok(db
        .find_versioned::<QueueItem>(
            &Query::new()
                .eq("target_kind", kind)
                .eq("target_id", target_id)
                .is_in("status", OPEN_STATUSES)
                .limit(1),
        )
        .await?
        .into_iter()
        .next())
}

async fn previous_violations(db: &Db, creator_id: &str) -> AppResult<u32> {
    let count = db
        .count::<QueueItem>(
            &Query::new()
                .eq("creator_id", creator_id)
                .eq("status", QueueStatus::Completed)
                .is_in("decision", [Decision::Remove, Decision::Warn, Decision::Ban]),
        )
        .await?;
    Ok(count as u32)
}

fn new_item(input: &EnqueueInput, now: DateTime<Utc>) -> QueueItem {
    let mut item = QueueItem {
        id: new_id(),
        target_kind: input.target_kind,
        target_id: input.target_id.clone(),
        creator_id: input.creator_id.clone(),
        reason: input.reason,
        risk: input.risk.clone(),
        priority: 0,
        level: PriorityLevel::Low,
        sla_due_at: now + PriorityLevel::Low.sla(),
        sla_breached: false,
        status: QueueStatus::Pending,
        assigned_to: None,
        assigned_at: None,
        review_started_at: None,
        completed_at: None,
        review_duration_secs: None,
        decision: None,
        notes: None,
        escalation_reason: None,
        created_at: now,
        updated_at: now,
    };
    item.reprioritize();
    item
}

fn ensure_open(item: &QueueItem) -> AppResult<()> {
    if item.status.is_open() {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(
            "Queue item is already completed".to_string(),
        ))
    }
}

fn ensure_assignee(item: &QueueItem, moderator_id: &str) -> AppResult<()> {
    match &item.assigned_to {
        Some(assignee) if assignee != moderator_id => Err(AppError::forbidden(
            "NOT_ASSIGNED",
            "This item is assigned to another moderator",
        )),
        _ => Ok(()),
    }
}

fn apply_escalation(item: &mut QueueItem, reason: &str, now: DateTime<Utc>) {
    item.set_priority(item.priority + ESCALATION_BOOST);
    item.level = PriorityLevel::Critical;
    item.sla_due_at = now + PriorityLevel::Critical.sla();
    item.status = QueueStatus::Escalated;
    item.escalation_reason = Some(reason.to_string());
    item.updated_at = now;
}

// ============================================================================
// Reports and enqueueing
// ============================================================================

/// Files a report and feeds it into the target's open queue item
pub async fn report(db: &Db, reporter: &User, input: ReportInput) -> AppResult<ReportReceipt> {
    let reason = input.reason.trim().to_string();
    if reason.is_empty() || reason.chars().count() > MAX_REASON_LEN {
        return Err(AppError::invalid(format!(
            "Reason is required and must be at most {} characters",
            MAX_REASON_LEN
        )));
    }
    if input
        .details
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DETAILS_LEN)
    {
        return Err(AppError::invalid(format!(
            "Details must be at most {} characters",
            MAX_DETAILS_LEN
        )));
    }

    let (creator_id, reach) = resolve_target(db, input.target_kind, &input.target_id).await?;
    if creator_id == reporter.id {
        return Err(AppError::invalid("You cannot report yourself or your own content"));
    }

    let receipt = with_retry("file_report", || async {
        let now = Utc::now();
        let mut batch = db.batch();

        let report_id = Report::doc_id(&reporter.id, input.target_kind, &input.target_id);
        let report = Report {
            id: report_id.clone(),
            reporter_id: reporter.id.clone(),
            target_kind: input.target_kind,
            target_id: input.target_id.clone(),
            reason: reason.clone(),
            details: input.details.clone(),
            status: ReportStatus::Open,
            created_at: now,
        };
        match db.get_versioned::<Report>(&report_id).await? {
            Some(existing) if existing.status == ReportStatus::Open => {
                return Err(AppError::Conflict(
                    "You have already reported this".to_string(),
                ));
            }
            Some(mut resolved) => {
                resolved.doc = report.clone();
                batch.update(&resolved)?;
            }
            None => batch.insert(&report)?,
        }

        if input.target_kind == TargetKind::Content {
            let mut content = db.require::<Content>(&input.target_id).await?;
            content.report_count += 1;
            content.updated_at = now;
            batch.update(&content)?;
        }

        let item = match open_item_for(db, input.target_kind, &input.target_id).await? {
            Some(mut item) => {
                item.risk.report_count += 1;
                item.reprioritize();
                item.updated_at = now;
                batch.update(&item)?;
                item.into_inner()
            }
            None => {
                let creator = db.get::<User>(&creator_id).await?;
                let enqueue = EnqueueInput {
                    target_kind: input.target_kind,
                    target_id: input.target_id.clone(),
                    creator_id: Some(creator_id.clone()),
                    reason: QueueReason::UserReports,
                    risk: RiskFactors {
                        report_count: 1,
                        creator_strikes: creator.map_or(0, |c| c.strike_count),
                        previous_violations: previous_violations(db, &creator_id).await?,
                        virality: reach,
                        ..Default::default()
                    },
                };
                let item = new_item(&enqueue, now);
                batch.insert(&item)?;
                item
            }
        };

        batch.commit().await?;
        Ok(ReportReceipt {
            report,
            queue_item_id: item.id,
            priority: item.priority,
        })
    })
    .await?;

    tracing::info!(
        reporter_id = %reporter.id,
        target_kind = ?input.target_kind,
        target_id = %input.target_id,
        queue_item_id = %receipt.queue_item_id,
        priority = receipt.priority,
        "Report filed"
    );
    Ok(receipt)
}

/// Queues a target for review unless it already has an open item
pub async fn enqueue(db: &Db, input: EnqueueInput) -> AppResult<QueueItem> {
    if let Some(existing) = open_item_for(db, input.target_kind, &input.target_id).await? {
        return Ok(existing.into_inner());
    }
    let item = new_item(&input, Utc::now());
    db.insert(&item).await?;
    tracing::info!(
        item_id = %item.id,
        target_id = %item.target_id,
        reason = ?item.reason,
        priority = item.priority,
        level = ?item.level,
        "Queued for moderation"
    );
    Ok(item)
}

// ============================================================================
// Review workflow
// ============================================================================

/// Claims the most urgent open item this moderator may work on
pub async fn next(db: &Db, moderator_id: &str) -> AppResult<Option<QueueItem>> {
    with_retry("next_queue_item", || async {
        let candidates = db
            .find_versioned::<QueueItem>(
                &Query::new()
                    .is_in(
                        "status",
                        [QueueStatus::Pending, QueueStatus::Assigned, QueueStatus::Escalated],
                    )
                    .order_by("priority", Direction::Desc)
                    .order_by("created_at", Direction::Asc),
            )
            .await?;
        let Some(mut item) = candidates.into_iter().find(|item| {
            item.assigned_to
                .as_deref()
                .map_or(true, |assignee| assignee == moderator_id)
        }) else {
            return Ok(None);
        };

        if item.assigned_to.is_none() {
            let now = Utc::now();
            item.assigned_to = Some(moderator_id.to_string());
            item.assigned_at = Some(now);
            item.status = QueueStatus::Assigned;
            item.updated_at = now;
            db.update(&item).await?;
        }
        Ok(Some(item.into_inner()))
    })
    .await
}

pub async fn assign(db: &Db, item_id: &str, moderator_id: &str) -> AppResult<QueueItem> {
    let item = with_retry("assign_queue_item", || async {
        let mut item = db.require::<QueueItem>(item_id).await?;
        ensure_open(&item)?;
        let now = Utc::now();
        item.assigned_to = Some(moderator_id.to_string());
        item.assigned_at = Some(now);
        if item.status != QueueStatus::InReview {
            item.status = QueueStatus::Assigned;
        }
        item.updated_at = now;
        db.update(&item).await?;
        Ok(item.into_inner())
    })
    .await?;
    tracing::info!(item_id, moderator_id, "Queue item assigned");
    Ok(item)
}

pub async fn start_review(db: &Db, item_id: &str, moderator_id: &str) -> AppResult<QueueItem> {
    with_retry("start_review", || async {
        let mut item = db.require::<QueueItem>(item_id).await?;
        ensure_open(&item)?;
        ensure_assignee(&item, moderator_id)?;
        let now = Utc::now();
        if item.assigned_to.is_none() {
            item.assigned_to = Some(moderator_id.to_string());
            item.assigned_at = Some(now);
        }
        item.status = QueueStatus::InReview;
        item.review_started_at = Some(now);
        item.updated_at = now;
        db.update(&item).await?;
        Ok(item.into_inner())
    })
    .await
}

/// Stages what a decision does to the target and its creator
async fn stage_decision(
    db: &Db,
    batch: &mut Batch,
    item: &QueueItem,
    decision: Decision,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if decision == Decision::Remove {
        match item.target_kind {
            TargetKind::Content => {
                if let Some(mut content) = db.get_versioned::<Content>(&item.target_id).await? {
                    content.status = ContentStatus::Removed;
                    content.updated_at = now;
                    batch.update(&content)?;
                }
            }
            TargetKind::Comment => {
                if let Some(mut comment) = db.get_versioned::<Comment>(&item.target_id).await? {
                    if comment.status == CommentStatus::Approved && !comment.is_deleted {
                        if let Some(mut post) = db.get_versioned::<Content>(&comment.content_id).await? {
                            post.stats.comments = post.stats.comments.saturating_sub(1);
                            batch.update(&post)?;
                        }
                    }
                    comment.status = CommentStatus::Hidden;
                    comment.updated_at = now;
                    batch.update(&comment)?;
                }
            }
            TargetKind::Live => {
                if let Some(mut stream) = db.get_versioned::<LiveStream>(&item.target_id).await? {
                    if stream.status != LiveStatus::Ended {
                        live::stage_end(batch, &mut stream, now)?;
                    }
                }
            }
            TargetKind::User => {}
        }
    }

    let Some(creator_id) = &item.creator_id else {
        return Ok(());
    };
    let Some(mut creator) = db.get_versioned::<User>(creator_id).await? else {
        return Ok(());
    };
    match decision {
        Decision::Approve => return Ok(()),
        Decision::Warn | Decision::Remove => creator.strike_count += 1,
        Decision::Ban => {
            creator.status = UserStatus::Banned;
            creator.status_reason = Some(notes.unwrap_or("Banned by moderation").to_string());
            creator.token_version += 1;
        }
    }
    creator.updated_at = now;
    batch.update(&creator)?;
    Ok(())
}

/// Records the decision, applies it and resolves the target's open reports
pub async fn complete(db: &Db, item_id: &str, moderator: &User, input: CompleteInput) -> AppResult<QueueItem> {
    let notes = input
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let item = with_retry("complete_review", || async {
        let now = Utc::now();
        let mut item = db.require::<QueueItem>(item_id).await?;
        ensure_open(&item)?;
        if !moderator.role.is_admin() {
            ensure_assignee(&item, &moderator.id)?;
        }

        let mut batch = db.batch();
        stage_decision(db, &mut batch, &item, input.decision, notes.as_deref(), now).await?;

        let reports = db
            .find_versioned::<Report>(
                &Query::new()
                    .eq("target_kind", item.target_kind)
                    .eq("target_id", &item.target_id)
                    .eq("status", ReportStatus::Open),
            )
            .await?;
        for mut report in reports {
            report.status = ReportStatus::Resolved;
            batch.update(&report)?;
        }

        let started = item
            .review_started_at
            .or(item.assigned_at)
            .unwrap_or(item.created_at);
        item.status = QueueStatus::Completed;
        item.decision = Some(input.decision);
        item.notes = notes.clone();
        item.completed_at = Some(now);
        item.review_duration_secs = Some((now - started).num_seconds().max(0));
        item.assigned_to.get_or_insert_with(|| moderator.id.clone());
        if now > item.sla_due_at {
            item.sla_breached = true;
        }
        item.updated_at = now;
        batch.update(&item)?;

        batch.commit().await?;
        Ok(item.into_inner())
    })
    .await?;

    tracing::info!(
        item_id,
        moderator_id = %moderator.id,
        decision = ?input.decision,
        target_id = %item.target_id,
        "Moderation decision recorded"
    );
    Ok(item)
}

pub async fn escalate(db: &Db, item_id: &str, reason: &str) -> AppResult<QueueItem> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::invalid("An escalation reason is required"));
    }
    let item = with_retry("escalate_queue_item", || async {
        let mut item = db.require::<QueueItem>(item_id).await?;
        ensure_open(&item)?;
        apply_escalation(&mut item, reason, Utc::now());
        db.update(&item).await?;
        Ok(item.into_inner())
    })
    .await?;
    tracing::warn!(item_id, priority = item.priority, reason, "Queue item escalated");
    Ok(item)
}

/// Flags open items past their deadline; non-critical ones are escalated
pub async fn sweep_sla(db: &Db, now: DateTime<Utc>) -> AppResult<SweepResult> {
    let overdue = db
        .find_versioned::<QueueItem>(
            &Query::new()
                .is_in("status", OPEN_STATUSES)
                .eq("sla_breached", false)
                .lt("sla_due_at", now),
        )
        .await?;

    let mut result = SweepResult::default();
    for mut item in overdue {
        item.sla_breached = true;
        let escalating = item.level != PriorityLevel::Critical;
        if escalating {
            apply_escalation(&mut item, "SLA breached", now);
        } else {
            item.updated_at = now;
        }
        // A concurrent review wins; the next sweep sees the fresh version
        match db.update(&item).await {
            Ok(()) => {
                result.breached += 1;
                if escalating {
                    result.escalated += 1;
                }
            }
            Err(AppError::WriteConflict(_)) => continue,
            Err(err) => return Err(err),
        }
    }

    if result.breached > 0 {
        tracing::warn!(
            breached = result.breached,
            escalated = result.escalated,
            "Moderation SLA breaches found"
        );
    }
    Ok(result)
}

// ============================================================================
// Reporting
// ============================================================================

pub async fn stats(db: &Db) -> AppResult<QueueStats> {
    let items = db.find::<QueueItem>(&Query::new()).await?;
    let mut by_status = HashMap::new();
    let mut by_level = BTreeMap::new();
    let mut open = 0;
    let mut breached = 0;
    let mut review_total = 0;
    let mut reviewed = 0;

    for item in &items {
        *by_status.entry(item.status).or_insert(0) += 1;
        if item.status.is_open() {
            open += 1;
            *by_level.entry(item.level).or_insert(0) += 1;
        }
        if item.sla_breached {
            breached += 1;
        }
        if let Some(secs) = item.review_duration_secs {
            review_total += secs;
            reviewed += 1;
        }
    }

    Ok(QueueStats {
        by_status,
        by_level,
        open,
        sla_breached: breached,
        open_reports: db
            .count::<Report>(&Query::new().eq("status", ReportStatus::Open))
            .await?,
        average_review_secs: (reviewed > 0).then(|| review_total / reviewed),
    })
}

pub async fn list(db: &Db, filters: &QueueFilters, params: &PageParams) -> AppResult<Page<QueueItem>> {
    let mut query = Query::new()
        .order_by("priority", Direction::Desc)
        .order_by("created_at", Direction::Asc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    if let Some(status) = filters.status {
        query = query.eq("status", status);
    }
    if let Some(level) = filters.level {
        query = query.eq("level", level);
    }
    let items = db.find::<QueueItem>(&query).await?;
    Ok(Page::from_overfetch(items, params))
}

pub async fn list_reports(db: &Db, status: Option<ReportStatus>, params: &PageParams) -> AppResult<Page<Report>> {
    let mut query = Query::new()
        .order_by("created_at", Direction::Desc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    if let Some(status) = status {
        query = query.eq("status", status);
    }
    let items = db.find::<Report>(&query).await?;
    Ok(Page::from_overfetch(items, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Cache;
    use crate::models::Role;
    use crate::services::content::{self, tests::video_input};
    use crate::services::users::tests::{seed_user, user};
    use chrono::Duration;

    async fn moderator(db: &Db, id: &str) -> User {
        let mut moderator = user(id);
        moderator.role = Role::Admin;
        db.insert(&moderator).await.unwrap();
        moderator
    }

    async fn post(db: &Db, owner: &str) -> Content {
        content::create(db, &Cache::disabled(), owner, video_input("clip"))
            .await
            .unwrap()
    }

    fn report_of(content: &Content) -> ReportInput {
        ReportInput {
            target_kind: TargetKind::Content,
            target_id: content.id.clone(),
            reason: "spam".to_string(),
            details: None,
        }
    }

    fn flagged(target: &str, score: f64) -> EnqueueInput {
        EnqueueInput {
            target_kind: TargetKind::Content,
            target_id: target.to_string(),
            creator_id: None,
            reason: QueueReason::AutomatedFlag,
            risk: RiskFactors {
                automated_score: score,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_virality_scale() {
        assert_eq!(virality(0), 0.0);
        assert!((virality(9_999) - 80.0).abs() < 1e-9);
        assert_eq!(virality(u64::MAX), 100.0);
    }

    #[tokio::test]
    async fn test_reports_share_one_queue_item() {
        let db = Db::memory();
        seed_user(&db, "creator").await;
        let ann = seed_user(&db, "ann").await;
        let ben = seed_user(&db, "ben").await;
        let clip = post(&db, "creator").await;

        let first = report(&db, &ann, report_of(&clip)).await.unwrap();
        assert!(matches!(
            report(&db, &ann, report_of(&clip)).await,
            Err(AppError::Conflict(_))
        ));
        let second = report(&db, &ben, report_of(&clip)).await.unwrap();
        assert_eq!(first.queue_item_id, second.queue_item_id);

        let item = db.require::<QueueItem>(&first.queue_item_id).await.unwrap();
        assert_eq!(item.risk.report_count, 2);
        assert_eq!(item.reason, QueueReason::UserReports);
        assert_eq!(item.creator_id.as_deref(), Some("creator"));
        assert_eq!(db.require::<Content>(&clip.id).await.unwrap().report_count, 2);

        let creator = db.require::<User>("creator").await.unwrap().into_inner();
        let own = ReportInput {
            target_kind: TargetKind::User,
            target_id: "creator".to_string(),
            reason: "me".to_string(),
            details: None,
        };
        assert!(report(&db, &creator, own).await.is_err());
    }

    #[tokio::test]
    async fn test_enqueue_returns_open_item() {
        let db = Db::memory();
        let first = enqueue(&db, flagged("c1", 95.0)).await.unwrap();
        let again = enqueue(&db, flagged("c1", 10.0)).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.priority, 38);
        assert_eq!(first.level, PriorityLevel::Low);
    }

    #[tokio::test]
    async fn test_next_prefers_priority_then_age() {
        let db = Db::memory();
        let low = enqueue(&db, flagged("c1", 20.0)).await.unwrap();
        let high = enqueue(&db, flagged("c2", 100.0)).await.unwrap();
        let also_high = enqueue(&db, flagged("c3", 100.0)).await.unwrap();

        let claimed = next(&db, "mod1").await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, QueueStatus::Assigned);

        // mod1 keeps getting its own claim; mod2 moves on
        assert_eq!(next(&db, "mod1").await.unwrap().unwrap().id, high.id);
        assert_eq!(next(&db, "mod2").await.unwrap().unwrap().id, also_high.id);
        assert_eq!(next(&db, "mod3").await.unwrap().unwrap().id, low.id);
        assert!(next(&db, "mod4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_decision_strikes_creator_and_resolves_reports() {
        let db = Db::memory();
        seed_user(&db, "creator").await;
        let ann = seed_user(&db, "ann").await;
        let reviewer = moderator(&db, "mod").await;
        let clip = post(&db, "creator").await;
        let receipt = report(&db, &ann, report_of(&clip)).await.unwrap();

        start_review(&db, &receipt.queue_item_id, "mod").await.unwrap();
        let done = complete(
            &db,
            &receipt.queue_item_id,
            &reviewer,
            CompleteInput {
                decision: Decision::Remove,
                notes: Some("spam link".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert!(done.review_duration_secs.is_some());

        assert_eq!(
            db.require::<Content>(&clip.id).await.unwrap().status,
            ContentStatus::Removed
        );
        assert_eq!(db.require::<User>("creator").await.unwrap().strike_count, 1);
        let filed = db.require::<Report>(&receipt.report.id).await.unwrap();
        assert_eq!(filed.status, ReportStatus::Resolved);

        let again = CompleteInput {
            decision: Decision::Approve,
            notes: None,
        };
        assert!(matches!(
            complete(&db, &receipt.queue_item_id, &reviewer, again).await,
            Err(AppError::InvalidTransition(_))
        ));

        // resolved reports can be filed again and open a fresh item
        let fresh = report(&db, &ann, report_of(&clip)).await.unwrap();
        assert_ne!(fresh.queue_item_id, receipt.queue_item_id);
    }

    #[tokio::test]
    async fn test_remove_decision_ends_live_stream() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let ann = seed_user(&db, "ann").await;
        let reviewer = moderator(&db, "mod").await;
        let show = crate::services::live::tests::stream(&db, &host, "Show").await;
        live::start(&db, &show.id, "host").await.unwrap();

        let receipt = report(
            &db,
            &ann,
            ReportInput {
                target_kind: TargetKind::Live,
                target_id: show.id.clone(),
                reason: "violence".to_string(),
                details: None,
            },
        )
        .await
        .unwrap();
        complete(
            &db,
            &receipt.queue_item_id,
            &reviewer,
            CompleteInput {
                decision: Decision::Remove,
                notes: None,
            },
        )
        .await
        .unwrap();

        let ended = db.require::<LiveStream>(&show.id).await.unwrap();
        assert_eq!(ended.status, LiveStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert!(ended.duration_secs.is_some());
        assert_eq!(ended.stats.current_viewers, 0);

        // the host lock went with it
        let next = crate::services::live::tests::stream(&db, &host, "Again").await;
        assert!(live::start(&db, &next.id, "host").await.is_ok());
    }

    #[tokio::test]
    async fn test_ban_decision_revokes_sessions() {
        let db = Db::memory();
        seed_user(&db, "troll").await;
        let reviewer = moderator(&db, "mod").await;
        let mut input = flagged("troll", 90.0);
        input.target_kind = TargetKind::User;
        input.creator_id = Some("troll".to_string());
        let item = enqueue(&db, input).await.unwrap();

        complete(
            &db,
            &item.id,
            &reviewer,
            CompleteInput {
                decision: Decision::Ban,
                notes: None,
            },
        )
        .await
        .unwrap();
        let troll = db.require::<User>("troll").await.unwrap();
        assert_eq!(troll.status, UserStatus::Banned);
        assert_eq!(troll.token_version, 1);
    }

    #[tokio::test]
    async fn test_complete_requires_assignee() {
        let db = Db::memory();
        let other = seed_user(&db, "other").await;
        let item = enqueue(&db, flagged("c1", 50.0)).await.unwrap();
        assign(&db, &item.id, "mod").await.unwrap();

        let input = CompleteInput {
            decision: Decision::Approve,
            notes: None,
        };
        let err = complete(&db, &item.id, &other, input).await.unwrap_err();
        assert_eq!(err.code(), "NOT_ASSIGNED");
    }

    #[tokio::test]
    async fn test_escalate_and_sla_sweep() {
        let db = Db::memory();
        let item = enqueue(&db, flagged("c1", 50.0)).await.unwrap();
        let escalated = escalate(&db, &item.id, "graphic").await.unwrap();
        assert_eq!(escalated.priority, item.priority + ESCALATION_BOOST);
        assert_eq!(escalated.level, PriorityLevel::Critical);
        assert_eq!(escalated.status, QueueStatus::Escalated);

        let slow = enqueue(&db, flagged("c2", 10.0)).await.unwrap();
        let later = Utc::now() + Duration::hours(25);
        let swept = sweep_sla(&db, later).await.unwrap();
        assert_eq!(swept, SweepResult { breached: 2, escalated: 1 });

        let slow = db.require::<QueueItem>(&slow.id).await.unwrap();
        assert!(slow.sla_breached);
        assert_eq!(slow.level, PriorityLevel::Critical);
        assert_eq!(sweep_sla(&db, later).await.unwrap(), SweepResult::default());

        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.open, 2);
        assert_eq!(stats.sla_breached, 2);
        assert_eq!(stats.by_level[&PriorityLevel::Critical], 2);

        let critical = QueueFilters {
            level: Some(PriorityLevel::Critical),
            ..Default::default()
        };
        assert_eq!(list(&db, &critical, &PageParams::default()).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn test_report_after_escalation_keeps_critical() {
        let db = Db::memory();
        seed_user(&db, "creator").await;
        let ann = seed_user(&db, "ann").await;
        let ben = seed_user(&db, "ben").await;
        let clip = post(&db, "creator").await;

        let receipt = report(&db, &ann, report_of(&clip)).await.unwrap();
        let escalated = escalate(&db, &receipt.queue_item_id, "graphic").await.unwrap();
        assert_eq!(escalated.level, PriorityLevel::Critical);

        report(&db, &ben, report_of(&clip)).await.unwrap();
        let item = db.require::<QueueItem>(&receipt.queue_item_id).await.unwrap();
        assert_eq!(item.risk.report_count, 2);
        assert_eq!(item.level, PriorityLevel::Critical);
        assert_eq!(item.status, QueueStatus::Escalated);
        assert!(item.priority >= escalated.priority);
        assert!(item.sla_due_at <= escalated.sla_due_at);
    }
}
