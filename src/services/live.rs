use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::{with_retry, Batch, Db, Direction, Query, Versioned},
    error::{AppError, AppResult},
    models::{
        live::{MAX_DESCRIPTION_LEN, MAX_TITLE_LEN},
        new_id, LiveCategory, LiveHostLock, LivePrivacy, LiveStats, LiveStatus, LiveStream, LiveViewer, Page,
        PageParams, Product, ProductStatus, User,
    },
    services::users,
};

#[derive(Debug, Deserialize)]
pub struct CreateLiveInput {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<LiveCategory>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub privacy: Option<LivePrivacy>,
    pub scheduled_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LiveFilters {
    pub category: Option<LiveCategory>,
}

#[derive(Debug, Serialize)]
pub struct ViewerUpdate {
    pub stream_id: String,
    pub watching: bool,
    pub stats: LiveStats,
}

fn new_stream_key() -> String {
    format!("live_{}", Uuid::new_v4().simple())
}

fn invalid_transition(stream: &LiveStream, to: LiveStatus) -> AppError {
    AppError::InvalidTransition(format!(
        "Cannot move live stream from {:?} to {:?}",
        stream.status, to
    ))
}

/// Privacy gate for everyone but the host and admins
pub(crate) async fn ensure_can_watch(db: &Db, stream: &LiveStream, viewer: Option<&User>) -> AppResult<()> {
    if viewer.is_some_and(|v| v.id == stream.host_id || v.role.is_admin()) {
        return Ok(());
    }
    let allowed = match stream.privacy {
        LivePrivacy::Public => true,
        LivePrivacy::Followers => match viewer {
            Some(v) => users::is_following(db, &v.id, &stream.host_id).await?,
            None => false,
        },
        LivePrivacy::Private => false,
    };
    if !allowed {
        return Err(AppError::not_found("Live stream not found"));
    }
    Ok(())
}

pub async fn create(db: &Db, host: &User, input: CreateLiveInput) -> AppResult<LiveStream> {
    let title = input.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::invalid(format!(
            "Title must be 1-{} characters",
            MAX_TITLE_LEN
        )));
    }
    let description = input.description.unwrap_or_default();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::invalid(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }

    let now = Utc::now();
    let stream = LiveStream {
        id: new_id(),
        host_id: host.id.clone(),
        title: title.to_string(),
        description,
        category: input.category.unwrap_or_default(),
        tags: input
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        privacy: input.privacy.unwrap_or_default(),
        status: LiveStatus::Scheduled,
        stream_key: Some(new_stream_key()),
        scheduled_start: input.scheduled_start,
        started_at: None,
        ended_at: None,
        duration_secs: None,
        stats: LiveStats::default(),
        featured_products: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    db.insert(&stream).await?;

    tracing::info!(stream_id = %stream.id, host_id = %host.id, "Live stream created");
    Ok(stream)
}

/// Goes live; a host can only broadcast one stream at a time
pub async fn start(db: &Db, stream_id: &str, host_id: &str) -> AppResult<LiveStream> {
    let stream = with_retry("start_live", || async {
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        if stream.host_id != host_id {
            return Err(AppError::forbidden("NOT_HOST", "Only the host can start this stream"));
        }
        if stream.status != LiveStatus::Scheduled {
            return Err(invalid_transition(&stream, LiveStatus::Live));
        }
        let already_live = db
            .count::<LiveStream>(
                &Query::new()
                    .eq("host_id", host_id)
                    .eq("status", LiveStatus::Live),
            )
            .await?;
        if already_live > 0 {
            return Err(AppError::Conflict("You already have a live stream".to_string()));
        }

        let now = Utc::now();
        let mut batch = db.batch();
        // A racing start conflicts on the lock and, on retry, sees the other stream live
        match db.get_versioned::<LiveHostLock>(&LiveHostLock::doc_id(host_id)).await? {
            Some(mut stale) => {
                stale.stream_id = stream_id.to_string();
                stale.acquired_at = now;
                batch.update(&stale)?;
            }
            None => batch.insert(&LiveHostLock {
                id: LiveHostLock::doc_id(host_id),
                host_id: host_id.to_string(),
                stream_id: stream_id.to_string(),
                acquired_at: now,
            })?,
        }
        stream.status = LiveStatus::Live;
        stream.started_at = Some(now);
        stream.updated_at = now;
        batch.update(&stream)?;
        batch.commit().await?;
        Ok(stream.into_inner())
    })
    .await?;

    tracing::info!(stream_id, host_id, "Live stream started");
    Ok(stream)
}

/// Stages the end of a stream and releases the host's broadcast lock
pub(crate) fn stage_end(
    batch: &mut Batch,
    stream: &mut Versioned<LiveStream>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if stream.status == LiveStatus::Live {
        batch.delete::<LiveHostLock>(&LiveHostLock::doc_id(&stream.host_id));
    }
    stream.status = LiveStatus::Ended;
    stream.ended_at = Some(now);
    stream.duration_secs = stream.started_at.map(|s| (now - s).num_seconds().max(0));
    stream.stats.current_viewers = 0;
    stream.updated_at = now;
    batch.update(stream)
}

/// Ends a live stream; the host or an admin may end it
pub async fn end(db: &Db, stream_id: &str, user: &User) -> AppResult<LiveStream> {
    let stream = with_retry("end_live", || async {
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        if stream.host_id != user.id && !user.role.is_admin() {
            return Err(AppError::forbidden("NOT_HOST", "Only the host can end this stream"));
        }
        if stream.status != LiveStatus::Live {
            return Err(invalid_transition(&stream, LiveStatus::Ended));
        }

        let mut batch = db.batch();
        stage_end(&mut batch, &mut stream, Utc::now())?;
        batch.commit().await?;
        Ok(stream.into_inner())
    })
    .await?;

    tracing::info!(
        stream_id,
        ended_by = %user.id,
        peak_viewers = stream.stats.peak_viewers,
        duration_secs = ?stream.duration_secs,
        "Live stream ended"
    );
    Ok(stream)
}

pub async fn join(db: &Db, stream_id: &str, viewer: &User) -> AppResult<ViewerUpdate> {
    let snapshot = db.require::<LiveStream>(stream_id).await?;
    ensure_can_watch(db, &snapshot, Some(viewer)).await?;

    let stats = with_retry("join_live", || async {
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        if stream.status != LiveStatus::Live {
            return Err(AppError::invalid("This stream is not live"));
        }

        let now = Utc::now();
        let viewer_id = LiveViewer::doc_id(stream_id, &viewer.id);
        let mut batch = db.batch();
        match db.get_versioned::<LiveViewer>(&viewer_id).await? {
            Some(membership) if membership.left_at.is_none() => return Ok(stream.stats.clone()),
            Some(mut membership) => {
                membership.left_at = None;
                membership.joined_at = now;
                batch.update(&membership)?;
            }
            None => {
                batch.insert(&LiveViewer {
                    id: viewer_id,
                    stream_id: stream_id.to_string(),
                    user_id: viewer.id.clone(),
                    joined_at: now,
                    left_at: None,
                })?;
                stream.stats.total_views += 1;
            }
        }
        stream.stats.current_viewers += 1;
        stream.stats.peak_viewers = stream.stats.peak_viewers.max(stream.stats.current_viewers);
        stream.updated_at = now;
        batch.update(&stream)?;
        batch.commit().await?;
        Ok(stream.stats.clone())
    })
    .await?;

    tracing::debug!(stream_id, user_id = %viewer.id, viewers = stats.current_viewers, "Viewer joined");
    Ok(ViewerUpdate {
        stream_id: stream_id.to_string(),
        watching: true,
        stats,
    })
}

pub async fn leave(db: &Db, stream_id: &str, user_id: &str) -> AppResult<ViewerUpdate> {
    let stats = with_retry("leave_live", || async {
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        let Some(mut membership) = db
            .get_versioned::<LiveViewer>(&LiveViewer::doc_id(stream_id, user_id))
            .await?
            .filter(|m| m.left_at.is_none())
        else {
            return Ok(stream.stats.clone());
        };

        let now = Utc::now();
        membership.left_at = Some(now);
        stream.stats.current_viewers = stream.stats.current_viewers.saturating_sub(1);
        stream.updated_at = now;

        let mut batch = db.batch();
        batch.update(&membership)?;
        batch.update(&stream)?;
        batch.commit().await?;
        Ok(stream.stats.clone())
    })
    .await?;

    Ok(ViewerUpdate {
        stream_id: stream_id.to_string(),
        watching: false,
        stats,
    })
}

pub async fn like(db: &Db, stream_id: &str, viewer: &User) -> AppResult<u64> {
    let snapshot = db.require::<LiveStream>(stream_id).await?;
    ensure_can_watch(db, &snapshot, Some(viewer)).await?;

    with_retry("like_live", || async {
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        if stream.status != LiveStatus::Live {
            return Err(AppError::invalid("This stream is not live"));
        }
        stream.stats.likes += 1;
        db.update(&stream).await?;
        Ok(stream.stats.likes)
    })
    .await
}

/// Public streams that are live now, busiest first
pub async fn list_live(db: &Db, filters: &LiveFilters, params: &PageParams) -> AppResult<Page<LiveStream>> {
    let mut query = Query::new()
        .eq("status", LiveStatus::Live)
        .eq("privacy", LivePrivacy::Public)
        .order_by("stats.current_viewers", Direction::Desc)
        .order_by("started_at", Direction::Desc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    if let Some(category) = filters.category {
        query = query.eq("category", category);
    }
    let items = db.find::<LiveStream>(&query).await?;
    Ok(Page::from_overfetch(items, params).map(|s| s.for_viewer(None)))
}

pub async fn get(db: &Db, stream_id: &str, viewer: Option<&User>) -> AppResult<LiveStream> {
    let stream = db.require::<LiveStream>(stream_id).await?.into_inner();
    ensure_can_watch(db, &stream, viewer).await?;
    Ok(stream.for_viewer(viewer.map(|v| v.id.as_str())))
}

/// A host's streams, newest first; private ones only for the host
pub async fn list_by_host(
    db: &Db,
    host_id: &str,
    viewer: Option<&User>,
    params: &PageParams,
) -> AppResult<Page<LiveStream>> {
    let viewer_id = viewer.map(|v| v.id.as_str());
    let mut query = Query::new()
        .eq("host_id", host_id)
        .order_by("created_at", Direction::Desc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    if viewer_id != Some(host_id) {
        query = query.ne("privacy", LivePrivacy::Private);
    }
    let items = db.find::<LiveStream>(&query).await?;
    Ok(Page::from_overfetch(items, params).map(|s| s.for_viewer(viewer_id)))
}

/// Features an active product during the stream
pub async fn pin_product(db: &Db, stream_id: &str, host_id: &str, product_id: &str) -> AppResult<LiveStream> {
    let product = db.require::<Product>(product_id).await?;
    if product.status != ProductStatus::Active {
        return Err(AppError::invalid("Only active products can be featured"));
    }

    let stream = with_retry("pin_product", || async {
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        if stream.host_id != host_id {
            return Err(AppError::forbidden("NOT_HOST", "Only the host can feature products"));
        }
        if stream.status == LiveStatus::Ended {
            return Err(AppError::invalid("This stream has ended"));
        }
        if !stream.featured_products.iter().any(|p| p == product_id) {
            stream.featured_products.push(product_id.to_string());
            stream.updated_at = Utc::now();
            db.update(&stream).await?;
        }
        Ok(stream.into_inner())
    })
    .await?;

    tracing::info!(stream_id, product_id, "Product featured in live stream");
    Ok(stream)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::users::tests::seed_user;

    pub(crate) async fn stream(db: &Db, host: &User, title: &str) -> LiveStream {
        create(db, host, input(title)).await.unwrap()
    }

    fn input(title: &str) -> CreateLiveInput {
        CreateLiveInput {
            title: title.to_string(),
            description: None,
            category: Some(LiveCategory::Music),
            tags: vec![" Jazz ".to_string()],
            privacy: None,
            scheduled_start: None,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let stream = create(&db, &host, input("Late show")).await.unwrap();
        assert_eq!(stream.status, LiveStatus::Scheduled);
        assert_eq!(stream.tags, vec!["jazz"]);
        assert!(stream.stream_key.is_some());

        assert!(matches!(
            end(&db, &stream.id, &host).await,
            Err(AppError::InvalidTransition(_))
        ));
        let live = start(&db, &stream.id, "host").await.unwrap();
        assert!(live.started_at.is_some());
        assert!(matches!(
            start(&db, &stream.id, "host").await,
            Err(AppError::InvalidTransition(_))
        ));

        let ended = end(&db, &stream.id, &host).await.unwrap();
        assert_eq!(ended.status, LiveStatus::Ended);
        assert!(ended.duration_secs.is_some());
    }

    #[tokio::test]
    async fn test_one_live_stream_per_host() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let first = create(&db, &host, input("One")).await.unwrap();
        let second = create(&db, &host, input("Two")).await.unwrap();
        start(&db, &first.id, "host").await.unwrap();
        assert!(matches!(
            start(&db, &second.id, "host").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_one_stream() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let first = create(&db, &host, input("One")).await.unwrap();
        let second = create(&db, &host, input("Two")).await.unwrap();

        let (a, b) = tokio::join!(start(&db, &first.id, "host"), start(&db, &second.id, "host"));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let live = db
            .count::<LiveStream>(&Query::new().eq("host_id", "host").eq("status", LiveStatus::Live))
            .await
            .unwrap();
        assert_eq!(live, 1);

        let winner = if a.is_ok() { &first } else { &second };
        let lock = db
            .require::<LiveHostLock>(&LiveHostLock::doc_id("host"))
            .await
            .unwrap();
        assert_eq!(lock.stream_id, winner.id);
    }

    #[tokio::test]
    async fn test_ending_releases_host_lock() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let first = create(&db, &host, input("One")).await.unwrap();
        let second = create(&db, &host, input("Two")).await.unwrap();

        start(&db, &first.id, "host").await.unwrap();
        end(&db, &first.id, &host).await.unwrap();
        assert!(db
            .get::<LiveHostLock>(&LiveHostLock::doc_id("host"))
            .await
            .unwrap()
            .is_none());
        let live = start(&db, &second.id, "host").await.unwrap();
        assert_eq!(live.status, LiveStatus::Live);
    }

    #[tokio::test]
    async fn test_stale_host_lock_is_taken_over() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let stream = create(&db, &host, input("Show")).await.unwrap();
        db.insert(&LiveHostLock {
            id: LiveHostLock::doc_id("host"),
            host_id: "host".to_string(),
            stream_id: "gone".to_string(),
            acquired_at: Utc::now(),
        })
        .await
        .unwrap();

        start(&db, &stream.id, "host").await.unwrap();
        let lock = db
            .require::<LiveHostLock>(&LiveHostLock::doc_id("host"))
            .await
            .unwrap();
        assert_eq!(lock.stream_id, stream.id);
    }

    #[tokio::test]
    async fn test_viewers_peak_and_unique_total() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let a = seed_user(&db, "a").await;
        let b = seed_user(&db, "b").await;
        let stream = create(&db, &host, input("Show")).await.unwrap();

        assert!(join(&db, &stream.id, &a).await.is_err());
        start(&db, &stream.id, "host").await.unwrap();

        join(&db, &stream.id, &a).await.unwrap();
        join(&db, &stream.id, &a).await.unwrap();
        let update = join(&db, &stream.id, &b).await.unwrap();
        assert_eq!(update.stats.current_viewers, 2);

        leave(&db, &stream.id, "a").await.unwrap();
        let update = join(&db, &stream.id, &a).await.unwrap();
        assert_eq!(update.stats.current_viewers, 2);
        assert_eq!(update.stats.peak_viewers, 2);
        assert_eq!(update.stats.total_views, 2);

        assert_eq!(like(&db, &stream.id, &b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_key_and_private_visibility() {
        let db = Db::memory();
        let host = seed_user(&db, "host").await;
        let fan = seed_user(&db, "fan").await;
        let mut private = input("Secret");
        private.privacy = Some(LivePrivacy::Private);
        let secret = create(&db, &host, private).await.unwrap();
        let open = create(&db, &host, input("Open")).await.unwrap();

        assert!(get(&db, &open.id, Some(&fan)).await.unwrap().stream_key.is_none());
        assert!(get(&db, &open.id, Some(&host)).await.unwrap().stream_key.is_some());
        assert!(get(&db, &secret.id, Some(&fan)).await.is_err());

        let public_view = list_by_host(&db, "host", Some(&fan), &PageParams::default())
            .await
            .unwrap();
        assert_eq!(public_view.items.len(), 1);
        let own_view = list_by_host(&db, "host", Some(&host), &PageParams::default())
            .await
            .unwrap();
        assert_eq!(own_view.items.len(), 2);
    }

    #[tokio::test]
    async fn test_list_live_orders_by_viewers() {
        let db = Db::memory();
        let h1 = seed_user(&db, "h1").await;
        let h2 = seed_user(&db, "h2").await;
        let fan = seed_user(&db, "fan").await;
        let quiet = create(&db, &h1, input("Quiet")).await.unwrap();
        let busy = create(&db, &h2, input("Busy")).await.unwrap();
        start(&db, &quiet.id, "h1").await.unwrap();
        start(&db, &busy.id, "h2").await.unwrap();
        join(&db, &busy.id, &fan).await.unwrap();

        let page = list_live(&db, &LiveFilters::default(), &PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.items[0].id, busy.id);
        assert!(page.items.iter().all(|s| s.stream_key.is_none()));

        let gaming = LiveFilters {
            category: Some(LiveCategory::Gaming),
        };
        assert!(list_live(&db, &gaming, &PageParams::default()).await.unwrap().items.is_empty());
    }
}
