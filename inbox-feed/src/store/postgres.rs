use super::{FeedStore, Selection, Transition, Upserted};
use crate::query::FeedQuery;
use crate::snapshot::END_FIELD;
use crate::types::{
    Action, FeedItem, FeedKind, Result, Settings, Timeline, MAX_AUTOARCHIVE_AFTER_DAYS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

const ITEM_COLUMNS: &str = "id, subscriber_id, dao_id, proposal_id, discussion_id, kind, action, \
     snapshot, timeline, created_at, updated_at, read_at, archived_at, unarchived_at, deleted_at";

pub struct PgFeedStore {
    db: PgPool,
}

impl PgFeedStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { db })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn upsert(&self, item: &FeedItem) -> Result<Upserted> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        // Concurrent fanouts for the same key queue up behind this lock.
        let existing: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, action FROM feed_items
            WHERE subscriber_id = $1 AND dao_id = $2 AND proposal_id = $3
            FOR UPDATE
            "#,
        )
        .bind(item.subscriber_id)
        .bind(item.dao_id)
        .bind(&item.proposal_id)
        .fetch_optional(&mut *tx)
        .await?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO feed_items (id, subscriber_id, dao_id, proposal_id, discussion_id,
                                    kind, action, snapshot, timeline, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (subscriber_id, dao_id, proposal_id) DO UPDATE SET
                snapshot = EXCLUDED.snapshot,
                timeline = EXCLUDED.timeline,
                action = EXCLUDED.action,
                created_at = EXCLUDED.created_at,
                updated_at = GREATEST(feed_items.updated_at, EXCLUDED.updated_at)
            RETURNING id
            "#,
        )
        .bind(item.id)
        .bind(item.subscriber_id)
        .bind(item.dao_id)
        .bind(&item.proposal_id)
        .bind(&item.discussion_id)
        .bind(item.kind.as_str())
        .bind(item.action.code())
        .bind(&item.snapshot)
        .bind(Json(&item.timeline))
        .bind(item.created_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Upserted feed item {} for subscriber {}", id, item.subscriber_id);
        let previous_action =
            existing.map(|(_, code)| Action::from_code(&code).unwrap_or(Action::Unknown));
        Ok(Upserted {
            id,
            inserted: previous_action.is_none(),
            previous_action,
        })
    }

    async fn find(&self, query: &FeedQuery) -> Result<Vec<FeedItem>> {
        let mut qb = QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM feed_items"));
        query.push_where(&mut qb);
        query.push_order(&mut qb);
        query.push_page(&mut qb);

        let rows = qb.build().fetch_all(&self.db).await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn count(&self, query: &FeedQuery) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM feed_items");
        query.push_where(&mut qb);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.db).await?;
        Ok(count)
    }

    async fn transition(
        &self,
        subscriber_id: Uuid,
        selection: &Selection,
        transition: Transition,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut qb = QueryBuilder::new("UPDATE feed_items SET ");
        match transition {
            Transition::Read => {
                qb.push("read_at = ").push_bind(now);
            }
            Transition::Unread => {
                qb.push("read_at = NULL");
            }
            Transition::Archive => {
                qb.push("archived_at = ").push_bind(now);
            }
            Transition::Unarchive => {
                qb.push("archived_at = NULL, unarchived_at = ").push_bind(now);
            }
        }

        qb.push(" WHERE deleted_at IS NULL AND subscriber_id = ").push_bind(subscriber_id);
        match selection {
            Selection::Ids(ids) => {
                qb.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
            }
            Selection::Before(cutoff) => {
                qb.push(format!(" AND {} <= ", transition.cutoff_column())).push_bind(*cutoff);
            }
        }

        let result = qb.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn archive_expired(&self, default_after_days: i32) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE feed_items AS i
            SET archived_at = $1
            WHERE i.archived_at IS NULL
              AND i.deleted_at IS NULL
              AND jsonb_typeof(i.snapshot -> '{END_FIELD}') = 'number'
              AND to_timestamp((i.snapshot ->> '{END_FIELD}')::double precision)
                  < $1 - make_interval(days => LEAST(GREATEST(COALESCE(
                        (SELECT s.autoarchive_after_days FROM feed_settings s
                         WHERE s.subscriber_id = i.subscriber_id),
                        $2), 0), {MAX_AUTOARCHIVE_AFTER_DAYS}))
            "#
        ))
        .bind(Utc::now())
        .bind(default_after_days)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn settings(&self, subscriber_id: Uuid) -> Result<Option<Settings>> {
        let row = sqlx::query(
            r#"
            SELECT subscriber_id, autoarchive_after_days, archive_proposal_after_vote,
                   created_at, updated_at
            FROM feed_settings
            WHERE subscriber_id = $1
            "#,
        )
        .bind(subscriber_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(Settings {
                subscriber_id: row.try_get("subscriber_id")?,
                autoarchive_after_days: row.try_get("autoarchive_after_days")?,
                archive_proposal_after_vote: row.try_get("archive_proposal_after_vote")?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn store_settings(&self, settings: &Settings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feed_settings (subscriber_id, autoarchive_after_days,
                                       archive_proposal_after_vote, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (subscriber_id) DO UPDATE SET
                autoarchive_after_days = EXCLUDED.autoarchive_after_days,
                archive_proposal_after_vote = EXCLUDED.archive_proposal_after_vote,
                updated_at = NOW()
            "#,
        )
        .bind(settings.subscriber_id)
        .bind(settings.autoarchive_after_days)
        .bind(settings.archive_proposal_after_vote)
        .bind(settings.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

fn item_from_row(row: &PgRow) -> Result<FeedItem> {
    let kind: String = row.try_get("kind")?;
    let action: String = row.try_get("action")?;
    let timeline: Json<Timeline> = row.try_get("timeline")?;

    Ok(FeedItem {
        id: row.try_get("id")?,
        subscriber_id: row.try_get("subscriber_id")?,
        dao_id: row.try_get("dao_id")?,
        proposal_id: row.try_get("proposal_id")?,
        discussion_id: row.try_get("discussion_id")?,
        kind: kind.parse::<FeedKind>()?,
        action: Action::from_code(&action).unwrap_or(Action::Unknown),
        snapshot: row.try_get("snapshot")?,
        timeline: timeline.0,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        read_at: row.try_get::<Option<DateTime<Utc>>, _>("read_at")?,
        archived_at: row.try_get::<Option<DateTime<Utc>>, _>("archived_at")?,
        unarchived_at: row.try_get::<Option<DateTime<Utc>>, _>("unarchived_at")?,
        deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?,
    })
}
