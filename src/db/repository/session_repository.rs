use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{Session, UpsertSession};
use crate::error::{AppError, AppResult};

const SESSION_COLUMNS: &str = "id, ical_uid, start_time, end_time, title, description, location, \
                               client_name, created_at, updated_at";

/// Repository for studio sessions (`sessions` table).
pub struct SessionRepository;

impl SessionRepository {
    /// Insert or update a session.
    ///
    /// Rows are matched on `ical_uid` when the session carries one, so a
    /// re-imported event updates its existing row; otherwise on `id`.
    pub async fn upsert(pool: &SqlitePool, session: UpsertSession) -> AppResult<Session> {
        let now = Utc::now().naive_utc();
        let conflict_target = if session.ical_uid.is_some() {
            "ical_uid"
        } else {
            "id"
        };

        let sql = format!(
            r#"
            INSERT INTO sessions (
                id, ical_uid, start_time, end_time, title, description, location,
                client_name, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT({conflict_target}) DO UPDATE SET
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                title = excluded.title,
                description = excluded.description,
                location = excluded.location,
                client_name = excluded.client_name,
                updated_at = excluded.updated_at
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, Session>(&sql)
            .bind(&session.id)
            .bind(&session.ical_uid)
            .bind(session.start_time)
            .bind(session.end_time)
            .bind(&session.title)
            .bind(&session.description)
            .bind(&session.location)
            .bind(&session.client_name)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(record)
    }

    pub async fn find_by_ical_uid(pool: &SqlitePool, ical_uid: &str) -> AppResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE ical_uid = ?");
        sqlx::query_as::<_, Session>(&sql)
            .bind(ical_uid)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Sessions starting within `[from, to]`, earliest first.
    pub async fn list_between(
        pool: &SqlitePool,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE start_time >= ? AND start_time <= ? \
             ORDER BY start_time ASC, id ASC"
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn count(pool: &SqlitePool) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(count)
    }

    /// Delete sessions that share exact start and end times with an older row.
    /// The oldest row of each cluster (by `created_at`, then insertion order) is kept.
    pub async fn cleanup_duplicate_clusters(pool: &SqlitePool) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE EXISTS (
                SELECT 1 FROM sessions AS keeper
                WHERE keeper.start_time = sessions.start_time
                  AND keeper.end_time = sessions.end_time
                  AND (
                      keeper.created_at < sessions.created_at
                      OR (keeper.created_at = sessions.created_at AND keeper.rowid < sessions.rowid)
                  )
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 10)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn session(id: &str, uid: Option<&str>, start: u32) -> UpsertSession {
        UpsertSession {
            id: id.to_string(),
            ical_uid: uid.map(str::to_string),
            start_time: at(start),
            end_time: at(start + 1),
            title: "Familienshooting".to_string(),
            description: String::new(),
            location: String::new(),
            client_name: "Müller".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_by_ical_uid_is_idempotent() {
        let pool = test_pool().await;

        SessionRepository::upsert(&pool, session("a", Some("uid-a@x"), 12))
            .await
            .unwrap();
        let mut changed = session("a", Some("uid-a@x"), 14);
        changed.title = "Moved".to_string();
        let row = SessionRepository::upsert(&pool, changed).await.unwrap();

        assert_eq!(SessionRepository::count(&pool).await.unwrap(), 1);
        assert_eq!(row.title, "Moved");
        assert_eq!(row.start_time, at(14));

        let found = SessionRepository::find_by_ical_uid(&pool, "uid-a@x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "a");
    }

    #[tokio::test]
    async fn sessions_without_uid_upsert_by_id() {
        let pool = test_pool().await;
        SessionRepository::upsert(&pool, session("manual-1", None, 9))
            .await
            .unwrap();
        SessionRepository::upsert(&pool, session("manual-1", None, 10))
            .await
            .unwrap();
        SessionRepository::upsert(&pool, session("manual-2", None, 10))
            .await
            .unwrap();
        assert_eq!(SessionRepository::count(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_between_is_ordered_and_bounded() {
        let pool = test_pool().await;
        for (id, start) in [("late", 16), ("early", 9), ("noon", 12)] {
            SessionRepository::upsert(&pool, session(id, Some(id), start))
                .await
                .unwrap();
        }
        let rows = SessionRepository::list_between(&pool, at(9), at(12))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "noon"]);
    }

    #[tokio::test]
    async fn cleanup_keeps_oldest_of_each_cluster() {
        let pool = test_pool().await;
        SessionRepository::upsert(&pool, session("first", Some("u1"), 12))
            .await
            .unwrap();
        SessionRepository::upsert(&pool, session("second", Some("u2"), 12))
            .await
            .unwrap();
        SessionRepository::upsert(&pool, session("third", Some("u3"), 12))
            .await
            .unwrap();
        SessionRepository::upsert(&pool, session("other", Some("u4"), 15))
            .await
            .unwrap();

        let deleted = SessionRepository::cleanup_duplicate_clusters(&pool)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(SessionRepository::find_by_ical_uid(&pool, "u1")
            .await
            .unwrap()
            .is_some());
        assert!(SessionRepository::find_by_ical_uid(&pool, "u4")
            .await
            .unwrap()
            .is_some());
        assert_eq!(SessionRepository::count(&pool).await.unwrap(), 2);
    }
}
