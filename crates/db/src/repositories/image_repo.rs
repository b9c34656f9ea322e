//! Repository for the `images` table.

use sqlx::{Executor, Sqlite, SqliteConnection};

use melon_core::dataset::ImageRecord;
use melon_core::types::Timestamp;

use crate::models::image::{ImageRow, SetStats, SetStatsRow};

/// Column list for `images` queries.
const COLUMNS: &str = "path, dataset_set, thumbnail_ref, discovered_at";

/// Provides access to discovered images and the unannotated queue.
pub struct ImageRepo;

impl ImageRepo {
    /// Insert an image if its path is new. Returns `true` when inserted.
    pub async fn insert<'e, E>(
        executor: E,
        record: &ImageRecord,
        discovered_at: Timestamp,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO images (path, dataset_set, thumbnail_ref, discovered_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (path) DO NOTHING",
        )
        .bind(&record.path)
        .bind(record.set.as_str())
        .bind(&record.thumbnail_ref)
        .bind(discovered_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the given paths (and, by cascade, their annotations).
    pub async fn delete_many(
        conn: &mut SqliteConnection,
        paths: &[String],
    ) -> Result<u64, sqlx::Error> {
        let mut deleted = 0;
        for path in paths {
            deleted += sqlx::query("DELETE FROM images WHERE path = ?1")
                .bind(path)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(deleted)
    }

    pub async fn find_by_path<'e, E>(
        executor: E,
        path: &str,
    ) -> Result<Option<ImageRecord>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM images WHERE path = ?1");
        sqlx::query_as::<_, ImageRow>(&query)
            .bind(path)
            .fetch_optional(executor)
            .await?
            .map(ImageRecord::try_from)
            .transpose()
    }

    /// Every known path, sorted.
    pub async fn list_paths<'e, E>(executor: E) -> Result<Vec<String>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, String>("SELECT path FROM images ORDER BY path")
            .fetch_all(executor)
            .await
    }

    pub async fn count_unannotated<'e, E>(executor: E) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM images i \
             LEFT JOIN annotations a ON a.image_path = i.path \
             WHERE a.image_path IS NULL",
        )
        .fetch_one(executor)
        .await
    }

    /// One page of images without an annotation, ordered by path.
    pub async fn list_unannotated<'e, E>(
        executor: E,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ImageRow>(
            "SELECT i.path, i.dataset_set, i.thumbnail_ref, i.discovered_at \
             FROM images i \
             LEFT JOIN annotations a ON a.image_path = i.path \
             WHERE a.image_path IS NULL \
             ORDER BY i.path \
             LIMIT ?1 OFFSET ?2",
        )
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(ImageRecord::try_from)
            .collect()
    }

    /// Per-partition totals, in `train, valid, test` order. Partitions with no
    /// images are omitted.
    pub async fn stats<'e, E>(executor: E) -> Result<Vec<SetStats>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let mut stats = sqlx::query_as::<_, SetStatsRow>(
            "SELECT i.dataset_set, COUNT(*) AS total, COUNT(a.image_path) AS annotated \
             FROM images i \
             LEFT JOIN annotations a ON a.image_path = i.path \
             GROUP BY i.dataset_set",
        )
        .fetch_all(executor)
        .await?
        .into_iter()
        .map(SetStats::try_from)
        .collect::<Result<Vec<_>, _>>()?;
        stats.sort_by_key(|s| s.set);
        Ok(stats)
    }
}
