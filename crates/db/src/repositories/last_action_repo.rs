//! Repository for the `last_actions` table.

use sqlx::{Executor, Sqlite};

use melon_core::job::LastAction;

use crate::models::last_action::LastActionRow;

/// Column list for `last_actions` queries.
const COLUMNS: &str = "action_key, status, duration_secs, summary, performed_at";

/// Remembers the most recent terminal run per action key.
pub struct LastActionRepo;

impl LastActionRepo {
    pub async fn upsert<'e, E>(executor: E, action: &LastAction) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO last_actions (action_key, status, duration_secs, summary, performed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (action_key) DO UPDATE SET \
                 status = excluded.status, \
                 duration_secs = excluded.duration_secs, \
                 summary = excluded.summary, \
                 performed_at = excluded.performed_at",
        )
        .bind(&action.action_key)
        .bind(action.status.as_str())
        .bind(action.duration_secs)
        .bind(&action.summary)
        .bind(action.performed_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn list<'e, E>(executor: E) -> Result<Vec<LastAction>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM last_actions ORDER BY action_key");
        sqlx::query_as::<_, LastActionRow>(&query)
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(LastAction::try_from)
            .collect()
    }
}
