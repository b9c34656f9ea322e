use sqlx::FromRow;

use melon_core::job::{LastAction, TerminalStatus};
use melon_core::types::Timestamp;

/// A row from the `last_actions` table.
#[derive(Debug, Clone, FromRow)]
pub struct LastActionRow {
    pub action_key: String,
    pub status: String,
    pub duration_secs: f64,
    pub summary: Option<String>,
    pub performed_at: Timestamp,
}

fn decode_status(value: &str) -> Result<TerminalStatus, sqlx::Error> {
    match value {
        "succeeded" => Ok(TerminalStatus::Succeeded),
        "failed" => Ok(TerminalStatus::Failed),
        "cancelled" => Ok(TerminalStatus::Cancelled),
        other => Err(sqlx::Error::Decode(
            format!("unknown terminal status '{other}'").into(),
        )),
    }
}

impl TryFrom<LastActionRow> for LastAction {
    type Error = sqlx::Error;

    fn try_from(row: LastActionRow) -> Result<Self, Self::Error> {
        Ok(LastAction {
            action_key: row.action_key,
            status: decode_status(&row.status)?,
            duration_secs: row.duration_secs,
            summary: row.summary,
            performed_at: row.performed_at,
        })
    }
}
