//! Reminder bookkeeping: queued pending notifications, the per-menu
//! delivery ledger, and execution audit rows.

use chrono::{DateTime, Utc};
use menubell_core::types::{
    CampaignExecution, ExecutionStatus, NotifiedMenu, NotifiedStatus, PendingNotification,
    PendingStatus,
};
use menubell_core::{MenubellError, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::{parse_ts, parse_ts_opt, ts, Store};

const PENDING_COLS: &str =
    "id, trigger_id, conversation_id, phone_number, message_content, menu_ids, status, created_at, resolved_at";

fn row_to_pending(row: &Row<'_>) -> rusqlite::Result<PendingNotification> {
    let status: String = row.get(6)?;
    let menu_ids_json: String = row.get(5)?;
    Ok(PendingNotification {
        id: row.get(0)?,
        trigger_id: row.get(1)?,
        conversation_id: row.get(2)?,
        phone_number: row.get(3)?,
        message_content: row.get(4)?,
        menu_ids: serde_json::from_str(&menu_ids_json).unwrap_or_default(),
        status: PendingStatus::parse(&status),
        created_at: parse_ts(&row.get::<_, String>(7)?),
        resolved_at: parse_ts_opt(row.get(8)?),
    })
}

const NOTIFIED_COLS: &str =
    "id, trigger_id, menu_id, phone_number, conversation_id, status, notified_at, created_at";

fn row_to_notified(row: &Row<'_>) -> rusqlite::Result<NotifiedMenu> {
    let status: String = row.get(5)?;
    Ok(NotifiedMenu {
        id: row.get(0)?,
        trigger_id: row.get(1)?,
        menu_id: row.get(2)?,
        phone_number: row.get(3)?,
        conversation_id: row.get(4)?,
        status: NotifiedStatus::parse(&status),
        notified_at: parse_ts_opt(row.get(6)?),
        created_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

const EXECUTION_COLS: &str =
    "id, campaign_id, trigger_id, executed_at, total_recipients, sent_count, failed_count, status, completed_at, error_message";

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<CampaignExecution> {
    let status: String = row.get(7)?;
    Ok(CampaignExecution {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        trigger_id: row.get(2)?,
        executed_at: parse_ts(&row.get::<_, String>(3)?),
        total_recipients: row.get(4)?,
        sent_count: row.get(5)?,
        failed_count: row.get(6)?,
        status: ExecutionStatus::parse(&status),
        completed_at: parse_ts_opt(row.get(8)?),
        error_message: row.get(9)?,
    })
}

impl Store {
    // ── Pending notifications ──────────────────────────────

    /// Queue reminder content behind a closed window, merging into the
    /// existing `waiting_response` row for the (trigger, conversation) pair
    /// when one exists: menu ids are unioned in order, the first-rendered
    /// content is kept. The read-modify-write runs inside one transaction.
    pub fn enqueue_pending(
        &self,
        trigger_id: i64,
        conversation_id: i64,
        phone_number: &str,
        message_content: &str,
        menu_ids: &[i64],
    ) -> Result<PendingNotification> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| MenubellError::db(format!("Begin: {e}")))?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, menu_ids FROM pending_notifications
                 WHERE trigger_id = ?1 AND conversation_id = ?2 AND status = 'waiting_response'",
                params![trigger_id, conversation_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(MenubellError::db)?;

        let id = match existing {
            Some((id, ids_json)) => {
                let mut ids: Vec<i64> = serde_json::from_str(&ids_json).unwrap_or_default();
                for menu_id in menu_ids {
                    if !ids.contains(menu_id) {
                        ids.push(*menu_id);
                    }
                }
                tx.execute(
                    "UPDATE pending_notifications SET menu_ids = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&ids).unwrap_or_else(|_| "[]".into()), id],
                )
                .map_err(|e| MenubellError::db(format!("Merge pending: {e}")))?;
                id
            }
            None => {
                let mut ids: Vec<i64> = Vec::new();
                for menu_id in menu_ids {
                    if !ids.contains(menu_id) {
                        ids.push(*menu_id);
                    }
                }
                tx.execute(
                    "INSERT INTO pending_notifications
                     (trigger_id, conversation_id, phone_number, message_content, menu_ids, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'waiting_response', ?6)",
                    params![
                        trigger_id,
                        conversation_id,
                        phone_number,
                        message_content,
                        serde_json::to_string(&ids).unwrap_or_else(|_| "[]".into()),
                        ts(Utc::now()),
                    ],
                )
                .map_err(|e| MenubellError::db(format!("Insert pending: {e}")))?;
                tx.last_insert_rowid()
            }
        };

        let pending = tx
            .query_row(
                &format!("SELECT {PENDING_COLS} FROM pending_notifications WHERE id = ?1"),
                params![id],
                row_to_pending,
            )
            .map_err(MenubellError::db)?;
        tx.commit()
            .map_err(|e| MenubellError::db(format!("Commit: {e}")))?;
        Ok(pending)
    }

    pub fn get_pending(&self, id: i64) -> Result<PendingNotification> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {PENDING_COLS} FROM pending_notifications WHERE id = ?1"),
            params![id],
            row_to_pending,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MenubellError::NotFound(format!("pending {id}")),
            other => MenubellError::db(other),
        })
    }

    /// `waiting_response` rows queued on one conversation.
    pub fn waiting_pending_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<PendingNotification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PENDING_COLS} FROM pending_notifications
                 WHERE conversation_id = ?1 AND status = 'waiting_response' ORDER BY id"
            ))
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_pending)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    /// Every `waiting_response` row in the system — the sweep input.
    pub fn all_waiting_pending(&self) -> Result<Vec<PendingNotification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PENDING_COLS} FROM pending_notifications
                 WHERE status = 'waiting_response' ORDER BY id"
            ))
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map([], row_to_pending)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    /// Guarded: only a `waiting_response` row can resolve to `sent`.
    pub fn mark_pending_sent(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE pending_notifications SET status = 'sent', resolved_at = ?1
                 WHERE id = ?2 AND status = 'waiting_response'",
                params![ts(Utc::now()), id],
            )
            .map_err(|e| MenubellError::db(format!("Mark pending sent: {e}")))?;
        Ok(changed > 0)
    }

    /// Terminal: an expired batch is never resumed.
    pub fn mark_pending_expired(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE pending_notifications SET status = 'expired', resolved_at = ?1
                 WHERE id = ?2 AND status = 'waiting_response'",
                params![ts(Utc::now()), id],
            )
            .map_err(|e| MenubellError::db(format!("Mark pending expired: {e}")))?;
        Ok(changed > 0)
    }

    // ── Notified-menu ledger ──────────────────────────────

    /// Upsert a ledger row for (trigger, menu, phone). The unique key makes
    /// this the at-most-once guard; a row that already reached `sent` is
    /// never overwritten.
    pub fn record_notified(
        &self,
        trigger_id: i64,
        menu_id: i64,
        phone_number: &str,
        conversation_id: i64,
        status: NotifiedStatus,
    ) -> Result<()> {
        let notified_at = match status {
            NotifiedStatus::Sent => Some(ts(Utc::now())),
            _ => None,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notified_menus
             (trigger_id, menu_id, phone_number, conversation_id, status, notified_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(trigger_id, menu_id, phone_number) DO UPDATE SET
               status = excluded.status,
               conversation_id = excluded.conversation_id,
               notified_at = COALESCE(excluded.notified_at, notified_menus.notified_at)
             WHERE notified_menus.status != 'sent'",
            params![
                trigger_id,
                menu_id,
                phone_number,
                conversation_id,
                status.as_str(),
                notified_at,
                ts(Utc::now()),
            ],
        )
        .map_err(|e| MenubellError::db(format!("Record notified: {e}")))?;
        Ok(())
    }

    /// Menu ids already delivered (`sent`) to a phone for a trigger.
    pub fn sent_menu_ids(&self, trigger_id: i64, phone_number: &str) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT menu_id FROM notified_menus
                 WHERE trigger_id = ?1 AND phone_number = ?2 AND status = 'sent'
                 ORDER BY menu_id",
            )
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![trigger_id, phone_number], |r| r.get(0))
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    /// Flip a batch of `pending` ledger rows to `sent` or `failed` —
    /// the resolution side of a flush or expiry. `pending → …` only;
    /// rows in any other state are untouched.
    pub fn resolve_notified_batch(
        &self,
        trigger_id: i64,
        phone_number: &str,
        menu_ids: &[i64],
        to_status: NotifiedStatus,
    ) -> Result<usize> {
        if menu_ids.is_empty() {
            return Ok(0);
        }
        let notified_at = match to_status {
            NotifiedStatus::Sent => Some(ts(Utc::now())),
            _ => None,
        };
        let sql = format!(
            "UPDATE notified_menus SET status = ?, notified_at = COALESCE(?, notified_at)
             WHERE trigger_id = ? AND phone_number = ? AND status = 'pending'
               AND menu_id IN ({})",
            std::iter::repeat("?")
                .take(menu_ids.len())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(to_status.as_str()),
            Box::new(notified_at),
            Box::new(trigger_id),
            Box::new(phone_number.to_string()),
        ];
        for id in menu_ids {
            values.push(Box::new(*id));
        }
        let conn = self.lock()?;
        let changed = conn
            .execute(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            )
            .map_err(|e| MenubellError::db(format!("Resolve notified: {e}")))?;
        Ok(changed)
    }

    pub fn notified_rows(&self, trigger_id: i64, phone_number: &str) -> Result<Vec<NotifiedMenu>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFIED_COLS} FROM notified_menus
                 WHERE trigger_id = ?1 AND phone_number = ?2 ORDER BY menu_id"
            ))
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![trigger_id, phone_number], row_to_notified)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    // ── Executions ──────────────────────────────

    /// Write the immutable audit row for one run.
    pub fn insert_execution(
        &self,
        campaign_id: i64,
        trigger_id: i64,
        executed_at: DateTime<Utc>,
        total_recipients: i64,
        sent_count: i64,
        failed_count: i64,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<CampaignExecution> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaign_executions
             (campaign_id, trigger_id, executed_at, total_recipients, sent_count, failed_count, status, completed_at, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                campaign_id,
                trigger_id,
                ts(executed_at),
                total_recipients,
                sent_count,
                failed_count,
                status.as_str(),
                ts(Utc::now()),
                error_message,
            ],
        )
        .map_err(|e| MenubellError::db(format!("Insert execution: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {EXECUTION_COLS} FROM campaign_executions WHERE id = ?1"),
            params![id],
            row_to_execution,
        )
        .map_err(MenubellError::db)
    }

    pub fn executions_for_trigger(&self, trigger_id: i64) -> Result<Vec<CampaignExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXECUTION_COLS} FROM campaign_executions WHERE trigger_id = ?1 ORDER BY id"
            ))
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![trigger_id], row_to_execution)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }
}
