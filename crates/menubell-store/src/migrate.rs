//! Schema migrations — run once at open, idempotent.

use menubell_core::{MenubellError, Result};

use crate::Store;

impl Store {
    pub(crate) fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Customer directory (read-mostly; maintained outside the engine)
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                whatsapp_phone TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS branches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                name TEXT NOT NULL,
                whatsapp_phone TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Audience filters a company's users grant access to
            CREATE TABLE IF NOT EXISTS company_roles (
                company_id INTEGER NOT NULL REFERENCES companies(id),
                role_id INTEGER NOT NULL,
                PRIMARY KEY (company_id, role_id)
            );

            CREATE TABLE IF NOT EXISTS company_permissions (
                company_id INTEGER NOT NULL REFERENCES companies(id),
                permission_id INTEGER NOT NULL,
                PRIMARY KEY (company_id, permission_id)
            );

            CREATE TABLE IF NOT EXISTS menus (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                publication_date TEXT NOT NULL,   -- YYYY-MM-DD
                max_order_date TEXT NOT NULL,     -- ordering deadline
                role_id INTEGER,                  -- NULL = everyone
                permission_id INTEGER,            -- NULL = everyone
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                branch_id INTEGER,
                menu_date TEXT NOT NULL,          -- YYYY-MM-DD
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Campaigns and their time-based triggers
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                channel TEXT NOT NULL DEFAULT 'whatsapp',
                status TEXT NOT NULL DEFAULT 'draft',
                content TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaign_companies (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                company_id INTEGER NOT NULL REFERENCES companies(id),
                PRIMARY KEY (campaign_id, company_id)
            );

            CREATE TABLE IF NOT EXISTS campaign_branches (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                branch_id INTEGER NOT NULL REFERENCES branches(id),
                PRIMARY KEY (campaign_id, branch_id)
            );

            CREATE TABLE IF NOT EXISTS campaign_triggers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                event_type TEXT NOT NULL,
                hours_before INTEGER NOT NULL DEFAULT 0,
                hours_after INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_executed_at TEXT,            -- advisory, never a lock
                locked_at TEXT                    -- run-lock, CAS-guarded
            );

            -- Conversations and messages
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL,
                client_name TEXT,
                source_type TEXT NOT NULL DEFAULT 'unknown',
                company_id INTEGER,
                branch_id INTEGER,
                status TEXT NOT NULL DEFAULT 'new',
                last_message_at TEXT,
                window_expires_at TEXT,
                created_at TEXT NOT NULL
            );

            -- one open conversation per phone number
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_open_phone
                ON conversations(phone_number) WHERE status != 'closed';

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                direction TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                body TEXT,
                external_id TEXT,
                status TEXT NOT NULL DEFAULT 'received',
                request_payload TEXT,             -- JSON audit
                response_payload TEXT,            -- JSON audit
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, direction);

            -- Reminder content queued behind a closed window
            CREATE TABLE IF NOT EXISTS pending_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trigger_id INTEGER NOT NULL REFERENCES campaign_triggers(id),
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                phone_number TEXT NOT NULL,
                message_content TEXT NOT NULL,
                menu_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array, ordered, deduped
                status TEXT NOT NULL DEFAULT 'waiting_response',
                created_at TEXT NOT NULL,
                resolved_at TEXT
            );

            -- one waiting batch per (trigger, conversation); merges union menu_ids
            CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_waiting_pair
                ON pending_notifications(trigger_id, conversation_id)
                WHERE status = 'waiting_response';

            -- Per-menu delivery ledger: the at-most-once dedup key
            CREATE TABLE IF NOT EXISTS notified_menus (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trigger_id INTEGER NOT NULL REFERENCES campaign_triggers(id),
                menu_id INTEGER NOT NULL,
                phone_number TEXT NOT NULL,
                conversation_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                notified_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (trigger_id, menu_id, phone_number)
            );

            -- Immutable audit trail, one row per trigger run
            CREATE TABLE IF NOT EXISTS campaign_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL,
                trigger_id INTEGER NOT NULL,
                executed_at TEXT NOT NULL,
                total_recipients INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'completed',
                completed_at TEXT,
                error_message TEXT
            );
         ",
        )
        .map_err(|e| MenubellError::db(format!("Migration: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;

    #[test]
    fn test_open_and_migrate() {
        let store = Store::open_in_memory().unwrap();
        // re-running migrations must be harmless
        store.migrate().unwrap();
    }

    #[test]
    fn test_open_on_disk() {
        let dir = std::env::temp_dir().join("menubell-store-open-test");
        std::fs::create_dir_all(&dir).ok();
        let store = Store::open(&dir.join("test.db")).unwrap();
        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }
}
