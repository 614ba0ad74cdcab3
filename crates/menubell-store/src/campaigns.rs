//! Campaign, trigger, and directory repository — audience resolution and
//! the menu eligibility queries the strategies run.

use chrono::{DateTime, Utc};
use menubell_core::types::{
    Campaign, CampaignEventType, CampaignStatus, Menu, Recipient, SourceType, Trigger,
};
use menubell_core::{MenubellError, Result};
use rusqlite::{params, Row};

use crate::{parse_ts, parse_ts_opt, ts, Store};

fn row_to_campaign(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    let status: String = row.get(3)?;
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        channel: row.get(2)?,
        status: CampaignStatus::parse(&status),
        content: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

fn row_to_trigger(row: &Row<'_>) -> rusqlite::Result<Trigger> {
    let event: String = row.get(2)?;
    Ok(Trigger {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        // unknown event types are filtered out by the callers' SQL
        event_type: CampaignEventType::parse(&event).unwrap_or(CampaignEventType::InitialContact),
        hours_before: row.get(3)?,
        hours_after: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        last_executed_at: parse_ts_opt(row.get(6)?),
        locked_at: parse_ts_opt(row.get(7)?),
    })
}

fn row_to_menu(row: &Row<'_>) -> rusqlite::Result<Menu> {
    Ok(Menu {
        id: row.get(0)?,
        title: row.get(1)?,
        active: row.get::<_, i64>(2)? != 0,
        publication_date: row.get(3)?,
        max_order_date: parse_ts(&row.get::<_, String>(4)?),
        role_id: row.get(5)?,
        permission_id: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

const TRIGGER_COLS: &str =
    "id, campaign_id, event_type, hours_before, hours_after, is_active, last_executed_at, locked_at";
const MENU_COLS: &str =
    "id, title, active, publication_date, max_order_date, role_id, permission_id, created_at";

/// Render `(?, ?, …)` for a dynamic IN list.
fn placeholders(n: usize) -> String {
    std::iter::repeat("?")
        .take(n)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Store {
    // ── Campaigns & triggers ──────────────────────────────

    pub fn create_campaign(&self, name: &str, status: CampaignStatus, content: &str) -> Result<Campaign> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaigns (name, channel, status, content, created_at)
             VALUES (?1, 'whatsapp', ?2, ?3, ?4)",
            params![name, status.as_str(), content, ts(Utc::now())],
        )
        .map_err(|e| MenubellError::db(format!("Create campaign: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, name, channel, status, content, created_at FROM campaigns WHERE id = ?1",
            params![id],
            row_to_campaign,
        )
        .map_err(MenubellError::db)
    }

    pub fn get_campaign(&self, id: i64) -> Result<Campaign> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, channel, status, content, created_at FROM campaigns WHERE id = ?1",
            params![id],
            row_to_campaign,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MenubellError::NotFound(format!("campaign {id}")),
            other => MenubellError::db(other),
        })
    }

    pub fn create_trigger(
        &self,
        campaign_id: i64,
        event_type: CampaignEventType,
        hours_before: i64,
        hours_after: i64,
    ) -> Result<Trigger> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaign_triggers (campaign_id, event_type, hours_before, hours_after, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![campaign_id, event_type.as_str(), hours_before, hours_after],
        )
        .map_err(|e| MenubellError::db(format!("Create trigger: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {TRIGGER_COLS} FROM campaign_triggers WHERE id = ?1"),
            params![id],
            row_to_trigger,
        )
        .map_err(MenubellError::db)
    }

    pub fn get_trigger(&self, id: i64) -> Result<Trigger> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TRIGGER_COLS} FROM campaign_triggers WHERE id = ?1"),
            params![id],
            row_to_trigger,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MenubellError::NotFound(format!("trigger {id}")),
            other => MenubellError::db(other),
        })
    }

    /// Active triggers of one event type whose campaign is itself active.
    pub fn active_triggers_by_event(&self, event_type: CampaignEventType) -> Result<Vec<Trigger>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.campaign_id, t.event_type, t.hours_before, t.hours_after,
                        t.is_active, t.last_executed_at, t.locked_at
                 FROM campaign_triggers t
                 JOIN campaigns c ON c.id = t.campaign_id
                 WHERE t.event_type = ?1 AND t.is_active = 1 AND c.status = 'active'
                 ORDER BY t.id",
            )
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![event_type.as_str()], row_to_trigger)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    /// Acquire the run-lock: succeeds when unheld or stale. Compare-and-swap,
    /// so overlapping runs of the same trigger cannot both proceed.
    pub fn try_lock_trigger(&self, trigger_id: i64, stale_secs: i64) -> Result<bool> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(stale_secs);
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE campaign_triggers SET locked_at = ?1
                 WHERE id = ?2 AND (locked_at IS NULL OR locked_at < ?3)",
                params![ts(now), trigger_id, ts(cutoff)],
            )
            .map_err(|e| MenubellError::db(format!("Lock trigger: {e}")))?;
        Ok(changed > 0)
    }

    pub fn unlock_trigger(&self, trigger_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaign_triggers SET locked_at = NULL WHERE id = ?1",
            params![trigger_id],
        )
        .map_err(|e| MenubellError::db(format!("Unlock trigger: {e}")))?;
        Ok(())
    }

    /// Advisory only — consumers must not treat this as a mutex.
    pub fn touch_last_executed(&self, trigger_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaign_triggers SET last_executed_at = ?1 WHERE id = ?2",
            params![ts(Utc::now()), trigger_id],
        )
        .map_err(|e| MenubellError::db(format!("Touch trigger: {e}")))?;
        Ok(())
    }

    // ── Directory ──────────────────────────────

    pub fn create_company(&self, name: &str, whatsapp_phone: Option<&str>) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO companies (name, whatsapp_phone) VALUES (?1, ?2)",
            params![name, whatsapp_phone],
        )
        .map_err(|e| MenubellError::db(format!("Create company: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_branch(&self, company_id: i64, name: &str, whatsapp_phone: Option<&str>) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO branches (company_id, name, whatsapp_phone) VALUES (?1, ?2, ?3)",
            params![company_id, name, whatsapp_phone],
        )
        .map_err(|e| MenubellError::db(format!("Create branch: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn attach_campaign_company(&self, campaign_id: i64, company_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO campaign_companies (campaign_id, company_id) VALUES (?1, ?2)",
            params![campaign_id, company_id],
        )
        .map_err(|e| MenubellError::db(format!("Attach company: {e}")))?;
        Ok(())
    }

    pub fn attach_campaign_branch(&self, campaign_id: i64, branch_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO campaign_branches (campaign_id, branch_id) VALUES (?1, ?2)",
            params![campaign_id, branch_id],
        )
        .map_err(|e| MenubellError::db(format!("Attach branch: {e}")))?;
        Ok(())
    }

    pub fn grant_company_role(&self, company_id: i64, role_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO company_roles (company_id, role_id) VALUES (?1, ?2)",
            params![company_id, role_id],
        )
        .map_err(|e| MenubellError::db(format!("Grant role: {e}")))?;
        Ok(())
    }

    pub fn grant_company_permission(&self, company_id: i64, permission_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO company_permissions (company_id, permission_id) VALUES (?1, ?2)",
            params![company_id, permission_id],
        )
        .map_err(|e| MenubellError::db(format!("Grant permission: {e}")))?;
        Ok(())
    }

    /// Role ids reachable through the campaign's companies.
    pub fn audience_role_ids(&self, campaign_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT cr.role_id FROM company_roles cr
                 JOIN campaign_companies cc ON cc.company_id = cr.company_id
                 WHERE cc.campaign_id = ?1 ORDER BY cr.role_id",
            )
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![campaign_id], |r| r.get::<_, i64>(0))
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    pub fn audience_permission_ids(&self, campaign_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT cp.permission_id FROM company_permissions cp
                 JOIN campaign_companies cc ON cc.company_id = cp.company_id
                 WHERE cc.campaign_id = ?1 ORDER BY cp.permission_id",
            )
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![campaign_id], |r| r.get::<_, i64>(0))
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    /// Resolve the recipient list for a campaign: one entry per branch of
    /// each scoped company (branch phone, falling back to the company
    /// phone), or the company itself when it has no branches. Deduplicated
    /// by phone number, order preserved.
    pub fn campaign_recipients(&self, campaign_id: i64) -> Result<Vec<Recipient>> {
        let conn = self.lock()?;

        let mut company_stmt = conn
            .prepare(
                "SELECT c.id, c.whatsapp_phone FROM companies c
                 JOIN campaign_companies cc ON cc.company_id = c.id
                 WHERE cc.campaign_id = ?1 ORDER BY c.id",
            )
            .map_err(MenubellError::db)?;
        let companies: Vec<(i64, Option<String>)> = company_stmt
            .query_map(params![campaign_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .map_err(MenubellError::db)?
            .collect::<rusqlite::Result<_>>()
            .map_err(MenubellError::db)?;

        let mut scope_stmt = conn
            .prepare("SELECT branch_id FROM campaign_branches WHERE campaign_id = ?1")
            .map_err(MenubellError::db)?;
        let branch_scope: Vec<i64> = scope_stmt
            .query_map(params![campaign_id], |r| r.get(0))
            .map_err(MenubellError::db)?
            .collect::<rusqlite::Result<_>>()
            .map_err(MenubellError::db)?;

        let mut branch_stmt = conn
            .prepare("SELECT id, whatsapp_phone FROM branches WHERE company_id = ?1 ORDER BY id")
            .map_err(MenubellError::db)?;

        let mut recipients: Vec<Recipient> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut push = |recipients: &mut Vec<Recipient>, r: Recipient| {
            if seen.insert(r.phone_number.clone()) {
                recipients.push(r);
            }
        };

        for (company_id, company_phone) in companies {
            let branches: Vec<(i64, Option<String>)> = branch_stmt
                .query_map(params![company_id], |r| Ok((r.get(0)?, r.get(1)?)))
                .map_err(MenubellError::db)?
                .collect::<rusqlite::Result<_>>()
                .map_err(MenubellError::db)?;

            let scoped: Vec<&(i64, Option<String>)> = if branch_scope.is_empty() {
                branches.iter().collect()
            } else {
                branches
                    .iter()
                    .filter(|(id, _)| branch_scope.contains(id))
                    .collect()
            };

            if scoped.is_empty() {
                if let Some(phone) = company_phone.as_deref().filter(|p| !p.is_empty()) {
                    push(
                        &mut recipients,
                        Recipient {
                            phone_number: phone.to_string(),
                            source_type: SourceType::Company,
                            company_id,
                            branch_id: None,
                        },
                    );
                }
                continue;
            }

            for (branch_id, branch_phone) in scoped {
                if let Some(phone) = branch_phone.as_deref().filter(|p| !p.is_empty()) {
                    push(
                        &mut recipients,
                        Recipient {
                            phone_number: phone.to_string(),
                            source_type: SourceType::Branch,
                            company_id,
                            branch_id: Some(*branch_id),
                        },
                    );
                } else if let Some(phone) = company_phone.as_deref().filter(|p| !p.is_empty()) {
                    push(
                        &mut recipients,
                        Recipient {
                            phone_number: phone.to_string(),
                            source_type: SourceType::Company,
                            company_id,
                            branch_id: None,
                        },
                    );
                }
            }
        }

        Ok(recipients)
    }

    /// Attribute a phone number to its directory owner: branch first, then
    /// company. Used when an unknown inbound arrives.
    pub fn resolve_phone_owner(&self, phone: &str) -> Result<Option<Recipient>> {
        use rusqlite::OptionalExtension;

        let conn = self.lock()?;
        let branch: Option<(i64, i64)> = conn
            .query_row(
                "SELECT id, company_id FROM branches WHERE whatsapp_phone = ?1",
                params![phone],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(MenubellError::db)?;

        if let Some((branch_id, company_id)) = branch {
            return Ok(Some(Recipient {
                phone_number: phone.to_string(),
                source_type: SourceType::Branch,
                company_id,
                branch_id: Some(branch_id),
            }));
        }

        let company: Option<i64> = conn
            .query_row(
                "SELECT id FROM companies WHERE whatsapp_phone = ?1",
                params![phone],
                |r| r.get(0),
            )
            .optional()
            .map_err(MenubellError::db)?;

        Ok(company.map(|company_id| Recipient {
            phone_number: phone.to_string(),
            source_type: SourceType::Company,
            company_id,
            branch_id: None,
        }))
    }

    // ── Menus & orders ──────────────────────────────

    pub fn create_menu(
        &self,
        title: &str,
        publication_date: &str,
        max_order_date: DateTime<Utc>,
        role_id: Option<i64>,
        permission_id: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO menus (title, active, publication_date, max_order_date, role_id, permission_id, created_at)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6)",
            params![title, publication_date, ts(max_order_date), role_id, permission_id, ts(created_at)],
        )
        .map_err(|e| MenubellError::db(format!("Create menu: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn deactivate_menu(&self, menu_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE menus SET active = 0 WHERE id = ?1", params![menu_id])
            .map_err(|e| MenubellError::db(format!("Deactivate menu: {e}")))?;
        Ok(())
    }

    /// Active menus created at or after `since`, audience-filtered.
    /// NULL role/permission means visible to everyone.
    pub fn menus_created_since(
        &self,
        since: DateTime<Utc>,
        role_ids: &[i64],
        permission_ids: &[i64],
    ) -> Result<Vec<Menu>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MENU_COLS} FROM menus
             WHERE active = 1 AND created_at >= ?
               AND (role_id IS NULL{})
               AND (permission_id IS NULL{})
             ORDER BY publication_date, id",
            if role_ids.is_empty() {
                String::new()
            } else {
                format!(" OR role_id IN ({})", placeholders(role_ids.len()))
            },
            if permission_ids.is_empty() {
                String::new()
            } else {
                format!(" OR permission_id IN ({})", placeholders(permission_ids.len()))
            },
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ts(since))];
        for id in role_ids {
            values.push(Box::new(*id));
        }
        for id in permission_ids {
            values.push(Box::new(*id));
        }

        let mut stmt = conn.prepare(&sql).map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), row_to_menu)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    /// Active menus whose ordering deadline falls in `(now, until]`, with
    /// weekend publication dates excluded, audience-filtered.
    pub fn menus_closing_between(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        role_ids: &[i64],
        permission_ids: &[i64],
    ) -> Result<Vec<Menu>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MENU_COLS} FROM menus
             WHERE active = 1 AND max_order_date > ? AND max_order_date <= ?
               AND strftime('%w', publication_date) NOT IN ('0', '6')
               AND (role_id IS NULL{})
               AND (permission_id IS NULL{})
             ORDER BY max_order_date, id",
            if role_ids.is_empty() {
                String::new()
            } else {
                format!(" OR role_id IN ({})", placeholders(role_ids.len()))
            },
            if permission_ids.is_empty() {
                String::new()
            } else {
                format!(" OR permission_id IN ({})", placeholders(permission_ids.len()))
            },
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(ts(now)), Box::new(ts(until))];
        for id in role_ids {
            values.push(Box::new(*id));
        }
        for id in permission_ids {
            values.push(Box::new(*id));
        }

        let mut stmt = conn.prepare(&sql).map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), row_to_menu)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }

    pub fn create_order(&self, company_id: i64, branch_id: Option<i64>, menu_date: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO orders (company_id, branch_id, menu_date) VALUES (?1, ?2, ?3)",
            params![company_id, branch_id, menu_date],
        )
        .map_err(|e| MenubellError::db(format!("Create order: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Whether the branch already has an order for EVERY one of `dates`.
    pub fn branch_has_orders_covering(&self, branch_id: i64, dates: &[String]) -> Result<bool> {
        if dates.is_empty() {
            return Ok(true);
        }
        let conn = self.lock()?;
        let sql = format!(
            "SELECT COUNT(DISTINCT menu_date) FROM orders
             WHERE branch_id = ? AND menu_date IN ({})",
            placeholders(dates.len())
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(branch_id)];
        for d in dates {
            values.push(Box::new(d.clone()));
        }
        let covered: i64 = conn
            .query_row(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                |r| r.get(0),
            )
            .map_err(MenubellError::db)?;
        Ok(covered as usize == dates.len())
    }

    /// Company-wide variant, any branch counts.
    pub fn company_has_orders_covering(&self, company_id: i64, dates: &[String]) -> Result<bool> {
        if dates.is_empty() {
            return Ok(true);
        }
        let conn = self.lock()?;
        let sql = format!(
            "SELECT COUNT(DISTINCT menu_date) FROM orders
             WHERE company_id = ? AND menu_date IN ({})",
            placeholders(dates.len())
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(company_id)];
        for d in dates {
            values.push(Box::new(d.clone()));
        }
        let covered: i64 = conn
            .query_row(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                |r| r.get(0),
            )
            .map_err(MenubellError::db)?;
        Ok(covered as usize == dates.len())
    }
}
