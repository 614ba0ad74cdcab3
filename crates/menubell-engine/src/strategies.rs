//! Eligibility strategies — one per campaign event type.
//!
//! A strategy answers two questions: which menus does this trigger care
//! about right now, and what do we say about them. Everything eligible for
//! one recipient in one run is merged into a single message — the provider
//! rejects rapid-fire duplicate sends inside the same window.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use menubell_core::config::RemindersConfig;
use menubell_core::types::{Campaign, CampaignEventType, Menu, Recipient, SourceType, Trigger};
use menubell_core::{Result, MenubellError};
use menubell_store::Store;

/// A rendered pre-approved template, ready for the provider.
#[derive(Debug, Clone)]
pub struct TemplateMessage {
    pub name: String,
    pub language: String,
    /// Body text recorded on the outbound message row.
    pub body: String,
    /// Graph API `components` array.
    pub components: serde_json::Value,
}

pub trait ReminderStrategy: Send + Sync {
    fn event_type(&self) -> CampaignEventType;

    /// Menus this trigger should remind about at `now`, audience-filtered.
    fn eligible_menus(
        &self,
        store: &Store,
        config: &RemindersConfig,
        trigger: &Trigger,
        role_ids: &[i64],
        permission_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Menu>>;

    /// Per-recipient suppression against existing business state.
    /// Default: everyone qualifies.
    fn should_notify_recipient(
        &self,
        _store: &Store,
        _recipient: &Recipient,
        _menus: &[Menu],
    ) -> Result<bool> {
        Ok(true)
    }

    /// Expand the campaign content over the full merged menu set.
    fn render_content(&self, campaign: &Campaign, menus: &[Menu]) -> String {
        render_placeholders(&campaign.content, menus)
    }

    /// The template used when the window is closed and the reminder must
    /// ride behind a template+wait-for-reply cycle.
    fn template_message(&self, config: &RemindersConfig, menus: &[Menu]) -> TemplateMessage;
}

/// Select the strategy for an event type — a fixed enumeration, no registry.
pub fn strategy_for(event_type: CampaignEventType) -> &'static dyn ReminderStrategy {
    match event_type {
        CampaignEventType::MenuCreated => &MenuCreatedStrategy,
        CampaignEventType::MenuClosing => &MenuClosingStrategy,
        CampaignEventType::InitialContact => &InitialContactStrategy,
    }
}

/// Expand `{{menu_count}}` / `{{menus}}` over a menu set.
pub fn render_placeholders(content: &str, menus: &[Menu]) -> String {
    let titles = menus
        .iter()
        .map(|m| m.title.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    content
        .replace("{{menu_count}}", &menus.len().to_string())
        .replace("{{menus}}", &titles)
}

/// "2026-08-10" → "lunes 10 de agosto".
fn format_menu_date(date: &str) -> String {
    const DAYS: [&str; 7] = [
        "lunes", "martes", "miércoles", "jueves", "viernes", "sábado", "domingo",
    ];
    const MONTHS: [&str; 12] = [
        "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto",
        "septiembre", "octubre", "noviembre", "diciembre",
    ];
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => format!(
            "{} {} de {}",
            DAYS[d.weekday().num_days_from_monday() as usize],
            d.day(),
            MONTHS[d.month0() as usize],
        ),
        Err(_) => String::new(),
    }
}

fn min_publication_date(menus: &[Menu]) -> Option<&str> {
    menus
        .iter()
        .map(|m| m.publication_date.as_str())
        .min()
}

fn max_publication_date(menus: &[Menu]) -> Option<&str> {
    menus
        .iter()
        .map(|m| m.publication_date.as_str())
        .max()
}

fn body_parameter(name: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "text",
        "parameter_name": name,
        "text": text,
    })
}

// ─── MenuCreated ──────────────────────────────────────

/// Reminds about menus published in the last `hours_after` hours.
pub struct MenuCreatedStrategy;

impl ReminderStrategy for MenuCreatedStrategy {
    fn event_type(&self) -> CampaignEventType {
        CampaignEventType::MenuCreated
    }

    fn eligible_menus(
        &self,
        store: &Store,
        config: &RemindersConfig,
        trigger: &Trigger,
        role_ids: &[i64],
        permission_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Menu>> {
        let since = if config.test_mode {
            now - Duration::minutes(config.test_mode_lookback_minutes)
        } else {
            now - Duration::hours(trigger.hours_after.max(0))
        };
        store.menus_created_since(since, role_ids, permission_ids)
    }

    fn template_message(&self, config: &RemindersConfig, menus: &[Menu]) -> TemplateMessage {
        let fecha_inicio = min_publication_date(menus).map(format_menu_date).unwrap_or_default();
        let fecha_fin = max_publication_date(menus).map(format_menu_date).unwrap_or_default();
        let pagina_web = config.shop_url.clone();

        TemplateMessage {
            name: config.menu_created_template.name.clone(),
            language: config.menu_created_template.language.clone(),
            body: format!(
                "¡Nuevos menús disponibles!\n\n\
                 Hola, se han creado menús nuevos para la semana del {fecha_inicio} al {fecha_fin}. \
                 Ve a {pagina_web} y realiza tu pedido 🛒\n\n\
                 Responde AYUDA para consultas o SALIR para no recibir más."
            ),
            components: serde_json::json!([{
                "type": "body",
                "parameters": [
                    body_parameter("fecha_inicio", &fecha_inicio),
                    body_parameter("fecha_fin", &fecha_fin),
                    body_parameter("pagina_web", &pagina_web),
                ],
            }]),
        }
    }
}

// ─── MenuClosing ──────────────────────────────────────

/// Reminds about menus whose ordering deadline is within `hours_before`
/// hours — unless the recipient already ordered for every covered date.
pub struct MenuClosingStrategy;

impl ReminderStrategy for MenuClosingStrategy {
    fn event_type(&self) -> CampaignEventType {
        CampaignEventType::MenuClosing
    }

    fn eligible_menus(
        &self,
        store: &Store,
        config: &RemindersConfig,
        trigger: &Trigger,
        role_ids: &[i64],
        permission_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Menu>> {
        let until = if config.test_mode {
            now + Duration::minutes(config.test_mode_lookback_minutes)
        } else {
            now + Duration::hours(trigger.hours_before.max(0))
        };
        store.menus_closing_between(now, until, role_ids, permission_ids)
    }

    /// Suppressed when the recipient has a qualifying order for every one
    /// of the menus' publication dates — checked per recipient, not per
    /// menu.
    fn should_notify_recipient(
        &self,
        store: &Store,
        recipient: &Recipient,
        menus: &[Menu],
    ) -> Result<bool> {
        let mut dates: Vec<String> = menus.iter().map(|m| m.publication_date.clone()).collect();
        dates.sort();
        dates.dedup();

        let covered = match (recipient.source_type, recipient.branch_id) {
            (SourceType::Branch, Some(branch_id)) => {
                store.branch_has_orders_covering(branch_id, &dates)?
            }
            _ => store.company_has_orders_covering(recipient.company_id, &dates)?,
        };
        Ok(!covered)
    }

    fn template_message(&self, config: &RemindersConfig, menus: &[Menu]) -> TemplateMessage {
        let fecha_pedido = min_publication_date(menus).map(format_menu_date).unwrap_or_default();
        let pagina_web = config.shop_url.clone();

        TemplateMessage {
            name: config.menu_closing_template.name.clone(),
            language: config.menu_closing_template.language.clone(),
            body: format!(
                "¡Aún no tienes pedido para mañana!\n\n\
                 Hola, notamos que aún no has realizado tu pedido para el día {fecha_pedido}. \
                 El menú ya está disponible en {pagina_web}. \
                 ¡No te quedes sin tu pedido! 😊\n\n\
                 Responde AYUDA para consultas o SALIR para no recibir más."
            ),
            components: serde_json::json!([{
                "type": "body",
                "parameters": [
                    body_parameter("fecha_pedido", &fecha_pedido),
                    body_parameter("pagina_web", &pagina_web),
                ],
            }]),
        }
    }
}

// ─── InitialContact ──────────────────────────────────────

/// Stateless: no entities, just the fixed template that re-opens a
/// conversation.
pub struct InitialContactStrategy;

impl ReminderStrategy for InitialContactStrategy {
    fn event_type(&self) -> CampaignEventType {
        CampaignEventType::InitialContact
    }

    fn eligible_menus(
        &self,
        _store: &Store,
        _config: &RemindersConfig,
        _trigger: &Trigger,
        _role_ids: &[i64],
        _permission_ids: &[i64],
        _now: DateTime<Utc>,
    ) -> Result<Vec<Menu>> {
        Ok(Vec::new())
    }

    fn template_message(&self, config: &RemindersConfig, _menus: &[Menu]) -> TemplateMessage {
        TemplateMessage {
            name: config.initial_template.name.clone(),
            language: config.initial_template.language.clone(),
            body: "Hola 👋 Tenemos novedades para ti. Responde este mensaje para recibirlas."
                .to_string(),
            components: serde_json::json!([]),
        }
    }
}

/// Map an event type to its strategy, rejecting unknown strings upstream.
pub fn strategy_for_str(event_type: &str) -> Result<&'static dyn ReminderStrategy> {
    CampaignEventType::parse(event_type)
        .map(strategy_for)
        .ok_or_else(|| MenubellError::Strategy(format!("Unknown event type: {event_type}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use menubell_core::types::CampaignStatus;

    fn menu(id: i64, title: &str, publication_date: &str) -> Menu {
        Menu {
            id,
            title: title.into(),
            active: true,
            publication_date: publication_date.into(),
            max_order_date: Utc::now() + Duration::hours(2),
            role_id: None,
            permission_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_placeholders_over_full_set() {
        let campaign = Campaign {
            id: 1,
            name: "x".into(),
            channel: "whatsapp".into(),
            status: CampaignStatus::Active,
            content: "Hay {{menu_count}} nuevos menus: {{menus}}".into(),
            created_at: Utc::now(),
        };
        let menus = vec![
            menu(1, "Menu Lunes", "2026-08-10"),
            menu(2, "Menu Martes", "2026-08-11"),
            menu(3, "Menu Miercoles", "2026-08-12"),
        ];
        let rendered = MenuCreatedStrategy.render_content(&campaign, &menus);
        assert_eq!(
            rendered,
            "Hay 3 nuevos menus: Menu Lunes, Menu Martes, Menu Miercoles"
        );
    }

    #[test]
    fn test_format_menu_date_spanish() {
        // 2026-08-10 is a Monday
        assert_eq!(format_menu_date("2026-08-10"), "lunes 10 de agosto");
        assert_eq!(format_menu_date("garbage"), "");
    }

    #[test]
    fn test_menu_created_template_parameters() {
        let config = RemindersConfig::default();
        let menus = vec![
            menu(1, "A", "2026-08-10"),
            menu(2, "B", "2026-08-12"),
        ];
        let t = MenuCreatedStrategy.template_message(&config, &menus);
        assert_eq!(t.name, "nuevos_menus");
        assert!(t.body.contains("lunes 10 de agosto"));
        assert!(t.body.contains("miércoles 12 de agosto"));
        let params = t.components[0]["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0]["parameter_name"], "fecha_inicio");
    }

    #[test]
    fn test_eligibility_windows() {
        let store = Store::open_in_memory().unwrap();
        let campaign = store
            .create_campaign("c", CampaignStatus::Active, "")
            .unwrap();
        let trigger = store
            .create_trigger(campaign.id, CampaignEventType::MenuCreated, 3, 24)
            .unwrap();
        let config = RemindersConfig::default();
        let now = Utc::now();

        store
            .create_menu("Reciente", "2026-08-10", now + Duration::days(1), None, None, now - Duration::hours(2))
            .unwrap();
        store
            .create_menu("Antiguo", "2026-08-11", now + Duration::days(1), None, None, now - Duration::hours(48))
            .unwrap();

        let menus = MenuCreatedStrategy
            .eligible_menus(&store, &config, &trigger, &[], &[], now)
            .unwrap();
        assert_eq!(menus.len(), 1);
        assert_eq!(menus[0].title, "Reciente");
    }

    #[test]
    fn test_closing_suppression_per_recipient() {
        let store = Store::open_in_memory().unwrap();
        let company = store.create_company("C", Some("56911111111")).unwrap();
        let branch = store.create_branch(company, "B", Some("56922222222")).unwrap();

        let menus = vec![menu(1, "Lunes", "2026-08-10"), menu(2, "Martes", "2026-08-11")];
        let recipient = Recipient {
            phone_number: "56922222222".into(),
            source_type: SourceType::Branch,
            company_id: company,
            branch_id: Some(branch),
        };

        // no orders yet → notify
        assert!(MenuClosingStrategy
            .should_notify_recipient(&store, &recipient, &menus)
            .unwrap());

        store.create_order(company, Some(branch), "2026-08-10").unwrap();
        // one of two dates covered → still notify
        assert!(MenuClosingStrategy
            .should_notify_recipient(&store, &recipient, &menus)
            .unwrap());

        store.create_order(company, Some(branch), "2026-08-11").unwrap();
        // every date covered → suppress
        assert!(!MenuClosingStrategy
            .should_notify_recipient(&store, &recipient, &menus)
            .unwrap());
    }

    #[test]
    fn test_initial_contact_is_stateless() {
        let store = Store::open_in_memory().unwrap();
        let campaign = store
            .create_campaign("c", CampaignStatus::Active, "")
            .unwrap();
        let trigger = store
            .create_trigger(campaign.id, CampaignEventType::InitialContact, 0, 0)
            .unwrap();
        let config = RemindersConfig::default();

        let menus = InitialContactStrategy
            .eligible_menus(&store, &config, &trigger, &[], &[], Utc::now())
            .unwrap();
        assert!(menus.is_empty());

        let t = InitialContactStrategy.template_message(&config, &menus);
        assert_eq!(t.name, "hello_world");
    }

    #[test]
    fn test_strategy_dispatch() {
        assert_eq!(
            strategy_for(CampaignEventType::MenuClosing).event_type(),
            CampaignEventType::MenuClosing
        );
        assert!(strategy_for_str("menu_created").is_ok());
        assert!(strategy_for_str("unknown").is_err());
    }
}
