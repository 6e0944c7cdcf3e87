//! Session engine: menu registry and cache-backed state machine.
//!
//! A logical session (session id + msisdn) is either NEW or CONTINUING.
//! The transition happens exactly once, the first time the session's
//! cache entry is observed absent. All session state lives in the
//! external cache keyed per session; concurrent requests for different
//! sessions never contend, and duplicate retransmits for the same
//! session rely on the cache's per-key write atomicity only (a race
//! between two retransmits can lose an update).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use ussdflow_audit::{AuditLogger, AuditRecord};
use ussdflow_core::{Result, UssdConfig, UssdError};

use crate::cache::Cache;
use crate::menu::Menu;
use crate::payload::UssdPayload;
use crate::response::SessionResponse;

const NEXT_MENU_FIELD: &str = "next_menu";
const PREVIOUS_MENU_FIELD: &str = "previous_menu";
const CURRENT_PAYLOAD_FIELD: &str = "current_payload";
const LANGUAGE_FIELD: &str = "language";
const NEW_FIELD: &str = "new";

/// A configured USSD application: menu registry plus session engine.
pub struct UssdApp {
    config: UssdConfig,
    cache: Arc<dyn Cache>,
    menus: HashMap<String, Arc<Menu>>,
    order: Vec<String>,
    audit: Option<AuditLogger>,
}

impl UssdApp {
    pub fn new(config: UssdConfig, cache: Arc<dyn Cache>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            menus: HashMap::new(),
            order: Vec::new(),
            audit: None,
        })
    }

    /// Attach an audit pipeline handle. Without one, `save_log` is a no-op.
    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn config(&self) -> &UssdConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Register a menu. Fails on duplicate names.
    pub fn add_menu(&mut self, menu: Menu) -> Result<()> {
        let name = menu.name().to_string();
        if self.menus.contains_key(&name) {
            return Err(UssdError::MenuExists(name));
        }
        self.menus.insert(name.clone(), Arc::new(menu));
        self.order.push(name.clone());
        info!(menu = %name, "menu registered");
        Ok(())
    }

    pub fn menu(&self, name: &str) -> Option<Arc<Menu>> {
        self.menus.get(name).cloned()
    }

    /// Registered menu names, in registration order.
    pub fn menu_names(&self) -> &[String] {
        &self.order
    }

    /// Check the whole menu graph: the home menu must be registered and
    /// every non-empty previous/next link must resolve to a registered
    /// menu. Call after registration, before serving traffic.
    pub fn validate_menus(&self) -> Result<()> {
        if !self.menus.contains_key(&self.config.app.home_menu) {
            return Err(UssdError::Config(format!(
                "home menu {} is not registered",
                self.config.app.home_menu
            )));
        }

        for menu in self.menus.values() {
            let prev = menu.previous_menu();
            if !prev.is_empty() && !self.menus.contains_key(prev) {
                return Err(UssdError::Config(format!(
                    "previous menu {} for {} menu is not registered",
                    prev,
                    menu.name()
                )));
            }
            let next = menu.next_menu();
            if !next.is_empty() && !self.menus.contains_key(next) {
                return Err(UssdError::Config(format!(
                    "next menu {} for {} menu is not registered",
                    next,
                    menu.name()
                )));
            }
        }

        Ok(())
    }

    /// Cache key holding this session's state map.
    pub fn session_key(&self, payload: &UssdPayload) -> String {
        format!(
            "{}:sessions:{}:{}",
            self.config.app.name,
            payload.session_id(),
            payload.msisdn()
        )
    }

    fn session_set_key(&self) -> String {
        format!("{}:sessions", self.config.app.name)
    }

    fn session_member(payload: &UssdPayload) -> String {
        format!("{}:{}", payload.msisdn(), payload.session_id())
    }

    fn home_menu(&self) -> Result<Arc<Menu>> {
        self.menus
            .get(&self.config.app.home_menu)
            .cloned()
            .ok_or_else(|| UssdError::MenuNotFound(self.config.app.home_menu.clone()))
    }

    /// Resolve the menu to render for this request.
    ///
    /// The first time a session's cache entry is observed absent the
    /// session is NEW: its entry is initialized and the session TTL is
    /// applied, once, as a hard cap on total session duration. Stale
    /// entries naming an unregistered menu fail soft to the home menu;
    /// cache round-trip failures are fatal.
    pub async fn get_session_menu(&self, payload: &UssdPayload) -> Result<(Arc<Menu>, bool)> {
        let key = self.session_key(payload);
        let entry = self
            .cache
            .get_map(&key)
            .await?
            .filter(|fields| !fields.is_empty());

        let Some(fields) = entry else {
            let newly = self
                .cache
                .add_set_member(&self.session_set_key(), &Self::session_member(payload))
                .await?;
            if !newly {
                debug!(session_id = %payload.session_id(), "expired session re-observed, restarting");
            }

            let mut init = HashMap::new();
            init.insert(NEW_FIELD.to_string(), "1".to_string());
            init.insert(
                LANGUAGE_FIELD.to_string(),
                self.config.app.default_language.clone(),
            );
            self.cache.set_map(&key, init).await?;
            self.cache
                .expire(&key, Duration::from_secs(self.config.session.ttl_secs))
                .await?;

            info!(
                session_id = %payload.session_id(),
                msisdn = %payload.msisdn(),
                "new session started"
            );
            return Ok((self.home_menu()?, true));
        };

        match fields
            .get(NEXT_MENU_FIELD)
            .and_then(|name| self.menus.get(name))
        {
            Some(menu) => Ok((Arc::clone(menu), false)),
            None => {
                debug!(session_id = %payload.session_id(), "stale menu reference, falling back to home");
                Ok((self.home_menu()?, false))
            }
        }
    }

    /// Persist `menu` as the session's current step, together with the
    /// request snapshot for later replay. Advancing state requires this
    /// call; without it the next request resumes at the same step.
    pub async fn save_menu_as_current(&self, menu: &Menu, payload: &UssdPayload) -> Result<()> {
        let mut fields = HashMap::new();
        fields.insert(NEXT_MENU_FIELD.to_string(), menu.name().to_string());
        fields.insert(CURRENT_PAYLOAD_FIELD.to_string(), payload.to_json()?);
        self.cache.set_map(&self.session_key(payload), fields).await
    }

    /// After a successful response, persist `current`'s declared next
    /// menu as the session's current step and record `current` as the
    /// previous menu for error replay.
    ///
    /// No-op when the payload carries a validation failure or the
    /// transient skip marker, so an explicit jump is not double-advanced.
    /// An unregistered next-menu name is a configuration defect, fatal.
    pub async fn update_next_menu(&self, payload: &UssdPayload, current: &Menu) -> Result<()> {
        if payload.validation_failed() || payload.skip() {
            return Ok(());
        }

        let next = self
            .menus
            .get(current.next_menu())
            .ok_or_else(|| UssdError::MenuNotFound(current.next_menu().to_string()))?;

        self.save_menu_as_current(next, payload).await?;
        self.cache
            .set_map_field(
                &self.session_key(payload),
                PREVIOUS_MENU_FIELD,
                current.name(),
            )
            .await
    }

    /// Jump to an arbitrary registered menu, bypassing the declared
    /// next-menu link.
    ///
    /// The target is persisted as the session's current step and rendered
    /// immediately; the payload's transient skip marker suppresses the
    /// caller's follow-up `update_next_menu`, so the session stays on the
    /// target rather than advancing past it.
    pub async fn replace_menu(
        &self,
        payload: &mut UssdPayload,
        target: &Menu,
    ) -> Result<SessionResponse> {
        self.save_menu_as_current(target, payload).await?;
        self.cache
            .set_map_field(
                &self.session_key(payload),
                PREVIOUS_MENU_FIELD,
                target.name(),
            )
            .await?;

        let mut sr = target.generate_response(payload).await?;
        *payload = payload.clone().with_skip();
        sr.set_menu(target.name());
        Ok(sr)
    }

    /// [`UssdApp::replace_menu`] by registered name.
    pub async fn replace_menu_with_name(
        &self,
        payload: &mut UssdPayload,
        name: &str,
    ) -> Result<SessionResponse> {
        let target = self
            .menus
            .get(name)
            .cloned()
            .ok_or_else(|| UssdError::MenuNotFound(name.to_string()))?;
        self.replace_menu(payload, &target).await
    }

    /// Re-render the step the user is stuck on, with an error banner.
    ///
    /// Reads the stored previous-menu name and request snapshot, replays
    /// that menu's handler on the restored snapshot (reproducing the
    /// original text, including any interpolated values), marks the live
    /// payload validation-failed, and overrides the regenerated response
    /// with `error_text`. Missing session fields, an unreadable snapshot,
    /// or an unregistered previous menu are fatal.
    pub async fn previous_menu_with_error(
        &self,
        payload: &mut UssdPayload,
        current: &Menu,
        error_text: &str,
    ) -> Result<SessionResponse> {
        let key = self.session_key(payload);

        let prev_name = self
            .cache
            .get_map_field(&key, PREVIOUS_MENU_FIELD)
            .await?
            .ok_or_else(|| {
                UssdError::Session(format!(
                    "no previous menu recorded for session at {}",
                    current.name()
                ))
            })?;
        let stored = self
            .cache
            .get_map_field(&key, CURRENT_PAYLOAD_FIELD)
            .await?
            .ok_or_else(|| {
                UssdError::Session("no stored payload snapshot for session".to_string())
            })?;

        let prev_payload = UssdPayload::from_json(&stored)?;
        let prev_menu = self
            .menus
            .get(&prev_name)
            .ok_or_else(|| UssdError::MenuNotFound(prev_name.clone()))?;

        let mut sr = prev_menu.generate_response(&prev_payload).await?;
        *payload = payload.clone().with_validation_failed();
        sr.set_failed();
        sr.set_status_message(error_text);
        Ok(sr)
    }

    /// First registered menu whose shortcut equals the raw dialed string.
    ///
    /// Only meaningful for brand-new sessions: an ongoing session's
    /// accumulated dial string is not a shortcut. Returns `None` for an
    /// empty dial string or when nothing matches.
    pub fn get_shortcut_menu(&self, payload: &UssdPayload) -> Option<Arc<Menu>> {
        if payload.params().is_empty() {
            return None;
        }
        self.order
            .iter()
            .filter_map(|name| self.menus.get(name))
            .find(|menu| menu.shortcut() == Some(payload.params()))
            .cloned()
    }

    /// Save the preferred language for this session.
    pub async fn save_language(&self, payload: &UssdPayload, language: &str) -> Result<()> {
        self.cache
            .set_map_field(&self.session_key(payload), LANGUAGE_FIELD, language)
            .await
    }

    /// Preferred language for this session, or the configured default.
    pub async fn language(&self, payload: &UssdPayload) -> Result<String> {
        Ok(self
            .cache
            .get_map_field(&self.session_key(payload), LANGUAGE_FIELD)
            .await?
            .unwrap_or_else(|| self.config.app.default_language.clone()))
    }

    /// Whether this session is currently tracked in the session set.
    pub async fn is_active_session(&self, payload: &UssdPayload) -> Result<bool> {
        self.cache
            .set_contains(&self.session_set_key(), &Self::session_member(payload))
            .await
    }

    /// Drop all cached state for this session. Called on explicit
    /// termination; expiry otherwise clears the entry via its TTL.
    pub async fn end_session(&self, payload: &UssdPayload) -> Result<()> {
        self.cache.delete_map(&self.session_key(payload)).await?;
        self.cache
            .remove_set_member(&self.session_set_key(), &Self::session_member(payload))
            .await
    }

    /// Queue an audit record for this interaction.
    ///
    /// Best-effort from the caller's perspective: pipeline errors never
    /// surface here, and without an attached pipeline this is a no-op.
    pub async fn save_log(&self, payload: &UssdPayload, sr: &SessionResponse) {
        let Some(logger) = &self.audit else {
            return;
        };

        let record = AuditRecord {
            session_id: payload.session_id().to_string(),
            msisdn: payload.msisdn().to_string(),
            menu_name: sr.menu_name().to_string(),
            params: payload.params().to_string(),
            user_input: payload.current_param().to_string(),
            succeeded: !(sr.failed() || payload.validation_failed()),
            status_message: sr.status_message().to_string(),
            created_at: Utc::now(),
        };
        logger.enqueue(record).await;
    }
}
