//! Menu type and handler trait.
//!
//! A menu is one addressable step in the interaction graph: localized
//! content templates plus a handler, linked to its previous/next steps and
//! optionally reachable through a direct-dial shortcut.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use ussdflow_core::{Result, UssdError};

use crate::payload::UssdPayload;
use crate::response::SessionResponse;

/// Status message used when a handler reports a validation failure
/// without a message of its own.
pub const DEFAULT_VALIDATION_MESSAGE: &str = "validation failed";

/// Renders one menu step for a given request snapshot.
///
/// The owning menu is passed explicitly so handlers never need to close
/// over a reference to the menu they belong to. Returning
/// `UssdError::Validation` marks the step user-correctable; any other
/// error is fatal to the request.
#[async_trait]
pub trait MenuHandler: Send + Sync {
    async fn handle(&self, payload: &UssdPayload, menu: &Menu) -> Result<SessionResponse>;
}

/// Adapter for plain (non-async) handler functions.
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&UssdPayload, &Menu) -> Result<SessionResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> MenuHandler for FnHandler<F>
where
    F: Fn(&UssdPayload, &Menu) -> Result<SessionResponse> + Send + Sync,
{
    async fn handle(&self, payload: &UssdPayload, menu: &Menu) -> Result<SessionResponse> {
        (self.0)(payload, menu)
    }
}

/// One addressable step in the menu graph. Immutable after construction.
pub struct Menu {
    name: String,
    previous_menu: String,
    next_menu: String,
    shortcut: Option<String>,
    content: HashMap<String, String>,
    handler: Arc<dyn MenuHandler>,
}

impl fmt::Debug for Menu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Menu")
            .field("name", &self.name)
            .field("previous_menu", &self.previous_menu)
            .field("next_menu", &self.next_menu)
            .field("shortcut", &self.shortcut)
            .finish_non_exhaustive()
    }
}

impl Menu {
    pub fn builder(name: impl Into<String>) -> MenuBuilder {
        MenuBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the declared previous menu; empty for boundary nodes.
    pub fn previous_menu(&self) -> &str {
        &self.previous_menu
    }

    /// Name of the declared next menu; empty for boundary nodes.
    pub fn next_menu(&self) -> &str {
        &self.next_menu
    }

    /// Direct-dial string recognized at session start, if any.
    pub fn shortcut(&self) -> Option<&str> {
        self.shortcut.as_deref()
    }

    /// Localized content template for the given language code.
    pub fn text(&self, lang: &str) -> Option<&str> {
        self.content.get(lang).map(String::as_str)
    }

    /// Invoke the registered handler for this menu.
    ///
    /// A `Validation` error from the handler is absorbed here: the result
    /// is a failed response carrying the handler's message (or the default
    /// one), stamped with this menu's name, returned as `Ok`. Any other
    /// handler error propagates verbatim.
    pub async fn generate_response(&self, payload: &UssdPayload) -> Result<SessionResponse> {
        match self.handler.handle(payload, self).await {
            Ok(mut sr) => {
                sr.set_menu(&self.name);
                sr.set_session_id(payload.session_id());
                Ok(sr)
            }
            Err(UssdError::Validation(msg)) => {
                let mut sr = SessionResponse::default();
                sr.set_failed();
                if msg.is_empty() {
                    sr.set_status_message(DEFAULT_VALIDATION_MESSAGE);
                } else {
                    sr.set_status_message(msg);
                }
                sr.set_menu(&self.name);
                sr.set_session_id(payload.session_id());
                Ok(sr)
            }
            Err(e) => Err(e),
        }
    }

    /// Render this menu's localized template with positional arguments.
    ///
    /// `{0}`, `{1}`, ... placeholders are substituted in order. Returns a
    /// fresh non-failed response stamped with this menu's name: the
    /// default happy-path renderer used by handlers.
    pub fn execute_menu_args(&self, lang: &str, args: &[&str]) -> SessionResponse {
        let mut rendered = self.text(lang).unwrap_or_default().to_string();
        for (i, arg) in args.iter().enumerate() {
            rendered = rendered.replace(&format!("{{{}}}", i), arg);
        }

        let mut sr = SessionResponse::new(rendered);
        sr.set_menu(&self.name);
        sr
    }
}

/// Builder for [`Menu`] instances.
pub struct MenuBuilder {
    name: String,
    previous_menu: String,
    next_menu: String,
    shortcut: Option<String>,
    content: HashMap<String, String>,
    handler: Option<Arc<dyn MenuHandler>>,
}

impl MenuBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            previous_menu: String::new(),
            next_menu: String::new(),
            shortcut: None,
            content: HashMap::new(),
            handler: None,
        }
    }

    pub fn previous_menu(mut self, name: impl Into<String>) -> Self {
        self.previous_menu = name.into();
        self
    }

    pub fn next_menu(mut self, name: impl Into<String>) -> Self {
        self.next_menu = name.into();
        self
    }

    pub fn shortcut(mut self, dial: impl Into<String>) -> Self {
        self.shortcut = Some(dial.into());
        self
    }

    /// Add a localized content template for a language code.
    pub fn content(mut self, lang: impl Into<String>, template: impl Into<String>) -> Self {
        self.content.insert(lang.into(), template.into());
        self
    }

    pub fn handler(mut self, handler: impl MenuHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Menu> {
        if self.name.is_empty() {
            return Err(UssdError::Config("missing menu name".to_string()));
        }
        let handler = self
            .handler
            .ok_or_else(|| UssdError::Config(format!("menu {} has no handler", self.name)))?;

        Ok(Menu {
            name: self.name,
            previous_menu: self.previous_menu,
            next_menu: self.next_menu,
            shortcut: self.shortcut,
            content: self.content,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> UssdPayload {
        UssdPayload::builder()
            .session_id("s1")
            .msisdn("254700111222")
            .params("1*2")
            .build()
    }

    fn menu_with(handler: impl MenuHandler + 'static) -> Menu {
        Menu::builder("amount")
            .previous_menu("home")
            .next_menu("confirm")
            .content("en", "CON Enter amount for {0}")
            .handler(handler)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_name_and_handler() {
        let err = Menu::builder("")
            .handler(FnHandler::new(|_, m: &Menu| {
                Ok(m.execute_menu_args("en", &[]))
            }))
            .build()
            .unwrap_err();
        assert!(matches!(err, UssdError::Config(_)));

        let err = Menu::builder("home").build().unwrap_err();
        assert!(matches!(err, UssdError::Config(_)));
    }

    #[test]
    fn test_execute_menu_args_substitution() {
        let menu = menu_with(FnHandler::new(|_, m: &Menu| {
            Ok(m.execute_menu_args("en", &[]))
        }));

        let sr = menu.execute_menu_args("en", &["254700111222"]);
        assert_eq!(sr.response(), "CON Enter amount for 254700111222");
        assert!(!sr.failed());
        assert_eq!(sr.menu_name(), "amount");
    }

    #[test]
    fn test_execute_menu_args_missing_language() {
        let menu = menu_with(FnHandler::new(|_, m: &Menu| {
            Ok(m.execute_menu_args("en", &[]))
        }));
        let sr = menu.execute_menu_args("sw", &[]);
        assert_eq!(sr.response(), "");
        assert_eq!(sr.menu_name(), "amount");
    }

    #[tokio::test]
    async fn test_generate_response_stamps_menu_and_session() {
        let menu = menu_with(FnHandler::new(|p: &UssdPayload, m: &Menu| {
            Ok(m.execute_menu_args("en", &[p.current_param()]))
        }));

        let sr = menu.generate_response(&payload()).await.unwrap();
        assert_eq!(sr.response(), "CON Enter amount for 2");
        assert_eq!(sr.menu_name(), "amount");
        assert_eq!(sr.session_id(), "s1");
        assert!(!sr.failed());
    }

    #[tokio::test]
    async fn test_validation_sentinel_absorbed_with_default_message() {
        let menu = menu_with(FnHandler::new(|_, _: &Menu| {
            Err(UssdError::validation())
        }));

        let sr = menu.generate_response(&payload()).await.unwrap();
        assert!(sr.failed());
        assert_eq!(sr.status_message(), DEFAULT_VALIDATION_MESSAGE);
        assert!(!sr.status_message().is_empty());
        assert_eq!(sr.menu_name(), "amount");
    }

    #[tokio::test]
    async fn test_validation_sentinel_keeps_handler_message() {
        let menu = menu_with(FnHandler::new(|_, _: &Menu| {
            Err(UssdError::Validation("amount must be numeric".to_string()))
        }));

        let sr = menu.generate_response(&payload()).await.unwrap();
        assert!(sr.failed());
        assert_eq!(sr.status_message(), "amount must be numeric");
        assert_eq!(sr.menu_name(), "amount");
    }

    #[tokio::test]
    async fn test_other_handler_errors_propagate() {
        let menu = menu_with(FnHandler::new(|_, _: &Menu| {
            Err(UssdError::Cache("backend down".to_string()))
        }));

        let err = menu.generate_response(&payload()).await.unwrap_err();
        assert!(matches!(err, UssdError::Cache(_)));
    }

    #[tokio::test]
    async fn test_async_handler_trait() {
        struct Slow;

        #[async_trait]
        impl MenuHandler for Slow {
            async fn handle(
                &self,
                _payload: &UssdPayload,
                menu: &Menu,
            ) -> Result<SessionResponse> {
                tokio::task::yield_now().await;
                Ok(menu.execute_menu_args("en", &["x"]))
            }
        }

        let menu = menu_with(Slow);
        let sr = menu.generate_response(&payload()).await.unwrap();
        assert_eq!(sr.response(), "CON Enter amount for x");
    }
}
