//! Session response value, produced by menu handlers and the engine.

/// Outcome of rendering one menu step.
///
/// Getters are public; the setter surface is engine-controlled
/// (crate-private), so callers outside the session crate cannot mutate a
/// response behind the engine's back. Handlers obtain fresh instances via
/// [`crate::Menu::execute_menu_args`] or [`SessionResponse::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionResponse {
    response: String,
    failed: bool,
    status_message: String,
    menu_name: String,
    session_id: String,
}

impl SessionResponse {
    /// A fresh, non-failed response with the given body text.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    /// The response body text, before wire framing.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Whether the step failed (API error, invalid input, ...).
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Status message describing a failure; empty on success.
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Name of the menu that produced this response.
    pub fn menu_name(&self) -> &str {
        &self.menu_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn set_failed(&mut self) {
        self.failed = true;
    }

    pub(crate) fn set_status_message(&mut self, val: impl Into<String>) {
        self.status_message = val.into();
    }

    pub(crate) fn set_menu(&mut self, val: impl Into<String>) {
        self.menu_name = val.into();
    }

    pub(crate) fn set_session_id(&mut self, val: impl Into<String>) {
        self.session_id = val.into();
    }
}
