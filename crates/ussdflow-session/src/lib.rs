//! Session engine for menu-driven USSD interactions.
//!
//! Turns a sequence of independent wire requests into a coherent,
//! resumable conversation: menu graph traversal, cache-backed session
//! persistence, validation-failure replay, and wire-protocol framing.
//! Audit rows produced here are handed to the `ussdflow-audit` pipeline.

pub mod app;
pub mod cache;
pub mod framer;
pub mod menu;
pub mod payload;
pub mod response;

pub use app::UssdApp;
pub use cache::{Cache, MemoryCache};
pub use framer::frame_response;
pub use menu::{FnHandler, Menu, MenuBuilder, MenuHandler, DEFAULT_VALIDATION_MESSAGE};
pub use payload::UssdPayload;
pub use response::SessionResponse;
