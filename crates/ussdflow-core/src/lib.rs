//! Core crate for the ussdflow system - shared error type and configuration.

pub mod config;
pub mod error;

pub use config::{AppConfig, AuditConfig, SessionConfig, UssdConfig};
pub use error::{Result, UssdError};
