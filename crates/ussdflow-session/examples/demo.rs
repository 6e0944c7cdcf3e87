//! End-to-end walkthrough: a small money-transfer menu graph served from
//! an in-process cache, with the audit pipeline attached.
//!
//! Run with `cargo run --example demo -p ussdflow-session`.

use std::sync::Arc;

use ussdflow_audit::{AuditPipeline, SqliteAuditStore};
use ussdflow_core::{Result, UssdConfig, UssdError};
use ussdflow_session::{frame_response, FnHandler, Menu, MemoryCache, UssdApp, UssdPayload};

/// Each menu's handler validates the input that answered the previous
/// prompt, then renders its own prompt.
fn build_app(config: UssdConfig) -> Result<UssdApp> {
    let mut app = UssdApp::new(config, Arc::new(MemoryCache::new()))?;

    app.add_menu(
        Menu::builder("home")
            .next_menu("amount")
            .content("en", "CON Welcome to DemoBank\n1. Send money")
            .handler(FnHandler::new(|_, m: &Menu| {
                Ok(m.execute_menu_args("en", &[]))
            }))
            .build()?,
    )?;

    app.add_menu(
        Menu::builder("amount")
            .previous_menu("home")
            .next_menu("confirm")
            .content("en", "CON Enter amount")
            .handler(FnHandler::new(|p: &UssdPayload, m: &Menu| {
                match p.current_param() {
                    "1" => Ok(m.execute_menu_args("en", &[])),
                    _ => Err(UssdError::Validation("pick a listed option".to_string())),
                }
            }))
            .build()?,
    )?;

    app.add_menu(
        Menu::builder("confirm")
            .previous_menu("amount")
            .next_menu("goodbye")
            .content("en", "CON Send {0}?\n1. Yes\n2. No")
            .handler(FnHandler::new(|p: &UssdPayload, m: &Menu| {
                let amount = p.current_param();
                if !amount.is_empty() && amount.chars().all(|c| c.is_ascii_digit()) {
                    Ok(m.execute_menu_args("en", &[amount]))
                } else {
                    Err(UssdError::Validation("amount must be numeric".to_string()))
                }
            }))
            .build()?,
    )?;

    app.add_menu(
        Menu::builder("goodbye")
            .previous_menu("confirm")
            .content("en", "END Thank you for using DemoBank")
            .handler(FnHandler::new(|p: &UssdPayload, m: &Menu| {
                match p.current_param() {
                    "1" | "2" => Ok(m.execute_menu_args("en", &[])),
                    _ => Err(UssdError::Validation("pick 1 or 2".to_string())),
                }
            }))
            .build()?,
    )?;

    app.validate_menus()?;
    Ok(app)
}

/// One gateway round trip: resolve the menu, render, advance or replay,
/// log, frame.
async fn handle(app: &UssdApp, mut payload: UssdPayload) -> Result<String> {
    let (menu, _is_new) = app.get_session_menu(&payload).await?;
    let mut sr = menu.generate_response(&payload).await?;

    if sr.failed() {
        let message = sr.status_message().to_string();
        sr = app
            .previous_menu_with_error(&mut payload, &menu, &message)
            .await?;
    } else if menu.next_menu().is_empty() {
        app.end_session(&payload).await?;
    } else {
        app.update_next_menu(&payload, &menu).await?;
    }

    app.save_log(&payload, &sr).await;
    Ok(frame_response(&payload, &sr))
}

fn request(params: &str) -> UssdPayload {
    UssdPayload::from_query_pairs([
        ("SESSION_ID", "demo-session-1"),
        ("MSISDN", "254700111222"),
        ("SERVICE_CODE", "*384#"),
        ("USSD_PARAMS", params),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = UssdConfig::default();
    config.app.name = "demobank".to_string();
    config.app.home_menu = "home".to_string();

    let store = Arc::new(SqliteAuditStore::in_memory(&config.audit.table_name)?);
    let pipeline = AuditPipeline::start(store.clone(), &config.audit);

    let app = build_app(config)?.with_audit(pipeline.logger());

    // A session that fumbles the confirmation step once.
    for params in ["", "1", "1*500", "1*500*9", "1*500*1"] {
        let framed = handle(&app, request(params)).await?;
        println!("<- {:?}\n{}\n", params, framed);
    }

    pipeline.shutdown().await;
    println!("audit rows stored: {}", store.count()?);
    Ok(())
}
