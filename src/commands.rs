use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use auth::api::ApiClient;
use auth::expiry::{ExpiryMonitor, ExpiryState};
use auth::gate::{GateDecision, RouteGate};
use auth::{EndReason, Error, Session, SessionStatus};
use chrono::{DateTime, Utc};
use colored::*;
use live::dispatch::handler_fn;
use live::invalidation::{route, InvalidationHandler, StaleKeys};
use live::ConnectionState;
use log::*;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::App;

/// Exit status of `gate` when the navigation must go to sign-in.
const REDIRECT_EXIT_CODE: u8 = 2;

fn failed(err: &Error) -> ExitCode {
    debug!("{}", err);
    println!("{} {}", "✗".red(), err.user_message());
    ExitCode::FAILURE
}

fn print_session(session: &Session) {
    println!("  {} {}", "user:".bright_white(), session.user_id());
    if !session.email().is_empty() {
        println!("  {} {}", "email:".bright_white(), session.email());
    }
    println!("  {} {}", "role:".bright_white(), session.role());
    if let Some(plan) = session.plan() {
        println!("  {} {}", "plan:".bright_white(), plan);
    }
    println!(
        "  {} {} ({})",
        "expires:".bright_white(),
        session.expires_at().to_rfc3339(),
        countdown(session.expires_at(), Utc::now())
    );
}

fn countdown(until: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (until - now).num_seconds();
    if seconds <= 0 {
        return "expired".to_string();
    }
    format!("{}m {:02}s left", seconds / 60, seconds % 60)
}

fn end_reason_text(reason: EndReason) -> &'static str {
    match reason {
        EndReason::LoggedOut => "signed out",
        EndReason::Expired => "session expired",
        EndReason::Unauthorized => "session rejected by the server",
        EndReason::FingerprintMismatch => "session belongs to another device",
        EndReason::Revoked => "signed out by the server",
    }
}

pub async fn login(app: &App, email: &str, password: &str) -> Result<ExitCode> {
    println!("{} Signing in as {}...", "→".blue(), email);
    match app.manager.login(email, password).await {
        Ok(session) => {
            println!("{} Signed in", "✓".green());
            print_session(&session);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(failed(&err)),
    }
}

pub async fn logout(app: &App) -> Result<ExitCode> {
    app.manager.logout().await;
    println!("{} Signed out", "✓".green());
    Ok(ExitCode::SUCCESS)
}

pub async fn refresh(app: &App) -> Result<ExitCode> {
    match app.manager.refresh().await {
        Ok(session) => {
            println!("{} Session renewed", "✓".green());
            print_session(&session);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(failed(&err)),
    }
}

pub fn status(app: &App) -> Result<ExitCode> {
    match app.manager.current_session() {
        Some(session) => {
            println!("{} Signed in", "✓".green());
            print_session(&session);
            println!(
                "  {} {}",
                "device:".bright_white(),
                &session.device_fingerprint()[..12.min(session.device_fingerprint().len())]
            );
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("{} Not signed in", "✗".yellow());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn get(app: &App, path: &str) -> Result<ExitCode> {
    let api = ApiClient::new(app.manager.clone());
    match api.get_json::<Value>(path).await {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(failed(&err)),
    }
}

pub fn gate(app: &App) -> Result<ExitCode> {
    match RouteGate::on_disk(&app.config.state_dir).check_at(Utc::now()) {
        GateDecision::Allow { subject } => {
            println!(
                "{} allow{}",
                "✓".green(),
                subject.map(|s| format!(" ({s})")).unwrap_or_default()
            );
            Ok(ExitCode::SUCCESS)
        }
        GateDecision::Redirect => {
            println!("{} redirect to sign-in", "→".yellow());
            Ok(ExitCode::from(REDIRECT_EXIT_CODE))
        }
    }
}

async fn renew(monitor: &ExpiryMonitor) {
    match monitor.renew().await {
        Ok(session) => println!(
            "{} Session renewed until {}",
            "✓".green(),
            session.expires_at().to_rfc3339()
        ),
        Err(err) => println!("{} {}", "✗".red(), err.user_message()),
    }
}

/// Follow the event stream and the token expiry until the session ends or
/// the user interrupts.
pub async fn watch(app: &App, auto_renew: bool) -> Result<ExitCode> {
    let Some(session) = app.manager.current_session() else {
        println!("{} Not signed in", "✗".yellow());
        return Ok(ExitCode::FAILURE);
    };
    println!("{} Watching as {}", "→".blue(), session.user_id());

    let monitor = Arc::new(app.expiry_monitor());
    let stream = app.event_stream();
    let stale = Arc::new(StaleKeys::new());
    stream.on_any(Arc::new(InvalidationHandler::new(stale.clone())));
    stream.on_any(handler_fn(|event| {
        let keys = route(&event.name, &event.payload);
        println!(
            "{} {} {}",
            "●".cyan(),
            event.name.bright_white().bold(),
            format!("ts={}", event.ts).dimmed()
        );
        if !keys.is_empty() {
            println!("    {} {}", "stale:".dimmed(), keys.join(", "));
        }
    }));

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let mut connection = stream.subscribe_state();
    let mut expiry = monitor.subscribe();
    let mut status = app.manager.subscribe();

    stream.connect();
    let polling = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.run().await }
    });

    let exit = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break ExitCode::SUCCESS;
            }
            line = input.next_line(), if input_open => {
                match line {
                    Ok(Some(_)) if matches!(monitor.state(), ExpiryState::Warning { .. }) => {
                        renew(&monitor).await;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => input_open = false,
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break ExitCode::FAILURE;
                }
                let state = *connection.borrow_and_update();
                match state {
                    ConnectionState::Open => println!("{} Live updates connected", "✓".green()),
                    ConnectionState::Retrying => println!("{} Live updates reconnecting...", "→".yellow()),
                    ConnectionState::Disconnected if stream.live_updates_unavailable() => {
                        println!("{} Live updates unavailable", "✗".red());
                    }
                    _ => {}
                }
            }
            changed = expiry.changed() => {
                if changed.is_err() {
                    break ExitCode::FAILURE;
                }
                let state = *expiry.borrow_and_update();
                if let ExpiryState::Warning { expires_at } = state {
                    println!(
                        "{} Session expires soon ({})",
                        "!".yellow().bold(),
                        countdown(expires_at, Utc::now())
                    );
                    if auto_renew {
                        renew(&monitor).await;
                    } else if input_open {
                        println!("    press Enter to stay signed in");
                    } else {
                        println!("    run `pulse refresh` to stay signed in");
                    }
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break ExitCode::FAILURE;
                }
                let current = *status.borrow_and_update();
                if let SessionStatus::Ended(reason) = current {
                    println!("{} {}", "✗".red(), end_reason_text(reason));
                    break ExitCode::FAILURE;
                }
            }
        }
    };

    stream.disconnect();
    polling.abort();
    debug!("Stale keys at exit: {:?}", stale.patterns());
    Ok(exit)
}
