//! `carewatch-cli` – CareWatch operator terminal
//!
//! This binary is the entry point of the CareWatch dashboard.  It:
//!
//! 1. Checks for `~/.carewatch/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Resolves the backend: live hosted database when the API key and
//!    database URL are configured, otherwise the built-in simulator.
//! 3. Drops the operator into an **interactive REPL** (`/login`, `/call`,
//!    `/logout`, ...) while a renderer task prints vitals, alerts and
//!    dispatch state as they are published on the event bus.
//! 4. Intercepts **Ctrl-C** to sign out (stopping the data feed) before exit.

mod config;
mod render;
mod repl;

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

use carewatch_middleware::EventBus;
use carewatch_runtime::SessionManager;
use carewatch_types::Backend;

use crate::render::DashboardView;

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); CAREWATCH_LOG_FORMAT=json switches
    // to JSON lines.  Operator-facing output still uses println!.
    let _telemetry = carewatch_runtime::init_tracing("carewatch");

    print_banner();

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let loaded = config::load();
    match &loaded {
        Ok(Some(_)) => println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        ),
        Ok(None) => {}
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }
    let cfg = config::resolve(loaded, run_first_run_wizard);
    let backend = cfg.backend();
    print_mode(&backend);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Event bus ─────────────────────────────────────────────────────────
    // Subscribe before any session exists so no event is missed.
    let bus = EventBus::default();
    let events = bus.subscribe();
    let view = Arc::new(Mutex::new(DashboardView::new()));

    let mode = backend.kind();
    let manager = Arc::new(tokio::sync::Mutex::new(SessionManager::new(backend, bus)));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // The handler thread cannot await, so it hands off to a runtime task that
    // signs out (stopping the feed subscription) and exits.
    let shutdown = Arc::new(AtomicBool::new(false));
    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
    runtime.spawn({
        let manager = manager.clone();
        let shutdown = shutdown.clone();
        async move {
            if stop_rx.recv().await.is_none() {
                return;
            }
            println!();
            println!("{}", "⚠  Ctrl-C received – signing out …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            manager.lock().await.sign_out().await;
            println!("{}", "  ✓ Data feed stopped.".green());
            println!("{}", "  ✓ Exiting CareWatch.".green());
            std::process::exit(0);
        }
    });

    println!();
    println!(
        "  Type {} to start monitoring or {} for a list of commands.\n",
        "/login".bold().cyan(),
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(
        repl::Shell {
            runtime: &runtime,
            manager,
            view,
            mode,
        },
        events,
        shutdown,
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

/// Ask for the settings, save them, and return them.
fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      CareWatch First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up CareWatch.");
    println!("  Leave the API key empty to run against the built-in simulator.\n");

    let mut cfg = config::Config::default();

    let key = prompt_line("  Web API key []: ", "");
    if !key.is_empty() {
        cfg.api_key = key;
        cfg.database_url = prompt_line(
            &format!("  Realtime database URL [{}]: ", cfg.database_url),
            &cfg.database_url,
        );
        cfg.auth_url = prompt_line(&format!("  Auth API URL [{}]: ", cfg.auth_url), &cfg.auth_url);
    }

    let period = prompt_line(
        &format!("  Simulated reading interval in ms [{}]: ", cfg.sim_period_ms),
        &cfg.sim_period_ms.to_string(),
    );
    if let Ok(ms) = period.trim().parse::<u64>() {
        cfg.sim_period_ms = ms;
    }

    match config::save(&cfg) {
        Ok(()) => {
            println!(
                "\n  {} Config saved to {}\n",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            );
        }
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______                _       __      __       __  "#.bold().cyan());
    println!("{}", r#"  / ____/___ _________  | |     / /___ _/ /______/ /_ "#.bold().cyan());
    println!("{}", r#" / /   / __ `/ ___/ _ \ | | /| / / __ `/ __/ ___/ __ \"#.bold().cyan());
    println!("{}", r#"/ /___/ /_/ / /  /  __/ | |/ |/ / /_/ / /_/ /__/ / / /"#.bold().cyan());
    println!("{}", r#"\____/\__,_/_/   \___/  |__/|__/\__,_/\__/\___/_/ /_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "CareWatch".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Health & Assistive Robotics Dashboard");
    println!();
}

fn print_mode(backend: &Backend) {
    match backend {
        Backend::Live(live) => println!(
            "  Mode: {} ({})",
            "live".green().bold(),
            live.database_url.dimmed()
        ),
        Backend::Simulated(sim) => println!(
            "  Mode: {} (reading every {} ms)",
            "simulated".yellow().bold(),
            sim.period.as_millis()
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
