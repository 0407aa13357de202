//! REPL – Read-Eval-Print Loop for the CareWatch operator shell.
//!
//! Supported slash-commands:
//!   /login [email]   – sign in and start a monitoring session
//!   /signup [email]  – create an account and start a session
//!   /logout          – end the current session
//!   /call            – manually dispatch the robot car
//!   /status          – re-print the dashboard
//!   /help            – show this list
//!   /quit | /exit    – sign out and exit the CLI
//!
//! Dashboard output is printed by a renderer task as bus events arrive,
//! above the prompt via rustyline's external printer; the REPL itself only
//! drives the [`SessionManager`].

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, ExternalPrinter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use zeroize::Zeroizing;

use carewatch_runtime::SessionManager;
use carewatch_runtime::auth::DEMO_EMAIL;
use carewatch_types::{CareError, Event, SourceKind};

use crate::render::{DashboardView, Redraw};

/// Manager shared between the REPL and the Ctrl-C task.
pub type SharedManager = Arc<tokio::sync::Mutex<SessionManager>>;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(Option<String>),
    Signup(Option<String>),
    Logout,
    Call,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Command::Empty;
        };
        let arg = words.next().map(str::to_string);
        match head {
            "/login" => Command::Login(arg),
            "/signup" => Command::Signup(arg),
            "/logout" => Command::Logout,
            "/call" => Command::Call,
            "/status" => Command::Status,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Everything a command handler needs.
pub struct Shell<'a> {
    pub runtime: &'a Runtime,
    pub manager: SharedManager,
    pub view: Arc<Mutex<DashboardView>>,
    pub mode: SourceKind,
}

/// Entry point for the interactive REPL.
///
/// Spawns the renderer on `events`, then reads commands until the operator
/// quits.  `shutdown` is polled each iteration; when set the REPL exits
/// cleanly.
pub fn run(shell: Shell<'_>, events: broadcast::Receiver<Event>, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let printer: Option<Printer> = match editor.create_external_printer() {
        Ok(printer) => Some(Box::new(printer)),
        Err(e) => {
            warn!(error = %e, "external printer unavailable; dashboard output may overlap the prompt");
            None
        }
    };
    shell.runtime.spawn(render_loop(events, shell.view.clone(), printer));
    let prompt = format!("{} ", "carewatch>".bold().cyan());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                shell.sign_out();
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Login(email) => shell.cmd_auth(&mut editor, email, false),
            Command::Signup(email) => shell.cmd_auth(&mut editor, email, true),
            Command::Logout => {
                if !shell.sign_out() {
                    println!("{}", "Not signed in.".yellow());
                }
            }
            Command::Call => shell.cmd_call(),
            Command::Status => shell.cmd_status(),
            Command::Help => cmd_help(),
            Command::Quit => {
                shell.sign_out();
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "CareWatch Commands".bold().underline());
    println!("  {}  – sign in and start monitoring", "/login [email]".bold().cyan());
    println!("  {} – create an account and sign in", "/signup [email]".bold().cyan());
    println!("  {}         – end the current session", "/logout".bold().cyan());
    println!("  {}           – call the robot car now", "/call".bold().cyan());
    println!("  {}         – show the dashboard", "/status".bold().cyan());
    println!("  {}    – sign out and exit", "/quit  /exit".bold().cyan());
    println!();
}

impl Shell<'_> {
    fn cmd_auth(&self, editor: &mut DefaultEditor, email: Option<String>, create: bool) {
        let email = match email {
            Some(email) => email,
            None => prompt_str(editor, &format!("  Email [{DEMO_EMAIL}]: "), DEMO_EMAIL),
        };
        let password = prompt_password(editor, self.mode);

        let result = self.runtime.block_on(async {
            let mut manager = self.manager.lock().await;
            if create {
                manager.sign_up(&email, &password).await
            } else {
                manager.sign_in(&email, &password).await
            }
        });
        // Success and failure are both reported by the renderer from bus events.
        if let Err(e) = result {
            tracing::debug!(error = %e, "authentication did not start a session");
        }
    }

    fn cmd_call(&self) {
        let result = self
            .runtime
            .block_on(async { self.manager.lock().await.call_robot().await });
        match result {
            Ok(()) => {}
            Err(CareError::SessionClosed) => {
                println!("{}", "Not signed in. Use /login first.".yellow())
            }
            Err(e) => println!("{}: {}", "Dispatch failed".red(), e),
        }
    }

    fn cmd_status(&self) {
        let view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        println!();
        println!("  {}", view.render_header());
        if view.is_signed_in() {
            println!("{}", view.render_dashboard());
        }
        println!();
    }

    /// Returns `false` when nobody was signed in.
    fn sign_out(&self) -> bool {
        self.runtime
            .block_on(async { self.manager.lock().await.sign_out().await })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Renderer
// ─────────────────────────────────────────────────────────────────────────────

/// Prints above the active prompt.
type Printer = Box<dyn ExternalPrinter + Send>;

fn emit(printer: &mut Option<Printer>, text: String) {
    match printer {
        Some(printer) => {
            if let Err(e) = printer.print(text) {
                warn!(error = %e, "dashboard output dropped");
            }
        }
        None => println!("{text}"),
    }
}

/// Fold bus events into `view` and print what changed.
async fn render_loop(
    mut events: broadcast::Receiver<Event>,
    view: Arc<Mutex<DashboardView>>,
    mut printer: Option<Printer>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "renderer fell behind the event bus");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let text = {
            let mut view = view.lock().unwrap_or_else(PoisonError::into_inner);
            match view.apply(&event) {
                Redraw::Dashboard => format!("\n{}", view.render_dashboard()),
                Redraw::Button => view.render_button(),
                Redraw::Notice(message) => format!("  {} {}", "»".cyan().bold(), message),
            }
        };
        emit(&mut printer, text);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_str(editor: &mut DefaultEditor, msg: &str, default: &str) -> String {
    match editor.readline(msg) {
        Ok(line) if !line.trim().is_empty() => line.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Read a password without adding it to history.
fn prompt_password(editor: &mut DefaultEditor, mode: SourceKind) -> Zeroizing<String> {
    let msg = match mode {
        SourceKind::Simulated => "  Password (any value in simulated mode): ",
        SourceKind::Live => "  Password: ",
    };
    match editor.readline(msg) {
        Ok(line) => {
            let mut line = Zeroizing::new(line);
            let len = line.trim_end_matches(['\r', '\n']).len();
            line.truncate(len);
            line
        }
        Err(_) => Zeroizing::new(String::new()),
    }
}
