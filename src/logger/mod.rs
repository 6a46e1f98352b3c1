//! Logging Module
//!
//! Colorized `tracing` output where everything below WARN goes to stdout and
//! warnings and errors go to stderr, with optional email notification for
//! warnings and errors.

mod email;

pub use email::{
    build_message, notify, send_email, send_simple_email, EmailLayer, EmailNotifier, Mailer,
    Notice, NotifierHandle, SmtpMailer,
};

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use colored::Colorize;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{EmailConfig, LoggingConfig};
use crate::error::{Error, Result};

pub use colored::Color;

/// Upper bound on waiting for queued notifications before exit
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

static COLORED: AtomicBool = AtomicBool::new(true);
static TERMINATE_ON_CRITICAL: AtomicBool = AtomicBool::new(true);

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Filter reload handle and the level the subscriber was started with
static FILTER: OnceLock<(FilterHandle, String)> = OnceLock::new();
static NOTIFIER: OnceLock<NotifierHandle> = OnceLock::new();

/// Colors used for the recurring parts of log lines
pub mod palette {
    use colored::Color;

    pub const INFO: Color = Color::Green;
    pub const DEBUG: Color = Color::Yellow;
    pub const PRINT: Color = Color::Blue;
    pub const ERROR: Color = Color::Red;
    pub const SQL: Color = Color::BrightCyan;
    pub const SQL_ARGS: Color = Color::BrightMagenta;
    pub const TARGET: Color = Color::Blue;
    pub const TABLE: Color = Color::Magenta;
    pub const OPENED: Color = Color::BrightGreen;
    pub const CLOSED: Color = Color::BrightRed;
    pub const PROFILE: Color = Color::BrightBlack;
    pub const VALUE: Color = Color::Yellow;
}

/// Initialize the global subscriber
///
/// Calling it twice returns an error and leaves the first subscriber in
/// place.
pub fn init_logging(config: &LoggingConfig, email: Option<&EmailConfig>) -> Result<()> {
    let (filter, handle) = reload::Layer::new(build_filter(&config.level, config.debug_info));

    let writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .or_else(std::io::stdout);

    let (email_layer, notifier) = match email {
        Some(email_config) => {
            let (layer, notifier) = EmailNotifier::spawn(SmtpMailer::new(email_config.clone()))?;
            (Some(layer), Some(notifier))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.colored)
                .with_writer(writer),
        )
        .with(email_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logger already initialized: {}", e)))?;

    let _ = FILTER.set((handle, config.level.clone()));
    if let Some(notifier) = notifier {
        let _ = NOTIFIER.set(notifier);
    }
    configure(config);
    Ok(())
}

/// `level` (or RUST_LOG) for everything, with library debug output
/// switched by `debug_info`
fn build_filter(level: &str, debug_info: bool) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let directive = if debug_info { "sll=debug" } else { "sll=info" };
    match directive.parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn apply_debug_info(handle: &FilterHandle, level: &str, debug_info: bool) -> Result<()> {
    handle
        .reload(build_filter(level, debug_info))
        .map_err(|e| Error::Config(format!("can't reload log filter: {}", e)))
}

/// Apply the runtime switches of the logging configuration.
///
/// Once [`init_logging`] has run this also switches library debug output
/// on or off; the base level stays the one given at init.
pub fn configure(config: &LoggingConfig) {
    COLORED.store(config.colored, Ordering::Relaxed);
    TERMINATE_ON_CRITICAL.store(config.terminate_on_critical, Ordering::Relaxed);
    colored::control::set_override(config.colored);

    if let Some((handle, level)) = FILTER.get() {
        if let Err(e) = apply_debug_info(handle, level, config.debug_info) {
            eprintln!("{}", e);
        }
    }
}

/// Whether critical errors terminate the process
pub fn terminate_on_critical() -> bool {
    TERMINATE_ON_CRITICAL.load(Ordering::Relaxed)
}

/// Wait until queued email notifications are sent, at most
/// [`FLUSH_TIMEOUT`]. True when nothing is left pending.
pub fn flush_notifications() -> bool {
    NOTIFIER.get().map_or(true, |notifier| notifier.flush(FLUSH_TIMEOUT))
}

/// Wrap `text` in `color` when coloring is enabled
pub fn paint(text: impl Display, color: Color) -> String {
    if COLORED.load(Ordering::Relaxed) {
        text.to_string().color(color).to_string()
    } else {
        text.to_string()
    }
}

/// Log an error and, when it is critical and termination is enabled,
/// exit the process with the error's exit code.
///
/// Critical errors are mailed before this returns or exits.
pub fn report(err: &Error, context: &str) {
    emit(err, context, NOTIFIER.get(), terminate_on_critical());
}

fn emit(err: &Error, context: &str, notifier: Option<&NotifierHandle>, terminate: bool) {
    if !err.is_critical() {
        tracing::error!(
            "\n[SLL EXCEPTION] by {} in {}\n{}",
            family(err),
            context,
            paint(err, palette::ERROR)
        );
        return;
    }

    tracing::error!(
        "\n[CRITICAL SLL EXCEPTION] by {} in {}\n{}",
        family(err),
        context,
        paint(err, palette::ERROR)
    );
    if let Some(notifier) = notifier {
        if !notifier.flush(FLUSH_TIMEOUT) {
            eprintln!("Email notification still pending after {:?}", FLUSH_TIMEOUT);
        }
    }
    if terminate {
        std::process::exit(err.exit_code());
    }
}

/// Unwrap a result, reporting the error through [`report`]
pub fn check<T>(result: Result<T>, context: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            report(&e, context);
            None
        }
    }
}

fn family(err: &Error) -> &'static str {
    match err {
        Error::Locker(_) => "Locker",
        Error::Database(_) | Error::DbConnect { .. } | Error::SqlQuery { .. } => "DB",
        Error::Script(_) => "SCRIPT",
        Error::Demultiplexor(_) | Error::DemultiplexorCritical(_) => "Demultiplexor",
        Error::Email(_) => "EmailSender",
        Error::Redis { .. } => "Redis",
        Error::Http(_) => "HTTP",
        _ => "SLL",
    }
}
