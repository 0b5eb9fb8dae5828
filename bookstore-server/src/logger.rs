//! Logging Infrastructure
//!
//! - console output (pretty in development, JSON otherwise)
//! - daily rotating application logs under `<log_dir>/app`
//! - audit logs (`target: "audit"`) under `<log_dir>/audit`
//! - security logs (`target: "security"`) under `<log_dir>/security`

use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, filter_fn};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const AUDIT_TARGET: &str = "audit";
const SECURITY_TARGET: &str = "security";

/// Initialize the logging system
///
/// `RUST_LOG` overrides `level` for the console when set.
///
/// ```no_run
/// bookstore_server::logger::init_logger("info", true, Some("./logs"))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logger(level: &str, json_format: bool, log_dir: Option<&str>) -> anyhow::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let max_level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(console_filter)
            .boxed()
    };
    layers.push(console);

    if let Some(dir) = log_dir {
        let dir = Path::new(dir);

        layers.push(file_layer(dir, "app", json_format, move |meta| {
            meta.target() != AUDIT_TARGET
                && meta.target() != SECURITY_TARGET
                && max_level >= *meta.level()
        })?);
        layers.push(file_layer(dir, AUDIT_TARGET, json_format, |meta| {
            meta.target() == AUDIT_TARGET
        })?);
        layers.push(file_layer(dir, SECURITY_TARGET, json_format, |meta| {
            meta.target() == SECURITY_TARGET
        })?);
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

/// Daily rolling file layer in `<dir>/<name>/<name>.YYYY-MM-DD`
fn file_layer<F>(dir: &Path, name: &str, json_format: bool, keep: F) -> anyhow::Result<BoxedLayer>
where
    F: Fn(&tracing::Metadata<'_>) -> bool + Send + Sync + 'static,
{
    let sub_dir = dir.join(name);
    fs::create_dir_all(&sub_dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, sub_dir, name);
    let writer = std::sync::Mutex::new(appender);

    let layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(writer)
            .with_filter(filter_fn(keep))
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter_fn(keep))
            .boxed()
    };
    Ok(layer)
}

/// Audit log helper - records admin and money-moving operations
///
/// The event goes to the audit file; callers also persist it with
/// `db::repository::audit::record`.
///
/// ```ignore
/// audit_log!(admin_id, "refund.approve", format!("refund:{id}"));
/// audit_log!(admin_id, "order.ship", format!("order:{id}"), "courier pickup");
/// ```
#[macro_export]
macro_rules! audit_log {
    ($actor:expr, $action:expr, $resource:expr) => {
        tracing::info!(
            target: "audit",
            actor = %$actor,
            action = %$action,
            resource = %$resource,
            "AUDIT"
        );
    };
    ($actor:expr, $action:expr, $resource:expr, $details:expr) => {
        tracing::info!(
            target: "audit",
            actor = %$actor,
            action = %$action,
            resource = %$resource,
            details = %$details,
            "AUDIT"
        );
    };
}

/// Security log helper - signature failures, auth failures
///
/// ```ignore
/// security_log!(WARN, "invalid_signature", gateway = "vnpay", txn_ref = %txn_ref);
/// ```
#[macro_export]
macro_rules! security_log {
    (WARN, $event:expr, $($arg:tt)*) => {
        tracing::warn!(target: "security", event = $event, $($arg)*)
    };
    (ERROR, $event:expr, $($arg:tt)*) => {
        tracing::error!(target: "security", event = $event, $($arg)*)
    };
    (INFO, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: "security", event = $event, $($arg)*)
    };
}
