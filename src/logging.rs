//! Tracing subscriber setup for the binaries.

use std::{env, sync::OnceLock};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

static INITED: OnceLock<()> = OnceLock::new();

fn env_filter(default_directives: &str) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::new(default_directives),
    }
}

/// Initialize the global tracing subscriber at `info`, exactly once.
pub fn init() {
    init_with_default("info");
}

/// Initialize the global tracing subscriber exactly once.
///
/// Env vars:
/// - RUST_LOG: env filter, overrides `default_directives` (e.g. "transfer_parser=debug")
/// - LOG_FORMAT: "pretty" (default) or "json"
/// - LOG_ANSI: "0" to disable ANSI colors
///
/// Output goes to stderr so command output on stdout stays clean.
pub fn init_with_default(default_directives: &str) {
    if INITED.set(()).is_err() {
        return;
    }

    let fmt_layer_builder = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(env::var("LOG_ANSI").map_or(true, |v| v != "0"));

    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let console_layer = if format.eq_ignore_ascii_case("json") {
        fmt_layer_builder.json().boxed()
    } else {
        fmt_layer_builder.boxed()
    };

    // Another subscriber may already be installed (tests); keep it
    let _ = Registry::default()
        .with(env_filter(default_directives))
        .with(console_layer)
        .try_init();
}
