//! Shared library for the `ziphash` tool
//!
//! `ziphash` archives every immediate subdirectory of a source directory into its own zip file,
//! records a digest of every archive in a manifest and reports the digest of the manifest itself
//! as the run's fingerprint. Afterwards it can replicate the results and the sources under a
//! copy root, and move the sources into the output directory, clearing the originals only after
//! the operator confirmed the move.
//!
//! # Modules
//!
//! - [`pipeline`] - the stage sequence, owning every safety guarantee of a run
//! - [`archive`] - one deterministic zip per source subdirectory
//! - [`hash`] - streaming file digests and the supported algorithm names
//! - [`copy`] - verbatim and filtered recursive copies
//! - [`rm`] - clearing directories after a confirmed move
//! - [`paths`] - validation of the source, destination and copy roots
//! - [`extensions`] - the suffix allow-list used by every filter
//! - [`lock`] - the single-instance execution lock
//! - [`prompt`] - operator questions, interactive or scripted
//! - [`config`] - run, output and logging settings
//!
//! # Logging
//!
//! [`run`] installs a `tracing` subscriber before anything else happens. Console output carries
//! no timestamps; the optional log file gets local `YYYY/MM/DD-HH:MM:SS` timestamps and every
//! record is emitted inside a root span naming the operator. `RUST_LOG` overrides the level
//! derived from `-v`/`-q`.

use anyhow::Context;
use tracing::Instrument;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod archive;
pub mod config;
pub mod copy;
pub mod extensions;
pub mod hash;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod prompt;
pub mod rm;
pub mod testutils;

pub use config::{OutputConfig, RunConfiguration, TracingConfig};
pub use extensions::AllowList;
pub use hash::HashAlgorithm;
pub use lock::{ExecutionLock, LockConfig};

const LOG_TIME_FORMAT: &str = "%Y/%m/%d-%H:%M:%S";

struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format(LOG_TIME_FORMAT))
    }
}

/// Field formatter of the log file.
///
/// Span fields are formatted once per formatter type and cached on the span, so a file layer
/// sharing `DefaultFields` with the console would reuse the console's ANSI-styled text.
struct PlainFields(tracing_subscriber::fmt::format::DefaultFields);

impl<'writer> tracing_subscriber::fmt::FormatFields<'writer> for PlainFields {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: tracing_subscriber::fmt::format::Writer<'writer>,
        fields: R,
    ) -> std::fmt::Result {
        tracing_subscriber::fmt::FormatFields::format_fields(&self.0, writer, fields)
    }
}

/// Plain-text layer with local timestamps, used for `--log-file`.
fn file_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_timer(LocalTime)
        .fmt_fields(PlainFields(
            tracing_subscriber::fmt::format::DefaultFields::new(),
        ))
        .with_writer(writer)
}

/// Name of the operator running the process, uppercased.
#[must_use]
pub fn operator_name() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
        .to_uppercase()
}

fn init_tracing(output: &OutputConfig, tracing_config: &TracingConfig) -> anyhow::Result<()> {
    let level = tracing::level_filters::LevelFilter::from_level(output.level());
    let env_filter = || {
        tracing_subscriber::EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter());
    let file_layer = match &tracing_config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path:?}"))?;
            Some(file_layer(std::sync::Mutex::new(file)).with_filter(env_filter()))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")?;
    Ok(())
}

/// Set up logging and a tokio runtime, then drive `func` to completion.
///
/// Returns `Ok(None)` when `func` failed; the failure has already been logged as a single
/// `{:#}` line. Failing to set up logging or the runtime is returned as an error instead, since
/// nothing could be reported otherwise.
pub fn run<F, Fut, T, E>(
    output: &OutputConfig,
    tracing_config: &TracingConfig,
    func: F,
) -> anyhow::Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    T: std::fmt::Display,
    E: std::fmt::Display,
{
    init_tracing(output, tracing_config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    let root_span = tracing::info_span!("ziphash", user = %operator_name());
    match runtime.block_on(func().instrument(root_span)) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Ok(Some(summary))
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            Ok(None)
        }
    }
}
