use std::io;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const STDOUT_FILTER: &str = "info,llm_request=info,web_request=warn,db_query=warn,db=warn,cache=warn,sqlx=off";
const FILE_FILTER: &str = "info,llm_request=debug,engine=debug,feedback=debug,sqlx=info";

/// Installs the stdout and daily-rolling file loggers. `RUST_LOG` replaces
/// the stdout filter when set.
pub fn configure_logging() {
    // Pool reconnect chatter from hyper is not actionable.
    let custom_filter = FilterFn::new(|metadata| {
        !(metadata.level() == &Level::WARN && metadata.target().starts_with("hyper_util"))
    });

    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STDOUT_FILTER));
    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(stdout_filter)
        .with_filter(custom_filter);

    let file_appender = rolling::daily("logs", "condense.log");
    let file_log = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new(FILE_FILTER));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}

/// Stdout-only logging for the command line tools.
pub fn configure_cli_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::Registry::default()
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter))
        .init();
}
