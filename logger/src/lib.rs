//! The `logger` module configures `env_logger`

use std::sync::{LazyLock, Once, RwLock};

static LOGGER: LazyLock<RwLock<Option<env_logger::Logger>>> =
    LazyLock::new(|| RwLock::new(None));

/// Forwards to whichever logger was installed last, so tests and binaries
/// may call `setup*` repeatedly even though `log` accepts a single logger.
struct LoggerShim {}

impl log::Log for LoggerShim {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        LOGGER
            .read()
            .ok()
            .and_then(|logger| logger.as_ref().map(|logger| logger.enabled(metadata)))
            .unwrap_or_default()
    }

    fn log(&self, record: &log::Record) {
        if let Ok(logger) = LOGGER.read() {
            if let Some(logger) = logger.as_ref() {
                logger.log(record);
            }
        }
    }

    fn flush(&self) {}
}

static INSTALL_SHIM: Once = Once::new();

fn replace_logger(logger: env_logger::Logger) {
    log::set_max_level(logger.filter());
    if let Ok(mut current) = LOGGER.write() {
        *current = Some(logger);
    }
    INSTALL_SHIM.call_once(|| {
        if let Err(err) = log::set_boxed_logger(Box::new(LoggerShim {})) {
            // Some other logger owns the facade and receives every record.
            log::debug!("trv1-logger shim not installed: {err}");
        }
    });
}

/// Configures logging with a specific filter overriding RUST_LOG.  _RUST_LOG is used instead
/// so if set it takes precedence.
/// May be called at any time to re-configure the log filter
pub fn setup_with(filter: &str) {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::new().filter_or("_RUST_LOG", filter))
            .format_timestamp_nanos()
            .build();
    replace_logger(logger);
}

/// Configures logging with a default filter if RUST_LOG is not set
pub fn setup_with_default(filter: &str) {
    let logger = env_logger::Builder::from_env(env_logger::Env::new().default_filter_or(filter))
        .format_timestamp_nanos()
        .build();
    replace_logger(logger);
}

/// Default filter for binaries.
pub const DEFAULT_FILTER: &str = "info";

/// Configures logging with the `error` filter unless RUST_LOG is set
pub fn setup() {
    setup_with_default("error");
}
