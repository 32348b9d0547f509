//! `log` backend that forwards every record to a sink provided by the kernel,
//! usually the UART driver.

use core::fmt::Arguments;
use spin::Once;

/// Writes a single, already formatted log line.
pub type Sink = fn(Arguments<'_>);

struct Logger {
    sink: Once<Sink>,
}

static LOGGER: Logger = Logger { sink: Once::new() };

impl log::Log for Logger {
    #[allow(unused_variables)]
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        #[cfg(any(debug_assertions, feature = "logging"))]
        return true;
        #[cfg(all(not(debug_assertions), not(feature = "logging")))]
        return metadata.level() <= log::Level::Info;
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Some(sink) = self.sink.get() {
            let mod_path = record
                .module_path_static()
                .or_else(|| record.module_path())
                .unwrap_or("<n/a>");

            sink(format_args!(
                "[ {:>5} ] [{}] {}\n",
                record.level(),
                mod_path,
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Install the global logger, which writes every line into `sink`.
///
/// Fails if any logger, including this one, was already installed.
pub fn init_logging(sink: Sink) -> Result<(), log::SetLoggerError> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
