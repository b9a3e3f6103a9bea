use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, Record};

struct Logger;

/// Installs the process logger. `verbosity` counts `-v` flags: 0 is info,
/// 1 debug, anything more trace.
pub fn init(verbosity: u8) -> anyhow::Result<()> {
    log::set_boxed_logger(Box::new(Logger))?;
    log::set_max_level(match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
    Ok(())
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match record.level() {
            // plain info lines; progress output shares the terminal
            Level::Info => eprintln!("{}", record.args()),
            Level::Warn | Level::Error => {
                eprintln!("{} {}", label(record.level()), record.args());
            }
            Level::Debug | Level::Trace => {
                eprintln!(
                    "{} {} {}",
                    label(record.level()),
                    record.target().dimmed(),
                    record.args()
                );
            }
        }
    }

    fn flush(&self) {}
}

fn label(level: Level) -> ColoredString {
    match level {
        Level::Debug => "[DEBUG]".bold().blue(),
        Level::Error => "[ERROR]".bold().red(),
        Level::Info => "[INFO]".bold().green(),
        Level::Trace => "[TRACE]".bold().purple(),
        Level::Warn => "[WARN]".bold().yellow(),
    }
}
