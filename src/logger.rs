use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

/// Colored stderr logger. Until [`JobspaceLogger::print_deferred`] is called
/// records are held back, because the final level is only known once the
/// configuration has been resolved.
pub struct JobspaceLogger {
    level: Mutex<LevelFilter>,
    output: Mutex<Box<dyn Write + Send>>,
    deferred: Mutex<Vec<(Level, ColoredString)>>,
    defer_output: Mutex<bool>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JobspaceLogger {
    pub fn new(level: LevelFilter) -> &'static Self {
        Box::leak(Box::new(Self {
            level: Mutex::new(level),
            output: Mutex::new(Box::new(io::stderr())),
            deferred: Mutex::new(Vec::new()),
            defer_output: Mutex::new(true),
        }))
    }

    pub fn init(&'static self) -> Result<&'static Self, log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(LevelFilter::Trace);
        Ok(self)
    }

    pub fn set_level(&self, level: LevelFilter) {
        *lock(&self.level) = level;
    }

    pub fn print_deferred(&self) {
        {
            let deferred = lock(&self.deferred);
            let level_filter = *lock(&self.level);
            let mut output = lock(&self.output);
            for (level, message) in deferred.iter() {
                if level <= &level_filter {
                    let _ = writeln!(output, "{}", message);
                }
            }
        }
        lock(&self.deferred).clear();
        *lock(&self.defer_output) = false;
    }
}

impl Log for JobspaceLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *lock(&self.level)
    }

    fn log(&self, record: &Record) {
        let (level_str, color) = match record.level() {
            Level::Error => (record.level().to_string(), colored::Color::Red),
            Level::Warn => {
                (format!("{} ", record.level()), colored::Color::Yellow)
            }
            Level::Info => {
                (format!("{} ", record.level()), colored::Color::White)
            }
            Level::Debug => (record.level().to_string(), colored::Color::Blue),
            Level::Trace => {
                (record.level().to_string(), colored::Color::BrightBlack)
            }
        };
        let level_str = level_str.color(color);
        let line =
            format!("[{}] {}: {}", level_str, record.target(), record.args())
                .color(color);
        if *lock(&self.defer_output) {
            lock(&self.deferred).push((record.level(), line));
        } else if self.enabled(record.metadata()) {
            let _ = writeln!(lock(&self.output), "{}", line);
        }
    }

    fn flush(&self) {
        let _ = lock(&self.output).flush();
    }
}
