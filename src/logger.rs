//! Session logger: a `log::Log` backend that writes every record to an
//! optional session file and, if configured, mirrors it to stderr.
//!
//! The file is **truncated when the logger is installed**, so it only ever
//! contains output from the most recent session. Use the ordinary `log` macros
//! (`log::info!`, `log::warn!`, ...) anywhere in the crate.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static SESSION: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Mutex<Option<File>>,
    level: LevelFilter,
    echo_stderr: bool,
}

impl SessionLogger {
    fn write_line(&self, line: &str) {
        if let Ok(mut guard) = self.file.lock()
            && let Some(file) = guard.as_mut()
        {
            let _ = writeln!(file, "{}", line);
        }
        if self.echo_stderr {
            eprintln!("{}", line);
        }
    }
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write_line(&format_line(
            &timestamp(),
            record.level().as_str(),
            record.target(),
            &record.args().to_string(),
        ));
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.file.lock()
            && let Some(file) = guard.as_mut()
        {
            let _ = file.flush();
        }
    }
}

/// Returns the path to the current session log file, if one was opened.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Install the session logger.
///
/// * Creates (or truncates) `config.log_file` when set, only once the logger
///   is actually installed.
/// * Installs a panic hook that logs the panic message before chaining to
///   the previous hook.
///
/// A second call returns an error and leaves the first session, and its log
/// file, untouched.
pub fn init(config: &CoreConfig) -> Result<()> {
    let level = config.level_filter()?;

    let logger = SESSION.get_or_init(|| SessionLogger {
        file: Mutex::new(None),
        level,
        echo_stderr: config.echo_stderr,
    });
    log::set_logger(logger).map_err(|e| CoreError::Config(format!("logger already installed: {}", e)))?;
    log::set_max_level(logger.level);

    if let Some(path) = &config.log_file {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let _ = LOG_PATH.set(path.clone());
        if let Ok(mut guard) = logger.file.lock() {
            *guard = Some(f);
        }
    }

    log::info!(
        "=== paintfe-core session started {} ===",
        human_timestamp()
    );
    if let Some(path) = log_path() {
        log::info!("Log file: {}", path.display());
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC: {}", info);
        log::logger().flush();
        prev(info);
    }));

    Ok(())
}

fn format_line(ts: &str, level: &str, target: &str, msg: &str) -> String {
    format!("[{}] [{}] {}: {}", ts, level, target, msg)
}

/// Seconds-since-epoch rendered as HH:MM:SS within the current day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
