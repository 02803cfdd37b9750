//! Rolling file logs for engine diagnostics.
//!
//! # Responsibility
//! - Route the engine's `event=.. module=.. status=..` lines to a
//!   size-rotated file, started at most once per process.
//!
//! # Invariants
//! - The first successful start fixes the level and directory; a later call
//!   with the same pair is a no-op and any other pair is refused.
//! - Starting never panics.
//! - Engine events carry entity and relation names and counts, never record
//!   values.

use crate::config::EngineConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{info, LevelFilter};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "entity_engine";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 4;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogTarget {
    level: LevelFilter,
    dir: PathBuf,
}

impl LogTarget {
    fn parse(level: &str, log_dir: &str) -> Result<Self, String> {
        let level = match level.trim().parse::<LevelFilter>() {
            Ok(LevelFilter::Off) | Err(_) => {
                return Err(format!(
                    "unsupported log level `{}`; expected trace|debug|info|warn|error",
                    level.trim()
                ))
            }
            Ok(level) => level,
        };

        let dir = log_dir.trim();
        if dir.is_empty() {
            return Err("log directory cannot be empty".to_string());
        }
        if !Path::new(dir).is_absolute() {
            return Err(format!("log directory must be absolute, got `{dir}`"));
        }

        Ok(Self {
            level,
            dir: PathBuf::from(dir),
        })
    }
}

struct ActiveLogger {
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` under `log_dir`.
///
/// # Errors
/// - Unsupported level, or a directory that is empty, relative or cannot be
///   created.
/// - Logging is already active with a different level or directory.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogTarget::parse(level, log_dir)?;
    let active = ACTIVE_LOGGER.get_or_try_init(|| start(requested.clone()))?;
    if active.target == requested {
        return Ok(());
    }
    Err(format!(
        "logging already active with level={} dir={}; refusing to switch to level={} dir={}",
        active.target.level,
        active.target.dir.display(),
        requested.level,
        requested.dir.display()
    ))
}

/// Starts logging from `config`. `Ok(false)` when no log directory is set.
pub fn init_logging_from_config(config: &EngineConfig) -> Result<bool, String> {
    let Some(log_dir) = config.log_dir.as_deref() else {
        return Ok(false);
    };
    init_logging(&config.log_level, log_dir)?;
    Ok(true)
}

/// Active level and directory, if logging has been started.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.target.level, active.target.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start(target: LogTarget) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(&target.dir).map_err(|err| {
        format!(
            "failed to create log directory `{}`: {err}",
            target.dir.display()
        )
    })?;

    let handle = Logger::try_with_str(target.level.as_str().to_ascii_lowercase())
        .map_err(|err| format!("invalid log specification `{}`: {err}", target.level))?
        .log_to_file(
            FileSpec::default()
                .directory(target.dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    info!(
        "event=logging_init module=engine status=ok version={} level={} log_dir={}",
        env!("CARGO_PKG_VERSION"),
        target.level,
        target.dir.display()
    );
    Ok(ActiveLogger {
        target,
        _handle: handle,
    })
}
