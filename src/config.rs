//! Runtime configuration for the core: canvas limits, worker count, history
//! budget and logging. Loaded from JSON; every field has a default so partial
//! files are fine.

use std::path::{Path, PathBuf};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::geometry::Rect;

/// Default half-size of the addressable canvas (pixels from the origin).
pub const DEFAULT_MAX_CANVAS_EXTENT: i32 = 1 << 20;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Writes further than this from the origin are rejected.
    pub max_canvas_extent: i32,
    /// Threads owned by the [`WorkerPool`](crate::pool::WorkerPool).
    pub worker_threads: usize,
    pub history_steps: usize,
    pub history_memory_bytes: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub echo_stderr: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_canvas_extent: DEFAULT_MAX_CANVAS_EXTENT,
            worker_threads: 2,
            history_steps: 50,
            history_memory_bytes: 100 * 1024 * 1024, // 100 MB
            log_level: "info".to_string(),
            log_file: None,
            echo_stderr: true,
        }
    }
}

impl CoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_canvas_extent <= 0 {
            return Err(CoreError::Config(format!(
                "max_canvas_extent must be positive, got {}",
                self.max_canvas_extent
            )));
        }
        if self.worker_threads == 0 {
            return Err(CoreError::Config("worker_threads must be at least 1".into()));
        }
        self.level_filter().map(|_| ())
    }

    /// Rectangle every tile store built from this config may write into.
    pub fn canvas_limits(&self) -> Rect {
        let e = self.max_canvas_extent;
        Rect::new(-e, -e, e.saturating_mul(2), e.saturating_mul(2))
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| CoreError::Config(format!("unknown log level '{}'", self.log_level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = CoreConfig::from_json_str(r#"{ "worker_threads": 6 }"#).unwrap();
        assert_eq!(config.worker_threads, 6);
        assert_eq!(config.history_steps, 50);
        assert_eq!(config.max_canvas_extent, DEFAULT_MAX_CANVAS_EXTENT);
    }

    #[test]
    fn rejects_bad_level_and_zero_workers() {
        assert!(CoreConfig::from_json_str(r#"{ "log_level": "loud" }"#).is_err());
        assert!(CoreConfig::from_json_str(r#"{ "worker_threads": 0 }"#).is_err());
    }

    #[test]
    fn limits_are_centred_on_origin() {
        let config = CoreConfig {
            max_canvas_extent: 100,
            ..CoreConfig::default()
        };
        assert_eq!(config.canvas_limits(), Rect::new(-100, -100, 200, 200));
    }
}
