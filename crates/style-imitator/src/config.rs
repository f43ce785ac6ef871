//! Imitator configuration from environment variables

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::error::ImitatorError;

const DEFAULT_TARGET_PLAYER: &str = "Kasparov";
const DEFAULT_STOCKFISH_PATH: &str = "/usr/local/bin/stockfish";

/// Total think time per move, regardless of the clock sent by the client.
pub const DEFAULT_THINK_TIME_S: f64 = 25.0;
/// Share of the think time handed to the engine; the rest is left for tagging.
pub const DEFAULT_ENGINE_FRACTION: f64 = 0.2;
pub const DEFAULT_MULTIPV: u32 = 10;
pub const DEFAULT_LOG_MAX_LINES: usize = 50;

/// Wall-clock budget for one search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchBudget {
    pub total: Duration,
    pub engine_fraction: f64,
}

impl SearchBudget {
    /// The slice of the budget given to the engine.
    pub fn engine_slice(&self) -> Duration {
        self.total.mul_f64(self.engine_fraction)
    }

    /// Millisecond move time sent with `go movetime`, never below 1.
    pub fn movetime_ms(&self) -> u64 {
        (self.engine_slice().as_millis() as u64).max(1)
    }
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            total: Duration::from_secs_f64(DEFAULT_THINK_TIME_S),
            engine_fraction: DEFAULT_ENGINE_FRACTION,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImitatorConfig {
    /// Style profile the imitator plays as
    pub target_player: String,

    /// Path to the underlying UCI engine binary
    pub engine_path: String,

    /// Number of principal variations requested from the engine
    pub multipv: u32,

    pub budget: SearchBudget,

    /// Directory holding `<name>.json` style profiles
    pub profile_dir: PathBuf,

    /// Directory for the rotating decision log
    pub log_dir: PathBuf,

    /// Decision records per log file before rotating
    pub log_max_lines: usize,

    /// External tagger command (pass-through tagging when unset)
    pub tagger_command: Option<String>,

    /// `move=tag` rules applied after selection
    pub forced_tags: Vec<(String, String)>,

    /// Scripted first move for startpos games
    pub opening_override: bool,

    /// Fixed RNG seed for reproducible forced errors
    pub seed: Option<u64>,
}

impl ImitatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ImitatorError> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            target_player = %config.target_player,
            engine_path = %config.engine_path,
            multipv = config.multipv,
            "Imitator config loaded"
        );
        Ok(config)
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ImitatorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let target_player = lookup("TARGET_PLAYER")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_PLAYER.to_string());

        let engine_path = lookup("CHESS_IMITATOR_STOCKFISH_PATH")
            .or_else(|| find_on_path("stockfish", lookup("PATH").as_deref()))
            .unwrap_or_else(|| DEFAULT_STOCKFISH_PATH.to_string());

        let multipv: u32 = parse_var(&lookup, "CHESS_IMITATOR_MULTIPV")?.unwrap_or(DEFAULT_MULTIPV);
        if multipv == 0 {
            return Err(ImitatorError::Config(
                "CHESS_IMITATOR_MULTIPV must be at least 1".into(),
            ));
        }

        let think_time: f64 =
            parse_var(&lookup, "CHESS_IMITATOR_THINK_TIME_S")?.unwrap_or(DEFAULT_THINK_TIME_S);
        if !(think_time.is_finite() && think_time > 0.0) {
            return Err(ImitatorError::Config(
                "CHESS_IMITATOR_THINK_TIME_S must be positive".into(),
            ));
        }
        let total = Duration::try_from_secs_f64(think_time).map_err(|e| {
            ImitatorError::Config(format!("CHESS_IMITATOR_THINK_TIME_S is out of range: {e}"))
        })?;

        let engine_fraction: f64 = parse_var(&lookup, "CHESS_IMITATOR_ENGINE_FRACTION")?
            .unwrap_or(DEFAULT_ENGINE_FRACTION);
        if !(engine_fraction > 0.0 && engine_fraction <= 1.0) {
            return Err(ImitatorError::Config(
                "CHESS_IMITATOR_ENGINE_FRACTION must be in (0, 1]".into(),
            ));
        }

        let profile_dir = lookup("CHESS_IMITATOR_PROFILE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("players"));

        let log_dir = lookup("CHESS_IMITATOR_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("style_logs"));

        let log_max_lines: usize =
            parse_var(&lookup, "CHESS_IMITATOR_LOG_MAX_LINES")?.unwrap_or(DEFAULT_LOG_MAX_LINES);
        if log_max_lines == 0 {
            return Err(ImitatorError::Config(
                "CHESS_IMITATOR_LOG_MAX_LINES must be at least 1".into(),
            ));
        }

        let tagger_command = lookup("CHESS_IMITATOR_TAGGER_CMD").filter(|v| !v.trim().is_empty());

        let forced_tags = match lookup("CHESS_IMITATOR_FORCED_TAGS") {
            Some(raw) => parse_forced_tags(&raw)?,
            None => Vec::new(),
        };

        let opening_override = match lookup("CHESS_IMITATOR_OPENING") {
            None => true,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "on" | "1" | "true" => true,
                "off" | "0" | "false" => false,
                _ => {
                    return Err(ImitatorError::Config(format!(
                        "CHESS_IMITATOR_OPENING must be on or off, got {v:?}"
                    )))
                }
            },
        };

        let seed = parse_var(&lookup, "CHESS_IMITATOR_SEED")?;

        Ok(Self {
            target_player,
            engine_path,
            multipv,
            budget: SearchBudget {
                total,
                engine_fraction,
            },
            profile_dir,
            log_dir,
            log_max_lines,
            tagger_command,
            forced_tags,
            opening_override,
            seed,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ImitatorError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ImitatorError::Config(format!("{key} has an invalid value: {raw:?}"))),
    }
}

/// Parse `g1f3=opening_script,d7d6=opening_script`.
fn parse_forced_tags(raw: &str) -> Result<Vec<(String, String)>, ImitatorError> {
    raw.split(',')
        .map(str::trim)
        .filter(|rule| !rule.is_empty())
        .map(|rule| match rule.split_once('=') {
            Some((mv, tag)) if !mv.trim().is_empty() && !tag.trim().is_empty() => {
                Ok((mv.trim().to_string(), tag.trim().to_string()))
            }
            _ => Err(ImitatorError::Config(format!(
                "CHESS_IMITATOR_FORCED_TAGS rule {rule:?} is not move=tag"
            ))),
        })
        .collect()
}

/// Locate an executable on a `PATH`-style search list.
fn find_on_path(binary: &str, path_var: Option<&str>) -> Option<String> {
    let path_var = path_var?;
    env::split_paths(path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_file(candidate))
        .map(|p| p.to_string_lossy().into_owned())
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ImitatorConfig, ImitatorError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ImitatorConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.target_player, "Kasparov");
        assert_eq!(config.engine_path, "/usr/local/bin/stockfish");
        assert_eq!(config.multipv, 10);
        assert_eq!(config.log_max_lines, 50);
        assert!(config.opening_override);
        assert!(config.tagger_command.is_none());
        assert_eq!(config.budget, SearchBudget::default());
    }

    #[test]
    fn test_budget_split() {
        let budget = SearchBudget::default();
        assert_eq!(budget.engine_slice(), Duration::from_secs(5));
        assert_eq!(budget.movetime_ms(), 5000);

        let tiny = SearchBudget {
            total: Duration::from_micros(100),
            engine_fraction: 0.2,
        };
        assert_eq!(tiny.movetime_ms(), 1);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("TARGET_PLAYER", "  Tal "),
            ("CHESS_IMITATOR_STOCKFISH_PATH", "/opt/sf"),
            ("CHESS_IMITATOR_MULTIPV", "4"),
            ("CHESS_IMITATOR_THINK_TIME_S", "10"),
            ("CHESS_IMITATOR_ENGINE_FRACTION", "0.5"),
            ("CHESS_IMITATOR_OPENING", "off"),
            ("CHESS_IMITATOR_SEED", "7"),
            ("CHESS_IMITATOR_FORCED_TAGS", "g1f3=scripted, d7d6=scripted"),
        ])
        .unwrap();
        assert_eq!(config.target_player, "Tal");
        assert_eq!(config.engine_path, "/opt/sf");
        assert_eq!(config.multipv, 4);
        assert_eq!(config.budget.movetime_ms(), 5000);
        assert!(!config.opening_override);
        assert_eq!(config.seed, Some(7));
        assert_eq!(
            config.forced_tags,
            vec![
                ("g1f3".to_string(), "scripted".to_string()),
                ("d7d6".to_string(), "scripted".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(config_from(&[("CHESS_IMITATOR_MULTIPV", "zero")]).is_err());
        assert!(config_from(&[("CHESS_IMITATOR_MULTIPV", "0")]).is_err());
        assert!(config_from(&[("CHESS_IMITATOR_ENGINE_FRACTION", "1.5")]).is_err());
        assert!(config_from(&[("CHESS_IMITATOR_THINK_TIME_S", "-3")]).is_err());
        assert!(matches!(
            config_from(&[("CHESS_IMITATOR_THINK_TIME_S", "1e30")]),
            Err(ImitatorError::Config(_))
        ));
        assert!(config_from(&[("CHESS_IMITATOR_FORCED_TAGS", "g1f3")]).is_err());
        assert!(config_from(&[("CHESS_IMITATOR_OPENING", "maybe")]).is_err());
    }
}
