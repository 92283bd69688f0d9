//! # Configuration Management Module
//!
//! Loads and parses the three plain-text configuration files the dispatcher
//! reads at startup:
//!
//! - `environment.txt` — `key=value` pairs: the message queue name, the grid
//!   dimensions and the scheduling knobs (per-priority timeouts, aging start
//!   and step).
//! - `rescuers.txt` — one rescuer type per line: `[name][count][speed][x;y]`.
//! - `emergency.txt` — one emergency type per line:
//!   `[name][priority] type:count,seconds; type:count,seconds; …`.
//!
//! Parsing is line oriented and forgiving the same way the rest of the
//! system is: unknown keys and malformed lines are logged and skipped, while
//! a missing required value is a hard [`ConfigError`] that aborts startup.
//! Cross-field checks (grid bounds, reference links, positive quantities)
//! live in [`crate::validation`] and run after loading.
//!
//! Files are read with `tokio::fs`; the line parsers themselves are pure
//! functions over `&str` so unit tests can exercise them without touching
//! the filesystem.

use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;

use crate::catalog::{Catalog, Cell, EmergencyType, Grid, RescuerRequest, RescuerType};

/// File names resolved against the configuration directory.
pub const ENVIRONMENT_FILE: &str = "environment.txt";
pub const RESCUERS_FILE: &str = "rescuers.txt";
pub const EMERGENCIES_FILE: &str = "emergency.txt";

/// Default scheduling knobs, in seconds: priority 0/1/2 timeouts, aging
/// start, aging step.
pub const DEFAULT_PRIORITY_TIMEOUTS: [u64; 3] = [180, 120, 60];
pub const DEFAULT_AGING_START: u64 = 90;
pub const DEFAULT_AGING_STEP: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{file} line {line}: {message}")]
    Malformed {
        file: &'static str,
        line: usize,
        message: String,
    },
    #[error("{file}: missing required key '{key}'")]
    MissingKey { file: &'static str, key: &'static str },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Contents of `environment.txt`.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentConfig {
    /// Message bus name; a leading `/` is prepended by the ingress layer
    /// when missing.
    pub queue: String,
    pub grid: Grid,
    /// Seconds a waiting emergency of priority 0/1/2 survives before the
    /// monitor times it out.
    pub priority_timeouts: [u64; 3],
    /// Waiting age (seconds) at which the aging bonus starts to accrue.
    pub aging_start: u64,
    /// Seconds per aging escalation step.
    pub aging_step: u64,
}

/// Fully loaded and parsed configuration: environment plus catalog.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub environment: EnvironmentConfig,
    pub catalog: Catalog,
}

impl Config {
    /// Load the three configuration files from `dir`.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let env_raw = read_file(&dir.join(ENVIRONMENT_FILE)).await?;
        let rescuers_raw = read_file(&dir.join(RESCUERS_FILE)).await?;
        let emergencies_raw = read_file(&dir.join(EMERGENCIES_FILE)).await?;
        Self::from_strs(&env_raw, &rescuers_raw, &emergencies_raw)
    }

    /// Parse already-read file contents. Used by [`Config::load`] and by
    /// tests that build configurations inline.
    pub fn from_strs(
        environment: &str,
        rescuers: &str,
        emergencies: &str,
    ) -> Result<Self, ConfigError> {
        let environment = parse_environment(environment)?;
        let rescuer_types = parse_rescuer_types(rescuers)?;
        let emergency_types = parse_emergency_types(emergencies, &rescuer_types)?;
        Ok(Config {
            catalog: Catalog {
                grid: environment.grid,
                rescuer_types,
                emergency_types,
            },
            environment,
        })
    }
}

async fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse `environment.txt` content. `queue`, `height` and `width` are
/// required; the scheduling knobs fall back to their defaults.
pub fn parse_environment(content: &str) -> Result<EnvironmentConfig, ConfigError> {
    let mut queue: Option<String> = None;
    let mut height: Option<Cell> = None;
    let mut width: Option<Cell> = None;
    let mut priority_timeouts = DEFAULT_PRIORITY_TIMEOUTS;
    let mut aging_start = DEFAULT_AGING_START;
    let mut aging_step = DEFAULT_AGING_STEP;

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(
                "{} line {}: no '=' in line, skipping",
                ENVIRONMENT_FILE,
                lineno + 1
            );
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "queue" => queue = Some(value.to_string()),
            "height" => height = Some(parse_number(ENVIRONMENT_FILE, lineno, key, value)?),
            "width" => width = Some(parse_number(ENVIRONMENT_FILE, lineno, key, value)?),
            "priority0_timeout" => {
                priority_timeouts[0] = parse_number(ENVIRONMENT_FILE, lineno, key, value)?
            }
            "priority1_timeout" => {
                priority_timeouts[1] = parse_number(ENVIRONMENT_FILE, lineno, key, value)?
            }
            "priority2_timeout" => {
                priority_timeouts[2] = parse_number(ENVIRONMENT_FILE, lineno, key, value)?
            }
            "aging_start" => aging_start = parse_number(ENVIRONMENT_FILE, lineno, key, value)?,
            "aging_step" => aging_step = parse_number(ENVIRONMENT_FILE, lineno, key, value)?,
            other => warn!(
                "{} line {}: unknown key '{}', ignoring",
                ENVIRONMENT_FILE,
                lineno + 1,
                other
            ),
        }
    }

    let queue = queue.ok_or(ConfigError::MissingKey {
        file: ENVIRONMENT_FILE,
        key: "queue",
    })?;
    let height = height.ok_or(ConfigError::MissingKey {
        file: ENVIRONMENT_FILE,
        key: "height",
    })?;
    let width = width.ok_or(ConfigError::MissingKey {
        file: ENVIRONMENT_FILE,
        key: "width",
    })?;

    Ok(EnvironmentConfig {
        queue,
        grid: Grid { width, height },
        priority_timeouts,
        aging_start,
        aging_step,
    })
}

fn parse_number<T: std::str::FromStr>(
    file: &'static str,
    lineno: usize,
    key: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Malformed {
        file,
        line: lineno + 1,
        message: format!("value '{}' for key '{}' is not a valid number", value, key),
    })
}

/// Parse `rescuers.txt` content: one `[name][count][speed][x;y]` per line.
pub fn parse_rescuer_types(content: &str) -> Result<Vec<RescuerType>, ConfigError> {
    let mut types: Vec<RescuerType> = Vec::new();

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (fields, rest) = bracket_fields(line);
        if fields.len() != 4 || !rest.trim().is_empty() {
            return Err(ConfigError::Malformed {
                file: RESCUERS_FILE,
                line: lineno + 1,
                message: "expected [name][count][speed][x;y]".to_string(),
            });
        }
        let name = fields[0].trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::Malformed {
                file: RESCUERS_FILE,
                line: lineno + 1,
                message: "rescuer type name is empty".to_string(),
            });
        }
        if types.iter().any(|t| t.name == name) {
            return Err(ConfigError::Malformed {
                file: RESCUERS_FILE,
                line: lineno + 1,
                message: format!("duplicate rescuer type '{}'", name),
            });
        }
        let instance_count = parse_number(RESCUERS_FILE, lineno, "count", fields[1].trim())?;
        let speed = parse_number(RESCUERS_FILE, lineno, "speed", fields[2].trim())?;
        let Some((x, y)) = fields[3].split_once(';') else {
            return Err(ConfigError::Malformed {
                file: RESCUERS_FILE,
                line: lineno + 1,
                message: "base position must be 'x;y'".to_string(),
            });
        };
        let base_x = parse_number(RESCUERS_FILE, lineno, "x", x.trim())?;
        let base_y = parse_number(RESCUERS_FILE, lineno, "y", y.trim())?;

        types.push(RescuerType {
            name,
            base_x,
            base_y,
            speed,
            instance_count,
        });
    }

    Ok(types)
}

/// Parse `emergency.txt` content:
/// `[name][priority] type:count,seconds; type:count,seconds; …`.
/// Every referenced rescuer type must already exist.
pub fn parse_emergency_types(
    content: &str,
    rescuer_types: &[RescuerType],
) -> Result<Vec<EmergencyType>, ConfigError> {
    let mut types: Vec<EmergencyType> = Vec::new();

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (fields, rest) = bracket_fields(line);
        if fields.len() != 2 {
            return Err(ConfigError::Malformed {
                file: EMERGENCIES_FILE,
                line: lineno + 1,
                message: "expected [name][priority] followed by requirements".to_string(),
            });
        }
        let name = fields[0].trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::Malformed {
                file: EMERGENCIES_FILE,
                line: lineno + 1,
                message: "emergency type name is empty".to_string(),
            });
        }
        if types.iter().any(|t| t.name == name) {
            return Err(ConfigError::Malformed {
                file: EMERGENCIES_FILE,
                line: lineno + 1,
                message: format!("duplicate emergency type '{}'", name),
            });
        }
        let priority: u8 = parse_number(EMERGENCIES_FILE, lineno, "priority", fields[1].trim())?;

        let mut requests = Vec::new();
        for entry in rest.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((type_name, counts)) = entry.split_once(':') else {
                return Err(ConfigError::Malformed {
                    file: EMERGENCIES_FILE,
                    line: lineno + 1,
                    message: format!("requirement '{}' must be 'type:count,seconds'", entry),
                });
            };
            let Some((count, seconds)) = counts.split_once(',') else {
                return Err(ConfigError::Malformed {
                    file: EMERGENCIES_FILE,
                    line: lineno + 1,
                    message: format!("requirement '{}' must be 'type:count,seconds'", entry),
                });
            };
            let type_name = type_name.trim();
            let Some(rescuer_type) = rescuer_types.iter().position(|t| t.name == type_name)
            else {
                return Err(ConfigError::Malformed {
                    file: EMERGENCIES_FILE,
                    line: lineno + 1,
                    message: format!("unknown rescuer type '{}'", type_name),
                });
            };
            requests.push(RescuerRequest {
                rescuer_type,
                required_count: parse_number(EMERGENCIES_FILE, lineno, "count", count.trim())?,
                service_seconds: parse_number(EMERGENCIES_FILE, lineno, "seconds", seconds.trim())?,
            });
        }

        if requests.is_empty() {
            return Err(ConfigError::Malformed {
                file: EMERGENCIES_FILE,
                line: lineno + 1,
                message: format!("emergency type '{}' has no rescuer requirements", name),
            });
        }

        types.push(EmergencyType {
            name,
            priority,
            requests,
        });
    }

    Ok(types)
}

/// Split leading `[..]` groups off a line. Returns the bracketed field
/// contents and whatever follows the last group.
fn bracket_fields(line: &str) -> (Vec<&str>, &str) {
    let mut fields = Vec::new();
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start();
        if !trimmed.starts_with('[') {
            return (fields, rest);
        }
        let Some(close) = trimmed.find(']') else {
            return (fields, rest);
        };
        fields.push(&trimmed[1..close]);
        rest = &trimmed[close + 1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_with_all_keys() {
        let content = "queue=emergencies\nheight=20\nwidth=30\n\
                       priority0_timeout=100\npriority1_timeout=50\npriority2_timeout=25\n\
                       aging_start=10\naging_step=5\n";
        let env = parse_environment(content).expect("parse");
        assert_eq!(env.queue, "emergencies");
        assert_eq!(env.grid, Grid { width: 30, height: 20 });
        assert_eq!(env.priority_timeouts, [100, 50, 25]);
        assert_eq!(env.aging_start, 10);
        assert_eq!(env.aging_step, 5);
    }

    #[test]
    fn environment_applies_scheduling_defaults() {
        let env = parse_environment("queue=q\nheight=5\nwidth=5\n").expect("parse");
        assert_eq!(env.priority_timeouts, DEFAULT_PRIORITY_TIMEOUTS);
        assert_eq!(env.aging_start, DEFAULT_AGING_START);
        assert_eq!(env.aging_step, DEFAULT_AGING_STEP);
    }

    #[test]
    fn environment_requires_queue_and_grid() {
        assert!(matches!(
            parse_environment("height=5\nwidth=5\n"),
            Err(ConfigError::MissingKey { key: "queue", .. })
        ));
        assert!(matches!(
            parse_environment("queue=q\nwidth=5\n"),
            Err(ConfigError::MissingKey { key: "height", .. })
        ));
    }

    #[test]
    fn environment_skips_unknown_keys_and_junk_lines() {
        let env = parse_environment("queue=q\nheight=5\nwidth=5\ncolor=blue\nnot a pair\n")
            .expect("parse");
        assert_eq!(env.queue, "q");
    }

    #[test]
    fn rescuer_line_parses() {
        let types = parse_rescuer_types("[AMB][2][3][4;5]\n[FIRE_TRUCK][1][1][0;0]\n")
            .expect("parse");
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].name, "AMB");
        assert_eq!(types[0].instance_count, 2);
        assert_eq!(types[0].speed, 3);
        assert_eq!((types[0].base_x, types[0].base_y), (4, 5));
    }

    #[test]
    fn rescuer_line_rejects_bad_shape() {
        assert!(parse_rescuer_types("[AMB][2][3]\n").is_err());
        assert!(parse_rescuer_types("[AMB][2][3][4]\n").is_err());
        assert!(parse_rescuer_types("[AMB][two][3][4;5]\n").is_err());
        assert!(parse_rescuer_types("[AMB][1][1][0;0]\n[AMB][1][1][0;0]\n").is_err());
    }

    #[test]
    fn emergency_line_parses_multiple_requirements() {
        let rescuers = parse_rescuer_types("[AMB][2][3][0;0]\n[FIRE][1][2][1;1]\n").expect("r");
        let types =
            parse_emergency_types("[BLAZE][2] FIRE:1,10; AMB:2,5\n", &rescuers).expect("parse");
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].priority, 2);
        assert_eq!(types[0].requests.len(), 2);
        assert_eq!(types[0].requests[0].rescuer_type, 1);
        assert_eq!(types[0].requests[0].required_count, 1);
        assert_eq!(types[0].requests[0].service_seconds, 10);
        assert_eq!(types[0].requests[1].rescuer_type, 0);
        assert_eq!(types[0].total_required(), 3);
    }

    #[test]
    fn emergency_line_rejects_unknown_rescuer_and_empty_requirements() {
        let rescuers = parse_rescuer_types("[AMB][2][3][0;0]\n").expect("r");
        assert!(parse_emergency_types("[BLAZE][2] HELI:1,10\n", &rescuers).is_err());
        assert!(parse_emergency_types("[BLAZE][2]\n", &rescuers).is_err());
    }

    #[test]
    fn full_config_from_strs() {
        let config = Config::from_strs(
            "queue=q\nheight=10\nwidth=10\n",
            "[AMB][1][2][0;0]\n",
            "[FIRE][1] AMB:1,3\n",
        )
        .expect("config");
        assert_eq!(config.catalog.total_rescuers(), 1);
        assert_eq!(config.catalog.emergency_types[0].service_seconds(), 3);
    }
}
