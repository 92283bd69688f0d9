//! Cross-field configuration checks, run once after loading and before any
//! worker thread starts. A failure here is fatal: the process must not come
//! up with a catalog it cannot dispatch against.

use crate::catalog::PRIORITY_LEVELS;
use crate::config::{Config, ConfigError};

/// Validate a loaded configuration.
///
/// Checks, in order:
/// - the message queue name is non-empty
/// - the grid has positive dimensions
/// - every rescuer base position lies inside the grid
/// - rescuer counts and speeds are at least 1
/// - every emergency priority is within `0..PRIORITY_LEVELS`
/// - every requirement asks for at least one rescuer and one service second
/// - scheduling knobs are positive
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let env = &config.environment;
    let catalog = &config.catalog;

    if env.queue.trim().is_empty() {
        return Err(ConfigError::Invalid("queue name is empty".to_string()));
    }
    if env.grid.width <= 0 || env.grid.height <= 0 {
        return Err(ConfigError::Invalid(format!(
            "grid dimensions must be positive, got {}x{}",
            env.grid.width, env.grid.height
        )));
    }

    for ty in &catalog.rescuer_types {
        if !env.grid.contains(ty.base_x, ty.base_y) {
            return Err(ConfigError::Invalid(format!(
                "rescuer type '{}' base ({},{}) is outside the {}x{} grid",
                ty.name, ty.base_x, ty.base_y, env.grid.width, env.grid.height
            )));
        }
        if ty.instance_count < 1 {
            return Err(ConfigError::Invalid(format!(
                "rescuer type '{}' must have at least one instance",
                ty.name
            )));
        }
        if ty.speed < 1 {
            return Err(ConfigError::Invalid(format!(
                "rescuer type '{}' must have speed >= 1",
                ty.name
            )));
        }
    }

    for ty in &catalog.emergency_types {
        if usize::from(ty.priority) >= PRIORITY_LEVELS {
            return Err(ConfigError::Invalid(format!(
                "emergency type '{}' has priority {} (allowed 0..={})",
                ty.name,
                ty.priority,
                PRIORITY_LEVELS - 1
            )));
        }
        if ty.requests.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "emergency type '{}' has no rescuer requirements",
                ty.name
            )));
        }
        for req in &ty.requests {
            if req.rescuer_type >= catalog.rescuer_types.len() {
                return Err(ConfigError::Invalid(format!(
                    "emergency type '{}' references an unknown rescuer type",
                    ty.name
                )));
            }
            if req.required_count < 1 {
                return Err(ConfigError::Invalid(format!(
                    "emergency type '{}' has a requirement with count 0",
                    ty.name
                )));
            }
            if req.service_seconds < 1 {
                return Err(ConfigError::Invalid(format!(
                    "emergency type '{}' has a requirement with zero service time",
                    ty.name
                )));
            }
        }
    }

    if env.priority_timeouts.iter().any(|&t| t == 0) {
        return Err(ConfigError::Invalid(
            "priority timeouts must be positive".to_string(),
        ));
    }
    if env.aging_step == 0 {
        return Err(ConfigError::Invalid(
            "aging_step must be positive".to_string(),
        ));
    }

    Ok(())
}
