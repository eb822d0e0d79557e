use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - caps are non-zero and the active cap fits the listing cap
/// - all intervals are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mining = &config.mining;

    if mining.max_torrents_active == 0 {
        return Err(ConfigError::ValidationError(
            "mining.max_torrents_active cannot be 0".to_string(),
        ));
    }
    if mining.max_torrents_listed < mining.max_torrents_active {
        return Err(ConfigError::ValidationError(
            "mining.max_torrents_listed cannot be below mining.max_torrents_active".to_string(),
        ));
    }
    if mining.select_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "mining.select_interval_secs cannot be 0".to_string(),
        ));
    }
    if mining.disk_check_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "mining.disk_check_interval_secs cannot be 0".to_string(),
        ));
    }
    if mining.source_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "mining.source_interval_secs cannot be 0".to_string(),
        ));
    }

    Ok(())
}
