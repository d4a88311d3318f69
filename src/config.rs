use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub payment_plan_interval_secs: u64,
    pub db_max_connections: u32,
}

impl Config {
    /// Read configuration from the environment (`DATABASE_URL`, `BIND_ADDRESS`,
    /// `PAYMENT_PLAN_INTERVAL_SECS`, `DB_MAX_CONNECTIONS`).
    pub fn from_env() -> AppResult<Self> {
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    fn from_source<S>(source: S) -> AppResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Config = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/groupbank")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("payment_plan_interval_secs", 3600_i64)?
            .set_default("db_max_connections", 10_i64)?
            .add_source(source)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.payment_plan_interval_secs == 0 {
            return Err(AppError::Config(
                "PAYMENT_PLAN_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.db_max_connections == 0 {
            return Err(AppError::Config(
                "DB_MAX_CONNECTIONS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn payment_plan_interval(&self) -> Duration {
        Duration::from_secs(self.payment_plan_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(vars: &[(&str, &str)]) -> config::Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default()
            .try_parsing(true)
            .source(Some(vars))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_source(source(&[])).unwrap();

        assert_eq!(config.database_url, "postgresql://localhost/groupbank");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.payment_plan_interval(), Duration::from_secs(3600));
        assert_eq!(config.db_max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_source(source(&[
            ("DATABASE_URL", "postgresql://db/bank"),
            ("PAYMENT_PLAN_INTERVAL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgresql://db/bank");
        assert_eq!(config.payment_plan_interval_secs, 60);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = Config::from_source(source(&[("PAYMENT_PLAN_INTERVAL_SECS", "0")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
