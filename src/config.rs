use std::{collections::HashMap, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub metadata: MetadataSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSettings {
    /// Address of the federation metadata document holding the trusted
    /// signing keys. Must be provided via the settings file or environment.
    pub address: String,
    pub automatic_refresh_secs: u64,
    pub refresh_secs: u64,
    pub http_timeout_secs: u64,
}

impl MetadataSettings {
    pub fn automatic_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.automatic_refresh_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("metadata.address", "")?
            .set_default("metadata.automatic_refresh_secs", 43_200)?
            .set_default("metadata.refresh_secs", 300)?
            .set_default("metadata.http_timeout_secs", 30)?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format APP_METADATA__ADDRESS
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
