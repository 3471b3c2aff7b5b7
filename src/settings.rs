use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://interests-api.parliament.uk/api/v1/Interests";

/// Environment-driven settings, `PARLIAMENT_` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_url: String,
    pub db_path: PathBuf,
    pub fallback_dir: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub supabase_table: String,
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_source(config::Environment::with_prefix("PARLIAMENT"))
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .set_default("api_url", DEFAULT_API_URL)?
            .set_default("db_path", "data/parliament.sqlite")?
            .set_default("fallback_dir", "data")?
            .set_default("supabase_table", "parliament_interests")?
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
