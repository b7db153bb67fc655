use crate::model::ImportSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Pipeline policy knobs. Sourced once at process start and handed to each
/// service at construction; nothing reads configuration at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Require human review of fresh imports even when validation passes.
    pub enable_maker_checker_import: bool,
    /// Same, for update uploads.
    pub enable_maker_checker_update: bool,
    /// Reserved column that switches grouping to explicit group-code mode.
    pub group_code_column: String,
    /// Column whose value `1` marks the household head during grouping.
    pub recipient_info_column: String,
    /// Declarative import schema as JSON; the built-in default is used when
    /// absent.
    pub schema_json: Option<String>,
    /// Await the workflow inline instead of dispatching it to a background
    /// task. Used by tests and one-shot tooling.
    pub inline_workflows: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            enable_maker_checker_import: false,
            enable_maker_checker_update: false,
            group_code_column: "group_code".to_string(),
            recipient_info_column: "recipient_info".to_string(),
            schema_json: None,
            inline_workflows: false,
        }
    }
}

const DEFAULT_SCHEMA: &str = r#"{
    "properties": {
        "email": {"type": "string", "uniqueness": "unique_value"},
        "national_id": {"type": "string", "validationCalculation": "not_empty", "uniqueness": "unique_value"},
        "phone": {"type": "string"},
        "location": {"type": "string"},
        "group_code": {"type": "string"},
        "recipient_info": {"type": "integer"}
    }
}"#;

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `REGISTRY_`-prefixed environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);
        config = config.add_source(config::File::with_name("config").required(false));
        config = config.add_source(
            config::Environment::with_prefix("REGISTRY")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ImportConfig {
    pub fn schema(&self) -> anyhow::Result<ImportSchema> {
        let raw = self.schema_json.as_deref().unwrap_or(DEFAULT_SCHEMA);
        ImportSchema::from_json(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_parses() {
        let schema = ImportConfig::default().schema().unwrap();
        assert!(schema.properties.contains_key("group_code"));
        assert_eq!(
            schema.properties["national_id"].uniqueness.as_deref(),
            Some("unique_value")
        );
    }
}
