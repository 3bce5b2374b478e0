//! TOML configuration: the ODBC connection template consumed by the external
//! executor, and the batch compilation matrix.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub odbc: OdbcConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize)]
pub struct OdbcConfig {
    pub connect_template: String,
    /// The section's remaining keys, substituted into the template.
    #[serde(flatten)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchConfig {
    /// Rule names, resolved to `<name>.linn` in the rules directory.
    pub dgas: Vec<String>,
    /// Days (`YYYY-MM-DD`) times hours (`HH:MM:SS`) form the `t0` matrix.
    pub days: Vec<String>,
    pub hours: Vec<String>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }
}

impl OdbcConfig {
    /// Expand `${key}` occurrences in the template from the section's own
    /// keys. Unknown placeholders are left untouched.
    pub fn connection_string(&self) -> String {
        let mut out = self.connect_template.clone();
        for (key, value) in &self.params {
            out = out.replace(&format!("${{{key}}}"), value);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = r#"
[odbc]
connect_template = "DRIVER=${driver};HOST=${host};UID=${uid};PWD=${pwd}"
driver = "Vertica"
host = "analytics.example"
uid = "linnea"
pwd = "hunter2"

[batch]
dgas = ["bedep", "conficker_ab"]
days = ["2015-08-03"]
hours = ["00:00:00", "12:00:00"]
"#;

    #[test]
    fn test_parse_config() -> Result<()> {
        let config: Config = toml::from_str(CONFIG)?;
        assert_eq!(config.batch.dgas, vec!["bedep", "conficker_ab"]);
        assert_eq!(config.batch.days, vec!["2015-08-03"]);
        assert_eq!(config.batch.hours.len(), 2);
        Ok(())
    }

    #[test]
    fn test_connection_string_substitution() -> Result<()> {
        let config: Config = toml::from_str(CONFIG)?;
        assert_eq!(
            config.odbc.connection_string(),
            "DRIVER=Vertica;HOST=analytics.example;UID=linnea;PWD=hunter2"
        );
        Ok(())
    }

    #[test]
    fn test_unknown_placeholders_stay() -> Result<()> {
        let config: Config = toml::from_str(
            "[odbc]\nconnect_template = \"DSN=${dsn}\"\n\n[batch]\ndgas = []\ndays = []\nhours = []\n",
        )?;
        assert_eq!(config.odbc.connection_string(), "DSN=${dsn}");
        Ok(())
    }
}
