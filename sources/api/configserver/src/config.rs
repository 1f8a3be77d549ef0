//! Service configuration, read from a TOML file with the following shape:
//!
//! `datastore-path`: directory holding the filesystem resource store
//! `log-level`: optional trace|debug|info|warn|error; command-line flags take precedence
//! `read-only-sections`: config section names that can be read but not written or deleted

use serde::Deserialize;
use snafu::ResultExt;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Where configctl looks for its configuration unless told otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/configsvc.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServiceConfig {
    pub datastore_path: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub read_only_sections: BTreeSet<String>,
}

impl ServiceConfig {
    /// A configuration with defaults for everything but the store location.
    pub fn with_datastore_path<P: Into<PathBuf>>(datastore_path: P) -> Self {
        Self {
            datastore_path: datastore_path.into(),
            log_level: None,
            read_only_sections: BTreeSet::new(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).context(error::ConfigReadSnafu { path })?;
        Self::from_toml(&s).context(error::ConfigParseSnafu { path })
    }

    pub fn from_toml(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

pub mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Failed to read config file '{}': {}", path.display(), source))]
        ConfigRead { path: PathBuf, source: io::Error },

        #[snafu(display("Failed to parse config file '{}': {}", path.display(), source))]
        ConfigParse {
            path: PathBuf,
            source: toml::de::Error,
        },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreeset;
    use std::io::Write;

    #[test]
    fn full_config() {
        let config = ServiceConfig::from_toml(
            r#"
            datastore-path = "/var/lib/configsvc"
            log-level = "debug"
            read-only-sections = ["cluster", "props"]
            "#,
        )
        .unwrap();
        assert_eq!(config.datastore_path, PathBuf::from("/var/lib/configsvc"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(
            config.read_only_sections,
            btreeset!("cluster".to_string(), "props".to_string())
        );
    }

    #[test]
    fn minimal_config() {
        let config = ServiceConfig::from_toml("datastore-path = \"/tmp/x\"").unwrap();
        assert_eq!(config, ServiceConfig::with_datastore_path("/tmp/x"));
    }

    #[test]
    fn bad_configs() {
        ServiceConfig::from_toml("").unwrap_err();
        ServiceConfig::from_toml("datastore-path = 5").unwrap_err();
        ServiceConfig::from_toml("datastore-path = \"/x\"\nthreads = 4").unwrap_err();
    }

    #[test]
    fn from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "datastore-path = \"/tmp/store\"").unwrap();
        let config = ServiceConfig::from_path(file.path()).unwrap();
        assert_eq!(config.datastore_path, PathBuf::from("/tmp/store"));

        assert!(matches!(
            ServiceConfig::from_path("/nonexistent/configsvc.toml"),
            Err(Error::ConfigRead { .. })
        ));
    }
}
