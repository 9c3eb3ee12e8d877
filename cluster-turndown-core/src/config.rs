use std::{fs::File, path::PathBuf};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to read configuration file at {config_file:?}"))]
    ReadConfigFile {
        source: std::io::Error,
        config_file: PathBuf,
    },

    #[snafu(display("Failed to parse configuration file at {config_file:?}"))]
    ParseConfigFile {
        source: serde_yaml::Error,
        config_file: PathBuf,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub schedule_store: ScheduleStoreConfig,

    #[serde(default)]
    pub ports: PortsConfig,
}

/// Which cloud backend to use, or `auto` to run the startup detection in spec §4.1.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum ProviderConfig {
    #[default]
    Auto,
    Gke(GkeProviderConfig),
    Eks(AwsProviderConfig),
    AwsSelfManaged(AwsProviderConfig),
    Azure,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct GkeProviderConfig {
    /// Overrides the value otherwise discovered from the GCE instance metadata service.
    pub project_id: Option<String>,
    pub zone: Option<String>,
    pub cluster_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AwsProviderConfig {
    pub region: Option<String>,
    /// Needed only by the EKS backend to provision the turndown node group; the self-managed
    /// backend never creates a new auto scaling group, it splits the controller's own.
    pub nodegroup_role_arn: Option<String>,
    #[serde(default)]
    pub nodegroup_subnet_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum ScheduleStoreConfig {
    #[default]
    Kube,
    InMemory,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PortsConfig {
    #[serde(default = "PortsConfig::default_http_port")]
    pub http: u16,

    #[serde(default = "PortsConfig::default_metrics_port")]
    pub metrics: u16,
}

impl PortsConfig {
    /// The HTTP front for `POST /schedule` and `POST /cancel`.
    fn default_http_port() -> u16 {
        9731
    }

    fn default_metrics_port() -> u16 {
        9090
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            http: Self::default_http_port(),
            metrics: Self::default_metrics_port(),
        }
    }
}

impl Config {
    /// Using [`std::fs::File`] over `tokio::fs::File`, as [`serde_yaml`] does not support async
    /// reading yet. Doesn't matter, we only read the config once during startup.
    pub async fn read_from_file(config_file: &PathBuf) -> Result<Self, Error> {
        let config_file_content =
            File::open(config_file).context(ReadConfigFileSnafu { config_file })?;

        let deserializer = serde_yaml::Deserializer::from_reader(config_file_content);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer)
            .context(ParseConfigFileSnafu { config_file })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let yaml = indoc! {"
            provider: auto
        "};
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ports.http, 9731);
        assert_eq!(config.ports.metrics, 9090);
        assert!(matches!(config.schedule_store, ScheduleStoreConfig::Kube));
    }
}
