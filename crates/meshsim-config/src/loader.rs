//! Configuration loader with multi-source merging

use crate::{MeshsimConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "MESHSIM".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "MESHSIM")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/meshsim/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<MeshsimConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = MeshsimConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/meshsim/config.toml)
        if self.user_config
            && let Ok(user_config_file) = Paths::new().user_config_file()
            && user_config_file.exists()
        {
            builder = builder.add_source(
                config::File::from(user_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Project config (meshsim.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (meshsim.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables, e.g. MESHSIM_DISCOVERY__POLL_INTERVAL=2s
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut meshsim_config: MeshsimConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        meshsim_config.resolve_paths(&self.project_dir);
        meshsim_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(meshsim_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> MeshsimConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config.topology.regions, 1);
        assert_eq!(config.topology.zone_names.len(), 3);
        assert_eq!(config.discovery.poll_interval, "1s");
        assert_eq!(config.architecture.name, "netflixoss");
        assert!(config.simulation.seed.is_none());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[simulation]
duration = "30s"
seed = 42
victim = "karyon"

[topology]
regions = 2

[discovery]
poll_interval = "500ms"
"#;
        fs::write(project_dir.join("meshsim.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.simulation.duration, "30s");
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.simulation.victim.as_deref(), Some("karyon"));
        assert_eq!(config.topology.regions, 2);
        assert_eq!(config.discovery.poll_interval, "500ms");
        // Untouched sections keep their defaults
        assert_eq!(config.activity.chat_rate, "10ms");
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("meshsim.toml"),
            "[activity]\nchat_rate = \"100ms\"\n",
        )
        .expect("Failed to write project config");
        fs::write(
            project_dir.join("meshsim.local.toml"),
            "[activity]\nchat_rate = \"1s\"\n",
        )
        .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.activity.chat_rate, "1s");
    }

    #[test]
    fn test_project_architecture_replaces_default() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[architecture]
name = "tiny"

[[architecture.services]]
name = "mysql"
package = "store"
regions = 1
count = 1

[[architecture.services]]
name = "www"
package = "denominator"
regions = 0
count = 0
dependencies = ["mysql"]
"#;
        fs::write(project_dir.join("meshsim.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.architecture.name, "tiny");
        assert_eq!(config.architecture.services.len(), 2);
        assert_eq!(config.arch_name(), "tiny");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("meshsim.toml"),
            "[discovery]\npoll_interval = \"soon\"\n",
        )
        .expect("Failed to write config");

        assert!(loader(project_dir).load().is_err());
    }

    #[test]
    fn test_flow_file_is_resolved() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("meshsim.toml"),
            "[output]\nflow_file = \"out/flow.json\"\n",
        )
        .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");
        let flow_file = config.output.flow_file.expect("flow file set");
        assert!(flow_file.is_absolute() || flow_file.starts_with(project_dir));
        assert!(flow_file.ends_with("out/flow.json"));
    }
}
