use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{DeployError, Result};
use crate::ethereum::artifact::ArtifactSource;
use crate::ethereum::storage::{DataItem, SaveOverload};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const RPC_URL_ENV: &str = "DEPLOYER_RPC_URL";
pub const PRIVATE_KEY_ENV: &str = "DEPLOYER_PRIVATE_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub ethereum: EthereumConfig,
    pub build: BuildConfig,
    #[serde(default)]
    pub test: TestConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub chain_id: u64,
    pub gas_limit: u64,
    #[serde(default = "default_test_gas_limit")]
    pub test_gas_limit: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub directory: PathBuf,
    pub contract_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub test_key: String,
    #[serde(default)]
    pub test_field: String,
    #[serde(default)]
    pub test_value: String,
    #[serde(default)]
    pub overload: SaveOverload,
}

fn default_test_gas_limit() -> u64 {
    300_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_confirmation_timeout_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            private_key: String::new(),
            chain_id: 1337,
            gas_limit: 3_000_000,
            test_gas_limit: default_test_gas_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// The key must never reach the logs, so Debug is written by hand.
impl fmt::Debug for EthereumConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.private_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("EthereumConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &key)
            .field("chain_id", &self.chain_id)
            .field("gas_limit", &self.gas_limit)
            .field("test_gas_limit", &self.test_gas_limit)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("build"),
            contract_name: "DataStorage".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or TOML file, chosen by extension
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            DeployError::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(content).map_err(|e| {
                DeployError::Config(format!("failed to parse config file {:?}: {}", path, e))
            })
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                DeployError::Config(format!("failed to parse config file {:?}: {}", path, e))
            })
        }
    }

    /// Loads the given file, or the first default location that exists,
    /// then applies environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::locate_default()?,
        };
        tracing::info!("Loading configuration from {}", path.display());

        let mut config = Self::load_from_file(&path).await?;
        config.apply_env_vars();
        Ok(config)
    }

    fn locate_default() -> Result<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }
        let fallback = Self::default_config_path()?;
        if fallback.exists() {
            return Ok(fallback);
        }
        Err(DeployError::Config(format!(
            "no configuration found at ./{} or {}",
            DEFAULT_CONFIG_FILE,
            fallback.display()
        )))
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_vars(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(RPC_URL_ENV).filter(|v| !v.is_empty()) {
            tracing::info!("Using {} for the RPC endpoint", RPC_URL_ENV);
            self.ethereum.rpc_url = url;
        }
        if let Some(key) = lookup(PRIVATE_KEY_ENV).filter(|v| !v.is_empty()) {
            tracing::info!("Using {} for the deployer key", PRIVATE_KEY_ENV);
            self.ethereum.private_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let eth = &self.ethereum;
        let problem = if eth.rpc_url.trim().is_empty() {
            Some("ethereum.rpc_url is empty")
        } else if eth.private_key.trim().is_empty() {
            Some("ethereum.private_key is empty")
        } else if eth.chain_id == 0 {
            Some("ethereum.chain_id must be non-zero")
        } else if eth.gas_limit == 0 {
            Some("ethereum.gas_limit must be non-zero")
        } else if eth.test_gas_limit == 0 {
            Some("ethereum.test_gas_limit must be non-zero")
        } else if eth.poll_interval_ms == 0 {
            Some("ethereum.poll_interval_ms must be non-zero")
        } else if eth.confirmation_timeout_secs == 0 {
            Some("ethereum.confirmation_timeout_secs must be non-zero")
        } else if self.build.directory.as_os_str().is_empty() {
            Some("build.directory is empty")
        } else if self.build.contract_name.trim().is_empty() {
            Some("build.contract_name is empty")
        } else {
            None
        };

        match problem {
            Some(problem) => Err(DeployError::Config(problem.to_string())),
            None => Ok(()),
        }
    }

    pub fn artifact_source(&self) -> ArtifactSource {
        ArtifactSource::new(&self.build.directory, &self.build.contract_name)
    }

    /// The item and overload for the test phase, if it is enabled.
    pub fn test_item(&self) -> Option<(DataItem, SaveOverload)> {
        if !self.test.enable {
            return None;
        }
        let item = DataItem::new(
            &self.test.test_key,
            &self.test.test_field,
            &self.test.test_value,
        );
        Some((item, self.test.overload))
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            DeployError::Config("could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("contract-deployer").join(DEFAULT_CONFIG_FILE))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# Contract deployer configuration

ethereum:
  rpc_url: "http://127.0.0.1:8545"
  # Hex private key, 0x prefix optional. DEPLOYER_PRIVATE_KEY overrides it.
  private_key: "YOUR_PRIVATE_KEY_HERE"
  chain_id: 1337
  gas_limit: 3000000
  test_gas_limit: 300000
  poll_interval_ms: 1000
  confirmation_timeout_secs: 300
  request_timeout_secs: 30

build:
  # Output of `solc --bin --abi -o build contracts/DataStorage.sol`
  directory: "build"
  contract_name: "DataStorage"

test:
  enable: true
  test_key: "user1"
  test_field: "email"
  test_value: "user1@example.com"
  # fields = save(string,string,string), item = save((string,string,string))
  overload: fields

# Environment variables that can be used:
# DEPLOYER_RPC_URL - overrides ethereum.rpc_url
# DEPLOYER_PRIVATE_KEY - overrides ethereum.private_key
"#;
        sample_config.to_string()
    }
}
