use alloy::{json_abi::JsonAbi, primitives::Bytes};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{DeployError, Result};
use crate::ethereum::utils;

/// Compiled contract as produced by `solc --bin --abi`.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub bytecode: Bytes,
    pub abi: JsonAbi,
}

/// Locates the `<name>.bin` / `<name>.abi` pair inside a build directory.
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub directory: PathBuf,
    pub contract_name: String,
}

impl ArtifactSource {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(directory: P, contract_name: S) -> Self {
        Self {
            directory: directory.into(),
            contract_name: contract_name.into(),
        }
    }

    pub fn bytecode_path(&self) -> PathBuf {
        self.directory.join(format!("{}.bin", self.contract_name))
    }

    pub fn abi_path(&self) -> PathBuf {
        self.directory.join(format!("{}.abi", self.contract_name))
    }

    /// Reads and validates both files.
    pub async fn load(&self) -> Result<ContractArtifact> {
        let bytecode_path = self.bytecode_path();
        let bytecode_text = read_artifact_file(&bytecode_path).await?;
        let bytecode = parse_bytecode(&bytecode_path, &bytecode_text)?;
        info!(path = %bytecode_path.display(), bytes = bytecode.len(), "Loaded bytecode");

        let abi_path = self.abi_path();
        let abi_text = read_artifact_file(&abi_path).await?;
        let abi = parse_abi(&abi_path, &abi_text)?;
        info!(
            path = %abi_path.display(),
            functions = abi.functions().count(),
            events = abi.events().count(),
            "Loaded ABI"
        );

        Ok(ContractArtifact {
            name: self.contract_name.clone(),
            bytecode,
            abi,
        })
    }
}

async fn read_artifact_file(path: &Path) -> Result<String> {
    debug!("Reading artifact file {:?}", path);
    fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            DeployError::ArtifactNotFound {
                path: path.to_path_buf(),
            }
        } else {
            DeployError::ArtifactInvalid {
                path: path.to_path_buf(),
                reason: format!("unreadable: {}", e),
            }
        }
    })
}

pub fn parse_bytecode(path: &Path, text: &str) -> Result<Bytes> {
    let bytes = utils::decode_hex_blob(text).map_err(|reason| DeployError::ArtifactInvalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(bytes.into())
}

pub fn parse_abi(path: &Path, text: &str) -> Result<JsonAbi> {
    serde_json::from_str(text.trim()).map_err(|e| DeployError::ArtifactInvalid {
        path: path.to_path_buf(),
        reason: format!("failed to parse ABI JSON: {}", e),
    })
}
