//! Deployment resolver
//!
//! Maps a chain id to the bridge contract deployed on it. Consumed once per
//! chain at startup; any failure is fatal.

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Bridge contract location on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    /// Block the contract was created in, when known
    pub deploy_block: Option<u64>,
}

/// Chain id → deployment lookup
pub trait DeploymentResolver: Send + Sync {
    fn resolve(&self, chain_id: u64) -> Result<Deployment>;
}

/// Addresses supplied directly through configuration
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    deployments: HashMap<u64, Deployment>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, chain_id: u64, address: Address) -> Self {
        self.deployments.insert(
            chain_id,
            Deployment {
                address,
                deploy_block: None,
            },
        );
        self
    }
}

impl DeploymentResolver for StaticResolver {
    fn resolve(&self, chain_id: u64) -> Result<Deployment> {
        self.deployments
            .get(&chain_id)
            .copied()
            .ok_or_else(|| eyre!("No bridge address configured for chain {}", chain_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastFile {
    #[serde(default)]
    transactions: Vec<BroadcastTransaction>,
    #[serde(default)]
    receipts: Vec<BroadcastReceipt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastTransaction {
    hash: Option<String>,
    transaction_type: Option<String>,
    contract_name: Option<String>,
    contract_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastReceipt {
    transaction_hash: Option<String>,
    block_number: Option<String>,
}

/// Reads Foundry broadcast artifacts:
/// `<root>/broadcast/<script>/<chainId>/run-latest.json`
#[derive(Debug, Clone)]
pub struct BroadcastResolver {
    root: PathBuf,
    script: String,
}

impl BroadcastResolver {
    pub fn new(root: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            script: script.into(),
        }
    }

    pub fn artifact_path(&self, chain_id: u64) -> PathBuf {
        self.root
            .join("broadcast")
            .join(&self.script)
            .join(chain_id.to_string())
            .join("run-latest.json")
    }

    fn parse(path: &Path, raw: &str) -> Result<Deployment> {
        let file: BroadcastFile = serde_json::from_str(raw)
            .wrap_err_with(|| format!("Invalid broadcast file {}", path.display()))?;

        let tx = file
            .transactions
            .iter()
            .find(|t| t.transaction_type.as_deref() == Some("CREATE"))
            .ok_or_else(|| eyre!("No CREATE transaction in broadcast file {}", path.display()))?;

        let address: Address = tx
            .contract_address
            .as_deref()
            .ok_or_else(|| eyre!("CREATE transaction has no contractAddress"))?
            .parse()
            .wrap_err("Invalid contractAddress in broadcast file")?;

        let deploy_block = match &tx.hash {
            Some(hash) => file
                .receipts
                .iter()
                .find(|r| {
                    r.transaction_hash
                        .as_deref()
                        .is_some_and(|h| h.eq_ignore_ascii_case(hash))
                })
                .and_then(|r| r.block_number.as_deref())
                .map(parse_quantity)
                .transpose()?,
            None => None,
        };

        info!(
            contract = tx.contract_name.as_deref().unwrap_or("unknown"),
            address = %address,
            deploy_block = ?deploy_block,
            "Resolved deployment from broadcast file"
        );

        Ok(Deployment {
            address,
            deploy_block,
        })
    }
}

impl DeploymentResolver for BroadcastResolver {
    fn resolve(&self, chain_id: u64) -> Result<Deployment> {
        let path = self.artifact_path(chain_id);
        let raw = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read broadcast file {}", path.display()))?;
        Self::parse(&path, &raw)
    }
}

/// Parse a JSON-RPC quantity (`0x`-prefixed hex, or plain decimal)
fn parse_quantity(raw: &str) -> Result<u64> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .wrap_err_with(|| format!("Invalid block number '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BROADCAST: &str = r#"{
        "transactions": [
            {
                "hash": "0x4f1c",
                "transactionType": "CALL",
                "contractName": null,
                "contractAddress": "0x1111111111111111111111111111111111111111"
            },
            {
                "hash": "0xABCD",
                "transactionType": "CREATE",
                "contractName": "Bridge",
                "contractAddress": "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            }
        ],
        "receipts": [
            { "transactionHash": "0x4f1c", "blockNumber": "0x1" },
            { "transactionHash": "0xabcd", "blockNumber": "0x3e8" }
        ],
        "chain": 1
    }"#;

    fn write_broadcast(dir: &TempDir, chain_id: u64, body: &str) {
        let path = dir
            .path()
            .join("broadcast/DeployBridge.s.sol")
            .join(chain_id.to_string());
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("run-latest.json"), body).unwrap();
    }

    #[test]
    fn test_broadcast_resolver_reads_create() {
        let dir = TempDir::new().unwrap();
        write_broadcast(&dir, 1, BROADCAST);

        let resolver = BroadcastResolver::new(dir.path(), "DeployBridge.s.sol");
        let deployment = resolver.resolve(1).unwrap();
        assert_eq!(
            deployment.address,
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                .parse::<Address>()
                .unwrap()
        );
        assert_eq!(deployment.deploy_block, Some(1000));
    }

    #[test]
    fn test_broadcast_resolver_missing_file() {
        let dir = TempDir::new().unwrap();
        let resolver = BroadcastResolver::new(dir.path(), "DeployBridge.s.sol");
        assert!(resolver.resolve(137).is_err());
    }

    #[test]
    fn test_broadcast_resolver_without_create() {
        let dir = TempDir::new().unwrap();
        write_broadcast(
            &dir,
            137,
            r#"{"transactions":[{"hash":"0x1","transactionType":"CALL"}],"receipts":[]}"#,
        );
        let resolver = BroadcastResolver::new(dir.path(), "DeployBridge.s.sol");
        let err = resolver.resolve(137).unwrap_err();
        assert!(err.to_string().contains("No CREATE transaction"));
    }

    #[test]
    fn test_broadcast_resolver_without_receipt() {
        let dir = TempDir::new().unwrap();
        write_broadcast(
            &dir,
            5,
            r#"{"transactions":[{"hash":"0x1","transactionType":"CREATE","contractAddress":"0x5FbDB2315678afecb367f032d93F642f64180aa3"}]}"#,
        );
        let resolver = BroadcastResolver::new(dir.path(), "DeployBridge.s.sol");
        assert_eq!(resolver.resolve(5).unwrap().deploy_block, None);
    }

    #[test]
    fn test_static_resolver() {
        let resolver = StaticResolver::new().with(1, Address::repeat_byte(0x01));
        assert_eq!(resolver.resolve(1).unwrap().address, Address::repeat_byte(0x01));
        assert!(resolver.resolve(2).is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x3e8").unwrap(), 1000);
        assert_eq!(parse_quantity("1000").unwrap(), 1000);
        assert!(parse_quantity("0xzz").is_err());
    }
}
