// src/config.rs
//! Environment-driven configuration.
//!
//! All settings come from environment variables (a `.env` file is loaded at
//! startup). `MOCK_SERVICES=true` swaps the storage gateway and ledger for
//! in-process doubles so the whole pipeline runs without a chain or a funded
//! storage wallet.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::IssuanceError;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORAGE_GATEWAY: &str = "https://arweave.net";
const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHAIN_ID: u64 = 80002; // Polygon Amoy
const DEFAULT_RECORDS_PATH: &str = "data/records.json";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 << 20;

/// Runtime configuration, validated at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage_gateway_url: String,
    pub storage_timeout: Duration,
    pub ledger_rpc_url: String,
    pub registry_address: String,
    pub chain_id: u64,
    pub signer_private_key: String,
    pub records_path: PathBuf,
    pub max_upload_bytes: usize,
    pub cross_check_chain: bool,
    pub mock_services: bool,
}

impl Config {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, IssuanceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary lookup, so tests can supply
    /// variables without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IssuanceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mock_services = parse_bool(&lookup, "MOCK_SERVICES", false)?;

        let port = parse_number(&lookup, "PORT", DEFAULT_PORT)?;
        let storage_gateway_url = lookup("STORAGE_GATEWAY_URL")
            .unwrap_or_else(|| DEFAULT_STORAGE_GATEWAY.to_string());
        let storage_timeout = Duration::from_secs(parse_number(
            &lookup,
            "STORAGE_TIMEOUT_SECS",
            DEFAULT_STORAGE_TIMEOUT_SECS,
        )?);
        let chain_id = parse_number(&lookup, "CHAIN_ID", DEFAULT_CHAIN_ID)?;
        let records_path = PathBuf::from(
            lookup("RECORDS_PATH").unwrap_or_else(|| DEFAULT_RECORDS_PATH.to_string()),
        );
        let max_upload_bytes =
            parse_number(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let cross_check_chain = parse_bool(&lookup, "CROSS_CHECK_CHAIN", true)?;

        // The chain-facing settings are only mandatory outside mock mode.
        let ledger_rpc_url = match lookup("LEDGER_RPC_URL") {
            Some(url) => url,
            None if mock_services => String::new(),
            None => {
                return Err(IssuanceError::Config(
                    "LEDGER_RPC_URL must be set".into(),
                ))
            }
        };
        let registry_address = match lookup("REGISTRY_ADDRESS") {
            Some(addr) => addr,
            None if mock_services => String::new(),
            None => {
                return Err(IssuanceError::Config(
                    "REGISTRY_ADDRESS must be set".into(),
                ))
            }
        };
        let signer_private_key = match lookup("SIGNER_PRIVATE_KEY") {
            Some(key) => key,
            None if mock_services => String::new(),
            None => {
                return Err(IssuanceError::Config(
                    "SIGNER_PRIVATE_KEY must be set".into(),
                ))
            }
        };

        let config = Config {
            port,
            storage_gateway_url,
            storage_timeout,
            ledger_rpc_url,
            registry_address,
            chain_id,
            signer_private_key,
            records_path,
            max_upload_bytes,
            cross_check_chain,
            mock_services,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), IssuanceError> {
        if self.max_upload_bytes == 0 {
            return Err(IssuanceError::Config(
                "MAX_UPLOAD_BYTES must be positive".into(),
            ));
        }
        if self.storage_timeout.is_zero() {
            return Err(IssuanceError::Config(
                "STORAGE_TIMEOUT_SECS must be positive".into(),
            ));
        }
        if !self.mock_services && !self.registry_address.starts_with("0x") {
            return Err(IssuanceError::Config(format!(
                "REGISTRY_ADDRESS does not look like an address: {}",
                self.registry_address
            )));
        }
        Ok(())
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, IssuanceError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| IssuanceError::Config(format!("{} is not a valid number: {}", key, raw))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, IssuanceError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(IssuanceError::Config(format!(
                "{} is not a valid boolean: {}",
                key, raw
            ))),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn mock_mode_needs_no_chain_settings() {
        let config = Config::from_lookup(lookup_from(&[("MOCK_SERVICES", "true")])).unwrap();
        assert!(config.mock_services);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(config.max_upload_bytes, 10 << 20);
        assert!(config.cross_check_chain);
    }

    #[test]
    fn real_mode_requires_rpc_registry_and_key() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");

        let config = Config::from_lookup(lookup_from(&[
            ("LEDGER_RPC_URL", "http://localhost:8545"),
            ("REGISTRY_ADDRESS", "0x00000000000000000000000000000000000000ff"),
            ("SIGNER_PRIVATE_KEY", "abc123"),
        ]))
        .unwrap();
        assert_eq!(config.ledger_rpc_url, "http://localhost:8545");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[
            ("MOCK_SERVICES", "true"),
            ("PORT", "not-a-port"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("MOCK_SERVICES", "maybe"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("LEDGER_RPC_URL", "http://localhost:8545"),
            ("REGISTRY_ADDRESS", "not-an-address"),
            ("SIGNER_PRIVATE_KEY", "abc123"),
        ]))
        .is_err());
    }

    #[test]
    fn overrides_take_effect() {
        let config = Config::from_lookup(lookup_from(&[
            ("MOCK_SERVICES", "true"),
            ("PORT", "3000"),
            ("CHAIN_ID", "137"),
            ("MAX_UPLOAD_BYTES", "1024"),
            ("CROSS_CHECK_CHAIN", "false"),
            ("RECORDS_PATH", "/tmp/records.json"),
        ]))
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.chain_id, 137);
        assert_eq!(config.max_upload_bytes, 1024);
        assert!(!config.cross_check_chain);
        assert_eq!(config.records_path, PathBuf::from("/tmp/records.json"));
    }
}
