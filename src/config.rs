// DANS : src/config.rs

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair},
};
use std::{collections::HashSet, str::FromStr};

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration statique du processus, lue une fois au démarrage.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub solana_rpc_url: String,
    pub solana_ws_url: String,
    /// WebSocket "enrichi" qui expose `transactionSubscribe`.
    pub transaction_ws_url: String,
    /// Fichier JSON (tableau de 64 octets), prioritaire sur `private_key`.
    pub keypair_path: Option<String>,
    /// Clé privée en base58.
    pub private_key: Option<String>,
    /// Block Engine Jito ; sans lui, seuls les modes direct et simulate sont disponibles.
    pub relay_url: Option<String>,
    pub relay_auth_token: Option<String>,
    /// Identités des validateurs Jito, séparées par des virgules.
    pub relay_validators: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>().context("Configuration invalide")?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars).context("Configuration invalide")
    }

    pub fn payer(&self) -> Result<Keypair> {
        if let Some(path) = &self.keypair_path {
            return read_keypair_file(path).map_err(|e| anyhow!("Lecture du keypair {} impossible: {}", path, e));
        }
        match &self.private_key {
            Some(encoded) => {
                let bytes = bs58::decode(encoded.trim()).into_vec().context("PRIVATE_KEY n'est pas du base58")?;
                Keypair::from_bytes(&bytes).map_err(|e| anyhow!("PRIVATE_KEY invalide: {}", e))
            }
            None => bail!("KEYPAIR_PATH ou PRIVATE_KEY doit être défini"),
        }
    }

    pub fn relay_validators(&self) -> Result<HashSet<Pubkey>> {
        let Some(raw) = &self.relay_validators else {
            return Ok(HashSet::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Pubkey::from_str(s).with_context(|| format!("Validateur relais invalide: {}", s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signer::Signer;

    fn vars(extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut vars = vec![
            ("SOLANA_RPC_URL", "http://localhost:8899"),
            ("SOLANA_WS_URL", "ws://localhost:8900"),
            ("TRANSACTION_WS_URL", "wss://atlas.example/?api-key=k"),
        ];
        vars.extend_from_slice(extra);
        vars.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn loads_required_urls_and_defaults() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(config.solana_ws_url, "ws://localhost:8900");
        assert_eq!(config.log_level, "info");
        assert!(config.relay_url.is_none());
        assert!(config.relay_validators().unwrap().is_empty());
        assert!(config.payer().is_err());
    }

    #[test]
    fn missing_url_is_an_error() {
        let partial = vec![("SOLANA_RPC_URL".to_string(), "http://localhost:8899".to_string())];
        assert!(Config::from_vars(partial).is_err());
    }

    #[test]
    fn reads_base58_private_key_and_validators() {
        let keypair = Keypair::new();
        let encoded = keypair.to_base58_string();
        let validator = Pubkey::new_unique().to_string();
        let validators = format!("{}, ,{}", validator, validator);
        let config =
            Config::from_vars(vars(&[("PRIVATE_KEY", &encoded), ("RELAY_VALIDATORS", &validators)])).unwrap();

        assert_eq!(config.payer().unwrap().pubkey(), keypair.pubkey());
        assert_eq!(config.relay_validators().unwrap().len(), 1);
    }

    #[test]
    fn invalid_validator_is_reported() {
        let config = Config::from_vars(vars(&[("RELAY_VALIDATORS", "not-a-key")])).unwrap();
        assert!(config.relay_validators().is_err());
    }
}
