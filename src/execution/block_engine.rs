// DANS : src/execution/block_engine.rs
//
// Accès au Block Engine Jito (API JSON-RPC `/api/v1/bundles`).

use crate::error::SniperError;
use crate::rpc::ResilientRpcClient;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, transaction::VersionedTransaction};
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

/// Nombre de slots examinés pour trouver le prochain leader relais.
const LEADER_LOOKAHEAD_SLOTS: u64 = 100;
/// `getInflightBundleStatuses` accepte au plus 5 bundles par appel.
const STATUS_BATCH_SIZE: usize = 5;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Le Block Engine oublie les bundles au-delà de 5 minutes.
const IN_FLIGHT_TTL: Duration = Duration::from_secs(300);

/// Résultat d'un bundle. `Accepted` n'est pas terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleResult {
    Accepted,
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextLeader {
    pub current_slot: u64,
    pub next_leader_slot: u64,
    pub next_leader_identity: Option<Pubkey>,
}

#[async_trait]
pub trait BlockEngine: Send + Sync {
    async fn get_tip_accounts(&self) -> Result<Vec<Pubkey>>;

    async fn get_next_scheduled_leader(&self) -> Result<NextLeader>;

    /// Renvoie l'identifiant du bundle.
    async fn send_bundle(&self, transactions: &[VersionedTransaction]) -> Result<String>;

    /// Pousse `(bundle_id, résultat)` dans `results` jusqu'à une erreur d'abonnement.
    /// `Ok(())` si le récepteur a été fermé.
    async fn subscribe_bundle_results(&self, results: mpsc::UnboundedSender<(String, BundleResult)>) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct InflightStatuses {
    value: Vec<InflightBundleStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InflightBundleStatus {
    pub bundle_id: String,
    pub status: String,
    #[serde(default)]
    pub landed_slot: Option<u64>,
}

/// `Landed` => accepté, `Failed` => rejeté, le reste est encore en vol.
pub fn bundle_result_from_status(status: &InflightBundleStatus) -> Option<BundleResult> {
    match status.status.as_str() {
        "Landed" => Some(BundleResult::Accepted),
        "Failed" => Some(BundleResult::Rejected { reason: format!("bundle {} failed", status.bundle_id) }),
        _ => None,
    }
}

/// Premier slot, à partir de `current_slot`, dont le leader est dans `relay_validators`.
/// Un ensemble vide signifie que tous les leaders exécutent le relais.
pub fn next_relay_leader(current_slot: u64, leaders: &[Pubkey], relay_validators: &HashSet<Pubkey>) -> NextLeader {
    leaders
        .iter()
        .enumerate()
        .find(|(_, leader)| relay_validators.is_empty() || relay_validators.contains(leader))
        .map(|(offset, leader)| NextLeader {
            current_slot,
            next_leader_slot: current_slot + offset as u64,
            next_leader_identity: Some(*leader),
        })
        .unwrap_or(NextLeader {
            current_slot,
            next_leader_slot: current_slot + leaders.len().max(1) as u64,
            next_leader_identity: None,
        })
}

/// Client JSON-RPC du Block Engine. Les résultats de bundles sont obtenus en sondant
/// `getInflightBundleStatuses` pour chaque bundle envoyé par ce client.
pub struct JsonRpcBlockEngine {
    http: reqwest::Client,
    bundles_url: String,
    auth_token: Option<String>,
    rpc_client: Arc<ResilientRpcClient>,
    relay_validators: HashSet<Pubkey>,
    in_flight: Mutex<HashMap<String, Instant>>,
}

impl JsonRpcBlockEngine {
    pub fn new(
        block_engine_url: &str,
        auth_token: Option<String>,
        rpc_client: Arc<ResilientRpcClient>,
        relay_validators: HashSet<Pubkey>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            bundles_url: format!("{}/api/v1/bundles", block_engine_url.trim_end_matches('/')),
            auth_token,
            rpc_client,
            relay_validators,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let mut request = self
            .http
            .post(&self.bundles_url)
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }));
        if let Some(token) = &self.auth_token {
            request = request.header("x-jito-auth", token);
        }

        let response: JsonRpcResponse<T> = request
            .send()
            .await
            .map_err(|e| SniperError::Transport(e.to_string()))?
            .json()
            .await
            .with_context(|| format!("Réponse illisible du Block Engine pour {}", method))?;

        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => {
                Err(SniperError::Transport(format!("{} a échoué: {} ({})", method, error.message, error.code)).into())
            }
            (None, None) => Err(anyhow!("Réponse vide du Block Engine pour {}", method)),
        }
    }

    async fn poll_in_flight(&self, results: &mpsc::UnboundedSender<(String, BundleResult)>) -> Result<()> {
        let bundle_ids: Vec<String> = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.retain(|_, sent_at| sent_at.elapsed() < IN_FLIGHT_TTL);
            in_flight.keys().cloned().collect()
        };

        for batch in bundle_ids.chunks(STATUS_BATCH_SIZE) {
            let statuses: InflightStatuses = self.call("getInflightBundleStatuses", json!([batch])).await?;
            for status in statuses.value {
                trace!(bundle_id = %status.bundle_id, status = %status.status, "Statut de bundle reçu.");
                let Some(result) = bundle_result_from_status(&status) else { continue };
                self.in_flight.lock().await.remove(&status.bundle_id);
                if results.send((status.bundle_id, result)).is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlockEngine for JsonRpcBlockEngine {
    async fn get_tip_accounts(&self) -> Result<Vec<Pubkey>> {
        let accounts: Vec<String> = self.call("getTipAccounts", json!([])).await?;
        accounts
            .iter()
            .map(|a| Pubkey::from_str(a).with_context(|| format!("Compte de tip invalide: {}", a)))
            .collect()
    }

    async fn get_next_scheduled_leader(&self) -> Result<NextLeader> {
        let current_slot = self.rpc_client.get_slot(CommitmentConfig::processed()).await?;
        let leaders = self.rpc_client.get_slot_leaders(current_slot, LEADER_LOOKAHEAD_SLOTS).await?;
        Ok(next_relay_leader(current_slot, &leaders, &self.relay_validators))
    }

    async fn send_bundle(&self, transactions: &[VersionedTransaction]) -> Result<String> {
        let encoded = transactions
            .iter()
            .map(|tx| bincode::serialize(tx).map(|bytes| STANDARD.encode(bytes)))
            .collect::<Result<Vec<_>, _>>()
            .context("Sérialisation du bundle impossible")?;

        let bundle_id: String = self.call("sendBundle", json!([encoded, { "encoding": "base64" }])).await?;
        self.in_flight.lock().await.insert(bundle_id.clone(), Instant::now());
        debug!(%bundle_id, "Bundle accepté par le Block Engine.");
        Ok(bundle_id)
    }

    async fn subscribe_bundle_results(&self, results: mpsc::UnboundedSender<(String, BundleResult)>) -> Result<()> {
        let mut interval = tokio::time::interval(STATUS_POLL_INTERVAL);
        while !results.is_closed() {
            interval.tick().await;
            self.poll_in_flight(&results).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_inflight_statuses() {
        let status = |s: &str| InflightBundleStatus { bundle_id: "b1".into(), status: s.into(), landed_slot: None };
        assert_eq!(bundle_result_from_status(&status("Landed")), Some(BundleResult::Accepted));
        assert!(matches!(bundle_result_from_status(&status("Failed")), Some(BundleResult::Rejected { .. })));
        assert_eq!(bundle_result_from_status(&status("Pending")), None);
        assert_eq!(bundle_result_from_status(&status("Invalid")), None);
    }

    #[test]
    fn next_leader_is_current_slot_without_validator_set() {
        let leaders = vec![Pubkey::new_unique(), Pubkey::new_unique()];
        let next = next_relay_leader(1_000, &leaders, &HashSet::new());
        assert_eq!(next.next_leader_slot, 1_000);
        assert_eq!(next.next_leader_identity, Some(leaders[0]));
    }

    #[test]
    fn next_leader_skips_non_relay_validators() {
        let relay = Pubkey::new_unique();
        let leaders = vec![Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), relay];
        let next = next_relay_leader(50, &leaders, &HashSet::from([relay]));
        assert_eq!(next.next_leader_slot, 53);
        assert_eq!(next.next_leader_identity, Some(relay));

        let none = next_relay_leader(50, &leaders[..3], &HashSet::from([relay]));
        assert_eq!(none.next_leader_slot, 53);
        assert_eq!(none.next_leader_identity, None);
    }

    #[test]
    fn parses_json_rpc_envelopes() {
        let ok: JsonRpcResponse<String> = serde_json::from_value(json!({"jsonrpc": "2.0", "result": "abc", "id": 1})).unwrap();
        assert_eq!(ok.result.as_deref(), Some("abc"));

        let err: JsonRpcResponse<String> = serde_json::from_value(
            json!({"jsonrpc": "2.0", "error": {"code": -32602, "message": "bundle contains an already processed transaction"}, "id": 1}),
        )
        .unwrap();
        assert!(err.result.is_none());
        assert_eq!(err.error.map(|e| e.code), Some(-32602));

        let statuses: JsonRpcResponse<InflightStatuses> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "result": {"context": {"slot": 280}, "value": [{"bundle_id": "b1", "status": "Landed", "landed_slot": 279}]},
            "id": 1
        }))
        .unwrap();
        let value = statuses.result.unwrap().value;
        assert_eq!(value[0].landed_slot, Some(279));
    }
}
