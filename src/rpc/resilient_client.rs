// DANS : src/rpc/resilient_client.rs

use crate::error::SniperError;
use crate::rpc::retry::{retry_with, RetryOptions};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig},
};
use solana_sdk::{
    account::Account,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::{fmt::Debug, sync::Arc, time::Duration};
use tracing::debug;

/// Intervalle de sondage pendant l'attente d'une confirmation.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Envois, simulations et lectures de transactions : 3 ré-essais espacés d'au moins 1s.
pub const SEND_RETRY: RetryOptions = RetryOptions::new(3, Duration::from_secs(1));

/// Résultat d'une simulation : erreur éventuelle et logs, déjà normalisés.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub error: Option<String>,
    pub logs: Option<Vec<String>>,
}

/// Enregistrement d'une transaction confirmée : erreur d'exécution et logs.
#[derive(Debug, Clone, Default)]
pub struct TransactionRecord {
    pub error: Option<String>,
    pub logs: Option<Vec<String>>,
}

/// Un "wrapper" autour du RpcClient de Solana. Les envois, simulations et lectures de
/// transactions passent par la primitive `retry` avec `send_retry` (`SEND_RETRY` par défaut).
/// Les lectures d'état ne sont jamais mises en cache.
#[derive(Clone)]
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    send_retry: RetryOptions,
}

impl ResilientRpcClient {
    pub fn new(rpc_url: String) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed())),
            send_retry: SEND_RETRY,
        }
    }

    pub fn from_client(client: Arc<RpcClient>, send_retry: RetryOptions) -> Self {
        Self { client, send_retry }
    }

    /// Même connexion, autre politique de ré-essai.
    pub fn with_send_retry(&self, send_retry: RetryOptions) -> Self {
        Self { client: self.client.clone(), send_retry }
    }

    pub fn send_retry(&self) -> RetryOptions {
        self.send_retry
    }

    pub fn inner(&self) -> &RpcClient {
        &self.client
    }

    /// Récupère un compte ; un compte absent est une erreur.
    pub async fn get_account(&self, pubkey: &Pubkey, commitment: CommitmentConfig) -> Result<Account> {
        let response = self
            .client
            .get_account_with_commitment(pubkey, commitment)
            .await
            .map_err(transport)
            .with_context(|| format!("Échec de get_account pour {}", pubkey))?;
        response.value.ok_or_else(|| anyhow!("Compte {} introuvable", pubkey))
    }

    /// Solde brut (en unités de base) d'un compte de jetons.
    pub async fn get_token_account_balance(&self, pubkey: &Pubkey, commitment: CommitmentConfig) -> Result<u64> {
        let response = self
            .client
            .get_token_account_balance_with_commitment(pubkey, commitment)
            .await
            .map_err(transport)
            .with_context(|| format!("Échec de get_token_account_balance pour {}", pubkey))?;
        response
            .value
            .amount
            .parse::<u64>()
            .with_context(|| format!("Solde illisible pour {}: {}", pubkey, response.value.amount))
    }

    /// Dernier blockhash et hauteur de bloc maximale de validité.
    pub async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> Result<(Hash, u64)> {
        self.client
            .get_latest_blockhash_with_commitment(commitment)
            .await
            .map_err(transport)
            .context("Échec de get_latest_blockhash")
    }

    pub async fn get_slot(&self, commitment: CommitmentConfig) -> Result<u64> {
        self.client
            .get_slot_with_commitment(commitment)
            .await
            .map_err(transport)
            .context("Échec de get_slot")
    }

    pub async fn get_slot_leaders(&self, start_slot: u64, limit: u64) -> Result<Vec<Pubkey>> {
        self.client
            .get_slot_leaders(start_slot, limit)
            .await
            .map_err(transport)
            .context("Échec de get_slot_leaders")
    }

    /// Diffuse une transaction (preflight `processed`), avec ré-essais.
    pub async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            preflight_commitment: Some(CommitmentLevel::Processed),
            ..Default::default()
        };
        let client = &self.client;
        let config = &config;
        retry_with(
            || async move { client.send_transaction_with_config(transaction, config.clone()).await.map_err(transport) },
            &self.send_retry,
            |e| debug!(error = %e, "Tentative d'envoi échouée."),
        )
        .await
        .context("Échec final de send_transaction")
    }

    /// Simule une transaction au niveau `processed`, avec ré-essais.
    pub async fn simulate_transaction(&self, transaction: &VersionedTransaction) -> Result<SimulationOutcome> {
        let config = RpcSimulateTransactionConfig {
            commitment: Some(CommitmentConfig::processed()),
            ..Default::default()
        };
        let client = &self.client;
        let config = &config;
        let response = retry_with(
            || async move {
                client
                    .simulate_transaction_with_config(transaction, config.clone())
                    .await
                    .map_err(transport)
            },
            &self.send_retry,
            |e| debug!(error = %e, "Tentative de simulation échouée."),
        )
        .await
        .context("Échec final de simulate_transaction")?;

        Ok(SimulationOutcome {
            error: response.value.err.as_ref().map(describe_transaction_error),
            logs: response.value.logs,
        })
    }

    /// Relit une transaction confirmée pour récupérer ses logs et son erreur éventuelle.
    pub async fn get_transaction_record(&self, signature: &Signature, commitment: CommitmentConfig) -> Result<TransactionRecord> {
        let config = RpcTransactionConfig {
            commitment: Some(commitment),
            max_supported_transaction_version: Some(0),
            ..Default::default()
        };
        let client = &self.client;
        let config = &config;
        let transaction = retry_with(
            || async move { client.get_transaction_with_config(signature, config.clone()).await.map_err(transport) },
            &self.send_retry,
            |e| debug!(%signature, error = %e, "Lecture de la transaction échouée."),
        )
        .await
        .with_context(|| format!("Échec final de get_transaction pour {}", signature))?;

        let Some(meta) = transaction.transaction.meta else {
            return Ok(TransactionRecord::default());
        };
        let logs: Option<Vec<String>> = meta.log_messages.into();
        Ok(TransactionRecord {
            error: meta.err.as_ref().map(describe_transaction_error),
            logs,
        })
    }

    /// Attend que `signature` atteigne `commitment`. Renvoie l'erreur d'exécution éventuelle.
    /// Un sondage en échec est ignoré : seule une hauteur de bloc au-delà de
    /// `last_valid_block_height` termine l'attente en erreur (`SniperError::Expired`).
    pub async fn confirm_transaction(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
        commitment: CommitmentConfig,
    ) -> Result<Option<String>> {
        let mut interval = tokio::time::interval(CONFIRMATION_POLL_INTERVAL);
        loop {
            interval.tick().await;

            match self.client.get_signature_statuses(&[*signature]).await {
                Ok(statuses) => {
                    if let Some(Some(status)) = statuses.value.first() {
                        if status.err.is_some() {
                            return Ok(status.err.as_ref().map(describe_transaction_error));
                        }
                        if status.satisfies_commitment(commitment) {
                            return Ok(None);
                        }
                    }
                }
                Err(e) => debug!(%signature, error = %e, "Échec de get_signature_statuses, nouveau sondage."),
            }

            match self.client.get_block_height_with_commitment(commitment).await {
                Ok(block_height) if block_height > last_valid_block_height => return Err(SniperError::Expired.into()),
                Ok(_) => {}
                Err(e) => debug!(%signature, error = %e, "Échec de get_block_height, nouveau sondage."),
            }
        }
    }
}

fn transport(error: solana_client::client_error::ClientError) -> SniperError {
    SniperError::Transport(error.to_string())
}

/// Forme textuelle d'une erreur de transaction, au format JSON du nœud
/// (ex: `{"InstructionError":[3,{"Custom":30}]}`).
pub fn describe_transaction_error<E: Serialize + Debug>(error: &E) -> String {
    serde_json::to_string(error).unwrap_or_else(|_| format!("{:?}", error))
}
