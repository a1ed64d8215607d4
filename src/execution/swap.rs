// DANS : src/execution/swap.rs
//
// Exécution d'un swap AMM v4 : choix du mode, soumission, récupération des logs,
// classification des erreurs et extraction du `ray_log` de swap.

use crate::decoders::raydium::amm_v4::{classify_error, find_swap_event, SwapEvent};
use crate::error::SniperError;
use crate::execution::{
    bundle::BundleRelay,
    routing::{resolve_mode, SwapMode},
    transaction_builder::{build_swap_instructions, compute_budget_instructions, sign_legacy_transaction, SwapAmounts},
};
use crate::pool::Pool;
use crate::rpc::{ResilientRpcClient, SEND_RETRY};
use anyhow::Result;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SwapRequest {
    pub mint_in: Pubkey,
    pub mint_out: Pubkey,
    pub amount_in: u64,
    pub min_amount_out: u64,
    pub mode: SwapMode,
    /// Micro-lamports par CU, mode direct uniquement.
    pub compute_unit_price: Option<u64>,
    /// Lamports, mode relay uniquement.
    pub tip: u64,
    pub commitment: CommitmentConfig,
}

#[derive(Debug, Clone)]
pub struct SwapReceipt {
    /// Absente en simulation.
    pub signature: Option<Signature>,
    pub mode: SwapMode,
    pub event: SwapEvent,
    pub warnings: Vec<String>,
}

/// État intermédiaire d'une soumission ; une seule issue remonte à l'appelant.
#[derive(Debug, Default)]
struct SubmissionOutcome {
    signature: Option<Signature>,
    error: Option<anyhow::Error>,
    logs: Option<Vec<String>>,
}

impl SubmissionOutcome {
    fn chain_error(raw: Option<String>) -> Option<anyhow::Error> {
        raw.map(|raw| SniperError::Transaction(raw).into())
    }
}

pub struct SwapExecutor {
    rpc_client: Arc<ResilientRpcClient>,
    payer: Arc<Keypair>,
    relay: Option<Arc<BundleRelay>>,
}

impl SwapExecutor {
    /// Les envois, simulations et lectures de transactions utilisent toujours `SEND_RETRY`,
    /// quelle que soit la politique du client fourni.
    pub fn new(rpc_client: Arc<ResilientRpcClient>, payer: Arc<Keypair>, relay: Option<Arc<BundleRelay>>) -> Self {
        let rpc_client = if rpc_client.send_retry() == SEND_RETRY {
            rpc_client
        } else {
            Arc::new(rpc_client.with_send_retry(SEND_RETRY))
        };
        Self { rpc_client, payer, relay }
    }

    pub async fn swap(&self, pool: &Pool, request: &SwapRequest) -> Result<SwapReceipt> {
        let info = pool.info();
        let pair = [info.base_mint, info.quote_mint];
        if request.mint_in == request.mint_out || !pair.contains(&request.mint_in) || !pair.contains(&request.mint_out) {
            return Err(SniperError::validation(format!(
                "Mints {} -> {} hors du pool {}",
                request.mint_in,
                request.mint_out,
                pool.id()
            ))
            .into());
        }

        let market = pool.market_state(&self.rpc_client).await?;
        let keys = pool.swap_keys(&market);

        let engine = self.relay.as_ref().map(|relay| relay.engine().as_ref());
        let resolved = resolve_mode(request.mode, engine).await?;
        let mode = resolved.mode;
        debug!(pool_id = %pool.id(), mint_in = %request.mint_in, mint_out = %request.mint_out, amount_in = request.amount_in, %mode, "Début du swap.");

        let compute_unit_price = if mode == SwapMode::Direct { request.compute_unit_price } else { None };
        let mut instructions = compute_budget_instructions(compute_unit_price);
        let amounts = SwapAmounts {
            mint_in: request.mint_in,
            mint_out: request.mint_out,
            amount_in: request.amount_in,
            min_amount_out: request.min_amount_out,
        };
        instructions.extend(build_swap_instructions(&keys, &amounts, &self.payer.pubkey())?);

        let mut outcome = match mode {
            SwapMode::Relay => self.submit_relay(instructions, request).await?,
            SwapMode::Simulate => self.submit_simulation(&instructions).await?,
            SwapMode::Direct | SwapMode::Auto => self.submit_direct(&instructions, request.commitment).await?,
        };

        let needs_record = outcome.error.is_none() && outcome.logs.is_none();
        if let Some(signature) = outcome.signature.filter(|_| needs_record) {
            let record = self
                .rpc_client
                .get_transaction_record(&signature, CommitmentConfig::confirmed())
                .await
                .inspect_err(|e| debug!(%signature, error = %e, "Lecture de la transaction de swap impossible."))?;
            outcome.error = SubmissionOutcome::chain_error(record.error);
            outcome.logs = record.logs;
        }

        match settle_outcome(outcome.error, outcome.logs.as_deref()) {
            Ok(event) => {
                info!(pool_id = %pool.id(), signature = ?outcome.signature, %mode, amount_in = event.amount_in, amount_out = event.amount_out, "Swap exécuté.");
                Ok(SwapReceipt { signature: outcome.signature, mode, event, warnings: resolved.warning.into_iter().collect() })
            }
            Err(e) => {
                let e = with_mode_warning(e, resolved.warning);
                let detail = format!("{:#}", e);
                warn!(pool_id = %pool.id(), mint_in = %request.mint_in, mint_out = %request.mint_out, %mode, error = %detail, "Échec du swap.");
                Err(e)
            }
        }
    }

    async fn submit_relay(&self, instructions: Vec<Instruction>, request: &SwapRequest) -> Result<SubmissionOutcome> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| SniperError::validation("Mode relay demandé sans Block Engine configuré"))?;
        match relay.send_and_confirm(instructions, request.tip, request.commitment).await {
            Ok(signature) => Ok(SubmissionOutcome { signature: Some(signature), ..Default::default() }),
            Err(e) => {
                debug!(error = %e, "Échec d'envoi ou de confirmation du bundle de swap.");
                Ok(SubmissionOutcome { error: Some(e), ..Default::default() })
            }
        }
    }

    async fn submit_simulation(&self, instructions: &[Instruction]) -> Result<SubmissionOutcome> {
        let (blockhash, _) = self.rpc_client.get_latest_blockhash(CommitmentConfig::confirmed()).await?;
        let transaction = sign_legacy_transaction(instructions, &self.payer, blockhash)?;
        let simulation = self
            .rpc_client
            .simulate_transaction(&transaction)
            .await
            .inspect_err(|e| debug!(error = %e, "Simulation du swap impossible."))?;
        Ok(SubmissionOutcome {
            signature: None,
            error: SubmissionOutcome::chain_error(simulation.error),
            logs: simulation.logs,
        })
    }

    /// Une expiration du blockhash remonte telle quelle (`SniperError::Expired`).
    async fn submit_direct(&self, instructions: &[Instruction], commitment: CommitmentConfig) -> Result<SubmissionOutcome> {
        let (blockhash, last_valid_block_height) =
            self.rpc_client.get_latest_blockhash(CommitmentConfig::confirmed()).await?;
        let transaction = sign_legacy_transaction(instructions, &self.payer, blockhash)?;

        let signature = match self.rpc_client.send_transaction(&transaction).await {
            Ok(signature) => signature,
            Err(e) => {
                debug!(error = %e, "Envoi de la transaction de swap impossible.");
                return Ok(SubmissionOutcome { error: Some(e), ..Default::default() });
            }
        };

        let chain_error = self
            .rpc_client
            .confirm_transaction(&signature, last_valid_block_height, commitment)
            .await
            .inspect_err(|e| debug!(%signature, error = %e, "Confirmation de la transaction de swap impossible."))?;

        Ok(SubmissionOutcome {
            signature: Some(signature),
            error: SubmissionOutcome::chain_error(chain_error),
            logs: None,
        })
    }
}

/// Remplace `error` par l'erreur de programme reconnue dans son message, ou à défaut dans les logs.
pub fn classify_failure(error: anyhow::Error, logs: Option<&[String]>) -> anyhow::Error {
    let message = format!("{:#}", error);
    let classified = classify_error(&message)
        .or_else(|| logs.and_then(|logs| logs.iter().find_map(|line| classify_error(line))));
    match classified {
        Some(program_error) => SniperError::Program(program_error).into(),
        None => error,
    }
}

/// L'avertissement de résolution du mode accompagne aussi les échecs.
fn with_mode_warning(error: anyhow::Error, warning: Option<String>) -> anyhow::Error {
    match warning {
        Some(warning) => error.context(warning),
        None => error,
    }
}

/// Issue finale : l'erreur classée, ou l'évènement de swap trouvé dans les logs.
fn settle_outcome(error: Option<anyhow::Error>, logs: Option<&[String]>) -> Result<SwapEvent> {
    if let Some(error) = error {
        return Err(classify_failure(error, logs));
    }
    let logs = logs.unwrap_or_default();
    find_swap_event(logs)
        .map_err(SniperError::from)?
        .ok_or_else(|| SniperError::SwapLogNotFound.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::raydium::amm_v4::{AmmErrorKind, RayLog, SwapDirection};
    use crate::decoders::raydium::amm_v4::events::SwapBaseInLog;
    use crate::error::ProgramError;

    fn swap_logs() -> Vec<String> {
        let log = RayLog::SwapBaseIn(SwapBaseInLog {
            amount_in: 1_000_000,
            min_amount_out: 1,
            direction: 1,
            user_amount: 1_000_000,
            base_reserve: 10_000_000,
            quote_reserve: 5_000_000,
            amount_out: 1_900_000,
        });
        vec![
            "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 invoke [1]".to_string(),
            log.to_log_line().unwrap(),
            "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 success".to_string(),
        ]
    }

    fn kind(error: anyhow::Error) -> SniperError {
        error.downcast::<SniperError>().unwrap()
    }

    #[test]
    fn successful_logs_yield_the_swap_event() {
        let event = settle_outcome(None, Some(&swap_logs())).unwrap();
        assert_eq!(event.direction, SwapDirection::Quote2Base);
        assert_eq!(event.amount_out, 1_900_000);
    }

    #[test]
    fn missing_swap_log_is_a_distinct_failure() {
        let logs = vec!["Program log: Instruction: Transfer".to_string()];
        assert!(matches!(kind(settle_outcome(None, Some(&logs)).unwrap_err()), SniperError::SwapLogNotFound));
        assert!(matches!(kind(settle_outcome(None, None).unwrap_err()), SniperError::SwapLogNotFound));
    }

    #[test]
    fn chain_errors_are_classified() {
        let raw = SubmissionOutcome::chain_error(Some(r#"{"InstructionError":[4,{"Custom":30}]}"#.to_string()));
        let err = kind(settle_outcome(raw, None).unwrap_err());
        assert!(matches!(err, SniperError::Program(ProgramError::Amm(AmmErrorKind::ExceededSlippage))));
        assert_eq!(err.to_string(), "AmmError: ExceededSlippage");
    }

    #[test]
    fn generic_program_error_is_read_from_logs() {
        let raw = SubmissionOutcome::chain_error(Some(r#"{"InstructionError":[4,"InvalidAccountData"]}"#.to_string()));
        let logs = vec!["Program log: Error: Invalid pool state".to_string()];
        let err = kind(settle_outcome(raw, Some(&logs)).unwrap_err());
        assert!(matches!(err, SniperError::Program(ProgramError::Generic(msg)) if msg.starts_with("Invalid pool state")));
    }

    #[test]
    fn unclassified_errors_are_kept() {
        let raw = SubmissionOutcome::chain_error(Some(r#""AccountNotFound""#.to_string()));
        let err = kind(settle_outcome(raw, Some(&swap_logs())).unwrap_err());
        assert_eq!(err.to_string(), r#"Transaction error: "AccountNotFound""#);

        let expired = kind(classify_failure(SniperError::Expired.into(), None));
        assert!(matches!(expired, SniperError::Expired));
    }

    #[test]
    fn auto_mode_warning_is_kept_on_failure() {
        let warning = "Relay indisponible, repli sur le mode direct".to_string();
        let err = with_mode_warning(SniperError::Expired.into(), Some(warning.clone()));
        assert!(format!("{:#}", err).starts_with(&warning));
        assert!(matches!(err.downcast_ref::<SniperError>(), Some(SniperError::Expired)));

        let plain = with_mode_warning(SniperError::SwapLogNotFound.into(), None);
        assert_eq!(format!("{:#}", plain), SniperError::SwapLogNotFound.to_string());
    }

    #[tokio::test]
    async fn executor_pins_the_send_retry_policy() {
        let client = solana_client::nonblocking::rpc_client::RpcClient::new_mock("succeeds".to_string());
        let rpc = Arc::new(ResilientRpcClient::from_client(Arc::new(client), crate::rpc::RetryOptions::ONCE));
        let executor = SwapExecutor::new(rpc.clone(), Arc::new(Keypair::new()), None);

        assert_eq!(executor.rpc_client.send_retry(), SEND_RETRY);
        assert_eq!(SEND_RETRY.retries, 3);
        assert!(SEND_RETRY.min_interval >= std::time::Duration::from_secs(1));
        assert_eq!(rpc.send_retry(), crate::rpc::RetryOptions::ONCE);
    }
}
