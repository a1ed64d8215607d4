// DANS : src/execution/bundle.rs
//
// Soumission d'une transaction dans un bundle Jito, puis course entre le rejet du bundle
// et la confirmation de la signature.

use crate::error::SniperError;
use crate::execution::block_engine::{BlockEngine, BundleResult};
use crate::execution::transaction_builder::sign_legacy_transaction;
use crate::rpc::{refresh, retry_with, timeout, RefreshOptions, Refresher, ResilientRpcClient, RetryOptions, SEND_RETRY};
use anyhow::{anyhow, Result};
use rand::seq::SliceRandom;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
};
use std::{
    collections::HashMap,
    future::Future,
    slice,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, OnceCell},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

const BLOCKHASH_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const SEND_BUNDLE_TIMEOUT: Duration = Duration::from_secs(5);
const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(5);

type Dispatch = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<BundleResult>>>>;

/// Retire l'entrée du bundle de la table de dispatch, quelle que soit l'issue.
struct DispatchGuard {
    dispatch: Dispatch,
    bundle_id: String,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if let Ok(mut dispatch) = self.dispatch.lock() {
            dispatch.remove(&self.bundle_id);
        }
    }
}

/// Service de soumission de bundles. Construit une fois, partagé par `Arc`.
pub struct BundleRelay {
    engine: Arc<dyn BlockEngine>,
    rpc_client: Arc<ResilientRpcClient>,
    payer: Arc<Keypair>,
    tip_accounts: OnceCell<Result<Vec<Pubkey>, String>>,
    blockhash: Refresher<(Hash, u64)>,
    dispatch: Dispatch,
    subscription: JoinHandle<()>,
    send_timeout: Duration,
    send_retry: RetryOptions,
}

impl BundleRelay {
    /// Démarre le rafraîchissement du blockhash (`finalized`, toutes les 10s) et l'abonnement
    /// aux résultats de bundles, ré-établi indéfiniment.
    pub fn new(engine: Arc<dyn BlockEngine>, rpc_client: Arc<ResilientRpcClient>, payer: Arc<Keypair>) -> Self {
        let blockhash_rpc = rpc_client.clone();
        let blockhash = refresh(
            move || {
                let rpc = blockhash_rpc.clone();
                async move { rpc.get_latest_blockhash(CommitmentConfig::finalized()).await }
            },
            RefreshOptions::every(BLOCKHASH_REFRESH_INTERVAL),
        );

        let dispatch: Dispatch = Arc::new(Mutex::new(HashMap::new()));
        let subscription = tokio::spawn({
            let engine = engine.clone();
            let dispatch = dispatch.clone();
            async move {
                let _ = retry_with(
                    || run_result_subscription(engine.clone(), dispatch.clone()),
                    &RetryOptions::forever(RESUBSCRIBE_INTERVAL),
                    |e| warn!(error = %e, "Jito bundle result subscription error"),
                )
                .await;
            }
        });

        Self {
            engine,
            rpc_client,
            payer,
            tip_accounts: OnceCell::new(),
            blockhash,
            dispatch,
            subscription,
            send_timeout: SEND_BUNDLE_TIMEOUT,
            send_retry: SEND_RETRY,
        }
    }

    pub fn engine(&self) -> &Arc<dyn BlockEngine> {
        &self.engine
    }

    /// Un compte de tip au hasard. Le premier échec de récupération est définitif.
    pub async fn random_tip_account(&self) -> Result<Pubkey> {
        let accounts = self
            .tip_accounts
            .get_or_init(|| async {
                self.engine.get_tip_accounts().await.map_err(|e| {
                    error!(error = %e, "Failed to get jito tip accounts");
                    format!("{:#}", e)
                })
            })
            .await;

        match accounts {
            Ok(accounts) => accounts
                .choose(&mut rand::thread_rng())
                .copied()
                .ok_or_else(|| anyhow!("Aucun compte de tip Jito disponible")),
            Err(reason) => Err(anyhow!("Comptes de tip Jito indisponibles: {}", reason)),
        }
    }

    fn register(&self, bundle_id: &str) -> (DispatchGuard, mpsc::UnboundedReceiver<BundleResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut dispatch) = self.dispatch.lock() {
            dispatch.insert(bundle_id.to_string(), tx);
        }
        (DispatchGuard { dispatch: self.dispatch.clone(), bundle_id: bundle_id.to_string() }, rx)
    }

    /// Signe `instructions` (+ tip si `tip > 0`) dans une transaction, l'envoie en bundle
    /// et attend la confirmation de la signature au niveau `commitment`.
    pub async fn send_and_confirm(
        &self,
        mut instructions: Vec<Instruction>,
        tip: u64,
        commitment: CommitmentConfig,
    ) -> Result<Signature> {
        let prepare_started = Instant::now();
        if tip > 0 {
            let tip_account = self.random_tip_account().await?;
            instructions.push(system_instruction::transfer(&self.payer.pubkey(), &tip_account, tip));
        }

        let (blockhash, last_valid_block_height) = *self.blockhash.get().await?;
        let transaction = sign_legacy_transaction(&instructions, &self.payer, blockhash)?;
        let signature = transaction.signatures[0];
        debug!(%signature, prepare_duration = ?prepare_started.elapsed(), "Sending jito bundle");

        let send_started = Instant::now();
        let bundle_id = retry_with(
            || {
                timeout(
                    self.engine.send_bundle(slice::from_ref(&transaction)),
                    self.send_timeout,
                    Some(SniperError::Timeout("Send jito bundle timeout".to_string())),
                )
            },
            &self.send_retry,
            |e| debug!(%signature, error = %e, send_duration = ?send_started.elapsed(), "Failed to send jito bundle"),
        )
        .await?;
        debug!(%signature, %bundle_id, send_duration = ?send_started.elapsed(), "Sent jito bundle");

        let (_guard, results) = self.register(&bundle_id);
        let confirm_started = Instant::now();
        let confirmation = async {
            let chain_error = self.rpc_client.confirm_transaction(&signature, last_valid_block_height, commitment).await?;
            match chain_error {
                Some(err) => Err(anyhow::Error::from(SniperError::Transaction(err))),
                None => Ok(()),
            }
        };

        match race_bundle_outcome(results, confirmation).await {
            Ok(()) => {
                debug!(%signature, %bundle_id, ?commitment, confirm_duration = ?confirm_started.elapsed(), "Confirmed transaction in jito bundle");
                Ok(signature)
            }
            Err(e) => {
                debug!(%signature, %bundle_id, error = %e, confirm_duration = ?confirm_started.elapsed(), "Failed to confirm jito bundle");
                Err(e)
            }
        }
    }
}

impl Drop for BundleRelay {
    fn drop(&mut self) {
        self.subscription.abort();
        self.blockhash.stop();
    }
}

fn dispatch_result(dispatch: &Dispatch, bundle_id: &str, result: BundleResult) {
    debug!(bundle_id, ?result, "Received jito bundle result");
    if let Ok(dispatch) = dispatch.lock() {
        if let Some(sender) = dispatch.get(bundle_id) {
            let _ = sender.send(result);
        }
    }
}

/// Une session d'abonnement ; se termine toujours en erreur pour déclencher le ré-abonnement.
async fn run_result_subscription(engine: Arc<dyn BlockEngine>, dispatch: Dispatch) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = engine.subscribe_bundle_results(tx);
    tokio::pin!(subscription);

    loop {
        tokio::select! {
            outcome = &mut subscription => {
                while let Ok((bundle_id, result)) = rx.try_recv() {
                    dispatch_result(&dispatch, &bundle_id, result);
                }
                outcome?;
                return Err(anyhow!("Abonnement aux résultats de bundles terminé"));
            }
            Some((bundle_id, result)) = rx.recv() => dispatch_result(&dispatch, &bundle_id, result),
        }
    }
}

/// Course entre les résultats du bundle et la confirmation de la transaction.
/// Un rejet dont la raison ne contient pas "processed" l'emporte ; après un `Accepted`,
/// les résultats suivants sont ignorés. Sinon l'issue de `confirmation` est renvoyée.
pub async fn race_bundle_outcome<F>(mut results: mpsc::UnboundedReceiver<BundleResult>, confirmation: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let rejection = async move {
        let mut accepted = false;
        while let Some(result) = results.recv().await {
            if accepted {
                continue;
            }
            match result {
                BundleResult::Accepted => accepted = true,
                BundleResult::Rejected { reason } if !reason.contains("processed") => {
                    return SniperError::Rejected(reason);
                }
                BundleResult::Rejected { .. } => {}
            }
        }
        std::future::pending::<SniperError>().await
    };

    tokio::select! {
        rejected = rejection => Err(rejected.into()),
        confirmed = confirmation => confirmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::block_engine::NextLeader;
    use async_trait::async_trait;
    use solana_client::nonblocking::rpc_client::RpcClient;
    use solana_sdk::transaction::VersionedTransaction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn sniper_error(result: Result<()>) -> SniperError {
        result.unwrap_err().downcast::<SniperError>().unwrap()
    }

    async fn confirmed_after(delay: Duration) -> Result<()> {
        tokio::time::sleep(delay).await;
        Ok(())
    }

    #[tokio::test]
    async fn rejection_wins_over_pending_confirmation() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(BundleResult::Rejected { reason: "simulation failure: insufficient funds".into() }).unwrap();

        let err = sniper_error(race_bundle_outcome(rx, std::future::pending()).await);
        assert!(matches!(err, SniperError::Rejected(reason) if reason.contains("simulation failure")));
    }

    #[tokio::test]
    async fn already_processed_rejection_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(BundleResult::Rejected { reason: "bundle contains an already processed transaction".into() }).unwrap();

        let outcome = race_bundle_outcome(rx, confirmed_after(Duration::from_millis(50))).await;
        assert!(outcome.is_ok());
        drop(tx);
    }

    #[tokio::test]
    async fn results_after_accepted_are_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(BundleResult::Accepted).unwrap();
        tx.send(BundleResult::Rejected { reason: "dropped".into() }).unwrap();

        let outcome = race_bundle_outcome(rx, confirmed_after(Duration::from_millis(50))).await;
        assert!(outcome.is_ok());
        drop(tx);
    }

    #[tokio::test]
    async fn closed_channel_defers_to_confirmation() {
        let (tx, rx) = mpsc::unbounded_channel::<BundleResult>();
        drop(tx);

        let err = sniper_error(race_bundle_outcome(rx, async { Err(anyhow::Error::from(SniperError::Expired)) }).await);
        assert!(matches!(err, SniperError::Expired));
        assert_eq!(err.to_string(), "Transaction did not land");
    }

    /// Block Engine factice : les résultats sont injectés par le test.
    struct FakeEngine {
        feed: AsyncMutex<Option<mpsc::UnboundedReceiver<(String, BundleResult)>>>,
        tip_account: Pubkey,
        tip_failures: usize,
        tip_calls: AtomicUsize,
        hang_on_send: bool,
        send_calls: AtomicUsize,
        sent: Mutex<Vec<VersionedTransaction>>,
    }

    impl FakeEngine {
        fn new(feed: mpsc::UnboundedReceiver<(String, BundleResult)>) -> Self {
            Self {
                feed: AsyncMutex::new(Some(feed)),
                tip_account: Pubkey::new_unique(),
                tip_failures: 0,
                tip_calls: AtomicUsize::new(0),
                hang_on_send: false,
                send_calls: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BlockEngine for FakeEngine {
        async fn get_tip_accounts(&self) -> Result<Vec<Pubkey>> {
            if self.tip_calls.fetch_add(1, Ordering::SeqCst) < self.tip_failures {
                return Err(anyhow!("block engine indisponible"));
            }
            Ok(vec![self.tip_account])
        }

        async fn get_next_scheduled_leader(&self) -> Result<NextLeader> {
            Ok(NextLeader { current_slot: 10, next_leader_slot: 12, next_leader_identity: None })
        }

        async fn send_bundle(&self, transactions: &[VersionedTransaction]) -> Result<String> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_send {
                return std::future::pending().await;
            }
            self.sent.lock().unwrap().extend_from_slice(transactions);
            Ok("bundle".to_string())
        }

        async fn subscribe_bundle_results(&self, results: mpsc::UnboundedSender<(String, BundleResult)>) -> Result<()> {
            let Some(mut feed) = self.feed.lock().await.take() else {
                return std::future::pending().await;
            };
            while let Some(item) = feed.recv().await {
                if results.send(item).is_err() {
                    return Ok(());
                }
            }
            Err(anyhow!("flux terminé"))
        }
    }

    /// Relais branché sur `engine` et sur le RPC factice de solana-client (`rpc_url` choisit
    /// le statut des signatures : "succeeds", "sig_not_found", "instruction_error"...).
    fn relay_with(engine: Arc<FakeEngine>, rpc_url: &str) -> BundleRelay {
        let client = RpcClient::new_mock(rpc_url.to_string());
        let rpc = Arc::new(ResilientRpcClient::from_client(Arc::new(client), RetryOptions::ONCE));
        BundleRelay::new(engine, rpc, Arc::new(Keypair::new()))
    }

    fn relay(feed: mpsc::UnboundedReceiver<(String, BundleResult)>) -> BundleRelay {
        relay_with(Arc::new(FakeEngine::new(feed)), "succeeds")
    }

    fn payload(relay: &BundleRelay) -> Vec<Instruction> {
        vec![system_instruction::transfer(&relay.payer.pubkey(), &Pubkey::new_unique(), 1)]
    }

    async fn wait_registered(relay: &BundleRelay, bundle_id: &str) {
        loop {
            let registered = relay.dispatch.lock().unwrap().contains_key(bundle_id);
            if registered {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn results_are_dispatched_by_bundle_id_and_entries_removed() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let relay = relay(feed_rx);

        let (guard, mut results) = relay.register("b1");
        feed_tx.send(("other".to_string(), BundleResult::Accepted)).unwrap();
        feed_tx.send(("b1".to_string(), BundleResult::Rejected { reason: "dropped".into() })).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), results.recv()).await.unwrap();
        assert_eq!(result, Some(BundleResult::Rejected { reason: "dropped".into() }));

        assert!(relay.dispatch.lock().unwrap().contains_key("b1"));
        drop(guard);
        assert!(relay.dispatch.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tip_account_failure_sticks() {
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel();
        let mut engine = FakeEngine::new(feed_rx);
        engine.tip_failures = 1;
        let relay = relay_with(Arc::new(engine), "succeeds");

        assert!(relay.random_tip_account().await.is_err());
        // Le Block Engine répondrait maintenant, mais le premier échec est conservé.
        assert!(relay.random_tip_account().await.is_err());
        assert_eq!(relay.engine().get_next_scheduled_leader().await.unwrap().next_leader_slot, 12);
    }

    #[tokio::test]
    async fn confirmed_bundle_carries_the_tip_transfer() {
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(FakeEngine::new(feed_rx));
        let relay = relay_with(engine.clone(), "succeeds");

        let signature = relay.send_and_confirm(payload(&relay), 10_000, CommitmentConfig::confirmed()).await.unwrap();

        let sent = engine.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].signatures[0], signature);
        assert_eq!(sent[0].message.instructions().len(), 2);
        assert!(sent[0].message.static_account_keys().contains(&engine.tip_account));
        assert!(relay.dispatch.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_bundle_fails_and_clears_dispatch() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(FakeEngine::new(feed_rx));
        // Signature jamais confirmée : seul le rejet peut conclure.
        let relay = relay_with(engine.clone(), "sig_not_found");

        let (outcome, ()) = tokio::join!(
            relay.send_and_confirm(payload(&relay), 0, CommitmentConfig::confirmed()),
            async {
                wait_registered(&relay, "bundle").await;
                feed_tx.send(("bundle".to_string(), BundleResult::Rejected { reason: "simulation failure".into() })).unwrap();
            }
        );

        let err = sniper_error(outcome.map(|_| ()));
        assert!(matches!(err, SniperError::Rejected(reason) if reason == "simulation failure"));
        assert!(relay.dispatch.lock().unwrap().is_empty());

        // Sans tip, seule la charge utile est envoyée et aucun compte de tip n'est demandé.
        let sent = engine.sent.lock().unwrap().clone();
        assert_eq!(sent[0].message.instructions().len(), 1);
        assert_eq!(engine.tip_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chain_error_fails_and_clears_dispatch() {
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel();
        let relay = relay_with(Arc::new(FakeEngine::new(feed_rx)), "instruction_error");

        let outcome = relay.send_and_confirm(payload(&relay), 0, CommitmentConfig::confirmed()).await;
        let err = sniper_error(outcome.map(|_| ()));
        assert!(matches!(err, SniperError::Transaction(raw) if raw.contains("UninitializedAccount")));
        assert!(relay.dispatch.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_timeout_is_retried_three_times() {
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel();
        let mut engine = FakeEngine::new(feed_rx);
        engine.hang_on_send = true;
        let engine = Arc::new(engine);
        let mut relay = relay_with(engine.clone(), "succeeds");
        relay.send_timeout = Duration::from_millis(50);
        relay.send_retry = RetryOptions::new(3, Duration::from_millis(10));

        let outcome = relay.send_and_confirm(payload(&relay), 0, CommitmentConfig::confirmed()).await;
        let err = sniper_error(outcome.map(|_| ()));
        assert!(matches!(err, SniperError::Timeout(message) if message == "Send jito bundle timeout"));
        assert_eq!(engine.send_calls.load(Ordering::SeqCst), 4);
        assert!(relay.dispatch.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn relay_sends_with_the_default_timeout_and_retries() {
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel();
        let relay = relay(feed_rx);
        assert_eq!(relay.send_timeout, Duration::from_secs(5));
        assert_eq!(relay.send_retry, SEND_RETRY);
    }
}
