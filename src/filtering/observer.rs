// DANS : src/filtering/observer.rs
//
// Détection des nouveaux pools AMM v4 via `transactionSubscribe` (websocket "enhanced").

use crate::decoders::raydium::amm_v4::{
    find_init_event, parse_initialize2_accounts, RAYDIUM_AMM_V4_PROGRAM_ID,
};
use crate::pool::{Pool, PoolInfo, WSOL_MINT};
use anyhow::{bail, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{pubkey, pubkey::Pubkey};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    str::FromStr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

/// Compte de frais payé à chaque création de pool AMM v4.
pub const CREATE_POOL_FEE_ACCOUNT: Pubkey = pubkey!("7YttLkHDoNj9wyDur5pM1ejNaAvT9X4eqaYcHQqtj2G5");

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub type PoolListener = Arc<dyn Fn(Pool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Disconnected,
    Connecting,
    Subscribed,
}

// --- Format des notifications (encoding jsonParsed) ---

#[derive(Debug, Deserialize)]
struct TransactionNotification {
    params: NotificationParams,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    transaction: RawTransaction,
}

#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    pub transaction: ParsedTransaction,
    #[serde(default)]
    pub meta: Option<ParsedMeta>,
}

#[derive(Debug, Deserialize)]
pub struct ParsedTransaction {
    #[serde(default)]
    pub signatures: Vec<String>,
    pub message: ParsedMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub account_keys: Vec<ParsedAccountKey>,
    pub instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Deserialize)]
pub struct ParsedAccountKey {
    pub pubkey: String,
    #[serde(default)]
    pub signer: bool,
    #[serde(default)]
    pub writable: bool,
}

/// Les instructions décodées par le nœud (`parsed`) n'ont pas de liste `accounts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInstruction {
    pub program_id: String,
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
}

/// Requête d'abonnement envoyée à chaque ouverture du websocket.
pub fn subscribe_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "transactionSubscribe",
        "params": [
            {
                "accountRequired": [CREATE_POOL_FEE_ACCOUNT.to_string(), RAYDIUM_AMM_V4_PROGRAM_ID.to_string()],
                "failed": false,
            },
            {
                "commitment": "processed",
                "encoding": "jsonParsed",
                "transactionDetails": "full",
                "showRewards": false,
                "maxSupportedTransactionVersion": 0,
            }
        ]
    })
}

/// Observe les créations de pools et appelle le listener pour chaque pool WSOL détecté.
pub struct PoolObserver {
    ws_url: String,
    listener: PoolListener,
    state: Arc<watch::Sender<ObserverState>>,
    stop: Arc<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PoolObserver {
    pub fn new(ws_url: String, listener: impl Fn(Pool) + Send + Sync + 'static) -> Self {
        Self {
            ws_url,
            listener: Arc::new(listener),
            state: Arc::new(watch::channel(ObserverState::Disconnected).0),
            stop: Arc::new(watch::channel(false).0),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ObserverState {
        *self.state.borrow()
    }

    /// Démarre la connexion en tâche de fond. Échoue si l'observer n'est pas `Disconnected`.
    pub fn observe(&self) -> Result<()> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == ObserverState::Disconnected {
                *state = ObserverState::Connecting;
                started = true;
            }
            started
        });
        if !started {
            bail!("Already in observing");
        }

        self.stop.send_replace(false);
        let task = tokio::spawn(run_observer(
            self.ws_url.clone(),
            self.listener.clone(),
            self.state.clone(),
            self.stop.subscribe(),
        ));
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
        Ok(())
    }

    /// Ferme le stream actif. Aucune reconnexion n'a lieu ensuite.
    pub async fn disconnect(&self) {
        self.stop.send_replace(true);
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "La tâche de l'observer s'est terminée anormalement.");
            }
        }
        self.state.send_replace(ObserverState::Disconnected);
    }
}

impl Drop for PoolObserver {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Résout dès que l'arrêt est demandé (ou que l'observer a disparu).
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

fn is_stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

async fn run_observer(
    ws_url: String,
    listener: PoolListener,
    state: Arc<watch::Sender<ObserverState>>,
    mut stop: watch::Receiver<bool>,
) {
    while !is_stopped(&stop) {
        state.send_replace(ObserverState::Connecting);

        let connected = tokio::select! {
            _ = stopped(&mut stop) => break,
            connected = connect_async(ws_url.as_str()) => connected,
        };
        let ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!(error = %e, "Observer websocket error");
                tokio::select! {
                    _ = stopped(&mut stop) => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                }
            }
        };

        let (mut write, mut read) = ws_stream.split();
        if let Err(e) = write.send(Message::Text(subscribe_request().to_string())).await {
            warn!(error = %e, "Échec de l'envoi de transactionSubscribe, reconnexion.");
            continue;
        }

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => {
                    let _ = write.close().await;
                    debug!("Observer websocket fermé à la demande.");
                    break;
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => handle_message(&text, &listener, &state),
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "Observer websocket closed, reconnecting");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Observer websocket error");
                        break;
                    }
                    None => {
                        warn!("Observer websocket closed, reconnecting");
                        break;
                    }
                },
            }
        }
    }
    state.send_replace(ObserverState::Disconnected);
}

fn handle_message(text: &str, listener: &PoolListener, state: &watch::Sender<ObserverState>) {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, data = text, "Failed to parse websocket message");
            return;
        }
    };

    if message.get("method").and_then(Value::as_str) == Some("transactionNotification") {
        let notification: TransactionNotification = match serde_json::from_value(message) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %e, "Notification de transaction illisible");
                return;
            }
        };
        if let Some(pool) = process_transaction(&notification.params.result.transaction) {
            dispatch(listener, pool);
        }
    } else if message.get("result").is_some_and(|r| !r.is_null()) {
        state.send_replace(ObserverState::Subscribed);
        info!("Start observing for new pool");
    } else {
        trace!(%message, "Received unknown message");
    }
}

fn dispatch(listener: &PoolListener, pool: Pool) {
    let pool_id = pool.id();
    if catch_unwind(AssertUnwindSafe(|| listener(pool))).is_err() {
        warn!(%pool_id, "Callback error");
    }
}

/// Filtre une transaction et construit le `Pool` s'il s'agit d'une création de pool WSOL valide.
pub fn process_transaction(transaction: &RawTransaction) -> Option<Pool> {
    let started = Instant::now();
    let signature = transaction.transaction.signatures.first().map(String::as_str).unwrap_or_default();
    trace!(signature, "Processing transaction");

    let Some(meta) = &transaction.meta else {
        trace!(signature, "Ignored transaction: missing transaction meta");
        return None;
    };
    if let Some(err) = meta.err.as_ref().filter(|err| !err.is_null()) {
        trace!(signature, %err, "Ignored transaction: found error logs");
        return None;
    }
    let Some(logs) = &meta.log_messages else {
        trace!(signature, "Ignored transaction: missing transaction logs");
        return None;
    };

    let init = match find_init_event(logs) {
        Ok(Some(init)) => init,
        Ok(None) => {
            trace!(signature, "Ignored transaction: ray log not found");
            return None;
        }
        Err(e) => {
            debug!(signature, error = %e, "Failed to parse init ray log");
            return None;
        }
    };

    let program_id = RAYDIUM_AMM_V4_PROGRAM_ID.to_string();
    let Some(instruction) = transaction.transaction.message.instructions.iter().find(|ix| ix.program_id == program_id)
    else {
        trace!(signature, "Ignored transaction: could not found initialize2 instruction");
        return None;
    };
    let Some(raw_accounts) = &instruction.accounts else {
        trace!(signature, "Ignored transaction: unexpected instruction format");
        return None;
    };

    let accounts = match raw_accounts.iter().map(|a| Pubkey::from_str(a)).collect::<Result<Vec<_>, _>>() {
        Ok(accounts) => accounts,
        Err(e) => {
            debug!(signature, error = %e, "Failed to parse initialize instruction accounts");
            return None;
        }
    };
    let Some(accounts) = parse_initialize2_accounts(&accounts) else {
        debug!(signature, count = accounts.len(), "Failed to parse initialize instruction accounts");
        return None;
    };

    if accounts.base_mint != WSOL_MINT && accounts.quote_mint != WSOL_MINT {
        trace!(signature, quote_mint = %accounts.quote_mint, "Ignored transaction: pair does not include WSOL");
        return None;
    }

    let create_signers = transaction
        .transaction
        .message
        .account_keys
        .iter()
        .filter(|key| key.signer)
        .filter_map(|key| Pubkey::from_str(&key.pubkey).ok())
        .collect();

    let pool = match Pool::new(PoolInfo {
        id: accounts.id,
        program_id: RAYDIUM_AMM_V4_PROGRAM_ID,
        market_program_id: accounts.market_program_id,
        market_id: accounts.market_id,
        open_orders: accounts.open_orders,
        target_orders: accounts.target_orders,
        open_time: init.open_time.checked_mul(1000),
        base_mint: accounts.base_mint,
        quote_mint: accounts.quote_mint,
        lp_mint: accounts.lp_mint,
        base_vault: accounts.base_vault,
        quote_vault: accounts.quote_vault,
        base_decimals: init.base_decimals,
        quote_decimals: init.quote_decimals,
        init_base_amount: Some(init.base_amount),
        init_quote_amount: Some(init.quote_amount),
        create_signers: Some(create_signers),
    }) {
        Ok(pool) => pool,
        Err(e) => {
            debug!(signature, error = %e, "Pool invalide");
            return None;
        }
    };

    trace!(signature, pool_id = %pool.id(), duration = ?started.elapsed(), "Got init pool info");
    Some(pool)
}
