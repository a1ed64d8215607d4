// DANS : src/filtering/screener.rs
//
// Suivi du prix d'un pool : abonnement aux logs qui le mentionnent, un prix par swap,
// et publication périodique de la médiane des prix collectés.

use crate::decoders::raydium::amm_v4::{compute_price_from_swap_event, find_swap_event};
use crate::pool::{CoinSide, Pool, Price};
use anyhow::{anyhow, bail, Context, Result};
use futures_util::{Stream, StreamExt};
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter},
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval, Interval, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);
/// Au-delà, les plus anciens échantillons sont abandonnés.
pub const MAX_SAMPLES: usize = 4096;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);

pub type PriceListener = Arc<dyn Fn(Price) + Send + Sync>;

/// Élément médian (`sorted[n / 2]`) ; `None` si vide.
pub fn median<T: Ord + Copy>(mut samples: Vec<T>) -> Option<T> {
    samples.sort_unstable();
    samples.get(samples.len() / 2).copied()
}

#[derive(Debug, Default)]
struct SampleBuffer {
    samples: VecDeque<Price>,
}

impl SampleBuffer {
    fn push(&mut self, price: Price) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(price);
    }

    /// Vide le buffer et renvoie la médiane des échantillons.
    fn take_median(&mut self) -> Option<Price> {
        median(self.samples.drain(..).collect())
    }
}

/// Notification de logs, réduite à ce que le screener utilise.
#[derive(Debug, Clone)]
pub struct LogUpdate {
    pub signature: String,
    pub failed: bool,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct PoolDecimals {
    pool_id: Pubkey,
    base_decimals: u8,
    quote_decimals: u8,
    coin_side: CoinSide,
}

impl PoolDecimals {
    fn price_of(&self, update: &LogUpdate) -> Option<Price> {
        let (pool_id, signature) = (self.pool_id, update.signature.as_str());
        if update.failed {
            return None;
        }
        let event = match find_swap_event(&update.logs) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!(%pool_id, signature, "Ignored transaction: ray log not found");
                return None;
            }
            Err(e) => {
                debug!(%pool_id, signature, error = %e, "Failed to parse swap ray log");
                return None;
            }
        };
        let price = compute_price_from_swap_event(&event, self.base_decimals, self.quote_decimals, self.coin_side);
        match price {
            Some(price) => trace!(%pool_id, signature, %price, "Got new price"),
            None => debug!(%pool_id, signature, ?event, "Prix incalculable pour ce swap"),
        }
        price
    }
}

struct Watching {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct PriceScreener {
    ws_url: String,
    pool: PoolDecimals,
    listener: PriceListener,
    watching: Mutex<Option<Watching>>,
}

impl PriceScreener {
    pub fn new(ws_url: String, pool: &Pool, listener: impl Fn(Price) + Send + Sync + 'static) -> Self {
        Self {
            ws_url,
            pool: PoolDecimals {
                pool_id: pool.id(),
                base_decimals: pool.info().base_decimals,
                quote_decimals: pool.info().quote_decimals,
                coin_side: pool.coin_side(),
            },
            listener: Arc::new(listener),
            watching: Mutex::new(None),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watching.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    /// S'abonne aux logs du pool (commitment `processed`) et publie la médiane toutes les `tick`.
    /// Échoue si le screener surveille déjà ou si le premier abonnement est refusé ; ensuite,
    /// toute coupure du flux est suivie d'un ré-abonnement jusqu'à `disconnect`.
    pub async fn watch(&self, tick: Duration) -> Result<()> {
        if self.is_watching() {
            bail!("Already in watching");
        }

        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ws_url, pool, listener) = (self.ws_url.clone(), self.pool, self.listener.clone());

        let task = tokio::spawn(run_screener(ws_url, pool, listener, tick, shutdown_rx, ready_tx));

        let ready = ready_rx.await.context("La tâche du screener s'est arrêtée avant l'abonnement");
        if let Err(e) = ready.and_then(|r| r) {
            task.abort();
            return Err(e);
        }

        if let Ok(mut watching) = self.watching.lock() {
            *watching = Some(Watching { shutdown: shutdown_tx, task });
        }
        Ok(())
    }

    /// Arrête le tick et se désabonne.
    pub async fn disconnect(&self) {
        let watching = self.watching.lock().ok().and_then(|mut w| w.take());
        if let Some(Watching { shutdown, task }) = watching {
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                warn!(pool_id = %self.pool.pool_id, error = %e, "La tâche du screener s'est terminée anormalement.");
            }
        }
    }
}

impl Drop for PriceScreener {
    fn drop(&mut self) {
        if let Ok(mut watching) = self.watching.lock() {
            if let Some(watching) = watching.take() {
                watching.task.abort();
            }
        }
    }
}

/// Fin d'une session d'abonnement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    StreamClosed,
}

/// Échantillons et tick, conservés d'une session d'abonnement à l'autre.
struct Screen {
    pool: PoolDecimals,
    listener: PriceListener,
    buffer: SampleBuffer,
    ticker: Interval,
}

impl Screen {
    async fn new(pool: PoolDecimals, listener: PriceListener, tick: Duration) -> Self {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        Self { pool, listener, buffer: SampleBuffer::default(), ticker }
    }

    fn publish(&mut self) {
        if let Some(price) = self.buffer.take_median() {
            let listener = &self.listener;
            if catch_unwind(AssertUnwindSafe(|| listener(price))).is_err() {
                debug!(pool_id = %self.pool.pool_id, "Callback error");
            }
        }
    }

    /// Échantillonne chaque notification et publie la médiane à chaque tick.
    async fn run(&mut self, updates: impl Stream<Item = LogUpdate>, shutdown: &mut oneshot::Receiver<()>) -> SessionEnd {
        let mut updates = std::pin::pin!(updates);
        loop {
            tokio::select! {
                _ = &mut *shutdown => return SessionEnd::Shutdown,
                update = updates.next() => match update {
                    Some(update) => {
                        if let Some(price) = self.pool.price_of(&update) {
                            self.buffer.push(price);
                        }
                    }
                    None => return SessionEnd::StreamClosed,
                },
                _ = self.ticker.tick() => self.publish(),
            }
        }
    }

    /// Attend `delay` en continuant de publier. `false` si l'arrêt est demandé entre-temps.
    async fn pause(&mut self, delay: Duration, shutdown: &mut oneshot::Receiver<()>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut *shutdown => return false,
                _ = &mut sleep => return true,
                _ = self.ticker.tick() => self.publish(),
            }
        }
    }
}

/// Signale l'échec d'un abonnement. `true` s'il s'agissait du premier : `watch` le remonte
/// et la tâche s'arrête.
fn report_failure(ready: &mut Option<oneshot::Sender<Result<()>>>, pool_id: &Pubkey, error: anyhow::Error) -> bool {
    match ready.take() {
        Some(ready) => {
            let _ = ready.send(Err(error));
            true
        }
        None => {
            let detail = format!("{:#}", error);
            warn!(%pool_id, error = %detail, "Ré-abonnement aux logs impossible, nouvel essai.");
            false
        }
    }
}

/// Tâche du screener : (ré)abonnement aux logs du pool jusqu'à l'arrêt.
async fn run_screener(
    ws_url: String,
    pool: PoolDecimals,
    listener: PriceListener,
    tick: Duration,
    mut shutdown: oneshot::Receiver<()>,
    ready: oneshot::Sender<Result<()>>,
) {
    let pool_id = pool.pool_id;
    let mut ready = Some(ready);
    let mut screen = Screen::new(pool, listener, tick).await;

    loop {
        let client = match PubsubClient::new(&ws_url).await {
            Ok(client) => client,
            Err(e) => {
                if report_failure(&mut ready, &pool_id, anyhow!(e).context("Connexion au websocket RPC impossible")) {
                    return;
                }
                if !screen.pause(RESUBSCRIBE_DELAY, &mut shutdown).await {
                    return;
                }
                continue;
            }
        };

        let filter = RpcTransactionLogsFilter::Mentions(vec![pool_id.to_string()]);
        let config = RpcTransactionLogsConfig { commitment: Some(CommitmentConfig::processed()) };
        let (stream, unsubscribe) = match client.logs_subscribe(filter, config).await {
            Ok(subscription) => subscription,
            Err(e) => {
                if report_failure(&mut ready, &pool_id, anyhow!(e).context("Échec de logsSubscribe")) {
                    return;
                }
                if !screen.pause(RESUBSCRIBE_DELAY, &mut shutdown).await {
                    return;
                }
                continue;
            }
        };
        if let Some(ready) = ready.take() {
            let _ = ready.send(Ok(()));
        }
        debug!(%pool_id, "Start watching screen");

        let updates = stream.map(|response| LogUpdate {
            signature: response.value.signature,
            failed: response.value.err.is_some(),
            logs: response.value.logs,
        });
        match screen.run(updates, &mut shutdown).await {
            SessionEnd::Shutdown => {
                let _ = tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, unsubscribe()).await;
                return;
            }
            SessionEnd::StreamClosed => {
                warn!(%pool_id, "Le flux de logs s'est terminé, ré-abonnement.");
                if !screen.pause(RESUBSCRIBE_DELAY, &mut shutdown).await {
                    return;
                }
            }
        }
    }
}
