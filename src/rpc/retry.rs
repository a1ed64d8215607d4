// DANS : src/rpc/retry.rs
//
// Primitives génériques utilisées par tous les appels réseau : ré-essai borné,
// rafraîchissement périodique d'une valeur et délai maximal.

use crate::error::SniperError;
use anyhow::{anyhow, Result};
use arc_swap::ArcSwapOption;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::warn;

/// Paramètres de ré-essai : `retries` tentatives supplémentaires, espacées d'au moins `min_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    pub retries: usize,
    pub min_interval: Duration,
}

impl RetryOptions {
    /// Une seule tentative.
    pub const ONCE: RetryOptions = RetryOptions { retries: 0, min_interval: Duration::ZERO };

    pub const fn new(retries: usize, min_interval: Duration) -> Self {
        Self { retries, min_interval }
    }

    /// Ré-essais illimités (abonnements longue durée).
    pub const fn forever(min_interval: Duration) -> Self {
        Self { retries: usize::MAX, min_interval }
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::ONCE
    }
}

pub async fn retry<T, E, F, Fut>(op: F, options: &RetryOptions) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with(op, options, |_| {}).await
}

/// Exécute `op` jusqu'à `retries + 1` fois. `on_reject` est appelé après chaque échec.
/// Une tentative ratée plus courte que `min_interval` est complétée par une attente avant la suivante.
pub async fn retry_with<T, E, F, Fut, R>(mut op: F, options: &RetryOptions, mut on_reject: R) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E),
{
    let mut attempt: usize = 0;
    loop {
        let started = Instant::now();
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                on_reject(&e);
                if attempt >= options.retries {
                    return Err(e);
                }
                let elapsed = started.elapsed();
                if elapsed < options.min_interval {
                    tokio::time::sleep(options.min_interval - elapsed).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Résout avec le résultat de `fut`, ou échoue avec `error` (ou une `Timeout` par défaut) après `duration`.
pub async fn timeout<T, F>(fut: F, duration: Duration, error: Option<SniperError>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(error
            .unwrap_or_else(|| SniperError::Timeout(format!("Aucun résultat après {:?}", duration)))
            .into()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    pub interval: Duration,
    /// Double l'intervalle à chaque cycle.
    pub exponential: bool,
    pub retry: RetryOptions,
}

impl RefreshOptions {
    pub fn every(interval: Duration) -> Self {
        Self { interval, exponential: false, retry: RetryOptions::ONCE }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RefreshStatus {
    Pending,
    Ready,
    Failed(String),
}

/// Valeur rafraîchie en tâche de fond, indépendamment de la demande.
pub struct Refresher<T> {
    latest: Arc<ArcSwapOption<T>>,
    status: watch::Receiver<RefreshStatus>,
    task: JoinHandle<()>,
}

/// Démarre immédiatement la production d'une valeur puis la rafraîchit toutes les `interval`.
pub fn refresh<T, F, Fut>(op: F, options: RefreshOptions) -> Refresher<T>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let latest: Arc<ArcSwapOption<T>> = Arc::new(ArcSwapOption::empty());
    let (status_tx, status_rx) = watch::channel(RefreshStatus::Pending);

    let latest_clone = latest.clone();
    let task = tokio::spawn(async move {
        let mut interval = options.interval;
        loop {
            if options.exponential {
                interval = interval.saturating_mul(2);
            }
            let next_refresh = Instant::now() + interval;

            match retry(&op, &options.retry).await {
                Ok(value) => {
                    latest_clone.store(Some(Arc::new(value)));
                    status_tx.send_replace(RefreshStatus::Ready);
                }
                Err(e) => {
                    warn!(error = %e, "Échec du rafraîchissement périodique.");
                    // On garde la dernière valeur valide si elle existe.
                    if latest_clone.load().is_none() {
                        status_tx.send_replace(RefreshStatus::Failed(format!("{:#}", e)));
                    }
                }
            }

            tokio::time::sleep_until(next_refresh).await;
        }
    });

    Refresher { latest, status: status_rx, task }
}

impl<T> Refresher<T> {
    /// Dernière valeur résolue. Attend la première production si elle n'est pas encore terminée.
    pub async fn get(&self) -> Result<Arc<T>> {
        let mut status = self.status.clone();
        let failure = {
            let current = status
                .wait_for(|s| *s != RefreshStatus::Pending)
                .await
                .map_err(|_| anyhow!("Rafraîchissement arrêté avant la première valeur"))?;
            match &*current {
                RefreshStatus::Failed(reason) => Some(reason.clone()),
                _ => None,
            }
        };

        if let Some(value) = self.latest.load_full() {
            return Ok(value);
        }
        Err(anyhow!(failure.unwrap_or_else(|| "Aucune valeur disponible".to_string())))
    }

    /// Dernière valeur connue, sans attendre.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.latest.load_full()
    }

    /// Arrête la planification. La dernière valeur reste lisible.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl<T> Drop for Refresher<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
