// DANS : src/bin/sniper.rs
//
// Écoute les créations de pools Raydium AMM v4 et les journalise jusqu'à Ctrl-C.

use anyhow::Result;
use sniper::{config::Config, filtering::PoolObserver, monitoring::setup_logging};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    setup_logging(&config.log_level);
    info!("Démarrage du sniper...");

    let observer = PoolObserver::new(config.transaction_ws_url.clone(), |pool| {
        info!(
            pool_id = %pool.id(),
            coin_mint = %pool.coin_mint(),
            open_time = ?pool.open_time(),
            init_sol_amount = ?pool.init_sol_amount(),
            "Nouveau pool détecté."
        );
    });
    observer.observe()?;
    info!("Observateur de pools lancé. Ctrl-C pour arrêter.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Impossible d'écouter Ctrl-C.");
    }

    info!("Arrêt demandé, déconnexion...");
    observer.disconnect().await;
    Ok(())
}
