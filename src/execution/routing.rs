// DANS : src/execution/routing.rs
//
// Choix du chemin de soumission d'un swap.

use crate::error::SniperError;
use crate::execution::block_engine::BlockEngine;
use anyhow::Result;
use serde::Deserialize;
use std::{fmt, str::FromStr};
use tracing::{debug, warn};

/// Un leader relais à moins de 5 slots justifie l'envoi en bundle.
pub const LEADER_PROXIMITY_SLOTS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapMode {
    /// Diffusion RPC classique.
    Direct,
    /// Bundle Jito.
    Relay,
    /// `Relay` si le prochain leader relais est proche, `Direct` sinon.
    Auto,
    /// Simulation seule, rien n'est diffusé.
    Simulate,
}

impl fmt::Display for SwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapMode::Direct => "direct",
            SwapMode::Relay => "relay",
            SwapMode::Auto => "auto",
            SwapMode::Simulate => "simulate",
        };
        f.write_str(name)
    }
}

impl FromStr for SwapMode {
    type Err = SniperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "normal" => Ok(SwapMode::Direct),
            "relay" | "jito" => Ok(SwapMode::Relay),
            "auto" => Ok(SwapMode::Auto),
            "simulate" => Ok(SwapMode::Simulate),
            other => Err(SniperError::validation(format!("Mode de swap inconnu: {}", other))),
        }
    }
}

/// Mode effectif. `warning` porte l'échec non fatal de la résolution `Auto`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMode {
    pub mode: SwapMode,
    pub warning: Option<String>,
}

impl ResolvedMode {
    fn plain(mode: SwapMode) -> Self {
        Self { mode, warning: None }
    }
}

/// Résout `Auto` à partir du calendrier des leaders. Sans Block Engine, `Auto` devient `Direct`
/// et `Relay` est refusé.
pub async fn resolve_mode(requested: SwapMode, engine: Option<&dyn BlockEngine>) -> Result<ResolvedMode> {
    match (requested, engine) {
        (SwapMode::Relay, None) => {
            Err(SniperError::validation("Mode relay demandé sans Block Engine configuré").into())
        }
        (SwapMode::Auto, None) => Ok(ResolvedMode::plain(SwapMode::Direct)),
        (SwapMode::Auto, Some(engine)) => match engine.get_next_scheduled_leader().await {
            Ok(leader) => {
                let gap = leader.next_leader_slot.saturating_sub(leader.current_slot);
                let mode = if gap < LEADER_PROXIMITY_SLOTS { SwapMode::Relay } else { SwapMode::Direct };
                debug!(
                    current_slot = leader.current_slot,
                    next_leader_slot = leader.next_leader_slot,
                    %mode,
                    "Mode auto résolu."
                );
                Ok(ResolvedMode::plain(mode))
            }
            Err(e) => {
                warn!(error = %e, "Calendrier des leaders Jito indisponible, repli sur le mode direct.");
                Ok(ResolvedMode {
                    mode: SwapMode::Direct,
                    warning: Some(format!("Failed to get jito leader schedule: {:#}", e)),
                })
            }
        },
        (mode, _) => Ok(ResolvedMode::plain(mode)),
    }
}
