// DANS : src/execution/mod.rs

pub mod block_engine; // Accès au Block Engine Jito.
pub mod bundle; // Soumission en bundle et course confirmation / rejet.
pub mod routing; // Choix du mode de soumission.
pub mod swap;
pub mod transaction_builder;

pub use block_engine::{BlockEngine, BundleResult, JsonRpcBlockEngine, NextLeader};
pub use bundle::BundleRelay;
pub use routing::{resolve_mode, SwapMode};
pub use swap::{SwapExecutor, SwapReceipt, SwapRequest};
pub use transaction_builder::compute_min_amount_out;
