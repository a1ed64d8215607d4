// DANS : src/filtering/mod.rs

// Détection des nouveaux pools et suivi du prix d'un pool.
pub mod observer;
pub mod screener;

pub use observer::{ObserverState, PoolObserver};
pub use screener::PriceScreener;
