// src/lib.rs

// On déclare tous nos modules principaux pour les rendre publics et
// utilisables par le binaire (src/bin/sniper.rs).
pub mod config;
pub mod decoders;
pub mod error;
pub mod execution;
pub mod filtering;
pub mod monitoring;
pub mod pool;
pub mod rpc;
