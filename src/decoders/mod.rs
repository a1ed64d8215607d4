// src/decoders/mod.rs

// Décodeurs on-chain : seul Raydium AMM v4 (et son marché OpenBook) est supporté.
pub mod raydium;
