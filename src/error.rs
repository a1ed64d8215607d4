// DANS : src/error.rs

use crate::decoders::raydium::amm_v4::errors::AmmErrorKind;
use thiserror::Error;

/// Erreur de décodage d'un `ray_log` (base64 invalide, buffer trop court, discriminant inconnu).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("ray_log base64 invalide: {0}")]
    Base64(String),
    #[error("ray_log vide")]
    Empty,
    #[error("discriminant de ray_log inconnu: {0}")]
    UnknownDiscriminant(u8),
    #[error("ray_log {variant} trop court: {len} octets, {expected} attendus")]
    TooShort {
        variant: &'static str,
        len: usize,
        expected: usize,
    },
    #[error("direction de swap inconnue: {0}")]
    UnknownDirection(u64),
}

/// Erreur on-chain reconnue dans les logs ou l'erreur de transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// `Program log: Error: <message>`
    #[error("{0}")]
    Generic(String),
    /// Code `Custom(N)` du programme AMM v4.
    #[error("AmmError: {}", .0.name())]
    Amm(AmmErrorKind),
}

/// Taxonomie des erreurs du coeur. Les fonctions publiques renvoient `anyhow::Result`,
/// ces valeurs sont récupérables par `downcast_ref::<SniperError>()`.
#[derive(Debug, Error)]
pub enum SniperError {
    #[error("erreur de transport: {0}")]
    Transport(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("Transaction did not land")]
    Expired,
    #[error("{0}")]
    Timeout(String),
    #[error("Jito bundle has been rejected: {0}")]
    Rejected(String),
    #[error("Can not find swap log in the transaction")]
    SwapLogNotFound,
}

impl SniperError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
