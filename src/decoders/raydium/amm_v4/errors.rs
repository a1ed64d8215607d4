// DANS : src/decoders/raydium/amm_v4/errors.rs
//
// Classification des erreurs renvoyées par le programme AMM v4.

use crate::error::ProgramError;
use lazy_static::lazy_static;
use regex::Regex;

macro_rules! amm_errors {
    ($($name:ident),+ $(,)?) => {
        /// Codes `Custom(N)` du programme AMM v4, dans l'ordre on-chain.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AmmErrorKind {
            $($name,)+
            UnknownAmmError,
        }

        impl AmmErrorKind {
            const TABLE: &'static [AmmErrorKind] = &[$(AmmErrorKind::$name,)+];

            pub fn name(&self) -> &'static str {
                match self {
                    $(AmmErrorKind::$name => stringify!($name),)+
                    AmmErrorKind::UnknownAmmError => "UnknownAmmError",
                }
            }
        }
    };
}

amm_errors!(
    AlreadyInUse,
    InvalidProgramAddress,
    ExpectedMint,
    ExpectedAccount,
    InvalidCoinVault,
    InvalidPCVault,
    InvalidTokenLP,
    InvalidDestTokenCoin,
    InvalidDestTokenPC,
    InvalidPoolMint,
    InvalidOpenOrders,
    InvalidMarket,
    InvalidMarketProgram,
    InvalidTargetOrders,
    AccountNeedWriteable,
    AccountNeedReadOnly,
    InvalidCoinMint,
    InvalidPCMint,
    InvalidOwner,
    InvalidSupply,
    InvalidDelegate,
    InvalidSignAccount,
    InvalidStatus,
    InvalidInstruction,
    WrongAccountsNumber,
    InvalidTargetAccountOwner,
    InvalidTargetOwner,
    InvalidAmmAccountOwner,
    InvalidParamsSet,
    InvalidInput,
    ExceededSlippage,
    CalculationExRateFailure,
    CheckedSubOverflow,
    CheckedAddOverflow,
    CheckedMulOverflow,
    CheckedDivOverflow,
    CheckedEmptyFunds,
    CalcPnlError,
    InvalidSplTokenProgram,
    TakePnlError,
    InsufficientFunds,
    ConversionFailure,
    InvalidUserToken,
    InvalidSrmMint,
    InvalidSrmToken,
    TooManyOpenOrders,
    OrderAtSlotIsPlaced,
    InvalidSysProgramAddress,
    InvalidFee,
    RepeatCreateAmm,
    NotAllowZeroLP,
    InvalidCloseAuthority,
    InvalidFreezeAuthority,
    InvalidReferPCMint,
    InvalidConfigAccount,
    RepeatCreateConfigAccount,
    MarketLotSizeIsTooLarge,
    InitLpAmountTooLess,
);

impl AmmErrorKind {
    pub fn from_code(code: u64) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|index| Self::TABLE.get(index))
            .copied()
            .unwrap_or(AmmErrorKind::UnknownAmmError)
    }
}

lazy_static! {
    static ref GENERIC_ERROR_RE: Regex = Regex::new(r"Program log: Error: ([\w\s]+)").unwrap();
    static ref CUSTOM_HEX_RE: Regex = Regex::new(r"custom\sprogram\serror:\s(0x\w+)").unwrap();
    static ref CUSTOM_JSON_RE: Regex = Regex::new(r#"\{"Custom":(\d+)\}"#).unwrap();
}

fn parse_code(raw: &str) -> Option<u64> {
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Reconnaît une erreur de programme dans un message d'erreur brut (erreur de transaction
/// sérialisée ou logs joints). `None` si rien n'est reconnu.
pub fn classify_error(message: &str) -> Option<ProgramError> {
    if let Some(caps) = GENERIC_ERROR_RE.captures(message) {
        return Some(ProgramError::Generic(caps[1].to_string()));
    }

    let raw_code = CUSTOM_HEX_RE
        .captures(message)
        .or_else(|| CUSTOM_JSON_RE.captures(message))
        .map(|caps| caps[1].to_string())?;
    let kind = parse_code(&raw_code).map_or(AmmErrorKind::UnknownAmmError, AmmErrorKind::from_code);
    Some(ProgramError::Amm(kind))
}
