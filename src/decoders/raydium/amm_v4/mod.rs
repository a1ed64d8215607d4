// DANS : src/decoders/raydium/amm_v4/mod.rs

pub mod errors;
pub mod events;
pub mod initialize;
pub mod openbook_market;
pub mod pool;

pub use errors::{classify_error, AmmErrorKind};
pub use events::{
    compute_price_from_swap_event, find_init_event, find_swap_event, price_from_amounts, InitLog, RayLog, SwapDirection,
    SwapEvent,
};
pub use initialize::{parse_initialize2_accounts, Initialize2Accounts};
pub use openbook_market::{decode_market, MarketState};
pub use pool::{amm_authority, decode_pool, AmmSwapKeys, DecodedAmmPool, RAYDIUM_AMM_V4_PROGRAM_ID};
