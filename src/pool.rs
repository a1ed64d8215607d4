// DANS : src/pool.rs
//
// Modèle d'un pool AMM v4 apparié à WSOL. Immuable : tout l'état vivant
// (réserves, LP, marché, prix) est relu à la demande.

use crate::decoders::raydium::amm_v4::{
    decode_market, decode_pool, price_from_amounts, AmmSwapKeys, MarketState, RAYDIUM_AMM_V4_PROGRAM_ID,
};
use crate::error::SniperError;
use crate::rpc::ResilientRpcClient;
use anyhow::{Context, Result};
use fixed::types::U64F64;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

/// Prix en virgule fixe (SOL par coin).
pub type Price = U64F64;

pub const WSOL_MINT: Pubkey = spl_token::native_mint::ID;

/// Côté du pool qui porte le jeton échangé contre SOL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinSide {
    Base,
    Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub id: Pubkey,
    pub program_id: Pubkey,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    /// Millisecondes ; 0 équivaut à "non planifié".
    pub open_time: Option<u64>,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub init_base_amount: Option<u64>,
    pub init_quote_amount: Option<u64>,
    pub create_signers: Option<Vec<Pubkey>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    info: PoolInfo,
    coin_side: CoinSide,
}

impl Pool {
    /// Échoue sauf si exactement un des deux mints est WSOL.
    pub fn new(mut info: PoolInfo) -> Result<Self, SniperError> {
        let coin_side = match (info.base_mint == WSOL_MINT, info.quote_mint == WSOL_MINT) {
            (false, true) => CoinSide::Base,
            (true, false) => CoinSide::Quote,
            _ => {
                return Err(SniperError::validation(format!(
                    "Pair must include WSOL exactly once: {} / {}",
                    info.base_mint, info.quote_mint
                )));
            }
        };
        info.open_time = info.open_time.filter(|t| *t != 0);
        Ok(Self { info, coin_side })
    }

    /// Décode le compte du pool (commitment `processed`).
    pub async fn fetch_by_id(rpc: &ResilientRpcClient, id: Pubkey) -> Result<Self> {
        let account = rpc.get_account(&id, CommitmentConfig::processed()).await?;
        let decoded = decode_pool(&id, &account.data)?;

        let pool = Pool::new(PoolInfo {
            id,
            program_id: RAYDIUM_AMM_V4_PROGRAM_ID,
            market_program_id: decoded.market_program_id,
            market_id: decoded.market,
            open_orders: decoded.open_orders,
            target_orders: decoded.target_orders,
            open_time: decoded.pool_open_time.checked_mul(1000),
            base_mint: decoded.base_mint,
            quote_mint: decoded.quote_mint,
            lp_mint: decoded.lp_mint,
            base_vault: decoded.base_vault,
            quote_vault: decoded.quote_vault,
            base_decimals: decoded.base_decimals,
            quote_decimals: decoded.quote_decimals,
            init_base_amount: None,
            init_quote_amount: None,
            create_signers: None,
        })?;
        Ok(pool)
    }

    pub fn info(&self) -> &PoolInfo {
        &self.info
    }

    pub fn id(&self) -> Pubkey {
        self.info.id
    }

    pub fn coin_side(&self) -> CoinSide {
        self.coin_side
    }

    pub fn open_time(&self) -> Option<u64> {
        self.info.open_time
    }

    fn pick<T>(&self, base: T, quote: T) -> T {
        match self.coin_side {
            CoinSide::Base => base,
            CoinSide::Quote => quote,
        }
    }

    pub fn coin_mint(&self) -> Pubkey {
        self.pick(self.info.base_mint, self.info.quote_mint)
    }

    pub fn sol_mint(&self) -> Pubkey {
        self.pick(self.info.quote_mint, self.info.base_mint)
    }

    pub fn coin_decimals(&self) -> u8 {
        self.pick(self.info.base_decimals, self.info.quote_decimals)
    }

    pub fn sol_decimals(&self) -> u8 {
        self.pick(self.info.quote_decimals, self.info.base_decimals)
    }

    pub fn coin_vault(&self) -> Pubkey {
        self.pick(self.info.base_vault, self.info.quote_vault)
    }

    pub fn sol_vault(&self) -> Pubkey {
        self.pick(self.info.quote_vault, self.info.base_vault)
    }

    pub fn init_coin_amount(&self) -> Option<u64> {
        self.pick(self.info.init_base_amount, self.info.init_quote_amount)
    }

    pub fn init_sol_amount(&self) -> Option<u64> {
        self.pick(self.info.init_quote_amount, self.info.init_base_amount)
    }

    pub async fn base_reserve(&self, rpc: &ResilientRpcClient) -> Result<u64> {
        rpc.get_token_account_balance(&self.info.base_vault, CommitmentConfig::processed()).await
    }

    pub async fn quote_reserve(&self, rpc: &ResilientRpcClient) -> Result<u64> {
        rpc.get_token_account_balance(&self.info.quote_vault, CommitmentConfig::processed()).await
    }

    pub async fn coin_reserve(&self, rpc: &ResilientRpcClient) -> Result<u64> {
        match self.coin_side {
            CoinSide::Base => self.base_reserve(rpc).await,
            CoinSide::Quote => self.quote_reserve(rpc).await,
        }
    }

    pub async fn sol_reserve(&self, rpc: &ResilientRpcClient) -> Result<u64> {
        match self.coin_side {
            CoinSide::Base => self.quote_reserve(rpc).await,
            CoinSide::Quote => self.base_reserve(rpc).await,
        }
    }

    /// Offre de LP, relue depuis le compte du pool.
    pub async fn lp_reserve(&self, rpc: &ResilientRpcClient) -> Result<u64> {
        let account = rpc.get_account(&self.info.id, CommitmentConfig::processed()).await?;
        Ok(decode_pool(&self.info.id, &account.data)?.lp_amount)
    }

    pub async fn market_state(&self, rpc: &ResilientRpcClient) -> Result<MarketState> {
        let account = rpc
            .get_account(&self.info.market_id, CommitmentConfig::processed())
            .await
            .context("Market info account not found")?;
        decode_market(&self.info.market_id, &self.info.market_program_id, &account.data)
    }

    /// Prix spot d'un coin en SOL, à partir des deux réserves lues en parallèle.
    pub async fn price(&self, rpc: &ResilientRpcClient) -> Result<Price> {
        let (coin_reserve, sol_reserve) = tokio::try_join!(self.coin_reserve(rpc), self.sol_reserve(rpc))?;
        price_from_amounts(coin_reserve, self.coin_decimals(), sol_reserve, self.sol_decimals()).ok_or_else(|| {
            SniperError::validation(format!("Prix indéfini pour le pool {} (réserve coin: {})", self.info.id, coin_reserve))
                .into()
        })
    }

    /// Comptes du swap, une fois l'état du marché connu.
    pub fn swap_keys(&self, market: &MarketState) -> AmmSwapKeys {
        AmmSwapKeys {
            program_id: self.info.program_id,
            amm_id: self.info.id,
            open_orders: self.info.open_orders,
            target_orders: self.info.target_orders,
            base_vault: self.info.base_vault,
            quote_vault: self.info.quote_vault,
            market_program_id: self.info.market_program_id,
            market_id: self.info.market_id,
            market_bids: market.bids,
            market_asks: market.asks,
            market_event_queue: market.event_queue,
            market_base_vault: market.base_vault,
            market_quote_vault: market.quote_vault,
            market_authority: market.authority,
        }
    }
}
