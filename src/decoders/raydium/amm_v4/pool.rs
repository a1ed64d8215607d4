// DANS : src/decoders/raydium/amm_v4/pool.rs

use anyhow::{bail, Result};
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
};
use std::mem::size_of;

pub const RAYDIUM_AMM_V4_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");

/// Discriminateur de l'instruction SwapBaseIn.
const SWAP_BASE_IN_DISCRIMINATOR: u8 = 9;

// Les structures on-chain
#[repr(C, packed)] #[derive(Clone, Copy, Pod, Zeroable, Debug)] struct Fees { pub min_separate_numerator: u64, pub min_separate_denominator: u64, pub trade_fee_numerator: u64, pub trade_fee_denominator: u64, pub pnl_numerator: u64, pub pnl_denominator: u64, pub swap_fee_numerator: u64, pub swap_fee_denominator: u64, }
#[repr(C, packed)] #[derive(Clone, Copy, Pod, Zeroable, Debug)] struct OutPutData { pub need_take_pnl_coin: u64, pub need_take_pnl_pc: u64, pub total_pnl_pc: u64, pub total_pnl_coin: u64, pub pool_open_time: u64, pub punish_pc_amount: u64, pub punish_coin_amount: u64, pub orderbook_to_init_time: u64, pub swap_coin_in_amount: u128, pub swap_pc_out_amount: u128, pub swap_take_pc_fee: u64, pub swap_pc_in_amount: u128, pub swap_coin_out_amount: u128, pub swap_take_coin_fee: u64, }
#[repr(C, packed)] #[derive(Clone, Copy, Pod, Zeroable, Debug)] struct AmmInfoData { pub status: u64, pub nonce: u64, pub order_num: u64, pub depth: u64, pub coin_decimals: u64, pub pc_decimals: u64, pub state: u64, pub reset_flag: u64, pub min_size: u64, pub vol_max_cut_ratio: u64, pub amount_wave: u64, pub coin_lot_size: u64, pub pc_lot_size: u64, pub min_price_multiplier: u64, pub max_price_multiplier: u64, pub sys_decimal_value: u64, pub fees: Fees, pub out_put: OutPutData, pub token_coin: Pubkey, pub token_pc: Pubkey, pub coin_mint: Pubkey, pub pc_mint: Pubkey, pub lp_mint: Pubkey, pub open_orders: Pubkey, pub market: Pubkey, pub serum_dex: Pubkey, pub target_orders: Pubkey, pub withdraw_queue: Pubkey, pub token_temp_lp: Pubkey, pub amm_owner: Pubkey, pub lp_amount: u64, pub client_order_id: u64, pub padding: [u64; 2], }

/// Champs utiles d'un compte de pool AMM v4 (côté "coin" = base, côté "pc" = quote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAmmPool {
    pub address: Pubkey,
    pub nonce: u64,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub lp_mint: Pubkey,
    pub lp_amount: u64,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub market: Pubkey,
    pub market_program_id: Pubkey,
    /// En secondes, 0 si non planifié.
    pub pool_open_time: u64,
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<DecodedAmmPool> {
    if data.len() < size_of::<AmmInfoData>() {
        bail!("AMM V4 data length mismatch: {} octets, {} attendus.", data.len(), size_of::<AmmInfoData>());
    }
    let pool_struct: &AmmInfoData = from_bytes(&data[..size_of::<AmmInfoData>()]);
    if pool_struct.status == 0 {
        bail!("Pool {} is not initialized.", address);
    }

    let (coin_decimals, pc_decimals) = (pool_struct.coin_decimals, pool_struct.pc_decimals);
    let (Ok(base_decimals), Ok(quote_decimals)) = (u8::try_from(coin_decimals), u8::try_from(pc_decimals)) else {
        bail!("Décimales invalides pour le pool {}: {} / {}", address, coin_decimals, pc_decimals);
    };

    Ok(DecodedAmmPool {
        address: *address,
        nonce: pool_struct.nonce,
        base_mint: pool_struct.coin_mint,
        quote_mint: pool_struct.pc_mint,
        base_vault: pool_struct.token_coin,
        quote_vault: pool_struct.token_pc,
        base_decimals,
        quote_decimals,
        lp_mint: pool_struct.lp_mint,
        lp_amount: pool_struct.lp_amount,
        open_orders: pool_struct.open_orders,
        target_orders: pool_struct.target_orders,
        market: pool_struct.market,
        market_program_id: pool_struct.serum_dex,
        pool_open_time: pool_struct.out_put.pool_open_time,
    })
}

/// L'autorité du programme AMM v4, commune à tous les pools.
pub fn amm_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"amm authority"], &RAYDIUM_AMM_V4_PROGRAM_ID).0
}

/// Tous les comptes d'un pool et de son marché requis par un SwapBaseIn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmmSwapKeys {
    pub program_id: Pubkey,
    pub amm_id: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_authority: Pubkey,
}

impl AmmSwapKeys {
    pub fn create_swap_instruction(
        &self,
        user_source_token_account: &Pubkey,
        user_destination_token_account: &Pubkey,
        user_owner: &Pubkey,
        amount_in: u64,
        minimum_amount_out: u64,
    ) -> Instruction {
        let mut instruction_data = vec![SWAP_BASE_IN_DISCRIMINATOR];
        instruction_data.extend_from_slice(&amount_in.to_le_bytes());
        instruction_data.extend_from_slice(&minimum_amount_out.to_le_bytes());

        let keys = vec![
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new(self.amm_id, false),
            AccountMeta::new_readonly(amm_authority(), false),
            AccountMeta::new(self.open_orders, false),
            AccountMeta::new(self.target_orders, false),
            AccountMeta::new(self.base_vault, false),
            AccountMeta::new(self.quote_vault, false),
            AccountMeta::new_readonly(self.market_program_id, false),
            AccountMeta::new(self.market_id, false),
            AccountMeta::new(self.market_bids, false),
            AccountMeta::new(self.market_asks, false),
            AccountMeta::new(self.market_event_queue, false),
            AccountMeta::new(self.market_base_vault, false),
            AccountMeta::new(self.market_quote_vault, false),
            AccountMeta::new_readonly(self.market_authority, false),
            AccountMeta::new(*user_source_token_account, false),
            AccountMeta::new(*user_destination_token_account, false),
            AccountMeta::new_readonly(*user_owner, true),
        ];

        Instruction {
            program_id: self.program_id,
            accounts: keys,
            data: instruction_data,
        }
    }
}
