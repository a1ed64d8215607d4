// DANS : src/decoders/raydium/amm_v4/openbook_market.rs
//
// Marché OpenBook (layout Serum V3) adossé à un pool AMM v4.
// Le compte commence par 5 octets de padding ("serum") avant la struct.

use anyhow::{anyhow, Context, Result};
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey::Pubkey;
use std::mem::size_of;

const MARKET_HEAD_PADDING: usize = 5;

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct MarketStateV3 {
    pub account_flags: u64,
    pub own_address: Pubkey,
    pub vault_signer_nonce: u64,
    pub coin_mint: Pubkey,
    pub pc_mint: Pubkey,
    pub coin_vault: Pubkey,
    pub coin_deposits_total: u64,
    pub coin_fees_accrued: u64,
    pub pc_vault: Pubkey,
    pub pc_deposits_total: u64,
    pub pc_fees_accrued: u64,
    pub pc_dust_threshold: u64,
    pub req_q: Pubkey,
    pub event_q: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub coin_lot_size: u64,
    pub pc_lot_size: u64,
    pub fee_rate_bps: u64,
    pub referrer_rebates_accrued: u64,
}

/// Les comptes du marché nécessaires à un swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketState {
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub event_queue: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    /// PDA `[market, nonce_le]` du programme de marché.
    pub authority: Pubkey,
}

pub fn decode_market(market_id: &Pubkey, market_program_id: &Pubkey, data: &[u8]) -> Result<MarketState> {
    let market: &MarketStateV3 = from_bytes(
        data.get(MARKET_HEAD_PADDING..MARKET_HEAD_PADDING + size_of::<MarketStateV3>())
            .ok_or_else(|| anyhow!("Données du marché {} trop courtes", market_id))?,
    );

    let authority = market_vault_signer(market_id, market.vault_signer_nonce, market_program_id)?;
    Ok(MarketState {
        bids: market.bids,
        asks: market.asks,
        event_queue: market.event_q,
        base_vault: market.coin_vault,
        quote_vault: market.pc_vault,
        authority,
    })
}

pub fn market_vault_signer(market_id: &Pubkey, nonce: u64, market_program_id: &Pubkey) -> Result<Pubkey> {
    Pubkey::create_program_address(&[market_id.as_ref(), &nonce.to_le_bytes()], market_program_id)
        .with_context(|| format!("Nonce {} invalide pour l'autorité du marché {}", nonce, market_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::bytes_of;

    fn valid_nonce(market_id: &Pubkey, program_id: &Pubkey) -> u64 {
        (0..=255u64)
            .find(|nonce| market_vault_signer(market_id, *nonce, program_id).is_ok())
            .unwrap()
    }

    #[test]
    fn decodes_market_and_derives_authority() {
        let market_id = Pubkey::new_unique();
        let program_id = Pubkey::new_unique();
        let nonce = valid_nonce(&market_id, &program_id);

        let mut raw = MarketStateV3::zeroed();
        raw.own_address = market_id;
        raw.vault_signer_nonce = nonce;
        raw.coin_vault = Pubkey::new_unique();
        raw.pc_vault = Pubkey::new_unique();
        raw.event_q = Pubkey::new_unique();
        raw.bids = Pubkey::new_unique();
        raw.asks = Pubkey::new_unique();

        let mut data = b"serum".to_vec();
        data.extend_from_slice(bytes_of(&raw));
        data.extend_from_slice(b"padding");

        let market = decode_market(&market_id, &program_id, &data).unwrap();
        assert_eq!(market.bids, raw.bids);
        assert_eq!(market.asks, raw.asks);
        assert_eq!(market.event_queue, raw.event_q);
        assert_eq!(market.base_vault, raw.coin_vault);
        assert_eq!(market.quote_vault, raw.pc_vault);
        assert_eq!(
            market.authority,
            Pubkey::create_program_address(&[market_id.as_ref(), &nonce.to_le_bytes()], &program_id).unwrap()
        );
    }

    #[test]
    fn short_market_data_is_an_error() {
        assert!(decode_market(&Pubkey::new_unique(), &Pubkey::new_unique(), &[0u8; 64]).is_err());
    }
}
