// DANS : src/decoders/raydium/amm_v4/initialize.rs

use solana_sdk::pubkey::Pubkey;

pub const INITIALIZE2_ACCOUNTS_LEN: usize = 21;

/// Comptes de l'instruction `initialize2`, dans l'ordre on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Initialize2Accounts {
    pub token_program: Pubkey,
    pub associated_token_program: Pubkey,
    pub system_program: Pubkey,
    pub rent: Pubkey,
    pub id: Pubkey,
    pub authority: Pubkey,
    pub open_orders: Pubkey,
    pub lp_mint: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub target_orders: Pubkey,
    pub config_id: Pubkey,
    pub fee_destination: Pubkey,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub user_wallet: Pubkey,
    pub user_base_vault: Pubkey,
    pub user_quote_vault: Pubkey,
    pub user_lp_vault: Pubkey,
}

/// `None` si la liste ne compte pas exactement 21 comptes.
pub fn parse_initialize2_accounts(accounts: &[Pubkey]) -> Option<Initialize2Accounts> {
    let [
        token_program, associated_token_program, system_program, rent,
        id, authority, open_orders, lp_mint, base_mint, quote_mint, base_vault, quote_vault,
        target_orders, config_id, fee_destination, market_program_id, market_id,
        user_wallet, user_base_vault, user_quote_vault, user_lp_vault,
    ] = *<&[Pubkey; INITIALIZE2_ACCOUNTS_LEN]>::try_from(accounts).ok()?;

    Some(Initialize2Accounts {
        token_program, associated_token_program, system_program, rent,
        id, authority, open_orders, lp_mint, base_mint, quote_mint, base_vault, quote_vault,
        target_orders, config_id, fee_destination, market_program_id, market_id,
        user_wallet, user_base_vault, user_quote_vault, user_lp_vault,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_accounts_by_position() {
        let keys: Vec<Pubkey> = (0..INITIALIZE2_ACCOUNTS_LEN).map(|_| Pubkey::new_unique()).collect();
        let parsed = parse_initialize2_accounts(&keys).unwrap();
        assert_eq!(parsed.id, keys[4]);
        assert_eq!(parsed.base_mint, keys[8]);
        assert_eq!(parsed.quote_mint, keys[9]);
        assert_eq!(parsed.market_program_id, keys[15]);
        assert_eq!(parsed.market_id, keys[16]);
        assert_eq!(parsed.user_lp_vault, keys[20]);
    }

    #[test]
    fn requires_exactly_21_accounts() {
        let keys: Vec<Pubkey> = (0..22).map(|_| Pubkey::new_unique()).collect();
        assert!(parse_initialize2_accounts(&keys[..20]).is_none());
        assert!(parse_initialize2_accounts(&keys).is_none());
    }
}
