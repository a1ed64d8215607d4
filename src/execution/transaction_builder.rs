// DANS : src/execution/transaction_builder.rs

use crate::decoders::raydium::amm_v4::AmmSwapKeys;
use crate::pool::WSOL_MINT;
use anyhow::{Context, Result};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{Message, VersionedMessage},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_instruction,
    transaction::VersionedTransaction,
};
use spl_associated_token_account::{get_associated_token_address, instruction::create_associated_token_account_idempotent};

pub const SWAP_COMPUTE_UNIT_LIMIT: u32 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapAmounts {
    pub mint_in: Pubkey,
    pub mint_out: Pubkey,
    pub amount_in: u64,
    pub min_amount_out: u64,
}

/// Instructions d'un swap AMM v4 pour `owner` : ATA d'entrée (+ wrap si WSOL), ATA de sortie,
/// swap, puis fermeture de l'ATA d'entrée (et de sortie si WSOL).
pub fn build_swap_instructions(keys: &AmmSwapKeys, amounts: &SwapAmounts, owner: &Pubkey) -> Result<Vec<Instruction>> {
    let token_program = spl_token::id();
    let token_account_in = get_associated_token_address(owner, &amounts.mint_in);
    let token_account_out = get_associated_token_address(owner, &amounts.mint_out);

    let mut instructions = vec![create_associated_token_account_idempotent(
        owner,
        owner,
        &amounts.mint_in,
        &token_program,
    )];
    if amounts.mint_in == WSOL_MINT {
        instructions.push(system_instruction::transfer(owner, &token_account_in, amounts.amount_in));
        instructions.push(
            spl_token::instruction::sync_native(&token_program, &token_account_in)
                .context("Construction de sync_native impossible")?,
        );
    }
    instructions.push(create_associated_token_account_idempotent(
        owner,
        owner,
        &amounts.mint_out,
        &token_program,
    ));

    instructions.push(keys.create_swap_instruction(
        &token_account_in,
        &token_account_out,
        owner,
        amounts.amount_in,
        amounts.min_amount_out,
    ));

    instructions.push(
        spl_token::instruction::close_account(&token_program, &token_account_in, owner, owner, &[])
            .context("Construction de close_account impossible")?,
    );
    if amounts.mint_out == WSOL_MINT {
        instructions.push(
            spl_token::instruction::close_account(&token_program, &token_account_out, owner, owner, &[])
                .context("Construction de close_account impossible")?,
        );
    }

    Ok(instructions)
}

/// Budget de calcul en tête de transaction. Le prix du CU n'est posé que si fourni.
pub fn compute_budget_instructions(compute_unit_price: Option<u64>) -> Vec<Instruction> {
    let mut instructions = vec![ComputeBudgetInstruction::set_compute_unit_limit(SWAP_COMPUTE_UNIT_LIMIT)];
    if let Some(price) = compute_unit_price.filter(|p| *p > 0) {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(price));
    }
    instructions
}

/// Transaction versionnée (message legacy) signée par `payer`.
pub fn sign_legacy_transaction(instructions: &[Instruction], payer: &Keypair, blockhash: Hash) -> Result<VersionedTransaction> {
    let message = Message::new_with_blockhash(instructions, Some(&payer.pubkey()), &blockhash);
    VersionedTransaction::try_new(VersionedMessage::Legacy(message), &[payer]).context("Signature de la transaction impossible")
}

/// Sortie minimale acceptée : `amount_in * out / (in + amount_in)`, réduite de `slippage_pct` %.
pub fn compute_min_amount_out(amount_in: u64, in_reserve: u64, out_reserve: u64, slippage_pct: u32) -> u64 {
    let denominator = in_reserve as u128 + amount_in as u128;
    if denominator == 0 {
        return 0;
    }
    let quote = amount_in as u128 * out_reserve as u128 / denominator;
    let min_out = quote * 100 / (100 + slippage_pct as u128);
    u64::try_from(min_out).unwrap_or(u64::MAX)
}
