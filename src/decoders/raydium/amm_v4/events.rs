// DANS : src/decoders/raydium/amm_v4/events.rs
//
// Décodage des `ray_log` : le programme AMM v4 émet un payload base64 dans ses logs,
// un octet de discriminant suivi d'une struct little-endian à largeur fixe.

use crate::error::DecodeError;
use crate::pool::{CoinSide, Price};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

pub const RAY_LOG_PREFIX: &str = "Program log: ray_log: ";
/// Présente dans les logs de toute transaction `initialize2`.
pub const INITIALIZE2_MARKER: &str = "Program log: initialize2: InitializeInstruction2";

const INIT_LOG_LEN: usize = 8 + 1 + 1 + 8 * 4 + 32;
const SWAP_LOG_LEN: usize = 8 * 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RayLogType {
    Init = 0,
    Deposit = 1,
    Withdraw = 2,
    SwapBaseIn = 3,
    SwapBaseOut = 4,
}

impl TryFrom<u8> for RayLogType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Init),
            1 => Ok(Self::Deposit),
            2 => Ok(Self::Withdraw),
            3 => Ok(Self::SwapBaseIn),
            4 => Ok(Self::SwapBaseOut),
            other => Err(DecodeError::UnknownDiscriminant(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InitLog {
    pub open_time: u64,
    pub quote_decimals: u8,
    pub base_decimals: u8,
    pub quote_lot_size: u64,
    pub base_lot_size: u64,
    pub quote_amount: u64,
    pub base_amount: u64,
    pub market: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SwapBaseInLog {
    pub amount_in: u64,
    pub min_amount_out: u64,
    pub direction: u64,
    pub user_amount: u64,
    pub base_reserve: u64,
    pub quote_reserve: u64,
    pub amount_out: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SwapBaseOutLog {
    pub max_amount_in: u64,
    pub amount_out: u64,
    pub direction: u64,
    pub user_amount: u64,
    pub base_reserve: u64,
    pub quote_reserve: u64,
    pub amount_in: u64,
}

/// Un `ray_log` décodé. Deposit et Withdraw ne nous intéressent pas : on garde seulement le type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayLog {
    Init(InitLog),
    SwapBaseIn(SwapBaseInLog),
    SwapBaseOut(SwapBaseOutLog),
    Padding(RayLogType),
}

impl RayLog {
    pub fn log_type(&self) -> RayLogType {
        match self {
            RayLog::Init(_) => RayLogType::Init,
            RayLog::SwapBaseIn(_) => RayLogType::SwapBaseIn,
            RayLog::SwapBaseOut(_) => RayLogType::SwapBaseOut,
            RayLog::Padding(log_type) => *log_type,
        }
    }

    /// Lit le discriminant puis la struct correspondante, après vérification de la longueur.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, payload) = bytes.split_first().ok_or(DecodeError::Empty)?;
        match RayLogType::try_from(tag)? {
            RayLogType::Init => Ok(RayLog::Init(read_variant("init", payload, INIT_LOG_LEN)?)),
            RayLogType::SwapBaseIn => Ok(RayLog::SwapBaseIn(read_variant("swap_base_in", payload, SWAP_LOG_LEN)?)),
            RayLogType::SwapBaseOut => Ok(RayLog::SwapBaseOut(read_variant("swap_base_out", payload, SWAP_LOG_LEN)?)),
            padding => Ok(RayLog::Padding(padding)),
        }
    }

    pub fn decode_base64(data: &str) -> Result<Self, DecodeError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        Self::decode(&bytes)
    }

    /// Octets tels qu'émis par le programme.
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut bytes = vec![self.log_type() as u8];
        match self {
            RayLog::Init(log) => log.serialize(&mut bytes)?,
            RayLog::SwapBaseIn(log) => log.serialize(&mut bytes)?,
            RayLog::SwapBaseOut(log) => log.serialize(&mut bytes)?,
            RayLog::Padding(_) => bytes.push(0),
        }
        Ok(bytes)
    }

    /// Ligne de log complète (`Program log: ray_log: <base64>`).
    pub fn to_log_line(&self) -> std::io::Result<String> {
        Ok(format!("{}{}", RAY_LOG_PREFIX, STANDARD.encode(self.encode()?)))
    }
}

fn read_variant<T: BorshDeserialize>(variant: &'static str, payload: &[u8], expected: usize) -> Result<T, DecodeError> {
    let too_short = DecodeError::TooShort { variant, len: payload.len(), expected };
    let mut body = payload.get(..expected).ok_or_else(|| too_short.clone())?;
    T::deserialize(&mut body).map_err(|_| too_short)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SwapDirection {
    Quote2Base = 1,
    Base2Quote = 2,
}

impl TryFrom<u64> for SwapDirection {
    type Error = DecodeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Quote2Base),
            2 => Ok(Self::Base2Quote),
            other => Err(DecodeError::UnknownDirection(other)),
        }
    }
}

/// Vue commune de SwapBaseIn / SwapBaseOut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapEvent {
    pub direction: SwapDirection,
    pub amount_in: u64,
    pub amount_out: u64,
    pub base_reserve: u64,
    pub quote_reserve: u64,
}

impl SwapEvent {
    /// Montant côté base ayant circulé dans le swap.
    pub fn base_amount(&self) -> u64 {
        match self.direction {
            SwapDirection::Base2Quote => self.amount_in,
            SwapDirection::Quote2Base => self.amount_out,
        }
    }

    /// Montant côté quote ayant circulé dans le swap.
    pub fn quote_amount(&self) -> u64 {
        match self.direction {
            SwapDirection::Quote2Base => self.amount_in,
            SwapDirection::Base2Quote => self.amount_out,
        }
    }
}

impl TryFrom<&SwapBaseInLog> for SwapEvent {
    type Error = DecodeError;

    fn try_from(log: &SwapBaseInLog) -> Result<Self, Self::Error> {
        Ok(SwapEvent {
            direction: SwapDirection::try_from(log.direction)?,
            amount_in: log.amount_in,
            amount_out: log.amount_out,
            base_reserve: log.base_reserve,
            quote_reserve: log.quote_reserve,
        })
    }
}

impl TryFrom<&SwapBaseOutLog> for SwapEvent {
    type Error = DecodeError;

    fn try_from(log: &SwapBaseOutLog) -> Result<Self, Self::Error> {
        Ok(SwapEvent {
            direction: SwapDirection::try_from(log.direction)?,
            amount_in: log.amount_in,
            amount_out: log.amount_out,
            base_reserve: log.base_reserve,
            quote_reserve: log.quote_reserve,
        })
    }
}

/// Décode la dernière ligne `ray_log` des logs (parcours de la fin vers le début).
fn last_ray_log<S: AsRef<str>>(logs: &[S]) -> Result<Option<RayLog>, DecodeError> {
    logs.iter()
        .rev()
        .find_map(|log| log.as_ref().strip_prefix(RAY_LOG_PREFIX))
        .map(RayLog::decode_base64)
        .transpose()
}

/// `Ok(None)` si le marqueur `initialize2` est absent ou si le dernier `ray_log` n'est pas un Init.
pub fn find_init_event<S: AsRef<str>>(logs: &[S]) -> Result<Option<InitLog>, DecodeError> {
    if !logs.iter().any(|log| log.as_ref().starts_with(INITIALIZE2_MARKER)) {
        return Ok(None);
    }
    match last_ray_log(logs)? {
        Some(RayLog::Init(init)) => Ok(Some(init)),
        _ => Ok(None),
    }
}

/// `Ok(None)` si le dernier `ray_log` n'est pas un swap.
pub fn find_swap_event<S: AsRef<str>>(logs: &[S]) -> Result<Option<SwapEvent>, DecodeError> {
    match last_ray_log(logs)? {
        Some(RayLog::SwapBaseIn(log)) => SwapEvent::try_from(&log).map(Some),
        Some(RayLog::SwapBaseOut(log)) => SwapEvent::try_from(&log).map(Some),
        _ => Ok(None),
    }
}

/// Convertit un montant brut en unités "humaines" (`amount / 10^decimals`).
fn to_ui_amount(amount: u64, decimals: u8) -> Option<Price> {
    let scale = 10u64.checked_pow(decimals as u32)?;
    Price::from_num(amount).checked_div(Price::from_num(scale))
}

/// Prix d'un coin en SOL : `(sol / 10^sol_decimals) / (coin / 10^coin_decimals)`.
/// `None` si le montant coin est nul ou si un calcul déborde.
pub fn price_from_amounts(coin_amount: u64, coin_decimals: u8, sol_amount: u64, sol_decimals: u8) -> Option<Price> {
    let coin = to_ui_amount(coin_amount, coin_decimals)?;
    let sol = to_ui_amount(sol_amount, sol_decimals)?;
    sol.checked_div(coin)
}

/// Prix implicite d'un swap, à partir des montants échangés.
pub fn compute_price_from_swap_event(
    event: &SwapEvent,
    base_decimals: u8,
    quote_decimals: u8,
    coin_side: CoinSide,
) -> Option<Price> {
    match coin_side {
        CoinSide::Base => price_from_amounts(event.base_amount(), base_decimals, event.quote_amount(), quote_decimals),
        CoinSide::Quote => price_from_amounts(event.quote_amount(), quote_decimals, event.base_amount(), base_decimals),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() -> InitLog {
        InitLog {
            open_time: 1_717_000_000,
            quote_decimals: 9,
            base_decimals: 6,
            quote_lot_size: 1_000,
            base_lot_size: 100_000,
            quote_amount: 80_000_000_000,
            base_amount: 900_000_000_000_000,
            market: Pubkey::new_unique(),
        }
    }

    fn swap_in_log(direction: u64) -> SwapBaseInLog {
        SwapBaseInLog {
            amount_in: 1_000_000_000,
            min_amount_out: 1,
            direction,
            user_amount: 1_000_000_000,
            base_reserve: 500_000_000_000,
            quote_reserve: 90_000_000_000,
            amount_out: 5_400_000_000,
        }
    }

    fn line(log: RayLog) -> String {
        log.to_log_line().unwrap()
    }

    #[test]
    fn init_event_requires_marker() {
        let logs = vec![
            "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 invoke [1]".to_string(),
            line(RayLog::Init(init_log())),
        ];
        assert_eq!(find_init_event(&logs), Ok(None));
    }

    #[test]
    fn init_event_is_read_from_last_tagged_line() {
        let expected = init_log();
        let logs = vec![
            INITIALIZE2_MARKER.to_string(),
            line(RayLog::SwapBaseIn(swap_in_log(1))),
            line(RayLog::Init(expected)),
            "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 success".to_string(),
        ];
        assert_eq!(find_init_event(&logs), Ok(Some(expected)));
    }

    #[test]
    fn init_event_not_found_when_last_tagged_line_is_not_init() {
        let logs = vec![
            INITIALIZE2_MARKER.to_string(),
            line(RayLog::Init(init_log())),
            line(RayLog::SwapBaseIn(swap_in_log(2))),
        ];
        assert_eq!(find_init_event(&logs), Ok(None));
    }

    #[test]
    fn malformed_payloads_are_decode_errors_not_absence() {
        let bad_base64 = vec![INITIALIZE2_MARKER.to_string(), format!("{}@@@", RAY_LOG_PREFIX)];
        assert!(matches!(find_init_event(&bad_base64), Err(DecodeError::Base64(_))));

        let short = vec![format!("{}{}", RAY_LOG_PREFIX, STANDARD.encode([3u8, 1, 2, 3]))];
        assert_eq!(
            find_swap_event(&short),
            Err(DecodeError::TooShort { variant: "swap_base_in", len: 3, expected: SWAP_LOG_LEN })
        );

        let unknown = vec![format!("{}{}", RAY_LOG_PREFIX, STANDARD.encode([9u8; 60]))];
        assert_eq!(find_swap_event(&unknown), Err(DecodeError::UnknownDiscriminant(9)));
    }

    #[test]
    fn swap_event_normalizes_both_variants() {
        let base_out = SwapBaseOutLog {
            max_amount_in: 2_000,
            amount_out: 777,
            direction: 2,
            user_amount: 1_500,
            base_reserve: 10,
            quote_reserve: 20,
            amount_in: 1_234,
        };
        let event = find_swap_event(&[line(RayLog::SwapBaseOut(base_out))]).unwrap().unwrap();
        assert_eq!(
            event,
            SwapEvent {
                direction: SwapDirection::Base2Quote,
                amount_in: 1_234,
                amount_out: 777,
                base_reserve: 10,
                quote_reserve: 20,
            }
        );
        assert_eq!(event.base_amount(), 1_234);
        assert_eq!(event.quote_amount(), 777);

        let event = find_swap_event(&[line(RayLog::SwapBaseIn(swap_in_log(1)))]).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Quote2Base);
        assert_eq!(event.quote_amount(), 1_000_000_000);
        assert_eq!(event.base_amount(), 5_400_000_000);
    }

    #[test]
    fn swap_event_ignores_non_swap_logs() {
        let logs = vec![line(RayLog::Padding(RayLogType::Deposit))];
        assert_eq!(find_swap_event(&logs), Ok(None));
        assert_eq!(find_swap_event::<String>(&[]), Ok(None));
    }

    #[test]
    fn unknown_swap_direction_fails_decode() {
        let logs = vec![line(RayLog::SwapBaseIn(swap_in_log(7)))];
        assert_eq!(find_swap_event(&logs), Err(DecodeError::UnknownDirection(7)));
    }

    #[test]
    fn the_first_log_line_is_scanned_too() {
        let logs = vec![line(RayLog::SwapBaseIn(swap_in_log(2)))];
        assert!(find_swap_event(&logs).unwrap().is_some());
    }

    #[test]
    fn swap_price_is_sol_per_coin_on_both_sides() {
        // 1 SOL (9 décimales) contre 2 000 coins (6 décimales).
        let event = SwapEvent {
            direction: SwapDirection::Quote2Base,
            amount_in: 1_000_000_000,
            amount_out: 2_000_000_000,
            base_reserve: 0,
            quote_reserve: 0,
        };
        let price = compute_price_from_swap_event(&event, 6, 9, CoinSide::Base).unwrap();
        assert_eq!(price, Price::from_num(1) / Price::from_num(2_000));

        let flipped = SwapEvent { direction: SwapDirection::Base2Quote, ..event };
        let price = compute_price_from_swap_event(&flipped, 9, 6, CoinSide::Quote).unwrap();
        assert_eq!(price, Price::from_num(1) / Price::from_num(2_000));
    }

    #[test]
    fn zero_coin_amount_has_no_price() {
        assert_eq!(price_from_amounts(0, 6, 1_000, 9), None);
    }
}
