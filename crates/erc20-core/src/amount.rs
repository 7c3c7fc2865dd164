//! Raw token amounts and display-unit conversion.
//!
//! Balances are kept in raw units (`U256`). Humans read and type display
//! units, where one display unit equals `10^decimals` raw units.

use primitive_types::U256;
use thiserror::Error;

/// Raw, indivisible token amount.
pub type Amount = U256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("invalid character {0:?} in amount")]
    InvalidDigit(char),
    #[error("amount has more than {max} fractional digits")]
    TooManyDecimals { max: u8 },
    #[error("amount does not fit in 256 bits")]
    Overflow,
}

/// `10^decimals`, failing once the power leaves the 256-bit range.
pub fn scale(decimals: u8) -> Result<U256, AmountError> {
    let ten = U256::from(10u8);
    (0..decimals).try_fold(U256::one(), |acc, _| {
        acc.checked_mul(ten).ok_or(AmountError::Overflow)
    })
}

/// Parse a display amount such as `"1.23"` into raw units.
///
/// Parsing is exact: the fractional part may not carry more digits than the
/// token has decimals.
pub fn parse_units(text: &str, decimals: u8) -> Result<U256, AmountError> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(AmountError::Empty);
    }
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooManyDecimals { max: decimals });
    }

    let padding = decimals as usize - fraction.len();
    let digits = whole
        .chars()
        .chain(fraction.chars())
        .chain(std::iter::repeat('0').take(padding));

    let ten = U256::from(10u8);
    let mut value = U256::zero();
    for ch in digits {
        let digit = ch.to_digit(10).ok_or(AmountError::InvalidDigit(ch))?;
        value = value
            .checked_mul(ten)
            .and_then(|v| v.checked_add(U256::from(digit)))
            .ok_or(AmountError::Overflow)?;
    }
    Ok(value)
}

/// Render raw units as a display amount, trimming trailing fractional zeros.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let width = decimals as usize;
    let (whole, fraction) = match scale(decimals) {
        Ok(unit) => (raw / unit, raw % unit),
        // 10^decimals exceeds every representable amount.
        Err(_) => (U256::zero(), raw),
    };
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = width);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
