//! Fixed-point money and percentage types.
//!
//! All ETH amounts are held as integer wei (`10^18` wei per ETH) and all
//! milestone percentages as millionths of a percent. Decimal strings only
//! appear at the edges (user input, JSON, logs); no floating point is used
//! in any amount computation.

use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

pub const ETH_DECIMALS: u32 = 18;
pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000; // 10^18

pub const PERCENT_DECIMALS: u32 = 6;
/// Units of [`Percent`] that make up 100%.
pub const PERCENT_SCALE: u64 = 100_000_000; // 100 * 10^6

/// An ETH amount in wei.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wei(u128);

impl Wei {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u128::MAX);

    pub const fn from_wei(wei: u128) -> Self {
        Self(wei)
    }

    /// Whole ETH, mostly useful in tests and fixtures.
    pub fn from_eth(eth: u64) -> Self {
        Self(eth as u128 * WEI_PER_ETH)
    }

    pub const fn as_wei(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal ETH string such as `"0.5"` or `"10"`.
    ///
    /// At most 18 fractional digits are accepted; anything finer than one wei
    /// is rejected rather than rounded.
    pub fn parse_eth(input: &str) -> Result<Self> {
        let units = parse_fixed(input, ETH_DECIMALS)
            .map_err(|reason| TypesError::InvalidAmount(format!("{input:?}: {reason}")))?;
        Ok(Self(units))
    }

    /// Format as a decimal ETH string without trailing zeros (`"2.5"`).
    pub fn to_eth_string(&self) -> String {
        format_fixed(self.0, ETH_DECIMALS)
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `self * percent / 100`, rounded down to the wei.
    pub fn percent_of(&self, percent: Percent) -> Self {
        let scale = PERCENT_SCALE as u128;
        let pct = percent.units() as u128;
        let quotient = self.0 / scale;
        let remainder = self.0 % scale;
        // percent <= 100% so quotient * pct never exceeds self.0
        Self(quotient * pct + remainder * pct / scale)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ETH", self.to_eth_string())
    }
}

impl FromStr for Wei {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_eth(s)
    }
}

impl TryFrom<String> for Wei {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse_eth(&value)
    }
}

impl From<Wei> for String {
    fn from(value: Wei) -> Self {
        value.to_eth_string()
    }
}

impl Sum for Wei {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Wei::ZERO, |acc, w| acc.saturating_add(w))
    }
}

/// A percentage in the range 0-100 with six decimal places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Percent(u64);

impl Percent {
    pub const ZERO: Self = Self(0);
    pub const ONE_HUNDRED: Self = Self(PERCENT_SCALE);

    pub fn from_units(units: u64) -> Result<Self> {
        if units > PERCENT_SCALE {
            return Err(TypesError::InvalidPercent(format!(
                "{} exceeds 100",
                format_fixed(units as u128, PERCENT_DECIMALS)
            )));
        }
        Ok(Self(units))
    }

    /// Whole percent, e.g. `Percent::whole(25)`.
    pub fn whole(pct: u8) -> Result<Self> {
        Self::from_units(pct as u64 * 10u64.pow(PERCENT_DECIMALS))
    }

    pub fn parse(input: &str) -> Result<Self> {
        let units = parse_fixed(input, PERCENT_DECIMALS)
            .map_err(|reason| TypesError::InvalidPercent(format!("{input:?}: {reason}")))?;
        let units = u64::try_from(units)
            .map_err(|_| TypesError::InvalidPercent(format!("{input:?}: out of range")))?;
        Self::from_units(units)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn to_decimal_string(&self) -> String {
        format_fixed(self.0 as u128, PERCENT_DECIMALS)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.to_decimal_string())
    }
}

impl FromStr for Percent {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Percent {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Percent> for String {
    fn from(value: Percent) -> Self {
        value.to_decimal_string()
    }
}

fn parse_fixed(input: &str, decimals: u32) -> std::result::Result<u128, &'static str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty");
    }

    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err("no digits");
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err("not a non-negative decimal number");
    }
    if frac.len() > decimals as usize {
        return Err("too many decimal places");
    }

    let scale = 10u128.pow(decimals);
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| "overflow")?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded.parse::<u128>().map_err(|_| "overflow")?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or("overflow")
}

fn format_fixed(units: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_eth() {
        assert_eq!(Wei::parse_eth("0.5").unwrap().as_wei(), WEI_PER_ETH / 2);
        assert_eq!(Wei::parse_eth("10").unwrap(), Wei::from_eth(10));
        assert_eq!(Wei::parse_eth(".25").unwrap().to_eth_string(), "0.25");
        assert_eq!(
            Wei::parse_eth("1.000000000000000001").unwrap().as_wei(),
            WEI_PER_ETH + 1
        );
        assert_eq!(Wei::ZERO.to_eth_string(), "0");
        assert_eq!(Wei::from_eth(3).to_string(), "3 ETH");
    }

    #[test]
    fn test_rejects_bad_eth_strings() {
        for bad in ["", "-1", "1.2.3", "abc", "0.0000000000000000001", "1e18", "."] {
            assert!(Wei::parse_eth(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_percent_of_is_exact() {
        let raised = Wei::from_eth(10);
        let quarter = Percent::whole(25).unwrap();
        assert_eq!(raised.percent_of(quarter).to_eth_string(), "2.5");

        let third = Percent::parse("33.333333").unwrap();
        assert_eq!(
            Wei::from_eth(3).percent_of(third).as_wei(),
            999_999_990_000_000_000
        );

        assert_eq!(Wei::MAX.percent_of(Percent::ONE_HUNDRED), Wei::MAX);
        assert_eq!(Wei::MAX.percent_of(Percent::ZERO), Wei::ZERO);
    }

    #[test]
    fn test_percent_bounds() {
        assert!(Percent::parse("100").is_ok());
        assert!(Percent::parse("100.000001").is_err());
        assert!(Percent::parse("12.3456789").is_err());
        assert_eq!(Percent::parse("12.5").unwrap().to_string(), "12.5%");
    }

    #[test]
    fn test_serde_uses_decimal_strings() {
        let json = serde_json::to_string(&Wei::parse_eth("2.5").unwrap()).unwrap();
        assert_eq!(json, "\"2.5\"");
        let back: Wei = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_eth_string(), "2.5");
    }
}
