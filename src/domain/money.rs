use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// Non-negative exact decimal amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        Some(Self(value.normalize()))
    }

    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Parses a plain decimal string. Rejects negatives and anything that
    /// cannot be held without rounding.
    pub fn from_decimal_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        Decimal::from_str_exact(s).ok().and_then(Self::new)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_decimal_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid amount: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::Amount;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_exact_decimals() {
        let v = Amount::from_decimal_str("100.0003").unwrap();
        assert_eq!(v.as_decimal(), dec!(100.0003));
        let v = Amount::from_decimal_str(" 0 ").unwrap();
        assert_eq!(v, Amount::ZERO);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(Amount::from_decimal_str("-0.01").is_none());
        assert!(Amount::from_decimal_str("").is_none());
        assert!(Amount::from_decimal_str("1.2.3").is_none());
        assert!(Amount::new(dec!(-5)).is_none());
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(Amount::new(dec!(-0)), Some(Amount::ZERO));
    }

    #[test]
    fn repeated_tenths_stay_exact() {
        let tenth = Amount::from_decimal_str("0.1").unwrap().as_decimal();
        let sum: rust_decimal::Decimal = std::iter::repeat(tenth).take(1_000_000).sum();
        assert_eq!(sum, dec!(100000));
    }
}
