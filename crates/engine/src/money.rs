use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Signed Naira amount represented as **integer kobo**.
///
/// Every balance, delta and entry amount in the engine is an `i64` in kobo;
/// this type is the typed view used for parsing operator input and for
/// display.
///
/// The value is signed:
/// - positive = credit / income
/// - negative = debit / reversal
///
/// # Examples
///
/// ```rust
/// use engine::Money;
///
/// let amount = Money::new(1_234_50);
/// assert_eq!(amount.kobo(), 123450);
/// assert_eq!(amount.to_string(), "₦1,234.50");
/// ```
///
/// Parsing accepts an optional `₦` prefix and `,` as thousands separator;
/// more than 2 decimals are rejected:
///
/// ```rust
/// use engine::Money;
///
/// assert_eq!("500".parse::<Money>().unwrap().kobo(), 50000);
/// assert_eq!("₦1,250.5".parse::<Money>().unwrap().kobo(), 125050);
/// assert!("12.345".parse::<Money>().is_err());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount from integer kobo.
    #[must_use]
    pub const fn new(kobo: i64) -> Self {
        Self(kobo)
    }

    /// Returns the raw value in kobo.
    #[must_use]
    pub const fn kobo(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let naira = (abs / 100).to_string();
        let kobo = abs % 100;

        let mut grouped = String::with_capacity(naira.len() + naira.len() / 3);
        for (idx, ch) in naira.chars().enumerate() {
            if idx > 0 && (naira.len() - idx) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        write!(f, "{sign}₦{grouped}.{kobo:02}")
    }
}

impl FromStr for Money {
    type Err = EngineError;

    /// Parses a decimal Naira string into kobo.
    ///
    /// Accepts an optional leading `+`/`-`, an optional `₦` symbol and `,`
    /// as thousands separator. At most 2 fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let empty = || EngineError::InvalidAmount("empty amount".to_string());
        let invalid = || EngineError::InvalidAmount("invalid amount".to_string());
        let overflow = || EngineError::InvalidAmount("amount too large".to_string());

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(empty());
        }

        let (negative, rest) = if let Some(stripped) = trimmed.strip_prefix('-') {
            (true, stripped)
        } else if let Some(stripped) = trimmed.strip_prefix('+') {
            (false, stripped)
        } else {
            (false, trimmed)
        };

        let rest = rest.trim();
        let rest = rest.strip_prefix('₦').unwrap_or(rest).trim();
        if rest.is_empty() {
            return Err(empty());
        }

        let rest = rest.replace(',', "");
        let mut parts = rest.split('.');
        let naira_str = parts.next().ok_or_else(invalid)?;
        let kobo_str = parts.next();

        if parts.next().is_some() {
            return Err(invalid());
        }

        if naira_str.is_empty() || !naira_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let naira: i64 = naira_str.parse().map_err(|_| overflow())?;

        let kobo: i64 = match kobo_str {
            None | Some("") => 0,
            Some(frac) => {
                if !frac.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                match frac.len() {
                    1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
                    2 => frac.parse::<i64>().map_err(|_| invalid())?,
                    _ => return Err(EngineError::InvalidAmount("too many decimals".to_string())),
                }
            }
        };

        let total = naira
            .checked_mul(100)
            .and_then(|v| v.checked_add(kobo))
            .ok_or_else(overflow)?;

        let signed = if negative {
            total.checked_neg().ok_or_else(overflow)?
        } else {
            total
        };

        Ok(Money(signed))
    }
}
