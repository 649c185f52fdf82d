//! Fee schedule types
//!
//! Platform-wide fee parameters keyed by fee type. Fees are computed at
//! settlement time from the settings current at that moment, so updates
//! affect only future settlements.
//!
//! Formula: `fee = amount * fee_percentage / 100 + fee_fixed`, clamped to
//! `[minimum_fee, maximum_fee]` and rounded to 2 decimal places. Inactive
//! settings charge nothing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fee schedule key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    /// Fee on external deposits
    Deposit,
    /// Fee on withdrawals
    Withdrawal,
    /// Platform commission on settled payouts
    Commission,
    /// Fee on tip transfers
    Tip,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Commission => "commission",
            Self::Tip => "tip",
        }
    }

    /// All known fee types
    pub fn all() -> [FeeType; 4] {
        [Self::Deposit, Self::Withdrawal, Self::Commission, Self::Tip]
    }
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "commission" | "transaction" => Ok(Self::Commission),
            "tip" => Ok(Self::Tip),
            other => Err(format!("unknown fee type: {other}")),
        }
    }
}

/// Platform-wide fee parameters for one fee type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSettings {
    /// Which schedule this row configures
    pub fee_type: FeeType,
    /// Percentage of the amount (2.5 means 2.5%)
    pub fee_percentage: Decimal,
    /// Flat component added on top
    pub fee_fixed: Decimal,
    /// Floor for the computed fee; for tips this doubles as the minimum
    /// accepted tip amount
    pub minimum_fee: Decimal,
    /// Optional cap; for tips this doubles as the maximum accepted tip
    pub maximum_fee: Option<Decimal>,
    /// Whether the fee is charged at all
    pub is_active: bool,
    /// Last administrative update
    pub updated_at: DateTime<Utc>,
}

impl FeeSettings {
    /// Compute the fee owed on `amount` under these settings
    pub fn calculate(&self, amount: Decimal) -> Decimal {
        if !self.is_active {
            return Decimal::ZERO;
        }

        let mut fee = amount * self.fee_percentage / Decimal::from(100) + self.fee_fixed;

        if fee < self.minimum_fee {
            fee = self.minimum_fee;
        }
        if let Some(max) = self.maximum_fee {
            if fee > max {
                fee = max;
            }
        }

        fee.round_dp(2)
    }

    /// Default parameters for a fee type
    pub fn default_for(fee_type: FeeType) -> Self {
        let half_dollar = Decimal::new(50, 2);
        let quarter = Decimal::new(25, 2);
        let (pct, fixed, min, max) = match fee_type {
            FeeType::Deposit => (Decimal::new(25, 1), Decimal::ZERO, half_dollar, None),
            FeeType::Withdrawal => (Decimal::ONE, quarter, quarter, None),
            FeeType::Commission => (Decimal::from(3), Decimal::ZERO, quarter, None),
            FeeType::Tip => (
                Decimal::ZERO,
                Decimal::ZERO,
                half_dollar,
                Some(Decimal::from(100)),
            ),
        };
        Self {
            fee_type,
            fee_percentage: pct,
            fee_fixed: fixed,
            minimum_fee: min,
            maximum_fee: max,
            is_active: true,
            updated_at: Utc::now(),
        }
    }
}

/// Administrative update to a fee schedule row; absent fields are unchanged
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeeSettingsUpdate {
    pub fee_percentage: Option<Decimal>,
    pub fee_fixed: Option<Decimal>,
    pub minimum_fee: Option<Decimal>,
    pub maximum_fee: Option<Option<Decimal>>,
    pub is_active: Option<bool>,
}

impl FeeSettings {
    /// Apply a partial update, stamping `updated_at`
    pub fn apply(&mut self, update: &FeeSettingsUpdate) {
        if let Some(pct) = update.fee_percentage {
            self.fee_percentage = pct;
        }
        if let Some(fixed) = update.fee_fixed {
            self.fee_fixed = fixed;
        }
        if let Some(min) = update.minimum_fee {
            self.minimum_fee = min;
        }
        if let Some(max) = update.maximum_fee {
            self.maximum_fee = max;
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percentage_fee() {
        let settings = FeeSettings::default_for(FeeType::Deposit);
        // 2.5% of $100 = $2.50
        assert_eq!(settings.calculate(dec!(100)), dec!(2.50));
    }

    #[test]
    fn test_minimum_fee_floor() {
        let settings = FeeSettings::default_for(FeeType::Deposit);
        // 2.5% of $10 = $0.25, floored to $0.50
        assert_eq!(settings.calculate(dec!(10)), dec!(0.50));
    }

    #[test]
    fn test_fixed_component() {
        let settings = FeeSettings::default_for(FeeType::Withdrawal);
        // 1% of $100 + $0.25 = $1.25
        assert_eq!(settings.calculate(dec!(100)), dec!(1.25));
    }

    #[test]
    fn test_maximum_cap() {
        let mut settings = FeeSettings::default_for(FeeType::Commission);
        settings.maximum_fee = Some(dec!(5));
        // 3% of $1000 = $30, capped at $5
        assert_eq!(settings.calculate(dec!(1000)), dec!(5));
    }

    #[test]
    fn test_inactive_charges_nothing() {
        let mut settings = FeeSettings::default_for(FeeType::Commission);
        settings.is_active = false;
        assert_eq!(settings.calculate(dec!(1000)), Decimal::ZERO);
    }

    #[test]
    fn test_partial_update() {
        let mut settings = FeeSettings::default_for(FeeType::Commission);
        settings.apply(&FeeSettingsUpdate {
            fee_percentage: Some(dec!(5)),
            ..Default::default()
        });
        assert_eq!(settings.fee_percentage, dec!(5));
        assert_eq!(settings.fee_fixed, Decimal::ZERO);
    }

    #[test]
    fn test_fee_type_parsing() {
        assert_eq!("transaction".parse::<FeeType>().unwrap(), FeeType::Commission);
        assert_eq!("tip".parse::<FeeType>().unwrap(), FeeType::Tip);
        assert!("bogus".parse::<FeeType>().is_err());
    }
}
