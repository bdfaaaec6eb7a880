//! Fixed-point fee arithmetic and the two-rate fee schedule.
//!
//! Rates are expressed in hundredths of a percent: `100` is 1%, and
//! [`RATE_DENOMINATOR`] is 100%. Both configured rates are capped at
//! [`MAX_FEE_RATE`] (5%) and the referral rate never exceeds the
//! beneficiary rate.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Amount;

pub const RATE_DENOMINATOR: u16 = 10_000;
pub const MAX_FEE_RATE: u16 = 500;

/// Largest supply the ledger accepts. Keeps `amount * rate` within `u128`
/// for any rate up to [`RATE_DENOMINATOR`].
pub const MAX_SUPPLY: Amount = Amount::MAX / RATE_DENOMINATOR as Amount;

/// `floor(amount * rate / 10_000)`.
///
/// Split into quotient and remainder so that no intermediate value exceeds
/// `amount`: the result is exact for every `u128` amount and any rate up to
/// the denominator.
pub fn compute_fee(amount: Amount, rate: u16) -> Amount {
    let denom = RATE_DENOMINATOR as Amount;
    let rate = rate.min(RATE_DENOMINATOR) as Amount;
    (amount / denom) * rate + (amount % denom) * rate / denom
}

/// Which leg of the schedule a fee was charged under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Referral,
    Beneficiary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    referral_rate: u16,
    beneficiary_rate: u16,
}

impl FeeSchedule {
    pub fn new(referral_rate: u16, beneficiary_rate: u16) -> LedgerResult<Self> {
        validate(referral_rate, beneficiary_rate)?;
        Ok(Self {
            referral_rate,
            beneficiary_rate,
        })
    }

    pub fn referral_rate(&self) -> u16 {
        self.referral_rate
    }

    pub fn beneficiary_rate(&self) -> u16 {
        self.beneficiary_rate
    }

    pub fn rate_for(&self, kind: FeeKind) -> u16 {
        match kind {
            FeeKind::Referral => self.referral_rate,
            FeeKind::Beneficiary => self.beneficiary_rate,
        }
    }

    /// Applies a new referral rate only if the resulting pair is valid.
    pub fn set_referral_rate(&mut self, rate: u16) -> LedgerResult<()> {
        validate(rate, self.beneficiary_rate)?;
        self.referral_rate = rate;
        Ok(())
    }

    /// Applies a new beneficiary rate only if the resulting pair is valid.
    pub fn set_beneficiary_rate(&mut self, rate: u16) -> LedgerResult<()> {
        validate(self.referral_rate, rate)?;
        self.beneficiary_rate = rate;
        Ok(())
    }

    /// Re-checks the invariant, e.g. after deserializing a snapshot.
    pub fn validate(&self) -> LedgerResult<()> {
        validate(self.referral_rate, self.beneficiary_rate)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            referral_rate: 50,
            beneficiary_rate: 100,
        }
    }
}

fn validate(referral: u16, beneficiary: u16) -> LedgerResult<()> {
    for rate in [referral, beneficiary] {
        if rate > MAX_FEE_RATE {
            return Err(LedgerError::FeeRateOutOfBounds {
                rate,
                max: MAX_FEE_RATE,
            });
        }
    }
    if referral > beneficiary {
        return Err(LedgerError::FeeRateOrderingViolation {
            referral,
            beneficiary,
        });
    }
    Ok(())
}
