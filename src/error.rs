use thiserror::Error;

use crate::ledger::{Address, Amount};

/// Failures reported by ledger operations.
///
/// Every variant leaves the ledger untouched; callers can retry with
/// corrected input without any cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A sender, recipient, referrer, owner or spender was the null account.
    #[error("{role} must not be the zero address")]
    ZeroAddress { role: &'static str },

    #[error("transfer amount must be greater than zero")]
    ZeroAmount,

    #[error("insufficient balance in {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: Address,
        have: Amount,
        need: Amount,
    },

    #[error("allowance of {spender} over {owner} exceeded: have {have}, need {need}")]
    AllowanceExceeded {
        owner: Address,
        spender: Address,
        have: Amount,
        need: Amount,
    },

    #[error("account {0} cannot refer itself")]
    SelfReferral(Address),

    #[error("account {account} already has referrer {referrer}")]
    ReferrerAlreadySet { account: Address, referrer: Address },

    #[error("fee rate {rate} exceeds the cap of {max}")]
    FeeRateOutOfBounds { rate: u16, max: u16 },

    #[error("referral rate {referral} must not exceed beneficiary rate {beneficiary}")]
    FeeRateOrderingViolation { referral: u16, beneficiary: u16 },

    /// Raised by the governance gate, never by the engine itself.
    #[error("{caller} is not the ledger owner")]
    Unauthorized { caller: Address },

    #[error("allowance arithmetic overflow")]
    Overflow,
}

pub type LedgerResult<T> = Result<T, LedgerError>;
