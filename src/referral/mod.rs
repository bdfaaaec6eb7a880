use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Address;

/// Write-once mapping from an account to the account that referred it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferralRegistry {
    referrers: BTreeMap<Address, Address>,
}

impl ReferralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn referrer_of(&self, account: &Address) -> Option<Address> {
        self.referrers.get(account).copied()
    }

    /// Checks every precondition of [`ReferralRegistry::assign`] without
    /// touching state.
    pub fn check(&self, account: &Address, referrer: &Address) -> LedgerResult<()> {
        if referrer.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "referrer" });
        }
        if referrer == account {
            return Err(LedgerError::SelfReferral(*account));
        }
        if let Some(existing) = self.referrers.get(account) {
            return Err(LedgerError::ReferrerAlreadySet {
                account: *account,
                referrer: *existing,
            });
        }
        Ok(())
    }

    pub(crate) fn assign(&mut self, account: Address, referrer: Address) -> LedgerResult<()> {
        self.check(&account, &referrer)?;
        self.referrers.insert(account, referrer);
        Ok(())
    }

    /// Re-checks the null and self-referral rules on every stored entry.
    pub(crate) fn validate(&self) -> LedgerResult<()> {
        for (account, referrer) in &self.referrers {
            if account.is_zero() {
                return Err(LedgerError::ZeroAddress { role: "referred account" });
            }
            if referrer.is_zero() {
                return Err(LedgerError::ZeroAddress { role: "referrer" });
            }
            if referrer == account {
                return Err(LedgerError::SelfReferral(*account));
            }
        }
        Ok(())
    }

    /// Number of accounts that named `referrer`.
    pub fn referral_count(&self, referrer: &Address) -> usize {
        self.referrers.values().filter(|r| *r == referrer).count()
    }

    pub fn len(&self) -> usize {
        self.referrers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.referrers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Address)> {
        self.referrers.iter()
    }

    pub(crate) fn leaves(&self) -> Vec<[u8; 32]> {
        self.referrers
            .iter()
            .map(|(account, referrer)| {
                let mut hasher = Sha256::new();
                hasher.update(b"ref");
                hasher.update(account.as_bytes());
                hasher.update(referrer.as_bytes());
                hasher.finalize().into()
            })
            .collect()
    }
}
