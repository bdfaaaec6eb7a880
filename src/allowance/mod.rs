use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Address, Amount};

/// Spending quotas keyed by owner, then spender.
///
/// Zero quotas are not stored, so `allowance_of` and the state root agree
/// on "never approved" and "approved zero".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowanceRegistry {
    quotas: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl AllowanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowance_of(&self, owner: &Address, spender: &Address) -> Amount {
        self.quotas
            .get(owner)
            .and_then(|by_spender| by_spender.get(spender))
            .copied()
            .unwrap_or(0)
    }

    /// Overwrites the quota; there is no additive form.
    pub(crate) fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> LedgerResult<()> {
        if owner.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "owner" });
        }
        if spender.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "spender" });
        }
        self.set(owner, spender, amount);
        Ok(())
    }

    /// Fails with `AllowanceExceeded` if the quota is below `amount`.
    pub fn check_consume(
        &self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> LedgerResult<Amount> {
        let have = self.allowance_of(owner, spender);
        if have < amount {
            return Err(LedgerError::AllowanceExceeded {
                owner: *owner,
                spender: *spender,
                have,
                need: amount,
            });
        }
        Ok(have - amount)
    }

    pub(crate) fn consume(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> LedgerResult<()> {
        let remaining = self.check_consume(owner, spender, amount)?;
        self.set(owner, spender, remaining);
        Ok(())
    }

    fn set(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        if amount == 0 {
            if let Some(by_spender) = self.quotas.get_mut(owner) {
                by_spender.remove(spender);
                if by_spender.is_empty() {
                    self.quotas.remove(owner);
                }
            }
            return;
        }
        self.quotas
            .entry(*owner)
            .or_default()
            .insert(*spender, amount);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Address, &Amount)> {
        self.quotas.iter().flat_map(|(owner, by_spender)| {
            by_spender
                .iter()
                .map(move |(spender, amount)| (owner, spender, amount))
        })
    }

    pub(crate) fn leaves(&self) -> Vec<[u8; 32]> {
        self.iter()
            .map(|(owner, spender, amount)| {
                let mut hasher = Sha256::new();
                hasher.update(b"allow");
                hasher.update(owner.as_bytes());
                hasher.update(spender.as_bytes());
                hasher.update(amount.to_le_bytes());
                hasher.finalize().into()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    #[test]
    fn approve_overwrites_instead_of_adding() {
        let mut registry = AllowanceRegistry::new();
        registry.approve(&addr("alice"), &addr("bob"), 500).unwrap();
        registry.approve(&addr("alice"), &addr("bob"), 200).unwrap();
        assert_eq!(registry.allowance_of(&addr("alice"), &addr("bob")), 200);
        assert_eq!(registry.allowance_of(&addr("bob"), &addr("alice")), 0);
    }

    #[test]
    fn approve_rejects_zero_parties() {
        let mut registry = AllowanceRegistry::new();
        assert_eq!(
            registry.approve(&Address::ZERO, &addr("bob"), 1),
            Err(LedgerError::ZeroAddress { role: "owner" })
        );
        assert_eq!(
            registry.approve(&addr("alice"), &Address::ZERO, 1),
            Err(LedgerError::ZeroAddress { role: "spender" })
        );
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn consume_decrements_exactly() {
        let mut registry = AllowanceRegistry::new();
        registry.approve(&addr("alice"), &addr("bob"), 500).unwrap();
        registry.consume(&addr("alice"), &addr("bob"), 120).unwrap();
        assert_eq!(registry.allowance_of(&addr("alice"), &addr("bob")), 380);

        let err = registry
            .consume(&addr("alice"), &addr("bob"), 381)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::AllowanceExceeded {
                owner: addr("alice"),
                spender: addr("bob"),
                have: 380,
                need: 381
            }
        );
        assert_eq!(registry.allowance_of(&addr("alice"), &addr("bob")), 380);

        registry.consume(&addr("alice"), &addr("bob"), 380).unwrap();
        assert_eq!(registry.iter().count(), 0);
    }
}
