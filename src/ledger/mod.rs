use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};

mod address;

pub use address::{Address, AddressParseError, ADDRESS_LEN};

/// Smallest token denomination.
pub type Amount = u128;

/// Per-account balances. Only the transfer engine mutates it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalanceLedger {
    balances: BTreeMap<Address, Amount>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub(crate) fn credit(&mut self, account: &Address, amount: Amount) {
        if amount == 0 {
            return;
        }
        // Supply is capped at construction, so the sum of balances never
        // exceeds `MAX_SUPPLY` and this addition cannot wrap.
        *self.balances.entry(*account).or_insert(0) += amount;
    }

    pub(crate) fn debit(&mut self, account: &Address, amount: Amount) -> LedgerResult<()> {
        let have = self.balance_of(account);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *account,
                have,
                need: amount,
            });
        }
        let remaining = have - amount;
        if remaining == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, remaining);
        }
        Ok(())
    }

    /// Sum of all balances. Equals total supply while the ledger is consistent.
    pub fn total(&self) -> Amount {
        self.balances
            .values()
            .fold(0u128, |acc, v| acc.saturating_add(*v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    pub fn holders(&self) -> usize {
        self.balances.len()
    }

    pub(crate) fn leaves(&self) -> Vec<[u8; 32]> {
        self.balances
            .iter()
            .map(|(account, balance)| {
                let mut hasher = Sha256::new();
                hasher.update(b"bal");
                hasher.update(account.as_bytes());
                hasher.update(balance.to_le_bytes());
                hasher.finalize().into()
            })
            .collect()
    }
}

/// Serde adapter writing amounts as decimal strings. Reads strings or
/// plain integers, so hand-written TOML can use either form.
pub mod amount_str {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> de::Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer or decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(v as Amount)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            Amount::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            let cleaned: String = v.chars().filter(|c| *c != '_').collect();
            cleaned
                .parse()
                .map_err(|_| E::custom(format!("invalid amount {v:?}")))
        }
    }
}

/// Binary SHA-256 Merkle fold. Odd nodes are paired with themselves.
pub(crate) fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"referral-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_accounts_read_as_zero() {
        let ledger = BalanceLedger::new();
        assert_eq!(ledger.balance_of(&Address::from_label("nobody")), 0);
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn debit_rejects_overdraft_and_keeps_balance() {
        let alice = Address::from_label("alice");
        let mut ledger = BalanceLedger::new();
        ledger.credit(&alice, 100);
        let err = ledger.debit(&alice, 101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: alice,
                have: 100,
                need: 101
            }
        );
        assert_eq!(ledger.balance_of(&alice), 100);
    }

    #[test]
    fn debit_to_zero_drops_the_entry() {
        let alice = Address::from_label("alice");
        let mut ledger = BalanceLedger::new();
        ledger.credit(&alice, 40);
        ledger.debit(&alice, 40).unwrap();
        assert_eq!(ledger.holders(), 0);
        assert_eq!(ledger.balance_of(&alice), 0);
    }

    #[test]
    fn amounts_read_from_strings_or_integers() {
        #[derive(serde::Deserialize)]
        struct Holder {
            #[serde(with = "amount_str")]
            amount: Amount,
        }
        let from_str: Holder = serde_json::from_str(r#"{"amount":"1_000_000"}"#).unwrap();
        assert_eq!(from_str.amount, 1_000_000);
        let from_int: Holder = serde_json::from_str(r#"{"amount":42}"#).unwrap();
        assert_eq!(from_int.amount, 42);
        assert!(serde_json::from_str::<Holder>(r#"{"amount":-1}"#).is_err());
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let mut ledger = BalanceLedger::new();
        ledger.credit(&Address::from_label("alice"), 1_000);
        ledger.credit(&Address::from_label("bob"), 2_000);
        ledger.credit(&Address::from_label("carol"), 3_000);
        let root1 = build_merkle(ledger.leaves());
        let root2 = build_merkle(ledger.clone().leaves());
        assert_eq!(root1, root2);

        ledger.credit(&Address::from_label("carol"), 1);
        assert_ne!(build_merkle(ledger.leaves()), root1);
    }
}
