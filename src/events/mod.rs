use serde::{Deserialize, Serialize};

use crate::ledger::{amount_str, Address, Amount};

/// Which part of a value movement a `Transfer` event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferLeg {
    /// Initial allocation at construction; `from` is the zero address.
    Mint,
    Fee,
    Net,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
        leg: TransferLeg,
    },
    Approval {
        owner: Address,
        spender: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    ReferralSet {
        account: Address,
        referrer: Address,
    },
    FeeRatesUpdated {
        referral_rate: u16,
        beneficiary_rate: u16,
    },
    OwnershipTransferred {
        previous: Address,
        new: Address,
    },
}

/// Append-only audit trail.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<LedgerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_slice(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// The last `n` events, oldest first.
    pub fn tail(&self, n: usize) -> &[LedgerEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    /// `(from, to, amount)` of every transfer leg, in emission order.
    pub fn transfers(&self) -> impl Iterator<Item = (Address, Address, Amount)> + '_ {
        self.events.iter().filter_map(|event| match event {
            LedgerEvent::Transfer {
                from, to, amount, ..
            } => Some((*from, *to, *amount)),
            _ => None,
        })
    }
}
