//! Owner-gated administration. The gate lives here so the transfer engine
//! itself never consults caller identity.

use tracing::{info, warn};

use super::TokenLedger;
use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::ledger::Address;

impl TokenLedger {
    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_owner(&self, account: &Address) -> bool {
        !account.is_zero() && *account == self.owner
    }

    fn ensure_owner(&self, caller: &Address) -> LedgerResult<()> {
        if self.is_owner(caller) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized { caller: *caller })
        }
    }

    pub fn set_referral_rate(&mut self, caller: Address, rate: u16) -> LedgerResult<()> {
        self.ensure_owner(&caller)
            .and_then(|_| self.fees.set_referral_rate(rate))
            .inspect_err(|err| warn!(%caller, rate, %err, "referral rate update rejected"))?;
        self.record_rates();
        Ok(())
    }

    pub fn set_beneficiary_rate(&mut self, caller: Address, rate: u16) -> LedgerResult<()> {
        self.ensure_owner(&caller)
            .and_then(|_| self.fees.set_beneficiary_rate(rate))
            .inspect_err(|err| warn!(%caller, rate, %err, "beneficiary rate update rejected"))?;
        self.record_rates();
        Ok(())
    }

    /// Hands ownership, and with it the beneficiary role, to `new_owner`.
    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> LedgerResult<()> {
        self.ensure_owner(&caller)
            .and_then(|_| {
                if new_owner.is_zero() {
                    Err(LedgerError::ZeroAddress { role: "new owner" })
                } else {
                    Ok(())
                }
            })
            .inspect_err(|err| warn!(%caller, %new_owner, %err, "ownership transfer rejected"))?;
        let previous = std::mem::replace(&mut self.owner, new_owner);
        self.events.push(LedgerEvent::OwnershipTransferred {
            previous,
            new: new_owner,
        });
        self.height += 1;
        info!(%previous, new = %new_owner, "ownership transferred");
        Ok(())
    }

    fn record_rates(&mut self) {
        let referral_rate = self.fees.referral_rate();
        let beneficiary_rate = self.fees.beneficiary_rate();
        self.events.push(LedgerEvent::FeeRatesUpdated {
            referral_rate,
            beneficiary_rate,
        });
        self.height += 1;
        info!(referral_rate, beneficiary_rate, "fee rates updated");
    }
}
