//! Transfer orchestration over the balance, allowance and referral
//! registries.
//!
//! Every public operation validates against immutable state first and only
//! then mutates, so a rejected call leaves the ledger exactly as it was.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::allowance::AllowanceRegistry;
use crate::config::{ConfigError, LedgerConfig, TokenMetadata};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventLog, LedgerEvent, TransferLeg};
use crate::fees::{compute_fee, FeeKind, FeeSchedule};
use crate::ledger::{build_merkle, Address, Amount, BalanceLedger};
use crate::referral::ReferralRegistry;

mod governance;

/// How a transfer of a given size from a given sender would be split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferQuote {
    pub fee_recipient: Address,
    pub fee_kind: FeeKind,
    pub rate: u16,
    pub fee: Amount,
    pub net: Amount,
}

/// Outcome of an applied transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub sender: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub split: TransferQuote,
}

/// The complete ledger state. All mutation goes through `&mut self`
/// methods; there is no shared or global state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLedger {
    pub(crate) token: TokenMetadata,
    pub(crate) owner: Address,
    pub(crate) total_supply: Amount,
    pub(crate) fees: FeeSchedule,
    pub(crate) balances: BalanceLedger,
    pub(crate) allowances: AllowanceRegistry,
    pub(crate) referrals: ReferralRegistry,
    pub(crate) events: EventLog,
    pub(crate) height: u64,
}

impl TokenLedger {
    /// Builds a ledger and credits the whole supply to the initial holder.
    pub fn new(config: &LedgerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let holder = config.holder();
        let mut ledger = Self {
            token: config.token.clone(),
            owner: config.owner,
            total_supply: config.initial_supply,
            fees: config.fee_schedule()?,
            balances: BalanceLedger::new(),
            allowances: AllowanceRegistry::new(),
            referrals: ReferralRegistry::new(),
            events: EventLog::new(),
            height: 0,
        };
        ledger.balances.credit(&holder, config.initial_supply);
        ledger.events.push(LedgerEvent::Transfer {
            from: Address::ZERO,
            to: holder,
            amount: config.initial_supply,
            leg: TransferLeg::Mint,
        });
        info!(
            symbol = %ledger.token.symbol,
            owner = %ledger.owner,
            %holder,
            supply = %ledger.total_supply,
            "ledger initialised"
        );
        Ok(ledger)
    }

    pub fn name(&self) -> &str {
        &self.token.name
    }

    pub fn symbol(&self) -> &str {
        &self.token.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.token.decimals
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.token
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// The fallback fee recipient.
    pub fn beneficiary(&self) -> Address {
        self.owner
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        self.fees
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.balance_of(account)
    }

    pub fn allowance_of(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances.allowance_of(owner, spender)
    }

    pub fn referrer_of(&self, account: &Address) -> Option<Address> {
        self.referrals.referrer_of(account)
    }

    pub fn balances(&self) -> &BalanceLedger {
        &self.balances
    }

    pub fn allowances(&self) -> &AllowanceRegistry {
        &self.allowances
    }

    pub fn referrals(&self) -> &ReferralRegistry {
        &self.referrals
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Number of state-changing operations applied since construction.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Fee recipient and split for a transfer by `sender`, read-only.
    pub fn quote_transfer(&self, sender: &Address, amount: Amount) -> TransferQuote {
        let (fee_recipient, fee_kind) = match self.referrals.referrer_of(sender) {
            Some(referrer) => (referrer, FeeKind::Referral),
            None => (self.owner, FeeKind::Beneficiary),
        };
        let rate = self.fees.rate_for(fee_kind);
        let fee = compute_fee(amount, rate);
        TransferQuote {
            fee_recipient,
            fee_kind,
            rate,
            fee,
            // rate <= MAX_FEE_RATE keeps fee <= amount.
            net: amount - fee,
        }
    }

    pub fn transfer(
        &mut self,
        sender: Address,
        recipient: Address,
        amount: Amount,
    ) -> LedgerResult<TransferReceipt> {
        let receipt = self
            .plan_transfer(sender, recipient, amount)
            .inspect_err(|err| warn!(%sender, %recipient, %amount, %err, "transfer rejected"))?;
        self.commit_transfer(&receipt)?;
        Ok(receipt)
    }

    /// Spends `spender`'s allowance over `owner`, then transfers from `owner`.
    pub fn transfer_delegated(
        &mut self,
        owner: Address,
        spender: Address,
        recipient: Address,
        amount: Amount,
    ) -> LedgerResult<TransferReceipt> {
        let staged = non_zero(owner, "owner")
            .and_then(|_| non_zero(spender, "spender"))
            .and_then(|_| self.allowances.check_consume(&owner, &spender, amount))
            .and_then(|_| self.plan_transfer(owner, recipient, amount));
        let receipt = staged.inspect_err(|err| {
            warn!(%owner, %spender, %recipient, %amount, %err, "delegated transfer rejected")
        })?;
        self.allowances.consume(&owner, &spender, amount)?;
        self.commit_transfer(&receipt)?;
        Ok(receipt)
    }

    pub fn approve(
        &mut self,
        owner: Address,
        spender: Address,
        amount: Amount,
    ) -> LedgerResult<()> {
        self.allowances
            .approve(&owner, &spender, amount)
            .inspect_err(|err| warn!(%owner, %spender, %err, "approval rejected"))?;
        self.record_approval(owner, spender);
        Ok(())
    }

    pub fn increase_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        added: Amount,
    ) -> LedgerResult<Amount> {
        let updated = self
            .allowance_of(&owner, &spender)
            .checked_add(added)
            .ok_or(LedgerError::Overflow)
            .and_then(|updated| {
                self.allowances.approve(&owner, &spender, updated)?;
                Ok(updated)
            })
            .inspect_err(|err| warn!(%owner, %spender, %err, "allowance increase rejected"))?;
        self.record_approval(owner, spender);
        Ok(updated)
    }

    pub fn decrease_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        subtracted: Amount,
    ) -> LedgerResult<Amount> {
        let updated = self
            .allowances
            .check_consume(&owner, &spender, subtracted)
            .and_then(|updated| {
                self.allowances.approve(&owner, &spender, updated)?;
                Ok(updated)
            })
            .inspect_err(|err| warn!(%owner, %spender, %err, "allowance decrease rejected"))?;
        self.record_approval(owner, spender);
        Ok(updated)
    }

    /// Assigns `referrer` to `account`. Write-once.
    pub fn set_referral(&mut self, account: Address, referrer: Address) -> LedgerResult<()> {
        self.referrals
            .assign(account, referrer)
            .inspect_err(|err| warn!(%account, %referrer, %err, "referral rejected"))?;
        self.events.push(LedgerEvent::ReferralSet { account, referrer });
        self.height += 1;
        info!(%account, %referrer, "referrer assigned");
        Ok(())
    }

    /// `true` while balances sum to the total supply.
    pub fn is_conserved(&self) -> bool {
        self.balances.total() == self.total_supply
    }

    /// SHA-256 Merkle root over parameters, balances, allowances and
    /// referrals. Events and height are not part of the root.
    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = Vec::new();
        let mut params = Sha256::new();
        params.update(b"params");
        params.update(self.owner.as_bytes());
        params.update(self.total_supply.to_le_bytes());
        params.update(self.fees.referral_rate().to_le_bytes());
        params.update(self.fees.beneficiary_rate().to_le_bytes());
        leaves.push(params.finalize().into());
        leaves.extend(self.balances.leaves());
        leaves.extend(self.allowances.leaves());
        leaves.extend(self.referrals.leaves());
        build_merkle(leaves)
    }

    fn plan_transfer(
        &self,
        sender: Address,
        recipient: Address,
        amount: Amount,
    ) -> LedgerResult<TransferReceipt> {
        if sender.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "sender" });
        }
        if recipient.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "recipient" });
        }
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let have = self.balances.balance_of(&sender);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: sender,
                have,
                need: amount,
            });
        }
        Ok(TransferReceipt {
            sender,
            recipient,
            amount,
            split: self.quote_transfer(&sender, amount),
        })
    }

    // The debit is the only fallible step and runs first.
    fn commit_transfer(&mut self, receipt: &TransferReceipt) -> LedgerResult<()> {
        let TransferReceipt {
            sender,
            recipient,
            amount,
            split,
        } = *receipt;
        self.balances.debit(&sender, amount)?;

        self.balances.credit(&split.fee_recipient, split.fee);
        self.events.push(LedgerEvent::Transfer {
            from: sender,
            to: split.fee_recipient,
            amount: split.fee,
            leg: TransferLeg::Fee,
        });

        self.balances.credit(&recipient, split.net);
        self.events.push(LedgerEvent::Transfer {
            from: sender,
            to: recipient,
            amount: split.net,
            leg: TransferLeg::Net,
        });

        self.height += 1;
        debug!(
            %sender,
            %recipient,
            fee_recipient = %split.fee_recipient,
            kind = ?split.fee_kind,
            %amount,
            fee = %split.fee,
            net = %split.net,
            "transfer applied"
        );
        Ok(())
    }

    fn record_approval(&mut self, owner: Address, spender: Address) {
        let amount = self.allowances.allowance_of(&owner, &spender);
        self.events.push(LedgerEvent::Approval {
            owner,
            spender,
            amount,
        });
        self.height += 1;
        debug!(%owner, %spender, %amount, "allowance set");
    }
}

fn non_zero(account: Address, role: &'static str) -> LedgerResult<()> {
    if account.is_zero() {
        return Err(LedgerError::ZeroAddress { role });
    }
    Ok(())
}
