use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::allowance::AllowanceRegistry;
use crate::config::TokenMetadata;
use crate::engine::TokenLedger;
use crate::error::LedgerError;
use crate::events::EventLog;
use crate::fees::{FeeSchedule, MAX_SUPPLY};
use crate::ledger::{Address, Amount, BalanceLedger};
use crate::referral::ReferralRegistry;

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),

    #[error("state root mismatch: recorded {recorded}, computed {computed}")]
    RootMismatch { recorded: String, computed: String },

    #[error("balances sum to {balances} but total supply is {supply}")]
    SupplyMismatch { balances: Amount, supply: Amount },

    #[error("total supply {supply} exceeds the maximum of {max}")]
    SupplyTooLarge { supply: Amount, max: Amount },

    #[error("state file already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("state file is locked by another writer ({0}); remove it if no writer is running")]
    Locked(PathBuf),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub version: u8,
    pub height: u64,
    pub token: TokenMetadata,
    pub owner: Address,
    pub total_supply: Amount,
    pub fees: FeeSchedule,
    pub balances: BalanceLedger,
    pub allowances: AllowanceRegistry,
    pub referrals: ReferralRegistry,
    pub events: EventLog,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

impl TokenLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            height: self.height,
            token: self.token.clone(),
            owner: self.owner,
            total_supply: self.total_supply,
            fees: self.fees,
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
            referrals: self.referrals.clone(),
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuilds a ledger, re-checking the rate invariant, the supply cap,
    /// conservation, referral entries, null-account balances and the
    /// state root.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, StoreError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(snapshot.version));
        }
        snapshot.fees.validate()?;
        if snapshot.owner.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "owner" }.into());
        }
        if snapshot.total_supply > MAX_SUPPLY {
            return Err(StoreError::SupplyTooLarge {
                supply: snapshot.total_supply,
                max: MAX_SUPPLY,
            });
        }
        if snapshot.balances.balance_of(&Address::ZERO) > 0 {
            return Err(LedgerError::ZeroAddress { role: "holder" }.into());
        }
        snapshot.referrals.validate()?;
        let recorded = snapshot.state_root;
        let ledger = Self {
            token: snapshot.token,
            owner: snapshot.owner,
            total_supply: snapshot.total_supply,
            fees: snapshot.fees,
            balances: snapshot.balances,
            allowances: snapshot.allowances,
            referrals: snapshot.referrals,
            events: snapshot.events,
            height: snapshot.height,
        };
        if !ledger.is_conserved() {
            return Err(StoreError::SupplyMismatch {
                balances: ledger.balances.total(),
                supply: ledger.total_supply,
            });
        }
        let computed = ledger.state_root();
        if computed != recorded {
            return Err(StoreError::RootMismatch {
                recorded: hex::encode(recorded),
                computed: hex::encode(computed),
            });
        }
        Ok(ledger)
    }
}

/// JSON state file holding one ledger.
pub struct StateFile {
    path: PathBuf,
}

/// Exclusive claim on a [`StateFile`], held for a whole
/// load, apply, save cycle. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to release state lock");
        }
    }
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Claims the sidecar `<path>.lock`. A second writer gets
    /// [`StoreError::Locked`] until the first lock is dropped.
    pub fn lock(&self) -> Result<StateLock, StoreError> {
        let mut path = self.path.clone().into_os_string();
        path.push(".lock");
        let path = PathBuf::from(path);
        self.ensure_dir()?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked(path));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let lock = StateLock { path };
        writeln!(file, "{}", std::process::id()).map_err(|source| StoreError::Io {
            path: lock.path.clone(),
            source,
        })?;
        debug!(path = %lock.path.display(), "state locked");
        Ok(lock)
    }

    pub fn load(&self) -> Result<TokenLedger, StoreError> {
        let bytes = fs::read(&self.path).map_err(|source| self.io(source))?;
        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
        let ledger = TokenLedger::from_snapshot(snapshot)?;
        debug!(path = %self.path.display(), height = ledger.height(), "state loaded");
        Ok(ledger)
    }

    /// Writes a uniquely named temp file beside the target and renames it
    /// over the target, so a crash mid-write keeps the previous state.
    pub fn save(&self, ledger: &TokenLedger) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&ledger.snapshot())?;
        let dir = self.ensure_dir()?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|source| self.io(source))?;
        tmp.write_all(&json).map_err(|source| self.io(source))?;
        tmp.as_file().sync_all().map_err(|source| self.io(source))?;
        tmp.persist(&self.path).map_err(|err| self.io(err.error))?;
        debug!(path = %self.path.display(), height = ledger.height(), "state saved");
        Ok(())
    }

    /// Like [`StateFile::save`] but refuses to overwrite unless `force`.
    pub fn create(&self, ledger: &TokenLedger, force: bool) -> Result<(), StoreError> {
        if self.exists() && !force {
            return Err(StoreError::AlreadyExists(self.path.clone()));
        }
        self.save(ledger)
    }

    fn ensure_dir(&self) -> Result<&Path, StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| self.io(source))?;
        Ok(dir)
    }

    fn io(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

mod hex_root {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(root: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(root))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let mut root = [0u8; 32];
        hex::decode_to_slice(raw.trim(), &mut root).map_err(de::Error::custom)?;
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config::LedgerConfig;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn sample_ledger() -> TokenLedger {
        let config = LedgerConfig::new(addr("carol"), 1_000_000)
            .with_initial_holder(addr("alice"))
            .with_rates(50, 100);
        let mut ledger = TokenLedger::new(&config).unwrap();
        ledger.set_referral(addr("alice"), addr("bob")).unwrap();
        ledger.approve(addr("alice"), addr("sam"), 7_000).unwrap();
        ledger.transfer(addr("alice"), addr("dave"), 1_000).unwrap();
        ledger
    }

    fn referrals(pairs: &[(Address, Address)]) -> ReferralRegistry {
        let map: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .map(|(account, referrer)| {
                let referrer = serde_json::Value::String(referrer.to_string());
                (account.to_string(), referrer)
            })
            .collect();
        serde_json::from_value(map.into()).unwrap()
    }

    #[test]
    fn snapshot_restores_identical_ledger() {
        let ledger = sample_ledger();
        let json = serde_json::to_string(&ledger.snapshot()).unwrap();
        let snapshot: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        let restored = TokenLedger::from_snapshot(snapshot).unwrap();
        assert_eq!(restored, ledger);
    }

    #[test]
    fn tampered_balances_are_detected() {
        let ledger = sample_ledger();
        let mut snapshot = ledger.snapshot();
        snapshot.balances.credit(&addr("mallory"), 1);
        snapshot.total_supply += 1;
        assert!(matches!(
            TokenLedger::from_snapshot(snapshot),
            Err(StoreError::RootMismatch { .. })
        ));

        let mut unbalanced = ledger.snapshot();
        unbalanced.balances.credit(&addr("mallory"), 1);
        assert!(matches!(
            TokenLedger::from_snapshot(unbalanced),
            Err(StoreError::SupplyMismatch { .. })
        ));
    }

    #[test]
    fn invalid_rates_are_rejected_on_load() {
        let json = serde_json::to_string(&sample_ledger().snapshot()).unwrap();
        assert!(json.contains(r#""referral_rate":50"#));
        let json = json.replace(r#""referral_rate":50"#, r#""referral_rate":900"#);
        let snapshot: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            TokenLedger::from_snapshot(snapshot),
            Err(StoreError::Ledger(LedgerError::FeeRateOutOfBounds { .. }))
        ));
    }

    #[test]
    fn invalid_referrals_are_rejected_on_load() {
        let ledger = sample_ledger();

        let mut to_zero = ledger.snapshot();
        to_zero.referrals = referrals(&[(addr("dave"), Address::ZERO)]);
        assert!(matches!(
            TokenLedger::from_snapshot(to_zero),
            Err(StoreError::Ledger(LedgerError::ZeroAddress { role: "referrer" }))
        ));

        let mut to_self = ledger.snapshot();
        to_self.referrals = referrals(&[(addr("dave"), addr("dave"))]);
        assert!(matches!(
            TokenLedger::from_snapshot(to_self),
            Err(StoreError::Ledger(LedgerError::SelfReferral(_)))
        ));
    }

    #[test]
    fn null_account_balance_is_rejected_on_load() {
        let mut snapshot = sample_ledger().snapshot();
        snapshot.balances.credit(&Address::ZERO, 1);
        assert!(matches!(
            TokenLedger::from_snapshot(snapshot),
            Err(StoreError::Ledger(LedgerError::ZeroAddress { .. }))
        ));
    }

    #[test]
    fn state_file_round_trip() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("state.json"));
        let ledger = sample_ledger();

        file.create(&ledger, false).unwrap();
        assert!(matches!(
            file.create(&ledger, false),
            Err(StoreError::AlreadyExists(_))
        ));
        let loaded = file.load().unwrap();
        assert_eq!(loaded, ledger);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec!["state.json"]);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("absent.json"));
        assert!(matches!(file.load(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn second_writer_is_refused_until_lock_released() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        file.create(&sample_ledger(), false).unwrap();

        let first = file.lock().unwrap();
        let mut ledger = file.load().unwrap();
        ledger.transfer(addr("alice"), addr("dave"), 1_000).unwrap();
        assert!(matches!(file.lock(), Err(StoreError::Locked(_))));
        file.save(&ledger).unwrap();
        drop(first);

        let _second = file.lock().unwrap();
        let mut ledger = file.load().unwrap();
        ledger.transfer(addr("alice"), addr("erin"), 2_000).unwrap();
        file.save(&ledger).unwrap();

        let stored = file.load().unwrap();
        assert_eq!(stored.balance_of(&addr("dave")), 995 + 995);
        assert_eq!(stored.balance_of(&addr("erin")), 1_990);
        assert_eq!(stored.balance_of(&addr("alice")), 1_000_000 - 4_000);
    }

    #[test]
    fn dropping_the_lock_removes_the_sidecar() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let lock_path = dir.path().join("state.json.lock");
        {
            let _lock = file.lock().unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }
}
