//! Construction-time configuration.
//!
//! A ledger is described by a small TOML document:
//!
//! ```toml
//! owner = "carol"
//! initial_holder = "alice"
//! initial_supply = "1000000"
//!
//! [token]
//! name = "Referral Token"
//! symbol = "RFT"
//! decimals = 18
//!
//! [fees]
//! referral_rate = 50
//! beneficiary_rate = 100
//! ```
//!
//! Account fields take `0x`-prefixed hex or a label (see
//! [`Address::from_label`]).

use std::{fs, path::Path, path::PathBuf};

use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::error::LedgerError;
use crate::fees::{FeeSchedule, MAX_SUPPLY};
use crate::ledger::{amount_str, Address, Amount};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("initial supply {supply} exceeds the maximum of {max}")]
    SupplyTooLarge { supply: Amount, max: Amount },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Opaque, immutable token metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    18
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "Referral Token".to_string(),
            symbol: "RFT".to_string(),
            decimals: default_decimals(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeeConfig {
    #[serde(default = "default_referral_rate")]
    pub referral_rate: u16,
    #[serde(default = "default_beneficiary_rate")]
    pub beneficiary_rate: u16,
}

fn default_referral_rate() -> u16 {
    FeeSchedule::default().referral_rate()
}

fn default_beneficiary_rate() -> u16 {
    FeeSchedule::default().beneficiary_rate()
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            referral_rate: default_referral_rate(),
            beneficiary_rate: default_beneficiary_rate(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Ledger owner; also the fallback fee beneficiary.
    #[serde(deserialize_with = "account")]
    pub owner: Address,
    /// Receives the initial supply. Defaults to `owner`.
    #[serde(default, deserialize_with = "optional_account")]
    pub initial_holder: Option<Address>,
    #[serde(with = "amount_str")]
    pub initial_supply: Amount,
    #[serde(default)]
    pub token: TokenMetadata,
    #[serde(default)]
    pub fees: FeeConfig,
}

impl LedgerConfig {
    pub fn new(owner: Address, initial_supply: Amount) -> Self {
        Self {
            owner,
            initial_holder: None,
            initial_supply,
            token: TokenMetadata::default(),
            fees: FeeConfig::default(),
        }
    }

    pub fn with_initial_holder(mut self, holder: Address) -> Self {
        self.initial_holder = Some(holder);
        self
    }

    pub fn with_rates(mut self, referral_rate: u16, beneficiary_rate: u16) -> Self {
        self.fees = FeeConfig {
            referral_rate,
            beneficiary_rate,
        };
        self
    }

    pub fn with_token(mut self, token: TokenMetadata) -> Self {
        self.token = token;
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn holder(&self) -> Address {
        self.initial_holder.unwrap_or(self.owner)
    }

    pub fn fee_schedule(&self) -> Result<FeeSchedule, ConfigError> {
        Ok(FeeSchedule::new(
            self.fees.referral_rate,
            self.fees.beneficiary_rate,
        )?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.is_zero() {
            return Err(LedgerError::ZeroAddress { role: "owner" }.into());
        }
        if self.holder().is_zero() {
            return Err(LedgerError::ZeroAddress {
                role: "initial holder",
            }
            .into());
        }
        if self.initial_supply > MAX_SUPPLY {
            return Err(ConfigError::SupplyTooLarge {
                supply: self.initial_supply,
                max: MAX_SUPPLY,
            });
        }
        self.fee_schedule()?;
        Ok(())
    }
}

fn account<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Address::parse_or_label(&raw).map_err(de::Error::custom)
}

fn optional_account<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Address>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|value| Address::parse_or_label(&value).map_err(de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = LedgerConfig::from_toml_str(
            r#"
            owner = "carol"
            initial_holder = "alice"
            initial_supply = "1_000_000"

            [token]
            name = "Referral Token"
            symbol = "RFT"
            decimals = 6

            [fees]
            referral_rate = 50
            beneficiary_rate = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.owner, Address::from_label("carol"));
        assert_eq!(config.holder(), Address::from_label("alice"));
        assert_eq!(config.initial_supply, 1_000_000);
        assert_eq!(config.token.decimals, 6);
        assert_eq!(config.fees.referral_rate, 50);
    }

    #[test]
    fn applies_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            owner = "0x00000000000000000000000000000000000000aa"
            initial_supply = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.holder(), config.owner);
        assert_eq!(config.token, TokenMetadata::default());
        assert_eq!(config.fees, FeeConfig::default());
        assert_eq!(config.owner.as_bytes()[19], 0xaa);
    }

    #[test]
    fn rejects_invalid_rates() {
        let err = LedgerConfig::from_toml_str(
            r#"
            owner = "carol"
            initial_supply = 1

            [fees]
            referral_rate = 200
            beneficiary_rate = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Ledger(LedgerError::FeeRateOrderingViolation { .. })
        ));
    }

    #[test]
    fn rejects_zero_owner_and_oversized_supply() {
        let zero_owner = LedgerConfig::new(Address::ZERO, 10);
        assert!(matches!(
            zero_owner.validate(),
            Err(ConfigError::Ledger(LedgerError::ZeroAddress { role: "owner" }))
        ));

        let huge = LedgerConfig::new(Address::from_label("carol"), MAX_SUPPLY + 1);
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::SupplyTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_truncated_hex_accounts() {
        let owner = LedgerConfig::from_toml_str(
            r#"
            owner = "0x00000000000000000000000000000000000000a"
            initial_supply = 1
            "#,
        );
        assert!(matches!(owner, Err(ConfigError::Parse(_))));

        let holder = LedgerConfig::from_toml_str(
            r#"
            owner = "carol"
            initial_holder = "0x00000000000000000000000000000000000000a"
            initial_supply = 1
            "#,
        );
        assert!(matches!(holder, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = LedgerConfig::from_toml_str(
            r#"
            owner = "carol"
            initial_supply = 1
            burn_rate = 5
            "#,
        );
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }
}
