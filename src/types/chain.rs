use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::AssetsError;

/// EVM chain identifier.
///
/// Rendered as a `0x`-prefixed lowercase hex string (`0x1`, `0x89`), which is
/// also the form used as a key in serialized state. Parsing accepts either the
/// hex form or a plain decimal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const MAINNET: ChainId = ChainId(1);
    pub const BSC: ChainId = ChainId(56);
    pub const POLYGON: ChainId = ChainId(137);
    pub const ARBITRUM: ChainId = ChainId(42161);
    pub const LINEA: ChainId = ChainId(59144);

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Decimal rendering, used in API paths.
    pub fn to_decimal_string(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = AssetsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(ChainId)
            .map_err(|_| AssetsError::InvalidChainId(s.to_string()))
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        ChainId(value)
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ChainId(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A chain paired with the currency its rates should be quoted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTarget {
    pub chain_id: ChainId,
    pub native_currency: String,
}

impl ChainTarget {
    pub fn new(chain_id: ChainId, native_currency: impl Into<String>) -> Self {
        Self {
            chain_id,
            native_currency: native_currency.into(),
        }
    }
}

impl fmt::Display for ChainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.native_currency)
    }
}

/// Network configuration as exposed by the network provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    pub chain_id: ChainId,
    pub native_currency: String,
    #[serde(default)]
    pub name: String,
    /// Identifiers of the network clients backed by this configuration.
    #[serde(default)]
    pub network_client_ids: Vec<String>,
}

impl NetworkConfiguration {
    pub fn target(&self) -> ChainTarget {
        ChainTarget::new(self.chain_id, self.native_currency.clone())
    }
}
