//! Cross-chain token identifier mapping
//!
//! Built once at startup from paired configuration and shared read-only by
//! the relay core. Lookups are total: an asset with no entry maps to itself
//! (same-address convention across chains).

use alloy::primitives::Address;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{RelayError, RelayResult};

/// Static asset → asset mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap {
    entries: HashMap<Address, Address>,
}

impl TokenMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(source, destination)` pairs.
    ///
    /// Each pair is inserted in both directions, so `A:B` yields `A→B` and
    /// `B→A`. A key that would be inserted twice is rejected.
    pub fn from_pairs(pairs: &[(Address, Address)]) -> RelayResult<Self> {
        let mut entries = HashMap::with_capacity(pairs.len() * 2);

        for (src, dst) in pairs {
            if src == dst {
                return Err(RelayError::Config(format!(
                    "token pair maps {} to itself",
                    src
                )));
            }
            for (key, value) in [(*src, *dst), (*dst, *src)] {
                if let Some(existing) = entries.insert(key, value) {
                    return Err(RelayError::Config(format!(
                        "duplicate token mapping for {}: already mapped to {}",
                        key, existing
                    )));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Parse the `TOKEN_PAIRS` format: `srcA:dstA,srcB:dstB`
    pub fn parse(raw: &str) -> RelayResult<Self> {
        let mut pairs = Vec::new();

        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (src, dst) = entry.split_once(':').ok_or_else(|| {
                RelayError::Config(format!("unpaired token entry '{}'", entry))
            })?;
            let src = parse_token(src)?;
            let dst = parse_token(dst)?;
            pairs.push((src, dst));
        }

        Self::from_pairs(&pairs)
    }

    /// Destination asset for `token`, or `token` itself when unmapped
    pub fn map(&self, token: Address) -> Address {
        self.entries.get(&token).copied().unwrap_or(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_token(raw: &str) -> RelayResult<Address> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RelayError::Config(
            "unpaired token entry: empty side".to_string(),
        ));
    }
    Address::from_str(raw)
        .map_err(|e| RelayError::Config(format!("invalid token address '{}': {}", raw, e)))
}
