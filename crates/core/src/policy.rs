//! Request policy flags

use crate::errors::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// What a single request is permitted to do.
    ///
    /// The flag set is closed: bits or names outside it are rejected by
    /// [`CachePolicy::try_from_bits`] and [`CachePolicy::from_str`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CachePolicy: u32 {
        /// Allow a query for existing data in local stores
        const QUERY_LOCAL = 1 << 0;
        /// Allow a query for existing data in remote stores
        const QUERY_REMOTE = 1 << 1;
        /// Allow a query in any store
        const QUERY = Self::QUERY_LOCAL.bits() | Self::QUERY_REMOTE.bits();
        /// Allow writing to local stores
        const STORE_LOCAL = 1 << 2;
        /// Allow writing to remote stores
        const STORE_REMOTE = 1 << 3;
        /// Allow writing to any store
        const STORE = Self::STORE_LOCAL.bits() | Self::STORE_REMOTE.bits();
        /// Return hashes and sizes without payload bytes
        const SKIP_DATA = 1 << 4;
        /// Query and store everywhere
        const DEFAULT = Self::QUERY.bits() | Self::STORE.bits();
    }
}

impl CachePolicy {
    /// Convert raw bits, rejecting anything outside the flag set
    pub fn try_from_bits(bits: u32) -> Result<Self> {
        Self::from_bits(bits).ok_or_else(|| {
            Error::invalid_policy(
                format!("{bits:#x}"),
                format!("unknown flag bits {:#x}", bits & !Self::all().bits()),
            )
        })
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    /// Whether a store of the given locality may be queried
    pub fn allows_query(&self, local: bool) -> bool {
        self.contains(if local {
            Self::QUERY_LOCAL
        } else {
            Self::QUERY_REMOTE
        })
    }

    /// Whether a store of the given locality may be written
    pub fn allows_store(&self, local: bool) -> bool {
        self.contains(if local {
            Self::STORE_LOCAL
        } else {
            Self::STORE_REMOTE
        })
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        bitflags::parser::to_writer(self, f)
    }
}

impl FromStr for CachePolicy {
    type Err = Error;

    /// Parse names separated by `|` or `,`, case-insensitively.
    /// Hex values are not accepted.
    fn from_str(s: &str) -> Result<Self> {
        let mut policy = Self::empty();
        for name in s.split(['|', ',']).map(str::trim) {
            if name.is_empty() || name.eq_ignore_ascii_case("NONE") {
                continue;
            }
            let upper = name.to_ascii_uppercase();
            let flag = Self::from_name(&upper)
                .ok_or_else(|| Error::invalid_policy(s, format!("unknown flag '{name}'")))?;
            policy |= flag;
        }
        Ok(policy)
    }
}

impl Serialize for CachePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CachePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Self::try_from_bits(bits).map_err(serde::de::Error::custom)
    }
}
