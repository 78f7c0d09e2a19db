use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;

/// An amount of backing storage, in bytes.
///
/// Parsed from strings such as `"100M"` or `"2G"`. A bare number is taken to
/// be in megabytes, the unit temp storage resources are expressed in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Capacity(u64);

impl Capacity {
    pub const ZERO: Capacity = Capacity(0);
    pub const UNLIMITED: Capacity = Capacity(u64::MAX);

    pub const fn from_bytes(bytes: u64) -> Self {
        Capacity(bytes)
    }

    pub const fn from_mib(mib: u64) -> Self {
        Capacity(mib.saturating_mul(MIB))
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Size in megabytes, rounded up so a tmpfs is never smaller than asked.
    pub const fn mib_ceil(self) -> u64 {
        self.0.div_ceil(MIB)
    }

    pub fn checked_sub(self, other: Capacity) -> Option<Capacity> {
        self.0.checked_sub(other.0).map(Capacity)
    }

    pub fn saturating_add(self, other: Capacity) -> Capacity {
        Capacity(self.0.saturating_add(other.0))
    }
}

impl FromStr for Capacity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Capacity::UNLIMITED);
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        if digits.is_empty() {
            return Err(format!("Invalid capacity: '{}'", s));
        }
        let value: u64 = digits
            .parse()
            .map_err(|e| format!("Invalid capacity '{}': {}", s, e))?;
        let multiplier = match unit {
            "" | "M" | "m" => MIB,
            "B" | "b" => 1,
            "k" | "K" => KIB,
            "G" | "g" => GIB,
            "T" | "t" => TIB,
            _ => {
                return Err(format!(
                    "Invalid capacity unit '{}' in '{}'. Valid units are: B, k, M, G, T",
                    unit, s
                ));
            }
        };
        value
            .checked_mul(multiplier)
            .map(Capacity)
            .ok_or_else(|| format!("Capacity '{}' is too large", s))
    }
}

impl Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Capacity::UNLIMITED {
            return write!(f, "unlimited");
        }
        let b = self.0;
        if b == 0 {
            write!(f, "0M")
        } else if b % TIB == 0 {
            write!(f, "{}T", b / TIB)
        } else if b % GIB == 0 {
            write!(f, "{}G", b / GIB)
        } else if b % MIB == 0 {
            write!(f, "{}M", b / MIB)
        } else if b % KIB == 0 {
            write!(f, "{}k", b / KIB)
        } else {
            write!(f, "{}B", b)
        }
    }
}

impl Serialize for Capacity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Capacity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Capacity::from_str(&s).map_err(serde::de::Error::custom)
    }
}
