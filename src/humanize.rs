//! Human-readable byte sizes for memory ceilings and estimates

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::Mul;
use std::str::FromStr;
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Size overflows u64: {0}")]
    Overflow(String),
}

/// Byte count that parses from and prints as "512MB", "2GB", etc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn from_mib(mib: u64) -> Self {
        ByteSize(mib * MIB)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Multiplication that pins at `u64::MAX` instead of wrapping.
    pub fn saturating_mul(self, factor: u64) -> Self {
        ByteSize(self.0.saturating_mul(factor))
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[("TB", TIB), ("GB", GIB), ("MB", MIB), ("KB", KIB)];

        for &(unit, divisor) in UNITS {
            if self.0 >= divisor {
                let whole = self.0 / divisor;
                let tenths = (self.0 % divisor) * 10 / divisor;
                return if tenths == 0 {
                    format!("{whole}{unit}")
                } else {
                    format!("{whole}.{tenths}{unit}")
                };
            }
        }

        format!("{}B", self.0)
    }
}

impl From<usize> for ByteSize {
    fn from(value: usize) -> Self {
        ByteSize(value as u64)
    }
}

impl Mul<u64> for ByteSize {
    type Output = ByteSize;

    fn mul(self, rhs: u64) -> Self::Output {
        self.saturating_mul(rhs)
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Only exact multiples survive a round trip through the short form.
        let exact = [(TIB, "TB"), (GIB, "GB"), (MIB, "MB"), (KIB, "KB")]
            .into_iter()
            .find(|(divisor, _)| self.0 >= *divisor && self.0 % divisor == 0);

        match exact {
            Some((divisor, unit)) => {
                serializer.serialize_str(&format!("{}{unit}", self.0 / divisor))
            }
            None => serializer.serialize_u64(self.0),
        }
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl<'de> serde::de::Visitor<'de> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"512MB\", \"1GB\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size cannot be negative: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        if let Ok(num) = s.parse::<u64>() {
            return Ok(ByteSize(num));
        }

        let Some(pos) = s.find(|c: char| !c.is_ascii_digit()) else {
            return Err(ParseError::InvalidFormat(s));
        };
        if pos == 0 {
            return Err(ParseError::InvalidFormat(s));
        }
        let (num_str, unit) = s.split_at(pos);
        let num: u64 = num_str.parse()?;

        let multiplier = match unit.trim() {
            "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => MIB,
            "G" | "GB" | "GIB" => GIB,
            "T" | "TB" | "TIB" => TIB,
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        num.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or(ParseError::Overflow(s))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}
