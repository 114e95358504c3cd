//! Hardware profiles and memory sizes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Memory amount in whole gigabytes, written `<n>G` (e.g. `4G`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemorySize {
    gigabytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid memory size {input:?}: expected <int>G, e.g. 4G")]
pub struct ParseMemorySizeError {
    input: String,
}

impl MemorySize {
    pub const fn from_gigabytes(gigabytes: u32) -> Self {
        Self { gigabytes }
    }

    pub fn gigabytes(&self) -> u32 {
        self.gigabytes
    }

    /// Round a kilobyte count up to whole gigabytes.
    pub fn from_kilobytes_ceil(kilobytes: u64) -> Self {
        const KB_PER_GB: u64 = 1024 * 1024;
        let gigabytes = kilobytes.div_ceil(KB_PER_GB);
        Self {
            gigabytes: u32::try_from(gigabytes).unwrap_or(u32::MAX),
        }
    }
}

impl FromStr for MemorySize {
    type Err = ParseMemorySizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMemorySizeError {
            input: s.to_string(),
        };
        let digits = s.strip_suffix('G').ok_or_else(err)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let gigabytes = digits.parse::<u32>().map_err(|_| err())?;
        Ok(Self { gigabytes })
    }
}

impl TryFrom<String> for MemorySize {
    type Error = ParseMemorySizeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MemorySize> for String {
    fn from(value: MemorySize) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}G", self.gigabytes)
    }
}

/// Named hardware profile applied by `hw set <profile>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwProfile {
    Seahawk,
    Seaturtle,
}

impl HwProfile {
    pub const ALL: [HwProfile; 2] = [HwProfile::Seahawk, HwProfile::Seaturtle];

    pub fn name(&self) -> &'static str {
        match self {
            HwProfile::Seahawk => "seahawk",
            HwProfile::Seaturtle => "seaturtle",
        }
    }

    pub fn num_cpus(&self) -> u32 {
        match self {
            HwProfile::Seahawk => 4,
            HwProfile::Seaturtle => 2,
        }
    }

    pub fn memory(&self) -> MemorySize {
        match self {
            HwProfile::Seahawk => MemorySize::from_gigabytes(4),
            HwProfile::Seaturtle => MemorySize::from_gigabytes(3),
        }
    }
}

impl fmt::Display for HwProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown hardware profile {0:?}")]
pub struct UnknownProfileError(String);

impl FromStr for HwProfile {
    type Err = UnknownProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HwProfile::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownProfileError(s.to_string()))
    }
}
