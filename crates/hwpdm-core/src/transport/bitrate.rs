//! Supported bus bitrates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown bitrate '{0}', expected one of 1M, 500K, 250K, 125K, 100K, 83K, 62K, 50K, 10K")]
pub struct UnknownBitrate(pub String);

/// Bitrate table keyed by the short names operators type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Bitrate {
    K10,
    K50,
    K62,
    K83,
    K100,
    K125,
    #[default]
    K250,
    K500,
    M1,
}

impl Bitrate {
    /// All entries in display order.
    pub const ALL: [Bitrate; 9] = [
        Bitrate::M1,
        Bitrate::K500,
        Bitrate::K250,
        Bitrate::K125,
        Bitrate::K100,
        Bitrate::K62,
        Bitrate::K50,
        Bitrate::K83,
        Bitrate::K10,
    ];

    pub const fn bits_per_second(self) -> u32 {
        match self {
            Bitrate::K10 => 10_000,
            Bitrate::K50 => 50_000,
            Bitrate::K62 => 62_500,
            Bitrate::K83 => 83_333,
            Bitrate::K100 => 100_000,
            Bitrate::K125 => 125_000,
            Bitrate::K250 => 250_000,
            Bitrate::K500 => 500_000,
            Bitrate::M1 => 1_000_000,
        }
    }

    pub const fn key(self) -> &'static str {
        match self {
            Bitrate::K10 => "10K",
            Bitrate::K50 => "50K",
            Bitrate::K62 => "62K",
            Bitrate::K83 => "83K",
            Bitrate::K100 => "100K",
            Bitrate::K125 => "125K",
            Bitrate::K250 => "250K",
            Bitrate::K500 => "500K",
            Bitrate::M1 => "1M",
        }
    }
}

impl FromStr for Bitrate {
    type Err = UnknownBitrate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Bitrate::ALL
            .into_iter()
            .find(|b| b.key() == wanted)
            .ok_or_else(|| UnknownBitrate(s.to_string()))
    }
}

impl TryFrom<String> for Bitrate {
    type Error = UnknownBitrate;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bitrate> for String {
    fn from(value: Bitrate) -> Self {
        value.key().to_string()
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
