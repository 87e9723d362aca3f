//! Output formats a consumer can write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named output representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Format {
    /// Portable network graphics.
    Png,
    /// Scalable vector graphics.
    Svg,
    /// Comma separated values, one file per metric.
    Csv,
    /// Comma separated values, single long-format file.
    Csv2,
    /// Gridded binary output.
    Netcdf,
    /// Gridded binary output, one variable per statistic.
    Netcdf2,
    /// Raw protobuf statistics.
    Protobuf,
    /// Paired time-series.
    Pairs,
}

impl Format {
    /// Every known format, in declaration order.
    pub const ALL: [Format; 8] = [
        Format::Png,
        Format::Svg,
        Format::Csv,
        Format::Csv2,
        Format::Netcdf,
        Format::Netcdf2,
        Format::Protobuf,
        Format::Pairs,
    ];

    /// Wire name of the format, also used as its routing tag key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Png => "PNG",
            Format::Svg => "SVG",
            Format::Csv => "CSV",
            Format::Csv2 => "CSV2",
            Format::Netcdf => "NETCDF",
            Format::Netcdf2 => "NETCDF2",
            Format::Protobuf => "PROTOBUF",
            Format::Pairs => "PAIRS",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown format name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown format: {0}")]
pub struct ParseFormatError(pub String);

impl FromStr for Format {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseFormatError(s.to_string()))
    }
}
