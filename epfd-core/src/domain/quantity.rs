//! Physical quantities, upstream sources and native resolutions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A physical quantity tracked on the hourly grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Price,
    Load,
    Wind,
    Solar,
}

impl Quantity {
    pub const ALL: [Quantity; 4] = [
        Quantity::Price,
        Quantity::Load,
        Quantity::Wind,
        Quantity::Solar,
    ];

    /// Canonical column name (with unit suffix) used in persisted tables.
    pub fn column(&self) -> &'static str {
        match self {
            Quantity::Price => "price_eur_mwh",
            Quantity::Load => "load_mw",
            Quantity::Wind => "wind_mw",
            Quantity::Solar => "solar_mw",
        }
    }

    /// Short name used in file names and config keys.
    pub fn key(&self) -> &'static str {
        match self {
            Quantity::Price => "price",
            Quantity::Load => "load",
            Quantity::Wind => "wind",
            Quantity::Solar => "solar",
        }
    }

    /// Position in [`Quantity::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Quantity::Price => 0,
            Quantity::Load => 1,
            Quantity::Wind => 2,
            Quantity::Solar => 3,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" | "price_eur_mwh" => Ok(Quantity::Price),
            "load" | "load_mw" => Ok(Quantity::Load),
            "wind" | "wind_mw" => Ok(Quantity::Wind),
            "solar" | "solar_mw" => Ok(Quantity::Solar),
            other => Err(format!("unknown quantity '{other}'")),
        }
    }
}

/// Upstream feed a series was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Open Power System Data bootstrap bundle (archival, hourly).
    Opsd,
    /// ENTSO-E transparency platform day-ahead auction results.
    Entsoe,
    /// SMARD grid-operator load and generation series.
    Smard,
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Source::Opsd => "opsd",
            Source::Entsoe => "entsoe",
            Source::Smard => "smard",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opsd" => Ok(Source::Opsd),
            "entsoe" => Ok(Source::Entsoe),
            "smard" => Ok(Source::Smard),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Native sampling resolution of an upstream series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    QuarterHour,
    Hour,
}

impl Resolution {
    pub fn minutes(&self) -> i64 {
        match self {
            Resolution::QuarterHour => 15,
            Resolution::Hour => 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_carry_units() {
        assert_eq!(Quantity::Price.column(), "price_eur_mwh");
        assert_eq!(Quantity::Load.column(), "load_mw");
        assert_eq!(Quantity::Wind.column(), "wind_mw");
        assert_eq!(Quantity::Solar.column(), "solar_mw");
    }

    #[test]
    fn quantity_parses_key_and_column() {
        assert_eq!("wind".parse::<Quantity>().unwrap(), Quantity::Wind);
        assert_eq!("load_mw".parse::<Quantity>().unwrap(), Quantity::Load);
        assert!("gas".parse::<Quantity>().is_err());
    }

    #[test]
    fn index_matches_all_order() {
        for (i, q) in Quantity::ALL.iter().enumerate() {
            assert_eq!(q.index(), i);
        }
    }

    #[test]
    fn source_serde_is_lowercase() {
        let json = serde_json::to_string(&Source::Entsoe).unwrap();
        assert_eq!(json, "\"entsoe\"");
        let back: Source = serde_json::from_str("\"smard\"").unwrap();
        assert_eq!(back, Source::Smard);
    }
}
