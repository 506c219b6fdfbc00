use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

/// What a measurement is believed to contain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SourceType {
    IntrinsicActivity,
    Calibration,
    Background,
    Foreground,
    #[default]
    Unknown,
    /// A tag read from a file that does not name one of the known kinds
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::IntrinsicActivity => "IntrinsicActivity",
            SourceType::Calibration => "Calibration",
            SourceType::Background => "Background",
            SourceType::Foreground => "Foreground",
            SourceType::Unknown => "Unknown",
            SourceType::Other(s) => s.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown | Self::Other(_))
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Infallible;

    /// Recognizes the names used across formats case-insensitively. Empty strings and
    /// "NotSpecified" map to [`SourceType::Unknown`]; anything else is kept verbatim.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = match trimmed.to_ascii_lowercase().as_str() {
            "intrinsicactivity" | "intrinsic" => Self::IntrinsicActivity,
            "calibration" => Self::Calibration,
            "background" => Self::Background,
            "foreground" => Self::Foreground,
            "" | "unknown" | "notspecified" => Self::Unknown,
            _ => Self::Other(trimmed.to_string()),
        };
        Ok(value)
    }
}

/// Whether a portal or search system reported an item present during the measurement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OccupancyStatus {
    NotOccupied,
    Occupied,
    #[default]
    Unknown,
    Other(String),
}

impl OccupancyStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OccupancyStatus::NotOccupied => "false",
            OccupancyStatus::Occupied => "true",
            OccupancyStatus::Unknown => "unknown",
            OccupancyStatus::Other(s) => s.as_str(),
        }
    }
}

impl Display for OccupancyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OccupancyStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "occupied" | "yes" => Self::Occupied,
            "false" | "0" | "notoccupied" | "not occupied" | "no" => Self::NotOccupied,
            "" | "unknown" => Self::Unknown,
            _ => Self::Other(trimmed.to_string()),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_source_type_parse() {
        assert_eq!("Foreground".parse::<SourceType>(), Ok(SourceType::Foreground));
        assert_eq!(" background ".parse::<SourceType>(), Ok(SourceType::Background));
        assert_eq!("NotSpecified".parse::<SourceType>(), Ok(SourceType::Unknown));
        let other: SourceType = "Neutron Check".parse().unwrap();
        assert_eq!(other, SourceType::Other("Neutron Check".to_string()));
        assert_eq!(other.to_string(), "Neutron Check");
        assert!(!other.is_known());
    }

    #[test_log::test]
    fn test_occupancy_parse() {
        assert_eq!("true".parse::<OccupancyStatus>(), Ok(OccupancyStatus::Occupied));
        assert_eq!("0".parse::<OccupancyStatus>(), Ok(OccupancyStatus::NotOccupied));
        assert_eq!(
            "partial".parse::<OccupancyStatus>(),
            Ok(OccupancyStatus::Other("partial".to_string()))
        );
    }
}
