use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

/// Known detection system models.
///
/// The name of each variant as written to files is given by [`DetectorType::as_str`]; any
/// other name read from a file is preserved in [`DetectorType::Other`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetectorType {
    /// GR130 or GR135 systems
    Exploranium,
    IdentiFinder,
    /// Covers both the NG and NGH, which share a crystal size
    IdentiFinderNG,
    IdentiFinderLaBr3,
    /// A Detective whose exact model could not be determined
    DetectiveUnknown,
    DetectiveEx,
    DetectiveEx100,
    DetectiveEx200,
    DetectiveX,
    SAIC8,
    Falcon5000,
    MicroDetective,
    MicroRaider,
    RadHunterNaI,
    RadHunterLaBr3,
    Rsi701,
    Rsi705,
    AvidRsi,
    OrtecRadEagleNai,
    OrtecRadEagleCeBr2Inch,
    OrtecRadEagleCeBr3Inch,
    OrtecRadEagleLaBr,
    Sam940LaBr3,
    Sam940,
    Sam945,
    Srpm210,
    #[default]
    Unknown,
    Other(String),
}

const KNOWN: &[DetectorType] = &[
    DetectorType::Exploranium,
    DetectorType::IdentiFinder,
    DetectorType::IdentiFinderNG,
    DetectorType::IdentiFinderLaBr3,
    DetectorType::DetectiveUnknown,
    DetectorType::DetectiveEx,
    DetectorType::DetectiveEx100,
    DetectorType::DetectiveEx200,
    DetectorType::DetectiveX,
    DetectorType::SAIC8,
    DetectorType::Falcon5000,
    DetectorType::MicroDetective,
    DetectorType::MicroRaider,
    DetectorType::RadHunterNaI,
    DetectorType::RadHunterLaBr3,
    DetectorType::Rsi701,
    DetectorType::Rsi705,
    DetectorType::AvidRsi,
    DetectorType::OrtecRadEagleNai,
    DetectorType::OrtecRadEagleCeBr2Inch,
    DetectorType::OrtecRadEagleCeBr3Inch,
    DetectorType::OrtecRadEagleLaBr,
    DetectorType::Sam940LaBr3,
    DetectorType::Sam940,
    DetectorType::Sam945,
    DetectorType::Srpm210,
];

impl DetectorType {
    pub fn as_str(&self) -> &str {
        match self {
            DetectorType::Exploranium => "GR135",
            DetectorType::IdentiFinder => "IdentiFINDER",
            DetectorType::IdentiFinderNG => "IdentiFINDER-NG",
            DetectorType::IdentiFinderLaBr3 => "IdentiFINDER-LaBr3",
            DetectorType::DetectiveUnknown => "Detective",
            DetectorType::DetectiveEx => "Detective-EX",
            DetectorType::DetectiveEx100 => "Detective-EX100",
            DetectorType::DetectiveEx200 => "Detective-EX200",
            DetectorType::DetectiveX => "Detective-X",
            DetectorType::SAIC8 => "SAIC8",
            DetectorType::Falcon5000 => "Falcon 5000",
            DetectorType::MicroDetective => "MicroDetective",
            DetectorType::MicroRaider => "MicroRaider",
            DetectorType::RadHunterNaI => "RadHunterNaI",
            DetectorType::RadHunterLaBr3 => "RadHunterLaBr3",
            DetectorType::Rsi701 => "RSI-701",
            DetectorType::Rsi705 => "RSI-705",
            DetectorType::AvidRsi => "RS???",
            DetectorType::OrtecRadEagleNai => "RadEagle NaI 3x1",
            DetectorType::OrtecRadEagleCeBr2Inch => "RadEagle CeBr3 2x1",
            DetectorType::OrtecRadEagleCeBr3Inch => "RadEagle CeBr3 3x0.8",
            DetectorType::OrtecRadEagleLaBr => "RadEagle LaBr3 2x1",
            DetectorType::Sam940LaBr3 => "SAM-940LaBr3",
            DetectorType::Sam940 => "SAM-940",
            DetectorType::Sam945 => "SAM-945",
            DetectorType::Srpm210 => "SRPM-210",
            DetectorType::Unknown => "Unknown",
            DetectorType::Other(s) => s.as_str(),
        }
    }

    /// All of the named detector models
    pub fn known() -> &'static [DetectorType] {
        KNOWN
    }
}

impl Display for DetectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
            return Ok(Self::Unknown);
        }
        let found = KNOWN
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .cloned();
        Ok(found.unwrap_or_else(|| Self::Other(trimmed.to_string())))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_names_round_trip() {
        for t in DetectorType::known() {
            assert_eq!(t.as_str().parse::<DetectorType>().unwrap(), *t);
        }
        assert_eq!("".parse::<DetectorType>().unwrap(), DetectorType::Unknown);
        assert_eq!(
            "Kromek D3S".parse::<DetectorType>().unwrap(),
            DetectorType::Other("Kromek D3S".to_string())
        );
    }
}
