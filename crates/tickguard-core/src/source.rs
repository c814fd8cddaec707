use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical identifiers of the upstream quote providers.
///
/// The order of [`ProviderId::ALL`] is the default fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Yahoo,
    #[serde(alias = "alpha_vantage")]
    AlphaVantage,
    Finnhub,
}

impl ProviderId {
    pub const ALL: [Self; 3] = [Self::Yahoo, Self::AlphaVantage, Self::Finnhub];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::AlphaVantage => "alphavantage",
            Self::Finnhub => "finnhub",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "alphavantage" | "alpha_vantage" => Ok(Self::AlphaVantage),
            "finnhub" => Ok(Self::Finnhub),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
