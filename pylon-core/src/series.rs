//! Racing series identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Series {
    Cup,
    #[serde(alias = "XFINITY")]
    Oreilly,
    Trucks,
}

impl Series {
    /// Numeric series id used by upstream feeds.
    pub fn id(&self) -> u8 {
        match self {
            Series::Cup => 1,
            Series::Oreilly => 2,
            Series::Trucks => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Series::Cup => "CUP",
            Series::Oreilly => "OREILLY",
            Series::Trucks => "TRUCKS",
        }
    }

    /// Map a free-form label to a series, falling back to `default` when the
    /// label is missing or not recognized.
    pub fn from_label_or(label: Option<&str>, default: Series) -> Series {
        label.and_then(|l| l.parse().ok()).unwrap_or(default)
    }
}

impl FromStr for Series {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CUP" | "1" => Ok(Series::Cup),
            // Older schedule files still call it XFINITY.
            "OREILLY" | "O'REILLY" | "XFINITY" | "2" => Ok(Series::Oreilly),
            "TRUCKS" | "TRUCK" | "3" => Ok(Series::Trucks),
            other => Err(format!("unknown series: {other}")),
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_and_aliases() {
        assert_eq!("cup".parse::<Series>().unwrap(), Series::Cup);
        assert_eq!("XFINITY".parse::<Series>().unwrap(), Series::Oreilly);
        assert_eq!("Trucks".parse::<Series>().unwrap(), Series::Trucks);
        assert!("ARCA".parse::<Series>().is_err());
    }

    #[test]
    fn unknown_label_falls_back_to_default() {
        assert_eq!(Series::from_label_or(Some("ARCA"), Series::Cup), Series::Cup);
        assert_eq!(Series::from_label_or(None, Series::Trucks), Series::Trucks);
        assert_eq!(Series::from_label_or(Some("OREILLY"), Series::Cup), Series::Oreilly);
    }

    #[test]
    fn serde_uses_uppercase_labels() {
        let json = serde_json::to_string(&Series::Oreilly).unwrap();
        assert_eq!(json, "\"OREILLY\"");
        let back: Series = serde_json::from_str("\"XFINITY\"").unwrap();
        assert_eq!(back, Series::Oreilly);
    }
}
