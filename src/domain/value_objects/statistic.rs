use serde::{Deserialize, Serialize};

use crate::domain::entities::metric::Trend;

/// A `{title, value}` record as rendered by dashboard cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    pub title: String,
    pub value: String,
}

impl Statistic {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
        }
    }
}

/// A statistic after the simulation read path: same shape plus a trend tag.
///
/// `trend` is `None` when the value was passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedStatistic {
    pub title: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

impl SimulatedStatistic {
    pub fn passthrough(stat: &Statistic) -> Self {
        Self {
            title: stat.title.clone(),
            value: stat.value.clone(),
            trend: None,
        }
    }
}

/// Unit convention detected from the suffix of a value string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSuffix {
    /// `°C`, `°F` or a bare `°`.
    Degrees(String),
    Percent,
    /// `kWh`, `MWh`, `kW`, `W`.
    Energy(String),
    /// No suffix, or one that is not recognised (kept verbatim).
    Bare(String),
}

impl UnitSuffix {
    fn detect(suffix: &str) -> UnitSuffix {
        let trimmed = suffix.trim();
        if trimmed.starts_with('°') {
            UnitSuffix::Degrees(suffix.to_string())
        } else if trimmed == "%" {
            UnitSuffix::Percent
        } else if matches!(trimmed, "kWh" | "MWh" | "Wh" | "kW" | "MW" | "W") {
            UnitSuffix::Energy(suffix.to_string())
        } else {
            UnitSuffix::Bare(suffix.to_string())
        }
    }

    fn as_text(&self) -> &str {
        match self {
            UnitSuffix::Degrees(s) | UnitSuffix::Energy(s) | UnitSuffix::Bare(s) => s,
            UnitSuffix::Percent => "%",
        }
    }
}

/// Textual shape of a numeric value: prefix, grouping, decimals and unit suffix.
///
/// Parsing `"1,250 kWh"` yields the number `1250.0` and a format that renders
/// `1312.4` back as `"1,312 kWh"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueFormat {
    pub prefix: String,
    pub suffix: UnitSuffix,
    pub decimals: usize,
    pub grouped: bool,
}

impl ValueFormat {
    /// Split a value string into its number and format. Returns `None` when
    /// the string holds no number.
    pub fn parse(raw: &str) -> Option<(f64, ValueFormat)> {
        let start = raw.find(|c: char| c.is_ascii_digit() || c == '-' || c == '.')?;
        let body = &raw[start..];
        let end = body
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || c == ',' || c == '.' || (i == 0 && c == '-')))
            .map(|(i, _)| i)
            .unwrap_or(body.len());

        let number_text = body[..end].trim_end_matches([',', '.']);
        let digits: String = number_text.chars().filter(|c| *c != ',').collect();
        let value = digits.parse::<f64>().ok()?;
        if !value.is_finite() {
            return None;
        }

        let decimals = digits.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0);
        let format = ValueFormat {
            prefix: raw[..start].to_string(),
            suffix: UnitSuffix::detect(&body[number_text.len()..]),
            decimals,
            grouped: number_text.contains(','),
        };

        Some((value, format))
    }

    /// Render `value` using this format, with at least `min_decimals` places.
    pub fn render(&self, value: f64, min_decimals: usize) -> String {
        let decimals = self.decimals.max(min_decimals);
        let mut number = format!("{:.*}", decimals, value);
        if self.grouped {
            number = group_thousands(&number);
        }
        format!("{}{}{}", self.prefix, number, self.suffix.as_text())
    }
}

fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_degrees() {
        let (value, format) = ValueFormat::parse("22°C").unwrap();
        assert_eq!(value, 22.0);
        assert_eq!(format.suffix, UnitSuffix::Degrees("°C".to_string()));
        assert_eq!(format.decimals, 0);
        assert_eq!(format.render(22.37, 1), "22.4°C");
    }

    #[test]
    fn test_parse_percent_with_decimals() {
        let (value, format) = ValueFormat::parse("87.5%").unwrap();
        assert_eq!(value, 87.5);
        assert_eq!(format.suffix, UnitSuffix::Percent);
        assert_eq!(format.render(88.123, 1), "88.1%");
    }

    #[test]
    fn test_parse_grouped_energy() {
        let (value, format) = ValueFormat::parse("1,250 kWh").unwrap();
        assert_eq!(value, 1250.0);
        assert_eq!(format.suffix, UnitSuffix::Energy(" kWh".to_string()));
        assert!(format.grouped);
        assert_eq!(format.render(1312.4, 0), "1,312 kWh");
        assert_eq!(format.render(1_312_000.0, 0), "1,312,000 kWh");
    }

    #[test]
    fn test_parse_bare_number() {
        let (value, format) = ValueFormat::parse("12").unwrap();
        assert_eq!(value, 12.0);
        assert_eq!(format.suffix, UnitSuffix::Bare(String::new()));
        assert_eq!(format.render(13.0, 0), "13");
    }

    #[test]
    fn test_parse_keeps_prefix_and_unknown_suffix() {
        let (value, format) = ValueFormat::parse("$4.20/day").unwrap();
        assert_eq!(value, 4.2);
        assert_eq!(format.render(4.5, 0), "$4.50/day");
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert!(ValueFormat::parse("N/A").is_none());
        assert!(ValueFormat::parse("LIVE").is_none());
        assert!(ValueFormat::parse("").is_none());
    }

    #[test]
    fn test_group_thousands_negative() {
        assert_eq!(group_thousands("-1234567.89"), "-1,234,567.89");
        assert_eq!(group_thousands("999"), "999");
    }
}
