use serde::{Deserialize, Serialize};

/// Dead-band applied when classifying a value change, so noise does not flip the trend.
pub const TREND_DEAD_BAND: f64 = 0.01;

/// Direction of the most recent change of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn classify(previous: f64, current: f64) -> Trend {
        let delta = current - previous;
        if delta > TREND_DEAD_BAND {
            Trend::Up
        } else if delta < -TREND_DEAD_BAND {
            Trend::Down
        } else {
            Trend::Stable
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        })
    }
}

/// Variation family of a metric, picked from keywords in its title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricClass {
    Temperature,
    Energy,
    AlertCount,
    Occupancy,
    Percentage,
}

impl MetricClass {
    /// Keyword classification of a metric title. Checked in order; the first
    /// family with a matching keyword wins and energy is the fallback.
    pub fn from_title(title: &str) -> MetricClass {
        const RULES: [(MetricClass, &[&str]); 5] = [
            (MetricClass::Temperature, &["temp", "°"]),
            (
                MetricClass::AlertCount,
                &["alert", "alarm", "maintenance", "incident", "issue", "ticket"],
            ),
            (
                MetricClass::Occupancy,
                &["occupancy", "occupant", "people", "visitor", "headcount"],
            ),
            (
                MetricClass::Energy,
                &["energy", "consumption", "power", "kwh", "electric"],
            ),
            (
                MetricClass::Percentage,
                &["%", "percent", "efficiency", "humidity", "utilization", "utilisation", "uptime"],
            ),
        ];

        let title = title.to_lowercase();
        RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| title.contains(k)))
            .map(|(class, _)| *class)
            .unwrap_or(MetricClass::Energy)
    }

    /// Decimal places used when a simulated value is rendered back to text.
    pub fn default_decimals(self) -> usize {
        match self {
            MetricClass::Temperature | MetricClass::Percentage => 1,
            MetricClass::Energy | MetricClass::AlertCount | MetricClass::Occupancy => 0,
        }
    }
}

/// Synthetic state of one metric, keyed by its title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedMetric {
    pub key: String,
    pub current_value: f64,
    /// Long-run anchor: the first value ever observed. Never changed afterwards.
    pub base_value: f64,
    pub last_trend: Trend,
}

impl SimulatedMetric {
    pub fn new(key: impl Into<String>, initial: f64) -> Self {
        Self {
            key: key.into(),
            current_value: initial,
            base_value: initial,
            last_trend: Trend::Stable,
        }
    }

    pub fn class(&self) -> MetricClass {
        MetricClass::from_title(&self.key)
    }

    /// Move to `next`, recording the direction of the move.
    pub fn advance_to(&mut self, next: f64) {
        self.last_trend = Trend::classify(self.current_value, next);
        self.current_value = next;
    }
}
