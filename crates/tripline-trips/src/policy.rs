//! Tunable trip grouping policy.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `TRIP_IDLE_GAP_DAYS` | 2 | Days without activity that always close a trip |
//! | `TRIP_CONTINUITY_GAP_HOURS` | 24 | Gap after which a location break opens a new trip |
//! | `TRIP_SPLIT_ON_HOME_RETURN` | true | A segment arriving home closes the trip |
//! | `HOME_CITY` | Zurich | Default trip origin |
//! | `HOME_CITY_ALIASES` | zurich, zrh, ... | Comma-separated home-area substrings |

use chrono::Duration;

use tripline_core::defaults;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingPolicy {
    pub idle_gap: Duration,
    pub continuity_gap: Duration,
    pub split_on_home_return: bool,
    pub home_city: String,
    /// Lowercase substrings identifying the home area.
    pub home_aliases: Vec<String>,
}

impl Default for GroupingPolicy {
    fn default() -> Self {
        Self {
            idle_gap: Duration::days(defaults::TRIP_IDLE_GAP_DAYS),
            continuity_gap: Duration::hours(defaults::TRIP_CONTINUITY_GAP_HOURS),
            split_on_home_return: true,
            home_city: defaults::HOME_CITY.to_string(),
            home_aliases: defaults::HOME_CITY_ALIASES
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }
    }
}

impl GroupingPolicy {
    /// Create from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base = Self::default();

        let idle_days = std::env::var("TRIP_IDLE_GAP_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::TRIP_IDLE_GAP_DAYS)
            .clamp(0, 365);

        let continuity_hours = std::env::var("TRIP_CONTINUITY_GAP_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::TRIP_CONTINUITY_GAP_HOURS)
            .clamp(0, 24 * 365);

        let split_on_home_return = std::env::var("TRIP_SPLIT_ON_HOME_RETURN")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let home_city = std::env::var("HOME_CITY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(base.home_city);

        let home_aliases = std::env::var("HOME_CITY_ALIASES")
            .ok()
            .map(|v| parse_aliases(&v))
            .filter(|a| !a.is_empty())
            .unwrap_or(base.home_aliases);

        Self {
            idle_gap: Duration::days(idle_days),
            continuity_gap: Duration::hours(continuity_hours),
            split_on_home_return,
            home_city,
            home_aliases,
        }
    }

    pub fn with_idle_gap(mut self, gap: Duration) -> Self {
        self.idle_gap = gap;
        self
    }

    pub fn with_continuity_gap(mut self, gap: Duration) -> Self {
        self.continuity_gap = gap;
        self
    }

    pub fn with_split_on_home_return(mut self, split: bool) -> Self {
        self.split_on_home_return = split;
        self
    }

    /// Set the home city; it also becomes a home alias.
    pub fn with_home_city(mut self, city: impl Into<String>, aliases: &[&str]) -> Self {
        self.home_city = city.into();
        self.home_aliases = aliases.iter().map(|a| a.to_ascii_lowercase()).collect();
        self
    }

    /// Whether a location string lies in the home area.
    pub fn is_home(&self, location: &str) -> bool {
        let lower = location.trim().to_lowercase();
        if lower.is_empty() {
            return false;
        }
        lower.contains(&self.home_city.to_lowercase())
            || self.home_aliases.iter().any(|alias| {
                // Short aliases (airport codes) must match a whole word.
                if alias.len() <= 3 {
                    lower
                        .split(|c: char| !c.is_alphanumeric())
                        .any(|word| word == alias)
                } else {
                    lower.contains(alias.as_str())
                }
            })
    }
}

fn parse_aliases(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = GroupingPolicy::default();
        assert_eq!(policy.idle_gap, Duration::days(2));
        assert_eq!(policy.continuity_gap, Duration::hours(24));
        assert!(policy.split_on_home_return);
        assert_eq!(policy.home_city, "Zurich");
    }

    #[test]
    fn test_home_detection() {
        let policy = GroupingPolicy::default();
        assert!(policy.is_home("Zürich Flughafen"));
        assert!(policy.is_home("ZRH"));
        assert!(policy.is_home("Winterthur HB"));
        assert!(!policy.is_home("Oslo"));
        assert!(!policy.is_home("Zrhino Street, Oslo"));
        assert!(!policy.is_home(""));
    }

    #[test]
    fn test_custom_home() {
        let policy = GroupingPolicy::default().with_home_city("Berlin", &["berlin", "BER"]);
        assert!(policy.is_home("Berlin Brandenburg"));
        assert!(policy.is_home("BER"));
        assert!(!policy.is_home("Zurich"));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(parse_aliases(" Basel, bsl ,,"), vec!["basel", "bsl"]);
    }
}
