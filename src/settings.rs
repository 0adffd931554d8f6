use serde::Serialize;

use crate::costs::DEFAULT_MONTHLY_HOURS;
use crate::error::{Error, Result};
use crate::query::period::Period;

pub const KEY_CURRENT_USER: &str = "current_user";
pub const KEY_DEFAULT_HOURS: &str = "default_hours";
pub const KEY_DEFAULT_PERIOD: &str = "default_period";
pub const KEY_RECENT_LIMIT: &str = "recent_limit";

pub const DEFAULT_PERIOD: &str = "30d";
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// Runtime settings read from `app_config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSettings {
    pub current_user: Option<String>,
    pub default_hours: f64,
    pub default_period: String,
    pub recent_limit: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            current_user: None,
            default_hours: DEFAULT_MONTHLY_HOURS,
            default_period: DEFAULT_PERIOD.to_string(),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl ReportSettings {
    /// Build from config rows. Unknown keys are ignored and bad values
    /// fall back to the default with a warning.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut settings = Self::default();
        for (key, value) in pairs {
            if let Err(e) = settings.apply(key, value) {
                log::warn!("Ignoring config {key}: {e}");
            }
        }
        settings
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_CURRENT_USER => {
                let value = value.trim();
                self.current_user = (!value.is_empty()).then(|| value.to_string());
            }
            KEY_DEFAULT_HOURS => self.default_hours = parse_hours(value)?,
            KEY_DEFAULT_PERIOD => {
                Period::parse(value)?;
                self.default_period = value.trim().to_string();
            }
            KEY_RECENT_LIMIT => self.recent_limit = parse_limit(value)?,
            _ => {}
        }
        Ok(())
    }
}

/// Check a value before it is stored under a known key.
pub fn validate(key: &str, value: &str) -> Result<()> {
    ReportSettings::default().apply(key, value)
}

fn parse_hours(value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(h) if h.is_finite() && h >= 0.0 => Ok(h),
        _ => Err(Error::Config(format!("default_hours must be a non-negative number, got '{value}'"))),
    }
}

fn parse_limit(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("recent_limit must be a whole number, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let s = ReportSettings::from_pairs(&[]);
        assert_eq!(s.default_hours, 173.2);
        assert_eq!(s.default_period, "30d");
        assert_eq!(s.recent_limit, 5);
        assert!(s.current_user.is_none());
    }

    #[test]
    fn test_known_keys_applied() {
        let s = ReportSettings::from_pairs(&pairs(&[
            ("current_user", "u1"),
            ("default_hours", "160"),
            ("default_period", "2025-Q2"),
            ("recent_limit", "10"),
            ("something_else", "x"),
        ]));
        assert_eq!(s.current_user.as_deref(), Some("u1"));
        assert_eq!(s.default_hours, 160.0);
        assert_eq!(s.default_period, "2025-Q2");
        assert_eq!(s.recent_limit, 10);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let s = ReportSettings::from_pairs(&pairs(&[
            ("default_hours", "-4"),
            ("recent_limit", "many"),
            ("default_period", "soon"),
        ]));
        assert_eq!(s, ReportSettings::default());
    }

    #[test]
    fn test_validate() {
        assert!(validate("recent_limit", "3").is_ok());
        assert!(validate("default_hours", "abc").is_err());
        assert!(validate("unrelated", "anything").is_ok());
    }
}
