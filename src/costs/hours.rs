use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::date_util::{month_key, parse_month};
use crate::error::{Error, Result};

/// Standard monthly hours for a 40-hour week.
pub const DEFAULT_MONTHLY_HOURS: f64 = 173.2;

/// Session-scoped overrides of hours worked, keyed by month (`YYYY-MM-01`)
/// then user id. Never persisted to the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustedHours {
    default_hours: f64,
    months: BTreeMap<String, BTreeMap<String, f64>>,
}

/// On-disk form. Either field may be absent.
#[derive(Deserialize)]
struct HoursFile {
    default_hours: Option<f64>,
    #[serde(default)]
    months: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for AdjustedHours {
    fn default() -> Self {
        Self::with_default_hours(DEFAULT_MONTHLY_HOURS)
    }
}

impl AdjustedHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_hours(default_hours: f64) -> Self {
        Self {
            default_hours,
            months: BTreeMap::new(),
        }
    }

    pub fn default_hours(&self) -> f64 {
        self.default_hours
    }

    pub fn set_default_hours(&mut self, hours: f64) -> Result<()> {
        validate_hours(hours)?;
        self.default_hours = hours;
        Ok(())
    }

    /// Override hours for one employee in the month containing `month`.
    pub fn set(&mut self, month: NaiveDate, user_id: &str, hours: f64) -> Result<()> {
        validate_hours(hours)?;
        self.months
            .entry(month_key(month))
            .or_default()
            .insert(user_id.to_string(), hours);
        Ok(())
    }

    /// Drop an override so the default applies again.
    pub fn clear(&mut self, month: NaiveDate, user_id: &str) -> bool {
        let key = month_key(month);
        let Some(users) = self.months.get_mut(&key) else {
            return false;
        };
        let removed = users.remove(user_id).is_some();
        if users.is_empty() {
            self.months.remove(&key);
        }
        removed
    }

    /// Apply raw form input: a number sets the override, an empty field
    /// clears it, anything else leaves the map unchanged.
    pub fn apply_input(&mut self, month: NaiveDate, user_id: &str, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            self.clear(month, user_id);
            return;
        }
        match raw.parse::<f64>() {
            Ok(hours) => {
                if let Err(e) = self.set(month, user_id, hours) {
                    log::warn!("Ignoring hours for {user_id}: {e}");
                }
            }
            Err(_) => log::warn!("Ignoring unparseable hours '{raw}' for {user_id}"),
        }
    }

    pub fn get(&self, month: NaiveDate, user_id: &str) -> Option<f64> {
        self.months
            .get(&month_key(month))
            .and_then(|users| users.get(user_id))
            .copied()
    }

    /// Hours worked by `user_id` in the month containing `month`.
    pub fn hours_for(&self, month: NaiveDate, user_id: &str) -> f64 {
        self.get(month, user_id).unwrap_or(self.default_hours)
    }

    /// Months (first-of-month) that carry at least one override.
    pub fn adjusted_months(&self) -> Vec<NaiveDate> {
        self.months
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .filter_map(|(key, _)| parse_month(key))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.months.values().all(|users| users.is_empty())
    }

    /// Parse a `USER=HOURS@YYYY-MM` override as given on the command line.
    pub fn apply_adjustment(&mut self, arg: &str) -> Result<()> {
        let (user_id, rest) = arg
            .split_once('=')
            .ok_or_else(|| Error::InvalidInput(format!("expected USER=HOURS@YYYY-MM, got '{arg}'")))?;
        let (hours, month) = rest
            .split_once('@')
            .ok_or_else(|| Error::InvalidInput(format!("missing @YYYY-MM in '{arg}'")))?;
        let month = parse_month(month)
            .ok_or_else(|| Error::InvalidInput(format!("invalid month in '{arg}'")))?;
        let hours: f64 = hours
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid hours in '{arg}'")))?;
        self.set(month, user_id.trim(), hours)
    }

    /// Load a session's adjustments from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_json_with_default(json, DEFAULT_MONTHLY_HOURS)
    }

    /// Load adjustments from JSON, using `fallback` when the file carries
    /// no `default_hours`.
    pub fn from_json_with_default(json: &str, fallback: f64) -> Result<Self> {
        let file: HoursFile = serde_json::from_str(json).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let default_hours = file.default_hours.unwrap_or(fallback);
        validate_hours(default_hours)?;
        // Re-key through month parsing so "2025-06" and "2025-06-15" land on "2025-06-01".
        let mut months = BTreeMap::new();
        for (key, users) in file.months {
            let month = parse_month(&key)
                .ok_or_else(|| Error::InvalidInput(format!("invalid month key '{key}'")))?;
            let slot: &mut BTreeMap<String, f64> = months.entry(month_key(month)).or_default();
            for (user, hours) in users {
                validate_hours(hours)?;
                slot.insert(user, hours);
            }
        }
        Ok(Self { default_hours, months })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Other(e.to_string()))
    }
}

fn validate_hours(hours: f64) -> Result<()> {
    if hours.is_finite() && hours >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("hours must be a non-negative number, got {hours}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_hours() {
        let hours = AdjustedHours::new();
        assert_eq!(hours.hours_for(ymd(2025, 6, 1), "a"), 173.2);
    }

    #[test]
    fn test_override_is_per_month_and_user() {
        let mut hours = AdjustedHours::new();
        hours.set(ymd(2025, 6, 15), "a", 100.0).unwrap();

        assert_eq!(hours.hours_for(ymd(2025, 6, 1), "a"), 100.0);
        assert_eq!(hours.hours_for(ymd(2025, 6, 1), "b"), 173.2);
        assert_eq!(hours.hours_for(ymd(2025, 7, 1), "a"), 173.2);
    }

    #[test]
    fn test_negative_hours_rejected() {
        let mut hours = AdjustedHours::new();
        assert!(hours.set(ymd(2025, 6, 1), "a", -1.0).is_err());
        assert!(hours.set(ymd(2025, 6, 1), "a", f64::NAN).is_err());
        assert!(hours.is_empty());
    }

    #[test]
    fn test_apply_input_semantics() {
        let month = ymd(2025, 6, 1);
        let mut hours = AdjustedHours::new();

        hours.apply_input(month, "a", "120.5");
        assert_eq!(hours.get(month, "a"), Some(120.5));

        // Garbage leaves the previous value alone
        hours.apply_input(month, "a", "abc");
        assert_eq!(hours.get(month, "a"), Some(120.5));

        // Empty clears the override
        hours.apply_input(month, "a", "  ");
        assert_eq!(hours.get(month, "a"), None);
        assert!(hours.adjusted_months().is_empty());
    }

    #[test]
    fn test_apply_adjustment() {
        let mut hours = AdjustedHours::new();
        hours.apply_adjustment("a=100@2025-06").unwrap();
        assert_eq!(hours.get(ymd(2025, 6, 1), "a"), Some(100.0));
        assert_eq!(hours.adjusted_months(), vec![ymd(2025, 6, 1)]);

        assert!(hours.apply_adjustment("a=100").is_err());
        assert!(hours.apply_adjustment("a=x@2025-06").is_err());
        assert!(hours.apply_adjustment("a=10@June").is_err());
    }

    #[test]
    fn test_json_normalizes_month_keys() {
        let json = r#"{"months": {"2025-06": {"a": 100.0}, "2025-07-15": {"b": 80}}}"#;
        let hours = AdjustedHours::from_json(json).unwrap();

        assert_eq!(hours.default_hours(), 173.2);
        assert_eq!(hours.get(ymd(2025, 6, 1), "a"), Some(100.0));
        assert_eq!(hours.get(ymd(2025, 7, 1), "b"), Some(80.0));

        let round = AdjustedHours::from_json(&hours.to_json().unwrap()).unwrap();
        assert_eq!(round, hours);
    }

    #[test]
    fn test_json_without_default_uses_fallback() {
        let json = r#"{"months": {"2025-06": {"a": 100.0}}}"#;
        let hours = AdjustedHours::from_json_with_default(json, 160.0).unwrap();
        assert_eq!(hours.default_hours(), 160.0);
        assert_eq!(hours.hours_for(ymd(2025, 6, 1), "b"), 160.0);

        let pinned = AdjustedHours::from_json_with_default(r#"{"default_hours": 150}"#, 160.0).unwrap();
        assert_eq!(pinned.default_hours(), 150.0);
        assert!(AdjustedHours::from_json_with_default("{}", -1.0).is_err());
    }

    #[test]
    fn test_json_rejects_bad_month() {
        assert!(AdjustedHours::from_json(r#"{"months": {"soon": {"a": 1}}}"#).is_err());
        assert!(AdjustedHours::from_json(r#"{"months": {"2025-06": {"a": -5}}}"#).is_err());
    }
}
