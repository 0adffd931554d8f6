//! Division-guarded arithmetic shared by the KPI and cost engines.

/// `numerator / denominator`, or `fallback` when the denominator is zero
/// or the result is not finite.
pub fn safe_divide(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator == 0.0 {
        return fallback;
    }
    let v = numerator / denominator;
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

/// Percentage of `numerator` over `denominator`; 0 when the denominator is 0.
pub fn close_rate(numerator: f64, denominator: f64) -> f64 {
    safe_divide(numerator, denominator, 0.0) * 100.0
}

/// Period-over-period change in whole percent. A zero previous value
/// yields 0 rather than an infinite trend.
pub fn trend(current: f64, previous: f64) -> i64 {
    (safe_divide(current - previous, previous, 0.0) * 100.0).round() as i64
}

/// Round to a fixed number of decimals for display.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_divide() {
        assert_eq!(safe_divide(10.0, 4.0, 0.0), 2.5);
        assert_eq!(safe_divide(10.0, 0.0, 0.0), 0.0);
        assert_eq!(safe_divide(0.0, 0.0, -1.0), -1.0);
        assert_eq!(safe_divide(f64::INFINITY, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_close_rate() {
        assert_eq!(close_rate(0.0, 0.0), 0.0);
        assert_eq!(close_rate(20.0, 100.0), 20.0);
        assert_eq!(close_rate(5.0, 0.0), 0.0);
        assert!(!close_rate(0.0, 0.0).is_nan());
    }

    #[test]
    fn test_trend() {
        assert_eq!(trend(123.0, 0.0), 0);
        assert_eq!(trend(0.0, 0.0), 0);
        assert_eq!(trend(100.0, 50.0), 100);
        assert_eq!(trend(50.0, 100.0), -50);
        assert_eq!(trend(101.0, 300.0), -66);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(7796.999999, 1), 7797.0);
        assert_eq!(round_to(12.346, 2), 12.35);
    }
}
