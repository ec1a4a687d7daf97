//! Burnout score calculation
//!
//! The single implementation shared by the engine (at session end) and by
//! reporting surfaces (CLI, dashboards). Late-night detection uses the UTC hour
//! of each session's recorded wall-clock start.

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::types::HistoricalSessionSummary;

/// Points per late-night session
const LATE_NIGHT_POINTS: f64 = 10.0;

/// Points for a strictly declining focus trend over the last three sessions
const DECLINING_TREND_POINTS: f64 = 20.0;

/// Points for a low mean effective/total ratio
const LOW_RATIO_POINTS: f64 = 30.0;

/// Late night starts at this UTC hour (inclusive)
const LATE_NIGHT_START_HOUR: u32 = 22;

/// Late night ends at this UTC hour (exclusive)
const LATE_NIGHT_END_HOUR: u32 = 4;

/// Mean effective ratio below which the low-ratio factor fires
const LOW_RATIO_THRESHOLD: f64 = 0.5;

/// Per-factor breakdown of a burnout score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnoutBreakdown {
    /// Number of sessions started in `[22:00, 04:00)` UTC
    pub late_night_sessions: u32,
    /// Whether the last three sessions have strictly decreasing focus
    pub declining_focus_trend: bool,
    /// Mean effective/total ratio over sessions with nonzero total time
    pub mean_effective_ratio: Option<f64>,
    /// Whether the mean ratio is below 0.5
    pub low_effective_ratio: bool,
    /// Final clamped score
    pub score: f64,
}

fn is_late_night(hour: u32) -> bool {
    hour >= LATE_NIGHT_START_HOUR || hour < LATE_NIGHT_END_HOUR
}

/// Compute the burnout breakdown for a history, in any order
pub fn burnout_breakdown(sessions: &[HistoricalSessionSummary]) -> BurnoutBreakdown {
    if sessions.is_empty() {
        return BurnoutBreakdown {
            late_night_sessions: 0,
            declining_focus_trend: false,
            mean_effective_ratio: None,
            low_effective_ratio: false,
            score: 0.0,
        };
    }

    let mut sorted: Vec<&HistoricalSessionSummary> = sessions.iter().collect();
    sorted.sort_by_key(|s| s.start_time);

    let late_night_sessions = sorted
        .iter()
        .filter(|s| is_late_night(s.start_time.hour()))
        .count() as u32;

    let declining_focus_trend = match sorted.as_slice() {
        [.., a, b, c] => a.focus_score > b.focus_score && b.focus_score > c.focus_score,
        _ => false,
    };

    let ratios: Vec<f64> = sorted
        .iter()
        .filter(|s| s.total_time > 0.0)
        .map(|s| s.effective_time / s.total_time)
        .collect();
    let mean_effective_ratio = if ratios.is_empty() {
        None
    } else {
        Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
    };
    let low_effective_ratio = mean_effective_ratio.is_some_and(|r| r < LOW_RATIO_THRESHOLD);

    let raw = late_night_sessions as f64 * LATE_NIGHT_POINTS
        + if declining_focus_trend { DECLINING_TREND_POINTS } else { 0.0 }
        + if low_effective_ratio { LOW_RATIO_POINTS } else { 0.0 };

    BurnoutBreakdown {
        late_night_sessions,
        declining_focus_trend,
        mean_effective_ratio,
        low_effective_ratio,
        score: raw.clamp(0.0, 100.0),
    }
}

/// Compute the burnout score (0-100) for a history, in any order
///
/// An absent history is an empty slice and scores 0.
pub fn compute_burnout(sessions: &[HistoricalSessionSummary]) -> f64 {
    burnout_breakdown(sessions).score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn summary(start: DateTime<Utc>, total: f64, effective: f64, focus: f64) -> HistoricalSessionSummary {
        HistoricalSessionSummary {
            start_time: start,
            total_time: total,
            effective_time: effective,
            focus_score: focus,
        }
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(compute_burnout(&[]), 0.0);
        let breakdown = burnout_breakdown(&[]);
        assert_eq!(breakdown.mean_effective_ratio, None);
        assert!(!breakdown.declining_focus_trend);
    }

    #[test]
    fn test_single_late_night_session() {
        let sessions = [summary(at(1, 23), 3600.0, 3000.0, 80.0)];
        assert_eq!(compute_burnout(&sessions), 10.0);

        let early = [summary(at(1, 3), 3600.0, 3000.0, 80.0)];
        assert_eq!(compute_burnout(&early), 10.0);
    }

    #[test]
    fn test_late_night_boundaries() {
        assert!(is_late_night(22));
        assert!(is_late_night(0));
        assert!(is_late_night(3));
        assert!(!is_late_night(4));
        assert!(!is_late_night(21));
    }

    #[test]
    fn test_declining_trend() {
        let sessions = [
            summary(at(1, 10), 3600.0, 3000.0, 80.0),
            summary(at(2, 10), 3600.0, 3000.0, 65.0),
            summary(at(3, 10), 3600.0, 3000.0, 50.0),
        ];
        assert_eq!(compute_burnout(&sessions), 20.0);
    }

    #[test]
    fn test_declining_trend_uses_start_order_not_input_order() {
        let sessions = [
            summary(at(3, 10), 3600.0, 3000.0, 50.0),
            summary(at(1, 10), 3600.0, 3000.0, 80.0),
            summary(at(2, 10), 3600.0, 3000.0, 65.0),
        ];
        assert!(burnout_breakdown(&sessions).declining_focus_trend);
    }

    #[test]
    fn test_trend_requires_strict_decrease_of_last_three() {
        let flat = [
            summary(at(1, 10), 3600.0, 3000.0, 80.0),
            summary(at(2, 10), 3600.0, 3000.0, 80.0),
            summary(at(3, 10), 3600.0, 3000.0, 50.0),
        ];
        assert_eq!(compute_burnout(&flat), 0.0);

        // Only the last three count
        let recovered = [
            summary(at(1, 10), 3600.0, 3000.0, 90.0),
            summary(at(2, 10), 3600.0, 3000.0, 70.0),
            summary(at(3, 10), 3600.0, 3000.0, 60.0),
            summary(at(4, 10), 3600.0, 3000.0, 75.0),
        ];
        assert_eq!(compute_burnout(&recovered), 0.0);
    }

    #[test]
    fn test_low_effective_ratio() {
        let sessions = [
            summary(at(1, 10), 3600.0, 1000.0, 60.0),
            summary(at(2, 10), 1800.0, 500.0, 70.0),
        ];
        let breakdown = burnout_breakdown(&sessions);
        assert!(breakdown.low_effective_ratio);
        assert!((breakdown.mean_effective_ratio.unwrap() - 0.2778).abs() < 0.001);
        assert_eq!(breakdown.score, 30.0);
    }

    #[test]
    fn test_zero_total_time_excluded_from_ratio() {
        let sessions = [
            summary(at(1, 10), 0.0, 0.0, 60.0),
            summary(at(2, 10), 1000.0, 900.0, 70.0),
        ];
        let breakdown = burnout_breakdown(&sessions);
        assert_eq!(breakdown.mean_effective_ratio, Some(0.9));
        assert!(!breakdown.low_effective_ratio);
    }

    #[test]
    fn test_all_factors_sum() {
        let sessions = [
            summary(at(1, 23), 3600.0, 1000.0, 80.0),
            summary(at(2, 2), 3600.0, 1000.0, 65.0),
            summary(at(3, 15), 3600.0, 1000.0, 50.0),
        ];
        // 10 + 10 + 20 + 30
        assert_eq!(compute_burnout(&sessions), 70.0);
    }

    #[test]
    fn test_clamped_at_one_hundred() {
        let mut sessions: Vec<HistoricalSessionSummary> = (1..=8)
            .map(|day| summary(at(day, 23), 3600.0, 600.0, 90.0 - day as f64))
            .collect();
        sessions.push(summary(at(9, 1), 3600.0, 600.0, 10.0));

        let breakdown = burnout_breakdown(&sessions);
        assert_eq!(breakdown.late_night_sessions, 9);
        assert!(breakdown.declining_focus_trend);
        assert!(breakdown.low_effective_ratio);
        assert_eq!(breakdown.score, 100.0);
    }

    #[test]
    fn test_score_always_in_range() {
        for n in 0..12u32 {
            let sessions: Vec<HistoricalSessionSummary> = (0..n)
                .map(|i| summary(at(1 + i, (i * 7) % 24), 1000.0, (i * 97 % 1000) as f64, (i * 13 % 100) as f64))
                .collect();
            let score = compute_burnout(&sessions);
            assert!((0.0..=100.0).contains(&score));
        }
    }
}
