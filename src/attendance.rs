use crate::report::round_off_2_decimals;
use serde::Serialize;

pub const GOOD_MIN: f64 = 75.0;
pub const AVERAGE_MIN: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceBand {
    Good,
    Average,
    Poor,
}

pub fn attendance_band(percentage: f64) -> AttendanceBand {
    if percentage >= GOOD_MIN {
        AttendanceBand::Good
    } else if percentage >= AVERAGE_MIN {
        AttendanceBand::Average
    } else {
        AttendanceBand::Poor
    }
}

/// `attended / total * 100`, 2 decimals; a term with no school days is 0%.
pub fn attendance_percentage(total_days: i64, attended_days: i64) -> f64 {
    if total_days <= 0 {
        return 0.0;
    }
    round_off_2_decimals(100.0 * attended_days as f64 / total_days as f64)
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub good: usize,
    pub average_band: usize,
    pub poor: usize,
}

pub fn attendance_stats<I>(percentages: I) -> AttendanceStats
where
    I: IntoIterator<Item = f64>,
{
    let mut stats = AttendanceStats::default();
    let mut sum = 0.0_f64;
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;
    for p in percentages {
        stats.count += 1;
        sum += p;
        min = Some(min.map_or(p, |m| m.min(p)));
        max = Some(max.map_or(p, |m| m.max(p)));
        match attendance_band(p) {
            AttendanceBand::Good => stats.good += 1,
            AttendanceBand::Average => stats.average_band += 1,
            AttendanceBand::Poor => stats.poor += 1,
        }
    }
    if stats.count > 0 {
        stats.average = round_off_2_decimals(sum / stats.count as f64);
    }
    stats.min = round_off_2_decimals(min.unwrap_or(0.0));
    stats.max = round_off_2_decimals(max.unwrap_or(0.0));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_have_inclusive_lower_bounds() {
        assert_eq!(attendance_band(75.0), AttendanceBand::Good);
        assert_eq!(attendance_band(74.99), AttendanceBand::Average);
        assert_eq!(attendance_band(60.0), AttendanceBand::Average);
        assert_eq!(attendance_band(59.99), AttendanceBand::Poor);
    }

    #[test]
    fn percentage_rounds_and_handles_zero_days() {
        assert_eq!(attendance_percentage(60, 45), 75.0);
        assert_eq!(attendance_percentage(3, 2), 66.67);
        assert_eq!(attendance_percentage(0, 0), 0.0);
    }

    #[test]
    fn stats_over_class() {
        let s = attendance_stats([100.0, 75.0, 60.0, 59.5, 30.0]);
        assert_eq!(s.count, 5);
        assert_eq!(s.average, 64.9);
        assert_eq!(s.min, 30.0);
        assert_eq!(s.max, 100.0);
        assert_eq!((s.good, s.average_band, s.poor), (2, 1, 2));
    }

    #[test]
    fn empty_class_is_all_zero() {
        assert_eq!(attendance_stats(Vec::new()), AttendanceStats::default());
    }
}
