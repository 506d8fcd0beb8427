//! Small numeric helpers used by reports and the dashboard collaborator.

/// Integer percentage of `part` in `total`; 0 when the total is 0.
pub fn percent(part: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

/// Human duration: `Nms` under a second, `Ns` under a minute, `Nm` on
/// exact minutes, `Nm Ss` otherwise.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        return format!("{ms}ms");
    }
    if ms < 60_000 {
        return format!("{}s", ms / 1000);
    }
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    if ms % 60_000 == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0);
    }

    #[test]
    fn percent_rounds_to_nearest_integer() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 2), 50);
        assert_eq!(percent(0, 7), 0);
        assert_eq!(percent(7, 7), 100);
    }

    #[test]
    fn percent_stays_in_range_for_part_le_total() {
        for total in 1..50u64 {
            for part in 0..=total {
                let p = percent(part, total);
                assert!(p <= 100, "percent({part}, {total}) = {p}");
            }
        }
    }

    #[test]
    fn format_duration_covers_all_forms() {
        assert_eq!(format_duration(0), "0ms");
        assert_eq!(format_duration(999), "999ms");
        assert_eq!(format_duration(1000), "1s");
        assert_eq!(format_duration(59_999), "59s");
        assert_eq!(format_duration(60_000), "1m");
        assert_eq!(format_duration(180_000), "3m");
        assert_eq!(format_duration(61_000), "1m 1s");
        assert_eq!(format_duration(125_500), "2m 5s");
    }
}
