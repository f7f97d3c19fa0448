use std::time::Duration;

pub fn mmss(d: Duration) -> String {
    let secs = d.as_secs();
    let m = secs / 60;
    let s = secs % 60;
    format!("{}:{:02}", m, s)
}

/// [`mmss`] for fractional seconds; negative and non-finite values read as zero.
pub fn mmss_secs(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        return mmss(Duration::ZERO);
    }
    mmss(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(mmss(Duration::from_secs(0)), "0:00");
        assert_eq!(mmss(Duration::from_secs(185)), "3:05");
        assert_eq!(mmss_secs(59.9), "0:59");
        assert_eq!(mmss_secs(-2.0), "0:00");
        assert_eq!(mmss_secs(f64::NAN), "0:00");
    }
}
