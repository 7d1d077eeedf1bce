use crate::job::Frequency;
use anyhow::{anyhow, Result};
use chrono::NaiveTime;

/// Parses the operator's schedule notation.
///
/// Examples:
/// - `"manual"`
/// - `"daily at 02:30"`
/// - `"weekly at 23:00"` (Mondays)
/// - `"on mon at 23:00"` (same as weekly)
pub fn parse_schedule(s: &str) -> Result<(Frequency, Option<NaiveTime>)> {
    let s = s.trim().to_lowercase();
    if s == "manual" {
        return Ok((Frequency::Manual, None));
    }

    let (date_part, time_part) = if let Some(idx) = s.find(" at ") {
        let (d, t) = s.split_at(idx);
        (d.trim(), t.trim_start_matches(" at ").trim())
    } else if s.starts_with("at ") {
        ("daily", s.trim_start_matches("at ").trim())
    } else {
        return Err(anyhow!("Missing 'at' time specification"));
    };

    let time = parse_time(time_part)?;

    let frequency = match date_part {
        "daily" | "every day" => Frequency::Daily,
        "weekly" | "on mon" | "on monday" => Frequency::Weekly,
        other => {
            return Err(anyhow!(
                "Unsupported schedule '{}'. Use daily or weekly (Monday)",
                other
            ))
        }
    };

    Ok((frequency, Some(time)))
}

/// Accepts `HH:MM` or `HH:MM:SS`. Seconds are kept but the scheduler only
/// looks at hour and minute.
pub fn parse_time(s: &str) -> Result<NaiveTime> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    let (h, m, sec) = match parts.len() {
        2 => (parts[0].parse()?, parts[1].parse()?, 0),
        3 => (parts[0].parse()?, parts[1].parse()?, parts[2].parse()?),
        _ => return Err(anyhow!("Invalid time format. Use HH:MM or HH:MM:SS")),
    };
    NaiveTime::from_hms_opt(h, m, sec).ok_or_else(|| anyhow!("Time out of range: {}", s))
}

pub fn describe_schedule(frequency: Frequency, time: Option<NaiveTime>) -> String {
    match (frequency, time) {
        (Frequency::Manual, _) => "manual".to_string(),
        (Frequency::Daily, Some(t)) => format!("daily at {}", t.format("%H:%M")),
        (Frequency::Weekly, Some(t)) => format!("mondays at {}", t.format("%H:%M")),
        (f, None) => format!("{} (no time set)", f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedule_variants() {
        assert_eq!(parse_schedule("manual").unwrap(), (Frequency::Manual, None));

        let (f, t) = parse_schedule("daily at 02:30").unwrap();
        assert_eq!(f, Frequency::Daily);
        assert_eq!(t, NaiveTime::from_hms_opt(2, 30, 0));

        let (f, t) = parse_schedule("On Monday at 23:00:15").unwrap();
        assert_eq!(f, Frequency::Weekly);
        assert_eq!(t, NaiveTime::from_hms_opt(23, 0, 15));

        let (f, _) = parse_schedule("at 07:00").unwrap();
        assert_eq!(f, Frequency::Daily);
    }

    #[test]
    fn test_parse_schedule_rejects_garbage() {
        assert!(parse_schedule("every 5m").is_err());
        assert!(parse_schedule("on fri at 10:00").is_err());
        assert!(parse_schedule("daily at 25:00").is_err());
        assert!(parse_time("10").is_err());
    }
}
