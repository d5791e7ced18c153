use time::macros::format_description;
use time::Time;

const MS_PER_DAY: i64 = 86_400_000;

/// `83456` -> `"01:23.456"`. Negative values are clamped to zero.
pub fn format_lap_time(ms: i32) -> String {
    let ms = ms.max(0);
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{minutes:02}:{seconds:02}.{millis:03}")
}

/// Milliseconds since midnight as a wall-clock time, wrapping past 24h.
pub fn time_of_day(ms: i32) -> Option<Time> {
    let ms = i64::from(ms).rem_euclid(MS_PER_DAY);
    let hours = (ms / 3_600_000) as u8;
    let minutes = ((ms / 60_000) % 60) as u8;
    let seconds = ((ms / 1000) % 60) as u8;
    let millis = (ms % 1000) as u16;
    Time::from_hms_milli(hours, minutes, seconds, millis).ok()
}

/// `"hh:mm:ss"`; empty when the value cannot be represented.
pub fn format_time_of_day(ms: i32) -> String {
    time_of_day(ms)
        .and_then(|t| t.format(format_description!("[hour]:[minute]:[second]")).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lap_time_formatting() {
        assert_eq!(format_lap_time(0), "00:00.000");
        assert_eq!(format_lap_time(83_456), "01:23.456");
        assert_eq!(format_lap_time(3_599_999), "59:59.999");
        assert_eq!(format_lap_time(-1), "00:00.000");
    }

    #[test]
    fn time_of_day_formatting() {
        assert_eq!(format_time_of_day(0), "00:00:00");
        assert_eq!(format_time_of_day(45_296_000), "12:34:56");
        assert_eq!(format_time_of_day(86_400_000 + 1000), "00:00:01");
    }
}
