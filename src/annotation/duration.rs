//! A small parser/formatter for the `"5s"` / `"2m30s"` duration grammar
//! used by annotation values, matching the common Go-style
//! `ParseDuration` syntax: a sequence of `<number><unit>` pairs with
//! units `h`, `m`, `s`, `ms`.

use std::time::Duration;

pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut chars = input.char_indices().peekable();
    let mut start = 0usize;
    let mut any = false;

    while let Some(&(idx, c)) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            chars.next();
            continue;
        }
        // `idx` is the start of the unit suffix; `start..idx` is the number.
        let number: f64 = input[start..idx].parse().ok()?;
        let unit_start = idx;
        let mut unit_end = idx;
        while let Some(&(uidx, uc)) = chars.peek() {
            if uc.is_ascii_digit() || uc == '.' {
                break;
            }
            chars.next();
            unit_end = uidx + uc.len_utf8();
        }
        let unit = &input[unit_start..unit_end];
        let secs = match unit {
            "h" => number * 3600.0,
            "m" => number * 60.0,
            "s" => number,
            "ms" => number / 1000.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(secs);
        any = true;
        start = unit_end;
    }
    if !any || start != input.len() {
        return None;
    }
    Some(total)
}

pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    let hours = total_ms / 3_600_000;
    let rem = total_ms % 3_600_000;
    let minutes = rem / 60_000;
    let rem = rem % 60_000;
    let seconds = rem / 1000;
    let millis = rem % 1000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || (hours == 0 && minutes == 0 && millis == 0) {
        out.push_str(&format!("{seconds}s"));
    }
    if millis > 0 {
        out.push_str(&format!("{millis}ms"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_duration() {
        assert_eq!(
            parse_duration("2m30s"),
            Some(Duration::from_secs(150))
        );
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration("banana"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5"), None);
    }
}
