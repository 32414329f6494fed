//! Date/time parsing for trade and call metadata
//!
//! Trade feeds carry compact dates (`YYYYMMDD`) and times (`HHMMSS`);
//! call metadata carries `dd-mm-YYYY` dates with `HH:MM:SS` times, in a
//! few upstream variations. All parsing lives here so the matching
//! engine never touches raw format strings.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parse a compact trade date (`YYYYMMDD`)
pub fn parse_trade_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").ok()
}

/// Parse a compact order time (`HHMMSS`)
pub fn parse_order_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H%M%S").ok()
}

/// Parse a call metadata date (`dd-mm-YYYY`)
pub fn parse_call_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d-%m-%Y").ok()
}

/// Parse a call metadata time (`HH:MM:SS`)
pub fn parse_call_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S").ok()
}

/// Combine a call date and time into a timestamp
pub fn call_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    Some(parse_call_date(date)?.and_time(parse_call_time(time)?))
}

/// Parse an upstream datetime in any of the formats the CSV exports use
pub fn parse_flexible_datetime(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%d-%m-%Y %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Format a call date the way the metadata tables store it (`dd-mm-YYYY`)
pub fn format_call_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// Format a call time the way the metadata tables store it (`HH:MM:SS`)
pub fn format_call_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_trade_formats() {
        let date = parse_trade_date("20250812").unwrap();
        assert_eq!(format_call_date(date), "12-08-2025");

        let time = parse_order_time("093015").unwrap();
        assert_eq!(format_call_time(time), "09:30:15");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_trade_date("2025-08-12").is_none());
        assert!(parse_order_time("9:30").is_none());
        assert!(call_datetime("12-08-2025", "").is_none());
    }

    #[test]
    fn flexible_datetime_accepts_known_export_variants() {
        for raw in [
            "2025-08-12 09:30:15",
            "12-08-2025 09:30:15",
            "2025/08/12 09:30:15",
        ] {
            let dt = parse_flexible_datetime(raw).unwrap();
            assert_eq!(format_call_time(dt.time()), "09:30:15");
        }
    }
}
