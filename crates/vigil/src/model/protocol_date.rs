//! Normalisation of free-text protocol dates.
//!
//! The worker records the filing date exactly as the court system displays
//! it, which has been seen as `dd/mm/yyyy`, `dd.mm.yyyy`, `dd-mm-yyyy` and
//! ISO `yyyy-mm-dd`, sometimes followed by a time of day.

use chrono::NaiveDate;

const FORMATS: &[&str] = &["%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y", "%Y-%m-%d"];

/// Parses a protocol date in any of the known shapes. Trailing time-of-day
/// text is ignored.
pub fn parse_protocol_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.split_whitespace().next()?;
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Returns the ISO-8601 form of a protocol date, or `None` if the text is
/// not a recognisable date.
pub fn normalize_protocol_date(raw: &str) -> Option<String> {
    parse_protocol_date(raw).map(|d| d.format("%Y-%m-%d").to_string())
}
