use tracing::warn;

use crate::db::InflationRecord;
use crate::parser::RawRecord;

/// Typed record from a raw row. Never fails: unparseable fields become `None`.
pub fn normalize(raw: &RawRecord) -> InflationRecord {
    InflationRecord {
        country: raw.country.clone(),
        year: parse_year(&raw.year),
        average_inflation: parse_percentage(&raw.average_inflation),
        annual_inflation: parse_percentage(&raw.annual_inflation),
    }
}

pub fn parse_year(text: &str) -> Option<i32> {
    match text.trim().parse::<i32>() {
        Ok(y) => Some(y),
        Err(_) => {
            warn!("{:?} could not be converted to a year", text);
            None
        }
    }
}

/// Percentage cell → float. `"-"` and `"nan"` mean unavailable.
///
/// With more than one `.` the first one is treated as a thousands separator
/// and removed. Commas are decimal separators. Note `"1.234,56"` still fails:
/// the dot count is checked before commas are converted.
pub fn parse_percentage(text: &str) -> Option<f64> {
    let value = text.trim();
    if value == "-" || value.eq_ignore_ascii_case("nan") {
        return None;
    }

    let mut cleaned = value.to_string();
    if cleaned.matches('.').count() > 1 {
        cleaned = cleaned.replacen('.', "", 1);
    }
    let cleaned = cleaned.replace(',', ".");

    match cleaned.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{:?} could not be converted to float", text);
            None
        }
    }
}
