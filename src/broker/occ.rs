//! OCC option symbol rendering and expiration-date parsing (§6).

use chrono::{Datelike, NaiveDate, Utc};

use crate::models::OptionType;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum OccError {
    #[error("unrecognised expiration date format: {0}")]
    BadExpiration(String),
    #[error("underlying symbol too long for OCC rendering: {0}")]
    SymbolTooLong(String),
}

/// Parses an expiration date in any of the formats the spec lists:
/// `YYYY-MM-DD`, `MM/DD`, `MM/DD/YY`, `MM/DD/YYYY`, `YYMMDD`. `MM/DD` assumes the
/// current (UTC) year.
pub fn parse_expiration(raw: &str) -> Result<NaiveDate, OccError> {
    let raw = raw.trim();

    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }

    if raw.len() == 6 && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(d) = NaiveDate::parse_from_str(raw, "%y%m%d") {
            return Ok(d);
        }
    }

    let slash_parts: Vec<&str> = raw.split('/').collect();
    match slash_parts.as_slice() {
        [mm, dd] => {
            let year = Utc::now().year();
            let (mm, dd) = (mm.parse::<u32>().ok(), dd.parse::<u32>().ok());
            if let (Some(mm), Some(dd)) = (mm, dd) {
                if let Some(d) = NaiveDate::from_ymd_opt(year, mm, dd) {
                    return Ok(d);
                }
            }
        }
        [mm, dd, yy] => {
            let (mm, dd) = (mm.parse::<u32>().ok(), dd.parse::<u32>().ok());
            let year = if yy.len() == 4 {
                yy.parse::<i32>().ok()
            } else {
                yy.parse::<i32>().ok().map(|y| 2000 + y)
            };
            if let (Some(mm), Some(dd), Some(year)) = (mm, dd, year) {
                if let Some(d) = NaiveDate::from_ymd_opt(year, mm, dd) {
                    return Ok(d);
                }
            }
        }
        _ => {}
    }

    Err(OccError::BadExpiration(raw.to_string()))
}

/// Renders the bit-exact 21-character OCC option symbol:
/// `{underlying padded right with spaces to 6}{YYMMDD}{C|P}{strikeCents padded left with zeros to 8}`.
pub fn render_occ_symbol(
    underlying: &str,
    expiration: &str,
    option_type: OptionType,
    strike: f64,
) -> Result<String, OccError> {
    if underlying.len() > 6 {
        return Err(OccError::SymbolTooLong(underlying.to_string()));
    }
    let date = parse_expiration(expiration)?;
    let yymmdd = date.format("%y%m%d").to_string();
    let right = match option_type {
        OptionType::Call => 'C',
        OptionType::Put => 'P',
    };
    let strike_cents = (strike * 1000.0).round() as i64;

    Ok(format!(
        "{:<6}{}{}{:0>8}",
        underlying, yymmdd, right, strike_cents
    ))
}
