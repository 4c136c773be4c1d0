use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

const SCALE: i64 = 10_000_000;
const FRACTION_DIGITS: usize = 7;

/// Geographic coordinate held as fixed-point with seven fractional digits.
///
/// Stored as decimal text so a value such as `37.7749295` reads back exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate(i64);

impl Coordinate {
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * SCALE as f64).round();
        if scaled.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn units(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE as u64;
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / scale,
            abs % scale,
            width = FRACTION_DIGITS
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCoordinateError(String);

impl fmt::Display for ParseCoordinateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid coordinate: {}", self.0)
    }
}

impl std::error::Error for ParseCoordinateError {}

impl FromStr for Coordinate {
    type Err = ParseCoordinateError;

    /// Parses decimal text exactly; digits past the seventh are rounded half-up.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseCoordinateError(value.to_string());
        let trimmed = value.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut kept: String = fraction.chars().take(FRACTION_DIGITS).collect();
        while kept.len() < FRACTION_DIGITS {
            kept.push('0');
        }
        let mut units = whole
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(kept.parse::<i64>().unwrap_or(0)))
            .ok_or_else(invalid)?;
        if fraction
            .chars()
            .nth(FRACTION_DIGITS)
            .is_some_and(|next| next >= '5')
        {
            units = units.checked_add(1).ok_or_else(invalid)?;
        }

        Ok(Self(if negative { -units } else { units }))
    }
}

impl ToSql for Coordinate {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Coordinate {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(text) => std::str::from_utf8(text)
                .map_err(|err| FromSqlError::Other(Box::new(err)))?
                .parse()
                .map_err(|err| FromSqlError::Other(Box::new(err))),
            ValueRef::Real(real) => Coordinate::from_f64(real).ok_or(FromSqlError::InvalidType),
            ValueRef::Integer(int) => int
                .checked_mul(SCALE)
                .map(Coordinate)
                .ok_or(FromSqlError::OutOfRange(int)),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Bounding box as `[lat, lng]` corner pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub northeast: [f64; 2],
    pub southwest: [f64; 2],
}

impl BoundingBox {
    pub fn from_edges(north: f64, east: f64, south: f64, west: f64) -> Self {
        Self {
            northeast: [north, east],
            southwest: [south, west],
        }
    }
}

/// A resolved geocoding result ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub location: String,
    pub quality: Option<String>,
    pub accuracy: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub country: Option<String>,
    pub lat: Option<Coordinate>,
    pub lng: Option<Coordinate>,
    pub confidence: Option<i64>,
    pub address: Option<String>,
    pub neighborhood: Option<String>,
    pub postal: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub content: Option<serde_json::Value>,
    pub provider: String,
    pub meta_id: Option<i64>,
}

impl LocationRecord {
    pub fn new(location: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            quality: None,
            accuracy: None,
            state: None,
            city: None,
            county: None,
            country: None,
            lat: None,
            lng: None,
            confidence: None,
            address: None,
            neighborhood: None,
            postal: None,
            bbox: None,
            content: None,
            provider: provider.into(),
            meta_id: None,
        }
    }

    pub fn with_meta_id(mut self, meta_id: Option<i64>) -> Self {
        self.meta_id = meta_id;
        self
    }
}

/// A record as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredLocation {
    pub id: i64,
    pub record: LocationRecord,
    pub created: DateTime<Utc>,
}
