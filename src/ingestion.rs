use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use thiserror::Error;

use crate::errors::{AppError, AppResult};

pub const LOCATION_COLUMN: &str = "location";
pub const STATE_COLUMN: &str = "state";
pub const PLACE_COLUMN: &str = "place";

/// How rows are turned into search strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// The `location` column already holds the search string.
    Direct,
    /// `state` and `place` columns are combined by the normalizer.
    Build,
}

#[derive(Debug, Clone)]
pub struct InputFormat {
    pub mode: InputMode,
    pub delimiter: u8,
    pub meta_column: Option<String>,
}

impl InputFormat {
    pub fn new(mode: InputMode) -> Self {
        Self {
            mode,
            delimiter: b',',
            meta_column: None,
        }
    }

    pub fn tab_delimited(mut self, tabs: bool) -> Self {
        self.delimiter = if tabs { b'\t' } else { b',' };
        self
    }

    pub fn with_meta_column(mut self, column: Option<String>) -> Self {
        self.meta_column = column;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowQuery {
    Direct { location: String },
    Build { state: String, place: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    pub line: u64,
    pub query: RowQuery,
    pub meta_id: Option<i64>,
}

impl InputRow {
    pub fn direct(line: u64, location: impl Into<String>) -> Self {
        Self {
            line,
            query: RowQuery::Direct {
                location: location.into().trim().to_string(),
            },
            meta_id: None,
        }
    }

    pub fn build(line: u64, state: impl Into<String>, place: impl Into<String>) -> Self {
        Self {
            line,
            query: RowQuery::Build {
                state: state.into(),
                place: place.into(),
            },
            meta_id: None,
        }
    }

    pub fn with_meta_id(mut self, meta_id: Option<i64>) -> Self {
        self.meta_id = meta_id;
        self
    }
}

/// A problem confined to one input row.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("line {line}: meta id {value:?} is not an integer")]
    InvalidMetaId { line: u64, value: String },
    #[error("line {line}: missing value for column `{column}`")]
    MissingField { line: u64, column: String },
    #[error("unreadable record: {0}")]
    Malformed(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy)]
enum Columns {
    Direct { location: usize },
    Build { state: usize, place: usize },
}

/// Streams typed rows from a delimited file with a header row.
pub struct InputReader<R: io::Read> {
    records: StringRecordsIntoIter<R>,
    columns: Columns,
    meta: Option<(String, usize)>,
}

impl InputReader<File> {
    pub fn from_path<P: AsRef<Path>>(path: P, format: &InputFormat) -> AppResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(file, format)
    }
}

impl<R: io::Read> InputReader<R> {
    /// Reads the header and checks every column the mode needs.
    pub fn new(reader: R, format: &InputFormat) -> AppResult<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        let columns = match format.mode {
            InputMode::Direct => Columns::Direct {
                location: column_index(&headers, LOCATION_COLUMN)?,
            },
            InputMode::Build => Columns::Build {
                state: column_index(&headers, STATE_COLUMN)?,
                place: column_index(&headers, PLACE_COLUMN)?,
            },
        };
        let meta = format
            .meta_column
            .as_ref()
            .map(|name| column_index(&headers, name).map(|idx| (name.clone(), idx)))
            .transpose()?;

        Ok(Self {
            records: csv_reader.into_records(),
            columns,
            meta,
        })
    }

    fn parse_record(&self, record: &StringRecord) -> Result<InputRow, RowError> {
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let field = |idx: usize, column: &str| {
            record.get(idx).ok_or_else(|| RowError::MissingField {
                line,
                column: column.to_string(),
            })
        };

        let row = match self.columns {
            Columns::Direct { location } => {
                InputRow::direct(line, field(location, LOCATION_COLUMN)?)
            }
            Columns::Build { state, place } => InputRow::build(
                line,
                field(state, STATE_COLUMN)?,
                field(place, PLACE_COLUMN)?,
            ),
        };

        let meta_id = match &self.meta {
            Some((name, idx)) => {
                let value = field(*idx, name)?;
                let parsed = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| RowError::InvalidMetaId {
                        line,
                        value: value.to_string(),
                    })?;
                Some(parsed)
            }
            None => None,
        };
        Ok(row.with_meta_id(meta_id))
    }
}

impl<R: io::Read> Iterator for InputReader<R> {
    type Item = Result<InputRow, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map_err(RowError::from).and_then(|r| self.parse_record(&r)))
    }
}

fn column_index(headers: &StringRecord, name: &str) -> AppResult<usize> {
    headers
        .iter()
        .position(|header| header == name)
        .ok_or_else(|| AppError::MissingColumn(name.to_string()))
}
