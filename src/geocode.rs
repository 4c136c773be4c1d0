use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::classify::{classify, Outcome};
use crate::db::{is_duplicate, LocationStore};
use crate::errors::AppResult;
use crate::ingestion::{InputRow, RowError, RowQuery};
use crate::providers::{Provider, ProviderRegistry};
use crate::search::build_search;

/// Converts a wait in seconds to a sleep duration.
///
/// Negative and NaN waits become zero. Waits too large for a `Duration` saturate.
pub fn wait_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Persisted { state_mismatch: bool },
    Duplicate,
    NoResult,
    Failed(String),
    RateLimited,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_rows: usize,
    pub processed: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub no_result: usize,
    pub failed: usize,
    pub state_mismatches: usize,
    pub provider_calls: usize,
    pub halted: bool,
}

impl BatchSummary {
    fn record(&mut self, outcome: &RowOutcome) {
        self.processed += 1;
        match outcome {
            RowOutcome::Persisted { state_mismatch } => {
                self.persisted += 1;
                if *state_mismatch {
                    self.state_mismatches += 1;
                }
            }
            RowOutcome::Duplicate => self.duplicates += 1,
            RowOutcome::NoResult => self.no_result += 1,
            RowOutcome::Failed(_) => self.failed += 1,
            RowOutcome::RateLimited => self.halted = true,
        }
    }
}

/// Resolves input rows one at a time through a single provider.
pub struct BatchGeocoder<'a, S: LocationStore + ?Sized> {
    store: &'a S,
    provider_name: String,
    provider: Arc<dyn Provider>,
    wait: Duration,
    sleep: Box<dyn Fn(Duration)>,
    provider_calls: Cell<usize>,
}

impl<'a, S: LocationStore + ?Sized> BatchGeocoder<'a, S> {
    /// Fails when `provider_name` is not registered, before any row is read.
    pub fn new(
        store: &'a S,
        registry: &ProviderRegistry,
        provider_name: &str,
        wait: Duration,
    ) -> AppResult<Self> {
        let provider = registry.resolve(provider_name)?;
        Ok(Self {
            store,
            provider_name: provider_name.to_string(),
            provider,
            wait,
            sleep: Box::new(thread::sleep),
            provider_calls: Cell::new(0),
        })
    }

    #[cfg(test)]
    fn with_sleeper(mut self, sleep: impl Fn(Duration) + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn provider_calls(&self) -> usize {
        self.provider_calls.get()
    }

    /// Processes rows in order until the input ends or the provider reports a rate limit.
    ///
    /// Only a storage failure aborts the batch with an error.
    pub fn run<I>(&self, rows: I) -> AppResult<BatchSummary>
    where
        I: IntoIterator<Item = Result<InputRow, RowError>>,
    {
        let mut summary = BatchSummary::default();
        let calls_before = self.provider_calls();
        for row in rows {
            summary.total_rows += 1;
            let outcome = match row {
                Ok(row) => self.process_row(row)?,
                Err(err) => {
                    error!(%err, "skipping unreadable row");
                    RowOutcome::Failed(err.to_string())
                }
            };
            summary.record(&outcome);
            if outcome == RowOutcome::RateLimited {
                break;
            }
        }
        summary.provider_calls = self.provider_calls() - calls_before;

        info!(
            provider = %self.provider_name,
            processed = summary.processed,
            persisted = summary.persisted,
            duplicates = summary.duplicates,
            no_result = summary.no_result,
            failed = summary.failed,
            halted = summary.halted,
            "batch finished"
        );
        Ok(summary)
    }

    pub fn process_row(&self, row: InputRow) -> AppResult<RowOutcome> {
        let line = row.line;
        let (expected_state, location) = match row.query {
            RowQuery::Direct { location } => (None, location),
            RowQuery::Build { state, place } => match build_search(&state, &place) {
                Ok(query) => (query.state, query.search),
                Err(err) => {
                    error!(line, %err, place = %place, "could not build search");
                    return Ok(RowOutcome::Failed(err.to_string()));
                }
            },
        };

        if is_duplicate(self.store, Some(&location), row.meta_id)? {
            debug!(line, location = %location, meta_id = ?row.meta_id, "already resolved");
            return Ok(RowOutcome::Duplicate);
        }

        let result = self.provider.geocode(&location);
        self.provider_calls.set(self.provider_calls.get() + 1);

        let outcome = match classify(&location, &self.provider_name, result) {
            Outcome::Success(record) => {
                let record = (*record).with_meta_id(row.meta_id);
                let state_mismatch = match expected_state {
                    Some(expected) if record.state.as_deref() != Some(expected) => {
                        warn!(
                            line,
                            location = %location,
                            expected,
                            returned = ?record.state,
                            "result is outside the requested state"
                        );
                        true
                    }
                    _ => false,
                };
                self.store.insert(&record)?;
                info!(
                    line,
                    location = %location,
                    lat = ?record.lat.map(|c| c.to_string()),
                    lng = ?record.lng.map(|c| c.to_string()),
                    "found result"
                );
                RowOutcome::Persisted { state_mismatch }
            }
            Outcome::NoResult => {
                warn!(line, location = %location, "no results");
                RowOutcome::NoResult
            }
            Outcome::RateLimited => {
                error!(
                    line,
                    location = %location,
                    provider = %self.provider_name,
                    "rate limit reached, halting"
                );
                return Ok(RowOutcome::RateLimited);
            }
            Outcome::Unknown(reason) => {
                error!(line, location = %location, %reason, "unexpected provider answer");
                RowOutcome::Failed(reason)
            }
        };

        self.pace();
        Ok(outcome)
    }

    fn pace(&self) {
        if !self.wait.is_zero() {
            (self.sleep)(self.wait);
        }
    }
}
