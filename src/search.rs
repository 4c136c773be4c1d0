use thiserror::Error;

use crate::states;

const FILLER_PREFIX: &str = "close to";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("unknown state: {0}")]
    UnknownState(String),
}

/// Canonical text sent to a provider, with the state it was qualified by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub state: Option<&'static str>,
    pub search: String,
}

impl SearchQuery {
    pub fn unconstrained(search: impl Into<String>) -> Self {
        Self {
            state: None,
            search: search.into(),
        }
    }
}

/// Combines a place name and a state hint into a state-qualified search.
///
/// The full state name is checked before the abbreviation, and both are
/// checked before anything is appended.
pub fn build_search(state_hint: &str, place: &str) -> Result<SearchQuery, NormalizeError> {
    let state_hint = state_hint.trim();
    let place = place.trim().to_lowercase();
    if state_hint.is_empty() {
        return Ok(SearchQuery::unconstrained(place));
    }

    let place = strip_filler(&place);
    let state = states::lookup(state_hint)
        .ok_or_else(|| NormalizeError::UnknownState(state_hint.to_string()))?;
    let abbr = state.abbr.to_lowercase();

    let search = if place.ends_with(&state.name.to_lowercase())
        || place.ends_with(&format!(", {abbr}"))
    {
        place.to_string()
    } else {
        format!("{}, {abbr}", place.trim_end_matches(','))
    };

    Ok(SearchQuery {
        state: Some(state.abbr),
        search,
    })
}

fn strip_filler(place: &str) -> &str {
    match place.strip_prefix(FILLER_PREFIX) {
        Some(rest) => rest.trim_start(),
        None => place,
    }
}
