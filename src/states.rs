//! US state and territory directory used to qualify search strings.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub name: &'static str,
    pub abbr: &'static str,
    pub fips: &'static str,
}

const fn state(name: &'static str, abbr: &'static str, fips: &'static str) -> State {
    State { name, abbr, fips }
}

pub const STATES: &[State] = &[
    state("Alabama", "AL", "01"),
    state("Alaska", "AK", "02"),
    state("Arizona", "AZ", "04"),
    state("Arkansas", "AR", "05"),
    state("California", "CA", "06"),
    state("Colorado", "CO", "08"),
    state("Connecticut", "CT", "09"),
    state("Delaware", "DE", "10"),
    state("District of Columbia", "DC", "11"),
    state("Florida", "FL", "12"),
    state("Georgia", "GA", "13"),
    state("Hawaii", "HI", "15"),
    state("Idaho", "ID", "16"),
    state("Illinois", "IL", "17"),
    state("Indiana", "IN", "18"),
    state("Iowa", "IA", "19"),
    state("Kansas", "KS", "20"),
    state("Kentucky", "KY", "21"),
    state("Louisiana", "LA", "22"),
    state("Maine", "ME", "23"),
    state("Maryland", "MD", "24"),
    state("Massachusetts", "MA", "25"),
    state("Michigan", "MI", "26"),
    state("Minnesota", "MN", "27"),
    state("Mississippi", "MS", "28"),
    state("Missouri", "MO", "29"),
    state("Montana", "MT", "30"),
    state("Nebraska", "NE", "31"),
    state("Nevada", "NV", "32"),
    state("New Hampshire", "NH", "33"),
    state("New Jersey", "NJ", "34"),
    state("New Mexico", "NM", "35"),
    state("New York", "NY", "36"),
    state("North Carolina", "NC", "37"),
    state("North Dakota", "ND", "38"),
    state("Ohio", "OH", "39"),
    state("Oklahoma", "OK", "40"),
    state("Oregon", "OR", "41"),
    state("Pennsylvania", "PA", "42"),
    state("Rhode Island", "RI", "44"),
    state("South Carolina", "SC", "45"),
    state("South Dakota", "SD", "46"),
    state("Tennessee", "TN", "47"),
    state("Texas", "TX", "48"),
    state("Utah", "UT", "49"),
    state("Vermont", "VT", "50"),
    state("Virginia", "VA", "51"),
    state("Washington", "WA", "53"),
    state("West Virginia", "WV", "54"),
    state("Wisconsin", "WI", "55"),
    state("Wyoming", "WY", "56"),
    state("American Samoa", "AS", "60"),
    state("Guam", "GU", "66"),
    state("Northern Mariana Islands", "MP", "69"),
    state("Puerto Rico", "PR", "72"),
    state("Virgin Islands", "VI", "78"),
];

/// Resolves a two-letter abbreviation, a two-digit FIPS code or a full name.
///
/// Matching ignores case and collapses runs of whitespace, so `" new  york "`
/// resolves to New York.
pub fn lookup(hint: &str) -> Option<&'static State> {
    let key = hint.split_whitespace().collect::<Vec<_>>().join(" ");
    if key.is_empty() {
        return None;
    }

    if key.len() == 2 && key.bytes().all(|b| b.is_ascii_digit()) {
        return STATES.iter().find(|s| s.fips == key);
    }
    if key.len() == 2 {
        return STATES.iter().find(|s| s.abbr.eq_ignore_ascii_case(&key));
    }
    STATES.iter().find(|s| s.name.eq_ignore_ascii_case(&key))
}
