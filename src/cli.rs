use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::db::DEFAULT_TABLE;
use crate::geocode::wait_from_secs;
use crate::ingestion::{InputFormat, InputMode};

pub const DEFAULT_DB_NAME: &str = "locs.db";
pub const DEFAULT_PROVIDER: &str = "google";

#[derive(Parser, Debug)]
#[command(name = "geoloc", version, about = "Batch geocode a CSV of locations into SQLite")]
pub struct Cli {
    #[arg(help = "CSV file with a header row")]
    pub infile: PathBuf,
    #[arg(default_value = DEFAULT_DB_NAME, help = "SQLite database file")]
    pub dbname: PathBuf,
    #[arg(long, value_name = "COLUMN", help = "Integer column stored as meta_id")]
    pub meta: Option<String>,
    #[arg(long, default_value = DEFAULT_TABLE, help = "Table that receives results")]
    pub tbl: String,
    #[arg(short, long, help = "Input is tab separated")]
    pub tabs: bool,
    #[arg(short, long, help = "Log progress for every row")]
    pub verbose: bool,
    #[arg(
        short,
        long,
        default_value_t = 0.1,
        allow_negative_numbers = true,
        help = "Seconds to wait after each provider call"
    )]
    pub wait: f64,
    #[arg(short, long, default_value = DEFAULT_PROVIDER, help = "Geocoding provider")]
    pub provider: String,
    #[arg(short, long, help = "Open the store, report its size and exit")]
    pub dev: bool,
    #[arg(short, long, help = "Build searches from `state` and `place` columns")]
    pub build: bool,
}

impl Cli {
    pub fn wait(&self) -> Duration {
        wait_from_secs(self.wait)
    }

    pub fn input_mode(&self) -> InputMode {
        if self.build {
            InputMode::Build
        } else {
            InputMode::Direct
        }
    }

    pub fn input_format(&self) -> InputFormat {
        InputFormat::new(self.input_mode())
            .tab_delimited(self.tabs)
            .with_meta_column(self.meta.clone())
    }
}
