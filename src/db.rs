use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::location::{BoundingBox, LocationRecord, StoredLocation};

pub const DEFAULT_TABLE: &str = "locations";

/// Append-only persistence for geocoding results.
pub trait LocationStore {
    fn insert(&self, record: &LocationRecord) -> AppResult<()>;

    /// True when a record matches every given criterion; `None` matches anything.
    fn exists_matching(&self, location: Option<&str>, meta_id: Option<i64>) -> AppResult<bool>;
}

/// Checks whether a location (optionally tied to `meta_id`) was already resolved.
///
/// With neither criterion there is nothing to compare against, so the store
/// is not consulted.
pub fn is_duplicate<S>(store: &S, location: Option<&str>, meta_id: Option<i64>) -> AppResult<bool>
where
    S: LocationStore + ?Sized,
{
    if location.is_none() && meta_id.is_none() {
        return Ok(false);
    }
    store.exists_matching(location, meta_id)
}

pub struct SqliteStore {
    connection: Connection,
    path: PathBuf,
    table: String,
    last_created: Cell<Option<DateTime<Utc>>>,
}

pub fn bootstrap<P: AsRef<Path>>(db_path: P, table: &str) -> AppResult<SqliteStore> {
    let db_path = db_path.as_ref();
    validate_table_name(table)?;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    configure(&connection)?;
    run_migrations(&connection, table)?;
    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        table,
        "location store ready"
    );

    Ok(SqliteStore {
        connection,
        path: db_path.to_path_buf(),
        table: table.to_string(),
        last_created: Cell::new(None),
    })
}

impl SqliteStore {
    #[cfg(test)]
    pub fn in_memory(table: &str) -> AppResult<Self> {
        validate_table_name(table)?;
        let connection = Connection::open_in_memory()?;
        run_migrations(&connection, table)?;
        Ok(Self {
            connection,
            path: PathBuf::from(":memory:"),
            table: table.to_string(),
            last_created: Cell::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn count(&self) -> AppResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table);
        self.connection
            .query_row(&sql, [], |row| row.get(0))
            .map_err(AppError::from)
    }

    /// All records in insertion order.
    pub fn load_all(&self) -> AppResult<Vec<StoredLocation>> {
        let sql = format!(
            "SELECT id, location, quality, accuracy, state, city, county, country,
                lat, lng, confidence, address, neighborhood, postal, bbox, content,
                provider, meta_id, created
            FROM \"{}\"
            ORDER BY id ASC",
            self.table
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt
            .query_map([], parse_stored_location)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn next_created(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let created = match self.last_created.get() {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created.set(Some(created));
        created
    }
}

impl LocationStore for SqliteStore {
    fn insert(&self, record: &LocationRecord) -> AppResult<()> {
        let bbox = record.bbox.as_ref().map(serde_json::to_string).transpose()?;
        let content = record
            .content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let created = self.next_created();
        let sql = format!(
            "INSERT INTO \"{}\" (location, quality, accuracy, state, city, county, country,
                lat, lng, confidence, address, neighborhood, postal, bbox, content,
                provider, meta_id, created)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            self.table
        );
        self.connection.execute(
            &sql,
            params![
                record.location,
                record.quality,
                record.accuracy,
                record.state,
                record.city,
                record.county,
                record.country,
                record.lat,
                record.lng,
                record.confidence,
                record.address,
                record.neighborhood,
                record.postal,
                bbox,
                content,
                record.provider,
                record.meta_id,
                created.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        debug!(
            location = %record.location,
            provider = %record.provider,
            meta_id = ?record.meta_id,
            "location persisted"
        );
        Ok(())
    }

    fn exists_matching(&self, location: Option<&str>, meta_id: Option<i64>) -> AppResult<bool> {
        let sql = format!(
            "SELECT 1 FROM \"{}\"
            WHERE (?1 IS NULL OR location = ?1)
              AND (?2 IS NULL OR meta_id = ?2)
            LIMIT 1",
            self.table
        );
        let found: Option<i64> = self
            .connection
            .query_row(&sql, params![location, meta_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

fn configure(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(())
}

fn run_migrations(connection: &Connection, table: &str) -> AppResult<()> {
    connection.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{table}" (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            location TEXT NOT NULL,
            quality TEXT,
            state TEXT,
            city TEXT,
            county TEXT,
            country TEXT,
            lat TEXT,
            lng TEXT,
            accuracy TEXT,
            confidence INTEGER,
            address TEXT,
            neighborhood TEXT,
            postal TEXT,
            bbox TEXT,
            content TEXT,
            provider TEXT NOT NULL,
            created TEXT NOT NULL
        );
        "#
    ))?;

    ensure_column(connection, table, "meta_id INTEGER")?;
    connection.execute(
        &format!(r#"CREATE INDEX IF NOT EXISTS "idx_{table}_location" ON "{table}"(location)"#),
        [],
    )?;
    connection.execute(
        &format!(r#"CREATE INDEX IF NOT EXISTS "idx_{table}_meta_id" ON "{table}"(meta_id)"#),
        [],
    )?;
    Ok(())
}

fn ensure_column(connection: &Connection, table: &str, definition: &str) -> AppResult<()> {
    let column_name = definition
        .split_whitespace()
        .next()
        .ok_or_else(|| AppError::Config(format!("invalid column definition: {definition}")))?;
    if column_exists(connection, table, column_name)? {
        return Ok(());
    }
    let sql = format!(r#"ALTER TABLE "{table}" ADD COLUMN {definition}"#);
    connection.execute(&sql, [])?;
    debug!(table, column = column_name, "added missing column");
    Ok(())
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!(r#"PRAGMA table_info("{table}")"#);
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Only plain identifiers pass. They are still quoted wherever they reach SQL,
/// so keywords such as `order` work as table names.
fn validate_table_name(table: &str) -> AppResult<()> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid table name: {table:?}")))
    }
}

fn parse_stored_location(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredLocation> {
    let bbox: Option<String> = row.get(14)?;
    let content: Option<String> = row.get(15)?;
    let created: String = row.get(18)?;

    let bbox = bbox
        .map(|text| serde_json::from_str::<BoundingBox>(&text))
        .transpose()
        .map_err(|err| conversion_error(14, err))?;
    let content = content
        .map(|text| serde_json::from_str::<serde_json::Value>(&text))
        .transpose()
        .map_err(|err| conversion_error(15, err))?;
    let created = DateTime::parse_from_rfc3339(&created)
        .map_err(|err| conversion_error(18, err))?
        .with_timezone(&Utc);

    Ok(StoredLocation {
        id: row.get(0)?,
        record: LocationRecord {
            location: row.get(1)?,
            quality: row.get(2)?,
            accuracy: row.get(3)?,
            state: row.get(4)?,
            city: row.get(5)?,
            county: row.get(6)?,
            country: row.get(7)?,
            lat: row.get(8)?,
            lng: row.get(9)?,
            confidence: row.get(10)?,
            address: row.get(11)?,
            neighborhood: row.get(12)?,
            postal: row.get(13)?,
            bbox,
            content,
            provider: row.get(16)?,
            meta_id: row.get(17)?,
        },
        created,
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::location::Coordinate;

    fn sample(location: &str) -> LocationRecord {
        let mut record = LocationRecord::new(location, "google");
        record.lat = Some("37.7749295".parse().unwrap());
        record.lng = Some("-122.4194155".parse().unwrap());
        record.state = Some("CA".into());
        record
    }

    #[test]
    fn runs_migrations_and_creates_table() {
        let dir = tempdir().unwrap();
        let store = bootstrap(dir.path().join("nested/locs.db"), "places").unwrap();

        assert!(store.path().ends_with("locs.db"));
        assert_eq!(store.table(), "places");
        assert_eq!(store.count().unwrap(), 0);
        assert!(column_exists(&store.connection, "places", "meta_id").unwrap());
    }

    #[test]
    fn adds_meta_id_to_existing_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE locations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    location TEXT NOT NULL,
                    quality TEXT, state TEXT, city TEXT, county TEXT, country TEXT,
                    lat TEXT, lng TEXT, accuracy TEXT, confidence INTEGER,
                    address TEXT, neighborhood TEXT, postal TEXT, bbox TEXT, content TEXT,
                    provider TEXT NOT NULL, created TEXT NOT NULL
                );",
            )
            .unwrap();
        }

        let store = bootstrap(&path, DEFAULT_TABLE).unwrap();
        assert!(column_exists(&store.connection, DEFAULT_TABLE, "meta_id").unwrap());
        store.insert(&sample("x").with_meta_id(Some(4))).unwrap();
        assert!(store.exists_matching(None, Some(4)).unwrap());
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let dir = tempdir().unwrap();
        for name in ["", "1abc", "locs; DROP TABLE x", "my-table"] {
            let err = bootstrap(dir.path().join("t.db"), name).err().unwrap();
            assert!(matches!(err, AppError::Config(_)), "{name}");
        }
    }

    #[test]
    fn keyword_table_names_are_quoted() {
        let dir = tempdir().unwrap();
        let store = bootstrap(dir.path().join("kw.db"), "order").unwrap();
        store.insert(&sample("fresno, ca").with_meta_id(Some(3))).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert!(store.exists_matching(Some("fresno, ca"), Some(3)).unwrap());
        assert_eq!(store.load_all().unwrap()[0].record.meta_id, Some(3));
        assert!(column_exists(&store.connection, "order", "meta_id").unwrap());

        drop(store);
        let reopened = bootstrap(dir.path().join("kw.db"), "order").unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn round_trips_coordinates_and_blobs() {
        let store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        let mut record = sample("san francisco, ca").with_meta_id(Some(42));
        record.bbox = Some(BoundingBox::from_edges(
            37.9298239, -122.28178, 37.6398299, -123.173825,
        ));
        record.content = Some(json!({
            "status": "OK",
            "results": [{"geometry": {"location": {"lat": 37.7749295, "lng": -122.4194155}}}],
            "nested": {"deep": [1.0000001, 2, "three", null]}
        }));
        store.insert(&record).unwrap();

        let stored = store.load_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record, record);
        assert_eq!(
            stored[0].record.lat,
            Some(Coordinate::from_f64(37.7749295).unwrap())
        );

        let lat_text: String = store
            .connection
            .query_row("SELECT lat FROM locations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(lat_text, "37.7749295");
    }

    #[test]
    fn created_never_goes_backwards() {
        let store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        for idx in 0..5 {
            store.insert(&sample(&format!("place {idx}"))).unwrap();
        }
        let stored = store.load_all().unwrap();
        assert!(stored.windows(2).all(|pair| pair[0].created <= pair[1].created));
    }

    #[test]
    fn absent_criteria_act_as_wildcards() {
        let store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        store.insert(&sample("fresno, ca").with_meta_id(Some(7))).unwrap();
        store.insert(&sample("reno, nv")).unwrap();

        assert!(store.exists_matching(Some("fresno, ca"), None).unwrap());
        assert!(store.exists_matching(Some("fresno, ca"), Some(7)).unwrap());
        assert!(store.exists_matching(None, Some(7)).unwrap());
        assert!(store.exists_matching(Some("reno, nv"), None).unwrap());
        assert!(!store.exists_matching(Some("fresno, ca"), Some(8)).unwrap());
        assert!(!store.exists_matching(Some("reno, nv"), Some(7)).unwrap());
        assert!(!store.exists_matching(Some("boise, id"), None).unwrap());
    }

    #[test]
    fn duplicate_check_without_criteria_skips_the_store() {
        struct Unreachable;
        impl LocationStore for Unreachable {
            fn insert(&self, _: &LocationRecord) -> AppResult<()> {
                unreachable!()
            }
            fn exists_matching(&self, _: Option<&str>, _: Option<i64>) -> AppResult<bool> {
                panic!("store must not be queried")
            }
        }

        assert!(!is_duplicate(&Unreachable, None, None).unwrap());

        let store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        store.insert(&sample("anywhere")).unwrap();
        assert!(!is_duplicate(&store, None, None).unwrap());
        assert!(is_duplicate(&store, Some("anywhere"), None).unwrap());
    }
}
