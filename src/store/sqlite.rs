//! SQLite-backed product datastore.
//!
//! Products live in a single `products` table. Several rows may share the
//! same `(nrn, nsn)` pair (re-releases of a product); lookups return the row
//! with the newest `file_date`.
//!
//! Rows are matched through a derived `product_key` column holding the output
//! of [`key::encode`]. Rows written by other tools arrive with it unset, and a
//! trigger clears it whenever `nrn` or `nsn` change; [`SqliteDatastore`] fills
//! in missing values before every read. Rows left without a key after that
//! are the ones whose identifiers cannot be keyed.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{Datastore, Listing, RejectedKey, StoreError, StoreResult};
use crate::key::{self, ProductKey};
use crate::model::Product;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nrn TEXT NOT NULL,
    nsn TEXT NOT NULL,
    product_type TEXT NOT NULL DEFAULT '',
    media_name TEXT NOT NULL DEFAULT '',
    edition INTEGER NOT NULL DEFAULT 0,
    load_date INTEGER,
    file_date INTEGER,
    classification TEXT NOT NULL DEFAULT '',
    classification_description TEXT NOT NULL DEFAULT '',
    releasability TEXT NOT NULL DEFAULT '',
    releasability_description TEXT NOT NULL DEFAULT '',
    path TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    iso3_char TEXT NOT NULL DEFAULT '',
    aor_code TEXT NOT NULL DEFAULT '',
    country_name TEXT NOT NULL DEFAULT '',
    size INTEGER NOT NULL DEFAULT 0,
    product_key TEXT
);
"#;

const KEY_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_products_key ON products (product_key);
CREATE TRIGGER IF NOT EXISTS products_key_reset
AFTER UPDATE OF nrn, nsn ON products
BEGIN
    UPDATE products SET product_key = NULL WHERE id = NEW.id;
END;
"#;

const SELECT_COLUMNS: &str = "nrn, nsn, product_type, media_name, edition, load_date, file_date, \
     classification, classification_description, releasability, releasability_description, \
     path, url, notes, iso3_char, aor_code, country_name, size";

/// Product datastore over a SQLite database file.
///
/// The connection is opened in [`SqliteDatastore::open`] and closed when the
/// value is dropped.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    /// Open (or create) the datastore at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the database cannot be opened
    /// or its schema cannot be created.
    pub fn open(path: &Path, timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Connectivity(format!("cannot open datastore {}: {e}", path.display()))
        })?;
        Self::init(conn, timeout)
    }

    /// Open a private in-memory datastore.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if SQLite fails to initialize.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn init(conn: Connection, timeout: Duration) -> StoreResult<Self> {
        conn.busy_timeout(timeout)?;
        conn.execute_batch(SCHEMA)?;
        if !has_column(&conn, "products", "product_key")? {
            log::info!("Adding product_key column to existing datastore");
            conn.execute("ALTER TABLE products ADD COLUMN product_key TEXT", [])?;
        }
        conn.execute_batch(KEY_SCHEMA)?;
        refresh_keys(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Connectivity("datastore connection lock poisoned".to_string()))
    }

    /// Insert one product row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the insert fails.
    pub fn insert(&self, product: &Product) -> StoreResult<()> {
        let conn = self.conn()?;
        let product_key = product.key().ok().map(ProductKey::into_string);
        conn.execute(
            "INSERT INTO products (nrn, nsn, product_type, media_name, edition, load_date, \
             file_date, classification, classification_description, releasability, \
             releasability_description, path, url, notes, iso3_char, aor_code, country_name, size, \
             product_key) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
             ?18, ?19)",
            params![
                product.nrn,
                product.nsn,
                product.product_type,
                product.media_name,
                product.edition,
                product.load_date.map(|d| d.timestamp_millis()),
                product.recorded_date.map(|d| d.timestamp_millis()),
                product.classification,
                product.classification_description,
                product.releasability,
                product.releasability_description,
                product.path,
                product.url,
                product.notes,
                product.iso3_char,
                product.aor_code,
                product.country_name,
                i64::try_from(product.recorded_size).unwrap_or(i64::MAX),
                product_key,
            ],
        )?;
        Ok(())
    }

    /// Delete every row for `key`. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the delete fails.
    pub fn delete(&self, key: &ProductKey) -> StoreResult<usize> {
        let conn = self.conn()?;
        refresh_keys(&conn)?;
        let removed = conn.execute(
            "DELETE FROM products WHERE product_key = ?1",
            params![key.as_str()],
        )?;
        Ok(removed)
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Fill in `product_key` for rows that lack it. Rows whose identifiers do not
/// encode keep a NULL key.
fn refresh_keys(conn: &Connection) -> StoreResult<()> {
    let pending: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare("SELECT id, nrn, nsn FROM products WHERE product_key IS NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        let pending = rows.collect::<rusqlite::Result<_>>()?;
        pending
    };
    let keyed: Vec<(i64, ProductKey)> = pending
        .into_iter()
        .filter_map(|(id, nrn, nsn)| key::encode(&nrn, &nsn).ok().map(|k| (id, k)))
        .collect();
    if keyed.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare("UPDATE products SET product_key = ?1 WHERE id = ?2")?;
        for (id, key) in &keyed {
            stmt.execute(params![key.as_str(), id])?;
        }
    }
    tx.commit()?;
    log::debug!("Derived product keys for {} datastore rows", keyed.len());
    Ok(())
}

fn millis_to_date(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn row_to_product(row: &Row<'_>) -> rusqlite::Result<Product> {
    let size: i64 = row.get(17)?;
    Ok(Product {
        nrn: row.get(0)?,
        nsn: row.get(1)?,
        product_type: row.get(2)?,
        media_name: row.get(3)?,
        edition: row.get(4)?,
        load_date: millis_to_date(row.get(5)?),
        recorded_date: millis_to_date(row.get(6)?),
        classification: row.get(7)?,
        classification_description: row.get(8)?,
        releasability: row.get(9)?,
        releasability_description: row.get(10)?,
        path: row.get(11)?,
        url: row.get(12)?,
        notes: row.get(13)?,
        iso3_char: row.get(14)?,
        aor_code: row.get(15)?,
        country_name: row.get(16)?,
        recorded_size: u64::try_from(size).unwrap_or(0),
    })
}

impl Datastore for SqliteDatastore {
    fn listing(&self) -> StoreResult<Listing> {
        let conn = self.conn()?;
        refresh_keys(&conn)?;

        let mut stmt = conn.prepare(
            "SELECT DISTINCT product_key FROM products WHERE product_key IS NOT NULL",
        )?;
        let mut listing = Listing::default();
        for raw in stmt.query_map([], |row| row.get::<_, String>(0))? {
            let raw = raw?;
            match ProductKey::parse(&raw) {
                Ok(key) => listing.keys.push(key),
                Err(error) => listing.rejected.push(RejectedKey { raw, error }),
            }
        }

        let mut stmt =
            conn.prepare("SELECT DISTINCT nsn, nrn FROM products WHERE product_key IS NULL")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (nsn, nrn) = row?;
            if let Err(error) = key::encode(&nrn, &nsn) {
                log::warn!("Datastore row NRN='{nrn}' NSN='{nsn}' cannot be keyed: {error}");
                listing.rejected.push(RejectedKey {
                    raw: format!("{nsn}{}{nrn}", key::SEPARATOR),
                    error,
                });
            }
        }
        log::debug!(
            "Datastore lists {} unique keys, {} rejected",
            listing.keys.len(),
            listing.rejected.len()
        );
        Ok(listing)
    }

    fn get_record(&self, key: &ProductKey) -> StoreResult<Product> {
        let conn = self.conn()?;
        refresh_keys(&conn)?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM products WHERE product_key = ?1 \
             ORDER BY file_date DESC, id DESC LIMIT 1"
        );
        conn.query_row(&sql, params![key.as_str()], row_to_product)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }
}
