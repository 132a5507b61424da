//! Store layout upgrades.
//!
//! The physical schema is two tables: `collections` lists the collections the
//! layout defines and `entries` holds every record as JSON text. The layout
//! version is kept in `PRAGMA user_version`.

use super::{Pool, StoreError};
use worthy_engine::{Layout, SchemaVersion};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name     TEXT PRIMARY KEY,
    added_in INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS entries (
    collection TEXT NOT NULL REFERENCES collections(name),
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);
"#;

/// Read the layout version of the store.
pub async fn stored_version(pool: &Pool) -> Result<SchemaVersion, StoreError> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version as SchemaVersion)
}

/// Bring the store up to `layout`, returning the version it was at before.
///
/// All pending upgrades run in one transaction. Each only inserts collection
/// rows it does not already find, so running it again is a no-op and
/// collections from earlier versions are never touched.
pub async fn run_upgrades(pool: &Pool, layout: &Layout) -> Result<SchemaVersion, StoreError> {
    layout.validate()?;

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(CREATE_TABLES).execute(&mut *tx).await?;

    let (found,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(&mut *tx)
        .await?;
    let found = found as SchemaVersion;
    layout.check_compatible(found)?;

    for upgrade in layout.upgrades_from(found) {
        for name in &upgrade.adds {
            sqlx::query("INSERT OR IGNORE INTO collections (name, added_in) VALUES (?, ?)")
                .bind(name)
                .bind(upgrade.version as i64)
                .execute(&mut *tx)
                .await?;
        }
        tracing::info!(
            version = upgrade.version,
            collections = ?upgrade.adds,
            "Applied store upgrade"
        );
    }

    if layout.version() > found {
        // PRAGMA does not take bind parameters.
        sqlx::query(&format!("PRAGMA user_version = {}", layout.version()))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(found)
}
