//! Store schema creation, versioning and migration.

use log::info;
use rusqlite::Connection;
use semver::Version as SchemaVersion;

use crate::Error;

/// The newest schema version this library reads and writes.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// The statements creating a workspace schema, with `{s}` as the
/// schema-name placeholder.
///
/// `constraint` is an SQL keyword, so the prerequisite constraint
/// column is called `constraint_value`.
const CREATE_SCHEMA: &str = "
CREATE TABLE {s}.schema_version (
    version TEXT NOT NULL
);
CREATE TABLE {s}.configuration (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT,
    type TEXT NOT NULL,
    path TEXT NOT NULL,
    expl INTEGER NOT NULL
);
CREATE TABLE {s}.repository (
    name TEXT PRIMARY KEY,
    location TEXT NOT NULL,
    certificate TEXT
) WITHOUT ROWID;
CREATE TABLE {s}.repository_fragment (
    name TEXT PRIMARY KEY,
    location TEXT NOT NULL
) WITHOUT ROWID;
CREATE TABLE {s}.repository_fragment_association (
    repository TEXT NOT NULL,
    fragment TEXT NOT NULL,
    PRIMARY KEY (repository, fragment)
) WITHOUT ROWID;
CREATE TABLE {s}.repository_fragment_complement (
    fragment TEXT NOT NULL,
    complement TEXT NOT NULL,
    PRIMARY KEY (fragment, complement)
) WITHOUT ROWID;
CREATE TABLE {s}.repository_fragment_prerequisite (
    fragment TEXT NOT NULL,
    prerequisite TEXT NOT NULL,
    PRIMARY KEY (fragment, prerequisite)
) WITHOUT ROWID;
CREATE TABLE {s}.available_package (
    name TEXT NOT NULL COLLATE NOCASE,
    version TEXT NOT NULL,
    canonical_version TEXT NOT NULL,
    system INTEGER NOT NULL,
    type TEXT,
    project TEXT,
    languages TEXT NOT NULL,
    dependencies TEXT NOT NULL,
    bootstrap_build TEXT,
    root_build TEXT,
    sha256sum TEXT,
    locations TEXT NOT NULL,
    PRIMARY KEY (name, version, system)
);
CREATE INDEX {s}.available_package_order
    ON available_package (name COLLATE NOCASE, canonical_version DESC, system);
CREATE TABLE {s}.selected_package (
    name TEXT PRIMARY KEY COLLATE NOCASE,
    version TEXT NOT NULL,
    state TEXT NOT NULL,
    substate TEXT NOT NULL,
    hold_package INTEGER NOT NULL,
    hold_version INTEGER NOT NULL,
    archive TEXT,
    src_root TEXT,
    out_root TEXT,
    alternatives TEXT NOT NULL,
    config_variables TEXT NOT NULL,
    config_checksum TEXT NOT NULL,
    source_checksum TEXT
);
CREATE TABLE {s}.selected_package_prerequisite (
    name TEXT NOT NULL COLLATE NOCASE,
    prerequisite_configuration TEXT NOT NULL,
    prerequisite_name TEXT NOT NULL COLLATE NOCASE,
    constraint_value TEXT,
    PRIMARY KEY (name, prerequisite_configuration, prerequisite_name)
) WITHOUT ROWID;
CREATE INDEX {s}.selected_package_dependent
    ON selected_package_prerequisite (prerequisite_name, prerequisite_configuration);
CREATE TABLE {s}.certificate (
    fingerprint TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    organization TEXT NOT NULL,
    email TEXT,
    not_before TEXT NOT NULL,
    not_after TEXT NOT NULL,
    dummy INTEGER NOT NULL
) WITHOUT ROWID;
";

/// Creates the full schema in the database attached under `schema`.
///
/// # Errors
///
/// Returns an error if any of the DDL statements fail.
pub fn create_schema(conn: &Connection, schema: &str) -> Result<(), Error> {
    conn.execute_batch(&CREATE_SCHEMA.replace("{s}", schema))?;
    conn.execute(
        &format!("INSERT INTO {schema}.schema_version (version) VALUES (?1)"),
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Reads the schema version of the database attached under `schema`.
///
/// # Errors
///
/// Returns [`Error::MalformedSchemaVersion`] if the stored version is
/// not valid semver, or an SQLite error if the version table is
/// unreadable.
pub fn read_version(conn: &Connection, schema: &str) -> Result<SchemaVersion, Error> {
    let version: String = conn.query_row(
        &format!("SELECT version FROM {schema}.schema_version"),
        [],
        |row| row.get(0),
    )?;
    version
        .parse()
        .map_err(|_| Error::MalformedSchemaVersion(version))
}

/// Migrates the database attached under `schema` to [`SCHEMA_VERSION`].
///
/// A schema newer than this library fails; an older schema is migrated
/// forward step by step inside the caller's transaction.
///
/// # Errors
///
/// Returns [`Error::SchemaTooNew`] for a newer schema and any
/// migration-step error otherwise.
pub fn migrate(conn: &Connection, schema: &str) -> Result<(), Error> {
    let current: SchemaVersion = SCHEMA_VERSION
        .parse()
        .map_err(|_| Error::MalformedSchemaVersion(SCHEMA_VERSION.to_string()))?;
    let mut found = read_version(conn, schema)?;

    if found > current {
        return Err(Error::SchemaTooNew {
            found: found.to_string(),
            supported: current.to_string(),
        });
    }

    while found < current {
        // Migration steps dispatch on the major version found; 1 is
        // the first released schema, so there is nothing to replay yet.
        info!("migrating workspace schema {found} to {current}");
        found = current.clone();
    }

    conn.execute(
        &format!("UPDATE {schema}.schema_version SET version = ?1"),
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn create_and_read() -> TestResult {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn, "main")?;
        assert_eq!(read_version(&conn, "main")?.to_string(), SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn newer_schema_fails() -> TestResult {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn, "main")?;
        conn.execute("UPDATE schema_version SET version = '999.0.0'", [])?;
        let err = migrate(&conn, "main").unwrap_err();
        assert!(matches!(err, Error::SchemaTooNew { .. }));
        Ok(())
    }

    #[test]
    fn older_schema_migrates() -> TestResult {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn, "main")?;
        conn.execute("UPDATE schema_version SET version = '0.9.0'", [])?;
        migrate(&conn, "main")?;
        assert_eq!(read_version(&conn, "main")?.to_string(), SCHEMA_VERSION);
        Ok(())
    }
}
