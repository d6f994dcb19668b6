use std::path::Path;

use anyhow::{anyhow, Context, Result};
use people_core::{ContactDetails, NewPerson, Page, Person};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY,
  name TEXT,
  sex TEXT,
  nationality TEXT,
  age INTEGER,
  email TEXT
);
";

const SELECT_PERSON_COLUMNS: &str = "SELECT id, name, sex, nationality, age, email FROM users";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

/// Outcome of a migration run, or of a dry-run plan when `dry_run` is set.
///
/// For a dry run `versions` lists what would be applied and `to_version`
/// equals `from_version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub from_version: i64,
    pub to_version: i64,
    pub target_version: i64,
    pub versions: Vec<i64>,
    pub adopted_legacy_table: bool,
}

impl MigrationReport {
    fn new(dry_run: bool, before: &SchemaStatus, to_version: i64) -> Self {
        Self {
            dry_run,
            from_version: before.current_version,
            to_version,
            target_version: before.target_version,
            versions: before.pending_versions.clone(),
            adopted_legacy_table: before.inferred_from_legacy,
        }
    }

    #[must_use]
    pub fn up_to_date(&self) -> bool {
        self.to_version == self.target_version
    }
}

impl SqliteStore {
    /// Open a SQLite-backed people store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;
        register_unicode_lower(&conn)?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// Read-only: a database that was never migrated reports version 0 and is
    /// left as it was found.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions: ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect(),
            inferred_from_legacy,
        })
    }

    /// Describe what [`SqliteStore::migrate`] would do without touching the file.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read.
    pub fn plan_migrations(&self) -> Result<MigrationReport> {
        let status = self.schema_status()?;
        Ok(MigrationReport::new(true, &status, status.current_version))
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<MigrationReport> {
        let before = self.schema_status()?;
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(MigrationReport::new(false, &before, version))
    }

    fn bootstrap_schema_version(&mut self) -> Result<i64> {
        if table_exists(&self.conn, "users")? {
            // A users table written before migrations were tracked.
            ensure_legacy_users_shape(&self.conn)?;
            tracing::info!("adopting existing users table as schema version 1");
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(1)
    }

    /// Persist one assembled person and return it with its store-assigned id.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_person(&mut self, person: &NewPerson) -> Result<Person> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO users(name, sex, nationality, age, email) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![person.name, person.sex, person.nationality, i64::from(person.age), person.email],
        )
        .context("failed to insert user")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("failed to commit insert transaction")?;

        Ok(person.clone().into_person(id))
    }

    /// Load one page of people in id order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_people(&self, page: Page) -> Result<Vec<Person>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_PERSON_COLUMNS} ORDER BY id ASC LIMIT ?1 OFFSET ?2"))?;
        let rows = stmt.query_map(params![i64::from(page.limit), i64::from(page.skip)], map_person)?;

        let mut people = Vec::new();
        for row in rows {
            people.push(row.context("failed to decode user row")?);
        }
        Ok(people)
    }

    /// Fetch one person by id.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get_person(&self, id: i64) -> Result<Option<Person>> {
        let person = self
            .conn
            .query_row(&format!("{SELECT_PERSON_COLUMNS} WHERE id = ?1"), params![id], map_person)
            .optional()
            .with_context(|| format!("failed to load user {id}"))?;
        Ok(person)
    }

    /// Return the first person, in id order, whose name starts with `prefix`
    /// ignoring case.
    ///
    /// Folding goes through `unicode_lower` because the built-in `lower()` and
    /// `LIKE` only fold ASCII.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn find_by_name_prefix(&self, prefix: &str) -> Result<Option<Person>> {
        let needle = prefix.to_lowercase();
        let needle_chars =
            i64::try_from(needle.chars().count()).context("name prefix is too long")?;
        self.conn
            .query_row(
                &format!(
                    "{SELECT_PERSON_COLUMNS}
                     WHERE substr(unicode_lower(COALESCE(name, '')), 1, ?2) = ?1
                     ORDER BY id ASC
                     LIMIT 1"
                ),
                params![needle, needle_chars],
                map_person,
            )
            .optional()
            .with_context(|| format!("failed to look up user by name prefix {prefix}"))
    }

    /// Overwrite `name` and `email` of an existing person. Inferred fields are
    /// left untouched. Returns `None` when no person has this id.
    ///
    /// # Errors
    /// Returns an error when the update transaction fails.
    pub fn update_contact(&mut self, id: i64, contact: &ContactDetails) -> Result<Option<Person>> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let changed = tx
            .execute(
                "UPDATE users SET name = ?1, email = ?2 WHERE id = ?3",
                params![contact.name, contact.email, id],
            )
            .with_context(|| format!("failed to update user {id}"))?;
        if changed == 0 {
            return Ok(None);
        }

        let person = tx
            .query_row(&format!("{SELECT_PERSON_COLUMNS} WHERE id = ?1"), params![id], map_person)
            .with_context(|| format!("failed to reload user {id}"))?;
        tx.commit().context("failed to commit update transaction")?;
        Ok(Some(person))
    }
}

fn map_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    let age = row.get::<_, Option<i64>>(4)?;
    Ok(Person {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        sex: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        nationality: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        age: age.and_then(|value| u32::try_from(value).ok()).unwrap_or(0),
        email: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

fn register_unicode_lower(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|value| value.to_lowercase())),
    )
    .context("failed to register unicode_lower")
}

fn ensure_legacy_users_shape(conn: &Connection) -> Result<()> {
    for column in ["id", "name", "sex", "nationality", "age", "email"] {
        if !table_has_column(conn, "users", column)? {
            return Err(anyhow!("database schema is invalid: users table is missing {column}"));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(0);
    }
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if table_exists(conn, "users")? {
        ensure_legacy_users_shape(conn)?;
        return Ok((1, true));
    }

    Ok((0, false))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}
