use std::path::PathBuf;

use people_core::{assemble_person, ContactDetails, Enricher, EnrichmentError, Page, Person};
use people_store_sqlite::{MigrationReport, SqliteStore};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Transport-neutral entry point for every people operation.
///
/// Holds no connection: each call opens its own store and drops it before
/// returning.
#[derive(Debug, Clone)]
pub struct PeopleApi {
    db_path: PathBuf,
    enricher: Enricher,
}

impl PeopleApi {
    #[must_use]
    pub fn new(db_path: PathBuf, enricher: Enricher) -> Self {
        Self { db_path, enricher }
    }

    fn open_store(&self) -> anyhow::Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Bring the database up to the latest schema version.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or a migration fails.
    pub fn migrate(&self) -> ApiResult<MigrationReport> {
        let mut store = SqliteStore::open(&self.db_path)?;
        Ok(store.migrate()?)
    }

    /// Enrich and persist a new person.
    ///
    /// Enrichment runs before the store is opened, so a provider failure leaves
    /// the database untouched.
    ///
    /// # Errors
    /// Returns [`ApiError::Enrichment`] when a provider lookup fails and
    /// [`ApiError::Store`] when persistence fails.
    pub fn create_user(&self, contact: ContactDetails) -> ApiResult<Person> {
        let new_person = assemble_person(contact, &self.enricher)?;
        let mut store = self.open_store()?;
        let person = store.insert_person(&new_person)?;
        tracing::info!(user_id = person.id, "user created");
        Ok(person)
    }

    /// List one page of users in store order.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_users(&self, page: Page) -> ApiResult<Vec<Person>> {
        let store = self.open_store()?;
        Ok(store.list_people(page)?)
    }

    /// Fetch one user by id.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] when no user has this id.
    pub fn get_user(&self, id: i64) -> ApiResult<Person> {
        let store = self.open_store()?;
        store.get_person(id)?.ok_or_else(|| ApiError::NotFound(format!("id={id}")))
    }

    /// Find the first user whose name starts with `prefix`, ignoring case.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] when nothing matches.
    pub fn user_by_name_prefix(&self, prefix: &str) -> ApiResult<Person> {
        let store = self.open_store()?;
        store
            .find_by_name_prefix(prefix)?
            .ok_or_else(|| ApiError::NotFound(format!("name prefix={prefix}")))
    }

    /// Replace a user's name and email. Inferred fields never change.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] when no user has this id; nothing is written
    /// in that case.
    pub fn update_user(&self, id: i64, contact: ContactDetails) -> ApiResult<Person> {
        let mut store = self.open_store()?;
        let person = store
            .update_contact(id, &contact)?
            .ok_or_else(|| ApiError::NotFound(format!("id={id}")))?;
        tracing::info!(user_id = person.id, "user updated");
        Ok(person)
    }
}
