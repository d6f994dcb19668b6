use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EnrichmentError {
    #[error("provider={provider} error=http_status status={status}")]
    Status { provider: &'static str, status: u16 },
    #[error("provider={provider} error={kind}")]
    Transport { provider: &'static str, kind: &'static str },
    #[error("provider={provider} error=malformed_response detail={detail}")]
    MalformedResponse { provider: &'static str, detail: String },
    #[error("provider={provider} error=no_candidates")]
    NoCandidates { provider: &'static str },
}

impl EnrichmentError {
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Status { provider, .. }
            | Self::Transport { provider, .. }
            | Self::MalformedResponse { provider, .. }
            | Self::NoCandidates { provider } => provider,
        }
    }
}

/// A stored person record. `id` is assigned by the store and never changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub sex: String,
    pub nationality: String,
    pub age: u32,
    pub email: String,
}

/// The caller-supplied part of a record, used by both create and update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactDetails {
    pub name: String,
    pub email: String,
}

/// A fully assembled record that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPerson {
    pub name: String,
    pub sex: String,
    pub nationality: String,
    pub age: u32,
    pub email: String,
}

impl NewPerson {
    #[must_use]
    pub fn without_demographics(contact: ContactDetails) -> Self {
        Self {
            name: contact.name,
            sex: String::new(),
            nationality: String::new(),
            age: 0,
            email: contact.email,
        }
    }

    #[must_use]
    pub fn with_demographics(contact: ContactDetails, demographics: Demographics) -> Self {
        Self {
            name: contact.name,
            sex: demographics.sex.unwrap_or_default(),
            nationality: demographics.nationality,
            age: demographics.age.unwrap_or(0),
            email: contact.email,
        }
    }

    #[must_use]
    pub fn into_person(self, id: i64) -> Person {
        Person {
            id,
            name: self.name,
            sex: self.sex,
            nationality: self.nationality,
            age: self.age,
            email: self.email,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Demographics {
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub nationality: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_page_limit")]
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: DEFAULT_PAGE_LIMIT }
    }
}

fn default_page_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    /// Two or more tokens: surname first, first name second.
    Full { surname: String, first_name: String },
    Single { first_name: String },
    Empty,
}

impl ParsedName {
    #[must_use]
    pub fn surname(&self) -> &str {
        match self {
            Self::Full { surname, .. } => surname,
            Self::Single { .. } | Self::Empty => "",
        }
    }

    #[must_use]
    pub fn first_name(&self) -> &str {
        match self {
            Self::Full { first_name, .. } | Self::Single { first_name } => first_name,
            Self::Empty => "",
        }
    }

    /// The first name to enrich with, present only when it is distinguishable
    /// from the surname.
    #[must_use]
    pub fn enrichment_key(&self) -> Option<&str> {
        match self {
            Self::Full { first_name, .. } => Some(first_name),
            Self::Single { .. } | Self::Empty => None,
        }
    }
}

/// Split a full name on whitespace. Tokens after the second are dropped.
#[must_use]
pub fn parse_full_name(full_name: &str) -> ParsedName {
    let mut tokens = full_name.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(surname), Some(first_name)) => ParsedName::Full {
            surname: surname.to_string(),
            first_name: first_name.to_string(),
        },
        (Some(first_name), None) => ParsedName::Single { first_name: first_name.to_string() },
        _ => ParsedName::Empty,
    }
}

/// One demographic-inference lookup keyed on a first name.
pub trait DemographicProvider: Send + Sync {
    type Output;

    fn provider(&self) -> &'static str;

    /// # Errors
    /// Returns [`EnrichmentError`] when the provider is unreachable, answers with a
    /// non-success status, or returns a body that cannot be interpreted.
    fn infer(&self, first_name: &str) -> Result<Self::Output, EnrichmentError>;
}

pub type AgeProvider = dyn DemographicProvider<Output = Option<u32>>;
pub type SexProvider = dyn DemographicProvider<Output = Option<String>>;
pub type NationalityProvider = dyn DemographicProvider<Output = String>;

#[derive(Clone)]
pub struct Enricher {
    age: Arc<AgeProvider>,
    sex: Arc<SexProvider>,
    nationality: Arc<NationalityProvider>,
}

impl Debug for Enricher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("age", &self.age.provider())
            .field("sex", &self.sex.provider())
            .field("nationality", &self.nationality.provider())
            .finish()
    }
}

impl Enricher {
    #[must_use]
    pub fn new(
        age: Arc<AgeProvider>,
        sex: Arc<SexProvider>,
        nationality: Arc<NationalityProvider>,
    ) -> Self {
        Self { age, sex, nationality }
    }

    /// Run the three lookups one after another.
    ///
    /// # Errors
    /// Returns the first provider error; no partial result is kept.
    pub fn enrich(&self, first_name: &str) -> Result<Demographics, EnrichmentError> {
        tracing::debug!(first_name, "running demographic enrichment");
        let age = self.age.infer(first_name)?;
        let sex = self.sex.infer(first_name)?;
        let nationality = self.nationality.infer(first_name)?;
        Ok(Demographics { age, sex, nationality })
    }
}

/// Build the record for a create request, enriching it when the name carries a
/// separate first name.
///
/// # Errors
/// Returns [`EnrichmentError`] when any of the three lookups fails.
pub fn assemble_person(
    contact: ContactDetails,
    enricher: &Enricher,
) -> Result<NewPerson, EnrichmentError> {
    let parsed = parse_full_name(&contact.name);
    match parsed.enrichment_key() {
        Some(first_name) => {
            let demographics = enricher.enrich(first_name)?;
            Ok(NewPerson::with_demographics(contact, demographics))
        }
        None => Ok(NewPerson::without_demographics(contact)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;

    struct Recording<T> {
        output: Result<T, EnrichmentError>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl<T> Recording<T> {
        fn new(output: Result<T, EnrichmentError>) -> Self {
            Self { output, calls: AtomicUsize::new(0), seen: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<String> {
            match self.seen.lock() {
                Ok(seen) => seen.clone(),
                Err(err) => panic!("recording lock poisoned: {err}"),
            }
        }
    }

    impl<T: Clone + Send + Sync> DemographicProvider for Recording<T> {
        type Output = T;

        fn provider(&self) -> &'static str {
            "recording"
        }

        fn infer(&self, first_name: &str) -> Result<T, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.seen.lock() {
                Ok(mut seen) => seen.push(first_name.to_string()),
                Err(err) => panic!("recording lock poisoned: {err}"),
            }
            self.output.clone()
        }
    }

    struct Fixture {
        age: Arc<Recording<Option<u32>>>,
        sex: Arc<Recording<Option<String>>>,
        nationality: Arc<Recording<String>>,
    }

    impl Fixture {
        fn with(
            age: Result<Option<u32>, EnrichmentError>,
            sex: Result<Option<String>, EnrichmentError>,
            nationality: Result<String, EnrichmentError>,
        ) -> Self {
            Self {
                age: Arc::new(Recording::new(age)),
                sex: Arc::new(Recording::new(sex)),
                nationality: Arc::new(Recording::new(nationality)),
            }
        }

        fn found() -> Self {
            Self::with(Ok(Some(42)), Ok(Some("male".to_string())), Ok("RU".to_string()))
        }

        fn enricher(&self) -> Enricher {
            Enricher::new(self.age.clone(), self.sex.clone(), self.nationality.clone())
        }

        fn total_calls(&self) -> usize {
            self.age.calls() + self.sex.calls() + self.nationality.calls()
        }
    }

    fn contact(name: &str) -> ContactDetails {
        ContactDetails { name: name.to_string(), email: "someone@example.com".to_string() }
    }

    #[test]
    fn two_tokens_split_into_surname_and_first_name() {
        let parsed = parse_full_name("Ivanov Petr");
        assert_eq!(parsed.surname(), "Ivanov");
        assert_eq!(parsed.first_name(), "Petr");
        assert_eq!(parsed.enrichment_key(), Some("Petr"));
    }

    #[test]
    fn tokens_after_the_second_are_discarded() {
        let parsed = parse_full_name("  Ivanov   Petr\tSergeevich ");
        assert_eq!(
            parsed,
            ParsedName::Full { surname: "Ivanov".to_string(), first_name: "Petr".to_string() }
        );
    }

    #[test]
    fn single_token_has_no_surname_and_no_enrichment_key() {
        let parsed = parse_full_name("Petr");
        assert_eq!(parsed.surname(), "");
        assert_eq!(parsed.first_name(), "Petr");
        assert_eq!(parsed.enrichment_key(), None);
    }

    #[test]
    fn blank_input_parses_to_empty() {
        assert_eq!(parse_full_name(""), ParsedName::Empty);
        assert_eq!(parse_full_name(" \t\n "), ParsedName::Empty);
        assert_eq!(parse_full_name("").first_name(), "");
    }

    #[test]
    fn assemble_enriches_on_the_second_token() {
        let fixture = Fixture::found();
        let person = match assemble_person(contact("Иванов Петр"), &fixture.enricher()) {
            Ok(person) => person,
            Err(err) => panic!("assembly failed: {err}"),
        };

        assert_eq!(person.name, "Иванов Петр");
        assert_eq!(person.age, 42);
        assert_eq!(person.sex, "male");
        assert_eq!(person.nationality, "RU");
        assert_eq!(fixture.age.seen(), vec!["Петр".to_string()]);
        assert_eq!(fixture.sex.seen(), vec!["Петр".to_string()]);
        assert_eq!(fixture.nationality.seen(), vec!["Петр".to_string()]);
    }

    #[test]
    fn assemble_maps_missing_provider_values_to_defaults() {
        let fixture = Fixture::with(Ok(None), Ok(None), Ok("FI".to_string()));
        let person = match assemble_person(contact("Virtanen Aino"), &fixture.enricher()) {
            Ok(person) => person,
            Err(err) => panic!("assembly failed: {err}"),
        };

        assert_eq!(person.age, 0);
        assert_eq!(person.sex, "");
        assert_eq!(person.nationality, "FI");
    }

    #[test]
    fn assemble_skips_providers_for_single_token_and_blank_names() {
        let fixture = Fixture::found();
        for name in ["Petr", "", "   "] {
            let person = match assemble_person(contact(name), &fixture.enricher()) {
                Ok(person) => person,
                Err(err) => panic!("assembly failed for {name:?}: {err}"),
            };
            assert_eq!(person.name, name);
            assert_eq!(person.age, 0);
            assert_eq!(person.sex, "");
            assert_eq!(person.nationality, "");
        }
        assert_eq!(fixture.total_calls(), 0);
    }

    #[test]
    fn assemble_fails_when_any_provider_fails() {
        let fixture = Fixture::with(
            Ok(Some(30)),
            Ok(Some("female".to_string())),
            Err(EnrichmentError::NoCandidates { provider: "nationalize" }),
        );

        let result = assemble_person(contact("Smith Jane"), &fixture.enricher());
        assert_eq!(result, Err(EnrichmentError::NoCandidates { provider: "nationalize" }));
        assert_eq!(fixture.age.calls(), 1);
        assert_eq!(fixture.sex.calls(), 1);
    }

    #[test]
    fn page_defaults_to_first_ten_records() {
        assert_eq!(Page::default(), Page { skip: 0, limit: 10 });
    }

    proptest! {
        #[test]
        fn property_parser_never_panics_and_keeps_tokens(input in "\\PC{0,40}") {
            let tokens = input.split_whitespace().collect::<Vec<_>>();
            let parsed = parse_full_name(&input);
            match tokens.len() {
                0 => prop_assert_eq!(parsed, ParsedName::Empty),
                1 => {
                    prop_assert_eq!(parsed.first_name(), tokens[0]);
                    prop_assert_eq!(parsed.surname(), "");
                }
                _ => {
                    prop_assert_eq!(parsed.surname(), tokens[0]);
                    prop_assert_eq!(parsed.enrichment_key(), Some(tokens[1]));
                }
            }
        }

        #[test]
        fn property_first_name_never_contains_whitespace(input in "[a-zA-Z \\t]{0,30}") {
            let parsed = parse_full_name(&input);
            prop_assert!(!parsed.first_name().chars().any(char::is_whitespace));
            prop_assert!(!parsed.surname().chars().any(char::is_whitespace));
        }
    }
}
