//! Object identifier grammar.
//!
//! # Responsibility
//! - Parse opaque id strings into kind-tagged identifiers.
//! - Generate new identifiers from titles.
//!
//! # Invariants
//! - Kind is derived from the prefix alone: `P-`, `E-`, `F-`, `T-` for the
//!   hierarchy and `ST-` for standalone tasks.
//! - Slugs are lower-case ASCII alphanumerics separated by single dashes.
//! - An `ObjectId` value is always well-formed; construction goes through
//!   [`ObjectId::parse`].

use crate::model::object::ObjectKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static OBJECT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(P|E|F|T|ST)-([a-z0-9]+(?:-[a-z0-9]+)*)$").expect("valid object id regex")
});
static SLUG_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug separator regex"));

const MAX_ID_LEN: usize = 96;
const MAX_GENERATED_SLUG_CHARS: usize = 48;

/// Id prefix family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdPrefix {
    Project,
    Epic,
    Feature,
    Task,
    StandaloneTask,
}

impl IdPrefix {
    /// Literal prefix including the trailing dash.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "P-",
            Self::Epic => "E-",
            Self::Feature => "F-",
            Self::Task => "T-",
            Self::StandaloneTask => "ST-",
        }
    }

    pub fn kind(self) -> ObjectKind {
        match self {
            Self::Project => ObjectKind::Project,
            Self::Epic => ObjectKind::Epic,
            Self::Feature => ObjectKind::Feature,
            Self::Task | Self::StandaloneTask => ObjectKind::Task,
        }
    }

    /// Returns the prefix used for a new object of `kind`.
    pub fn for_kind(kind: ObjectKind, standalone: bool) -> Self {
        match kind {
            ObjectKind::Project => Self::Project,
            ObjectKind::Epic => Self::Epic,
            ObjectKind::Feature => Self::Feature,
            ObjectKind::Task if standalone => Self::StandaloneTask,
            ObjectKind::Task => Self::Task,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "P" => Some(Self::Project),
            "E" => Some(Self::Epic),
            "F" => Some(Self::Feature),
            "T" => Some(Self::Task),
            "ST" => Some(Self::StandaloneTask),
            _ => None,
        }
    }
}

/// Identifier parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    Empty,
    TooLong(String),
    /// Prefix does not match any known kind.
    UnknownPrefix(String),
    /// Prefix is known but the slug is malformed.
    InvalidSlug(String),
}

impl IdError {
    /// Raw input that failed to parse.
    pub fn input(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::TooLong(value) | Self::UnknownPrefix(value) | Self::InvalidSlug(value) => value,
        }
    }
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "object id must not be empty"),
            Self::TooLong(value) => write!(f, "object id is too long: {value}"),
            Self::UnknownPrefix(value) => write!(
                f,
                "object id `{value}` has no known prefix; expected P-|E-|F-|T-|ST-"
            ),
            Self::InvalidSlug(value) => write!(
                f,
                "object id `{value}` must use lower-case alphanumerics separated by dashes"
            ),
        }
    }
}

impl Error for IdError {}

/// Kind-prefixed object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Parses and validates one id string. Surrounding whitespace is ignored.
    pub fn parse(value: &str) -> Result<Self, IdError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        if trimmed.len() > MAX_ID_LEN {
            return Err(IdError::TooLong(trimmed.to_string()));
        }
        if OBJECT_ID_RE.is_match(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }

        let known_prefix = trimmed
            .split_once('-')
            .and_then(|(tag, _)| IdPrefix::from_tag(tag))
            .is_some();
        if known_prefix {
            Err(IdError::InvalidSlug(trimmed.to_string()))
        } else {
            Err(IdError::UnknownPrefix(trimmed.to_string()))
        }
    }

    /// Builds an id from a prefix and an already-normalized slug.
    pub fn from_parts(prefix: IdPrefix, slug: &str) -> Result<Self, IdError> {
        Self::parse(&format!("{}{}", prefix.as_str(), slug))
    }

    /// Generates an id from a free-text title.
    ///
    /// Falls back to a short random slug when the title has no usable
    /// characters.
    pub fn generate(prefix: IdPrefix, title: &str) -> Self {
        let slug = slugify(title);
        let slug = if slug.is_empty() {
            Uuid::new_v4().simple().to_string()[..8].to_string()
        } else {
            slug
        };
        Self(format!("{}{}", prefix.as_str(), slug))
    }

    /// Returns a sibling id with a numeric collision suffix, e.g. `T-login-2`.
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{n}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> IdPrefix {
        if self.0.starts_with(IdPrefix::StandaloneTask.as_str()) {
            return IdPrefix::StandaloneTask;
        }
        match self.0.as_bytes()[0] {
            b'P' => IdPrefix::Project,
            b'E' => IdPrefix::Epic,
            b'F' => IdPrefix::Feature,
            _ => IdPrefix::Task,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.prefix().kind()
    }

    pub fn is_standalone(&self) -> bool {
        self.prefix() == IdPrefix::StandaloneTask
    }

    pub fn slug(&self) -> &str {
        &self.0[self.prefix().as_str().len()..]
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(value: ObjectId) -> Self {
        value.0
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn slugify(title: &str) -> String {
    let lowered = title.trim().to_ascii_lowercase();
    let dashed = SLUG_SEPARATOR_RE.replace_all(&lowered, "-");
    let mut slug: String = dashed
        .trim_matches('-')
        .chars()
        .take(MAX_GENERATED_SLUG_CHARS)
        .collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::{slugify, IdError, IdPrefix, ObjectId};
    use crate::model::object::ObjectKind;

    #[test]
    fn parse_derives_kind_from_prefix() {
        let cases = [
            ("P-alpha", IdPrefix::Project, ObjectKind::Project),
            ("E-alpha", IdPrefix::Epic, ObjectKind::Epic),
            ("F-alpha-2", IdPrefix::Feature, ObjectKind::Feature),
            ("T-alpha", IdPrefix::Task, ObjectKind::Task),
            ("ST-alpha", IdPrefix::StandaloneTask, ObjectKind::Task),
        ];
        for (raw, prefix, kind) in cases {
            let id = ObjectId::parse(raw).unwrap();
            assert_eq!(id.prefix(), prefix, "{raw}");
            assert_eq!(id.kind(), kind, "{raw}");
            assert_eq!(id.slug(), &raw[prefix.as_str().len()..]);
        }
    }

    #[test]
    fn parse_distinguishes_unknown_prefix_from_bad_slug() {
        assert!(matches!(
            ObjectId::parse("X-alpha"),
            Err(IdError::UnknownPrefix(_))
        ));
        assert!(matches!(
            ObjectId::parse("STX-alpha"),
            Err(IdError::UnknownPrefix(_))
        ));
        assert!(matches!(
            ObjectId::parse("T-Bad_Slug"),
            Err(IdError::InvalidSlug(_))
        ));
        assert!(matches!(ObjectId::parse("T-"), Err(IdError::InvalidSlug(_))));
        assert_eq!(ObjectId::parse("  "), Err(IdError::Empty));
    }

    #[test]
    fn slugify_collapses_symbols_and_trims() {
        assert_eq!(slugify("  Add OAuth2 login!! "), "add-oauth2-login");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn generate_falls_back_to_random_slug() {
        let id = ObjectId::generate(IdPrefix::StandaloneTask, "???");
        assert!(id.is_standalone());
        assert_eq!(id.slug().len(), 8);
        assert!(ObjectId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn with_suffix_keeps_grammar() {
        let id = ObjectId::generate(IdPrefix::Task, "Write docs");
        assert_eq!(id.with_suffix(2).as_str(), "T-write-docs-2");
    }
}
