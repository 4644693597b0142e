//! Entities, identities and data keys.

use super::AuditError;
use super::value::{Merge, Properties};
use crate::formats::codec;
use crate::primitives::{MAX_IDENTITY_LENGTH, MAX_SUBTYPE_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// DATA TYPE
// =============================================================================

/// Family of an entity.
///
/// Every subtype name starts with `<family>/`, e.g. `resource/url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    Resource,
    Information,
    Vulnerability,
}

impl DataType {
    pub const ALL: [Self; 3] = [Self::Resource, Self::Information, Self::Vulnerability];

    /// Stable numeric code used in storage keys.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Resource => 1,
            Self::Information => 2,
            Self::Vulnerability => 3,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Resource),
            2 => Some(Self::Information),
            3 => Some(Self::Vulnerability),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Information => "information",
            Self::Vulnerability => "vulnerability",
        }
    }

    /// Infer the family from a subtype name.
    pub fn of_subtype(subtype: &str) -> Result<Self, AuditError> {
        let (family, rest) = subtype.split_once('/').ok_or_else(|| {
            AuditError::Validation(format!("Subtype '{}' has no family prefix", subtype))
        })?;
        if rest.is_empty() {
            return Err(AuditError::Validation(format!(
                "Subtype '{}' has an empty name",
                subtype
            )));
        }
        family.parse()
    }

    /// Check that `subtype` is well formed and belongs to this family.
    pub fn validate_subtype(self, subtype: &str) -> Result<(), AuditError> {
        if subtype.len() > MAX_SUBTYPE_LENGTH {
            return Err(AuditError::Validation(format!(
                "Subtype exceeds {} characters",
                MAX_SUBTYPE_LENGTH
            )));
        }
        let family = Self::of_subtype(subtype)?;
        if family != self {
            return Err(AuditError::Validation(format!(
                "Subtype '{}' does not belong to family '{}'",
                subtype, self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| AuditError::Validation(format!("Unknown data type '{}'", s)))
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Stable identity of an entity.
///
/// Usually the hex content hash of the entity's defining properties. An
/// identity never contains `-`, which separates the two ends of an edge key,
/// nor whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Result<Self, AuditError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AuditError::Validation("Identity is empty".to_string()));
        }
        if id.len() > MAX_IDENTITY_LENGTH {
            return Err(AuditError::Validation(format!(
                "Identity exceeds {} characters",
                MAX_IDENTITY_LENGTH
            )));
        }
        if let Some(c) = id.chars().find(|c| *c == '-' || !c.is_ascii_graphic()) {
            return Err(AuditError::Validation(format!(
                "Identity '{}' contains invalid character {:?}",
                id, c
            )));
        }
        Ok(Self(id))
    }

    /// Derive an identity from the content hash of `value`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, AuditError> {
        codec::content_hash(value).map(Self)
    }

    /// Rebuild an identity read back from storage.
    pub(crate) fn from_stored(id: &str) -> Self {
        Self(id.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = AuditError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

impl FromStr for Identity {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// DATA KEY
// =============================================================================

/// Address of stored data: an entity or an edge between two entities.
///
/// Edges are undirected. Use [`DataKey::edge`] to build one in canonical
/// order; the store normalizes any key it receives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataKey {
    Plain(Identity),
    Edge(Identity, Identity),
}

impl DataKey {
    /// Edge key with the lesser identity first.
    #[must_use]
    pub fn edge(a: Identity, b: Identity) -> Self {
        if a <= b { Self::Edge(a, b) } else { Self::Edge(b, a) }
    }

    /// The same key in canonical order.
    #[must_use]
    pub fn canonical(&self) -> Self {
        match self {
            Self::Plain(id) => Self::Plain(id.clone()),
            Self::Edge(a, b) => Self::edge(a.clone(), b.clone()),
        }
    }

    /// Parse `"id"` or `"left-right"`.
    pub fn parse(s: &str) -> Result<Self, AuditError> {
        match s.split_once('-') {
            None => Ok(Self::Plain(Identity::new(s)?)),
            Some((left, right)) => Ok(Self::edge(Identity::new(left)?, Identity::new(right)?)),
        }
    }

    #[must_use]
    pub const fn is_edge(&self) -> bool {
        matches!(self, Self::Edge(..))
    }
}

impl From<Identity> for DataKey {
    fn from(id: Identity) -> Self {
        Self::Plain(id)
    }
}

impl FromStr for DataKey {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical() {
            Self::Plain(id) => write!(f, "{}", id),
            Self::Edge(a, b) => write!(f, "{}-{}", a, b),
        }
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// A stored audit entity.
///
/// `links` lists the identities this entity is connected to. Links are
/// undirected and persisted as edges, not inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity<P = Properties> {
    pub identity: Identity,
    pub data_type: DataType,
    pub subtype: String,
    pub payload: P,
    pub links: BTreeSet<Identity>,
}

impl<P> Entity<P> {
    pub fn new(identity: Identity, subtype: impl Into<String>, payload: P) -> Result<Self, AuditError> {
        let subtype = subtype.into();
        let data_type = DataType::of_subtype(&subtype)?;
        Ok(Self {
            identity,
            data_type,
            subtype,
            payload,
            links: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn with_link(mut self, other: Identity) -> Self {
        self.links.insert(other);
        self
    }

    pub fn link(&mut self, other: Identity) -> bool {
        self.links.insert(other)
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        self.data_type.validate_subtype(&self.subtype)
    }
}

impl<P: Merge> Entity<P> {
    /// Merge a newer version of the same entity into this one.
    ///
    /// The payloads are merged and the links unioned. Family and subtype
    /// must match.
    pub fn merge(self, newer: Self) -> Result<Self, AuditError> {
        if self.identity != newer.identity {
            return Err(AuditError::Validation(format!(
                "Cannot merge '{}' into '{}'",
                newer.identity, self.identity
            )));
        }
        if self.data_type != newer.data_type || self.subtype != newer.subtype {
            return Err(AuditError::Validation(format!(
                "Entity '{}' is stored as '{}', not '{}'",
                self.identity, self.subtype, newer.subtype
            )));
        }
        let mut links = self.links;
        links.extend(newer.links);
        Ok(Self {
            identity: self.identity,
            data_type: self.data_type,
            subtype: self.subtype,
            payload: self.payload.merge(newer.payload),
            links,
        })
    }
}

/// Whether an add created a new entity or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddOutcome {
    Inserted,
    Merged,
}

impl AddOutcome {
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Both ends of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship<P = Properties> {
    pub left: Entity<P>,
    pub right: Entity<P>,
}

/// Data fetched by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record<P = Properties> {
    Entity(Entity<P>),
    Relationship(Relationship<P>),
}

impl<P> Record<P> {
    /// The key this record was stored under.
    #[must_use]
    pub fn key(&self) -> DataKey {
        match self {
            Self::Entity(e) => DataKey::Plain(e.identity.clone()),
            Self::Relationship(r) => DataKey::edge(r.left.identity.clone(), r.right.identity.clone()),
        }
    }

    #[must_use]
    pub fn into_entity(self) -> Option<Entity<P>> {
        match self {
            Self::Entity(e) => Some(e),
            Self::Relationship(_) => None,
        }
    }
}
