//! Tags and the entity tagging convention.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;

/// An ordered, de-duplicated set of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag, returning the set.
    #[must_use]
    pub fn with(mut self, tag: impl Into<String>) -> Self {
        self.insert(tag);
        self
    }

    /// Adds a tag. Empty tags are ignored.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if tag.is_empty() {
            return false;
        }
        self.0.insert(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Tags in `self` other than `tag`.
    pub fn others<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> {
        self.iter().filter(move |t| *t != tag)
    }

    /// Merges another set into this one.
    pub fn extend(&mut self, other: &TagSet) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for TagSet {
    fn from(tags: [S; N]) -> Self {
        tags.into_iter().collect()
    }
}

impl IntoIterator for TagSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Tag vocabulary for one entity family.
///
/// Every list query of the family carries `"<plural>_list"`; a detail entry
/// carries that tag plus `"<singular>_<id>"`. Flushing both on a write
/// refreshes the record and every list that may include it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTags {
    singular: String,
    plural: String,
}

impl EntityTags {
    pub fn new(singular: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            singular: singular.into(),
            plural: plural.into(),
        }
    }

    pub fn singular(&self) -> &str {
        &self.singular
    }

    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// `"<plural>_list"`.
    pub fn list_tag(&self) -> String {
        format!("{}_list", self.plural)
    }

    /// `"<singular>_<id>"`.
    pub fn record_tag(&self, id: impl Display) -> String {
        format!("{}_{}", self.singular, id)
    }

    /// Tags for a list query.
    pub fn list(&self) -> TagSet {
        TagSet::new().with(self.list_tag())
    }

    /// Tags for a single record: its own tag only.
    pub fn record(&self, id: impl Display) -> TagSet {
        TagSet::new().with(self.record_tag(id))
    }

    /// Tags attached to a detail entry and flushed when the record changes.
    pub fn for_record(&self, id: impl Display) -> TagSet {
        TagSet::new().with(self.list_tag()).with(self.record_tag(id))
    }
}
