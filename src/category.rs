//! Subject → foundation mapping.
//!
//! Loaded once per process from a JSON object such as
//! `{"Biology": ["Foundation 2: Cells", "Foundation 3: Organ systems"]}` and
//! shared read-only behind an `Arc`. Reloading means building a new map.
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use tracing::info;

use crate::error::EngineError;

/// Subject → foundations as written in the file. Unlike a plain map, a
/// subject key that appears twice is an error instead of last-one-wins.
struct RawMapping(BTreeMap<String, Vec<String>>);

impl<'de> Deserialize<'de> for RawMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = RawMapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping subject names to foundation lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RawMapping, A::Error> {
                let mut map = BTreeMap::new();
                while let Some((subject, foundations)) =
                    access.next_entry::<String, Vec<String>>()?
                {
                    if map.contains_key(&subject) {
                        return Err(de::Error::custom(format!(
                            "subject '{subject}' is defined twice"
                        )));
                    }
                    map.insert(subject, foundations);
                }
                Ok(RawMapping(map))
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}

#[derive(Debug, Clone)]
pub struct CategoryMap {
    subjects: BTreeMap<String, Vec<String>>,
}

impl CategoryMap {
    /// Build a map, rejecting blank names and empty foundation sets.
    ///
    /// Foundation order is preserved; duplicates within a subject are dropped.
    pub fn from_map(raw: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut subjects = BTreeMap::new();

        for (subject, foundations) in raw {
            let subject = subject.trim().to_string();
            anyhow::ensure!(!subject.is_empty(), "category map has a blank subject name");

            let mut seen = HashSet::new();
            let mut ordered = Vec::with_capacity(foundations.len());
            for foundation in foundations {
                let foundation = foundation.trim().to_string();
                anyhow::ensure!(
                    !foundation.is_empty(),
                    "subject '{subject}' has a blank foundation name"
                );
                if seen.insert(foundation.clone()) {
                    ordered.push(foundation);
                }
            }
            anyhow::ensure!(
                !ordered.is_empty(),
                "subject '{subject}' maps to no foundations"
            );
            anyhow::ensure!(
                subjects.insert(subject.clone(), ordered).is_none(),
                "subject '{subject}' is defined twice"
            );
        }

        anyhow::ensure!(!subjects.is_empty(), "category map is empty");
        Ok(Self { subjects })
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let RawMapping(raw) =
            serde_json::from_str(data).context("category map must be an object of string arrays")?;
        Self::from_map(raw)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read category map: {}", path.display()))?;
        let map = Self::from_json(&data)
            .with_context(|| format!("invalid category map: {}", path.display()))?;
        info!(
            "Loaded {} subjects from {}",
            map.subjects.len(),
            path.display()
        );
        Ok(map)
    }

    /// Foundations allowed for `subject`. Unknown subjects fail closed.
    pub fn resolve(&self, subject: &str) -> Result<&[String], EngineError> {
        self.subjects
            .get(subject.trim())
            .map(Vec::as_slice)
            .ok_or_else(|| EngineError::UnknownSubject {
                subject: subject.to_string(),
                known: self.subjects().map(str::to_string).collect(),
            })
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// Whether any subject reaches `foundation`.
    #[must_use]
    pub fn covers(&self, foundation: &str) -> bool {
        self.subjects
            .values()
            .any(|fs| fs.iter().any(|f| f == foundation))
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
