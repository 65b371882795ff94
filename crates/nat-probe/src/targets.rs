//! Named probe targets.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};

/// Selectors that expand to every configured target.
const ALL_SELECTORS: &[&str] = &["both", "all"];

/// A named target endpoint (base URL, without the `/ping` path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
}

impl Target {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Ordered set of targets addressed by short name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetSet(Vec<Target>);

impl TargetSet {
    pub fn new(targets: Vec<Target>) -> Self {
        Self(targets)
    }

    /// Add a target, replacing any existing one with the same name in place.
    pub fn upsert(&mut self, target: Target) {
        match self.0.iter_mut().find(|t| t.name == target.name) {
            Some(existing) => existing.url = target.url,
            None => self.0.push(target),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Target> {
        self.0.iter().find(|t| t.name == name)
    }

    /// Look up a single target by name.
    pub fn resolve(&self, name: &str) -> Result<&Target, HarnessError> {
        self.get(name)
            .ok_or_else(|| HarnessError::UnknownTarget(name.to_string()))
    }

    /// Expand a selector (`"both"`, `"all"` or a single name) into targets.
    pub fn select(&self, selector: &str) -> Result<Vec<Target>, HarnessError> {
        if ALL_SELECTORS.contains(&selector) {
            if self.0.is_empty() {
                return Err(HarnessError::NoTargets);
            }
            return Ok(self.0.clone());
        }
        self.resolve(selector).map(|t| vec![t.clone()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TargetSet {
    fn default() -> Self {
        Self(vec![
            Target::new("a", "http://10.1.0.10:8080"),
            Target::new("b", "http://10.2.0.10:8080"),
        ])
    }
}
