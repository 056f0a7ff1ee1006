//! Test case metadata: modifiers and identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy tag altering scheduling and verdict behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Normal,
    Todo,
    Skip,
    Debug,
    Ignore,
    Failing,
    Required,
}

impl Modifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Normal => "normal",
            Modifier::Todo => "todo",
            Modifier::Skip => "skip",
            Modifier::Debug => "debug",
            Modifier::Ignore => "ignore",
            Modifier::Failing => "failing",
            Modifier::Required => "required",
        }
    }

    /// Whether a failure of this case can affect the suite verdict at all.
    pub fn counts_toward_verdict(&self) -> bool {
        !matches!(self, Modifier::Skip | Modifier::Todo | Modifier::Ignore)
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a registered case: the source unit it came from, its unique
/// name within that unit, and its modifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseMeta {
    pub origin: String,
    pub name: String,
    pub modifier: Modifier,
}

impl CaseMeta {
    pub fn new(origin: impl Into<String>, name: impl Into<String>, modifier: Modifier) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
            modifier,
        }
    }

    /// Globally unique name, used to key snapshots.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.origin, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_relevance_per_modifier() {
        assert!(Modifier::Normal.counts_toward_verdict());
        assert!(Modifier::Required.counts_toward_verdict());
        assert!(Modifier::Failing.counts_toward_verdict());
        assert!(!Modifier::Skip.counts_toward_verdict());
        assert!(!Modifier::Ignore.counts_toward_verdict());
        assert!(!Modifier::Todo.counts_toward_verdict());
    }
}
