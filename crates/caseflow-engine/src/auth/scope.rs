//! Scope modules and the frozen scope registry
//!
//! Scopes are dotted identifiers (`er.triage.claim`) assembled from nested
//! modules at service construction. The registry is immutable once built
//! and is shared by reference across the whole process.

use std::collections::HashMap;

use caseflow_net::ScopeEntry;

/// A registered scope: full dotted path, description, tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDef {
    pub path: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// A node in the scope tree
///
/// Modules chain into each other; leaves are scopes. The full path of a
/// scope is the dot-joined module chain plus the scope name.
///
/// ```
/// use caseflow_engine::auth::{ScopeModule, ScopeRegistry};
///
/// let registry = ScopeRegistry::from_root(
///     ScopeModule::new("er")
///         .module(
///             ScopeModule::new("triage")
///                 .scope("claim", "Claim triage work items")
///                 .scope("review", "Review triage outcomes"),
///         )
///         .scope("admin", "ER administration"),
/// );
///
/// assert!(registry.contains("er.triage.claim"));
/// assert!(registry.contains("er.admin"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopeModule {
    name: String,
    scopes: Vec<(String, String, Vec<String>)>,
    children: Vec<ScopeModule>,
}

impl ScopeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scopes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Declare a leaf scope
    pub fn scope(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.scopes.push((name.into(), description.into(), vec![]));
        self
    }

    /// Declare a leaf scope with tags
    pub fn tagged_scope<I, S>(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        tags: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.push((
            name.into(),
            description.into(),
            tags.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Nest a child module
    pub fn module(mut self, child: ScopeModule) -> Self {
        self.children.push(child);
        self
    }

    fn collect(self, prefix: &str, out: &mut HashMap<String, ScopeDef>) {
        let base = if prefix.is_empty() {
            self.name
        } else {
            format!("{prefix}.{}", self.name)
        };

        for (name, description, tags) in self.scopes {
            let path = format!("{base}.{name}");
            out.insert(
                path.clone(),
                ScopeDef {
                    path,
                    description,
                    tags,
                },
            );
        }
        for child in self.children {
            child.collect(&base, out);
        }
    }
}

/// Frozen lookup over every registered scope
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    scopes: HashMap<String, ScopeDef>,
}

impl ScopeRegistry {
    /// Freeze a module tree into a registry
    pub fn from_root(root: ScopeModule) -> Self {
        let mut scopes = HashMap::new();
        root.collect("", &mut scopes);
        Self { scopes }
    }

    /// Build from the flat, colon-separated document form
    ///
    /// `er:triage:claim` registers as `er.triage.claim`.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ScopeEntry>) -> Self {
        let scopes = entries
            .into_iter()
            .map(|entry| {
                let path = entry.name.replace(':', ".");
                (
                    path.clone(),
                    ScopeDef {
                        path,
                        description: entry.description.clone(),
                        tags: vec![],
                    },
                )
            })
            .collect();
        Self { scopes }
    }

    pub fn resolve(&self, path: &str) -> Option<&ScopeDef> {
        self.scopes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.scopes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// All registered scopes, unordered
    pub fn iter(&self) -> impl Iterator<Item = &ScopeDef> {
        self.scopes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_modules_build_dotted_paths() {
        let registry = ScopeRegistry::from_root(
            ScopeModule::new("wf")
                .module(
                    ScopeModule::new("orders")
                        .scope("approve", "Approve orders")
                        .tagged_scope("audit", "Audit orders", ["read-only"]),
                )
                .scope("admin", "Administration"),
        );

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("wf.orders.approve"));
        assert!(registry.contains("wf.admin"));

        let audit = registry.resolve("wf.orders.audit").unwrap();
        assert_eq!(audit.tags, vec!["read-only".to_string()]);
    }

    #[test]
    fn test_from_flat_entries_converts_colons() {
        let entries = vec![
            ScopeEntry {
                name: "er:triage:claim".into(),
                description: "Claim triage items".into(),
            },
            ScopeEntry {
                name: "er:admin".into(),
                description: String::new(),
            },
        ];

        let registry = ScopeRegistry::from_entries(&entries);

        assert!(registry.contains("er.triage.claim"));
        assert!(registry.contains("er.admin"));
        assert!(!registry.contains("er:triage:claim"));
    }

    #[test]
    fn test_unknown_scope_resolves_to_none() {
        let registry = ScopeRegistry::default();
        assert!(registry.resolve("missing").is_none());
        assert!(registry.is_empty());
    }
}
