//! External objects
//!
//! Classes marked `<<External Object>>` live in another specification
//! repository. The resolver fetches that repository through a
//! [`SpecificationSource`], gathers every type reachable from the named class
//! and splices those definitions into the local set.

use git2::Repository;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::parser::parse_directory;
use super::{Definition, ExternalReference, SpecificationSet};
use crate::error::{ModelError, Result};

/// Anything that can produce the specification set of a repository
pub trait SpecificationSource {
    fn fetch(&self, url: &str, commit: Option<&str>) -> Result<SpecificationSet>;
}

// =============================================================================
// Git
// =============================================================================

/// Clones repositories with git2 into a scoped temporary directory
#[derive(Debug, Clone, Default)]
pub struct GitSource;

impl GitSource {
    pub fn new() -> Self {
        Self
    }
}

impl SpecificationSource for GitSource {
    fn fetch(&self, url: &str, commit: Option<&str>) -> Result<SpecificationSet> {
        let dir = tempfile::TempDir::new()?;
        info!(url, commit, "cloning specification repository");

        let fetch_error = |source| ModelError::Fetch {
            url: url.to_string(),
            source,
        };

        let repo = Repository::clone(url, dir.path()).map_err(fetch_error)?;
        if let Some(reference) = commit {
            checkout(&repo, reference).map_err(fetch_error)?;
        }

        load_checkout(dir.path())
    }
}

fn checkout(repo: &Repository, reference: &str) -> std::result::Result<(), git2::Error> {
    let object = repo.revparse_single(reference)?;
    repo.checkout_tree(&object, None)?;
    repo.set_head_detached(object.peel_to_commit()?.id())
}

/// Parse `specifications/` of a checkout, or its root when that is missing
pub fn load_checkout(root: &Path) -> Result<SpecificationSet> {
    let specifications = root.join("specifications");
    if specifications.is_dir() {
        parse_directory(specifications)
    } else {
        parse_directory(root)
    }
}

// =============================================================================
// Cache
// =============================================================================

type CacheKey = (String, Option<String>);

/// Bounded fetch cache with a time to live.
///
/// When full, the oldest insertion is evicted.
#[derive(Debug)]
pub struct SpecCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<IndexMap<CacheKey, (Instant, SpecificationSet)>>,
}

impl SpecCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn get(&self, url: &str, commit: Option<&str>) -> Option<SpecificationSet> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = (url.to_string(), commit.map(str::to_string));

        match entries.get(&key) {
            Some((inserted, set)) if inserted.elapsed() < self.ttl => Some(set.clone()),
            Some(_) => {
                entries.shift_remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, url: &str, commit: Option<&str>, set: SpecificationSet) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = (url.to_string(), commit.map(str::to_string));
        entries.shift_remove(&key);
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(key, (Instant::now(), set));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SpecCache {
    fn default() -> Self {
        Self::new(32, Duration::from_secs(600))
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Splices external objects into a specification set
pub struct ExternalResolver<'a, S: SpecificationSource> {
    source: &'a S,
    cache: Option<&'a SpecCache>,
}

impl<'a, S: SpecificationSource> ExternalResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source, cache: None }
    }

    pub fn with_cache(mut self, cache: &'a SpecCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace every external object with the definitions it pulls in
    pub fn resolve(&self, set: &mut SpecificationSet) -> Result<()> {
        self.resolve_inner(set, &mut Vec::new())
    }

    fn resolve_inner(&self, set: &mut SpecificationSet, visiting: &mut Vec<String>) -> Result<()> {
        let externals: Vec<ExternalReference> = set.externals().cloned().collect();

        for external in externals {
            if visiting.contains(&external.url) {
                return Err(ModelError::spec(format!(
                    "external object '{}' forms a cycle through {}",
                    external.name, external.url
                )));
            }

            let mut remote = self.fetch(&external)?;
            visiting.push(external.url.clone());
            self.resolve_inner(&mut remote, visiting)?;
            visiting.pop();

            let names = gather_types(&remote, &external.name)?;
            set.definitions.shift_remove(&external.name);

            for name in &names {
                if set.definitions.contains_key(name) {
                    warn!(name = %name, url = %external.url, "local definition shadows external one");
                    continue;
                }
                let Some(definition) = remote.definitions.get(name) else {
                    continue;
                };
                let definition = match definition.clone() {
                    Definition::Class(class) => Definition::Class(class.with_external(&external.url)),
                    other => other,
                };
                set.insert(definition)?;
            }

            for relation in &remote.relations {
                if names.contains(&relation.child) && !set.relations.contains(relation) {
                    set.relations.push(relation.clone());
                }
            }

            debug!(
                name = %external.name,
                spliced = names.len(),
                "resolved external object"
            );
        }

        Ok(())
    }

    fn fetch(&self, external: &ExternalReference) -> Result<SpecificationSet> {
        let commit = external.commit.as_deref();
        if let Some(set) = self.cache.and_then(|c| c.get(&external.url, commit)) {
            debug!(url = %external.url, "specification cache hit");
            return Ok(set);
        }

        let set = self.source.fetch(&external.url, commit)?;
        if let Some(cache) = self.cache {
            cache.insert(&external.url, commit, set.clone());
        }
        Ok(set)
    }
}

/// Every definition reachable from `name`: attribute types and parents, transitively
fn gather_types(set: &SpecificationSet, name: &str) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![name.to_string()];

    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let Some(definition) = set.definitions.get(&current) else {
            return Err(ModelError::UnknownClass { name: current });
        };
        order.push(current.clone());

        if let Definition::Class(class) = definition {
            for attribute in &class.attributes {
                stack.extend(attribute.named_types().map(str::to_string));
            }
            stack.extend(class.parent.iter().cloned());
        }
        stack.extend(
            set.relations
                .iter()
                .filter(|r| r.child == current)
                .map(|r| r.parent.clone()),
        );
    }

    Ok(order)
}
