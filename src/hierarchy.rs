use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info};

pub const ROOT: &str = "<root>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    Root,
    Record(String),
}

impl Parent {
    pub fn as_str(&self) -> &str {
        match self {
            Parent::Root => ROOT,
            Parent::Record(id) => id,
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Parent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Making {parent} the parent of {id} would close a cycle")]
    Cycle { id: String, parent: String },
    #[error("No progress resolving {} deferred records: {}", pending.len(), pending.join(", "))]
    Stalled { pending: Vec<String> },
}

/// Case-insensitive page title → record id.
#[derive(Debug, Default)]
pub struct TitleIndex {
    ids: HashMap<String, String>,
}

impl TitleIndex {
    pub fn new<'a>(pages: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let ids = pages
            .into_iter()
            .map(|(id, title)| (title.to_lowercase(), id.to_string()))
            .collect();
        TitleIndex { ids }
    }

    pub fn lookup(&self, title: &str) -> Option<&str> {
        self.ids.get(&title.to_lowercase()).map(String::as_str)
    }
}

/// Record id → parent, in the order parents were assigned. Each id is
/// written once.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct Hierarchy {
    parents: IndexMap<String, Parent>,
}

impl Hierarchy {
    pub fn get(&self, id: &str) -> Option<&Parent> {
        self.parents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parent)> {
        self.parents.iter().map(|(id, p)| (id.as_str(), p))
    }

    /// Root is depth 0, a child one more than its parent. `None` while any
    /// ancestor is still unassigned.
    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut depth = 0;
        let mut current = id;
        loop {
            match self.get(current)? {
                Parent::Root => return Some(depth + 1),
                Parent::Record(parent) => {
                    depth += 1;
                    if depth > self.len() {
                        return None;
                    }
                    current = parent;
                }
            }
        }
    }

    fn insert(&mut self, id: String, parent: Parent) {
        self.parents.entry(id).or_insert(parent);
    }

    /// Whether following parent links up from `from` reaches `id`.
    fn reaches(&self, from: &str, id: &str) -> bool {
        let mut current = from;
        for _ in 0..=self.len() {
            if current == id {
                return true;
            }
            match self.get(current) {
                Some(Parent::Record(parent)) => current = parent,
                _ => return false,
            }
        }
        true
    }
}

/// A record with the page titles it claims to be part of.
#[derive(Debug, Clone)]
pub struct Candidates {
    pub id: String,
    pub titles: Vec<String>,
}

/// Assign every record a parent.
///
/// Titles that are not in `index` are ignored, as are pages that are not
/// among `records` and references to the record itself. No remaining
/// candidate means the root; one is assigned at once; several wait until
/// each candidate has a full chain to the root and the deepest wins, the
/// earliest listed on ties.
pub fn resolve(records: Vec<Candidates>, index: &TitleIndex) -> Result<Hierarchy, HierarchyError> {
    let mut hierarchy = Hierarchy::default();
    let ids: HashSet<String> = records.iter().map(|c| c.id.clone()).collect();
    let mut queue: VecDeque<(String, Vec<String>)> = records
        .into_iter()
        .map(|c| {
            let mut parents: Vec<String> = Vec::new();
            for title in &c.titles {
                let Some(parent) = index.lookup(title) else {
                    continue;
                };
                if !ids.contains(parent) {
                    debug!("{} links to {:?}, which has no record of its own", c.id, title);
                    continue;
                }
                if parent != c.id && !parents.iter().any(|p| p == parent) {
                    parents.push(parent.to_string());
                }
            }
            (c.id, parents)
        })
        .collect();
    let mut stalled = 0;

    while let Some((id, parents)) = queue.pop_front() {
        if hierarchy.contains(&id) {
            continue;
        }

        match parents.len() {
            0 => {
                debug!("{} is a root record", id);
                hierarchy.insert(id, Parent::Root);
            }
            1 => {
                let parent = &parents[0];
                if hierarchy.reaches(parent, &id) {
                    return Err(HierarchyError::Cycle {
                        id,
                        parent: parent.clone(),
                    });
                }
                debug!("{} is part of {}", id, parent);
                let parent = Parent::Record(parent.clone());
                hierarchy.insert(id, parent);
            }
            _ => {
                let depths: Option<Vec<usize>> =
                    parents.iter().map(|p| hierarchy.depth(p)).collect();
                let Some(depths) = depths else {
                    debug!("Not ready to place {}", id);
                    queue.push_back((id, parents));
                    stalled += 1;
                    if stalled >= queue.len() {
                        return Err(HierarchyError::Stalled {
                            pending: queue.into_iter().map(|(id, _)| id).collect(),
                        });
                    }
                    continue;
                };

                let mut deepest = 0;
                for (i, depth) in depths.iter().enumerate() {
                    if *depth > depths[deepest] {
                        deepest = i;
                    }
                }
                debug!("{} is part of {} (deepest of {})", id, parents[deepest], parents.len());
                let parent = Parent::Record(parents[deepest].clone());
                hierarchy.insert(id, parent);
            }
        }
        stalled = 0;
    }

    info!("Resolved parents for {} records", hierarchy.len());
    Ok(hierarchy)
}
