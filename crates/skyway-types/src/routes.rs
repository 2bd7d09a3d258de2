//! Route sets

use serde::{Deserialize, Serialize};

/// Ordered set of routes. Insertion order is kept and duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct RouteSet(Vec<String>);

impl RouteSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a route; returns false when it was already present
    pub fn insert(&mut self, route: impl Into<String>) -> bool {
        let route = route.into();
        if self.contains(&route) {
            return false;
        }
        self.0.push(route);
        true
    }

    pub fn remove(&mut self, route: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|r| r != route);
        before != self.0.len()
    }

    pub fn contains(&self, route: &str) -> bool {
        self.0.iter().any(|r| r == route)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Routes of `self` that are absent from `other`
    pub fn difference(&self, other: &RouteSet) -> RouteSet {
        self.0
            .iter()
            .filter(|r| !other.contains(r))
            .cloned()
            .collect()
    }

    pub fn is_subset_of(&self, other: &RouteSet) -> bool {
        self.0.iter().all(|r| other.contains(r))
    }
}

impl From<Vec<String>> for RouteSet {
    fn from(routes: Vec<String>) -> Self {
        routes.into_iter().collect()
    }
}

impl From<RouteSet> for Vec<String> {
    fn from(set: RouteSet) -> Self {
        set.0
    }
}

impl<S: Into<String>> FromIterator<S> for RouteSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = RouteSet::new();
        for route in iter {
            set.insert(route);
        }
        set
    }
}

impl<'a> IntoIterator for &'a RouteSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
