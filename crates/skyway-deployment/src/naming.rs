//! Naming & versioning resolver
//!
//! Releases of one prefix are named `<prefix>__<rev>`, plus the bare
//! `<prefix>`, `<prefix>__INACTIVE` and the transient `<prefix>__interim`
//! used during rename sequences. The resolver computes revisions and
//! identifies the ACTIVE and INACTIVE releases from the platform listing.

use crate::error::{DeploymentError, Result};
use skyway_platform::TargetPlatform;
use skyway_types::{ReleaseInfo, ReleaseRole, ReleaseSummary, StatusMarker};
use tracing::{debug, instrument, warn};

/// Separator between a prefix and its suffix
pub const DELIMITER: &str = "__";
/// Suffix of the standby release under production naming
pub const INACTIVE_SUFFIX: &str = "INACTIVE";
/// Suffix held by a release only while a rename sequence runs
pub const INTERIM_SUFFIX: &str = "interim";

/// `<prefix>__<revision>`
pub fn versioned_name(prefix: &str, revision: u32) -> String {
    format!("{}{}{}", prefix, DELIMITER, revision)
}

/// `<prefix>__INACTIVE`
pub fn inactive_name(prefix: &str) -> String {
    format!("{}{}{}", prefix, DELIMITER, INACTIVE_SUFFIX)
}

/// Temporary name that frees the bare prefix during a production rename.
///
/// A release left with this name is a leftover of an interrupted swap and is
/// ignored when resolving roles.
pub fn interim_name(prefix: &str) -> String {
    format!("{}{}{}", prefix, DELIMITER, INTERIM_SUFFIX)
}

/// Part of `name` after `<prefix>__`, matching the prefix case-insensitively
fn suffix_of<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let head_len = prefix.len() + DELIMITER.len();
    if name.len() <= head_len || !name.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = name.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) && rest.starts_with(DELIMITER) {
        Some(&rest[DELIMITER.len()..])
    } else {
        None
    }
}

/// Revision parsed from a `<prefix>__<n>` name
pub fn revision_of(name: &str, prefix: &str) -> Option<u32> {
    suffix_of(name, prefix).and_then(|suffix| suffix.parse::<u32>().ok())
}

/// True for `<prefix>__interim`, in any case
pub fn is_interim(name: &str, prefix: &str) -> bool {
    suffix_of(name, prefix)
        .map(|suffix| suffix.eq_ignore_ascii_case(INTERIM_SUFFIX))
        .unwrap_or(false)
}

/// True for `<prefix>__INACTIVE`, in any case
pub fn has_inactive_suffix(name: &str, prefix: &str) -> bool {
    suffix_of(name, prefix)
        .map(|suffix| suffix.eq_ignore_ascii_case(INACTIVE_SUFFIX))
        .unwrap_or(false)
}

/// 1 + highest parsed revision, or 0 when no release carries one
pub fn next_revision(releases: &[ReleaseSummary], prefix: &str) -> u32 {
    releases
        .iter()
        .filter_map(|r| revision_of(&r.name, prefix))
        .max()
        .map(|max| max.saturating_add(1))
        .unwrap_or(0)
}

/// Newest non-interim release with running instances, else the newest non-interim one.
///
/// `releases` is ordered oldest first.
pub fn find_active<'a>(releases: &'a [ReleaseSummary], prefix: &str) -> Option<&'a ReleaseSummary> {
    let candidates = || releases.iter().rev().filter(|r| !is_interim(&r.name, prefix));
    candidates()
        .find(|r| r.running_instances > 0)
        .or_else(|| candidates().next())
}

/// Releases of a prefix with their resolved roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTopology {
    pub prefix: String,
    /// Oldest first
    pub releases: Vec<ReleaseSummary>,
    pub active: Option<ReleaseSummary>,
    pub inactive: Option<ReleaseSummary>,
}

impl ReleaseTopology {
    pub fn role_of(&self, release: &ReleaseSummary) -> ReleaseRole {
        if is_interim(&release.name, &self.prefix) {
            ReleaseRole::Interim
        } else if self.active.as_ref().map(|a| a.guid == release.guid) == Some(true) {
            ReleaseRole::Active
        } else if self.inactive.as_ref().map(|i| i.guid == release.guid) == Some(true) {
            ReleaseRole::Inactive
        } else {
            ReleaseRole::UnversionedOld
        }
    }

    pub fn next_revision(&self) -> u32 {
        next_revision(&self.releases, &self.prefix)
    }

    pub fn total_running_instances(&self) -> u32 {
        self.releases.iter().map(|r| r.running_instances).sum()
    }

    pub fn active_info(&self) -> Option<ReleaseInfo> {
        self.active.as_ref().map(ReleaseInfo::from_summary)
    }

    pub fn inactive_info(&self) -> Option<ReleaseInfo> {
        self.inactive.as_ref().map(ReleaseInfo::from_summary)
    }
}

/// Resolves active and inactive releases against the live platform
pub struct NamingResolver<'a> {
    platform: &'a dyn TargetPlatform,
}

impl<'a> NamingResolver<'a> {
    pub fn new(platform: &'a dyn TargetPlatform) -> Self {
        Self { platform }
    }

    /// List the prefix's releases and identify their roles
    #[instrument(skip(self))]
    pub async fn resolve(&self, prefix: &str, blue_green: bool) -> Result<ReleaseTopology> {
        let releases = self.platform.list_releases(prefix).await?;
        let active = find_active(&releases, prefix).cloned();
        let inactive = if blue_green {
            self.find_inactive(&releases, active.as_ref(), prefix).await?
        } else {
            None
        };

        debug!(
            prefix = %prefix,
            releases = releases.len(),
            active = ?active.as_ref().map(|a| &a.name),
            inactive = ?inactive.as_ref().map(|i| &i.name),
            "Resolved release topology"
        );

        Ok(ReleaseTopology {
            prefix: prefix.to_string(),
            releases,
            active,
            inactive,
        })
    }

    /// INACTIVE release among those older than the active one.
    ///
    /// The env marker is authoritative; more than one marked release is a
    /// corrupted platform state. Without any marker the name suffix decides.
    pub async fn find_inactive(
        &self,
        releases: &[ReleaseSummary],
        active: Option<&ReleaseSummary>,
        prefix: &str,
    ) -> Result<Option<ReleaseSummary>> {
        let end = active
            .and_then(|a| releases.iter().position(|r| r.guid == a.guid))
            .unwrap_or(releases.len());
        let candidates: Vec<&ReleaseSummary> = releases[..end]
            .iter()
            .filter(|r| !is_interim(&r.name, prefix))
            .collect();

        let mut marked = Vec::new();
        for candidate in &candidates {
            if self.platform.status_marker(&candidate.guid).await? == Some(StatusMarker::Inactive) {
                marked.push(*candidate);
            }
        }

        match marked.len() {
            0 => Ok(candidates
                .iter()
                .rev()
                .find(|r| has_inactive_suffix(&r.name, prefix))
                .map(|r| (*r).clone())),
            1 => Ok(Some(marked[0].clone())),
            _ => {
                let names: Vec<String> = marked.iter().map(|r| r.name.clone()).collect();
                warn!(prefix = %prefix, candidates = ?names, "Multiple releases marked INACTIVE");
                Err(DeploymentError::InvalidPlatformState {
                    message: format!(
                        "more than one release of {} is marked {}",
                        prefix, INACTIVE_SUFFIX
                    ),
                    candidates: names,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyway_platform::InMemoryPlatform;
    use skyway_types::AppGuid;

    fn summary(name: &str, running: u32) -> ReleaseSummary {
        ReleaseSummary {
            guid: AppGuid::new(name),
            name: name.to_string(),
            running_instances: running,
            desired_instances: running,
            routes: Vec::new(),
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(versioned_name("PaymentService", 14), "PaymentService__14");
        assert_eq!(inactive_name("PaymentService"), "PaymentService__INACTIVE");
        assert_eq!(interim_name("PaymentService"), "PaymentService__interim");
    }

    #[test]
    fn test_revision_parsing_ignores_non_numeric_suffixes() {
        assert_eq!(revision_of("app__7", "app"), Some(7));
        assert_eq!(revision_of("APP__7", "app"), Some(7));
        assert_eq!(revision_of("app", "app"), None);
        assert_eq!(revision_of("app__INACTIVE", "app"), None);
        assert_eq!(revision_of("app__interim", "app"), None);
        assert_eq!(revision_of("application__3", "app"), None);
        assert!(is_interim("app__INTERIM", "app"));
        assert!(has_inactive_suffix("app__inactive", "app"));
    }

    #[test]
    fn test_next_revision() {
        assert_eq!(next_revision(&[], "app"), 0);
        let releases = vec![
            summary("app__INACTIVE", 1),
            summary("app__3", 0),
            summary("app", 2),
            summary("app__11", 0),
        ];
        assert_eq!(next_revision(&releases, "app"), 12);
        assert_eq!(next_revision(&[summary("app", 1)], "app"), 0);
    }

    #[test]
    fn test_active_prefers_newest_running() {
        let releases = vec![summary("app__3", 10), summary("app__4", 0), summary("app__5", 0)];
        assert_eq!(find_active(&releases, "app").unwrap().name, "app__3");

        let releases = vec![summary("app__1", 2), summary("app__2", 3)];
        assert_eq!(find_active(&releases, "app").unwrap().name, "app__2");
    }

    #[test]
    fn test_active_falls_back_to_most_recent() {
        let releases = vec![summary("app__1", 0), summary("app__2", 0), summary("app__interim", 0)];
        assert_eq!(find_active(&releases, "app").unwrap().name, "app__2");
        assert!(find_active(&[], "app").is_none());
    }

    #[test]
    fn test_interim_never_active() {
        let releases = vec![summary("app__1", 0), summary("app__interim", 3)];
        assert_eq!(find_active(&releases, "app").unwrap().name, "app__1");
    }

    #[tokio::test]
    async fn test_inactive_from_env_marker() {
        let platform = InMemoryPlatform::new();
        platform.seed_release("app__1", 0, &[]);
        let inactive = platform.seed_release("app__2", 1, &[]);
        platform.seed_release("app__3", 2, &["app.example.com"]);
        platform.seed_marker(&inactive, StatusMarker::Inactive);

        let topology = NamingResolver::new(&platform).resolve("app", true).await.unwrap();
        assert_eq!(topology.active.as_ref().unwrap().name, "app__3");
        assert_eq!(topology.inactive.as_ref().unwrap().guid, inactive);
        assert_eq!(topology.next_revision(), 4);
    }

    #[tokio::test]
    async fn test_two_marked_releases_is_corruption() {
        let platform = InMemoryPlatform::new();
        let first = platform.seed_release("app__1", 1, &[]);
        let second = platform.seed_release("app__2", 1, &[]);
        platform.seed_release("app__3", 2, &[]);
        platform.seed_marker(&first, StatusMarker::Inactive);
        platform.seed_marker(&second, StatusMarker::Inactive);

        let err = NamingResolver::new(&platform)
            .resolve("app", true)
            .await
            .unwrap_err();
        match err {
            DeploymentError::InvalidPlatformState { candidates, .. } => {
                assert_eq!(candidates, vec!["app__1".to_string(), "app__2".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_inactive_name_fallback_and_marker_after_active_ignored() {
        let platform = InMemoryPlatform::new();
        platform.seed_release("app__1", 0, &[]);
        platform.seed_release("app__INACTIVE", 0, &[]);
        platform.seed_release("app", 4, &[]);
        let after = platform.seed_release("app__5", 0, &[]);
        platform.seed_marker(&after, StatusMarker::Inactive);

        let topology = NamingResolver::new(&platform).resolve("app", true).await.unwrap();
        assert_eq!(topology.active.as_ref().unwrap().name, "app");
        assert_eq!(topology.inactive.as_ref().unwrap().name, "app__INACTIVE");
    }

    #[tokio::test]
    async fn test_basic_resolution_skips_inactive_detection() {
        let platform = InMemoryPlatform::new();
        platform.seed_release("app__INACTIVE", 1, &[]);
        platform.seed_release("app", 1, &[]);
        let topology = NamingResolver::new(&platform).resolve("app", false).await.unwrap();
        assert!(topology.inactive.is_none());
        assert_eq!(topology.total_running_instances(), 2);
        let roles: Vec<ReleaseRole> = topology.releases.iter().map(|r| topology.role_of(r)).collect();
        assert_eq!(roles, vec![ReleaseRole::UnversionedOld, ReleaseRole::Active]);
    }
}
