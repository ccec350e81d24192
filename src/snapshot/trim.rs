//! Version retention
//!
//! Old versions are removed according to per-repository retention rules:
//! `trim.keep-versions` keeps the newest N versions and `trim.keep-days`
//! keeps everything created within the window. A version is removed only
//! when every configured rule would drop it, and the most recent version is
//! never removed; the next snapshot needs it for coded-id reuse.

use crate::config::{TrimConfig, WorkingTree};
use crate::error::Result;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::VersionStore;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Result of one trim pass
#[derive(Debug, Default)]
pub struct TrimOutcome {
    /// Ids removed from the repository, oldest first
    pub removed: Vec<String>,
    /// Versions remaining afterwards
    pub kept: usize,
}

/// Ids that the retention rules would remove, oldest first
pub fn plan_trim(
    version_metas: &[crate::store::VersionMeta],
    trim: &TrimConfig,
    now: SystemTime,
) -> Vec<String> {
    if !trim.is_configured() || version_metas.is_empty() {
        return Vec::new();
    }

    let total = version_metas.len();
    let cutoff = trim
        .keep_days
        .map(|days| now - Duration::from_secs(days * 24 * 60 * 60));

    version_metas
        .iter()
        .enumerate()
        .filter(|&(idx, meta)| {
            // The head of the history is always retained
            if idx + 1 == total {
                return false;
            }
            let from_newest = total - 1 - idx;
            let dropped_by_count = trim.keep_versions.map(|n| from_newest as u64 >= n);
            let dropped_by_age = cutoff.map(|c| meta.created_at < c);
            // Every configured rule must agree on dropping it
            [dropped_by_count, dropped_by_age]
                .into_iter()
                .flatten()
                .all(|dropped| dropped)
        })
        .map(|(_, meta)| meta.id.clone())
        .collect()
}

/// Apply the retention rules to one archive
pub fn trim_versions(
    tree: &WorkingTree,
    archive_name: &str,
    versions: &dyn VersionStore,
    trim: &TrimConfig,
    progress: &dyn ProgressSink,
) -> Result<TrimOutcome> {
    let Some(meta) = versions.get_archive(archive_name)? else {
        return Ok(TrimOutcome::default());
    };

    let doomed = plan_trim(&meta.versions, trim, SystemTime::now());
    let mut removed = Vec::with_capacity(doomed.len());
    for id in doomed {
        if versions.remove_version(archive_name, &id)? {
            let _ = tree.remove_local_version(&id);
            progress.emit(ProgressEvent::VersionRemoved { id: id.clone() });
            debug!(id = %id, "trimmed version");
            removed.push(id);
        }
    }

    let kept = meta.versions.len() - removed.len();
    Ok(TrimOutcome { removed, kept })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VersionMeta;
    use std::time::UNIX_EPOCH;

    fn meta(id: &str, age_days: u64, now: SystemTime) -> VersionMeta {
        VersionMeta {
            id: id.to_string(),
            size: 10,
            created_at: now - Duration::from_secs(age_days * 24 * 60 * 60),
        }
    }

    fn history(now: SystemTime) -> Vec<VersionMeta> {
        // Oldest first: 40, 20, 10, and 1 day old
        vec![
            meta("20220101-00000-aaaaa", 40, now),
            meta("20220121-00000-bbbbb", 20, now),
            meta("20220131-00000-ccccc", 10, now),
            meta("20220209-00000-ddddd", 1, now),
        ]
    }

    #[test]
    fn test_no_rules_keeps_everything() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert!(plan_trim(&history(now), &TrimConfig::default(), now).is_empty());
    }

    #[test]
    fn test_keep_versions() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let trim = TrimConfig {
            keep_versions: Some(2),
            keep_days: None,
        };
        assert_eq!(
            plan_trim(&history(now), &trim, now),
            vec!["20220101-00000-aaaaa", "20220121-00000-bbbbb"]
        );
    }

    #[test]
    fn test_keep_days() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let trim = TrimConfig {
            keep_versions: None,
            keep_days: Some(15),
        };
        assert_eq!(
            plan_trim(&history(now), &trim, now),
            vec!["20220101-00000-aaaaa", "20220121-00000-bbbbb"]
        );
    }

    #[test]
    fn test_both_rules_must_agree() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        // keep-days alone would drop the two oldest, but keep-versions
        // retains the newest three
        let trim = TrimConfig {
            keep_versions: Some(3),
            keep_days: Some(15),
        };
        assert_eq!(
            plan_trim(&history(now), &trim, now),
            vec!["20220101-00000-aaaaa"]
        );
    }

    #[test]
    fn test_newest_never_removed() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let trim = TrimConfig {
            keep_versions: Some(0),
            keep_days: Some(0),
        };
        let doomed = plan_trim(&history(now), &trim, now);
        assert_eq!(doomed.len(), 3);
        assert!(!doomed.contains(&"20220209-00000-ddddd".to_string()));
    }
}
