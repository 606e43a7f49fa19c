//! The fullsync lease state machine.
//!
//! A fullsync replaces a dataset's contents over several requests: the hub
//! tracks which entities the sync touched and, on the end signal, deletes
//! everything it didn't see. At most one lease is active per dataset.
//!
//! Leases are not persisted: a restart abandons all leases, which is the
//! same outcome as an idle timeout.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    time::{
        Duration,
        Instant,
    },
};

use common::InternalId;
use errors::ErrorMetadata;
use parking_lot::Mutex;

/// The fullsync signals carried by one ingest request's headers.
#[derive(Clone, Debug, Default)]
pub struct FullSyncDirectives {
    pub start: bool,
    pub sync_id: Option<String>,
    pub end: bool,
}

impl FullSyncDirectives {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_plain(&self) -> bool {
        !self.start && !self.end && self.sync_id.is_none()
    }
}

/// What an admitted request must do besides appending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// No fullsync in play; just append.
    Plain,
    /// Part of the named sync: record the batch's ids as seen, and when
    /// `deletion_detection` is set, run deletion detection and close the
    /// lease afterwards.
    Sync {
        sync_id: String,
        deletion_detection: bool,
    },
}

struct Lease {
    sync_id: String,
    started_at: Instant,
    last_activity: Instant,
    /// Set once the lease's idle gap ever exceeded the timeout. A same-id
    /// append is still admitted afterwards, but the end signal requires an
    /// uninterrupted lease window and returns 410.
    expired: bool,
    seen: HashSet<InternalId>,
}

pub struct FullSyncTracker {
    timeout: Duration,
    leases: Mutex<HashMap<String, Lease>>,
}

impl FullSyncTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Decides whether a request may proceed and under which sync, applying
    /// lazy timeout inspection to the dataset's lease.
    pub fn admit(
        &self,
        dataset: &str,
        directives: &FullSyncDirectives,
    ) -> anyhow::Result<Admission> {
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get_mut(dataset) {
            if lease.last_activity.elapsed() > self.timeout {
                lease.expired = true;
            }
        }

        if directives.is_plain() {
            let lease_state = leases
                .get(dataset)
                .map(|lease| (lease.expired, lease.sync_id.clone()));
            return match lease_state {
                Some((false, active)) => Err(sync_in_progress(&active).into()),
                Some((true, _)) => {
                    // Timed-out lease observed by unrelated traffic: abandon.
                    leases.remove(dataset);
                    Ok(Admission::Plain)
                },
                None => Ok(Admission::Plain),
            };
        }

        let Some(sync_id) = directives.sync_id.clone() else {
            anyhow::bail!(ErrorMetadata::bad_request(
                "MissingFullSyncId",
                "fullsync start/end signals require a universal-data-api-full-sync-id header",
            ));
        };

        if directives.start {
            // A new start takes over unconditionally; a previous lease is
            // abandoned without deletion detection.
            let now = Instant::now();
            leases.insert(
                dataset.to_string(),
                Lease {
                    sync_id: sync_id.clone(),
                    started_at: now,
                    last_activity: now,
                    expired: false,
                    seen: HashSet::new(),
                },
            );
            tracing::info!("Opened fullsync lease {sync_id} on {dataset}");
            return Ok(Admission::Sync {
                sync_id,
                deletion_detection: directives.end,
            });
        }

        let lease_state = leases
            .get(dataset)
            .map(|lease| (lease.sync_id == sync_id, lease.expired));
        match lease_state {
            None => Err(lease_gone(&sync_id).into()),
            Some((false, expired)) => {
                if expired {
                    leases.remove(dataset);
                    Err(lease_gone(&sync_id).into())
                } else {
                    let active = leases
                        .get(dataset)
                        .map(|lease| lease.sync_id.clone())
                        .unwrap_or_default();
                    Err(sync_in_progress(&active).into())
                }
            },
            Some((true, true)) => {
                if directives.end {
                    if let Some(lease) = leases.remove(dataset) {
                        tracing::warn!(
                            "Rejecting end of fullsync {sync_id} on {dataset}: lease idled out \
                             after {:?}",
                            lease.started_at.elapsed()
                        );
                    }
                    return Err(lease_gone(&sync_id).into());
                }
                // Best-effort continuation: admit and re-arm, but the
                // expired flag sticks so the end signal still fails.
                if let Some(lease) = leases.get_mut(dataset) {
                    lease.last_activity = Instant::now();
                }
                Ok(Admission::Sync {
                    sync_id,
                    deletion_detection: false,
                })
            },
            Some((true, false)) => {
                if let Some(lease) = leases.get_mut(dataset) {
                    lease.last_activity = Instant::now();
                }
                Ok(Admission::Sync {
                    sync_id,
                    deletion_detection: directives.end,
                })
            },
        }
    }

    /// Merges a batch's internal ids into the lease's seen set. A lease that
    /// was closed or replaced concurrently is left alone.
    pub fn record_seen(
        &self,
        dataset: &str,
        sync_id: &str,
        ids: impl IntoIterator<Item = InternalId>,
    ) {
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get_mut(dataset) {
            if lease.sync_id == sync_id {
                lease.seen.extend(ids);
            }
        }
    }

    /// The union of everything seen under the lease so far.
    pub fn seen(&self, dataset: &str, sync_id: &str) -> HashSet<InternalId> {
        let leases = self.leases.lock();
        match leases.get(dataset) {
            Some(lease) if lease.sync_id == sync_id => lease.seen.clone(),
            _ => HashSet::new(),
        }
    }

    /// Closes the lease after a successful end-signal commit.
    pub fn finish(&self, dataset: &str, sync_id: &str) {
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(dataset) {
            if lease.sync_id == sync_id {
                let held = lease.started_at.elapsed();
                leases.remove(dataset);
                tracing::info!("Closed fullsync lease {sync_id} on {dataset} after {held:?}");
            }
        }
    }

    /// Drops any lease for a dataset (used when the dataset is deleted).
    pub fn forget(&self, dataset: &str) {
        self.leases.lock().remove(dataset);
    }
}

fn sync_in_progress(active: &str) -> ErrorMetadata {
    ErrorMetadata::conflict(
        "FullSyncInProgress",
        format!("another fullsync ({active}) holds the lease for this dataset"),
    )
}

fn lease_gone(sync_id: &str) -> ErrorMetadata {
    ErrorMetadata::gone(
        "FullSyncLeaseGone",
        format!("fullsync {sync_id} has no active lease; it expired or was never started"),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use errors::ErrorMetadataAnyhowExt;

    use super::*;

    fn directives(start: bool, id: Option<&str>, end: bool) -> FullSyncDirectives {
        FullSyncDirectives {
            start,
            sync_id: id.map(String::from),
            end,
        }
    }

    #[test]
    fn plain_appends_pass_when_idle() {
        let tracker = FullSyncTracker::new(Duration::from_secs(1));
        assert_eq!(
            tracker.admit("ds", &FullSyncDirectives::none()).unwrap(),
            Admission::Plain
        );
    }

    #[test]
    fn active_lease_rejects_foreign_traffic() {
        let tracker = FullSyncTracker::new(Duration::from_secs(1));
        tracker.admit("ds", &directives(true, Some("43"), false)).unwrap();
        let err = tracker
            .admit("ds", &directives(false, Some("44"), false))
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
        let err = tracker.admit("ds", &FullSyncDirectives::none()).unwrap_err();
        assert_eq!(err.http_status(), 409);
        // Same id keeps flowing and the end closes the lease.
        let admission = tracker
            .admit("ds", &directives(false, Some("43"), true))
            .unwrap();
        assert_eq!(
            admission,
            Admission::Sync {
                sync_id: "43".to_string(),
                deletion_detection: true,
            }
        );
        tracker.finish("ds", "43");
        assert_eq!(
            tracker.admit("ds", &FullSyncDirectives::none()).unwrap(),
            Admission::Plain
        );
    }

    #[test]
    fn unknown_sync_id_is_gone() {
        let tracker = FullSyncTracker::new(Duration::from_secs(1));
        let err = tracker
            .admit("ds", &directives(false, Some("47"), false))
            .unwrap_err();
        assert_eq!(err.http_status(), 410);
    }

    #[test]
    fn new_start_abandons_previous_lease() {
        let tracker = FullSyncTracker::new(Duration::from_secs(1));
        tracker.admit("ds", &directives(true, Some("45"), false)).unwrap();
        tracker.record_seen("ds", "45", [1]);
        tracker.admit("ds", &directives(true, Some("46"), false)).unwrap();
        let err = tracker
            .admit("ds", &directives(false, Some("45"), false))
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
        // The replacement lease starts with a fresh seen set.
        assert!(tracker.seen("ds", "46").is_empty());
    }

    #[test]
    fn timed_out_lease_admits_appends_but_fails_the_end_signal() {
        let tracker = FullSyncTracker::new(Duration::from_millis(20));
        tracker.admit("ds", &directives(true, Some("47"), false)).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let admission = tracker
            .admit("ds", &directives(false, Some("47"), false))
            .unwrap();
        assert_eq!(
            admission,
            Admission::Sync {
                sync_id: "47".to_string(),
                deletion_detection: false,
            }
        );
        // The re-arm does not heal the window: end still fails.
        let err = tracker
            .admit("ds", &directives(false, Some("47"), true))
            .unwrap_err();
        assert_eq!(err.http_status(), 410);
        // The failed end dropped the lease entirely.
        let err = tracker
            .admit("ds", &directives(false, Some("47"), false))
            .unwrap_err();
        assert_eq!(err.http_status(), 410);
    }

    #[test]
    fn seen_sets_merge_across_requests() {
        let tracker = FullSyncTracker::new(Duration::from_secs(1));
        tracker.admit("ds", &directives(true, Some("43"), false)).unwrap();
        tracker.record_seen("ds", "43", [1, 2]);
        tracker.record_seen("ds", "43", [2, 3]);
        tracker.record_seen("ds", "44", [9]);
        let seen = tracker.seen("ds", "43");
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains(&9));
    }
}
