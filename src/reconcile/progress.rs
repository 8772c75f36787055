use serde::Serialize;
use ts_rs::TS;

/// Completion percentage of a project, rounded half away from zero.
///
/// A project without milestones is at 0.
pub fn compute_progress(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    let completed = completed.clamp(0, total);
    ((completed as f64 / total as f64) * 100.0).round() as i64
}

/// Absolute difference between the cached and recounted progress, rounded up
/// so a fractional cache never reads as in sync. A missing cached value
/// counts as 0.
pub fn drift_delta(current: Option<f64>, computed: i64) -> i64 {
    (computed as f64 - current.unwrap_or(0.0)).abs().ceil() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CompletionBucket {
    NotStarted,
    InProgress,
    Completed,
}

impl CompletionBucket {
    pub fn of(progress: i64) -> Self {
        if progress <= 0 {
            CompletionBucket::NotStarted
        } else if progress >= 100 {
            CompletionBucket::Completed
        } else {
            CompletionBucket::InProgress
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CompletionBuckets {
    pub not_started: u32,
    pub in_progress: u32,
    pub completed: u32,
}

impl CompletionBuckets {
    pub fn record(&mut self, progress: i64) {
        match CompletionBucket::of(progress) {
            CompletionBucket::NotStarted => self.not_started += 1,
            CompletionBucket::InProgress => self.in_progress += 1,
            CompletionBucket::Completed => self.completed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rounds_to_nearest_percent() {
        assert_eq!(compute_progress(2, 3), 67);
        assert_eq!(compute_progress(1, 3), 33);
        assert_eq!(compute_progress(1, 8), 13);
        assert_eq!(compute_progress(0, 4), 0);
        assert_eq!(compute_progress(4, 4), 100);
    }

    #[test]
    fn no_milestones_means_zero() {
        assert_eq!(compute_progress(0, 0), 0);
    }

    #[test]
    fn missing_cache_drifts_from_zero() {
        assert_eq!(drift_delta(None, 40), 40);
        assert_eq!(drift_delta(Some(70.0), 40), 30);
        assert_eq!(drift_delta(Some(40.0), 40), 0);
    }

    #[test]
    fn fractional_cache_is_drift() {
        assert_eq!(drift_delta(Some(66.7), 67), 1);
        assert_eq!(drift_delta(Some(12.5), 10), 3);
    }

    #[test]
    fn buckets_split_on_the_edges() {
        let mut buckets = CompletionBuckets::default();
        for progress in [0, 1, 99, 100] {
            buckets.record(progress);
        }
        assert_eq!(
            buckets,
            CompletionBuckets {
                not_started: 1,
                in_progress: 2,
                completed: 1
            }
        );
    }

    proptest! {
        #[test]
        fn progress_stays_in_range(total in 0i64..500, completed in 0i64..500) {
            let progress = compute_progress(completed.min(total), total);
            prop_assert!((0..=100).contains(&progress));
        }

        #[test]
        fn full_and_empty_are_exact(total in 1i64..500) {
            prop_assert_eq!(compute_progress(total, total), 100);
            prop_assert_eq!(compute_progress(0, total), 0);
        }

        #[test]
        fn progress_never_decreases_with_more_completed(total in 1i64..200, completed in 0i64..199) {
            let completed = completed.min(total - 1);
            prop_assert!(compute_progress(completed, total) <= compute_progress(completed + 1, total));
        }
    }
}
