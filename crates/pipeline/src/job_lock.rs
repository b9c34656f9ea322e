//! "At most one running job per kind", as a lock table with RAII release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use melon_core::job::JobKind;
use melon_core::types::JobId;

type Holders = HashMap<JobKind, JobId>;

#[derive(Clone, Default)]
pub struct KindLocks {
    holders: Arc<Mutex<Holders>>,
}

impl KindLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn holders(&self) -> MutexGuard<'_, Holders> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock for `kind` on behalf of `job_id`, or return the id of
    /// the job already holding it.
    pub fn try_acquire(&self, kind: JobKind, job_id: JobId) -> Result<KindGuard, JobId> {
        let mut holders = self.holders();
        if let Some(holder) = holders.get(&kind) {
            return Err(*holder);
        }
        holders.insert(kind, job_id);
        Ok(KindGuard {
            holders: Arc::clone(&self.holders),
            kind,
            job_id,
        })
    }

    pub fn holder(&self, kind: JobKind) -> Option<JobId> {
        self.holders().get(&kind).copied()
    }
}

/// Releases the kind lock when dropped, on every exit path.
pub struct KindGuard {
    holders: Arc<Mutex<Holders>>,
    kind: JobKind,
    job_id: JobId,
}

impl KindGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for KindGuard {
    fn drop(&mut self) {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        if holders.get(&self.kind) == Some(&self.job_id) {
            holders.remove(&self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn second_acquire_names_the_holder() {
        let locks = KindLocks::new();
        let first = Uuid::now_v7();
        let _guard = locks.try_acquire(JobKind::TrainDetector, first).unwrap();
        assert_eq!(
            locks.try_acquire(JobKind::TrainDetector, Uuid::now_v7()).err(),
            Some(first)
        );
        assert!(locks.try_acquire(JobKind::TrainClassifier, Uuid::now_v7()).is_ok());
    }

    #[test]
    fn dropping_the_guard_releases() {
        let locks = KindLocks::new();
        let guard = locks.try_acquire(JobKind::ExtractFeatures, Uuid::now_v7()).unwrap();
        assert_eq!(guard.kind(), JobKind::ExtractFeatures);
        drop(guard);
        assert!(locks.holder(JobKind::ExtractFeatures).is_none());
        assert!(locks.try_acquire(JobKind::ExtractFeatures, Uuid::now_v7()).is_ok());
    }

    #[test]
    fn released_on_panic() {
        let locks = KindLocks::new();
        let inner = locks.clone();
        let result = std::thread::spawn(move || {
            let _guard = inner.try_acquire(JobKind::TrainClassifier, Uuid::now_v7()).unwrap();
            panic!("operation blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(locks.holder(JobKind::TrainClassifier).is_none());
    }
}
