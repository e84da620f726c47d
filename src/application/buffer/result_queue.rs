use crate::domain::value_objects::ids::JobId;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Ids of jobs workers are done with, waiting for the locker to unlock them.
#[derive(Debug, Default)]
pub struct ResultQueue {
    ids: Mutex<Vec<JobId>>,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JobId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, id: JobId) {
        self.lock().push(id);
    }

    /// Take every queued id in arrival order.
    pub fn drain(&self) -> Vec<JobId> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ResultQueue;
    use crate::domain::value_objects::ids::JobId;
    use std::sync::Arc;

    #[test]
    fn given_pushed_ids_when_drained_should_return_them_once_in_order() {
        let queue = ResultQueue::new();
        queue.push(JobId(2));
        queue.push(JobId(1));

        assert_eq!(queue.drain(), vec![JobId(2), JobId(1)]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn given_concurrent_pushers_when_drained_should_collect_every_id() {
        let queue = Arc::new(ResultQueue::new());
        let pushers: Vec<_> = (0..4)
            .map(|worker| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        queue.push(JobId(worker * 100 + n));
                    }
                })
            })
            .collect();
        for pusher in pushers {
            pusher.join().unwrap();
        }

        let mut drained = queue.drain();
        drained.sort();

        assert_eq!(drained.len(), 100);
        drained.dedup();
        assert_eq!(drained.len(), 100);
    }
}
