use crate::domain::entities::metajob::Metajob;
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::priority::PriorityThreshold;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobBufferError {
    #[error("no worker lane for priority threshold {0}")]
    UnknownPriority(PriorityThreshold),
}

#[derive(Debug, Clone, Default)]
struct Lane {
    /// Consumers currently blocked in `shift` on this lane.
    waiting: usize,
    /// Jobs handed to this lane by `push` but not yet picked up.
    handed: VecDeque<Metajob>,
}

impl Lane {
    fn unmet_demand(&self) -> usize {
        self.waiting.saturating_sub(self.handed.len())
    }
}

#[derive(Debug, Clone, Default)]
struct BufferState {
    /// Always ascending by sort key.
    array: Vec<Metajob>,
    /// Parallel to `JobBuffer::thresholds`.
    lanes: Vec<Lane>,
    stopping: bool,
}

impl BufferState {
    /// Merge `jobs` in, hand work to lanes with unmet demand, then trim.
    ///
    /// Returns the evicted jobs plus the lanes that received a job. Lanes are
    /// served least restrictive first, each time taking the globally most
    /// urgent job.
    fn insert(
        &mut self,
        thresholds: &[PriorityThreshold],
        maximum_size: usize,
        jobs: Vec<Metajob>,
    ) -> (Vec<Metajob>, Vec<usize>) {
        self.array.extend(jobs);
        self.array.sort();

        let mut served = Vec::new();
        for index in (0..thresholds.len()).rev() {
            while self.lanes[index].unmet_demand() > 0 {
                let Some(front) = self.array.first() else {
                    break;
                };
                if !front.priority_sufficient(thresholds[index]) {
                    break;
                }
                let job = self.array.remove(0);
                self.lanes[index].handed.push_back(job);
                served.push(index);
            }
        }

        let evicted = if self.array.len() > maximum_size {
            self.array.split_off(maximum_size)
        } else {
            Vec::new()
        };

        (evicted, served)
    }
}

/// Bounded, sorted hand-off point between the locker and its workers.
///
/// Every lane corresponds to one distinct worker priority threshold. One mutex
/// guards the whole state; each lane blocks on its own condition variable
/// under that mutex.
#[derive(Debug)]
pub struct JobBuffer {
    maximum_size: usize,
    /// Distinct thresholds, most restrictive first.
    thresholds: Vec<PriorityThreshold>,
    state: Mutex<BufferState>,
    conditions: Vec<Condvar>,
}

impl JobBuffer {
    pub fn new(maximum_size: usize, worker_priorities: &[PriorityThreshold]) -> Self {
        let mut thresholds = worker_priorities.to_vec();
        thresholds.sort();
        thresholds.dedup();

        let state = BufferState {
            array: Vec::with_capacity(maximum_size + 1),
            lanes: vec![Lane::default(); thresholds.len()],
            stopping: false,
        };
        let conditions = thresholds.iter().map(|_| Condvar::new()).collect();

        Self {
            maximum_size,
            thresholds,
            state: Mutex::new(state),
            conditions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lane_index(&self, threshold: PriorityThreshold) -> Result<usize, JobBufferError> {
        self.thresholds
            .binary_search(&threshold)
            .map_err(|_| JobBufferError::UnknownPriority(threshold))
    }

    pub fn maximum_size(&self) -> usize {
        self.maximum_size
    }

    /// Distinct lane thresholds, most restrictive first.
    pub fn thresholds(&self) -> &[PriorityThreshold] {
        &self.thresholds
    }

    /// Insert locked jobs. Returns what did not stay: the whole batch when the
    /// buffer is stopping, otherwise whatever was evicted past the maximum size.
    pub fn push(&self, jobs: Vec<Metajob>) -> Vec<Metajob> {
        if jobs.is_empty() {
            return jobs;
        }

        let mut state = self.lock();
        if state.stopping {
            return jobs;
        }

        let (evicted, served) = state.insert(&self.thresholds, self.maximum_size, jobs);
        drop(state);

        for index in served {
            self.conditions[index].notify_one();
        }
        evicted
    }

    /// Block until a job for `threshold` is available. `Ok(None)` once stopped.
    pub fn shift(&self, threshold: PriorityThreshold) -> Result<Option<Metajob>, JobBufferError> {
        let index = self.lane_index(threshold)?;
        let mut state = self.lock();

        loop {
            if state.stopping {
                return Ok(None);
            }
            if let Some(job) = state.lanes[index].handed.pop_front() {
                return Ok(Some(job));
            }
            if state
                .array
                .first()
                .is_some_and(|front| front.priority_sufficient(threshold))
            {
                return Ok(Some(state.array.remove(0)));
            }

            state.lanes[index].waiting += 1;
            state = self.conditions[index]
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.lanes[index].waiting -= 1;
        }
    }

    /// Which of `candidates` would survive a `push` of all of them right now.
    pub fn accept(&self, candidates: &[Metajob]) -> Vec<Metajob> {
        let mut simulated = self.lock().clone();
        if simulated.stopping {
            return Vec::new();
        }

        let (evicted, _) =
            simulated.insert(&self.thresholds, self.maximum_size, candidates.to_vec());
        let evicted: HashSet<JobId> = evicted.iter().map(|job| job.id).collect();

        let mut accepted: Vec<Metajob> = candidates
            .iter()
            .filter(|job| !evicted.contains(&job.id))
            .cloned()
            .collect();
        accepted.sort();
        accepted
    }

    /// Unmet demand per priority ceiling, used to size poll requests.
    ///
    /// Free space in the array counts toward the least restrictive lane.
    /// Ceilings without demand are left out.
    pub fn available_priorities(&self) -> BTreeMap<i16, usize> {
        let state = self.lock();
        let mut demand = BTreeMap::new();

        for (index, threshold) in self.thresholds.iter().enumerate() {
            let mut count = state.lanes[index].unmet_demand();
            if index + 1 == self.thresholds.len() {
                count += self.maximum_size.saturating_sub(state.array.len());
            }
            if count > 0 {
                *demand.entry(threshold.ceiling()).or_insert(0) += count;
            }
        }

        demand
    }

    /// Jobs sitting in the buffer, including ones handed to a lane but not yet
    /// picked up.
    pub fn size(&self) -> usize {
        let state = self.lock();
        state.array.len() + state.lanes.iter().map(|lane| lane.handed.len()).sum::<usize>()
    }

    /// Snapshot of the sorted array.
    pub fn to_vec(&self) -> Vec<Metajob> {
        self.lock().array.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Refuse further pushes and wake every blocked consumer with `None`.
    pub fn stop(&self) {
        self.lock().stopping = true;
        for condition in &self.conditions {
            condition.notify_all();
        }
    }

    /// Drain everything still buffered, including undelivered hand-offs.
    pub fn clear(&self) -> Vec<Metajob> {
        let mut state = self.lock();
        let mut drained: Vec<Metajob> = state.array.drain(..).collect();
        for lane in &mut state.lanes {
            drained.extend(lane.handed.drain(..));
        }
        drained.sort();
        drained
    }
}
