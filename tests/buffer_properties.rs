use forge_lock::application::buffer::job_buffer::JobBuffer;
use forge_lock::domain::entities::metajob::Metajob;
use forge_lock::domain::value_objects::ids::JobId;
use forge_lock::domain::value_objects::priority::PriorityThreshold;
use forge_lock::domain::value_objects::timestamps::Timestamp;
use proptest::prelude::*;
use std::collections::BTreeSet;
use time::Duration;

const THRESHOLDS: [PriorityThreshold; 4] = [
    PriorityThreshold::AtMost(10),
    PriorityThreshold::AtMost(30),
    PriorityThreshold::AtMost(50),
    PriorityThreshold::Any,
];

fn metajobs(first_id: i64, keys: &[(i16, i64)]) -> Vec<Metajob> {
    let base = Timestamp::now_utc();
    keys.iter()
        .enumerate()
        .map(|(offset, (priority, seconds))| {
            Metajob::new(
                *priority,
                base.offset_by(Duration::seconds(*seconds)),
                JobId(first_id + offset as i64),
                "default",
            )
        })
        .collect()
}

fn ids(jobs: &[Metajob]) -> BTreeSet<i64> {
    jobs.iter().map(|job| job.id.0).collect()
}

fn keys() -> impl Strategy<Value = Vec<(i16, i64)>> {
    prop::collection::vec((-20_i16..80, -30_i64..30), 0..20)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn pushed_jobs_stay_sorted_and_bounded(
        maximum_size in 0_usize..12,
        first in keys(),
        second in keys(),
    ) {
        let buffer = JobBuffer::new(maximum_size, &THRESHOLDS);
        let first = metajobs(1, &first);
        let second = metajobs(1_000, &second);
        let pushed: BTreeSet<i64> = ids(&first).union(&ids(&second)).copied().collect();

        let mut evicted = buffer.push(first);
        evicted.extend(buffer.push(second));
        let kept = buffer.to_vec();

        prop_assert!(kept.windows(2).all(|pair| pair[0] <= pair[1]));
        prop_assert!(kept.len() <= maximum_size);
        prop_assert!(ids(&kept).is_disjoint(&ids(&evicted)));
        let accounted: BTreeSet<i64> = ids(&kept).union(&ids(&evicted)).copied().collect();
        prop_assert_eq!(accounted, pushed);
        prop_assert!(evicted.iter().all(|out| kept.iter().all(|stayed| stayed < out)));
    }

    #[test]
    fn pushing_accepted_subset_matches_pushing_whole_batch(
        maximum_size in 0_usize..12,
        residents in keys(),
        batch in keys(),
    ) {
        let pruned = JobBuffer::new(maximum_size, &THRESHOLDS);
        let full = JobBuffer::new(maximum_size, &THRESHOLDS);
        pruned.push(metajobs(1, &residents));
        full.push(metajobs(1, &residents));
        let mut batch = metajobs(1_000, &batch);
        batch.sort();

        let accepted = pruned.accept(&batch);
        pruned.push(accepted);
        full.push(batch);

        prop_assert_eq!(ids(&pruned.to_vec()), ids(&full.to_vec()));
    }

    #[test]
    fn shift_never_hands_out_a_job_beyond_its_threshold(
        jobs in keys(),
        lane in 0_usize..4,
    ) {
        let buffer = JobBuffer::new(32, &THRESHOLDS);
        buffer.push(metajobs(1, &jobs));
        let threshold = THRESHOLDS[lane];

        let front_fits = buffer
            .to_vec()
            .first()
            .is_some_and(|job| job.priority_sufficient(threshold));
        if front_fits {
            let shifted = buffer.shift(threshold).unwrap().unwrap();
            prop_assert!(threshold.accepts(shifted.priority));
        } else {
            buffer.stop();
            prop_assert!(buffer.shift(threshold).unwrap().is_none());
        }
    }
}
