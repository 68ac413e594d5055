#[cfg(test)]
mod tests {
    use channel_core::channel::{Assignment, DispatchContext, DispatchPlan};
    use channel_core::constants::{BLOCK_PREFIX_LEN, BLOCK_SIZE, MAX_WORKERS, SEGMENT_HEADER_LEN};
    use channel_core::types::CipherMode;
    use proptest::prelude::*;

    const BS: u64 = BLOCK_SIZE as u64;

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(DispatchPlan::new(1, 0).worker_count, 1);
        assert_eq!(DispatchPlan::new(1, 4).worker_count, 4);
        assert_eq!(DispatchPlan::new(1, 64).worker_count, MAX_WORKERS);
    }

    #[test]
    fn dynamic_context_stays_in_bounds() {
        let ctx = DispatchContext::dynamic(1 << 30, CipherMode::Decrypt);
        assert!((1..=MAX_WORKERS).contains(&ctx.requested_workers));
        assert_eq!(ctx.plan().worker_count, ctx.requested_workers);
    }

    #[test]
    fn six_hundred_thousand_bytes_over_three_workers() {
        let plan = DispatchContext::new(600_000, 3, CipherMode::Encrypt).plan();
        assert_eq!(plan.total_blocks, 3);
        assert_eq!(plan.blocks_per_worker, 1);
        assert_eq!(plan.remainder, 0);
        assert_eq!(plan.block_len(0), BLOCK_SIZE);
        assert_eq!(plan.block_len(2), 75_712);
        assert_eq!(plan.segment_size(2), SEGMENT_HEADER_LEN + BLOCK_PREFIX_LEN + 75_712);
        assert_eq!(plan.total_segment_bytes(), 3 * SEGMENT_HEADER_LEN + 3 * BLOCK_PREFIX_LEN + 600_000);
    }

    #[test]
    fn remainder_goes_to_the_first_workers() {
        // 7 blocks over 3 workers: 3, 2, 2
        let plan = DispatchPlan::new(7 * BS, 3);
        assert_eq!((plan.blocks_per_worker, plan.remainder), (2, 1));
        assert_eq!(plan.blocks_for_worker(0), 3);
        assert_eq!(plan.blocks_for_worker(1), 2);
        assert_eq!(plan.blocks_for_worker(2), 2);

        let rr: Vec<u64> = plan.blocks_for(0, Assignment::RoundRobin).collect();
        assert_eq!(rr, vec![0, 3, 6]);
        let contiguous: Vec<u64> = plan.blocks_for(1, Assignment::Contiguous).collect();
        assert_eq!(contiguous, vec![3, 4]);
    }

    #[test]
    fn fixed_two_halves_match_the_split_point() {
        let plan = DispatchPlan::new(5 * BS + 1, 2);
        let first: Vec<u64> = plan.blocks_for(0, Assignment::Contiguous).collect();
        let second: Vec<u64> = plan.blocks_for(1, Assignment::Contiguous).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(second, vec![3, 4, 5]);
        assert_eq!(
            first.len() as u64 * BS,
            channel_core::ring::split_point(5 * BS + 1)
        );
    }

    #[test]
    fn empty_payload_has_no_blocks() {
        let plan = DispatchPlan::new(0, 5);
        assert_eq!(plan.total_blocks, 0);
        assert_eq!(plan.segment_size(3), SEGMENT_HEADER_LEN);
        assert_eq!(plan.shared_segment_size(), SEGMENT_HEADER_LEN);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_every_block_has_exactly_one_owner(
            len in 0u64..(40 * BS),
            requested in 0usize..16,
            contiguous in any::<bool>(),
        ) {
            let plan = DispatchPlan::new(len, requested);
            let w = plan.worker_count;
            let assignment = if contiguous { Assignment::Contiguous } else { Assignment::RoundRobin };

            let counted: u64 = (0..w).map(|i| plan.blocks_for_worker(i)).sum();
            prop_assert_eq!(counted, len.div_ceil(BS));
            prop_assert_eq!(counted, plan.total_blocks);

            let mut owner = vec![None; plan.total_blocks as usize];
            for worker in 0..w {
                for k in plan.blocks_for(worker, assignment) {
                    prop_assert!(owner[k as usize].is_none(), "block {} assigned twice", k);
                    owner[k as usize] = Some(worker);
                    prop_assert_eq!(plan.owner(k, assignment), worker);
                }
            }
            for (k, o) in owner.iter().enumerate() {
                prop_assert!(o.is_some(), "block {} unassigned", k);
                if !contiguous {
                    prop_assert_eq!(o.unwrap(), k % w);
                    prop_assert_eq!(plan.global_index(plan.worker_for(k as u64), plan.local_index(k as u64)), k as u64);
                }
            }
        }

        #[test]
        fn prop_segment_sizes_add_up(len in 0u64..(40 * BS), requested in 1usize..=MAX_WORKERS) {
            let plan = DispatchPlan::new(len, requested);
            let expected = SEGMENT_HEADER_LEN * plan.worker_count
                + plan.total_blocks as usize * BLOCK_PREFIX_LEN
                + len as usize;
            prop_assert_eq!(plan.total_segment_bytes(), expected);

            let block_sum: u64 = (0..plan.total_blocks).map(|k| plan.block_len(k) as u64).sum();
            prop_assert_eq!(block_sum, len);
        }
    }
}
