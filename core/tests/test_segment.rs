#[cfg(test)]
mod tests {
    use channel_core::block::BlockFlags;
    use channel_core::channel::{DispatchPlan, Topology};
    use channel_core::constants::{BLOCK_SIZE, SEGMENT_HEADER_LEN};
    use channel_core::shm::{BlockTable, HeaderInit, HeaderView, SegmentError, SegmentFlags, SegmentNamespace, SegmentRole};
    use channel_core::types::{ChannelError, CipherMode};

    fn namespace() -> (tempfile::TempDir, SegmentNamespace) {
        let dir = tempfile::tempdir().unwrap();
        let ns = SegmentNamespace::new(dir.path(), "test");
        (dir, ns)
    }

    fn header(blocks: u32, payload_len: u64) -> HeaderInit {
        HeaderInit {
            topology: Topology::CrossReadN,
            mode: CipherMode::Encrypt,
            block_count: blocks,
            worker_count: 3,
            slot_index: 0,
            payload_len,
        }
    }

    #[test]
    fn create_attach_detach_destroy() {
        let (_dir, ns) = namespace();
        let seg = ns.create(7, 4096).unwrap();
        assert_eq!(seg.role(), SegmentRole::Creator);
        assert!(ns.exists(7));

        let other = ns.attach(7, 4096).unwrap();
        assert_eq!(other.role(), SegmentRole::Attached);
        ns.detach(other);
        assert!(ns.exists(7), "detach leaves the identity alive");

        ns.detach(seg);
        ns.destroy(7, 4096).unwrap();
        assert!(!ns.exists(7));
    }

    #[test]
    fn create_fails_when_identity_exists() {
        let (_dir, ns) = namespace();
        let _seg = ns.create(1, 1024).unwrap();
        assert!(matches!(ns.create(1, 1024), Err(SegmentError::AllocationFailed { key: 1, .. })));
    }

    #[test]
    fn create_rejects_size_below_header() {
        let (_dir, ns) = namespace();
        assert!(matches!(ns.create(2, SEGMENT_HEADER_LEN - 1), Err(SegmentError::AllocationFailed { .. })));
        assert!(!ns.exists(2));
    }

    #[test]
    fn attach_requires_matching_identity() {
        let (_dir, ns) = namespace();
        assert!(matches!(ns.attach(3, 1024), Err(SegmentError::NotFound { key: 3 })));

        let _seg = ns.create(3, 1024).unwrap();
        assert!(matches!(
            ns.attach(3, 2048),
            Err(SegmentError::SizeMismatch { expected: 2048, actual: 1024, .. })
        ));
    }

    #[test]
    fn header_round_trips_and_validates() {
        let (_dir, ns) = namespace();
        let plan = DispatchPlan::new(600_000, 3);
        let seg = ns.create(4, plan.shared_segment_size()).unwrap();
        let view = HeaderView::new(&seg);
        assert!(view.validate().is_err(), "fresh zeroed header has no magic");

        view.init(&header(plan.total_blocks as u32, 600_000)).unwrap();
        view.validate().unwrap();
        assert_eq!(view.topology().unwrap(), Topology::CrossReadN);
        assert_eq!(view.mode().unwrap(), CipherMode::Encrypt);
        assert_eq!(view.block_count().unwrap(), 3);
        assert_eq!(view.worker_count().unwrap(), 3);
        assert_eq!(view.payload_len().unwrap(), 600_000);
        assert!(view.flags().unwrap().is_empty());

        // Visible through a second mapping.
        let other = ns.attach(4, seg.len()).unwrap();
        let other_view = HeaderView::new(&other);
        other_view.validate().unwrap();
        view.set_flags(SegmentFlags::STREAM_ENDED).unwrap();
        assert!(other_view.flags().unwrap().contains(SegmentFlags::STREAM_ENDED));
    }

    #[test]
    fn block_table_writes_are_shared_and_bounds_checked() {
        let (_dir, ns) = namespace();
        let plan = DispatchPlan::new(600_000, 3);
        let seg = ns.create(5, plan.shared_segment_size()).unwrap();
        HeaderView::new(&seg).init(&header(3, 600_000)).unwrap();

        let table = BlockTable::new(&seg).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.capacity(0).unwrap(), BLOCK_SIZE);
        assert_eq!(table.capacity(2).unwrap(), 75_712, "last slot is cut to the residual length");

        assert_eq!(table.load(1).unwrap(), (0, BlockFlags::empty()));
        table.write_payload(1, 0, b"payload").unwrap();
        table.publish(1, 7, BlockFlags::WRITTEN).unwrap();

        let other = ns.attach(5, seg.len()).unwrap();
        let remote = BlockTable::new(&other).unwrap();
        assert_eq!(remote.load(1).unwrap(), (7, BlockFlags::WRITTEN));
        let mut dst = [0u8; 16];
        assert_eq!(remote.read_payload(1, 0, 7, &mut dst).unwrap(), 7);
        assert_eq!(&dst[..7], b"payload");

        assert!(matches!(table.write_payload(2, 75_000, &[0u8; 1000]), Err(ChannelError::Block(_))));
        assert!(matches!(table.load(3), Err(ChannelError::Block(_))));
        assert!(matches!(table.publish(2, 75_713, BlockFlags::WRITTEN), Err(ChannelError::Block(_))));
    }

    #[test]
    fn destroy_checks_size() {
        let (_dir, ns) = namespace();
        let seg = ns.create(6, 512).unwrap();
        ns.detach(seg);
        assert!(matches!(ns.destroy(6, 1024), Err(SegmentError::SizeMismatch { .. })));
        ns.destroy(6, 512).unwrap();
        assert!(matches!(ns.destroy(6, 512), Err(SegmentError::NotFound { key: 6 })));
    }

    #[test]
    fn word_access_rejects_misaligned_offsets() {
        use std::sync::atomic::Ordering;

        let (_dir, ns) = namespace();
        let seg = ns.create(8, 1024).unwrap();
        assert!(matches!(seg.atomic_u32(2), Err(SegmentError::Misaligned { offset: 2, align: 4 })));
        assert!(matches!(seg.atomic_u64(4), Err(SegmentError::Misaligned { offset: 4, align: 8 })));
        assert!(matches!(seg.atomic_u32(1024), Err(SegmentError::OutOfBounds { .. })));

        seg.atomic_u32(512).unwrap().store(0xfeed, Ordering::Release);
        assert_eq!(seg.atomic_u32(512).unwrap().load(Ordering::Acquire), 0xfeed);
        seg.atomic_u64(520).unwrap().store(u64::MAX, Ordering::Release);
        assert_eq!(seg.atomic_u64(520).unwrap().load(Ordering::Acquire), u64::MAX);
    }
}
