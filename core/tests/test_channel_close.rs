// close() twice behaves like close() once, for every topology.

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::Arc;

    use bytes::Bytes;
    use channel_core::channel::{
        BlockTableChannel, ByteChannel, Channel, ChannelBuilder, DispatchChannel, DispatchContext, Topology,
    };
    use channel_core::config::ChannelConfig;
    use channel_core::constants::BLOCK_SIZE;
    use channel_core::ring::{RangeProducer, SourceProducer};
    use channel_core::types::{ChannelError, CipherMode};
    use channel_core::worker::{Passthrough, ThreadLauncher};

    const LEN: usize = 2 * BLOCK_SIZE + 17;

    fn data() -> Vec<u8> {
        (0..LEN).map(|i| (i % 199) as u8).collect()
    }

    fn build(topology: Topology, cfg: &ChannelConfig) -> Channel {
        let bytes = Bytes::from(data());
        let producer: Arc<dyn RangeProducer> = Arc::new(SourceProducer::new(bytes.clone(), Arc::new(Passthrough)));
        let launcher = ThreadLauncher::new(Arc::new(Passthrough), cfg.done_policy()).with_source(bytes);

        ChannelBuilder::new(topology, DispatchContext::new(LEN as u64, 3, CipherMode::Encrypt))
            .config(cfg.clone())
            .producer(producer)
            .launcher(Arc::new(launcher))
            .build()
            .unwrap()
    }

    fn config(dir: &tempfile::TempDir) -> ChannelConfig {
        ChannelConfig {
            ready_timeout_ms: 5_000,
            done_timeout_ms: 10_000,
            ..ChannelConfig::default()
        }
        .with_shm_dir(dir.path())
    }

    #[test]
    fn close_twice_equals_close_once_after_full_read() {
        for topology in Topology::ALL {
            let dir = tempfile::tempdir().unwrap();
            let cfg = config(&dir);
            let mut ch = build(topology, &cfg);

            if topology.is_writable() {
                ch.write_all(&data()).unwrap();
                ch.finish().unwrap();
            }
            let mut out = Vec::new();
            ch.read_to_end(&mut out).unwrap();
            assert_eq!(out, data(), "{topology}");

            ch.close().unwrap();
            let first = ch.telemetry().counters;
            ch.close().unwrap();
            assert_eq!(ch.telemetry().counters, first, "{topology}: second close must not redo teardown");
            assert!(ch.is_closed());

            let mut buf = [0u8; 8];
            assert!(matches!(ByteChannel::read(&mut ch, &mut buf), Err(ChannelError::Closed)), "{topology}");
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0, "{topology}: segments left behind");
        }
    }

    #[test]
    fn close_before_reading_anything() {
        for topology in Topology::ALL {
            let dir = tempfile::tempdir().unwrap();
            let cfg = config(&dir);
            let mut ch = build(topology, &cfg);

            ch.close().unwrap();
            ch.close().unwrap();
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0, "{topology}");
        }
    }

    #[test]
    fn read_only_topologies_reject_writes() {
        for topology in Topology::ALL.into_iter().filter(|t| !t.is_writable()) {
            let dir = tempfile::tempdir().unwrap();
            let cfg = config(&dir);
            let mut ch = build(topology, &cfg);
            let err = ByteChannel::write(&mut ch, b"abc").unwrap_err();
            assert!(
                matches!(err, ChannelError::Unsupported { op: "write", topology: name } if name == topology.name()),
                "{topology}"
            );
            assert!(matches!(ch.finish(), Err(ChannelError::Unsupported { op: "finish", .. })));
            ch.close().unwrap();
        }
    }

    #[test]
    fn builder_requires_the_right_collaborator() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let ctx = DispatchContext::new(10, 1, CipherMode::Encrypt);

        let ring = ChannelBuilder::new(Topology::SingleRing, ctx.clone()).config(cfg.clone()).build();
        assert!(matches!(ring, Err(ChannelError::Config(_))));
        let dispatch = ChannelBuilder::new(Topology::DispatchN, ctx).config(cfg).build();
        assert!(matches!(dispatch, Err(ChannelError::Config(_))));
    }

    fn shm_files(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn open_dispatch(cfg: &ChannelConfig) -> Channel {
        let ctx = DispatchContext::new(LEN as u64, 3, CipherMode::Encrypt);
        let launcher = ThreadLauncher::new(Arc::new(Passthrough), cfg.done_policy());
        Channel::Dispatch(DispatchChannel::open(cfg, &ctx, Arc::new(launcher)).unwrap())
    }

    #[test]
    fn dropping_an_open_dispatch_channel_reclaims_segments() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);

        let mut ch = open_dispatch(&cfg);
        ByteChannel::write(&mut ch, &data()[..BLOCK_SIZE]).unwrap();
        assert_eq!(shm_files(&dir).len(), 3);
        drop(ch);
        assert!(shm_files(&dir).is_empty(), "left behind: {:?}", shm_files(&dir));

        // The same keys are free for the next job.
        let mut ch = open_dispatch(&cfg);
        ch.write_all(&data()).unwrap();
        ch.finish().unwrap();
        let mut out = Vec::new();
        ch.read_to_end(&mut out).unwrap();
        assert_eq!(out, data());
        ch.close().unwrap();
        assert!(shm_files(&dir).is_empty());
    }

    #[test]
    fn dropping_an_unread_block_table_channel_reclaims_segments() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let ctx = DispatchContext::new(LEN as u64, 3, CipherMode::Encrypt);
        let launcher = Arc::new(ThreadLauncher::new(Arc::new(Passthrough), cfg.done_policy()).with_source(Bytes::from(data())));

        for _ in 0..2 {
            let ch = BlockTableChannel::open(&cfg, Topology::CrossReadN, &ctx, launcher.clone()).unwrap();
            drop(ch);
            assert!(shm_files(&dir).is_empty(), "left behind: {:?}", shm_files(&dir));
        }
    }

    #[test]
    fn close_without_waiting_still_reclaims_segments() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ChannelConfig { wait_on_close: false, ..config(&dir) };

        for topology in [Topology::FixedTwo, Topology::CrossReadN, Topology::DispatchN] {
            let mut ch = build(topology, &cfg);
            if topology.is_writable() {
                ByteChannel::write(&mut ch, &data()[..BLOCK_SIZE + 1]).unwrap();
            }
            ch.close().unwrap();
            assert!(shm_files(&dir).is_empty(), "{topology}: left behind {:?}", shm_files(&dir));

            // Reopening on the same keys succeeds.
            let mut ch = build(topology, &cfg);
            ch.close().unwrap();
            assert!(shm_files(&dir).is_empty(), "{topology}");
        }
    }
}
