#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use bytes::Bytes;
    use channel_core::constants::BLOCK_SIZE;
    use channel_core::ring::{split_point, FileProducer, RangeProducer, RingBuffer, SourceProducer, SplitThreadBuffer};
    use channel_core::types::ChannelError;
    use channel_core::worker::{BlockTransform, KeystreamXor, Passthrough};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn drain(buf: &mut SplitThreadBuffer, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut tmp = vec![0u8; chunk];
        loop {
            let r = buf.read(&mut tmp).unwrap();
            out.extend_from_slice(&tmp[..r.bytes]);
            if r.eof {
                return out;
            }
        }
    }

    #[test]
    fn split_point_is_block_aligned_and_favours_first_half() {
        let bs = BLOCK_SIZE as u64;
        assert_eq!(split_point(0), 0);
        assert_eq!(split_point(10), 10);
        assert_eq!(split_point(bs), bs);
        assert_eq!(split_point(bs + 1), bs);
        assert_eq!(split_point(3 * bs), 2 * bs);
        assert_eq!(split_point(4 * bs), 2 * bs);
        assert_eq!(split_point(600_000) % bs, 0);
    }

    #[test]
    fn halves_are_served_in_order() {
        let data = payload(3 * BLOCK_SIZE + 12_345);
        let producer: Arc<dyn RangeProducer> =
            Arc::new(SourceProducer::new(Bytes::from(data.clone()), Arc::new(Passthrough)));

        let mut buf = SplitThreadBuffer::spawn(data.len() as u64, producer, 64 * 1024).unwrap();
        assert_eq!(buf.current_half(), 0);
        let out = drain(&mut buf, 10_000);
        assert_eq!(buf.current_half(), 1);
        assert_eq!(out, data);
        assert_eq!(buf.counters().bytes_read, data.len() as u64);
        buf.close().unwrap();
    }

    #[test]
    fn transform_sees_global_block_indices() {
        let data = payload(2 * BLOCK_SIZE + 100);
        let key = KeystreamXor::new([9u8; 32]);
        let producer: Arc<dyn RangeProducer> =
            Arc::new(SourceProducer::new(Bytes::from(data.clone()), Arc::new(key.clone())));

        let mut buf = SplitThreadBuffer::spawn(data.len() as u64, producer, BLOCK_SIZE).unwrap();
        let out = drain(&mut buf, BLOCK_SIZE);
        buf.close().unwrap();

        let mut expected = data.clone();
        for (k, block) in expected.chunks_mut(BLOCK_SIZE).enumerate() {
            key.apply(k as u64, block);
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn file_producer_streams_a_file() {
        let data = payload(BLOCK_SIZE + 777);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let producer: Arc<dyn RangeProducer> = Arc::new(FileProducer::new(file.path(), Arc::new(Passthrough)));
        let mut buf = SplitThreadBuffer::spawn(data.len() as u64, producer, 4096).unwrap();
        assert_eq!(drain(&mut buf, 3000), data);
        buf.close().unwrap();
    }

    #[test]
    fn producer_error_surfaces_at_end_of_half() {
        let producer: Arc<dyn RangeProducer> = Arc::new(|_range: std::ops::Range<u64>, _sink: &RingBuffer| {
            Err(ChannelError::Producer("worker vanished".into()))
        });
        let mut buf = SplitThreadBuffer::spawn(4 * BLOCK_SIZE as u64, producer, 1024).unwrap();
        let mut tmp = [0u8; 64];
        assert!(matches!(buf.read(&mut tmp), Err(ChannelError::Producer(_))));
        // The second half failed the same way; close reports it.
        assert!(matches!(buf.close(), Err(ChannelError::Producer(_))));
        assert!(buf.close().is_ok());
    }

    #[test]
    fn close_twice_and_read_after_close() {
        let producer: Arc<dyn RangeProducer> =
            Arc::new(SourceProducer::new(Bytes::from(payload(BLOCK_SIZE * 3)), Arc::new(Passthrough)));
        let mut buf = SplitThreadBuffer::spawn((BLOCK_SIZE * 3) as u64, producer, 1024).unwrap();

        // Closing with producers still blocked on full rings must not hang.
        buf.close().unwrap();
        buf.close().unwrap();
        let mut tmp = [0u8; 8];
        assert!(matches!(buf.read(&mut tmp), Err(ChannelError::Closed)));
    }
}
