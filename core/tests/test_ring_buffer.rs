#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use channel_core::ring::{RingBuffer, RingError};
    use proptest::prelude::*;

    /// Push `data` through a ring of `capacity` with the given chunkings.
    fn pump(data: Vec<u8>, capacity: usize, write_chunk: usize, read_chunk: usize) -> (Vec<u8>, bool) {
        let ring = Arc::new(RingBuffer::new(capacity).unwrap());
        let writer = ring.clone();
        let producer = thread::spawn(move || {
            for chunk in data.chunks(write_chunk) {
                writer.write(chunk).unwrap();
            }
            writer.stop();
        });

        let mut out = Vec::new();
        let mut buf = vec![0u8; read_chunk];
        let eof = loop {
            let r = ring.read(&mut buf);
            out.extend_from_slice(&buf[..r.bytes]);
            if r.eof {
                break true;
            }
        };
        producer.join().unwrap();
        (out, eof)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_chunkings_reproduce_the_stream(
            data in proptest::collection::vec(any::<u8>(), 0..8192),
            capacity in 1usize..512,
            write_chunk in 1usize..700,
            read_chunk in 1usize..700,
        ) {
            let (out, eof) = pump(data.clone(), capacity, write_chunk, read_chunk);
            prop_assert!(eof);
            prop_assert_eq!(out, data);
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(RingBuffer::new(0).unwrap_err(), RingError::ZeroCapacity);
    }

    #[test]
    fn stop_drains_remaining_bytes_then_reports_end() {
        let ring = RingBuffer::new(16).unwrap();
        ring.write(b"abcdef").unwrap();
        ring.stop();

        let mut buf = [0u8; 4];
        let r = ring.read(&mut buf);
        assert_eq!((r.bytes, r.eof), (4, false));
        let r = ring.read(&mut buf);
        assert_eq!((r.bytes, r.eof), (2, true));
        assert_eq!(&buf[..2], b"ef");
        let r = ring.read(&mut buf);
        assert_eq!((r.bytes, r.eof), (0, true));
    }

    #[test]
    fn write_after_stop_fails_closed() {
        let ring = RingBuffer::new(8).unwrap();
        ring.stop();
        assert_eq!(ring.write(b"x").unwrap_err(), RingError::Closed);
        assert!(!ring.is_running());
    }

    #[test]
    fn blocked_writer_is_released_by_stop() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let writer = ring.clone();
        let handle = thread::spawn(move || writer.write(b"0123456789"));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(ring.len(), 4, "writer fills the ring then waits");
        ring.stop();

        assert_eq!(handle.join().unwrap().unwrap_err(), RingError::Closed);
        // What was copied before the stop is still readable.
        let mut buf = [0u8; 8];
        let r = ring.read(&mut buf);
        assert_eq!(&buf[..r.bytes], b"0123");
        assert!(r.eof);
    }

    #[test]
    fn close_is_idempotent() {
        let ring = RingBuffer::new(8).unwrap();
        assert!(ring.close());
        assert!(!ring.close());
        assert!(ring.is_closed());
    }

    #[test]
    fn try_read_does_not_block() {
        let ring = RingBuffer::new(8).unwrap();
        let mut buf = [0u8; 4];
        let r = ring.try_read(&mut buf);
        assert_eq!((r.bytes, r.eof), (0, false));
        ring.write(b"hi").unwrap();
        assert_eq!(ring.try_read(&mut buf).bytes, 2);
    }
}
