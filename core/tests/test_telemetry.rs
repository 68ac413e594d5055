#[cfg(test)]
mod telemetry_snapshot_tests {
    use std::time::Duration;

    use channel_core::channel::Topology;
    use channel_core::telemetry::{ChannelCounters, Stage, TelemetrySnapshot, TelemetryTimer};

    fn make_counters() -> ChannelCounters {
        let mut c = ChannelCounters::default();
        c.add_segment_created();
        c.add_segment_created();
        c.add_worker_launched();
        c.add_worker_launched();
        c.add_block_written(262_144);
        c.add_block_written(75_712);
        c.add_block_read(262_144);
        c.add_block_read(75_712);
        c
    }

    fn make_timer() -> TelemetryTimer {
        let mut timer = TelemetryTimer::new();
        std::thread::sleep(Duration::from_millis(20)); // ensure elapsed > stage times
        timer.add_stage_time(Stage::Allocate, Duration::from_millis(2));
        timer.add_stage_time(Stage::Transfer, Duration::from_millis(5));
        timer.add_stage_time(Stage::Transfer, Duration::from_millis(5));
        timer.finish();
        timer
    }

    #[test]
    fn stage_times_accumulate() {
        let timer = make_timer();
        assert_eq!(timer.stage_times.get(Stage::Transfer), Duration::from_millis(10));
        assert_eq!(timer.stage_times.get(Stage::Teardown), Duration::ZERO);
        assert!(timer.stage_times.has_all(&[Stage::Allocate, Stage::Transfer]));
        assert_eq!(timer.stage_times.total(), Duration::from_millis(12));
    }

    #[test]
    fn snapshot_reports_live_segments() {
        let mut counters = make_counters();
        let timer = make_timer();

        let snap = TelemetrySnapshot::from(Topology::DispatchN, 2, &counters, &timer);
        assert_eq!(snap.counters.bytes_written, 337_856);
        assert!(!snap.sanity_check(), "two segments still live");

        counters.add_segment_destroyed();
        counters.add_segment_destroyed();
        let snap = TelemetrySnapshot::from(Topology::DispatchN, 2, &counters, &timer);
        assert!(snap.sanity_check());
        assert!(snap.throughput_bytes_per_sec > 0.0);
    }

    #[test]
    fn counters_merge() {
        let mut a = make_counters();
        a.merge(&make_counters());
        assert_eq!(a.blocks_read, 4);
        assert_eq!(a.segments_created, 4);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snap = TelemetrySnapshot::from(Topology::CrossReadN, 3, &make_counters(), &make_timer());
        let json = snap.to_json().unwrap();
        assert!(json.contains("\"topology\":\"CrossReadN\""));
        let back: TelemetrySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.counters, snap.counters);
        assert_eq!(back.worker_count, 3);
    }
}
