use std::time::Duration;

use stampede_load::LatencyCollector;
use tokio::time::Instant;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn test_completions_keep_delivery_order() {
    let start = Instant::now();
    let mut collector = LatencyCollector::new();
    collector.begin_round_at(1, start);

    collector.record_completion(2, start + ms(3));
    collector.record_completion(0, start + ms(5));
    collector.record_completion(1, start + ms(9));

    let ids: Vec<usize> = collector
        .completions()
        .iter()
        .map(|c| c.connection_id)
        .collect();
    assert_eq!(ids, vec![2, 0, 1]);
}

#[test]
fn test_summary_for_three_connections() {
    let start = Instant::now();
    let mut collector = LatencyCollector::new();
    collector.begin_round_at(1, start);

    collector.record_completion(0, start + ms(10));
    collector.record_completion(2, start + ms(12));
    collector.record_completion(1, start + ms(15));

    let summary = collector.finish_round().unwrap();
    assert_eq!(summary.round, 1);
    assert_eq!(summary.time_to_first, Some(ms(10)));
    assert_eq!(summary.time_to_last, Some(ms(15)));
    assert_eq!(summary.p50, Some(ms(12)));
    assert_eq!(summary.p99, Some(ms(15)));
    assert_eq!(summary.completions, 3);
    assert_eq!(summary.failures, 0);
    assert!(!summary.is_starved());
}

#[test]
fn test_first_never_exceeds_last() {
    let start = Instant::now();
    let mut collector = LatencyCollector::new();
    collector.begin_round_at(7, start);

    for (id, offset) in [(4, 1), (1, 1), (3, 8), (0, 20), (2, 21)] {
        collector.record_completion(id, start + ms(offset));
    }

    let summary = collector.finish_round().unwrap();
    assert!(summary.time_to_first.unwrap() <= summary.time_to_last.unwrap());
}

#[test]
fn test_starved_round_has_no_timings() {
    let mut collector = LatencyCollector::new();
    collector.begin_round(3);
    collector.record_failure(0);
    collector.record_failure(1);

    let summary = collector.finish_round().unwrap();
    assert_eq!(summary.completions, 0);
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.time_to_first, None);
    assert_eq!(summary.time_to_last, None);
    assert_eq!(summary.p50, None);
    assert!(summary.is_starved());
}

#[test]
fn test_finish_resets_round_state() {
    let start = Instant::now();
    let mut collector = LatencyCollector::new();
    collector.begin_round_at(1, start);
    collector.record_completion(0, start + ms(2));
    collector.record_failure(1);
    collector.finish_round().unwrap();

    assert!(!collector.is_round_open());
    assert!(collector.finish_round().is_none());
    assert!(collector.completions().is_empty());

    collector.begin_round_at(2, start + ms(5));
    let summary = collector.finish_round().unwrap();
    assert_eq!(summary.round, 2);
    assert_eq!(summary.completions, 0);
    assert_eq!(summary.failures, 0);
}

#[test]
fn test_records_outside_round_are_ignored() {
    let mut collector = LatencyCollector::new();
    collector.record_completion(0, Instant::now());
    collector.record_failure(0);
    assert!(collector.finish_round().is_none());
}

#[test]
fn test_summary_display() {
    let start = Instant::now();
    let mut collector = LatencyCollector::new();
    collector.begin_round_at(4, start);
    collector.record_completion(0, start + ms(10));
    collector.record_completion(1, start + ms(15));
    collector.record_failure(2);

    let line = collector.finish_round().unwrap().to_string();
    assert!(line.starts_with("round 4: first message after 10.000ms, all 2 messages after 15.000ms"));
    assert!(line.ends_with(", 1 failed"));

    collector.begin_round(5);
    let starved = collector.finish_round().unwrap().to_string();
    assert_eq!(starved, "round 5: no messages received, 0 failed");
}
