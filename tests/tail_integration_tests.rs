// SPDX-License-Identifier: Apache-2.0

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log_agent::bounded_channel::{BoundedReceiver, bounded};
use log_agent::exporters::falcon::MetricPoint;
use log_agent::receivers::file::{
    CounterType, FileTracker, LogSourceConfig, MAX_IDLE_TICKS, Method, MetricItemConfig,
    PollOutcome, WatchMode,
};
use tempfile::TempDir;

// 2024-01-01T10:00:00Z
const T0: i64 = 1_704_103_200;

fn append(path: &Path, data: &[u8]) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(data).unwrap();
    f.flush().unwrap();
}

fn item(metric: &str, pattern: &str, method: Method) -> MetricItemConfig {
    MetricItemConfig {
        metric: metric.to_string(),
        tags: "service=web".to_string(),
        counter_type: CounterType::Gauge,
        step: 60,
        pattern: pattern.to_string(),
        method,
    }
}

fn source(path: PathBuf, items: Vec<MetricItemConfig>) -> LogSourceConfig {
    LogSourceConfig {
        name: "app".to_string(),
        path,
        delimiter: "\n".to_string(),
        ts_enabled: false,
        ts_pattern: String::new(),
        watch_mode: WatchMode::Poll,
        items,
    }
}

fn tracker(cfg: &LogSourceConfig, now: i64) -> (FileTracker, BoundedReceiver<Vec<MetricPoint>>) {
    let (tx, rx) = bounded(64);
    let tracker = FileTracker::new(cfg, "web-01", Arc::new(tx), now).unwrap();
    (tracker, rx)
}

// Epoch seconds of a wall-clock time on 2024-01-01 in the local time zone.
fn local_ts(hour: u32, min: u32, sec: u32) -> i64 {
    chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(hour, min, sec)
        .unwrap()
        .and_local_timezone(chrono::Local)
        .earliest()
        .unwrap()
        .timestamp()
}

fn drain(rx: &BoundedReceiver<Vec<MetricPoint>>) -> Vec<MetricPoint> {
    let mut points = Vec::new();
    while let Some(batch) = rx.try_recv() {
        points.extend(batch);
    }
    points
}

fn value_of(points: &[MetricPoint], metric: &str) -> Vec<f64> {
    points
        .iter()
        .filter(|p| p.metric == metric)
        .map(|p| p.value)
        .collect()
}

#[test]
fn test_timestamped_minute_flushes_before_next_minute() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, b"");

    let mut cfg = source(path.clone(), vec![item("app.err", "ERROR", Method::Count)]);
    cfg.ts_enabled = true;
    cfg.ts_pattern = r"(\d{4})-(\d{2})-(\d{2}) (\d{2}):(\d{2}):(\d{2})".to_string();
    let now = local_ts(10, 0, 30);
    let (mut t, rx) = tracker(&cfg, now);
    assert_eq!(t.poll(now), PollOutcome::Opened);

    for _ in 0..3 {
        append(&path, b"2024-01-01 10:00:05 ERROR boom\n");
    }
    append(&path, b"2024-01-01 10:01:05 ERROR boom\n");
    assert!(matches!(t.poll(now), PollOutcome::Read { lines: 4, .. }));

    let points = drain(&rx);
    assert_eq!(points.len(), 1, "{:?}", points);
    let p = &points[0];
    assert_eq!(p.metric, "app.err.cnt");
    assert_eq!(p.value, 3.0);
    assert_eq!(p.endpoint, "web-01");
    assert_eq!(p.tags, "service=web");
    assert_eq!(p.step, 60);
    assert_eq!(p.timestamp, local_ts(10, 0, 59));

    // The 10:01 line is held in the next window.
    assert_eq!(t.tasks()[0].count(), 1);
}

#[test]
fn test_statistic_window_via_time_flush() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, b"startup cost=999\n");

    let cfg = source(
        path.clone(),
        vec![item("app.latency", r"cost=(\d+)ms", Method::Statistic)],
    );
    let (mut t, rx) = tracker(&cfg, T0);
    t.poll(T0);

    append(&path, b"GET / cost=10ms\nGET /a cost=30ms\nGET /b\nGET /c cost=20ms\n");
    assert!(matches!(t.poll(T0 + 5), PollOutcome::Read { lines: 4, .. }));
    assert_eq!(t.time_flush(T0 + 59), 0);
    assert_eq!(t.time_flush(T0 + 60), 1);

    let points = drain(&rx);
    assert_eq!(value_of(&points, "app.latency.cnt"), vec![3.0]);
    assert_eq!(value_of(&points, "app.latency.max"), vec![30.0]);
    assert_eq!(value_of(&points, "app.latency.min"), vec![10.0]);
    assert_eq!(value_of(&points, "app.latency.avg"), vec![20.0]);

    // An empty window reports zeros, never the sentinels.
    assert_eq!(t.time_flush(T0 + 120), 1);
    let points = drain(&rx);
    assert_eq!(value_of(&points, "app.latency.cnt"), vec![0.0]);
    assert_eq!(value_of(&points, "app.latency.max"), vec![0.0]);
    assert_eq!(value_of(&points, "app.latency.min"), vec![0.0]);
}

#[test]
fn test_truncation_rereads_from_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, b"");

    let cfg = source(path.clone(), vec![item("app.err", "ERROR", Method::Count)]);
    let (mut t, rx) = tracker(&cfg, T0);
    t.poll(T0);

    append(&path, b"ERROR one\nERROR two\nERROR three\n");
    assert!(matches!(t.poll(T0 + 1), PollOutcome::Read { lines: 3, .. }));

    std::fs::write(&path, b"ERROR four\nERROR five\n").unwrap();
    assert_eq!(t.poll(T0 + 2), PollOutcome::Truncated);
    assert_eq!(t.cursor(), 0);

    // No further writes: the rewritten lines are still delivered.
    assert!(matches!(t.poll(T0 + 3), PollOutcome::Read { lines: 2, .. }));
    assert_eq!(t.poll(T0 + 4), PollOutcome::Unchanged);

    t.time_flush(T0 + 60);
    assert_eq!(value_of(&drain(&rx), "app.err.cnt"), vec![5.0]);
}

#[test]
fn test_append_larger_than_read_chunk_is_fully_counted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, b"");

    let cfg = source(path.clone(), vec![item("app.err", "ERROR", Method::Count)]);
    let (mut t, rx) = tracker(&cfg, T0);
    t.poll(T0);

    // 128-byte lines, 70000 of them: more than one 8 MiB read.
    let mut line = b"ERROR ".to_vec();
    line.resize(127, b'x');
    line.push(b'\n');
    let lines = 70_000;
    append(&path, &line.repeat(lines));

    let mut read = 0;
    for now in T0 + 1..T0 + 10 {
        match t.poll(now) {
            PollOutcome::Read { lines, .. } => read += lines,
            PollOutcome::Unchanged => break,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(read, lines);
    assert_eq!(t.cursor(), (lines * 128) as u64);

    t.time_flush(T0 + 60);
    assert_eq!(value_of(&drain(&rx), "app.err.cnt"), vec![lines as f64]);
}

#[cfg(unix)]
#[test]
fn test_rotation_skips_content_written_before_detection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, b"");

    let cfg = source(path.clone(), vec![item("app.err", "ERROR", Method::Count)]);
    let (mut t, rx) = tracker(&cfg, T0);
    t.poll(T0);

    append(&path, b"ERROR before rotation\n");
    assert!(matches!(t.poll(T0 + 1), PollOutcome::Read { lines: 1, .. }));

    std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
    append(&path, b"ERROR already in new file\n");

    let mut rotated = false;
    for _ in 0..=MAX_IDLE_TICKS {
        if t.poll(T0 + 2) == PollOutcome::Rotated {
            rotated = true;
            break;
        }
    }
    assert!(rotated);

    append(&path, b"ERROR after rotation\n");
    assert!(matches!(t.poll(T0 + 3), PollOutcome::Read { lines: 1, .. }));

    // Rotation restarts the windows on the detection time.
    t.time_flush(T0 + 62);
    assert_eq!(value_of(&drain(&rx), "app.err.cnt"), vec![1.0]);
}

#[test]
fn test_partial_line_waits_for_delimiter() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, b"");

    let mut cfg = source(path.clone(), vec![item("app.err", "ERROR", Method::Count)]);
    cfg.delimiter = "\r\n".to_string();
    let (mut t, rx) = tracker(&cfg, T0);
    t.poll(T0);

    append(&path, b"ERROR first\r\nERR");
    assert!(matches!(t.poll(T0 + 1), PollOutcome::Read { lines: 1, .. }));
    append(&path, b"OR second\r");
    assert!(matches!(t.poll(T0 + 2), PollOutcome::Read { lines: 0, .. }));
    append(&path, b"\n");
    assert!(matches!(t.poll(T0 + 3), PollOutcome::Read { lines: 1, .. }));

    t.time_flush(T0 + 60);
    assert_eq!(value_of(&drain(&rx), "app.err.cnt"), vec![2.0]);
}
