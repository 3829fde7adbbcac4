use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use pretty_assertions::assert_eq;
use serde_json::json;

use spark_sight_engine::config::{AnalysisConfig, OutputFormat, WorkerCount};
use spark_sight_engine::cpus::DeployMode;
use spark_sight_engine::pipeline::{self, Analysis, RunContext};
use spark_sight_engine::report::{self, Report};
use spark_sight_engine::PipelineError;

const SEC_MS: i64 = 1_000;
const T0: i64 = 1_648_645_156_000;

fn task_line(stage: i64, task: i64, executor: &str, launch: i64, finish: i64, cpu_s: f64, spill: u64) -> String {
    json!({
        "Event": "SparkListenerTaskEnd",
        "Stage ID": stage,
        "Stage Attempt ID": 0,
        "Task Type": "ResultTask",
        "Task Info": {
            "Task ID": task,
            "Launch Time": T0 + launch,
            "Finish Time": T0 + finish,
            "Executor ID": executor,
            "Host": "10.0.0.1"
        },
        "Task Executor Metrics": {"OnHeapExecutionMemory": 1 << 20, "OnHeapStorageMemory": 0},
        "Task Metrics": {
            "Executor CPU Time": (cpu_s * 1e9) as i64,
            "Executor Deserialize CPU Time": 1_000_000,
            "Result Serialization Time": 1,
            "Disk Bytes Spilled": spill,
            "Shuffle Read Metrics": {"Fetch Wait Time": 2_000_000},
            "Shuffle Write Metrics": {"Shuffle Write Time": 3_000_000}
        }
    })
    .to_string()
}

fn stage_line(stage: i64, name: &str, submitted: i64, completed: i64) -> String {
    json!({
        "Event": "SparkListenerStageCompleted",
        "Stage Info": {
            "Stage ID": stage,
            "Stage Name": name,
            "Number of Tasks": 2,
            "Submission Time": T0 + submitted,
            "Completion Time": T0 + completed
        }
    })
    .to_string()
}

/// Two overlapping stages plus the noise a real log carries.
fn event_log() -> Vec<String> {
    vec![
        json!({"Event": "SparkListenerLogStart", "Spark Version": "3.2.1"}).to_string(),
        json!({"Event": "SparkListenerStageSubmitted", "Stage Info": {"Stage ID": 0}}).to_string(),
        task_line(0, 0, "1", 0, 10 * SEC_MS, 8.0, 0),
        task_line(0, 1, "2", 0, 8 * SEC_MS, 6.0, 4096),
        task_line(1, 2, "1", 6 * SEC_MS, 20 * SEC_MS, 12.0, 1 << 20),
        task_line(1, 3, "2", 7 * SEC_MS, 18 * SEC_MS, 10.0, 0),
        stage_line(0, "map at Job.scala:12", -100, 10 * SEC_MS + 50),
        stage_line(1, "count at Job.scala:20", 5 * SEC_MS, 20 * SEC_MS + 10),
        json!({"Event": "SparkListenerApplicationEnd", "Timestamp": T0 + 21 * SEC_MS}).to_string(),
    ]
}

fn context(workers: usize) -> RunContext {
    RunContext::new(AnalysisConfig {
        total_cores: Some(8),
        deploy_mode: DeployMode::Cluster,
        workers: WorkerCount::Fixed(workers),
        ..AnalysisConfig::default()
    })
    .unwrap()
}

fn analyze_lines(lines: &[String], workers: usize) -> Analysis {
    let ctx = context(workers);
    let ingested = pipeline::ingest_lines(lines.iter().map(String::as_str), "inline", &ctx).unwrap();
    pipeline::analyze(ingested, &ctx).unwrap()
}

fn write_plain(path: &Path, lines: &[String]) {
    let mut f = std::fs::File::create(path).unwrap();
    for line in lines {
        writeln!(f, "{}", line).unwrap();
    }
}

#[test]
fn full_run_produces_disjoint_substages() {
    let analysis = analyze_lines(&event_log(), 2);

    // 8 cores, cluster mode
    assert_eq!(analysis.cpus_available, 6);
    assert_eq!(analysis.stats.tasks, 4);
    assert_eq!(analysis.stats.events_ignored, 3);

    let ns = |ms: i64| (T0 + ms) * 1_000_000;
    assert_eq!(analysis.borders, vec![ns(0) - 1, ns(6 * SEC_MS) - 1, ns(10 * SEC_MS), ns(20 * SEC_MS)]);

    let stage_sets: Vec<Vec<i64>> = analysis.substages.iter().map(|s| s.aggregate.stage_ids.clone()).collect();
    assert_eq!(stage_sets, vec![vec![0], vec![0, 1], vec![1]]);

    for pair in analysis.substages.windows(2) {
        assert!(pair[0].aggregate.end <= pair[1].aggregate.start);
    }

    // CPU time is redistributed, not created or lost (beyond 1ns per cut).
    let total_cpu: f64 = analysis.substages.iter().map(|s| s.aggregate.metrics.cpu_usage).sum();
    assert!((total_cpu - 36e9).abs() / 36e9 < 1e-6);

    for row in &analysis.substages {
        let expected = row.aggregate.metrics.cpu_usage / (row.aggregate.duration as f64 * 6.0);
        assert!((row.efficiency.cpu_usage - expected).abs() < 1e-12);
    }
}

#[test]
fn executor_series_tracks_spill_and_memory() {
    let analysis = analyze_lines(&event_log(), 2);

    let spill: f64 = analysis.executors.iter().map(|e| e.disk_spill).sum();
    assert!((spill - (4096.0 + (1 << 20) as f64)).abs() < 1.0);
    assert!(analysis
        .executors
        .iter()
        .all(|e| e.execution_memory_peak == Some(1 << 20)));
    assert!(analysis.executors.iter().any(|e| e.executor_id == 2));
}

#[test]
fn malformed_lines_do_not_change_results() {
    let clean = analyze_lines(&event_log(), 2);

    let mut noisy = event_log();
    noisy.insert(3, "{\"Event\":\"SparkListenerTaskEnd\",\"Stage ID\":".to_string());
    noisy.insert(0, "not json at all".to_string());
    noisy.push(String::new());
    let dirty = analyze_lines(&noisy, 2);

    assert_eq!(dirty.stats.lines_skipped, 2);
    assert_eq!(clean.substages, dirty.substages);
    assert_eq!(clean.executors, dirty.executors);
}

#[test]
fn results_do_not_depend_on_order_or_workers() {
    let baseline = analyze_lines(&event_log(), 1);

    let mut shuffled = event_log();
    shuffled.reverse();
    shuffled.swap(1, 4);
    let other = analyze_lines(&shuffled, 4);

    assert_eq!(baseline.substages, other.substages);
    assert_eq!(baseline.executors, other.executors);
    assert_eq!(baseline.borders, other.borders);
}

#[test]
fn gzip_rolling_log_matches_plain_file() {
    let dir = tempfile::tempdir().unwrap();
    let lines = event_log();

    let plain = dir.path().join("app-20220330");
    write_plain(&plain, &lines);

    let rolling = dir.path().join("eventlog_v2_app-20220330");
    std::fs::create_dir(&rolling).unwrap();
    for (i, chunk) in lines.chunks(4).enumerate() {
        let path = rolling.join(format!("events_{}_app-20220330.gz", i + 1));
        let mut gz = GzEncoder::new(std::fs::File::create(&path).unwrap(), Compression::default());
        for line in chunk {
            writeln!(gz, "{}", line).unwrap();
        }
        gz.finish().unwrap();
    }
    std::fs::write(rolling.join("appstatus_app-20220330"), b"").unwrap();

    let ctx = context(2);
    let from_plain = pipeline::run(&plain, &ctx).unwrap();
    let from_rolling = pipeline::run(&rolling, &ctx).unwrap();

    assert_eq!(from_rolling.stats.files, 3);
    assert_eq!(from_plain.substages, from_rolling.substages);
    assert_eq!(from_plain.stages, from_rolling.stages);
}

#[test]
fn not_an_event_log_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello\nworld\n").unwrap();

    let err = pipeline::run(&path, &context(1)).unwrap_err();
    match err {
        PipelineError::EmptyOrInvalidLog {
            task_events,
            stage_events,
            ..
        } => assert_eq!((task_events, stage_events), (0, 0)),
        other => panic!("expected EmptyOrInvalidLog, got {:?}", other),
    }
}

#[test]
fn report_written_as_csv_and_json() {
    let dir = tempfile::tempdir().unwrap();
    let analysis = analyze_lines(&event_log(), 2);
    let report = Report::from_analysis(&analysis);

    let csv_dir = dir.path().join("csv");
    let written = report::write_report(&report, OutputFormat::Csv, Some(&csv_dir)).unwrap();
    assert_eq!(written.len(), 3);
    let substages = std::fs::read_to_string(csv_dir.join(report::SUBSTAGES_CSV)).unwrap();
    assert_eq!(substages.lines().count(), 1 + analysis.substages.len());
    assert!(substages.contains(",0;1,"));

    let json_dir = dir.path().join("json");
    report::write_report(&report, OutputFormat::Json, Some(&json_dir)).unwrap();
    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(json_dir.join(report::JSON_FILE)).unwrap()).unwrap();
    assert_eq!(doc["stages"][1]["name"], "count at Job.scala:20");
    assert_eq!(doc["substages"].as_array().unwrap().len(), 3);
}
