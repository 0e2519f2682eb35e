use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use twinguard_core::audit::{GATE_LOG_FILE, STABILITY_LOG_FILE};
use twinguard_core::telemetry::{CORE_TEMP_K, FLOW_RATE_KG_S, PRIMARY_PRESSURE_MPA};
use twinguard_core::{
    AnomalyCause, AnomalyDetector, AuditLog, CsvReplay, MemoryReplay, SignalFusionUnit, StabilityTracker,
    StepOutcome, TelemetrySample, TelemetrySource, TwinConfig, TwinPipeline,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `[low, high)`.
    fn gen_f64(&mut self, low: f64, high: f64) -> f64 {
        let frac = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        low + frac * (high - low)
    }
}

fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn sample(t: f64, temp: f64, pressure: f64, flow: f64) -> TelemetrySample {
    TelemetrySample::new(t)
        .with_channel(CORE_TEMP_K, temp)
        .with_channel(PRIMARY_PRESSURE_MPA, pressure)
        .with_channel(FLOW_RATE_KG_S, flow)
}

fn in_unit(x: f64) -> bool {
    (0.0..=1.0).contains(&x)
}

#[test]
fn random_telemetry_keeps_every_quantity_bounded() {
    for seed in [0x9E37_79B9_7F4A_7C15_u64, 0xDEAD_BEEF, 42] {
        let mut rng = XorShift64::new(seed);
        let mut fusion = SignalFusionUnit::new();
        let mut tracker = StabilityTracker::new();
        for i in 0..2_000 {
            let s = sample(
                f64::from(i),
                rng.gen_f64(-1_000.0, 5_000.0),
                rng.gen_f64(-50.0, 80.0),
                rng.gen_f64(-100.0, 500.0),
            );
            let fused = fusion.update(&s);
            assert!(in_unit(fused.coherence), "seed {seed:#x} step {i}: psi {fused:?}");
            assert!(in_unit(fused.drift_pressure), "seed {seed:#x} step {i}: gamma {fused:?}");
            assert!(in_unit(fused.reserve), "seed {seed:#x} step {i}: omega {fused:?}");

            tracker.ingest(&s, Some(fused));
            let snap = tracker.snapshot();
            assert!(in_unit(snap.integrity()), "seed {seed:#x} step {i}: {snap:?}");
            assert!(in_unit(snap.twist()), "seed {seed:#x} step {i}: {snap:?}");
        }
    }
}

#[test]
fn pipeline_keeps_stepping_after_recovery() {
    let mut rng = XorShift64::new(7);
    let mut pipeline = TwinPipeline::default();
    for i in 0..1_000 {
        let s = sample(
            f64::from(i),
            rng.gen_f64(500.0, 1_000.0),
            rng.gen_f64(0.0, 15.0),
            rng.gen_f64(0.0, 80.0),
        );
        let out = pipeline.step(&s);
        assert!(in_unit(out.snapshot().integrity()));
        assert!(in_unit(out.snapshot().twist()));
    }
    let summary = pipeline.summary();
    assert_eq!(summary.samples_processed, 1_000);
    assert!(summary.anomalies_detected >= summary.plans_rejected);
    assert!(in_unit(summary.max_twist));
}

#[test]
fn moderate_single_sample_is_not_anomalous() {
    let mut fusion = SignalFusionUnit::new();
    let mut tracker = StabilityTracker::new();
    let s = sample(0.0, 620.0, 10.0, 20.0);
    let fused = fusion.update(&s);
    assert!((fused.drift_pressure - 0.0619).abs() < 1e-3, "{fused:?}");
    assert!((fused.coherence - 0.9567).abs() < 1e-3, "{fused:?}");
    tracker.ingest(&s, Some(fused));
    assert!(!AnomalyDetector::default().detect(&tracker.snapshot()));
}

#[test]
fn saturated_drift_triggers_detection_within_thirty_steps() {
    let mut fusion = SignalFusionUnit::new();
    let mut tracker = StabilityTracker::new();
    let detector = AnomalyDetector::default();
    let mut fired = None;
    for i in 0..30 {
        let s = sample(f64::from(i), 2_000.0, 0.0, 0.0);
        tracker.ingest(&s, Some(fusion.update(&s)));
        let snapshot = tracker.snapshot();
        if detector.detect(&snapshot) {
            fired = Some((i, detector.cause(&snapshot)));
            break;
        }
    }
    let (step, cause) = fired.expect("detector silent for 30 saturated samples");
    assert!(step >= 20, "fired unexpectedly early at {step}");
    assert_eq!(cause, Some(AnomalyCause::LowCoherence));
}

#[test]
fn csv_replay_end_to_end_writes_both_audit_logs() {
    let dir = temp_dir("twinguard-e2e");
    let csv = dir.join("telemetry.csv");
    let mut body = String::from("time_hours,core_temp_K,primary_pressure_MPa,flow_rate_kg_s,note\n");
    for i in 0..60 {
        body.push_str(&format!("{:.1},950,1.5,0,\"severe, sustained\"\n", f64::from(i) * 0.5));
    }
    fs::write(&csv, body).unwrap();

    let mut source = CsvReplay::open(&csv).unwrap();
    let mut pipeline = TwinPipeline::with_log_dir(TwinConfig::default(), &dir);
    let mut outcomes = Vec::new();
    let summary = pipeline
        .run_with(&mut source, |_, out| outcomes.push(out.clone()))
        .unwrap();

    assert!(summary.recovered_at_hours.is_some(), "{summary:?}");
    assert!(summary.samples_processed < 60);
    assert!(matches!(outcomes.last(), Some(StepOutcome::Recovered { .. })));
    assert_eq!(summary.first_anomaly_at_hours, summary.recovered_at_hours);

    let stability = fs::read_to_string(dir.join(STABILITY_LOG_FILE)).unwrap();
    let stability: Vec<Value> = stability
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(stability.len() as u64, summary.samples_processed);
    for rec in &stability {
        for key in ["psi", "gamma", "omega", "weave_integrity", "twist"] {
            assert!(rec.get(key).is_some_and(Value::is_number), "{key} missing in {rec}");
        }
    }

    let gate = fs::read_to_string(dir.join(GATE_LOG_FILE)).unwrap();
    let gate: Vec<Value> = gate.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(gate.len() as u64, summary.anomalies_detected);
    assert_eq!(gate.last().and_then(|g| g["export_allowed"].as_bool()), Some(true));
    assert_eq!(gate[0]["O"], 1.0);
    assert_eq!(gate[0]["E"], 0.9);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn replaying_twice_is_deterministic() {
    let samples: Vec<_> = (0..80)
        .map(|i| sample(f64::from(i), 600.0 + 5.0 * f64::from(i), 12.0 - 0.1 * f64::from(i), 40.0))
        .collect();
    let mut source = MemoryReplay::new(samples);

    let first = TwinPipeline::default().run(&mut source).unwrap();
    source.restart().unwrap();
    let second = TwinPipeline::default().run(&mut source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn unwritable_audit_directory_does_not_stop_the_run() {
    let missing = std::env::temp_dir().join(format!("twinguard-nodir-{}/deeper", std::process::id()));
    let mut pipeline = TwinPipeline::new(
        TwinConfig::default(),
        AuditLog::append_to(missing.join(STABILITY_LOG_FILE)),
        AuditLog::append_to(missing.join(GATE_LOG_FILE)),
    );
    let mut source = MemoryReplay::new((0..10).map(|i| sample(f64::from(i), 600.0, 12.0, 60.0)).collect());
    let summary = pipeline.run(&mut source).unwrap();
    assert_eq!(summary.samples_processed, 10);
    assert_eq!(pipeline.tracker().audit().write_failures(), 10);
    assert_eq!(pipeline.tracker().audit().records_written(), 0);
}
