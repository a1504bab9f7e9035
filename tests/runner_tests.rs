mod test_harness;

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use simforge::config::RunnerConfig;
use simforge::worker::SessionRunner;
use simforge::SimError;
use test_harness::*;

#[tokio::test]
async fn test_run_writes_every_frame_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let spec = job("gs-00001", "gray_scott", 5);
    let metadata = runner.run(&spec, dir.path(), &mut session).await.unwrap();

    assert_eq!(frame_files(dir.path()), expected_frames(5));
    assert_eq!(metadata.frames.len(), 5);
    assert_eq!(metadata.seed, 42);

    let doc = read_json(&dir.path().join("metadata.json"));
    assert_eq!(doc["job_id"], "gs-00001");
    assert_eq!(doc["frames"].as_array().unwrap().len(), 5);
    assert_eq!(doc["solver"]["seed"], 42);

    let first = std::fs::read(dir.path().join("frames").join("000000.png")).unwrap();
    assert!(first.starts_with(PNG_SIGNATURE));
}

#[tokio::test]
async fn test_session_protocol_order() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let spec = job("order", "gray_scott", 2)
        .with_override("k", json!(0.062))
        .with_override("F", json!(0.037))
        .with_intervention(intervention(1, "u"))
        .with_intervention(intervention(1, "v"));
    runner.run(&spec, dir.path(), &mut session).await.unwrap();

    let expected: Vec<&str> = vec![
        "loadPreset",
        "awaitReady",
        "setSeed",
        "setOption:resolution",
        "setOption:F",
        "setOption:k",
        "recomputeDerivedParameters",
        "reset",
        // frame 0
        "step",
        "render",
        "captureFrame",
        "getSimulationTime",
        // frame 1, edits in list order before stepping
        "applyLocalizedEdit:u",
        "getSimulationTime",
        "applyLocalizedEdit:v",
        "getSimulationTime",
        "step",
        "render",
        "captureFrame",
        "getSimulationTime",
        "getOptionsSnapshot",
    ];
    assert_eq!(renderer.call_names(), expected);
}

#[tokio::test]
async fn test_intervention_records_time_before_step() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    // Two timesteps per frame at STEP_DT each: one time unit per frame
    let spec = job("timed", "gray_scott", 4).with_intervention(intervention(2, "u"));
    let metadata = runner.run(&spec, dir.path(), &mut session).await.unwrap();

    let frame = &metadata.frames[2];
    assert_eq!(frame.interventions.len(), 1);
    assert_eq!(frame.interventions[0].sim_time, 2.0);
    assert_eq!(frame.sim_time, 3.0);
    assert_eq!(frame.tags, vec!["intervention".to_string()]);
    assert!(metadata.frames[1].interventions.is_empty());
    assert!(metadata.frames[3].interventions.is_empty());
}

#[tokio::test]
async fn test_unordered_interventions_apply_by_frame() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let spec = job("unordered", "gray_scott", 4)
        .with_intervention(intervention(3, "late"))
        .with_intervention(intervention(0, "early"));
    let metadata = runner.run(&spec, dir.path(), &mut session).await.unwrap();

    assert_eq!(metadata.frames[0].interventions.len(), 1);
    assert_eq!(metadata.frames[3].interventions.len(), 1);
    let edits: Vec<String> = renderer
        .call_names()
        .into_iter()
        .filter(|c| c.starts_with("applyLocalizedEdit"))
        .collect();
    assert_eq!(edits, vec!["applyLocalizedEdit:early", "applyLocalizedEdit:late"]);
}

#[tokio::test]
async fn test_intervention_past_last_frame_not_applied() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let spec = job("late", "gray_scott", 3).with_intervention(intervention(3, "u"));
    let metadata = runner.run(&spec, dir.path(), &mut session).await.unwrap();

    assert_eq!(renderer.count_calls("applyLocalizedEdit:u"), 0);
    assert!(metadata.frames.iter().all(|f| f.interventions.is_empty()));
    // Still part of the requested schedule
    assert_eq!(metadata.interventions.len(), 1);
}

#[tokio::test]
async fn test_rerun_replaces_stale_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames");
    std::fs::create_dir_all(&frames).unwrap();
    for i in 0..8 {
        std::fs::write(frames.join(format!("{:06}.png", i)), b"stale").unwrap();
    }
    std::fs::write(dir.path().join("error.json"), b"{}").unwrap();

    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());
    runner
        .run(&job("rerun", "gray_scott", 3), dir.path(), &mut session)
        .await
        .unwrap();

    assert_eq!(frame_files(dir.path()), expected_frames(3));
    assert!(!dir.path().join("error.json").exists());
    let first = std::fs::read(frames.join("000000.png")).unwrap();
    assert!(first.starts_with(PNG_SIGNATURE));
}

#[tokio::test]
async fn test_never_ready_is_load_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::with_behavior(Behavior {
        never_ready: HashSet::from(["stuck".to_string()]),
        ..Default::default()
    });
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let err = runner
        .run(&job("stuck", "stuck", 3), dir.path(), &mut session)
        .await
        .unwrap_err();

    assert!(matches!(err, SimError::LoadTimeout(_)), "got {:?}", err);
    assert_eq!(renderer.count_calls("setSeed"), 0);
    assert!(frame_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_slow_call_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::with_behavior(Behavior {
        step_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let mut session = renderer.session();
    let runner = SessionRunner::new(RunnerConfig {
        ready_timeout_ms: 100,
        call_timeout_ms: 50,
    });

    let err = runner
        .run(&job("slow", "gray_scott", 3), dir.path(), &mut session)
        .await
        .unwrap_err();

    match err {
        SimError::RemoteCall { call, reason } => {
            assert_eq!(call, "step");
            assert!(reason.contains("timed out"), "reason: {}", reason);
        }
        other => panic!("expected RemoteCall, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_failure_aborts_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::with_behavior(Behavior {
        fail_steps: HashSet::from(["unstable".to_string()]),
        ..Default::default()
    });
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let err = runner
        .run(&job("boom", "unstable", 3), dir.path(), &mut session)
        .await
        .unwrap_err();

    assert!(matches!(err, SimError::RemoteCall { .. }));
    assert!(!dir.path().join("metadata.json").exists());
    assert_eq!(renderer.count_calls("render"), 0);
}

#[tokio::test]
async fn test_invalid_spec_rejected_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let spec = job("bad", "gray_scott", 3).with_frames(3, 0);
    let err = runner.run(&spec, dir.path(), &mut session).await.unwrap_err();

    assert!(matches!(err, SimError::InvalidJob(_)));
    assert!(renderer.call_names().is_empty());
}

#[tokio::test]
async fn test_canvas_resolution_sent_to_renderer() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new();
    let mut session = renderer.session();
    let runner = SessionRunner::new(test_runner_config());

    let mut spec = job("small", "gray_scott", 1);
    spec.resolution = simforge::job::Resolution {
        width: 64,
        height: 32,
    };
    let metadata = runner.run(&spec, dir.path(), &mut session).await.unwrap();

    assert_eq!(renderer.count_calls("setOption:resolution"), 1);
    let doc = read_json(&dir.path().join("metadata.json"));
    assert_eq!(doc["solver"]["resolution"], json!([64, 32]));
    assert_eq!(metadata.resolution.width, 64);
}
