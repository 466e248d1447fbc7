mod common;

use std::fs;

use coordinator::{
    ArtifactStore, CoordinatorErr, Pipeline, RoundPhase, ShapeEntry,
    error::ShapeMismatchErr,
    model::ModelFile,
    store::METADATA_FILE,
};
use comms::{Message, SessionStart};

use common::{RecordingConverter, WEIGHTS, model_bytes, new_session_msg};

fn session_start() -> SessionStart {
    match Message::decode(&new_session_msg(&model_bytes())).unwrap() {
        Message::SessionStart(start) => start,
        other => panic!("expected a session start, got {other}"),
    }
}

fn round_weights(round: u64) -> Vec<f64> {
    (0..WEIGHTS).map(|i| round as f64 + i as f64 / 10.0).collect()
}

#[test]
fn initial_manifest_follows_tensor_names() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(ArtifactStore::new(root.path()), RecordingConverter::default());

    let session = pipeline.start_session(&session_start()).unwrap();

    assert_eq!(
        session.weights_shape(),
        &[
            ShapeEntry::new("conv/bias", vec![3]),
            ShapeEntry::new("conv/kernel", vec![2, 3]),
            ShapeEntry::new("norm/scale", vec![1]),
        ]
    );
    assert_eq!(session.current_weights().len(), WEIGHTS);
    assert_eq!(session.repo_id(), "acme/mnist");
    assert_eq!(session.criteria().termination["value"], 5);
}

#[test]
fn rounds_advance_one_at_a_time() {
    const ROUNDS: u64 = 4;

    let root = tempfile::tempdir().unwrap();
    let converter = RecordingConverter::default();
    let pipeline = Pipeline::new(ArtifactStore::new(root.path()), converter.clone());
    let mut session = pipeline.start_session(&session_start()).unwrap();

    for round in 1..=ROUNDS {
        session.replace_weights(round_weights(round)).unwrap();
        let dir = pipeline.advance_round(&mut session).unwrap();

        assert_eq!(session.current_round(), round);
        assert_eq!(session.phase(), RoundPhase::Serving);
        assert!(dir.join(METADATA_FILE).exists());
    }

    let store = pipeline.store();
    let id = session.id();

    // Round 0 holds the initial model, each advance adds exactly one more.
    assert_eq!(store.published_rounds(id).unwrap(), (0..=ROUNDS).collect::<Vec<_>>());
    for round in 0..=ROUNDS {
        let metadata = store.read_metadata(id, round).unwrap();
        assert_eq!(metadata.current_round, round);
        assert_eq!(metadata.session_id, id);
    }

    let calls = converter.calls.borrow();
    let expected: Vec<_> = (0..=ROUNDS).map(|round| store.model_path(id, round)).collect();
    assert_eq!(*calls, expected);

    // No staging directory outlives its conversion.
    let entries = fs::read_dir(store.session_dir(id)).unwrap().count();
    assert_eq!(entries, 2 * (ROUNDS as usize + 1));
}

#[test]
fn persisted_model_carries_round_weights() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(ArtifactStore::new(root.path()), RecordingConverter::default());
    let mut session = pipeline.start_session(&session_start()).unwrap();

    // Exactly representable in f32, so the round trip is lossless.
    let weights = vec![0.5, -1.0, 2.0, 0.25, 0.75, 1.5, -2.5, 3.0, 8.0, 0.125];
    session.replace_weights(weights.clone()).unwrap();
    pipeline.advance_round(&mut session).unwrap();

    let model = ModelFile::open(&pipeline.store().model_path(session.id(), 1)).unwrap();
    assert_eq!(model.flat_weights(session.weights_shape()).unwrap(), weights);
    assert_eq!(model.manifest().unwrap(), session.weights_shape());
}

#[test]
fn failed_conversion_leaves_last_good_round() {
    let root = tempfile::tempdir().unwrap();
    // Calls: 0 = round 0, 1 = round 1, 2 = first attempt at round 2.
    let converter = RecordingConverter::failing_on(vec![2]);
    let pipeline = Pipeline::new(ArtifactStore::new(root.path()), converter.clone());
    let mut session = pipeline.start_session(&session_start()).unwrap();

    session.replace_weights(round_weights(1)).unwrap();
    pipeline.advance_round(&mut session).unwrap();

    let manifest = session.weights_shape().to_vec();
    let round_one = fs::read(pipeline.store().model_path(session.id(), 1)).unwrap();

    session.replace_weights(round_weights(2)).unwrap();
    let err = pipeline.advance_round(&mut session).unwrap_err();

    assert!(matches!(err, CoordinatorErr::Conversion(_)));
    assert_eq!(session.current_round(), 1);
    assert_eq!(session.weights_shape(), manifest.as_slice());

    let store = pipeline.store();
    assert_eq!(store.published_rounds(session.id()).unwrap(), vec![0, 1]);
    assert!(!store.model_path(session.id(), 2).exists());
    assert_eq!(fs::read(store.model_path(session.id(), 1)).unwrap(), round_one);

    // Nothing is retried on its own, a second attempt is a new call.
    assert_eq!(converter.call_count(), 3);
    pipeline.advance_round(&mut session).unwrap();
    assert_eq!(session.current_round(), 2);
    assert_eq!(store.published_rounds(session.id()).unwrap(), vec![0, 1, 2]);
}

#[test]
fn rejected_initial_model_leaves_nothing() {
    let root = tempfile::tempdir().unwrap();
    let converter = RecordingConverter::failing_on(vec![0]);
    let pipeline = Pipeline::new(ArtifactStore::new(root.path()), converter.clone());

    let err = pipeline.start_session(&session_start()).unwrap_err();

    assert!(matches!(err, CoordinatorErr::Conversion(_)));
    assert_eq!(converter.call_count(), 1);
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn mis_sized_aggregate_never_reaches_the_pipeline() {
    let root = tempfile::tempdir().unwrap();
    let converter = RecordingConverter::default();
    let pipeline = Pipeline::new(ArtifactStore::new(root.path()), converter.clone());
    let mut session = pipeline.start_session(&session_start()).unwrap();

    for len in [WEIGHTS - 1, WEIGHTS + 1] {
        let err = session.replace_weights(vec![1.0; len]).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorErr::ShapeMismatch(ShapeMismatchErr::Length { .. })
        ));
    }

    assert_eq!(session.phase(), RoundPhase::Serving);
    assert_eq!(converter.call_count(), 1);
}
