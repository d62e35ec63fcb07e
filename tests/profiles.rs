use std::fs;

use multicam::{CameraConfig, JsonProfileStore, PipelineError, ProfileStore, SourceId};

fn lobby() -> Vec<CameraConfig> {
    vec![
        CameraConfig::new(SourceId::Device(0), "yolov8n.pt").with_target_classes(["person"]),
        CameraConfig::new(SourceId::Uri("rtsp://10.0.0.5/stream".into()), "motion")
            .with_face_detection(true),
    ]
}

#[test]
fn save_then_load_preserves_order_and_fields() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path().join("profiles"));

    store.save_profile("lobby", &lobby()).unwrap();
    let loaded = store.load_profile("lobby").unwrap().expect("profile exists");
    assert_eq!(loaded, lobby());
    assert!(dir.path().join("profiles/lobby.json").exists());
}

#[test]
fn profiles_are_listed_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path());
    store.save_profile("night", &lobby()).unwrap();
    store.save_profile("day", &[]).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    assert_eq!(store.list_profiles().unwrap(), vec!["day", "night"]);
    assert_eq!(store.load_profile("day").unwrap(), Some(Vec::new()));
}

#[test]
fn missing_profile_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path());
    assert!(store.load_profile("ghost").unwrap().is_none());
}

#[test]
fn reads_profiles_written_by_hand() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("legacy.json"),
        r#"[
    {
        "source": 1,
        "model_name": "yolov8n.pt",
        "target_classes": []
    },
    {
        "source": "stub://door",
        "model_name": "stub",
        "target_classes": ["car", "person"],
        "face_detection_enabled": true
    }
]"#,
    )
    .unwrap();
    let store = JsonProfileStore::new(dir.path());

    let configs = store.load_profile("legacy").unwrap().unwrap();
    assert_eq!(configs[0].source, SourceId::Device(1));
    assert!(configs[0].target_classes.is_empty());
    assert!(!configs[0].face_detection_enabled);
    assert_eq!(configs[1].source, SourceId::Uri("stub://door".into()));
    assert_eq!(configs[1].target_classes.len(), 2);
    assert!(configs[1].face_detection_enabled);
}

#[test]
fn corrupt_profile_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    let store = JsonProfileStore::new(dir.path());
    assert!(store.load_profile("broken").is_err());
}

#[test]
fn path_like_names_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path());
    let err = store.save_profile("../escape", &lobby()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InvalidProfileName(_))
    ));
}
