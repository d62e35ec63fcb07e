use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use multicam::config::MulticamConfig;
use multicam::MAX_FRAME_BYTES;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MULTICAM_CONFIG",
        "MULTICAM_PROFILES_DIR",
        "MULTICAM_MAX_FRAME_BYTES",
        "MULTICAM_DRAIN_INTERVAL_MS",
        "MULTICAM_STOP_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MulticamConfig::load().expect("load config");
    assert_eq!(cfg.profiles_dir, PathBuf::from("profiles"));
    assert_eq!(cfg.max_frame_bytes, MAX_FRAME_BYTES);
    assert_eq!(cfg.notify_depth, 5);
    assert_eq!(cfg.poll_interval, Duration::from_millis(1));
    assert_eq!(cfg.capture_pause, Duration::from_millis(1));
    assert_eq!(cfg.drain_interval, Duration::from_millis(30));
    assert_eq!(cfg.stop_timeout, Duration::from_millis(1000));

    let settings = cfg.supervisor_settings();
    assert_eq!(settings.max_frame_bytes, MAX_FRAME_BYTES);
    assert_eq!(settings.stop_timeout, Duration::from_secs(1));
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "profiles_dir": "/var/lib/multicam/profiles",
        "channel": { "max_frame_bytes": 921600, "notify_depth": 3 },
        "timing": { "poll_interval_ms": 2, "drain_interval_ms": 50, "stop_timeout_ms": 250 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MULTICAM_CONFIG", file.path());
    std::env::set_var("MULTICAM_PROFILES_DIR", "/tmp/profiles");
    std::env::set_var("MULTICAM_STOP_TIMEOUT_MS", "400");

    let cfg = MulticamConfig::load().expect("load config");

    assert_eq!(cfg.profiles_dir, PathBuf::from("/tmp/profiles"));
    assert_eq!(cfg.max_frame_bytes, 921_600);
    assert_eq!(cfg.notify_depth, 3);
    assert_eq!(cfg.poll_interval, Duration::from_millis(2));
    assert_eq!(cfg.capture_pause, Duration::from_millis(1));
    assert_eq!(cfg.drain_interval, Duration::from_millis(50));
    assert_eq!(cfg.stop_timeout, Duration::from_millis(400));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MULTICAM_DRAIN_INTERVAL_MS", "soon");
    assert!(MulticamConfig::load().is_err());
    clear_env();

    std::env::set_var("MULTICAM_MAX_FRAME_BYTES", "0");
    assert!(MulticamConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "channel": { "notify_depth": 0 } }"#)
        .expect("write config");
    std::env::set_var("MULTICAM_CONFIG", file.path());
    assert!(MulticamConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unknown_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "db_path": "witness.db" }"#).expect("write config");
    std::env::set_var("MULTICAM_CONFIG", file.path());
    assert!(MulticamConfig::load().is_err());

    clear_env();
}

#[test]
fn loads_onnx_models_section() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "models": {
            "yolov8n.pt": { "path": "/opt/models/yolov8n.onnx", "labels": "/opt/models/coco.names" },
            "small": { "path": "s.onnx", "labels": "s.names", "input_width": 320, "input_height": 320, "confidence": 0.5 }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("MULTICAM_CONFIG", file.path());

    let cfg = MulticamConfig::load().expect("load config");
    let yolo = &cfg.models["yolov8n.pt"];
    assert_eq!(yolo.path, PathBuf::from("/opt/models/yolov8n.onnx"));
    assert_eq!((yolo.input_width, yolo.input_height), (640, 640));
    assert_eq!(yolo.confidence, 0.25);
    assert_eq!(cfg.models["small"].input_width, 320);

    let names = multicam::DetectorRegistry::with_models(&cfg.models).models();
    assert!(names.contains(&"stub".to_string()));
    if cfg!(feature = "backend-tract") {
        assert!(names.contains(&"yolov8n.pt".to_string()));
    }

    clear_env();
}

#[test]
fn rejects_bad_model_entries() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "models": { "m": { "path": "m.onnx", "labels": "m.names", "confidence": 1.5 } } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("MULTICAM_CONFIG", file.path());
    assert!(MulticamConfig::load().is_err());

    clear_env();
}
