use neurogram_core::edf::write_edf;
use neurogram_core::{
    merge_positives, CacheConfig, CoreError, DetectorConfig, MontageSpec, Recording,
    SessionConfig, SessionService, WindowedEventDetector,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn test_service(dir: &TempDir) -> SessionService {
    SessionService::new(SessionConfig {
        cache: CacheConfig {
            directory: dir.path().join("cache"),
            poll_interval: Duration::from_millis(20),
            memo_capacity: 8,
        },
        first_chunk_wait: Duration::from_millis(300),
        ..Default::default()
    })
    .expect("Failed to create session service")
}

/// Four channels, four seconds at 64 Hz, values on a coarse grid so EDF
/// quantization stays well below the tolerances used here
fn write_scenario_recording(dir: &TempDir) -> PathBuf {
    let n = 256;
    let recording = Recording {
        data: vec![
            (0..n).map(|i| (i % 8) as f64).collect(),
            vec![0.5; n],
            (0..n).map(|i| 10.0 * (i % 4) as f64).collect(),
            (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect(),
        ],
        labels: ["EEG FP1", "EEG F3", "EEG FP2", "EEG F4"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        sample_rate: 64.0,
        annotations: vec![],
    };

    let path = dir.path().join("scenario.edf");
    write_edf(&path, &recording).expect("Failed to write EDF");
    path
}

fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tolerance, "{a} != {e}");
    }
}

#[test]
fn test_ingest_edf_and_read_chunks() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);
    let path = write_scenario_recording(&dir);

    let info = service.ingest("abc", &path).unwrap();

    assert_eq!(info.labels, vec!["EEG FP1", "EEG F3", "EEG FP2", "EEG F4"]);
    assert_eq!(service.get_sample_rate("abc").unwrap(), 64.0);
    assert_eq!(service.get_sample_count("abc").unwrap(), 256);
    assert!(!info.montage_active());

    let chunk = service.get_chunk("abc", 0, 4).unwrap();
    assert_close(&chunk.data[0], &[0.0, 1.0, 2.0, 3.0], 1e-3);
    assert_close(&chunk.data[2], &[0.0, 10.0, 20.0, 30.0], 1e-2);
}

#[test]
fn test_bipolar_montage_through_service() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);
    service.ingest("abc", &write_scenario_recording(&dir)).unwrap();

    service
        .set_montage("abc", MontageSpec::from_pairs(&[("FP1", "F3"), ("FP2", "F4")]))
        .unwrap();

    let chunk = service.get_chunk("abc", 0, 4).unwrap();
    assert_eq!(chunk.labels, vec!["FP1-F3", "FP2-F4"]);
    assert_close(&chunk.data[0], &[-0.5, 0.5, 1.5, 2.5], 1e-3);
    assert_close(&chunk.data[1], &[-1.0, 11.0, 19.0, 31.0], 1e-2);
}

#[test]
fn test_monopolar_entry_with_empty_first_token() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);
    service.ingest("abc", &write_scenario_recording(&dir)).unwrap();

    let applied = service
        .set_montage("abc", MontageSpec::from_pairs(&[("", "F3")]))
        .unwrap();

    assert_eq!(applied.labels, vec!["F3"]);
    let chunk = service.get_chunk("abc", 10, 12).unwrap();
    assert_close(&chunk.data[0], &[0.5, 0.5], 1e-3);
}

#[test]
fn test_missing_session_not_found_then_timeout() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);

    assert!(matches!(
        service.cache().chunk("abc", 0, 10),
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        service.get_chunk("abc", 0, 10),
        Err(CoreError::Timeout { .. })
    ));
}

#[test]
fn test_first_chunk_waits_for_background_ingest() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(test_service(&dir));
    let path = write_scenario_recording(&dir);

    let ingest = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            service.ingest("late", &path).unwrap();
        })
    };

    let chunk = service.get_chunk("late", 0, 64).unwrap();
    assert_eq!(chunk.data.len(), 4);
    assert_eq!(chunk.total_samples, 256);
    ingest.join().unwrap();
}

#[test]
fn test_chunks_tile_effective_matrix() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);
    service.ingest("abc", &write_scenario_recording(&dir)).unwrap();
    service
        .set_montage("abc", MontageSpec::from_pairs(&[("FP1", "F3")]))
        .unwrap();

    let full = service.get_chunk("abc", 0, 256).unwrap().data;
    let mut stitched = vec![Vec::new(); full.len()];
    for n in 0..3 {
        let chunk = service.get_chunk_ordinal("abc", n, 3).unwrap();
        for (row, part) in stitched.iter_mut().zip(chunk.data) {
            row.extend(part);
        }
    }

    assert_eq!(stitched, full);
    assert!(matches!(
        service.get_chunk("abc", 200, 300),
        Err(CoreError::Range { .. })
    ));
}

#[test]
fn test_merge_scenario_through_detector() {
    // Windows at 0, 200, 400, 600 and 800; positives at 200, 400 and 800
    let data = vec![(0..1200).map(|i| i as f64).collect::<Vec<_>>()];
    let oracle = |window: &[Vec<f64>]| match window[0][0] as usize {
        200 | 400 | 800 => 0.9,
        _ => 0.1,
    };

    let events = WindowedEventDetector::new(DetectorConfig::default())
        .detect(&data, 250.0, &oracle)
        .unwrap();

    assert_eq!(events, merge_positives(&[(200, 0.9), (400, 0.9), (800, 0.9)], 250, 250.0));
    assert_eq!(events.len(), 2);
    assert!((events[0].onset - 0.8).abs() < 1e-12);
    assert!((events[0].duration - 1.8).abs() < 1e-12);
    assert!((events[1].onset - 3.2).abs() < 1e-12);
    assert!((events[1].duration - 1.0).abs() < 1e-12);
}

#[test]
fn test_key_round_trip() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);

    let token = service.generate_key(Path::new("/data/x_annotated.edf")).unwrap();

    assert_eq!(token.len(), 16);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(
        service.resolve(&token).unwrap(),
        PathBuf::from("/data/x_annotated.edf")
    );
    assert!(service.registry().log_path().ends_with("keymap.txt"));
}

#[test]
fn test_detect_and_export() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);
    let path = write_scenario_recording(&dir);
    service.ingest("abc", &path).unwrap();

    let events = service
        .run_detection("abc", &|window: &[Vec<f64>]| {
            if window[2].iter().any(|v| *v > 25.0) { 0.7 } else { 0.2 }
        })
        .unwrap();
    // Every window of 250 samples sees the 30 uV peaks on FP2
    assert_eq!(events.len(), 1);

    let exported = service.export_annotated("abc", &events).unwrap();
    assert_eq!(exported.path, dir.path().join("scenario_ng-annotated.edf"));
    assert_eq!(service.resolve(&exported.file_key).unwrap(), exported.path);

    service.ingest("annotated", &exported.path).unwrap();
    let info = service.session_info("annotated").unwrap();
    assert_eq!(info.annotations.len(), 1);
    assert_eq!(info.annotations[0].description, "epilepsy");
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let service = test_service(&dir);
    let path = dir.path().join("recording.vhdr");
    std::fs::write(&path, b"Brain Vision Data Exchange Header File").unwrap();

    assert!(matches!(
        service.ingest("abc", &path),
        Err(CoreError::UnsupportedFormat(_))
    ));
}
