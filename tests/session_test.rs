//! End-to-end session tests against the scriptable mock insole.

#![cfg(feature = "storage_hdf5")]

use std::path::{Path, PathBuf};
use std::time::Duration;

use footsole_daq::error::{AppResult, DaqError};
use footsole_daq::protocol::{FrameBuilder, StepClock, FRAME_LEN, PAYLOAD_LEN, ROW_WIDTH};
use footsole_daq::session::{
    shutdown_channel, EndReason, SessionConfig, SessionController, SessionState, ShutdownSignal,
    Side,
};
use footsole_daq::storage::{
    read_datasets, DatasetBackend, DatasetSnapshot, Hdf5Backend, TimeSeriesStore,
};
use footsole_daq::transport::mock;

const CLOCK_START_NS: u64 = 1_700_000_000_000_000_000;
const CLOCK_STEP_NS: u64 = 10_000_000;

fn payload(seed: u8) -> [u8; PAYLOAD_LEN] {
    let mut p = [0u8; PAYLOAD_LEN];
    for (i, b) in p.iter_mut().enumerate() {
        *b = seed.wrapping_mul(31).wrapping_add(i as u8);
    }
    p
}

fn frame(seed: u8) -> [u8; FRAME_LEN] {
    FrameBuilder::new().payload(&payload(seed)).build()
}

fn config(path: &Path) -> SessionConfig {
    SessionConfig {
        duration: None,
        output_path: Some(path.to_path_buf()),
        ..SessionConfig::default()
    }
}

fn clock() -> StepClock {
    StepClock::new(CLOCK_START_NS, CLOCK_STEP_NS)
}

fn dataset(path: &Path, name: &str) -> DatasetSnapshot {
    read_datasets(path)
        .unwrap()
        .into_iter()
        .find(|d| d.name() == name)
        .unwrap_or_else(|| panic!("no dataset {name} in {}", path.display()))
}

fn temp_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[tokio::test]
async fn test_frames_are_persisted_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "right.h5");
    let (transport, device) = mock::new();
    let frames: Vec<_> = (0..5).map(frame).collect();
    device.send_frames(&frames);
    device.end_of_stream();

    let controller = SessionController::new(config(&path));
    let report = controller
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.end_reason, EndReason::EndOfStream);
    assert_eq!(report.samples_written, 5);
    assert_eq!(report.rows_total, 5);
    assert_eq!(report.bytes_received, 5 * FRAME_LEN as u64);
    assert_eq!(report.bytes_discarded, 0);
    assert_eq!(report.resync_events, 0);
    assert_eq!(report.dataset, "sensor_right");
    assert_eq!(
        report.calibration,
        PathBuf::from("config/foil_sensor_positions_right.csv")
    );
    assert!(report.ensure_clean().is_ok());
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(device.unsubscribe_calls(), 1);

    let data = dataset(&path, "sensor_right");
    assert_eq!(data.shape(), (5, ROW_WIDTH));
    for (i, row) in data.iter_rows().enumerate() {
        assert_eq!(row[0], (CLOCK_START_NS + i as u64 * CLOCK_STEP_NS) as f64);
        let readings: Vec<f64> = payload(i as u8).iter().map(|&b| f64::from(b)).collect();
        assert_eq!(&row[1..], readings.as_slice());
    }
}

#[tokio::test]
async fn test_chunking_does_not_change_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "chunked.h5");
    let (transport, device) = mock::new();

    let stream: Vec<u8> = (0..6).flat_map(frame).collect();
    for piece in stream.chunks(20) {
        device.send_chunk(piece);
    }
    device.end_of_stream();

    let report = SessionController::new(config(&path))
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.samples_written, 6);
    assert_eq!(report.trailing_discarded, 0);
    assert_eq!(dataset(&path, "sensor_right").rows(), 6);
}

#[tokio::test]
async fn test_corrupted_frame_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "corrupt.h5");
    let (transport, device) = mock::new();

    let a = frame(10);
    let mut a_corrupt = a;
    a_corrupt[6 + 50] ^= 0x5A;
    let b = frame(11);
    let mut stream = vec![0u8; 5];
    stream.extend_from_slice(&a);
    stream.extend_from_slice(&a_corrupt);
    stream.extend_from_slice(&b);
    device.send_chunk(&stream);
    device.end_of_stream();

    let report = SessionController::new(config(&path))
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.samples_written, 2);
    assert_eq!(report.bytes_discarded, 5 + FRAME_LEN as u64);
    assert_eq!(report.resync_events, 2);

    let data = dataset(&path, "sensor_right");
    assert_eq!(data.rows(), 2);
    assert_eq!(data.row(0).unwrap()[1], f64::from(payload(10)[0]));
    assert_eq!(data.row(1).unwrap()[1], f64::from(payload(11)[0]));
}

#[tokio::test]
async fn test_trailing_partial_frame_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "trailing.h5");
    let (transport, device) = mock::new();

    device.send_frames(&[frame(1)]);
    device.send_chunk(&frame(2)[..108]);
    device.end_of_stream();

    let report = SessionController::new(config(&path))
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.samples_written, 1);
    assert_eq!(report.trailing_discarded, 108);
    assert_eq!(report.bytes_discarded, 0);
}

#[tokio::test]
async fn test_zero_duration_writes_empty_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "empty.h5");
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1), frame(2)]);

    let session = SessionConfig {
        duration: Some(Duration::ZERO),
        ..config(&path)
    };
    let report = SessionController::new(session)
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.end_reason, EndReason::DurationElapsed);
    assert_eq!(report.samples_written, 0);
    assert_eq!(device.subscribe_calls(), 0);
    assert_eq!(dataset(&path, "sensor_right").shape(), (0, ROW_WIDTH));
}

#[tokio::test]
async fn test_cancel_before_start_writes_empty_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "cancelled.h5");
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1)]);

    let (trigger, signal) = shutdown_channel();
    trigger.trigger();
    let controller = SessionController::new(config(&path));
    let report = controller
        .run_with_clock(transport, signal, clock())
        .await
        .unwrap();

    assert_eq!(report.end_reason, EndReason::Cancelled);
    assert_eq!(report.rows_total, 0);
    assert_eq!(device.subscribe_calls(), 0);
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(dataset(&path, "sensor_right").rows(), 0);
}

#[tokio::test]
async fn test_cancel_while_logging_keeps_received_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "interrupted.h5");
    let (transport, mut device) = mock::new();
    let (trigger, signal) = shutdown_channel();

    let driver = tokio::spawn(async move {
        device.wait_subscribed().await;
        device.send_frames(&[frame(1), frame(2), frame(3)]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.trigger();
        device
    });

    let controller = SessionController::new(config(&path));
    let report = controller
        .run_with_clock(transport, signal, clock())
        .await
        .unwrap();
    let _device = driver.await.unwrap();

    assert_eq!(report.end_reason, EndReason::Cancelled);
    assert_eq!(report.samples_written, 3);
    assert_eq!(dataset(&path, "sensor_right").rows(), 3);
}

#[tokio::test]
async fn test_duration_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "timed.h5");
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1), frame(2)]);

    let session = SessionConfig {
        duration: Some(Duration::from_millis(300)),
        ..config(&path)
    };
    let report = SessionController::new(session)
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.end_reason, EndReason::DurationElapsed);
    assert_eq!(report.samples_written, 2);
    drop(device);
}

#[tokio::test]
async fn test_disconnect_keeps_data_and_is_not_clean() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "lost.h5");
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1), frame(2), frame(3)]);
    device.disconnect("link lost");

    let report = SessionController::new(config(&path))
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(
        report.end_reason,
        EndReason::Disconnected {
            reason: "link lost".into()
        }
    );
    assert_eq!(report.samples_written, 3);
    assert!(matches!(
        report.ensure_clean(),
        Err(DaqError::TransportDisconnected(_))
    ));
    assert_eq!(dataset(&path, "sensor_right").rows(), 3);
}

#[tokio::test]
async fn test_dropped_device_reads_as_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "dropped.h5");
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1)]);
    drop(device);

    let report = SessionController::new(config(&path))
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert!(matches!(report.end_reason, EndReason::Disconnected { .. }));
    assert_eq!(report.samples_written, 1);
}

#[tokio::test]
async fn test_subscription_failure_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "never.h5");
    let (transport, device) = mock::new();
    device.fail_next_subscribe("device not found");

    let controller = SessionController::new(config(&path));
    let result = controller
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await;

    assert!(matches!(result, Err(DaqError::Transport(ref r)) if r == "device not found"));
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(device.subscribe_calls(), 1);
}

#[tokio::test]
async fn test_second_session_appends_to_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "appended.h5");

    for (count, expected_total) in [(4u8, 4usize), (3, 7)] {
        let (transport, device) = mock::new();
        let frames: Vec<_> = (0..count).map(frame).collect();
        device.send_frames(&frames);
        device.end_of_stream();

        let report = SessionController::new(config(&path))
            .run_with_clock(transport, ShutdownSignal::never(), clock())
            .await
            .unwrap();
        assert_eq!(report.samples_written, u64::from(count));
        assert_eq!(report.rows_total, expected_total);
    }

    assert_eq!(dataset(&path, "sensor_right").rows(), 7);
}

#[tokio::test]
async fn test_batched_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "batched.h5");
    let (transport, device) = mock::new();
    let frames: Vec<_> = (0..10).map(frame).collect();
    device.send_frames(&frames);
    device.end_of_stream();

    let session = SessionConfig {
        batch_rows: 4,
        ..config(&path)
    };
    let report = SessionController::new(session)
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.samples_written, 10);
    assert_eq!(report.flushes, 3);
    assert_eq!(dataset(&path, "sensor_right").rows(), 10);
}

#[tokio::test]
async fn test_generated_file_name_in_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("recordings");
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1)]);
    device.end_of_stream();

    let session = SessionConfig {
        side: Side::Left,
        duration: None,
        output_dir: output_dir.clone(),
        ..SessionConfig::default()
    };
    let report = SessionController::new(session)
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await
        .unwrap();

    assert_eq!(report.path.parent(), Some(output_dir.as_path()));
    let name = report.path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("left_"), "{name}");
    assert!(name.ends_with(".h5"), "{name}");
    assert_eq!(dataset(&report.path, "sensor_left").rows(), 1);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_opening() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "invalid.h5");
    let (transport, _device) = mock::new();

    let session = SessionConfig {
        batch_rows: 0,
        ..config(&path)
    };
    let result = SessionController::new(session)
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await;

    assert!(matches!(result, Err(DaqError::Configuration(_))));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_existing_dataset_of_other_width_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_file(&dir, "narrow.h5");
    let mut narrow = Hdf5Backend::open(&path, "sensor_right", 3, 1).unwrap();
    narrow.append_rows(1, &[1.0, 2.0, 3.0]).unwrap();
    narrow.close().unwrap();

    let (transport, device) = mock::new();
    device.send_frames(&[frame(1)]);
    let controller = SessionController::new(config(&path));
    let result = controller
        .run_with_clock(transport, ShutdownSignal::never(), clock())
        .await;

    assert!(matches!(
        result,
        Err(DaqError::ColumnCountMismatch {
            expected: 209,
            found: 3,
            ..
        })
    ));
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(device.subscribe_calls(), 0);
    assert_eq!(dataset(&path, "sensor_right").shape(), (1, 3));
}

/// Backend that accepts rows but fails every sync, like a full disk.
struct FailingSyncBackend {
    rows: usize,
}

impl DatasetBackend for FailingSyncBackend {
    fn rows(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        ROW_WIDTH
    }

    fn append_rows(&mut self, rows: usize, _data: &[f64]) -> AppResult<()> {
        self.rows += rows;
        Ok(())
    }

    fn sync(&mut self) -> AppResult<()> {
        Err(DaqError::store_io(
            "sync",
            "/media/full/right.h5",
            std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
        ))
    }

    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_store_failure_stops_a_live_session() {
    let store = TimeSeriesStore::from_backend(
        Box::new(FailingSyncBackend { rows: 0 }),
        Path::new("/media/full/right.h5"),
        "sensor_right",
        1,
    )
    .unwrap();
    let (transport, device) = mock::new();
    device.send_frames(&[frame(1)]);

    // The device stays connected and silent; only the store failure can end
    // the session.
    let controller = SessionController::new(SessionConfig {
        duration: None,
        ..SessionConfig::default()
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        controller.run_with_store(transport, ShutdownSignal::never(), clock(), store),
    )
    .await
    .expect("session kept running after the store failed");

    match result {
        Err(DaqError::StoreIo { operation, .. }) => assert_eq!(operation, "sync"),
        other => panic!("expected a sync failure, got {other:?}"),
    }
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(device.unsubscribe_calls(), 1);
    drop(device);
}
