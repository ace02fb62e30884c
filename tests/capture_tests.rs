use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voicepipe::audio::{AudioCapture, Recorder, SampleBuffer, SampleChunk, SyntheticInput};
use voicepipe::config::CaptureConfig;
use voicepipe::telemetry::{SharedTelemetry, TelemetryEvent};
use voicepipe::PipelineError;

fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i % 1000) as f32 / 1000.0 - 0.5).collect()
}

/// Samples pass through untouched.
fn unity() -> CaptureConfig {
    CaptureConfig {
        gain: 1.0,
        ..CaptureConfig::default()
    }
}

#[test]
fn test_three_chunk_recording() {
    // 4096 + 4096 + 2000 samples at 16 kHz
    let samples = ramp(10_192);
    let input = SyntheticInput::new(samples.clone(), 512);
    let mut recorder = Recorder::with_backend(input, unity());

    recorder.start().unwrap();
    assert!(recorder.is_recording());
    let recording = recorder.stop().unwrap().expect("recording");

    assert_eq!(recording.stats.chunks, 3);
    assert_eq!(recording.samples.len(), 10_192);
    assert_eq!(recording.samples, samples);
    assert_eq!(recording.sample_rate, 16_000);

    let bytes = recording.encoded.as_bytes();
    assert_eq!(bytes.len(), 44 + 10_192 * 2);
    assert_eq!(bytes.len(), 20_428);

    let riff = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let data = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
    assert_eq!(riff, 36 + 10_192 * 2);
    assert_eq!(data, 10_192 * 2);
}

#[test]
fn test_chunks_arrive_in_order() {
    let config = CaptureConfig {
        block_size: 100,
        ..unity()
    };
    let samples = ramp(1_050);
    let mut capture = AudioCapture::with_backend(SyntheticInput::new(samples.clone(), 37), config);

    let seen: Arc<Mutex<Vec<SampleChunk>>> = Arc::default();
    let sink = seen.clone();
    capture
        .on_chunk(move |chunk| sink.lock().unwrap().push(chunk))
        .unwrap();

    capture.start(16_000).unwrap();
    let stats = capture.stop().unwrap();
    assert_eq!(stats.chunks, 11);
    assert_eq!(stats.samples, 1_050);
    assert_eq!(stats.overruns, 0);

    let chunks = seen.lock().unwrap();
    let sizes: Vec<usize> = chunks.iter().map(SampleChunk::len).collect();
    assert_eq!(&sizes[..10], &[100; 10]);
    assert_eq!(sizes[10], 50);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.sequence(), i as u64);
    }

    // Appending in delivery order reproduces the input exactly.
    let mut buffer = SampleBuffer::new();
    for chunk in chunks.iter().cloned() {
        buffer.append(chunk);
    }
    assert_eq!(buffer.drain(), samples);
    assert!(buffer.is_empty());
}

#[test]
fn test_capture_gain_applied_and_clamped() {
    let input = SyntheticInput::new(vec![0.1, -0.3, 0.6, -0.9], 4);
    let mut recorder = Recorder::with_backend(input, CaptureConfig::default());

    recorder.start().unwrap();
    let recording = recorder.stop().unwrap().unwrap();

    let expected = [0.2f32, -0.6, 1.0, -1.0];
    assert_eq!(recording.samples.len(), expected.len());
    for (&got, &want) in recording.samples.iter().zip(&expected) {
        assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
    }
}

#[test]
fn test_chunks_flow_while_device_is_feeding() {
    let config = CaptureConfig {
        block_size: 1024,
        ..unity()
    };
    let samples = ramp(10_000);
    let input = SyntheticInput::paced(samples.clone(), 256, Duration::from_millis(1));
    let mut capture = AudioCapture::with_backend(input, config);

    let seen: Arc<Mutex<Vec<SampleChunk>>> = Arc::default();
    let sink = seen.clone();
    capture
        .on_chunk(move |chunk| sink.lock().unwrap().push(chunk))
        .unwrap();
    capture.start(16_000).unwrap();

    // The feeder is still running when the first chunk lands.
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "no chunk delivered while capturing");
        std::thread::sleep(Duration::from_millis(1));
    }
    let stats = capture.stop().unwrap();
    assert_eq!(stats.samples, 10_000);
    assert_eq!(stats.chunks, 10);
    assert_eq!(stats.overruns, 0);

    let chunks = seen.lock().unwrap();
    let sizes: Vec<usize> = chunks.iter().map(SampleChunk::len).collect();
    assert_eq!(&sizes[..9], &[1024; 9]);
    assert_eq!(sizes[9], 784);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.sequence(), i as u64);
    }
    let joined: Vec<f32> = chunks.iter().flat_map(|c| c.samples().iter().copied()).collect();
    assert_eq!(joined, samples);
}

#[test]
fn test_unavailable_device() {
    let mut recorder = Recorder::with_backend(SyntheticInput::unavailable(), CaptureConfig::default());
    let err = recorder.start().unwrap_err();
    assert!(matches!(err, PipelineError::DeviceUnavailable(_)));
    assert!(!recorder.is_recording());
    assert!(recorder.stop().unwrap().is_none());
}

#[test]
fn test_stop_is_idempotent() {
    let mut capture =
        AudioCapture::with_backend(SyntheticInput::new(ramp(10), 10), CaptureConfig::default());
    assert!(capture.stop().is_none());

    capture.on_chunk(|_| {}).unwrap();
    capture.start(16_000).unwrap();
    assert!(matches!(capture.start(16_000), Err(PipelineError::AlreadyRunning)));
    assert!(matches!(capture.on_chunk(|_| {}), Err(PipelineError::AlreadyRunning)));

    assert!(capture.stop().is_some());
    assert!(capture.stop().is_none());
    assert!(!capture.is_running());
}

#[test]
fn test_handler_survives_restart() {
    let count = Arc::new(Mutex::new(0usize));
    let counter = count.clone();
    let mut capture =
        AudioCapture::with_backend(SyntheticInput::new(ramp(4096), 256), CaptureConfig::default());
    capture
        .on_chunk(move |chunk| *counter.lock().unwrap() += chunk.len())
        .unwrap();

    capture.start(16_000).unwrap();
    capture.stop();
    capture.start(16_000).unwrap();
    capture.stop();

    assert_eq!(*count.lock().unwrap(), 8192);
}

#[test]
fn test_empty_recording() {
    let mut recorder = Recorder::with_backend(SyntheticInput::new(Vec::new(), 1), CaptureConfig::default());
    recorder.start().unwrap();
    let recording = recorder.stop().unwrap().unwrap();

    assert!(recording.samples.is_empty());
    assert_eq!(recording.encoded.len(), 44);
    let header = recording.encoded.header().unwrap();
    assert_eq!(header.data_len, 0);
    assert_eq!(header.riff_size, 36);
}

#[test]
fn test_cancel_discards_audio() {
    let mut recorder = Recorder::with_backend(SyntheticInput::new(ramp(5000), 500), CaptureConfig::default());
    recorder.start().unwrap();
    recorder.cancel();
    assert!(!recorder.is_recording());
    assert!(recorder.stop().unwrap().is_none());
}

#[test]
fn test_recording_telemetry() {
    let telemetry = SharedTelemetry::new();
    let mut recorder = Recorder::with_backend(SyntheticInput::new(ramp(9000), 900), CaptureConfig::default())
        .with_telemetry(telemetry.clone());

    let id = recorder.start().unwrap();
    recorder.stop().unwrap();

    let events = telemetry.events();
    assert_eq!(events[0], TelemetryEvent::RecordingStarted { recording_id: id });
    assert_eq!(
        events[1],
        TelemetryEvent::RecordingStopped {
            recording_id: id,
            samples: 9000,
            chunks: 3,
            overruns: 0,
        }
    );

    let snap = telemetry.snapshot();
    assert_eq!(snap.recording_stats.completed, 1);
    assert_eq!(snap.recording_stats.total_samples, 9000);
}
