use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use voicepipe::audio::{InputBackend, Recorder, Recording, SyntheticInput};
use voicepipe::codec::{decode_pcm16, DecodedAudio};
use voicepipe::config::PipelineConfig;
use voicepipe::playback::{
    CpalOutput, OfflineOutput, OutputSink, PlaybackController, PlaybackScheduler, PlaybackService,
};
use voicepipe::telemetry::SharedTelemetry;

/// Keeps the output alive for the whole session. The cpal stream is not
/// `Send`, so it stays on the main task.
enum Output {
    Device(CpalOutput),
    Offline(Arc<OfflineOutput>),
}

impl Output {
    fn sink(&self) -> Arc<dyn OutputSink> {
        match self {
            Output::Device(output) => output.sink(),
            Output::Offline(output) => output.sink(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let synthetic = std::env::args().any(|arg| arg == "--synthetic");
    let config = match std::env::var("VOICEPIPE_CONFIG") {
        Ok(path) => PipelineConfig::load(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => PipelineConfig::default(),
    };
    config.validate()?;

    info!("Starting voicepipe (synthetic: {})", synthetic);
    let telemetry = SharedTelemetry::new();

    let output = if synthetic {
        let offline = Arc::new(OfflineOutput::new(&config.playback));
        spawn_offline_clock(offline.clone(), config.playback.sample_rate);
        Output::Offline(offline)
    } else {
        Output::Device(CpalOutput::open(&config.playback)?)
    };

    let scheduler = PlaybackScheduler::new(output.sink()).with_telemetry(telemetry.clone());
    let (controller, service) = PlaybackService::spawn(scheduler, &config.playback);

    if synthetic {
        let rate = config.capture.sample_rate;
        let input = SyntheticInput::new(tone(220.0, rate, 1.5, 0.4), 1024);
        let recorder = Recorder::with_backend(input, config.capture.clone())
            .with_telemetry(telemetry.clone());
        console(recorder, &controller, &config).await?;
    } else {
        let recorder = Recorder::new(config.capture.clone()).with_telemetry(telemetry.clone());
        console(recorder, &controller, &config).await?;
    }

    drop(controller);
    if let Err(e) = service.await {
        error!("Playback service task failed: {}", e);
    }
    drop(output);

    let snapshot = telemetry.snapshot();
    info!("Session telemetry: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}

async fn console<B: InputBackend>(
    mut recorder: Recorder<B>,
    controller: &PlaybackController,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    println!("Commands: r (record), s (stop), p (play last), t (tone), c (cancel), q (quit)");

    let mut last: Option<Recording> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "r" => match recorder.start() {
                Ok(id) => info!("Recording {}", id),
                Err(e) => error!("Could not start recording: {}", e),
            },
            "s" => match recorder.stop() {
                Ok(Some(recording)) => {
                    info!(
                        "Captured {:.2}s: {} WAV bytes, {} base64 chars",
                        recording.duration_secs(),
                        recording.encoded.len(),
                        recording.encoded.to_base64().len()
                    );
                    last = Some(recording);
                }
                Ok(None) => warn!("Not recording"),
                Err(e) => error!("Stop failed: {}", e),
            },
            "p" => match &last {
                Some(recording) => match loop_back(recording) {
                    Ok(audio) => report(controller.speak(audio).await),
                    Err(e) => error!("Could not decode recording: {}", e),
                },
                None => warn!("Nothing recorded yet"),
            },
            "t" => {
                let rate = config.playback.sample_rate;
                let audio = DecodedAudio::mono(tone(440.0, rate, 0.5, 0.3), rate)?;
                report(controller.schedule(audio).await);
            }
            "c" => {
                let cancelled = controller.cancel_all().await?;
                info!("Cancelled {} segment(s)", cancelled);
            }
            "q" => break,
            other => warn!("Unknown command '{}'", other),
        }
    }

    recorder.cancel();
    Ok(())
}

/// WAV bytes → header → PCM decode, the same path synthesized audio takes.
fn loop_back(recording: &Recording) -> voicepipe::Result<DecodedAudio> {
    let header = recording.encoded.header()?;
    decode_pcm16(
        recording.encoded.pcm_payload(),
        header.sample_rate,
        header.channels,
    )
}

fn report(result: voicepipe::Result<voicepipe::PlaybackHandle>) {
    match result {
        Ok(handle) => info!(
            "Playing {} at {:.3}s for {:.3}s",
            handle.id(),
            handle.start_time(),
            handle.duration()
        ),
        Err(e) => error!("Playback failed: {}", e),
    }
}

/// Drive an offline output in real time so scheduled audio completes.
fn spawn_offline_clock(output: Arc<OfflineOutput>, sample_rate: u32) {
    const TICK: Duration = Duration::from_millis(20);
    let frames = (sample_rate as u64 * TICK.as_millis() as u64 / 1000) as usize;
    tokio::spawn(async move {
        let mut cadence = tokio::time::interval(TICK);
        cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        loop {
            cadence.tick().await;
            output.render(frames);
        }
    });
}

fn tone(freq: f32, sample_rate: u32, secs: f32, amplitude: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * secs) as usize;
    (0..n)
        .map(|i| amplitude * (TAU * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}
