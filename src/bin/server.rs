use crabcctv::source::SyntheticSource;
use crabcctv::{
    init_logging, serve, AppState, CaptureHandle, CctvConfig, CctvError, FrameBus, Recorder,
    RecordingConfig,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const USAGE: &str = "Usage: crabcctv-server [--config <path>] [--bind <addr>] [--output <dir>] \
[--synthetic] [--device <index>] [--write-default-config <path>]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    bind: Option<String>,
    output: Option<String>,
    synthetic: bool,
    device: Option<u32>,
    write_default_config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Args, Box<dyn std::error::Error>> {
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> Result<String, Box<dyn std::error::Error>> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{} needs a value\n{}", flag, USAGE).into())
        };
        match flag {
            "--config" => parsed.config = Some(PathBuf::from(value()?)),
            "--bind" => parsed.bind = Some(value()?),
            "--output" => parsed.output = Some(value()?),
            "--synthetic" => parsed.synthetic = true,
            "--device" => parsed.device = Some(value()?.parse()?),
            "--write-default-config" => {
                parsed.write_default_config = Some(PathBuf::from(value()?))
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => return Err(format!("Unknown argument: {}\n{}", other, USAGE).into()),
        }
        i += 1;
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args(&env::args().collect::<Vec<_>>())?;
    init_logging();

    let result = run(args).await;
    if let Err(e) = &result {
        log::error!("Fatal: {}", e);
    }
    result
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &args.write_default_config {
        CctvConfig::default().save_to_file(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(CctvConfig::default_path);
    let mut config = CctvConfig::load_from_file(&config_path)?;
    if let Some(bind) = args.bind {
        config.stream.bind_address = bind;
    }
    if let Some(output) = args.output {
        config.recording.output_directory = output;
    }
    if args.synthetic {
        config.camera.synthetic = true;
    }
    if let Some(device) = args.device {
        config.camera.device_index = device;
    }
    config.validate()?;

    let output_dir = config.prepare_output_dir()?;
    log::info!("Recording chunks go to {}", output_dir.display());

    let recorder = Recorder::new(RecordingConfig::from_settings(&config));
    let bus = FrameBus::new(config.stream.subscriber_buffer, Some(recorder.clone()));
    let capture = Arc::new(spawn_capture(&config, bus.clone())?);

    let addr = config.bind_address()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CctvError::ServerError(format!("Failed to bind {}: {}", addr, e)))?;

    let state = AppState::new(bus.clone(), recorder.clone(), config.stream.jpeg_quality)
        .with_capture(capture.clone());
    let shutdown_bus = bus.clone();
    serve(listener, state, async move {
        shutdown_signal().await;
        log::info!("Shutting down");
        // ends every open MJPEG response so graceful shutdown can finish
        shutdown_bus.close();
    })
    .await?;

    if let Err(e) = capture.stop(Duration::from_secs(2)) {
        log::warn!("{}", e);
    }
    let chunks = tokio::task::spawn_blocking(move || recorder.stop()).await??;
    for chunk in &chunks {
        log::info!(
            "Chunk {}: {} frames, {:.1}s, {:.0} kbit/s",
            chunk.path,
            chunk.frames,
            chunk.duration_secs,
            chunk.avg_bitrate() / 1000.0
        );
    }

    Ok(())
}

fn spawn_capture(config: &CctvConfig, bus: FrameBus) -> Result<CaptureHandle, CctvError> {
    let format = config.frame_format();
    let max_failures = config.camera.max_capture_failures;

    #[cfg(feature = "camera")]
    if !config.camera.synthetic {
        let device = config.camera.device_index;
        return CaptureHandle::spawn(
            move || crabcctv::source::CameraSource::open(device, format),
            format,
            max_failures,
            bus,
        );
    }

    #[cfg(not(feature = "camera"))]
    if !config.camera.synthetic {
        log::warn!("Built without the camera feature, using the synthetic source");
    }

    CaptureHandle::spawn(
        move || Ok(SyntheticSource::new(format.width, format.height)),
        format,
        max_failures,
        bus,
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
