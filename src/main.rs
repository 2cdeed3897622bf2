//! Still Capture CLI
//!
//! Drives the capture pipeline end to end: asks for camera permission,
//! binds a session to a stand-in preview surface, fires user triggers and
//! tears the surface down when done or on Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use still_capture::{
    capture::{CameraBackend, CapturedImage, FileConfig, FrameLedger, MockCamera, MockControl},
    metrics::{MetricsRegistry, MetricsSnapshot},
    permission::{FixedPermission, PermissionGate, PermissionState},
    session::{
        CaptureOrchestrator, LifecycleBinding, LifecycleHandle, PreviewSurface, TriggerOutcome,
    },
    CaptureError,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "still-capture", version, about = "Single-shot camera capture")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of capture triggers to fire.
    #[arg(long, default_value_t = 3)]
    triggers: u32,

    /// Delay between triggers in milliseconds.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Simulate the user denying camera permission.
    #[arg(long)]
    deny: bool,

    /// Make every n-th capture fail in the mock backend.
    #[arg(long)]
    fail_every: Option<u32>,

    /// Use the physical camera instead of the mock.
    #[cfg(feature = "camera")]
    #[arg(long)]
    device: bool,

    /// Serve Prometheus metrics on this port.
    #[cfg(feature = "metrics")]
    #[arg(long)]
    metrics_port: Option<u16>,
}

/// Preview surface that only counts frames.
#[derive(Default)]
struct LoggingSurface {
    frames: AtomicU64,
}

impl PreviewSurface for LoggingSurface {
    fn render(&self, frame: &CapturedImage) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 30 == 1 {
            debug!(frame = n, "Preview {}x{}", frame.width(), frame.height());
        }
    }

    fn on_detached(&self) {
        info!(
            frames = self.frames.load(Ordering::Relaxed),
            "Preview surface detached"
        );
    }
}

struct Backend {
    camera: Box<dyn CameraBackend>,
    ledger: Arc<FrameLedger>,
    control: Option<MockControl>,
}

fn build_backend(args: &Args) -> Result<Backend, Box<dyn std::error::Error>> {
    #[cfg(feature = "camera")]
    if args.device {
        let camera = still_capture::capture::NokhwaCamera::new()?;
        let ledger = Arc::clone(camera.ledger());
        info!("Using physical camera");
        return Ok(Backend {
            camera: Box::new(camera),
            ledger,
            control: None,
        });
    }

    let _ = args;
    let camera = MockCamera::new();
    let control = camera.control();
    info!("Using mock camera");
    Ok(Backend {
        ledger: Arc::clone(control.ledger()),
        camera: Box::new(camera),
        control: Some(control),
    })
}

fn load_config(args: &Args) -> Result<FileConfig, CaptureError> {
    match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Ok(FileConfig::from_file(path)?)
        }
        None => Ok(FileConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Still Capture v{}", still_capture::VERSION);

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            warn!("Interrupted, tearing down");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    let answer = if args.deny {
        PermissionState::Denied
    } else {
        PermissionState::Granted
    };
    let gate = PermissionGate::new(Arc::new(FixedPermission::new(answer))).with_denied_hook(
        Arc::new(|| warn!("Camera permission denied; capture disabled")),
    );

    let backend = build_backend(&args)?;
    let ledger = backend.ledger;
    let control = backend.control;
    let mut camera = Some(backend.camera);

    let mut binding = LifecycleBinding::new(
        gate,
        config.capture.clone(),
        config.preview.clone(),
        move || {
            camera
                .take()
                .ok_or(still_capture::capture::CameraError::NotInitialized)
        },
    );

    let screen = LifecycleHandle::new();
    let surface = config
        .preview
        .enabled
        .then(|| Arc::new(LoggingSurface::default()) as Arc<dyn PreviewSurface>);

    let controller = match binding.on_visible(screen, surface) {
        Ok(controller) => controller,
        Err(CaptureError::PermissionDenied) => {
            info!("Nothing to capture without camera permission");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let registry = MetricsRegistry::new()?;

    #[cfg(feature = "metrics")]
    {
        let port = args.metrics_port.unwrap_or(config.output.metrics_port);
        if port != 0 {
            use still_capture::metrics::{MetricsServer, MetricsServerConfig};
            let source_controller = controller.clone();
            let source_ledger = Arc::clone(&ledger);
            let server = MetricsServer::new(
                MetricsServerConfig::with_port(port),
                MetricsRegistry::new()?,
                move || {
                    MetricsSnapshot::from_components(
                        &source_controller.stats(),
                        Some(&*source_ledger),
                    )
                },
            );
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Metrics server failed: {}", e);
                }
            });
        }
    }

    let orchestrator = CaptureOrchestrator::new(
        controller.clone(),
        Arc::new(|image: CapturedImage| {
            println!(
                "Still #{} {}x{} at {}",
                image.sequence(),
                image.width(),
                image.height(),
                image.captured_at().to_rfc3339()
            );
        }),
    );

    let interval = Duration::from_millis(args.interval_ms);
    let mut delivered = 0u32;
    for i in 1..=args.triggers {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let (Some(control), Some(n)) = (&control, args.fail_every) {
            if n > 0 && i % n == 0 {
                control.fail_next_capture();
            }
        }

        match orchestrator.on_user_trigger().await? {
            TriggerOutcome::Delivered => delivered += 1,
            TriggerOutcome::Failed(kind) => debug!(trigger = i, kind = kind.as_str(), "Trigger failed"),
            TriggerOutcome::Dropped => debug!(trigger = i, "Trigger dropped"),
        }

        if i < args.triggers {
            tokio::time::sleep(interval).await;
        }
    }

    binding.on_destroyed(screen);

    let stats = controller.stats();
    info!(
        "Done. {} of {} triggers delivered, {} failed, frames outstanding: {}",
        delivered,
        args.triggers,
        stats.total_failures(),
        ledger.outstanding()
    );

    registry.update(&MetricsSnapshot::from_components(&stats, Some(&*ledger)));
    debug!("Final metrics:\n{}", registry.encode()?);

    Ok(())
}
