//! Real camera backend built on `nokhwa`.
//!
//! `nokhwa` camera handles are not guaranteed to be `Send`, so the device
//! lives on a dedicated worker thread and the backend talks to it over a
//! channel. The worker owns the stream from `open` until `close`.

use super::camera::{CameraBackend, CameraError, FrameLedger};
use super::{CaptureConfig, PixelFormat, PreviewConfig, RawFrame};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

type Reply<T> = mpsc::Sender<Result<T, CameraError>>;

enum Command {
    Open(CaptureConfig, Reply<()>),
    Frame(Reply<RawFrame>),
    Close(mpsc::Sender<()>),
}

/// Camera backend driving a physical device through `nokhwa`.
pub struct NokhwaCamera {
    commands: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
    ledger: Arc<FrameLedger>,
    open: bool,
}

impl NokhwaCamera {
    /// Spawns the device worker. The device itself is opened by `open`.
    pub fn new() -> Result<Self, CameraError> {
        let (commands, rx) = mpsc::channel();
        let ledger = Arc::new(FrameLedger::default());
        let worker_ledger = Arc::clone(&ledger);

        let worker = std::thread::Builder::new()
            .name("camera-device".into())
            .spawn(move || run_worker(rx, worker_ledger))
            .map_err(|e| CameraError::OpenFailed(e.to_string()))?;

        Ok(Self {
            commands,
            worker: Some(worker),
            ledger,
            open: false,
        })
    }

    /// Frame accounting for every frame this camera produced.
    pub fn ledger(&self) -> &Arc<FrameLedger> {
        &self.ledger
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, CameraError> {
        let (tx, rx) = mpsc::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| CameraError::CaptureFailed("camera worker stopped".into()))?;
        rx.recv()
            .map_err(|_| CameraError::CaptureFailed("camera worker stopped".into()))?
    }
}

impl CameraBackend for NokhwaCamera {
    fn open(
        &mut self,
        capture: &CaptureConfig,
        _preview: &PreviewConfig,
    ) -> Result<(), CameraError> {
        capture
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        let capture = capture.clone();
        self.request(|reply| Command::Open(capture, reply))?;
        self.open = true;
        Ok(())
    }

    fn acquire_still(&mut self) -> Result<RawFrame, CameraError> {
        if !self.open {
            return Err(CameraError::NotInitialized);
        }
        self.request(Command::Frame)
    }

    fn acquire_preview(&mut self) -> Result<RawFrame, CameraError> {
        // Single still-mode stream; the surface scales what it receives.
        self.acquire_still()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let (tx, rx) = mpsc::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.close();
        // Hanging up the channel ends the worker loop.
        let (dead, _) = mpsc::channel();
        self.commands = dead;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(rx: mpsc::Receiver<Command>, ledger: Arc<FrameLedger>) {
    let mut camera: Option<Camera> = None;
    let mut sequence = 0u64;

    while let Ok(command) = rx.recv() {
        match command {
            Command::Open(config, reply) => {
                if let Some(mut previous) = camera.take() {
                    let _ = previous.stop_stream();
                }
                let result = open_device(&config).map(|cam| {
                    camera = Some(cam);
                });
                let _ = reply.send(result);
            }
            Command::Frame(reply) => {
                let result = match camera.as_mut() {
                    Some(cam) => {
                        sequence += 1;
                        grab(cam, sequence).map(|frame| ledger.track(frame))
                    }
                    None => Err(CameraError::NotInitialized),
                };
                let _ = reply.send(result);
            }
            Command::Close(done) => {
                if let Some(mut cam) = camera.take() {
                    if let Err(e) = cam.stop_stream() {
                        tracing::warn!(error = %e, "Failed to stop camera stream");
                    }
                    tracing::info!("Camera device closed");
                }
                let _ = done.send(());
            }
        }
    }

    if let Some(mut cam) = camera.take() {
        let _ = cam.stop_stream();
    }
}

fn open_device(config: &CaptureConfig) -> Result<Camera, CameraError> {
    let format = CameraFormat::new(
        Resolution::new(config.width, config.height),
        FrameFormat::MJPEG,
        config.fps,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut camera = Camera::new(CameraIndex::Index(config.device_id), requested)
        .map_err(|e| CameraError::DeviceNotFound(e.to_string()))?;
    camera
        .open_stream()
        .map_err(|e| CameraError::OpenFailed(e.to_string()))?;

    tracing::info!(
        device_id = config.device_id,
        format = ?camera.camera_format(),
        "Camera device opened"
    );
    Ok(camera)
}

fn grab(camera: &mut Camera, sequence: u64) -> Result<RawFrame, CameraError> {
    let buffer = camera
        .frame()
        .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width(), resolution.height());

    let (data, format) = match buffer.source_frame_format() {
        FrameFormat::MJPEG => (buffer.buffer().to_vec(), PixelFormat::Jpeg),
        FrameFormat::YUYV => (buffer.buffer().to_vec(), PixelFormat::Yuyv),
        FrameFormat::GRAY => (buffer.buffer().to_vec(), PixelFormat::Gray8),
        _ => {
            let rgb = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
            (rgb.into_raw(), PixelFormat::Rgb8)
        }
    };

    Ok(RawFrame::new(data, width, height, format, sequence))
}
