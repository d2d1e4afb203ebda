// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Streaming and publishing (with optional PNG snapshots)
//! - Listing attached sensors
//! - Inspecting and writing calibration files

use chrono::Local;
#[cfg(feature = "libfreenect")]
use kinect_camera::backends::kinect::FreenectContext;
use kinect_camera::backends::kinect::{KinectContext, SimulatedContext, SimulatedScene};
use kinect_camera::calibration::{self, CalibrationFile, CalibrationProvider};
use kinect_camera::media::{mono8_image, rgb8_image, save_png};
use kinect_camera::transport::{ChannelPublisher, Encoding, ImageMessage, MemoryPublisher, Message};
use kinect_camera::{ConfigRequest, DriverSettings, KinectDriver};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

pub struct RunOptions {
    pub settings: Option<PathBuf>,
    pub hardware: bool,
    pub devices: usize,
    pub frames: Option<u64>,
    pub fps: u32,
    pub calibration_mode: bool,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
}

fn calibration_provider(
    settings: &DriverSettings,
) -> Result<Arc<dyn CalibrationProvider>, Box<dyn std::error::Error>> {
    let provider = calibration::provider_for(settings.calibration_path.as_deref())?;
    Ok(Arc::from(provider))
}

/// Sensor source: physical sensors, or `devices` simulated ones
fn open_context(
    hardware: bool,
    devices: usize,
) -> Result<(Box<dyn KinectContext>, &'static str), Box<dyn std::error::Error>> {
    if hardware {
        return Ok((hardware_context()?, "Kinect"));
    }
    let context = SimulatedContext::new(devices, SimulatedScene::default());
    Ok((Box::new(context), "Simulated Kinect"))
}

#[cfg(feature = "libfreenect")]
fn hardware_context() -> Result<Box<dyn KinectContext>, Box<dyn std::error::Error>> {
    Ok(Box::new(FreenectContext::new()?))
}

#[cfg(not(feature = "libfreenect"))]
fn hardware_context() -> Result<Box<dyn KinectContext>, Box<dyn std::error::Error>> {
    Err("built without hardware support (rebuild with --features libfreenect)".into())
}

/// Stream until Ctrl+C or the frame limit, publishing over a channel
pub fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let settings = DriverSettings::load_or_default(options.settings.as_deref())?;
    let calibration = calibration_provider(&settings)?;
    let (publisher, receiver) = ChannelPublisher::new();

    let (context, _) = open_context(options.hardware, options.devices)?;
    let driver = KinectDriver::new(
        context,
        calibration,
        Arc::new(publisher),
        settings.clone(),
    )?;

    driver.init(settings.device_index)?;
    if options.calibration_mode {
        let request = ConfigRequest {
            calibration_mode: true,
            enable_color_stream: true,
            ..driver.config().to_request()
        };
        driver.reconfigure(&request)?;
    }
    driver.start()?;
    println!(
        "Streaming from device {} (press Ctrl+C to stop)",
        settings.device_index
    );

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let rt = tokio::runtime::Runtime::new()?;
    let drain = rt.spawn(drain_messages(
        receiver,
        options.snapshot_dir.clone(),
        options.snapshot_every.max(1),
    ));

    let interval = Duration::from_secs_f64(1.0 / options.fps.max(1) as f64);
    let start = Instant::now();
    let mut steps = 0u64;
    while !stop_flag.load(Ordering::SeqCst) {
        if options.frames.is_some_and(|limit| steps >= limit) {
            break;
        }
        if !driver.ok() {
            warn!("Driver session ended");
            break;
        }
        steps += 1;
        std::thread::sleep(interval);
    }

    driver.stop();
    driver.shutdown();
    // The publisher lives inside the driver; dropping it closes the channel
    drop(driver);
    let counts = rt.block_on(drain)?;

    println!(
        "Stopped after {} steps in {:.1}s",
        steps,
        start.elapsed().as_secs_f64()
    );
    for (topic, count) in counts {
        println!("  {:<26} {}", topic, count);
    }
    Ok(())
}

/// Consume published messages, counting per topic and writing snapshots
async fn drain_messages(
    mut receiver: UnboundedReceiver<Message>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
) -> BTreeMap<&'static str, u64> {
    let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let session = Local::now().format("%Y%m%d_%H%M%S").to_string();

    while let Some(message) = receiver.recv().await {
        let topic = message.topic();
        let count = counts.entry(topic).or_insert(0);
        *count += 1;

        let Some(dir) = snapshot_dir.as_ref() else {
            continue;
        };
        if (*count - 1) % snapshot_every != 0 {
            continue;
        }
        let image = match message {
            Message::ColorImage(m) | Message::InfraredImage(m) | Message::DepthImage(m) => m,
            _ => continue,
        };
        let path = dir.join(format!(
            "{}_{}_{:06}.png",
            session,
            topic.replace('/', "_"),
            image.header.seq
        ));
        // PNG encoding is CPU-bound, keep it off the runtime threads
        let result = tokio::task::spawn_blocking(move || write_snapshot(&image, &path)).await;
        match result {
            Ok(Ok(path)) => info!(path = %path.display(), "Snapshot written"),
            Ok(Err(e)) => warn!(error = %e, "Failed to write snapshot"),
            Err(e) => warn!(error = %e, "Snapshot task failed"),
        }
    }
    counts
}

fn write_snapshot(image: &ImageMessage, path: &Path) -> Result<PathBuf, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let dynamic = match image.encoding {
        Encoding::Rgb8 => {
            rgb8_image(&image.data, image.width, image.height).map(image::DynamicImage::ImageRgb8)
        }
        Encoding::Mono8 => {
            mono8_image(&image.data, image.width, image.height).map(image::DynamicImage::ImageLuma8)
        }
    }
    .ok_or_else(|| format!("{}x{} buffer size mismatch", image.width, image.height))?;
    save_png(&dynamic, path).map_err(|e| e.to_string())?;
    Ok(path.to_path_buf())
}

/// List all attached sensors
pub fn list_devices(
    settings: Option<PathBuf>,
    hardware: bool,
    devices: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = DriverSettings::load_or_default(settings.as_deref())?;
    let (context, label) = open_context(hardware, devices)?;
    let driver = KinectDriver::new(
        context,
        calibration_provider(&settings)?,
        Arc::new(MemoryPublisher::new()),
        settings,
    )?;

    let count = driver.device_count();
    if count == 0 {
        println!("No sensors found.");
        return Ok(());
    }

    println!("Available sensors:");
    println!();
    for index in 0..count {
        println!("  [{}] {}", index, label);
    }
    Ok(())
}

/// Print the calibration in use, or write the factory defaults
pub fn calibration(
    settings: Option<PathBuf>,
    file: Option<PathBuf>,
    write: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = DriverSettings::load_or_default(settings.as_deref())?;
    let path = file
        .or(settings.calibration_path)
        .or_else(CalibrationFile::default_path)
        .ok_or("No calibration path and no config directory")?;

    if write {
        CalibrationFile::kinect_defaults().save(&path)?;
        println!("Calibration written: {}", path.display());
        return Ok(());
    }

    let contents = if path.exists() {
        println!("Calibration file: {}", path.display());
        CalibrationFile::load(&path)?
    } else {
        println!("No calibration file at {}, using factory values", path.display());
        CalibrationFile::kinect_defaults()
    };
    println!("{}", serde_json::to_string_pretty(&contents)?);
    Ok(())
}
