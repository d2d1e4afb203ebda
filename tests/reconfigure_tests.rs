// SPDX-License-Identifier: GPL-3.0-only

//! Live reconfiguration and calibration-mode stream switching

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kinect_camera::backends::kinect::{
    SimulatedContext, SimulatedControl, SimulatedScene, StreamKind,
};
use kinect_camera::calibration::DefaultCalibration;
use kinect_camera::driver::VideoStream;
use kinect_camera::transport::{Message, MemoryPublisher};
use kinect_camera::{ConfigRequest, DriverError, DriverSettings, KinectDriver};

fn setup(period_ms: u64) -> (KinectDriver, SimulatedControl, Arc<MemoryPublisher>) {
    let context = SimulatedContext::new(1, SimulatedScene::default());
    let control = context.control();
    let publisher = Arc::new(MemoryPublisher::new());
    let settings = DriverSettings {
        stream_switch_period_ms: period_ms,
        ..Default::default()
    };
    let driver = KinectDriver::new(
        Box::new(context),
        Arc::new(DefaultCalibration),
        publisher.clone(),
        settings,
    )
    .unwrap();
    driver.init(0).unwrap();
    (driver, control, publisher)
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_roi_overflow_rejected_config_unchanged() {
    let (driver, _, _) = setup(1000);
    let before = driver.config();
    let err = driver
        .reconfigure(&ConfigRequest {
            roi_horiz_start: 600,
            roi_horiz_width: 100,
            ..Default::default()
        })
        .unwrap_err();
    match err {
        DriverError::InvalidConfiguration(e) => assert_eq!(e.field, "roi_horiz_width"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(driver.config(), before);
}

#[test]
fn test_zero_area_roi_yields_empty_clouds() {
    let (driver, _, publisher) = setup(1000);
    driver
        .reconfigure(&ConfigRequest {
            roi_horiz_width: 0,
            ..Default::default()
        })
        .unwrap();
    driver.start().unwrap();
    assert!(driver.ok());

    let mut clouds = 0;
    for message in publisher.take() {
        match message {
            Message::Points(p) => {
                assert!(p.is_empty());
                clouds += 1;
            }
            Message::StructuredPoints(s) => {
                assert!(s.cloud.is_empty());
                clouds += 1;
            }
            _ => {}
        }
    }
    assert_eq!(clouds, 2);
}

#[test]
fn test_disabling_color_stops_video() {
    let (driver, control, publisher) = setup(1000);
    driver.start().unwrap();
    assert!(control.is_running(StreamKind::Color));

    driver
        .reconfigure(&ConfigRequest {
            enable_color_stream: false,
            ..Default::default()
        })
        .unwrap();
    assert!(!control.is_running(StreamKind::Color));
    assert!(control.is_running(StreamKind::Depth));

    publisher.take();
    assert!(driver.ok());
    assert!(!publisher.topics().contains(&"rgb/image"));
}

#[test]
fn test_calibration_mode_alternates_streams() {
    let (driver, control, _) = setup(10);
    driver.start().unwrap();
    let effective = driver
        .reconfigure(&ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        })
        .unwrap();
    assert!(effective.calibration_mode);

    let mut saw_infrared = false;
    let mut saw_color_again = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && !(saw_infrared && saw_color_again) {
        let running = control.running_streams();
        assert!(
            !(running.contains(&StreamKind::Color) && running.contains(&StreamKind::Infrared)),
            "color and infrared must never run together"
        );
        if running.contains(&StreamKind::Infrared) {
            saw_infrared = true;
        } else if saw_infrared && running.contains(&StreamKind::Color) {
            saw_color_again = true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(saw_infrared, "timer never switched to infrared");
    assert!(saw_color_again, "timer never switched back to color");
    driver.shutdown();
}

#[test]
fn test_disabling_calibration_mode_disarms_timer() {
    let (driver, control, _) = setup(5);
    driver.start().unwrap();
    driver
        .reconfigure(&ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        })
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || control
        .is_running(StreamKind::Infrared)));

    driver.reconfigure(&ConfigRequest::default()).unwrap();
    assert_eq!(driver.config().active_video, Some(VideoStream::Color));
    assert!(control.is_running(StreamKind::Color));

    // No late tick may switch back
    let starts = control.stream_starts().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(control.stream_starts().len(), starts);
    assert!(control.is_running(StreamKind::Color));
}

#[test]
fn test_infrared_frames_published_with_depth_calibration() {
    let (driver, _, publisher) = setup(5);
    driver
        .reconfigure(&ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        })
        .unwrap();
    driver.start().unwrap();
    let published = wait_for(Duration::from_secs(5), || {
        driver.ok();
        publisher.topics().contains(&"ir/image")
    });
    assert!(published, "infrared image never published");

    let messages = publisher.take();
    let ir = messages
        .iter()
        .find_map(|m| match m {
            Message::InfraredImage(i) => Some(i),
            _ => None,
        })
        .unwrap();
    assert_eq!(ir.header.frame_id, driver.settings().depth_frame_id);
    let info = messages
        .iter()
        .find_map(|m| match m {
            Message::InfraredInfo(i) => Some(i),
            _ => None,
        })
        .unwrap();
    assert!((info.k[0] - 594.21).abs() < 1e-9);
    driver.shutdown();
}

#[test]
fn test_stop_disarms_switch_timer() {
    let (driver, control, _) = setup(5);
    driver
        .reconfigure(&ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        })
        .unwrap();
    driver.start().unwrap();
    driver.stop();

    let starts = control.stream_starts().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(control.stream_starts().len(), starts);
    assert!(control.running_streams().is_empty());
}

#[test]
fn test_concurrent_mode_toggle_keeps_timer_alive() {
    for trial in 0..25 {
        let (driver, control, _) = setup(1);
        driver.start().unwrap();
        let calibration = ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        };
        driver.reconfigure(&calibration).unwrap();

        let poller = {
            let driver = driver.clone();
            thread::spawn(move || {
                while driver.ok() {
                    thread::yield_now();
                }
            })
        };

        let disabler = {
            let driver = driver.clone();
            thread::spawn(move || driver.reconfigure(&ConfigRequest::default()))
        };
        thread::sleep(Duration::from_millis(1));
        driver.reconfigure(&calibration).unwrap();
        disabler.join().unwrap().unwrap();

        // Whichever update landed last decides whether the streams keep switching
        if driver.config().calibration_mode {
            let starts = control.stream_starts().len();
            assert!(
                wait_for(Duration::from_secs(5), || control.stream_starts().len() > starts + 2),
                "trial {}: calibration mode on but streams stopped switching",
                trial
            );
        }

        driver.shutdown();
        poller.join().unwrap();
    }
}

#[test]
fn test_failed_stream_switch_keeps_previous_config() {
    let (driver, control, _) = setup(1000);
    driver
        .reconfigure(&ConfigRequest {
            enable_color_stream: false,
            ..Default::default()
        })
        .unwrap();
    driver.start().unwrap();
    let before = driver.config();
    assert!(!control.is_running(StreamKind::Color));

    control.set_fail_start(Some(StreamKind::Color));
    let err = driver
        .reconfigure(&ConfigRequest {
            roi_horiz_width: 100,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DriverError::Stream(_)));

    let after = driver.config();
    assert_eq!(after.to_request(), before.to_request());
    assert_eq!(after.active_video, None);
    assert_eq!(after.roi.width, 640);
    assert!(control.is_running(StreamKind::Depth));
    assert!(!control.is_running(StreamKind::Color));

    // Once the endpoint responds again the same record goes through
    control.set_fail_start(None);
    let effective = driver
        .reconfigure(&ConfigRequest {
            roi_horiz_width: 100,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(effective.roi_horiz_width, 100);
    assert!(control.is_running(StreamKind::Color));
}
