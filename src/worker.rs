//! Detection unit: one per logical camera.
//!
//! A worker waits on its private notification queue, copies the announced frame
//! out of the shared buffer, runs detection on the copy, draws the results and
//! offers the annotated frame to its single-slot output channel. Detection
//! failures cost one frame; failing to attach or to build a detector ends the
//! unit with the error sentinel on the output channel.

use std::time::Duration;

use anyhow::Result;

use crate::annotate;
use crate::camera::{CameraConfig, CameraId};
use crate::channel::{FrameSubscription, Notification, OutputSender};
use crate::control::{StopFlag, Supervised};
use crate::detect::{filter_detections, FaceDetector, FaceFactory, ObjectDetector, ObjectFactory};
use crate::error::PipelineError;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug)]
pub struct WorkerSettings {
    /// Upper bound on a single wait for a notification.
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Everything a worker is started with.
pub struct WorkerSetup {
    pub camera_id: CameraId,
    pub config: CameraConfig,
    /// Factory for `config.model_name`, `None` when the model is unknown.
    pub detector: Option<ObjectFactory>,
    /// Face detector factory; only consulted when face detection is enabled.
    pub face_detector: Option<FaceFactory>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub camera_id: CameraId,
    pub frames_processed: u64,
    pub stale_descriptors: u64,
    pub detection_failures: u64,
    pub outputs_dropped: u64,
}

/// Spawn a worker unit. `subscription` is the result of attaching to the
/// source's channel; an attach failure is handled inside the unit.
pub fn spawn_worker(
    setup: WorkerSetup,
    subscription: std::result::Result<FrameSubscription, PipelineError>,
    output: OutputSender,
    settings: WorkerSettings,
) -> Result<Supervised<WorkerExit>> {
    let name = format!("worker-{}", setup.camera_id);
    Supervised::spawn(name, move |stop| {
        run_worker(setup, subscription, output, settings, &stop)
    })
}

/// Worker body. Runs on the calling thread until stopped or the channel closes.
pub fn run_worker(
    setup: WorkerSetup,
    subscription: std::result::Result<FrameSubscription, PipelineError>,
    output: OutputSender,
    settings: WorkerSettings,
    stop: &StopFlag,
) -> Result<WorkerExit> {
    let camera_id = setup.camera_id;
    let fail = |err: anyhow::Error| -> Result<WorkerExit> {
        log::error!("worker {}: {:#}", camera_id, err);
        stop.raise();
        output.signal_error(camera_id);
        Err(err)
    };

    let subscription = match subscription {
        Ok(subscription) => subscription,
        Err(err) => return fail(err.into()),
    };
    let mut detector = match build_detector(&setup) {
        Ok(detector) => detector,
        Err(err) => return fail(err),
    };
    let mut face_detector = match build_face_detector(&setup) {
        Ok(face_detector) => face_detector,
        Err(err) => return fail(err),
    };

    log::info!(
        "worker {} started on {} (model {}, classes {:?}, faces {})",
        camera_id,
        subscription.channel_name(),
        setup.config.model_name,
        setup.config.target_classes,
        face_detector.is_some()
    );

    let mut exit = WorkerExit {
        camera_id,
        ..WorkerExit::default()
    };

    while !stop.is_raised() {
        let descriptor = match subscription.wait(settings.poll_interval) {
            Notification::Ready(descriptor) => descriptor,
            Notification::Empty => continue,
            Notification::Closed => {
                log::info!("worker {}: channel closed", camera_id);
                break;
            }
        };

        // Copy out and release the buffer before inference.
        let frame = {
            let view = match subscription.view(&descriptor) {
                Ok(Some(view)) => view,
                Ok(None) => {
                    exit.stale_descriptors += 1;
                    log::trace!("worker {}: descriptor {} is stale", camera_id, descriptor.token);
                    continue;
                }
                Err(err) => return fail(err),
            };
            match view.to_frame() {
                Ok(frame) => frame,
                Err(err) => return fail(err),
            }
        };

        let annotated = match process_frame(
            camera_id,
            &setup.config,
            detector.as_mut(),
            face_detector.as_deref_mut(),
            frame,
            &mut exit,
        ) {
            Ok(annotated) => annotated,
            Err(err) => {
                log::warn!("worker {}: annotation failed: {:#}", camera_id, err);
                continue;
            }
        };
        exit.frames_processed += 1;

        if !output.offer(camera_id, annotated) {
            exit.outputs_dropped += 1;
            log::trace!("worker {}: output slot full, frame dropped", camera_id);
        }
    }

    log::info!(
        "worker {} stopped ({} processed, {} stale, {} detection failures, {} dropped)",
        camera_id,
        exit.frames_processed,
        exit.stale_descriptors,
        exit.detection_failures,
        exit.outputs_dropped
    );
    Ok(exit)
}

fn build_detector(setup: &WorkerSetup) -> Result<Box<dyn ObjectDetector>> {
    let factory = setup
        .detector
        .as_ref()
        .ok_or_else(|| PipelineError::UnknownModel(setup.config.model_name.clone()))?;
    let mut detector = factory()?;
    detector.warm_up()?;
    Ok(detector)
}

fn build_face_detector(setup: &WorkerSetup) -> Result<Option<Box<dyn FaceDetector>>> {
    if !setup.config.face_detection_enabled {
        return Ok(None);
    }
    let Some(factory) = setup.face_detector.as_ref() else {
        log::warn!(
            "worker {}: face detection requested but no face detector is registered",
            setup.camera_id
        );
        return Ok(None);
    };
    let mut face_detector = factory()?;
    face_detector.warm_up()?;
    Ok(Some(face_detector))
}

/// Detect, filter and draw on the worker's private copy.
fn process_frame(
    camera_id: CameraId,
    config: &CameraConfig,
    detector: &mut dyn ObjectDetector,
    face_detector: Option<&mut (dyn FaceDetector + 'static)>,
    frame: Frame,
    exit: &mut WorkerExit,
) -> Result<Frame> {
    let detections = match detector.detect(&frame) {
        Ok(detections) => detections,
        Err(err) => {
            exit.detection_failures += 1;
            let err = PipelineError::Detection(format!("{:#}", err));
            log::warn!("worker {} ({}): {}", camera_id, detector.name(), err);
            Vec::new()
        }
    };
    let detections = filter_detections(detections, &config.target_classes);

    let faces = match face_detector {
        Some(face_detector) => match face_detector.detect_faces(&frame) {
            Ok(faces) => faces,
            Err(err) => {
                exit.detection_failures += 1;
                let err = PipelineError::Detection(format!("{:#}", err));
                log::warn!("worker {} ({}): {}", camera_id, face_detector.name(), err);
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    log::debug!(
        "worker {}: {} detections, {} faces",
        camera_id,
        detections.len(),
        faces.len()
    );

    annotate::annotate(frame, &detections, &faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    use crate::channel::{output_channel, SharedFrameChannel};
    use crate::detect::{BoundingBox, Detection, DetectorRegistry, StubBackend, StubFaceBackend};
    use crate::ingest::SourceId;

    struct FailingDetector;

    impl ObjectDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("inference backend crashed"))
        }
    }

    fn setup(config: CameraConfig, detector: Option<ObjectFactory>) -> WorkerSetup {
        WorkerSetup {
            camera_id: 7,
            config,
            detector,
            face_detector: None,
        }
    }

    fn black(width: u32, height: u32) -> Frame {
        Frame::from_rgb(width, height, vec![0; (width * height * 3) as usize]).unwrap()
    }

    #[test]
    fn unknown_model_sends_sentinel() {
        let source = SourceId::Uri("stub://worker".to_string());
        let (channel, _writer) = SharedFrameChannel::create(source.clone(), 1024, 5).unwrap();
        let (tx, rx) = output_channel();
        let config = CameraConfig::new(source, "no-such-model");
        let result = run_worker(
            setup(config, None),
            channel.attach(),
            tx,
            WorkerSettings::default(),
            &StopFlag::new(),
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownModel(_))
        ));
        let message = rx.poll().unwrap();
        assert_eq!(message.camera_id, 7);
        assert!(message.frame.is_none());
    }

    #[test]
    fn attach_failure_is_fatal() {
        let source = SourceId::Uri("stub://gone".to_string());
        let (channel, _writer) = SharedFrameChannel::create(source.clone(), 1024, 5).unwrap();
        channel.unlink();
        let (tx, rx) = output_channel();
        let stop = StopFlag::new();
        let factory = DetectorRegistry::with_builtins().model_factory("stub");
        let result = run_worker(
            setup(CameraConfig::new(source, "stub"), factory),
            channel.attach(),
            tx,
            WorkerSettings::default(),
            &stop,
        );
        assert!(result.is_err());
        assert!(stop.is_raised());
        assert!(rx.poll().unwrap().frame.is_none());
    }

    #[test]
    fn detection_failure_yields_unannotated_frame() {
        let config = CameraConfig::new(SourceId::Device(0), "failing");
        let mut exit = WorkerExit::default();
        let frame = black(8, 8);
        let out = process_frame(1, &config, &mut FailingDetector, None, frame.clone(), &mut exit).unwrap();
        assert_eq!(out, frame);
        assert_eq!(exit.detection_failures, 1);
    }

    #[test]
    fn target_classes_limit_what_is_drawn() {
        let config = CameraConfig::new(SourceId::Device(0), "stub").with_target_classes(["person"]);
        let mut detector = StubBackend::with_detections(vec![
            Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 0.5, 0.5)),
            Detection::new("car", 0.9, BoundingBox::new(0.5, 0.5, 0.5, 0.5)),
        ]);
        let mut exit = WorkerExit::default();
        let out = process_frame(1, &config, &mut detector, None, black(20, 20), &mut exit).unwrap();
        let bytes = out.as_bytes();
        // person box corner drawn, car box corner untouched
        assert_eq!(&bytes[0..3], &[0u8, 255, 0]);
        let car_corner = ((19 * 20 + 19) * 3) as usize;
        assert_eq!(&bytes[car_corner..car_corner + 3], &[0u8, 0, 0]);
    }

    #[test]
    fn faces_are_drawn_alongside_objects() {
        let config = CameraConfig::new(SourceId::Device(0), "stub").with_face_detection(true);
        let mut detector = StubBackend::with_detections(vec![Detection::new(
            "person",
            0.8,
            BoundingBox::new(0.0, 0.5, 0.5, 0.5),
        )]);
        let mut faces: Box<dyn FaceDetector> = Box::new(StubFaceBackend::with_faces(vec![
            BoundingBox::new(0.5, 0.0, 0.5, 0.5),
        ]));
        let mut exit = WorkerExit::default();
        let out = process_frame(
            1,
            &config,
            &mut detector,
            Some(faces.as_mut()),
            black(40, 40),
            &mut exit,
        )
        .unwrap();
        let pixel = |x: u32, y: u32| {
            let offset = ((y * 40 + x) * 3) as usize;
            out.as_bytes()[offset..offset + 3].to_vec()
        };
        // object box left edge at x = 0, y = 20..39
        assert_eq!(pixel(0, 30), vec![0, 255, 0]);
        // face box left edge at x = 20, y = 0..20
        assert_eq!(pixel(20, 10), vec![0, 0, 255]);
        assert_eq!(pixel(30, 10), vec![0, 0, 0]);
        assert_eq!(exit.detection_failures, 0);
    }

    #[test]
    fn face_detector_survives_repeated_frames() {
        let config = CameraConfig::new(SourceId::Device(0), "stub").with_face_detection(true);
        let mut detector = StubBackend::new();
        let mut faces: Option<Box<dyn FaceDetector>> = Some(Box::new(StubFaceBackend::with_faces(
            vec![BoundingBox::new(0.25, 0.25, 0.5, 0.5)],
        )));
        let mut exit = WorkerExit::default();
        for _ in 0..3 {
            let out = process_frame(
                1,
                &config,
                &mut detector,
                faces.as_deref_mut(),
                black(8, 8),
                &mut exit,
            )
            .unwrap();
            assert_eq!(&out.as_bytes()[(2 * 8 + 2) * 3..(2 * 8 + 2) * 3 + 3], &[0u8, 0, 255]);
        }
    }

    #[test]
    fn stale_descriptor_is_skipped_and_fresh_frame_published() {
        let source = SourceId::Uri("stub://fresh".to_string());
        let (channel, mut writer) = SharedFrameChannel::create(source.clone(), 1024, 5).unwrap();
        let subscription = channel.attach();
        let (tx, rx) = output_channel();
        let factory = DetectorRegistry::with_builtins().model_factory("stub");
        let stop = StopFlag::new();
        let worker_stop = stop.clone();

        for fill in 1..=3u8 {
            writer
                .publish(&Frame::from_rgb(2, 2, vec![fill; 12]).unwrap())
                .unwrap();
        }
        let handle = std::thread::spawn(move || {
            run_worker(
                setup(CameraConfig::new(source, "stub"), factory),
                subscription,
                tx,
                WorkerSettings::default(),
                &worker_stop,
            )
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let message = loop {
            if let Some(message) = rx.poll() {
                break message;
            }
            assert!(std::time::Instant::now() < deadline, "no output");
            std::thread::sleep(Duration::from_millis(1));
        };
        stop.raise();
        let exit = handle.join().unwrap().unwrap();
        assert_eq!(message.frame.unwrap().as_bytes(), &[3u8; 12][..]);
        assert_eq!(exit.frames_processed, 1);
    }
}
