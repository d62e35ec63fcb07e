//! Camera and source lifecycle.
//!
//! The supervisor owns every frame channel's unlink authority, the handles of all
//! readers and workers, and the receiving end of every output channel. Physical
//! sources are reference counted by the logical cameras bound to them: the first
//! camera on a source creates its channel and reader, the last one to leave stops
//! the reader and unlinks the channel.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::camera::{CameraConfig, CameraId};
use crate::channel::{output_channel, OutputReceiver, SharedFrameChannel};
use crate::control::{StopFlag, Supervised, UnitExit};
use crate::detect::DetectorRegistry;
use crate::display::FrameSink;
use crate::error::PipelineError;
use crate::frame::MAX_FRAME_BYTES;
use crate::ingest::SourceId;
use crate::reader::{spawn_reader, ReaderExit, ReaderSettings};
use crate::worker::{spawn_worker, WorkerExit, WorkerSettings, WorkerSetup};

#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    /// Capacity of every frame channel.
    pub max_frame_bytes: usize,
    /// Depth of each worker's notification queue.
    pub notify_depth: usize,
    pub poll_interval: Duration,
    pub capture_pause: Duration,
    pub drain_interval: Duration,
    /// Bound on each stop; shutdown as a whole also finishes within it.
    pub stop_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            notify_depth: 5,
            poll_interval: Duration::from_millis(1),
            capture_pause: Duration::from_millis(1),
            drain_interval: Duration::from_millis(30),
            stop_timeout: Duration::from_millis(1000),
        }
    }
}

struct SourceEntry {
    channel: SharedFrameChannel,
    reader: Supervised<ReaderExit>,
    refcount: usize,
    reader_reported: bool,
}

struct CameraEntry {
    config: CameraConfig,
    worker: Supervised<WorkerExit>,
    output: OutputReceiver,
    errored: bool,
}

pub struct Supervisor {
    settings: SupervisorSettings,
    registry: DetectorRegistry,
    sources: HashMap<SourceId, SourceEntry>,
    cameras: BTreeMap<CameraId, CameraEntry>,
    next_id: CameraId,
    shut_down: bool,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, registry: DetectorRegistry) -> Self {
        Self {
            settings,
            registry,
            sources: HashMap::new(),
            cameras: BTreeMap::new(),
            next_id: 1,
            shut_down: false,
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Start a logical camera, creating its source's reader if needed.
    pub fn add_camera(&mut self, config: CameraConfig) -> Result<CameraId> {
        if self.shut_down {
            return Err(anyhow!("supervisor has been shut down"));
        }
        let id = self.next_id;
        self.acquire_source(&config.source)?;
        let channel = match self.sources.get(&config.source) {
            Some(entry) => entry.channel.clone(),
            None => return Err(anyhow!("source {} vanished while binding", config.source)),
        };
        let (worker, output) = match self.spawn_camera_worker(id, &config, &channel) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.release_source(&config.source);
                return Err(err);
            }
        };
        log::info!(
            "camera {} added on {} (model {})",
            id,
            config.source,
            config.model_name
        );
        self.cameras.insert(
            id,
            CameraEntry {
                config,
                worker,
                output,
                errored: false,
            },
        );
        self.next_id += 1;
        Ok(id)
    }

    /// Replace a camera's worker with one running `config`.
    ///
    /// Capture on the camera's source keeps running. A different source re-binds
    /// the camera and releases the old source.
    pub fn update_camera_config(&mut self, camera_id: CameraId, config: CameraConfig) -> Result<()> {
        let old_source = self
            .cameras
            .get(&camera_id)
            .map(|camera| camera.config.source.clone())
            .ok_or(PipelineError::UnknownCamera(camera_id))?;
        let new_source = config.source.clone();
        let source_changed = old_source != new_source;
        if source_changed {
            self.acquire_source(&new_source)?;
        }

        if let Err(err) = self.replace_worker(camera_id, config) {
            // The camera still holds its old config and source reference.
            if source_changed {
                self.release_source(&new_source);
            }
            return Err(err);
        }
        if source_changed {
            self.release_source(&old_source);
        }
        log::info!("camera {} reconfigured", camera_id);
        Ok(())
    }

    /// Stop a camera's worker and release its source. `false` if the id is unknown.
    pub fn remove_camera(&mut self, camera_id: CameraId) -> bool {
        let Some(mut camera) = self.cameras.remove(&camera_id) else {
            return false;
        };
        let exit = camera.worker.stop(self.settings.stop_timeout);
        log_exit(camera.worker.name(), exit);
        self.release_source(&camera.config.source);
        log::info!("camera {} removed", camera_id);
        true
    }

    /// Stop every worker, then every reader, then unlink every channel.
    ///
    /// All units are signalled first so the whole call finishes within one stop
    /// timeout. Later calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!(
            "shutting down {} cameras on {} sources",
            self.cameras.len(),
            self.sources.len()
        );

        for camera in self.cameras.values() {
            camera.worker.signal();
        }
        for source in self.sources.values() {
            source.reader.signal();
        }

        let deadline = Instant::now() + self.settings.stop_timeout;
        for (_, mut camera) in std::mem::take(&mut self.cameras) {
            let exit = camera.worker.join_until(deadline);
            log_exit(camera.worker.name(), exit);
        }
        for (_, mut source) in std::mem::take(&mut self.sources) {
            let exit = source.reader.join_until(deadline);
            log_exit(source.reader.name(), exit);
            source.channel.unlink();
        }
        log::info!("shutdown complete");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// One drain tick: forward pending output and report units that ended.
    ///
    /// Returns the number of frames forwarded.
    pub fn drain(&mut self, sink: &mut dyn FrameSink) -> usize {
        let mut forwarded = 0;
        for (id, camera) in self.cameras.iter_mut() {
            while let Some(message) = camera.output.poll() {
                match message.frame {
                    // An errored camera stays errored until its worker is replaced.
                    Some(_) if camera.errored => {
                        log::trace!("camera {}: discarding output after error", id);
                    }
                    Some(frame) => {
                        sink.on_frame(*id, Some(&frame));
                        forwarded += 1;
                    }
                    None => {
                        if !camera.errored {
                            sink.on_frame(*id, None);
                        }
                        camera.errored = true;
                    }
                }
            }
            if let Some(exit) = camera.worker.try_collect() {
                log_exit(camera.worker.name(), Some(exit));
                if !camera.errored {
                    sink.on_frame(*id, None);
                    camera.errored = true;
                }
            }
        }

        let mut ended = Vec::new();
        for (source, entry) in self.sources.iter_mut() {
            if entry.reader_reported {
                continue;
            }
            if let Some(exit) = entry.reader.try_collect() {
                log_exit(entry.reader.name(), Some(exit));
                entry.reader_reported = true;
                ended.push(source.clone());
            }
        }
        for (id, camera) in self.cameras.iter_mut() {
            if ended.contains(&camera.config.source) && !camera.errored {
                sink.on_frame(*id, None);
                camera.errored = true;
            }
        }
        sink.tick();
        forwarded
    }

    /// Drain on the configured tick until `stop` is raised, then shut down.
    pub fn run(&mut self, sink: &mut dyn FrameSink, stop: &StopFlag) {
        log::info!(
            "draining every {}ms",
            self.settings.drain_interval.as_millis()
        );
        while !stop.is_raised() {
            self.drain(sink);
            std::thread::sleep(self.settings.drain_interval);
        }
        self.drain(sink);
        self.shutdown();
    }

    pub fn camera_config(&self, camera_id: CameraId) -> Option<&CameraConfig> {
        self.cameras.get(&camera_id).map(|camera| &camera.config)
    }

    /// Configs ordered by camera id.
    pub fn camera_configs(&self) -> Vec<CameraConfig> {
        self.cameras
            .values()
            .map(|camera| camera.config.clone())
            .collect()
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.cameras.keys().copied().collect()
    }

    /// True once the camera's unit or source reported a failure or end of stream.
    pub fn is_errored(&self, camera_id: CameraId) -> bool {
        self.cameras
            .get(&camera_id)
            .is_some_and(|camera| camera.errored)
    }

    pub fn source_refcount(&self, source: &SourceId) -> usize {
        self.sources
            .get(source)
            .map_or(0, |entry| entry.refcount)
    }

    /// Sources with a channel, sorted.
    pub fn active_sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = self.sources.keys().cloned().collect();
        sources.sort();
        sources
    }

    pub fn channel(&self, source: &SourceId) -> Option<SharedFrameChannel> {
        self.sources.get(source).map(|entry| entry.channel.clone())
    }

    /// Take a reference on `source`, starting (or restarting) its reader.
    fn acquire_source(&mut self, source: &SourceId) -> Result<()> {
        if let Some(entry) = self.sources.get_mut(source) {
            if !entry.reader.is_finished() {
                entry.refcount += 1;
                return Ok(());
            }
        }

        let (channel, reader) = self.start_source(source)?;
        let (refcount, restarted) = match self.sources.remove(source) {
            Some(mut old) => {
                let exit = old.reader.try_collect();
                log_exit(old.reader.name(), exit);
                old.channel.unlink();
                log::info!("restarting source {}", source);
                (old.refcount + 1, true)
            }
            None => (1, false),
        };
        self.sources.insert(
            source.clone(),
            SourceEntry {
                channel,
                reader,
                refcount,
                reader_reported: false,
            },
        );
        if restarted {
            self.rebind_cameras(source);
        }
        Ok(())
    }

    fn start_source(
        &self,
        source: &SourceId,
    ) -> Result<(SharedFrameChannel, Supervised<ReaderExit>)> {
        let (channel, writer) = SharedFrameChannel::create(
            source.clone(),
            self.settings.max_frame_bytes,
            self.settings.notify_depth,
        )?;
        let reader = spawn_reader(
            source.clone(),
            writer,
            ReaderSettings {
                capture_pause: self.settings.capture_pause,
            },
        );
        match reader {
            Ok(reader) => {
                log::info!("source {} started on {}", source, channel.name());
                Ok((channel, reader))
            }
            Err(err) => {
                channel.unlink();
                Err(err)
            }
        }
    }

    /// Drop one reference on `source`; the last one stops its reader and unlinks.
    fn release_source(&mut self, source: &SourceId) {
        let Some(entry) = self.sources.get_mut(source) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return;
        }
        if let Some(mut entry) = self.sources.remove(source) {
            let exit = entry.reader.stop(self.settings.stop_timeout);
            log_exit(entry.reader.name(), exit);
            entry.channel.unlink();
            log::info!("source {} released", source);
        }
    }

    /// Give every camera on `source` a worker bound to its current channel.
    fn rebind_cameras(&mut self, source: &SourceId) {
        let ids: Vec<CameraId> = self
            .cameras
            .iter()
            .filter(|(_, camera)| &camera.config.source == source)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let Some(config) = self.camera_config(id).cloned() else {
                continue;
            };
            if let Err(err) = self.replace_worker(id, config) {
                log::error!("camera {}: failed to rebind to {}: {:#}", id, source, err);
            }
        }
    }

    fn replace_worker(&mut self, camera_id: CameraId, config: CameraConfig) -> Result<()> {
        let channel = self
            .channel(&config.source)
            .with_context(|| format!("no channel for source {}", config.source))?;
        let stop_timeout = self.settings.stop_timeout;
        {
            let camera = self
                .cameras
                .get_mut(&camera_id)
                .ok_or(PipelineError::UnknownCamera(camera_id))?;
            let exit = camera.worker.stop(stop_timeout);
            log_exit(camera.worker.name(), exit);
        }
        let (worker, output) = self.spawn_camera_worker(camera_id, &config, &channel)?;
        if let Some(camera) = self.cameras.get_mut(&camera_id) {
            camera.config = config;
            camera.worker = worker;
            camera.output = output;
            camera.errored = false;
        }
        Ok(())
    }

    fn spawn_camera_worker(
        &self,
        camera_id: CameraId,
        config: &CameraConfig,
        channel: &SharedFrameChannel,
    ) -> Result<(Supervised<WorkerExit>, OutputReceiver)> {
        let (tx, rx) = output_channel();
        let setup = WorkerSetup {
            camera_id,
            config: config.clone(),
            detector: self.registry.model_factory(&config.model_name),
            face_detector: if config.face_detection_enabled {
                self.registry.face_factory()
            } else {
                None
            },
        };
        let worker = spawn_worker(
            setup,
            channel.attach(),
            tx,
            WorkerSettings {
                poll_interval: self.settings.poll_interval,
            },
        )?;
        Ok((worker, rx))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn log_exit<T: std::fmt::Debug>(unit: &str, exit: Option<UnitExit<T>>) {
    match exit {
        Some(UnitExit::Finished(report)) => log::debug!("{} finished: {:?}", unit, report),
        Some(UnitExit::Failed(err)) => log::error!("{} failed: {:#}", unit, err),
        Some(UnitExit::Panicked) => log::error!("{} panicked", unit),
        Some(UnitExit::Unresponsive) => log::warn!("{} detached after stop timeout", unit),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            stop_timeout: Duration::from_millis(500),
            ..SupervisorSettings::default()
        }
    }

    fn stub(name: &str) -> SourceId {
        SourceId::Uri(format!("stub://{}?width=8&height=8&fps=100", name))
    }

    #[test]
    fn update_of_unknown_camera_fails() {
        let mut supervisor = Supervisor::new(settings(), DetectorRegistry::with_builtins());
        let err = supervisor
            .update_camera_config(42, CameraConfig::new(stub("a"), "stub"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownCamera(42))
        ));
    }

    #[test]
    fn camera_ids_increase() {
        let mut supervisor = Supervisor::new(settings(), DetectorRegistry::with_builtins());
        let a = supervisor.add_camera(CameraConfig::new(stub("ids"), "stub")).unwrap();
        let b = supervisor.add_camera(CameraConfig::new(stub("ids"), "stub")).unwrap();
        assert!(b > a);
        assert!(supervisor.remove_camera(a));
        let c = supervisor.add_camera(CameraConfig::new(stub("ids"), "stub")).unwrap();
        assert!(c > b);
        supervisor.shutdown();
    }

    #[test]
    fn add_after_shutdown_is_refused() {
        let mut supervisor = Supervisor::new(settings(), DetectorRegistry::with_builtins());
        supervisor.shutdown();
        assert!(supervisor
            .add_camera(CameraConfig::new(stub("late"), "stub"))
            .is_err());
    }

    #[test]
    fn moving_a_camera_between_sources_moves_the_reference() {
        let mut supervisor = Supervisor::new(settings(), DetectorRegistry::with_builtins());
        let id = supervisor.add_camera(CameraConfig::new(stub("one"), "stub")).unwrap();
        supervisor
            .update_camera_config(id, CameraConfig::new(stub("two"), "stub"))
            .unwrap();
        assert_eq!(supervisor.source_refcount(&stub("one")), 0);
        assert_eq!(supervisor.source_refcount(&stub("two")), 1);
        assert_eq!(supervisor.active_sources(), vec![stub("two")]);
        supervisor.shutdown();
    }
}
