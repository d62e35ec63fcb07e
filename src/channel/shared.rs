//! Fixed-capacity frame buffer with bounded descriptor notifications.
//!
//! One `SharedFrameChannel` exists per physical source. It has exactly one write
//! side (`FrameWriter`, owned by the source's reader) and any number of read-only
//! attachments (`FrameSubscription`, one per bound worker). Each attachment gets a
//! private bounded notification queue so workers sharing a source never steal each
//! other's notifications.
//!
//! Publishing favors freshness: the buffer always holds the newest accepted frame,
//! a full notification queue drops the new descriptor, and a reader holding an old
//! descriptor is refused instead of being handed bytes from a newer write.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use rand::RngCore;

use crate::error::PipelineError;
use crate::frame::{Frame, FrameDescriptor};
use crate::ingest::SourceId;

/// Unique, log-friendly channel name.
pub fn channel_name() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("multicam_{}", hex::encode(bytes))
}

struct Slot {
    header: Option<FrameDescriptor>,
    bytes: Box<[u8]>,
}

struct ChannelInner {
    name: String,
    source: SourceId,
    capacity: usize,
    notify_depth: usize,
    slot: RwLock<Slot>,
    subscribers: Mutex<Vec<Sender<FrameDescriptor>>>,
    unlinked: AtomicBool,
    published: AtomicU64,
    rejected: AtomicU64,
    dropped_notifications: AtomicU64,
}

/// Counters kept by a channel since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub published: u64,
    pub rejected: u64,
    pub dropped_notifications: u64,
}

/// Supervisor-side handle. Holds unlink authority.
#[derive(Clone)]
pub struct SharedFrameChannel {
    inner: Arc<ChannelInner>,
}

impl SharedFrameChannel {
    /// Allocate a channel and its single write side.
    pub fn create(
        source: SourceId,
        capacity_bytes: usize,
        notify_depth: usize,
    ) -> Result<(Self, FrameWriter)> {
        if capacity_bytes == 0 {
            return Err(anyhow!("frame channel capacity must be > 0"));
        }
        if notify_depth == 0 {
            return Err(anyhow!("notification queue depth must be >= 1"));
        }
        let inner = Arc::new(ChannelInner {
            name: channel_name(),
            source,
            capacity: capacity_bytes,
            notify_depth,
            slot: RwLock::new(Slot {
                header: None,
                bytes: vec![0u8; capacity_bytes].into_boxed_slice(),
            }),
            subscribers: Mutex::new(Vec::new()),
            unlinked: AtomicBool::new(false),
            published: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped_notifications: AtomicU64::new(0),
        });
        log::debug!(
            "frame channel {} created for {} ({} bytes, depth {})",
            inner.name,
            inner.source,
            capacity_bytes,
            notify_depth
        );
        let writer = FrameWriter {
            inner: inner.clone(),
        };
        Ok((Self { inner }, writer))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn source(&self) -> &SourceId {
        &self.inner.source
    }

    pub fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    /// Token of the newest accepted frame, 0 when nothing was published yet.
    pub fn generation(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            published: self.inner.published.load(Ordering::Acquire),
            rejected: self.inner.rejected.load(Ordering::Acquire),
            dropped_notifications: self.inner.dropped_notifications.load(Ordering::Acquire),
        }
    }

    pub fn subscriber_count(&self) -> std::result::Result<usize, PipelineError> {
        self.inner
            .subscribers
            .lock()
            .map(|subs| subs.len())
            .map_err(|_| PipelineError::LockPoisoned("channel subscribers"))
    }

    pub fn is_unlinked(&self) -> bool {
        self.inner.unlinked.load(Ordering::Acquire)
    }

    /// Bind a new read-only attachment with its own notification queue.
    pub fn attach(&self) -> std::result::Result<FrameSubscription, PipelineError> {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .map_err(|_| PipelineError::LockPoisoned("channel subscribers"))?;
        if self.is_unlinked() {
            return Err(PipelineError::ChannelAttach {
                channel: self.inner.name.clone(),
                reason: "channel has been unlinked".to_string(),
            });
        }
        let (tx, rx) = crossbeam_channel::bounded(self.inner.notify_depth);
        subscribers.push(tx);
        Ok(FrameSubscription {
            inner: self.inner.clone(),
            rx,
        })
    }

    /// Release the channel. Disconnects every attachment; later attaches fail.
    ///
    /// Returns `false` when the channel was already unlinked.
    pub fn unlink(&self) -> bool {
        if self.inner.unlinked.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.clear();
        }
        log::info!(
            "frame channel {} for {} unlinked",
            self.inner.name,
            self.inner.source
        );
        true
    }

    /// View whatever frame the buffer currently holds.
    pub fn latest(&self) -> Result<Option<FrameView<'_>>> {
        read_view(&self.inner, None)
    }
}

/// Write side of a channel. Exactly one exists per channel; dropping it detaches
/// the writer without unlinking the channel.
///
/// ```compile_fail
/// fn needs_clone<T: Clone>() {}
/// needs_clone::<multicam::channel::FrameWriter>();
/// ```
pub struct FrameWriter {
    inner: Arc<ChannelInner>,
}

/// Result of an accepted publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub token: u64,
    pub delivered: usize,
    pub dropped: usize,
}

impl FrameWriter {
    pub fn channel_name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    /// Copy `frame` into the buffer and notify every attachment.
    ///
    /// Oversized frames are rejected before anything is touched, leaving the
    /// previous frame and its descriptor intact.
    pub fn publish(&mut self, frame: &Frame) -> std::result::Result<PublishOutcome, PipelineError> {
        let len = frame.byte_len();
        if len > self.inner.capacity {
            self.inner.rejected.fetch_add(1, Ordering::AcqRel);
            return Err(PipelineError::FrameTooLarge {
                len,
                capacity: self.inner.capacity,
            });
        }

        let descriptor = {
            let mut slot = self
                .inner
                .slot
                .write()
                .map_err(|_| PipelineError::LockPoisoned("frame buffer"))?;
            slot.bytes[..len].copy_from_slice(frame.as_bytes());
            let token = self.inner.published.load(Ordering::Acquire) + 1;
            let descriptor = FrameDescriptor {
                shape: frame.shape(),
                element: frame.element(),
                token,
            };
            slot.header = Some(descriptor);
            self.inner.published.store(token, Ordering::Release);
            descriptor
        };

        let mut delivered = 0;
        let mut dropped = 0;
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .map_err(|_| PipelineError::LockPoisoned("channel subscribers"))?;
        subscribers.retain(|tx| match tx.try_send(descriptor) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        drop(subscribers);

        if dropped > 0 {
            self.inner
                .dropped_notifications
                .fetch_add(dropped as u64, Ordering::AcqRel);
        }

        Ok(PublishOutcome {
            token: descriptor.token,
            delivered,
            dropped,
        })
    }
}

/// Result of waiting on a notification queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    Ready(FrameDescriptor),
    Empty,
    Closed,
}

/// Read-only attachment held by one worker.
pub struct FrameSubscription {
    inner: Arc<ChannelInner>,
    rx: Receiver<FrameDescriptor>,
}

impl FrameSubscription {
    pub fn channel_name(&self) -> &str {
        &self.inner.name
    }

    /// Non-blocking poll. Drains the queue and returns the newest descriptor.
    pub fn consume(&self) -> Option<FrameDescriptor> {
        let mut latest = None;
        while let Ok(descriptor) = self.rx.try_recv() {
            latest = Some(descriptor);
        }
        latest
    }

    /// Wait at most `timeout` for a notification, then drain to the newest one.
    pub fn wait(&self, timeout: Duration) -> Notification {
        if self.inner.unlinked.load(Ordering::Acquire) {
            return Notification::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(first) => Notification::Ready(self.consume().unwrap_or(first)),
            Err(RecvTimeoutError::Timeout) => Notification::Empty,
            Err(RecvTimeoutError::Disconnected) => Notification::Closed,
        }
    }

    /// Rebuild a view for `descriptor`. `None` when a newer frame replaced it.
    pub fn view(&self, descriptor: &FrameDescriptor) -> Result<Option<FrameView<'_>>> {
        read_view(&self.inner, Some(descriptor.token))
    }
}

fn read_view(inner: &ChannelInner, token: Option<u64>) -> Result<Option<FrameView<'_>>> {
    let guard = inner
        .slot
        .read()
        .map_err(|_| PipelineError::LockPoisoned("frame buffer"))?;
    let Some(header) = guard.header else {
        return Ok(None);
    };
    if token.is_some_and(|token| token != header.token) {
        return Ok(None);
    }
    Ok(Some(FrameView {
        guard,
        descriptor: header,
    }))
}

/// Borrowed, read-only view of the frame in a shared buffer.
///
/// The writer cannot overwrite the buffer while a view is alive, so views should be
/// short-lived: copy out with `to_frame` and drop.
pub struct FrameView<'a> {
    guard: RwLockReadGuard<'a, Slot>,
    descriptor: FrameDescriptor,
}

impl<'a> FrameView<'a> {
    pub fn descriptor(&self) -> FrameDescriptor {
        self.descriptor
    }

    pub fn bytes(&self) -> &[u8] {
        &self.guard.bytes[..self.descriptor.byte_len()]
    }

    /// Independent copy of the viewed frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::new(
            self.descriptor.shape,
            self.descriptor.element,
            self.bytes().to_vec(),
        )
    }
}
