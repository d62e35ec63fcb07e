//! Single-slot channel from one worker to the display consumer.
//!
//! Capacity is one message. A worker that finds the slot occupied drops its new
//! frame; it never waits for the consumer.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::camera::CameraId;
use crate::frame::Frame;

/// Output message. `frame: None` is the error sentinel.
#[derive(Debug)]
pub struct OutputMessage {
    pub camera_id: CameraId,
    pub frame: Option<Frame>,
}

pub struct OutputSender {
    tx: Sender<OutputMessage>,
}

pub struct OutputReceiver {
    rx: Receiver<OutputMessage>,
}

pub fn output_channel() -> (OutputSender, OutputReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (OutputSender { tx }, OutputReceiver { rx })
}

impl OutputSender {
    /// Try to hand over an annotated frame. Returns `false` when it was dropped.
    pub fn offer(&self, camera_id: CameraId, frame: Frame) -> bool {
        self.send(OutputMessage {
            camera_id,
            frame: Some(frame),
        })
    }

    /// Try to publish the error sentinel.
    pub fn signal_error(&self, camera_id: CameraId) -> bool {
        self.send(OutputMessage {
            camera_id,
            frame: None,
        })
    }

    fn send(&self, message: OutputMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl OutputReceiver {
    /// Non-blocking poll.
    pub fn poll(&self) -> Option<OutputMessage> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_frame(fill: u8) -> Frame {
        Frame::from_rgb(1, 1, vec![fill; 3]).unwrap()
    }

    #[test]
    fn second_offer_is_dropped_while_slot_is_full() {
        let (tx, rx) = output_channel();
        assert!(tx.offer(4, tiny_frame(1)));
        assert!(!tx.offer(4, tiny_frame(2)));
        assert_eq!(rx.len(), 1);

        let message = rx.poll().unwrap();
        assert_eq!(message.camera_id, 4);
        assert_eq!(message.frame.unwrap().as_bytes(), &[1u8, 1, 1]);
        assert!(rx.poll().is_none());
    }

    #[test]
    fn sentinel_carries_no_frame() {
        let (tx, rx) = output_channel();
        assert!(tx.signal_error(9));
        let message = rx.poll().unwrap();
        assert!(message.frame.is_none());
    }

    #[test]
    fn offer_after_receiver_dropped_is_a_silent_drop() {
        let (tx, rx) = output_channel();
        drop(rx);
        assert!(!tx.offer(1, tiny_frame(0)));
    }
}
