use crate::channel::ImageFrameChannel;
use crate::registry::CallbackId;
use crate::types::{SensorHandle, SensorImagePoint};
use crossbeam_channel::{Receiver, RecvTimeoutError, TrySendError};
use std::time::Duration;

/// How often a blocking [`FrameStream::recv`] checks that frames can still arrive.
const STOP_POLL: Duration = Duration::from_millis(100);

/// One image frame, copied out of the SDK callback.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub handle: SensorHandle,
    pub points: Vec<SensorImagePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Timeout waiting for frames")]
    Timeout,
    #[error("Frame stream stopped")]
    Stopped,
}

/// Receiver side of an image frame subscription.
///
/// The subscriber only copies each frame into a bounded queue, so slow
/// consumers never hold up the SDK thread. When the queue is full, new
/// frames are dropped. Once the channel is released or the SDK stops, the
/// queue is drained and then [`StreamError::Stopped`] is returned.
pub struct FrameStream<'a> {
    channel: &'a ImageFrameChannel,
    id: CallbackId,
    receiver: Receiver<ImageFrame>,
}

impl<'a> FrameStream<'a> {
    /// Subscribe to `channel` under `id` with a queue of `capacity` frames.
    ///
    /// # Panics
    /// If `id` is already registered on `channel`.
    pub fn subscribe(channel: &'a ImageFrameChannel, id: CallbackId, capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);

        channel.listen(id, move |handle, points| {
            let frame = ImageFrame {
                handle,
                points: points.to_vec(),
            };
            match sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::trace!("Frame queue full, dropping frame");
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::trace!("Frame stream closed, dropping frame");
                }
            }
        });

        FrameStream {
            channel,
            id,
            receiver,
        }
    }

    /// Block until the next frame arrives, or the stream stops.
    pub fn recv(&self) -> Result<ImageFrame, StreamError> {
        loop {
            match self.recv_timeout(STOP_POLL) {
                Err(StreamError::Timeout) => continue,
                other => return other,
            }
        }
    }

    pub fn try_recv(&self) -> Option<ImageFrame> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ImageFrame, StreamError> {
        if let Some(frame) = self.try_recv() {
            return Ok(frame);
        }
        if !self.channel.is_active() {
            return Err(StreamError::Stopped);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Disconnected) => Err(StreamError::Stopped),
            Err(RecvTimeoutError::Timeout) if !self.channel.is_active() => Err(StreamError::Stopped),
            Err(RecvTimeoutError::Timeout) => Err(StreamError::Timeout),
        }
    }

    /// Frames waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Drop for FrameStream<'_> {
    fn drop(&mut self) {
        self.channel.unlisten(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorErrorCode;
    use crate::sdk::SensorSdk;
    use crate::sim::SimulatedSdk;
    use crate::types::{ControlFlags, Options};
    use std::sync::Arc;

    fn setup() -> (Arc<SimulatedSdk>, ImageFrameChannel) {
        let sdk = Arc::new(SimulatedSdk::new());
        let options = Options {
            control_flags: ControlFlags::DISABLE_NETWORK,
            ..Options::default()
        };
        sdk.initialize(
            &options,
            Box::new(|_: SensorHandle, _: SensorErrorCode, _: &str| {}),
        )
        .unwrap();
        let channel = ImageFrameChannel::new(sdk.clone());
        channel.initialize().unwrap();
        (sdk, channel)
    }

    #[test]
    fn test_frames_are_copied_in_order() {
        let (sdk, channel) = setup();
        let stream = FrameStream::subscribe(&channel, 1, 8);

        for n in 1..=3 {
            sdk.inject_frame(n as u64, &vec![SensorImagePoint::default(); n]);
        }

        for n in 1..=3 {
            let frame = stream.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(frame.handle, n as u64);
            assert_eq!(frame.points.len(), n);
        }
        assert_eq!(
            stream.recv_timeout(Duration::from_millis(10)).unwrap_err(),
            StreamError::Timeout
        );
    }

    #[test]
    fn test_full_queue_drops_new_frames() {
        let (sdk, channel) = setup();
        let stream = FrameStream::subscribe(&channel, 1, 2);
        for _ in 0..5 {
            sdk.inject_frame(1, &[SensorImagePoint::default()]);
        }
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_sdk_teardown_stops_stream_after_draining() {
        let (sdk, channel) = setup();
        let stream = FrameStream::subscribe(&channel, 1, 4);
        sdk.inject_frame(2, &[SensorImagePoint::default()]);
        sdk.deinitialize().unwrap();

        assert_eq!(stream.recv().unwrap().handle, 2);
        assert_eq!(stream.recv().unwrap_err(), StreamError::Stopped);
        assert_eq!(
            stream.recv_timeout(Duration::from_secs(10)).unwrap_err(),
            StreamError::Stopped
        );
    }

    #[test]
    fn test_released_channel_stops_stream() {
        let (_sdk, channel) = setup();
        let stream = FrameStream::subscribe(&channel, 1, 4);
        channel.deinitialize().unwrap();
        assert_eq!(stream.recv().unwrap_err(), StreamError::Stopped);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (_sdk, channel) = setup();
        {
            let _stream = FrameStream::subscribe(&channel, 4, 1);
            assert!(channel.is_listening(4));
        }
        assert!(!channel.is_listening(4));
    }
}
