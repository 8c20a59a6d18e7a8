//! Typed channels bridging one SDK callback slot to many subscribers.
//!
//! Each channel registers a single forwarding closure with the SDK. The closure
//! holds a weak reference to the channel's [`CallbackRegistry`] and fans every
//! event out to the subscribers registered there. Dropping a channel releases
//! the SDK slot before the registry goes away.

use crate::error::{SensorError, SensorErrorCode};
use crate::registry::{derive_id, CallbackId, CallbackRegistry};
use crate::sdk::SensorSdk;
use crate::types::{SensorHandle, SensorImagePoint};
use crate::Result;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub type ImageFrameCallback = dyn Fn(SensorHandle, &[SensorImagePoint]) + Send + Sync;
pub type NetworkPacketCallback = dyn Fn(SensorHandle, i64, &[u8]) + Send + Sync;
pub type SensorErrorCallback = dyn Fn(SensorHandle, &SensorError) + Send + Sync;

/// Binding between a channel and one SDK callback slot.
pub trait Upstream: 'static {
    type Callback: ?Sized + Send + Sync + 'static;

    /// Used in log messages.
    const NAME: &'static str;

    /// Occupy the SDK slot with a closure dispatching into `registry`.
    fn register(sdk: &dyn SensorSdk, registry: Weak<CallbackRegistry<Self::Callback>>) -> Result<()>;

    fn unregister(sdk: &dyn SensorSdk) -> Result<()>;
}

/// Image frames: `(sensor, points)`.
pub enum ImageFrames {}

/// Raw network packets: `(sensor, receive timestamp µs, bytes)`.
pub enum NetworkPackets {}

/// Sensor errors and faults: `(sensor, error)`.
pub enum SensorErrors {}

impl Upstream for ImageFrames {
    type Callback = ImageFrameCallback;
    const NAME: &'static str = "image frame";

    fn register(sdk: &dyn SensorSdk, registry: Weak<CallbackRegistry<Self::Callback>>) -> Result<()> {
        sdk.listen_image_frames(Box::new(
            move |handle: SensorHandle, points: &[SensorImagePoint]| {
                if let Some(registry) = registry.upgrade() {
                    registry.dispatch(|callback| callback(handle, points));
                }
            },
        ))
    }

    fn unregister(sdk: &dyn SensorSdk) -> Result<()> {
        sdk.unlisten_image_frames()
    }
}

impl Upstream for NetworkPackets {
    type Callback = NetworkPacketCallback;
    const NAME: &'static str = "network packet";

    fn register(sdk: &dyn SensorSdk, registry: Weak<CallbackRegistry<Self::Callback>>) -> Result<()> {
        sdk.listen_network_packets(Box::new(
            move |handle: SensorHandle, timestamp: i64, buffer: &[u8]| {
                if let Some(registry) = registry.upgrade() {
                    registry.dispatch(|callback| callback(handle, timestamp, buffer));
                }
            },
        ))
    }

    fn unregister(sdk: &dyn SensorSdk) -> Result<()> {
        sdk.unlisten_network_packets()
    }
}

impl Upstream for SensorErrors {
    type Callback = SensorErrorCallback;
    const NAME: &'static str = "sensor error";

    fn register(sdk: &dyn SensorSdk, registry: Weak<CallbackRegistry<Self::Callback>>) -> Result<()> {
        sdk.listen_errors(Box::new(
            move |handle: SensorHandle, code: SensorErrorCode, message: &str| {
                if let Some(registry) = registry.upgrade() {
                    let error = SensorError::new(code, message);
                    registry.dispatch(|callback| callback(handle, &error));
                }
            },
        ))
    }

    fn unregister(sdk: &dyn SensorSdk) -> Result<()> {
        sdk.unlisten_errors()
    }
}

/// Subscriber registry bound to one SDK callback slot.
///
/// Subscribers only receive events after [`Channel::initialize`] succeeds.
pub struct Channel<U: Upstream> {
    sdk: Arc<dyn SensorSdk>,
    registry: Arc<CallbackRegistry<U::Callback>>,
    initialized: AtomicBool,
    _upstream: PhantomData<fn() -> U>,
}

pub type ImageFrameChannel = Channel<ImageFrames>;
pub type NetworkPacketChannel = Channel<NetworkPackets>;
pub type SensorErrorChannel = Channel<SensorErrors>;

impl<U: Upstream> Channel<U> {
    pub fn new(sdk: Arc<dyn SensorSdk>) -> Self {
        Self {
            sdk,
            registry: Arc::new(CallbackRegistry::new()),
            initialized: AtomicBool::new(false),
            _upstream: PhantomData,
        }
    }

    /// Register with the SDK. SDK errors (slot taken, SDK not initialized)
    /// are returned unchanged.
    pub fn initialize(&self) -> Result<()> {
        U::register(self.sdk.as_ref(), Arc::downgrade(&self.registry))?;
        self.initialized.store(true, Ordering::SeqCst);
        log::debug!("{} channel registered", U::NAME);
        Ok(())
    }

    /// Release the SDK slot. Does nothing unless initialized.
    pub fn deinitialize(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        log::debug!("{} channel released", U::NAME);
        U::unregister(self.sdk.as_ref())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Registered and the SDK is still running, so events may still arrive.
    pub fn is_active(&self) -> bool {
        self.is_initialized() && self.sdk.is_initialized()
    }

    /// Register an already boxed callback.
    ///
    /// # Panics
    /// If `id` is already registered on this channel.
    pub fn listen_boxed(&self, id: CallbackId, callback: Box<U::Callback>) {
        self.registry.listen(id, callback);
    }

    pub fn unlisten(&self, id: CallbackId) {
        self.registry.unlisten(id);
    }

    pub fn is_listening(&self, id: CallbackId) -> bool {
        self.registry.contains(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

impl<U: Upstream> Drop for Channel<U> {
    fn drop(&mut self) {
        if let Err(e) = self.deinitialize() {
            log::warn!("Failed to release {} callback: {}", U::NAME, e);
        }
    }
}

impl Channel<ImageFrames> {
    /// # Panics
    /// If `id` is already registered on this channel.
    pub fn listen<F>(&self, id: CallbackId, callback: F)
    where
        F: Fn(SensorHandle, &[SensorImagePoint]) + Send + Sync + 'static,
    {
        self.registry.listen(id, Box::new(callback));
    }

    /// Register a plain function. With `id == 0` the function address is the id.
    pub fn listen_fn(&self, callback: fn(SensorHandle, &[SensorImagePoint]), id: CallbackId) -> CallbackId {
        let id = derive_id(id, callback as *const ());
        self.registry.listen(id, Box::new(callback));
        id
    }

    pub fn unlisten_fn(&self, callback: fn(SensorHandle, &[SensorImagePoint]), id: CallbackId) {
        self.registry.unlisten(derive_id(id, callback as *const ()));
    }

    /// Register a method of a shared object. With `id == 0` the object address
    /// is the id. The channel only keeps a weak reference to `instance`.
    pub fn listen_instance<T: Send + Sync + 'static>(
        &self,
        instance: &Arc<T>,
        method: fn(&T, SensorHandle, &[SensorImagePoint]),
        id: CallbackId,
    ) -> CallbackId {
        let id = derive_id(id, Arc::as_ptr(instance));
        let instance = Arc::downgrade(instance);
        self.listen(id, move |handle, points| {
            if let Some(instance) = instance.upgrade() {
                method(&instance, handle, points);
            }
        });
        id
    }

    pub fn unlisten_instance<T>(&self, instance: &Arc<T>, id: CallbackId) {
        self.registry.unlisten(derive_id(id, Arc::as_ptr(instance)));
    }
}

impl Channel<NetworkPackets> {
    /// # Panics
    /// If `id` is already registered on this channel.
    pub fn listen<F>(&self, id: CallbackId, callback: F)
    where
        F: Fn(SensorHandle, i64, &[u8]) + Send + Sync + 'static,
    {
        self.registry.listen(id, Box::new(callback));
    }

    pub fn listen_fn(&self, callback: fn(SensorHandle, i64, &[u8]), id: CallbackId) -> CallbackId {
        let id = derive_id(id, callback as *const ());
        self.registry.listen(id, Box::new(callback));
        id
    }

    pub fn unlisten_fn(&self, callback: fn(SensorHandle, i64, &[u8]), id: CallbackId) {
        self.registry.unlisten(derive_id(id, callback as *const ()));
    }

    pub fn listen_instance<T: Send + Sync + 'static>(
        &self,
        instance: &Arc<T>,
        method: fn(&T, SensorHandle, i64, &[u8]),
        id: CallbackId,
    ) -> CallbackId {
        let id = derive_id(id, Arc::as_ptr(instance));
        let instance = Arc::downgrade(instance);
        self.listen(id, move |handle, timestamp, buffer| {
            if let Some(instance) = instance.upgrade() {
                method(&instance, handle, timestamp, buffer);
            }
        });
        id
    }

    pub fn unlisten_instance<T>(&self, instance: &Arc<T>, id: CallbackId) {
        self.registry.unlisten(derive_id(id, Arc::as_ptr(instance)));
    }
}

impl Channel<SensorErrors> {
    /// # Panics
    /// If `id` is already registered on this channel.
    pub fn listen<F>(&self, id: CallbackId, callback: F)
    where
        F: Fn(SensorHandle, &SensorError) + Send + Sync + 'static,
    {
        self.registry.listen(id, Box::new(callback));
    }

    pub fn listen_fn(&self, callback: fn(SensorHandle, &SensorError), id: CallbackId) -> CallbackId {
        let id = derive_id(id, callback as *const ());
        self.registry.listen(id, Box::new(callback));
        id
    }

    pub fn unlisten_fn(&self, callback: fn(SensorHandle, &SensorError), id: CallbackId) {
        self.registry.unlisten(derive_id(id, callback as *const ()));
    }

    pub fn listen_instance<T: Send + Sync + 'static>(
        &self,
        instance: &Arc<T>,
        method: fn(&T, SensorHandle, &SensorError),
        id: CallbackId,
    ) -> CallbackId {
        let id = derive_id(id, Arc::as_ptr(instance));
        let instance = Arc::downgrade(instance);
        self.listen(id, move |handle, error| {
            if let Some(instance) = instance.upgrade() {
                method(&instance, handle, error);
            }
        });
        id
    }

    pub fn unlisten_instance<T>(&self, instance: &Arc<T>, id: CallbackId) {
        self.registry.unlisten(derive_id(id, Arc::as_ptr(instance)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedSdk;
    use crate::types::Options;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn started_sdk() -> Arc<SimulatedSdk> {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut options = Options::default();
        options.control_flags |= crate::types::ControlFlags::DISABLE_NETWORK;
        sdk.initialize(&options, Box::new(|_: SensorHandle, _: SensorErrorCode, _: &str| {}))
            .unwrap();
        sdk
    }

    fn points(n: usize) -> Vec<SensorImagePoint> {
        (0..n)
            .map(|i| SensorImagePoint {
                timestamp: i as i64,
                distance: 1.0,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let sdk = started_sdk();
        let channel = ImageFrameChannel::new(sdk.clone());
        channel.initialize().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        for id in 1..=3u64 {
            let received = received.clone();
            channel.listen(id, move |handle, points| {
                received.lock().unwrap().push((id, handle, points.len()));
            });
        }

        sdk.inject_frame(9, &points(4));

        let received = received.lock().unwrap();
        assert_eq!(*received, vec![(1, 9, 4), (2, 9, 4), (3, 9, 4)]);
    }

    #[test]
    fn test_no_fan_out_before_initialize() {
        let sdk = started_sdk();
        let channel = ImageFrameChannel::new(sdk.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        channel.listen(1, move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        sdk.inject_frame(1, &points(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        channel.initialize().unwrap();
        sdk.inject_frame(1, &points(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initialize_requires_sdk() {
        let sdk = Arc::new(SimulatedSdk::new());
        let channel = NetworkPacketChannel::new(sdk);
        let err = channel.initialize().unwrap_err();
        assert_eq!(err.code(), SensorErrorCode::NotInitialized);
        assert!(!channel.is_initialized());
    }

    #[test]
    fn test_second_channel_for_same_slot_is_rejected() {
        let sdk = started_sdk();
        let first = ImageFrameChannel::new(sdk.clone());
        let second = ImageFrameChannel::new(sdk.clone());
        first.initialize().unwrap();
        let err = second.initialize().unwrap_err();
        assert_eq!(err.code(), SensorErrorCode::TooManyCallbacks);
    }

    #[test]
    fn test_deinitialize_is_idempotent_and_drop_releases_slot() {
        let sdk = started_sdk();
        let channel = ImageFrameChannel::new(sdk.clone());
        assert!(channel.deinitialize().is_ok());

        channel.initialize().unwrap();
        assert!(channel.deinitialize().is_ok());
        assert!(channel.deinitialize().is_ok());

        channel.initialize().unwrap();
        drop(channel);
        assert!(!sdk.has_image_frame_listener());

        let replacement = ImageFrameChannel::new(sdk.clone());
        assert!(replacement.initialize().is_ok());
    }

    fn count_packet(_: SensorHandle, _: i64, buffer: &[u8]) {
        PACKET_BYTES.fetch_add(buffer.len(), Ordering::SeqCst);
    }

    static PACKET_BYTES: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn test_packet_channel_function_ids() {
        let sdk = started_sdk();
        let channel = NetworkPacketChannel::new(sdk.clone());
        channel.initialize().unwrap();

        let id = channel.listen_fn(count_packet, 0);
        assert_eq!(id, count_packet as *const () as usize as u64);
        assert!(channel.is_listening(id));

        sdk.inject_packet(3, 1_000, &[0u8; 16]);
        assert_eq!(PACKET_BYTES.load(Ordering::SeqCst), 16);

        channel.unlisten_fn(count_packet, 0);
        channel.unlisten_fn(count_packet, 0);
        assert_eq!(channel.subscriber_count(), 0);
    }

    struct ErrorLog {
        codes: Mutex<Vec<SensorErrorCode>>,
    }

    impl ErrorLog {
        fn record(&self, _: SensorHandle, error: &SensorError) {
            self.codes.lock().unwrap().push(error.code());
        }
    }

    #[test]
    fn test_error_channel_wraps_codes_and_tracks_instances() {
        let sdk = started_sdk();
        let channel = SensorErrorChannel::new(sdk.clone());
        channel.initialize().unwrap();

        let log = Arc::new(ErrorLog {
            codes: Mutex::new(Vec::new()),
        });
        let id = channel.listen_instance(&log, ErrorLog::record, 0);
        assert_eq!(id, Arc::as_ptr(&log) as usize as u64);

        sdk.inject_error(1, SensorErrorCode::FaultExtremeTemperature, "hot");
        assert_eq!(*log.codes.lock().unwrap(), vec![SensorErrorCode::FaultExtremeTemperature]);

        channel.unlisten_instance(&log, 0);
        sdk.inject_error(1, SensorErrorCode::Communication, "link");
        assert_eq!(log.codes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_instance_dropped_before_unlisten_is_skipped() {
        let sdk = started_sdk();
        let channel = SensorErrorChannel::new(sdk.clone());
        channel.initialize().unwrap();

        let log = Arc::new(ErrorLog {
            codes: Mutex::new(Vec::new()),
        });
        channel.listen_instance(&log, ErrorLog::record, 5);
        drop(log);

        sdk.inject_error(1, SensorErrorCode::Timeout, "");
        assert!(channel.is_listening(5));
    }
}
