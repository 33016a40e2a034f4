//! Device session - one logical link to one display.

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::DeviceConfig;
use crate::discovery::discover;
use crate::error::DeviceError;
use crate::events::{DeviceEvent, DeviceObserver, PacketDirection, TracingObserver};
use crate::protocol::ack::to_hex;
use crate::protocol::constants::{MAX_BRIGHTNESS, MIN_BRIGHTNESS, UUID_NOTIFY};
use crate::protocol::{build_frame, classify};
use crate::raster::{self, Rotation};
use crate::state::{AckSignal, Handshake};
use crate::transport::{BleConnection, BleTransport, NotificationHandler, TransportError, WriteMode};

/// Bytes of each packet copied into `Packet` events.
const PACKET_PREVIEW_LEN: usize = 32;

fn clamp_brightness(brightness: f32) -> f32 {
    brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS)
}

/// Exclusive owner of the connection and the acknowledgment slot for one
/// display. Operations take `&mut self` and block the caller.
pub struct DeviceSession<T: BleTransport, O: DeviceObserver = TracingObserver> {
    transport: T,
    config: DeviceConfig,
    observer: Arc<O>,
    connection: Option<T::Connection>,
    acks: Arc<AckSignal>,
}

impl<T: BleTransport> DeviceSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: BleTransport, O: DeviceObserver> DeviceSession<T, O> {
    /// Create a new session with a custom observer.
    ///
    /// Brightness outside [0.1, 1.0] is clamped.
    pub fn with_observer(transport: T, mut config: DeviceConfig, observer: Arc<O>) -> Self {
        config.address = config.address.to_uppercase();
        config.brightness = if config.brightness.is_finite() {
            clamp_brightness(config.brightness)
        } else {
            MAX_BRIGHTNESS
        };
        Self {
            transport,
            config,
            observer,
            connection: None,
            acks: Arc::new(AckSignal::new()),
        }
    }

    /// Handle held and link still up.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn brightness(&self) -> f32 {
        self.config.brightness
    }

    /// Clamp to [0.1, 1.0]; NaN and infinities are ignored.
    pub fn set_brightness(&mut self, brightness: f32) {
        if !brightness.is_finite() {
            warn!(brightness, "Ignoring non-finite brightness");
            return;
        }
        self.config.brightness = clamp_brightness(brightness);
    }

    pub fn rotation(&self) -> Rotation {
        self.config.rotation
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.config.rotation = rotation;
    }

    /// Unsubscribe and close the held handle, if any. Failures are logged only.
    fn release(&mut self) -> bool {
        let Some(connection) = self.connection.take() else {
            return false;
        };
        if let Err(e) = connection.unsubscribe(UUID_NOTIFY) {
            warn!(error = %e, "Unsubscribe failed");
        }
        if let Err(e) = connection.disconnect() {
            warn!(error = %e, "Disconnect failed");
        }
        true
    }

    /// Release the link. Never fails; a no-op without a connection.
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub fn disconnect(&mut self) {
        if self.release() {
            info!("Disconnected");
            self.observer.on_event(&DeviceEvent::Disconnected {
                address: self.config.address.clone(),
            });
        }
    }
}

impl<T: BleTransport, O: DeviceObserver + 'static> DeviceSession<T, O> {
    /// Route notifications into the acknowledgment slot.
    fn notification_handler(&self) -> NotificationHandler {
        let acks = Arc::clone(&self.acks);
        let observer = Arc::clone(&self.observer);
        Arc::new(move |payload: &[u8]| {
            observer.on_event(&DeviceEvent::Packet {
                direction: PacketDirection::Rx,
                length: payload.len(),
                data: Some(payload.iter().take(PACKET_PREVIEW_LEN).copied().collect()),
            });
            match classify(payload) {
                Some(stage) => {
                    debug!(stage = %stage, payload = %to_hex(payload), "ACK notification");
                    acks.raise(stage);
                    observer.on_event(&DeviceEvent::AckReceived { stage });
                }
                None => debug!(payload = %to_hex(payload), "Unrecognized notification"),
            }
        })
    }

    fn open(&mut self) -> Result<(), DeviceError> {
        let address = self.config.address.clone();
        let peripheral = discover(&self.transport, &address, &self.config.discovery)
            .ok_or_else(|| DeviceError::Discovery {
                address: address.clone(),
            })?;
        let connection = self
            .transport
            .connect(peripheral)
            .map_err(DeviceError::Connect)?;

        if let Err(e) = connection.subscribe(UUID_NOTIFY, self.notification_handler()) {
            if let Err(close) = connection.disconnect() {
                warn!(error = %close, "Disconnect after failed subscribe failed");
            }
            return Err(DeviceError::Connect(e));
        }

        self.connection = Some(connection);
        info!("Connected");
        self.observer.on_event(&DeviceEvent::Connected { address });
        Ok(())
    }

    /// Resolve, connect and subscribe. Immediate success on a live link.
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub fn connect(&mut self) -> Result<(), DeviceError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.release() {
            warn!("Released stale connection");
        }

        let result = self.open();
        if let Err(e) = &result {
            error!(error = %e, "Connect failed");
            self.observer.on_event(&DeviceEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    /// Deliver one image with the configured stage delay.
    pub fn send_image(&mut self, image: &DynamicImage) -> Result<(), DeviceError> {
        let stage_delay = self.config.timing.stage_delay();
        self.send_image_with_delay(image, stage_delay)
    }

    /// Deliver one image, pausing `stage_delay` after each handshake step.
    #[instrument(skip(self, image), fields(address = %self.config.address))]
    pub fn send_image_with_delay(
        &mut self,
        image: &DynamicImage,
        stage_delay: Duration,
    ) -> Result<(), DeviceError> {
        match self.transfer(image, stage_delay) {
            Ok(frame_len) => {
                info!(frame_len, "Image delivered");
                self.observer.on_event(&DeviceEvent::Complete { frame_len });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Image transfer failed");
                self.observer.on_event(&DeviceEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn transfer(&mut self, image: &DynamicImage, stage_delay: Duration) -> Result<usize, DeviceError> {
        if !self.is_connected() {
            self.connect()?;
        }

        let payload = raster::prepare(image, self.config.rotation, self.config.brightness)?;
        let frame = build_frame(&payload)?;

        let connection = self.connection.as_ref().ok_or(DeviceError::NotConnected)?;
        let observable = ObservableConnection {
            inner: connection,
            observer: self.observer.as_ref(),
        };
        Handshake::new(&observable, &self.acks, self.observer.as_ref(), self.config.timing)
            .with_stage_delay(stage_delay)
            .run(&frame)?;
        Ok(frame.len())
    }
}

impl<T: BleTransport, O: DeviceObserver> Drop for DeviceSession<T, O> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Connection wrapper that emits packet events.
struct ObservableConnection<'a, C: BleConnection, O: DeviceObserver> {
    inner: &'a C,
    observer: &'a O,
}

impl<C: BleConnection, O: DeviceObserver> BleConnection for ObservableConnection<'_, C, O> {
    fn write(&self, characteristic: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let res = self.inner.write(characteristic, data, mode);
        if res.is_ok() {
            self.observer.on_event(&DeviceEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
                data: Some(data.iter().take(PACKET_PREVIEW_LEN).copied().collect()),
            });
        }
        res
    }

    fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        self.inner.subscribe(characteristic, handler)
    }

    fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.inner.unsubscribe(characteristic)
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandshakeTiming;
    use crate::events::tests::RecordingObserver;
    use crate::protocol::AckStage;
    use crate::protocol::Frame;
    use crate::protocol::constants::*;
    use crate::transport::{MockReply, MockTransport};
    use image::{Rgb, RgbImage};

    const ADDR: &str = "CC:42:DE:9A:B7:3B";

    fn fast_config() -> DeviceConfig {
        let mut config = DeviceConfig::new(ADDR);
        config.brightness = 1.0;
        config.timing = HandshakeTiming {
            ack_timeout_ms: 300,
            optional_ack_timeout_ms: 40,
            stage_delay_ms: 1,
        };
        config.discovery.timeout_secs = 1;
        config
    }

    fn session(mock: MockTransport) -> DeviceSession<MockTransport> {
        DeviceSession::new(mock, fast_config())
    }

    fn white() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(
            DISPLAY_WIDTH,
            DISPLAY_HEIGHT,
            Rgb([255, 255, 255]),
        ))
    }

    #[test]
    fn test_send_connects_on_demand() {
        let mut session = session(MockTransport::responsive(ADDR));
        assert!(!session.is_connected());

        session.send_image(&white()).unwrap();
        assert!(session.is_connected());
        assert_eq!(session.transport().connect_count(), 1);
        assert!(session.transport().is_subscribed());

        let writes = session.transport().get_writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].data, HANDSHAKE_FIRST);
        assert_eq!(writes[1].data, HANDSHAKE_SECOND);
        assert!(Frame::parse(&writes[2].data).is_ok());
    }

    #[test]
    fn test_connect_failure_writes_nothing() {
        let mock = MockTransport::responsive(ADDR);
        mock.fail_connect(true);
        let mut session = session(mock);

        let err = session.send_image(&white()).unwrap_err();
        assert!(matches!(err, DeviceError::Connect(TransportError::ConnectFailed(_))));
        assert!(!session.is_connected());
        assert!(session.transport().get_writes().is_empty());
    }

    #[test]
    fn test_discovery_exhausted() {
        let mock = MockTransport::responsive(ADDR);
        mock.set_advertising(false);
        mock.set_cached(false);
        let mut session = session(mock);

        let err = session.connect().unwrap_err();
        assert!(matches!(err, DeviceError::Discovery { ref address } if address == ADDR));
        assert_eq!(session.transport().connect_count(), 0);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut session = session(MockTransport::responsive(ADDR));
        session.connect().unwrap();
        session.connect().unwrap();
        assert_eq!(session.transport().connect_count(), 1);
    }

    #[test]
    fn test_disconnect_without_connection() {
        let mut session = session(MockTransport::responsive(ADDR));
        session.disconnect();
        assert!(!session.is_connected());
        assert_eq!(session.transport().disconnect_count(), 0);
    }

    #[test]
    fn test_subscribe_failure_releases_link() {
        let mock = MockTransport::responsive(ADDR);
        mock.fail_subscribe(true);
        let mut session = session(mock);

        let err = session.connect().unwrap_err();
        assert!(matches!(err, DeviceError::Connect(TransportError::SubscribeFailed(_))));
        assert!(!session.is_connected());
        assert!(!session.transport().is_linked());
        assert_eq!(session.transport().disconnect_count(), 1);
    }

    #[test]
    fn test_disconnect_survives_unsubscribe_failure() {
        let mut session = session(MockTransport::responsive(ADDR));
        session.connect().unwrap();
        session.transport().fail_unsubscribe(true);

        session.disconnect();
        assert!(!session.is_connected());
        assert!(!session.transport().is_linked());
        assert_eq!(session.transport().disconnect_count(), 1);
    }

    #[test]
    fn test_reconnects_after_link_drop() {
        let mut session = session(MockTransport::responsive(ADDR));
        session.send_image(&white()).unwrap();

        session.transport().drop_link();
        assert!(!session.is_connected());

        session.send_image(&white()).unwrap();
        assert_eq!(session.transport().connect_count(), 2);
        assert_eq!(session.transport().get_writes().len(), 6);
    }

    #[test]
    fn test_handshake_timeout_keeps_link() {
        let mut session = session(MockTransport::new(ADDR));
        let err = session.send_image(&white()).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::HandshakeTimeout {
                stage: AckStage::Stage1,
                ..
            }
        ));
        assert!(session.is_connected());
        assert_eq!(session.transport().get_writes().len(), 1);
    }

    #[test]
    fn test_stage2_skipped_still_delivers() {
        let mock = MockTransport::new(ADDR);
        mock.queue_reply(MockReply::Notify(ACK_STAGE_ONE.to_vec()));
        mock.queue_reply(MockReply::Silent);
        mock.queue_reply(MockReply::Notify(ACK_STAGE_THREE.to_vec()));
        let mut session = session(mock);
        session.send_image(&white()).unwrap();
    }

    #[test]
    fn test_brightness_clamping() {
        let mut session = session(MockTransport::new(ADDR));
        session.set_brightness(0.5);
        assert_eq!(session.brightness(), 0.5);
        session.set_brightness(2.0);
        assert_eq!(session.brightness(), MAX_BRIGHTNESS);
        session.set_brightness(0.0);
        assert_eq!(session.brightness(), MIN_BRIGHTNESS);
        session.set_brightness(f32::NAN);
        assert_eq!(session.brightness(), MIN_BRIGHTNESS);

        let mut config = fast_config();
        config.brightness = 7.0;
        let session = DeviceSession::new(MockTransport::new(ADDR), config);
        assert_eq!(session.brightness(), MAX_BRIGHTNESS);
    }

    #[test]
    fn test_brightness_and_rotation_reach_frame() {
        let mut session = session(MockTransport::responsive(ADDR));
        session.set_brightness(0.5);
        session.set_rotation(Rotation::Deg90);
        assert_eq!(session.rotation(), Rotation::Deg90);

        let mut source = RgbImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, Rgb([0, 0, 0]));
        source.put_pixel(0, 0, Rgb([255, 255, 255]));
        session.send_image(&DynamicImage::ImageRgb8(source)).unwrap();

        let writes = session.transport().get_writes();
        let frame = Frame::parse(&writes[2].data).unwrap();
        let decoded = image::load_from_memory(frame.payload).unwrap().to_rgb8();
        assert_eq!(*decoded.get_pixel(DISPLAY_WIDTH - 1, 0), Rgb([127, 127, 127]));
    }

    #[test]
    fn test_observer_sees_lifecycle() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session = DeviceSession::with_observer(
            MockTransport::responsive(ADDR),
            fast_config(),
            Arc::clone(&observer),
        );
        session.send_image(&white()).unwrap();
        session.disconnect();

        let events = observer.events();
        assert!(matches!(events.first(), Some(DeviceEvent::Connected { .. })));
        assert!(matches!(events.last(), Some(DeviceEvent::Disconnected { .. })));

        let tx = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    DeviceEvent::Packet {
                        direction: PacketDirection::Tx,
                        ..
                    }
                )
            })
            .count();
        let acks = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::AckReceived { .. }))
            .count();
        assert_eq!(tx, 3);
        assert_eq!(acks, 3);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, DeviceEvent::Complete { frame_len } if *frame_len > FRAME_HEADER_SIZE))
        );
    }

    #[test]
    fn test_drop_releases_link() {
        let mock = MockTransport::responsive(ADDR);
        let mut session = session(mock.clone());
        session.connect().unwrap();
        assert!(mock.is_linked());

        drop(session);
        assert!(!mock.is_linked());
        assert_eq!(mock.disconnect_count(), 1);
    }

    #[test]
    fn test_sub_millisecond_stage_delay_is_kept() {
        let mut session = session(MockTransport::responsive(ADDR));
        let image = white();
        let delay = Duration::from_micros(900);
        let start = std::time::Instant::now();
        for _ in 0..20 {
            session.send_image_with_delay(&image, delay).unwrap();
        }
        // Two pauses per transfer.
        assert!(start.elapsed() >= delay * 40);
    }

    #[test]
    fn test_configured_stage_delay_is_applied() {
        let mut config = fast_config();
        config.timing.stage_delay_ms = 25;
        let mut session = DeviceSession::new(MockTransport::responsive(ADDR), config);
        let start = std::time::Instant::now();
        session.send_image(&white()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
