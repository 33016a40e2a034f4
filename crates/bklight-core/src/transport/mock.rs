//! Mock BLE transport for testing.
//!
//! Simulates one display: discovery visibility, connect/subscribe failures,
//! and scripted notifications in answer to writes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use super::traits::{
    BleConnection, BleTransport, Discovered, NotificationHandler, TransportError, WriteMode,
};
use crate::protocol::constants::*;
use crate::protocol::frame::Frame;

/// How the simulated display answers one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// No notification.
    Silent,
    /// Notify before the write call returns.
    Notify(Vec<u8>),
    /// Notify from another thread after a delay.
    NotifyAfter(Vec<u8>, Duration),
    /// Several notifications in order, before the write call returns.
    NotifyMany(Vec<Vec<u8>>),
    /// The write itself fails.
    Fail,
}

/// Captured write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub mode: WriteMode,
}

/// Discovery call made against the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockLookup {
    Address { cached: bool },
    Scan,
}

struct MockState {
    /// Seen by a fresh scan.
    advertising: bool,
    /// Present in the adapter cache.
    cached: bool,
    name: Option<String>,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    linked: bool,
    auto_ack: bool,
    replies: VecDeque<MockReply>,
    handler: Option<NotificationHandler>,
    write_log: Vec<MockWrite>,
    lookups: Vec<MockLookup>,
    connects: usize,
    disconnects: usize,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock transport for unit testing session and handshake logic.
///
/// Clones share one simulated display.
#[derive(Clone)]
pub struct MockTransport {
    address: String,
    state: Arc<Mutex<MockState>>,
}

/// Peripheral handle returned by the mock's discovery calls.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    pub address: String,
}

/// Link to the simulated display.
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A display at `address` that is advertising and answers nothing.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_uppercase(),
            state: Arc::new(Mutex::new(MockState {
                advertising: true,
                cached: true,
                name: Some("LED_BLE_MOCK".to_string()),
                fail_connect: false,
                fail_subscribe: false,
                fail_unsubscribe: false,
                linked: false,
                auto_ack: false,
                replies: VecDeque::new(),
                handler: None,
                write_log: Vec::new(),
                lookups: Vec::new(),
                connects: 0,
                disconnects: 0,
            })),
        }
    }

    /// A display that acknowledges every handshake and frame like real firmware.
    pub fn responsive(address: &str) -> Self {
        let mock = Self::new(address);
        lock(&mock.state).auto_ack = true;
        mock
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue the reply to the next unanswered write.
    pub fn queue_reply(&self, reply: MockReply) {
        lock(&self.state).replies.push_back(reply);
    }

    /// Push a notification now, as if the display sent it unprompted.
    pub fn notify(&self, payload: &[u8]) {
        let handler = lock(&self.state).handler.clone();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    pub fn set_advertising(&self, advertising: bool) {
        lock(&self.state).advertising = advertising;
    }

    pub fn set_cached(&self, cached: bool) {
        lock(&self.state).cached = cached;
    }

    pub fn set_name(&self, name: Option<&str>) {
        lock(&self.state).name = name.map(str::to_string);
    }

    pub fn fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        lock(&self.state).fail_subscribe = fail;
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        lock(&self.state).fail_unsubscribe = fail;
    }

    /// Simulate the display dropping the link.
    pub fn drop_link(&self) {
        let mut state = lock(&self.state);
        state.linked = false;
        state.handler = None;
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<MockWrite> {
        lock(&self.state).write_log.clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        lock(&self.state).write_log.clear();
    }

    pub fn lookups(&self) -> Vec<MockLookup> {
        lock(&self.state).lookups.clone()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn disconnect_count(&self) -> usize {
        lock(&self.state).disconnects
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.state).linked
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.state).handler.is_some()
    }

    fn peripheral(&self) -> MockPeripheral {
        MockPeripheral {
            address: self.address.clone(),
        }
    }
}

impl BleTransport for MockTransport {
    type Peripheral = MockPeripheral;
    type Connection = MockConnection;

    fn find_by_address(
        &self,
        address: &str,
        _timeout: Duration,
        cached: bool,
    ) -> Result<Option<MockPeripheral>, TransportError> {
        let mut state = lock(&self.state);
        state.lookups.push(MockLookup::Address { cached });
        if !address.eq_ignore_ascii_case(&self.address) {
            return Ok(None);
        }
        let found = state.advertising || (cached && state.cached);
        Ok(found.then(|| self.peripheral()))
    }

    fn scan(&self, _timeout: Duration) -> Result<Vec<Discovered<MockPeripheral>>, TransportError> {
        let mut state = lock(&self.state);
        state.lookups.push(MockLookup::Scan);
        if !state.advertising {
            return Ok(Vec::new());
        }
        Ok(vec![Discovered {
            address: self.address.clone(),
            name: state.name.clone(),
            rssi: Some(-60),
            peripheral: self.peripheral(),
        }])
    }

    fn connect(&self, peripheral: MockPeripheral) -> Result<MockConnection, TransportError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.fail_connect {
            return Err(TransportError::ConnectFailed(format!(
                "{} refused connection",
                peripheral.address
            )));
        }
        state.linked = true;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// Reply real firmware would give to `data`.
fn firmware_reply(data: &[u8]) -> MockReply {
    if data == HANDSHAKE_FIRST {
        MockReply::Notify(ACK_STAGE_ONE.to_vec())
    } else if data == HANDSHAKE_SECOND {
        MockReply::Notify(ACK_STAGE_TWO.to_vec())
    } else if Frame::parse(data).is_ok() {
        MockReply::Notify(ACK_STAGE_THREE.to_vec())
    } else {
        MockReply::Silent
    }
}

impl BleConnection for MockConnection {
    fn write(&self, characteristic: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let (reply, handler) = {
            let mut state = lock(&self.state);
            if !state.linked {
                return Err(TransportError::Disconnected);
            }
            if characteristic != UUID_WRITE {
                return Err(TransportError::CharacteristicNotFound {
                    uuid: characteristic,
                });
            }
            let reply = match state.replies.pop_front() {
                Some(reply) => reply,
                None if state.auto_ack => firmware_reply(data),
                None => MockReply::Silent,
            };
            if reply == MockReply::Fail {
                return Err(TransportError::WriteFailed("simulated write failure".into()));
            }
            state.write_log.push(MockWrite {
                characteristic,
                data: data.to_vec(),
                mode,
            });
            (reply, state.handler.clone())
        };

        let Some(handler) = handler else {
            return Ok(());
        };
        match reply {
            MockReply::Notify(payload) => handler(&payload),
            MockReply::NotifyMany(payloads) => payloads.iter().for_each(|p| handler(p)),
            MockReply::NotifyAfter(payload, delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    handler(&payload);
                });
            }
            MockReply::Silent | MockReply::Fail => {}
        }
        Ok(())
    }

    fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if characteristic != UUID_NOTIFY {
            return Err(TransportError::CharacteristicNotFound {
                uuid: characteristic,
            });
        }
        if state.fail_subscribe {
            return Err(TransportError::SubscribeFailed(
                "simulated subscribe failure".into(),
            ));
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn unsubscribe(&self, _characteristic: Uuid) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.fail_unsubscribe {
            return Err(TransportError::Backend("simulated unsubscribe failure".into()));
        }
        state.handler = None;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.linked = false;
        state.handler = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADDR: &str = "CC:42:DE:9A:B7:3B";

    fn connect(mock: &MockTransport) -> MockConnection {
        let peripheral = mock
            .find_by_address(ADDR, Duration::from_secs(1), false)
            .unwrap()
            .unwrap();
        mock.connect(peripheral).unwrap()
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new(ADDR);
        let conn = connect(&mock);
        conn.write(UUID_WRITE, b"Hello", WriteMode::WithoutResponse)
            .unwrap();
        conn.write(UUID_WRITE, b"World", WriteMode::WithResponse)
            .unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].data, b"Hello");
        assert_eq!(writes[1].mode, WriteMode::WithResponse);

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new(ADDR);
        let conn = connect(&mock);
        assert!(conn.is_connected());

        conn.disconnect().unwrap();
        assert!(!conn.is_connected());
        assert!(conn.write(UUID_WRITE, b"test", WriteMode::WithResponse).is_err());
        assert_eq!(mock.disconnect_count(), 1);
    }

    #[test]
    fn test_mock_lookup_visibility() {
        let mock = MockTransport::new(ADDR);
        mock.set_advertising(false);
        let timeout = Duration::from_millis(10);

        assert!(mock.find_by_address(ADDR, timeout, false).unwrap().is_none());
        assert!(mock.find_by_address(ADDR, timeout, true).unwrap().is_some());
        assert!(mock.scan(timeout).unwrap().is_empty());

        mock.set_cached(false);
        assert!(mock.find_by_address(ADDR, timeout, true).unwrap().is_none());

        // Match is case-insensitive, other addresses are unknown.
        mock.set_advertising(true);
        assert!(
            mock.find_by_address(&ADDR.to_lowercase(), timeout, false)
                .unwrap()
                .is_some()
        );
        assert!(
            mock.find_by_address("00:11:22:33:44:55", timeout, true)
                .unwrap()
                .is_none()
        );
        assert_eq!(mock.lookups().len(), 6);
    }

    #[test]
    fn test_scripted_reply_reaches_handler() {
        let mock = MockTransport::new(ADDR);
        let conn = connect(&mock);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        conn.subscribe(
            UUID_NOTIFY,
            Arc::new(move |_payload: &[u8]| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        mock.queue_reply(MockReply::Notify(ACK_STAGE_ONE.to_vec()));
        mock.queue_reply(MockReply::Silent);
        conn.write(UUID_WRITE, &HANDSHAKE_FIRST, WriteMode::WithoutResponse)
            .unwrap();
        conn.write(UUID_WRITE, &HANDSHAKE_SECOND, WriteMode::WithoutResponse)
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        mock.queue_reply(MockReply::Fail);
        assert!(conn.write(UUID_WRITE, &[0x00], WriteMode::WithResponse).is_err());
        assert_eq!(mock.get_writes().len(), 2);
    }

    #[test]
    fn test_firmware_reply() {
        assert_eq!(
            firmware_reply(&HANDSHAKE_FIRST),
            MockReply::Notify(ACK_STAGE_ONE.to_vec())
        );
        assert_eq!(
            firmware_reply(&HANDSHAKE_SECOND),
            MockReply::Notify(ACK_STAGE_TWO.to_vec())
        );
        let frame = crate::protocol::build_frame(b"png").unwrap();
        assert_eq!(
            firmware_reply(&frame),
            MockReply::Notify(ACK_STAGE_THREE.to_vec())
        );
        assert_eq!(firmware_reply(&[0x01, 0x02]), MockReply::Silent);
    }

    #[test]
    fn test_subscribe_failure() {
        let mock = MockTransport::new(ADDR);
        mock.fail_subscribe(true);
        let conn = connect(&mock);
        assert!(conn.subscribe(UUID_NOTIFY, Arc::new(|_: &[u8]| {})).is_err());
        assert!(!mock.is_subscribed());
    }
}
