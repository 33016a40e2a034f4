//! btleplug-based BLE transport implementation.
//!
//! btleplug is async-only; this backend owns a tokio runtime and blocks on it
//! for each call. Notifications are pumped by a task spawned on that runtime,
//! so handlers run on a runtime worker thread.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::traits::{
    BleConnection, BleTransport, Discovered, NotificationHandler, TransportError, WriteMode,
};
use crate::protocol::constants::{UUID_NOTIFY, UUID_WRITE};

/// How often the adapter's device list is re-read while scanning.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        TransportError::Backend(err.to_string())
    }
}

/// btleplug-based BLE central.
pub struct BtleplugTransport {
    runtime: Arc<Runtime>,
    adapter: Adapter,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter of the host.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let adapter = runtime.block_on(first_adapter())?;
        let adapter_info = runtime
            .block_on(adapter.adapter_info())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(adapter = %adapter_info, "Bluetooth adapter ready");
        Ok(Self {
            runtime: Arc::new(runtime),
            adapter,
        })
    }

    async fn find_async(
        &self,
        address: &str,
        timeout: Duration,
        cached: bool,
    ) -> Result<Option<Peripheral>, TransportError> {
        if cached && let Some(peripheral) = lookup(&self.adapter, address, false).await? {
            debug!(address, "Resolved from adapter cache");
            return Ok(Some(peripheral));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let poll = async {
            loop {
                if let Some(peripheral) = lookup(&self.adapter, address, !cached).await? {
                    return Ok::<_, TransportError>(Some(peripheral));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        while_scanning(
            self.adapter.start_scan(ScanFilter::default()),
            poll,
            self.adapter.stop_scan(),
        )
        .await
    }

    async fn scan_async(
        &self,
        timeout: Duration,
    ) -> Result<Vec<Discovered<Peripheral>>, TransportError> {
        while_scanning(
            self.adapter.start_scan(ScanFilter::default()),
            async {
                tokio::time::sleep(timeout).await;
                Ok::<(), TransportError>(())
            },
            self.adapter.stop_scan(),
        )
        .await?;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let properties = peripheral.properties().await?;
            found.push(Discovered {
                address: peripheral.address().to_string(),
                name: properties.as_ref().and_then(|p| p.local_name.clone()),
                rssi: properties.as_ref().and_then(|p| p.rssi),
                peripheral,
            });
        }
        Ok(found)
    }

    async fn connect_async(
        &self,
        peripheral: Peripheral,
    ) -> Result<BtleplugConnection, TransportError> {
        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let resolved = resolve_characteristics(&peripheral).await;
        let (write, notify) = match resolved {
            Ok(pair) => pair,
            Err(e) => {
                // Never hand back a half-open link.
                if let Err(close) = peripheral.disconnect().await {
                    warn!(error = %close, "Disconnect after failed service discovery failed");
                }
                return Err(e);
            }
        };

        info!(address = %peripheral.address(), "GATT link established");
        Ok(BtleplugConnection {
            runtime: Arc::clone(&self.runtime),
            peripheral,
            write,
            notify,
            pump: Mutex::new(None),
        })
    }
}

/// Run `body` while the adapter scans. Once `start` succeeds, `stop` runs on
/// every path, also when `body` fails.
async fn while_scanning<T>(
    start: impl Future<Output = btleplug::Result<()>>,
    body: impl Future<Output = Result<T, TransportError>>,
    stop: impl Future<Output = btleplug::Result<()>>,
) -> Result<T, TransportError> {
    start.await?;
    let result = body.await;
    if let Err(e) = stop.await {
        debug!(error = %e, "Failed to stop scan");
    }
    result
}

async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::NoAdapter)
}

/// Find `address` in the adapter's device list.
///
/// With `fresh_only`, entries without a current RSSI (known to the adapter
/// but not heard during this scan) are skipped.
async fn lookup(
    adapter: &Adapter,
    address: &str,
    fresh_only: bool,
) -> Result<Option<Peripheral>, TransportError> {
    for peripheral in adapter.peripherals().await? {
        if !peripheral.address().to_string().eq_ignore_ascii_case(address) {
            continue;
        }
        if fresh_only {
            let rssi = peripheral.properties().await?.and_then(|p| p.rssi);
            if rssi.is_none() {
                continue;
            }
        }
        return Ok(Some(peripheral));
    }
    Ok(None)
}

async fn resolve_characteristics(
    peripheral: &Peripheral,
) -> Result<(Characteristic, Characteristic), TransportError> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let characteristics = peripheral.characteristics();
    let find = |uuid: Uuid| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound { uuid })
    };
    Ok((find(UUID_WRITE)?, find(UUID_NOTIFY)?))
}

impl BleTransport for BtleplugTransport {
    type Peripheral = Peripheral;
    type Connection = BtleplugConnection;

    #[instrument(skip(self), level = "debug")]
    fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
        cached: bool,
    ) -> Result<Option<Peripheral>, TransportError> {
        self.runtime
            .block_on(self.find_async(address, timeout, cached))
    }

    #[instrument(skip(self), level = "debug")]
    fn scan(&self, timeout: Duration) -> Result<Vec<Discovered<Peripheral>>, TransportError> {
        self.runtime.block_on(self.scan_async(timeout))
    }

    fn connect(&self, peripheral: Peripheral) -> Result<BtleplugConnection, TransportError> {
        self.runtime.block_on(self.connect_async(peripheral))
    }
}

/// Live btleplug GATT link.
pub struct BtleplugConnection {
    runtime: Arc<Runtime>,
    peripheral: Peripheral,
    write: Characteristic,
    notify: Characteristic,
    /// Task forwarding the notification stream to the subscribed handler.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic, TransportError> {
        if uuid == self.write.uuid {
            Ok(&self.write)
        } else if uuid == self.notify.uuid {
            Ok(&self.notify)
        } else {
            Err(TransportError::CharacteristicNotFound { uuid })
        }
    }

    fn stop_pump(&self) {
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
    }

    async fn start_pump(
        &self,
        characteristic: &Characteristic,
        handler: NotificationHandler,
    ) -> Result<JoinHandle<()>, btleplug::Error> {
        // Open the stream first so nothing sent right after subscribing is lost.
        let mut stream = self.peripheral.notifications().await?;
        self.peripheral.subscribe(characteristic).await?;
        let uuid = characteristic.uuid;
        Ok(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == uuid {
                    handler(&notification.value);
                }
            }
        }))
    }
}

impl BleConnection for BtleplugConnection {
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    fn write(&self, characteristic: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.runtime
            .block_on(self.peripheral.write(characteristic, data, write_type))
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        self.stop_pump();
        let pump = self
            .runtime
            .block_on(self.start_pump(characteristic, handler))
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        Ok(())
    }

    fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        self.stop_pump();
        self.runtime
            .block_on(self.peripheral.unsubscribe(characteristic))?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_pump();
        self.runtime.block_on(self.peripheral.disconnect())?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.runtime
            .block_on(self.peripheral.is_connected())
            .unwrap_or(false)
    }
}

impl Drop for BtleplugConnection {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
