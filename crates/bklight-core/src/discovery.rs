//! Peripheral discovery as an ordered list of strategies.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::protocol::constants::KNOWN_NAME_PREFIXES;
use crate::transport::{BleTransport, Discovered, TransportError};

/// One way of turning an address into a connectable peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// Address lookup that only accepts a fresh advertisement.
    Address,
    /// Address lookup that may be answered from the adapter cache.
    AddressCached,
    /// Full scan, filtered to known display names, matched by address.
    NameScan,
}

impl DiscoveryStrategy {
    pub const DEFAULT_ORDER: [DiscoveryStrategy; 3] = [
        DiscoveryStrategy::Address,
        DiscoveryStrategy::AddressCached,
        DiscoveryStrategy::NameScan,
    ];

    pub fn resolve<T: BleTransport>(
        self,
        transport: &T,
        address: &str,
        timeout: Duration,
    ) -> Result<Option<T::Peripheral>, TransportError> {
        match self {
            DiscoveryStrategy::Address => transport.find_by_address(address, timeout, false),
            DiscoveryStrategy::AddressCached => transport.find_by_address(address, timeout, true),
            DiscoveryStrategy::NameScan => Ok(transport
                .scan(timeout)?
                .into_iter()
                .filter(Discovered::is_display)
                .find(|d| d.address.eq_ignore_ascii_case(address))
                .map(|d| d.peripheral)),
        }
    }
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStrategy::Address => write!(f, "address"),
            DiscoveryStrategy::AddressCached => write!(f, "address_cached"),
            DiscoveryStrategy::NameScan => write!(f, "name_scan"),
        }
    }
}

/// Check if an advertised name belongs to a BK Light display.
pub fn is_display_name(name: &str) -> bool {
    KNOWN_NAME_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

impl<P> Discovered<P> {
    pub fn is_display(&self) -> bool {
        self.name.as_deref().is_some_and(is_display_name)
    }
}

/// Try each configured strategy in order; first hit wins.
///
/// Strategy errors are logged and treated as misses.
pub fn discover<T: BleTransport>(
    transport: &T,
    address: &str,
    config: &DiscoveryConfig,
) -> Option<T::Peripheral> {
    for strategy in &config.strategies {
        debug!(%strategy, address, "Trying discovery strategy");
        match strategy.resolve(transport, address, config.timeout()) {
            Ok(Some(peripheral)) => {
                info!(%strategy, address, "Display found");
                return Some(peripheral);
            }
            Ok(None) => debug!(%strategy, address, "Display not found"),
            Err(e) => warn!(%strategy, address, error = %e, "Discovery strategy failed"),
        }
    }
    None
}
