//! Capability traits for the bridge/device protocol client.
//!
//! The engine never speaks a wire protocol itself. A protocol crate hands it
//! [`Gateway`] and [`Bulb`] objects through discovery events, and every
//! command goes through these traits.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;

use crate::runtime::BoxFuture;
use crate::transport::DiscoverySink;
use crate::types::{Color, PowerState};

/// Shared handle to a gateway.
pub type GatewayRef = Arc<dyn Gateway>;

/// Shared handle to a bulb.
pub type BulbRef = Arc<dyn Bulb>;

/// A bridge device that owns and forwards commands to bulbs.
///
/// Gateways are identified by [`Gateway::address`]; two handles with the same
/// address are the same gateway.
pub trait Gateway: Send + Sync + fmt::Debug {
    /// Network address of the gateway.
    fn address(&self) -> SocketAddr;

    /// Whether the gateway currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Open the gateway's connection.
    fn connect(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Turn on every bulb behind this gateway.
    fn turn_on(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Turn off every bulb behind this gateway.
    fn turn_off(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Ask the gateway to re-pull the state of its bulbs.
    fn refresh_bulbs(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Bulbs the gateway already knows about.
    fn bulbs(&self) -> Vec<BulbRef>;

    /// Deliver future bulb-discovery notifications to `sink`.
    fn subscribe(&self, sink: DiscoverySink);
}

/// An individually addressable light.
pub trait Bulb: Send + Sync + fmt::Debug {
    /// Human-assigned label, used as the external name.
    fn label(&self) -> String;

    /// The gateway this bulb is reached through.
    fn gateway(&self) -> GatewayRef;

    /// Last known power state. This is a cached value.
    fn power_state(&self) -> PowerState;

    /// Last known color, or `None` when the cached color cannot be read.
    fn color(&self) -> Option<Color>;

    fn turn_on(&self) -> BoxFuture<'_, io::Result<()>>;

    fn turn_off(&self) -> BoxFuture<'_, io::Result<()>>;

    fn set_color(&self, color: &Color) -> BoxFuture<'_, io::Result<()>>;
}

/// Case-folded label used as the registry key.
pub(crate) fn label_key(label: &str) -> String {
    label.to_lowercase()
}

/// Identity of a bulb across handles: its gateway address plus its label key.
pub(crate) fn bulb_key(bulb: &dyn Bulb) -> (SocketAddr, String) {
    (bulb.gateway().address(), label_key(&bulb.label()))
}

/// Point-in-time description of a known bulb.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulbInfo {
    pub label: String,
    pub gateway: SocketAddr,
    pub connected: bool,
    pub power: PowerState,
    pub color: Option<Color>,
}

impl BulbInfo {
    pub fn of(bulb: &dyn Bulb) -> Self {
        let gateway = bulb.gateway();
        BulbInfo {
            label: bulb.label(),
            gateway: gateway.address(),
            connected: gateway.is_connected(),
            power: bulb.power_state(),
            color: bulb.color(),
        }
    }
}
