//! Discovery transport capability and the events it delivers.

use std::fmt;
use std::future::Future;
use std::io;

use futures::channel::mpsc;

use crate::device::{BulbRef, GatewayRef};

/// Something discovered on the broadcast network.
#[derive(Clone)]
pub enum DiscoveryEvent {
    /// A gateway answered a broadcast.
    GatewayFound(GatewayRef),
    /// A gateway reported a bulb.
    BulbFound { gateway: GatewayRef, bulb: BulbRef },
}

impl fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::GatewayFound(gateway) => {
                write!(f, "GatewayFound({})", gateway.address())
            }
            DiscoveryEvent::BulbFound { gateway, bulb } => {
                write!(f, "BulbFound({} @ {})", bulb.label(), gateway.address())
            }
        }
    }
}

/// Sending half of the discovery event stream.
///
/// Sends fail silently once the session stops; producers should ignore the
/// error.
pub type DiscoverySink = mpsc::UnboundedSender<DiscoveryEvent>;

pub(crate) type DiscoveryStream = mpsc::UnboundedReceiver<DiscoveryEvent>;

pub(crate) fn discovery_channel() -> (DiscoverySink, DiscoveryStream) {
    mpsc::unbounded()
}

/// The broadcast listener of the protocol layer.
///
/// A failure to bind the listener port must be reported with
/// [`io::ErrorKind::AddrInUse`] (or `PermissionDenied`) so it can be told
/// apart from other I/O failures.
pub trait Transport: Send + Sync + 'static {
    /// Handle to an open listener.
    type Handle: Send + 'static;

    /// Start listening for gateway announcements, delivering events to `sink`.
    fn start_listener(
        &self,
        sink: DiscoverySink,
    ) -> impl Future<Output = io::Result<Self::Handle>> + Send;

    /// Stop a listener previously returned by [`Transport::start_listener`].
    fn stop_listener(&self, handle: Self::Handle) -> impl Future<Output = io::Result<()>> + Send;
}
