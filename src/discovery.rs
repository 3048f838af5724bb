//! Time-boxed gateway discovery.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::device::{BulbRef, GatewayRef};
use crate::errors::Error;
use crate::observer::{Observers, RegistryEvent};
use crate::registry::Registry;
use crate::runtime::{self, Instant, JoinHandle, Mutex};
use crate::transport::{DiscoveryEvent, DiscoverySink, DiscoveryStream, Transport, discovery_channel};

type Result<T> = std::result::Result<T, Error>;

enum Window<H> {
    Idle,
    Listening {
        handle: H,
        generation: u64,
        opened: Instant,
    },
}

struct Channel {
    sink: DiscoverySink,
    stream: Option<DiscoveryStream>,
}

impl Channel {
    fn new() -> Self {
        let (sink, stream) = discovery_channel();
        Channel {
            sink,
            stream: Some(stream),
        }
    }
}

struct Shared<T: Transport> {
    transport: T,
    registry: Registry,
    observers: Observers,
    listen_window: Duration,
    device_timeout: Duration,
    window: Mutex<Window<T::Handle>>,
    listening: AtomicBool,
    generation: AtomicU64,
    channel: StdMutex<Channel>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    timer: StdMutex<Option<JoinHandle<()>>>,
    bound: StdMutex<HashSet<SocketAddr>>,
}

fn lock<V>(mutex: &StdMutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the discovery window and feeds discovery events into the registry.
///
/// At most one window is open at a time. Opening a window starts the
/// transport's listener and a timer that stops it again once
/// [`Config::listen_window`] has passed, whether or not anything was found.
///
/// Cloning a session yields another handle to the same session.
pub struct DiscoverySession<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for DiscoverySession<T> {
    fn clone(&self) -> Self {
        DiscoverySession {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> DiscoverySession<T> {
    pub fn new(transport: T, registry: Registry, observers: Observers, config: &Config) -> Self {
        DiscoverySession {
            shared: Arc::new(Shared {
                transport,
                registry,
                observers,
                listen_window: config.listen_window(),
                device_timeout: config.device_timeout(),
                window: Mutex::new(Window::Idle),
                listening: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                channel: StdMutex::new(Channel::new()),
                pump: StdMutex::new(None),
                timer: StdMutex::new(None),
                bound: StdMutex::new(HashSet::new()),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Sink that feeds this session's event pump.
    pub fn sink(&self) -> DiscoverySink {
        lock(&self.shared.channel).sink.clone()
    }

    /// Open a discovery window unless one is already open.
    ///
    /// Returns `Ok(true)` if a new window was opened. A bind failure or a
    /// listener that does not start within the device timeout is returned to
    /// the caller; the session stays idle.
    pub async fn start_if_idle(&self) -> Result<bool> {
        let shared = &self.shared;
        let mut window = shared.window.lock().await;
        if matches!(*window, Window::Listening { .. }) {
            return Ok(false);
        }

        info!("Starting gateway discovery...");
        let starting = shared.transport.start_listener(self.sink());
        let handle = match runtime::bounded(shared.device_timeout, starting).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = Error::listen(e);
                error!("Unable to listen for gateways: {}", err);
                return Err(err);
            }
        };

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *window = Window::Listening {
            handle,
            generation,
            opened: Instant::now(),
        };
        shared.listening.store(true, Ordering::SeqCst);
        drop(window);

        let expiring = shared.clone();
        let timer = runtime::spawn(async move {
            runtime::sleep(expiring.listen_window).await;
            if let Err(e) = expiring.close_window(Some(generation)).await {
                error!("Unable to stop listener: {}", e);
            }
        });
        // a replaced timer belongs to an older generation
        *lock(&shared.timer) = Some(timer);
        Ok(true)
    }

    /// Close the open window now, if there is one.
    pub async fn close(&self) -> Result<bool> {
        self.shared.close_window(None).await
    }

    /// Start delivering events from [`DiscoverySession::sink`] to the
    /// session. Does nothing if the pump is already running.
    pub fn start_pump(&self) {
        let Some(stream) = lock(&self.shared.channel).stream.take() else {
            return;
        };
        let session = self.clone();
        let pump = runtime::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                session.handle_event(event).await;
            }
            debug!("Discovery event stream closed");
        });
        *lock(&self.shared.pump) = Some(pump);
    }

    /// Close the window, end the event pump and detach every sink handed out
    /// so far.
    pub async fn stop(&self) -> Result<()> {
        let closed = self.close().await;

        let mut channel = lock(&self.shared.channel);
        channel.sink.close_channel();
        *channel = Channel::new();
        drop(channel);

        if let Some(pump) = lock(&self.shared.pump).take() {
            pump.abort();
        }
        if let Some(timer) = lock(&self.shared.timer).take() {
            timer.abort();
        }
        lock(&self.shared.bound).clear();
        closed.map(|_| ())
    }

    pub async fn handle_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::GatewayFound(gateway) => self.on_gateway_discovered(gateway).await,
            DiscoveryEvent::BulbFound { gateway, bulb } => self.on_bulb_discovered(&gateway, bulb),
        }
    }

    /// Register a gateway with the bulbs it already knows, then bind to it.
    pub async fn on_gateway_discovered(&self, gateway: GatewayRef) {
        let address = gateway.address();
        info!("Found gateway: {}", address);

        let bulbs = gateway.bulbs();
        if self
            .shared
            .registry
            .add_gateway_with_bulbs(gateway.clone(), bulbs.clone())
        {
            self.shared
                .observers
                .publish(RegistryEvent::GatewayAdded(address));
        }
        for bulb in bulbs {
            self.publish_bulb(address, &bulb);
        }

        self.bind(&gateway).await;
    }

    pub fn on_bulb_discovered(&self, gateway: &GatewayRef, bulb: BulbRef) {
        let address = gateway.address();
        info!("Found bulb: {} on {}", bulb.label(), address);

        self.shared.registry.add_bulb(bulb.clone());
        self.publish_bulb(address, &bulb);
    }

    /// Connect to `gateway` if needed and subscribe to its bulb notifications
    /// once per session run. A failed connection leaves the gateway
    /// registered but disconnected.
    pub async fn bind(&self, gateway: &GatewayRef) {
        let address = gateway.address();
        if !gateway.is_connected() {
            match runtime::bounded(self.shared.device_timeout, gateway.connect()).await {
                Ok(()) => info!("Connected to gateway {}", address),
                Err(e) => warn!("Unable to connect to gateway {}: {}", address, e),
            }
        }

        if lock(&self.shared.bound).insert(address) {
            gateway.subscribe(self.sink());
        }
    }

    fn publish_bulb(&self, gateway: SocketAddr, bulb: &BulbRef) {
        self.shared.observers.publish(RegistryEvent::BulbAdded {
            label: bulb.label(),
            gateway,
        });
    }
}

impl<T: Transport> Shared<T> {
    /// Close the open window. With `expected` set, only the window of that
    /// generation is closed, so a stale timer cannot end a newer window.
    async fn close_window(&self, expected: Option<u64>) -> Result<bool> {
        let mut window = self.window.lock().await;
        let Window::Listening {
            handle,
            generation,
            opened,
        } = std::mem::replace(&mut *window, Window::Idle)
        else {
            return Ok(false);
        };

        if expected.is_some_and(|g| g != generation) {
            *window = Window::Listening {
                handle,
                generation,
                opened,
            };
            return Ok(false);
        }

        self.listening.store(false, Ordering::SeqCst);
        let stopping = self.transport.stop_listener(handle);
        let stopped = runtime::bounded(self.device_timeout, stopping).await;
        info!(
            "Gateway discovery ended after {:?}, {} gateways found.",
            opened.elapsed(),
            self.registry.gateway_count()
        );
        stopped.map_err(|e| Error::listener("stop", e))?;
        Ok(true)
    }
}
