//! In-memory gateways, bulbs and transport used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::future::ready;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::device::{Bulb, BulbRef, Gateway, GatewayRef};
use crate::runtime::BoxFuture;
use crate::transport::{DiscoveryEvent, DiscoverySink, Transport};
use crate::types::{Color, PowerState};

fn failure(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, format!("{op} refused"))
}

#[derive(Debug)]
pub struct FakeGateway {
    address: SocketAddr,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    connects: AtomicUsize,
    calls: Mutex<Vec<String>>,
    bulbs: Mutex<Vec<Weak<FakeBulb>>>,
    sinks: Mutex<Vec<DiscoverySink>>,
}

impl FakeGateway {
    pub fn new(last_octet: u8) -> Arc<Self> {
        Arc::new(FakeGateway {
            address: SocketAddr::from((Ipv4Addr::new(10, 0, 0, last_octet), 56700)),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            bulbs: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        })
    }

    pub fn connected(last_octet: u8) -> Arc<Self> {
        let gateway = Self::new(last_octet);
        gateway.connected.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn handle(self: &Arc<Self>) -> GatewayRef {
        self.clone()
    }

    pub fn refuse_connect(&self) {
        self.refuse_connect.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    /// Announce a bulb to every subscriber, the way a live gateway would.
    pub fn announce(self: &Arc<Self>, bulb: &Arc<FakeBulb>) {
        for sink in self.sinks.lock().unwrap().iter() {
            let _ = sink.unbounded_send(DiscoveryEvent::BulbFound {
                gateway: self.handle(),
                bulb: bulb.handle(),
            });
        }
    }

    fn record(&self, op: &str) -> BoxFuture<'_, io::Result<()>> {
        self.calls.lock().unwrap().push(op.to_string());
        if self.connected.load(Ordering::SeqCst) {
            Box::pin(ready(Ok(())))
        } else {
            Box::pin(ready(Err(failure(op))))
        }
    }
}

impl Gateway for FakeGateway {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> BoxFuture<'_, io::Result<()>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Box::pin(ready(Err(failure("connect"))));
        }
        self.connected.store(true, Ordering::SeqCst);
        Box::pin(ready(Ok(())))
    }

    fn turn_on(&self) -> BoxFuture<'_, io::Result<()>> {
        self.record("turn_on")
    }

    fn turn_off(&self) -> BoxFuture<'_, io::Result<()>> {
        self.record("turn_off")
    }

    fn refresh_bulbs(&self) -> BoxFuture<'_, io::Result<()>> {
        self.record("refresh_bulbs")
    }

    fn bulbs(&self) -> Vec<BulbRef> {
        self.bulbs
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|bulb| bulb as BulbRef)
            .collect()
    }

    fn subscribe(&self, sink: DiscoverySink) {
        self.sinks.lock().unwrap().push(sink);
    }
}

#[derive(Debug)]
pub struct FakeBulb {
    label: String,
    gateway: Arc<FakeGateway>,
    power: Mutex<PowerState>,
    color: Mutex<Option<Color>>,
    failing: Mutex<HashSet<String>>,
    failing_once: Mutex<HashMap<String, usize>>,
    hanging: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBulb {
    /// Create a bulb behind `gateway` and let the gateway know about it.
    pub fn attach(gateway: &Arc<FakeGateway>, label: &str, color: Option<Color>) -> Arc<Self> {
        let bulb = Arc::new(FakeBulb {
            label: label.to_string(),
            gateway: gateway.clone(),
            power: Mutex::new(PowerState::Off),
            color: Mutex::new(color),
            failing: Mutex::new(HashSet::new()),
            failing_once: Mutex::new(HashMap::new()),
            hanging: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        });
        gateway.bulbs.lock().unwrap().push(Arc::downgrade(&bulb));
        bulb
    }

    pub fn handle(self: &Arc<Self>) -> BulbRef {
        self.clone()
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    /// Make only the next call of `op` fail.
    pub fn fail_once(&self, op: &str) {
        *self.failing_once.lock().unwrap().entry(op.to_string()).or_default() += 1;
    }

    /// Make every later call of `op` never complete.
    pub fn hang_on(&self, op: &str) {
        self.hanging.lock().unwrap().insert(op.to_string());
    }

    pub fn set_power(&self, power: PowerState) {
        *self.power.lock().unwrap() = power;
    }

    pub fn current_color(&self) -> Option<Color> {
        *self.color.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == op).count()
    }

    fn attempt(&self, op: &str) -> io::Result<()> {
        self.calls.lock().unwrap().push(op.to_string());
        if let Some(left) = self.failing_once.lock().unwrap().get_mut(op)
            && *left > 0
        {
            *left -= 1;
            return Err(failure(op));
        }
        if self.failing.lock().unwrap().contains(op) {
            Err(failure(op))
        } else {
            Ok(())
        }
    }

    fn finish(&self, op: &str, result: io::Result<()>) -> BoxFuture<'_, io::Result<()>> {
        if self.hanging.lock().unwrap().contains(op) {
            Box::pin(futures::future::pending())
        } else {
            Box::pin(ready(result))
        }
    }
}

impl Bulb for FakeBulb {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn gateway(&self) -> GatewayRef {
        self.gateway.clone()
    }

    fn power_state(&self) -> PowerState {
        *self.power.lock().unwrap()
    }

    fn color(&self) -> Option<Color> {
        *self.color.lock().unwrap()
    }

    fn turn_on(&self) -> BoxFuture<'_, io::Result<()>> {
        let result = self.attempt("turn_on");
        if result.is_ok() {
            self.set_power(PowerState::On);
        }
        self.finish("turn_on", result)
    }

    fn turn_off(&self) -> BoxFuture<'_, io::Result<()>> {
        let result = self.attempt("turn_off");
        if result.is_ok() {
            self.set_power(PowerState::Off);
        }
        self.finish("turn_off", result)
    }

    fn set_color(&self, color: &Color) -> BoxFuture<'_, io::Result<()>> {
        let result = self.attempt("set_color");
        if result.is_ok() {
            *self.color.lock().unwrap() = Some(*color);
        }
        self.finish("set_color", result)
    }
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    refuse_bind: AtomicBool,
    hang_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    sink: Mutex<Option<DiscoverySink>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_bind(&self) {
        self.refuse_bind.store(true, Ordering::SeqCst);
    }

    /// Make every later listener start never complete.
    pub fn hang_start(&self) {
        self.hang_start.store(true, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Emit an event on the sink of the most recent listener.
    pub fn emit(&self, event: DiscoveryEvent) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.unbounded_send(event).is_ok(),
            None => false,
        }
    }
}

impl Transport for Arc<FakeTransport> {
    type Handle = usize;

    async fn start_listener(&self, sink: DiscoverySink) -> io::Result<usize> {
        if self.refuse_bind.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "port 56700 in use"));
        }
        if self.hang_start.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(self.starts.fetch_add(1, Ordering::SeqCst))
    }

    async fn stop_listener(&self, _handle: usize) -> io::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
