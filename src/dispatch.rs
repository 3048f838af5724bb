//! Applying commands to resolved bulbs and gateways.
//!
//! Every device call is bounded by the configured device timeout and its
//! failure is contained to the device it was made on. Commands touching the
//! same bulb run one after the other: each call holds the bulb's lock, and a
//! pulse holds the locks of all its bulbs from capture until restore.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::action::Action;
use crate::config::Config;
use crate::device::{BulbRef, GatewayRef, bulb_key};
use crate::errors::Error;
use crate::outcome::Outcome;
use crate::registry::Registry;
use crate::runtime::{self, BoxFuture, Mutex};
use crate::types::Color;

type BulbKey = (SocketAddr, String);

/// One async lock per bulb, created on first use.
#[derive(Debug, Clone, Default)]
struct BulbLocks(Arc<StdMutex<HashMap<BulbKey, Arc<Mutex<()>>>>>);

impl BulbLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<BulbKey, Arc<Mutex<()>>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &BulbKey) -> Arc<Mutex<()>> {
        self.map().entry(key.clone()).or_default().clone()
    }

    /// Drop the locks no command is holding or waiting on.
    fn prune(&self) -> usize {
        let mut locks = self.map();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// A single-bulb operation.
#[derive(Debug, Clone, Copy)]
enum BulbOp {
    On,
    Off,
    Toggle,
    Color(Color),
}

impl BulbOp {
    /// Start the device call for `bulb`, returning its name for logging.
    ///
    /// Toggle reads the cached power state and issues exactly one call.
    fn start(self, bulb: &BulbRef) -> (&'static str, BoxFuture<'_, io::Result<()>>) {
        match self {
            BulbOp::On => ("turn_on", bulb.turn_on()),
            BulbOp::Off => ("turn_off", bulb.turn_off()),
            BulbOp::Toggle if bulb.power_state().is_on() => ("turn_off", bulb.turn_off()),
            BulbOp::Toggle => ("turn_on", bulb.turn_on()),
            BulbOp::Color(color) => ("set_color", bulb.set_color(&color)),
        }
    }
}

/// Original colors captured before a pulse, keyed by bulb.
///
/// Only bulbs whose color could be read are captured; only captured bulbs
/// are changed and restored.
#[derive(Debug, Default)]
struct PulseTransaction {
    captured: Vec<(BulbRef, Color)>,
}

impl PulseTransaction {
    fn capture(bulbs: &[BulbRef], outcome: &mut Outcome) -> Self {
        let mut transaction = PulseTransaction::default();
        for bulb in bulbs {
            let label = bulb.label();
            match bulb.color() {
                Some(color) => {
                    debug!("Captured color of {}: {}", label, color);
                    transaction.captured.push((bulb.clone(), color));
                }
                None => {
                    warn!("Cannot read color of {}, skipping pulse", label);
                    outcome.failure(label.clone(), Error::ColorUnknown(label));
                }
            }
        }
        transaction
    }

    fn bulbs(&self) -> impl Iterator<Item = &BulbRef> {
        self.captured.iter().map(|(bulb, _)| bulb)
    }
}

/// Applies validated actions to bulbs and gateways.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    device_timeout: Duration,
    refresh_cycles: u32,
    refresh_interval: Duration,
    locks: BulbLocks,
}

impl CommandDispatcher {
    pub fn new(config: &Config) -> Self {
        CommandDispatcher {
            device_timeout: config.device_timeout(),
            refresh_cycles: config.refresh_cycles,
            refresh_interval: config.refresh_interval(),
            locks: BulbLocks::default(),
        }
    }

    /// Forget the per-bulb locks of bulbs no command is using right now.
    pub fn release_idle_locks(&self) {
        let released = self.locks.prune();
        debug!("Released {} idle bulb locks", released);
    }

    /// Apply `action` to each of `bulbs`.
    pub async fn apply(&self, bulbs: &[BulbRef], action: &Action) -> Outcome {
        match *action {
            Action::PowerOn => self.each(bulbs, BulbOp::On).await,
            Action::PowerOff => self.each(bulbs, BulbOp::Off).await,
            Action::Toggle => self.each(bulbs, BulbOp::Toggle).await,
            Action::SetColor(color) => self.each(bulbs, BulbOp::Color(color)).await,
            Action::Pulse { color, hold } => self.pulse(bulbs, color, hold).await,
        }
    }

    async fn each(&self, bulbs: &[BulbRef], op: BulbOp) -> Outcome {
        let mut outcome = Outcome::new(bulbs.len());
        for bulb in bulbs {
            let lock = self.locks.get(&bulb_key(bulb.as_ref()));
            let _guard = lock.lock().await;

            let label = bulb.label();
            let (name, call) = op.start(bulb);
            match self.call(&label, name, call).await {
                Ok(()) => outcome.success(label),
                Err(e) => outcome.failure(label, e),
            }
        }
        outcome
    }

    /// Temporarily show `color` on `bulbs`, then put their colors back.
    ///
    /// Bulbs whose color cannot be read are reported and left untouched. The
    /// restore phase runs for every captured bulb even when applying the
    /// pulse color failed for some of them.
    pub async fn pulse(&self, bulbs: &[BulbRef], color: Color, hold: Duration) -> Outcome {
        let mut keyed = bulbs
            .iter()
            .map(|bulb| (bulb_key(bulb.as_ref()), bulb.clone()))
            .collect::<Vec<_>>();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        let mut outcome = Outcome::new(keyed.len());

        // always in key order
        let locks = keyed
            .iter()
            .map(|(key, _)| self.locks.get(key))
            .collect::<Vec<_>>();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let unique = keyed.into_iter().map(|(_, bulb)| bulb).collect::<Vec<_>>();
        let transaction = PulseTransaction::capture(&unique, &mut outcome);

        let mut apply_failed = HashSet::new();
        for bulb in transaction.bulbs() {
            let label = bulb.label();
            if let Err(e) = self.call(&label, "set_color", bulb.set_color(&color)).await {
                apply_failed.insert(label.clone());
                outcome.failure(label, e);
            }
        }

        debug!("Holding pulse color {} for {:?}", color, hold);
        runtime::sleep(hold).await;

        for (bulb, original) in &transaction.captured {
            let label = bulb.label();
            match self.call(&label, "set_color", bulb.set_color(original)).await {
                Ok(()) if !apply_failed.contains(&label) => outcome.success(label),
                Ok(()) => {}
                Err(e) => outcome.failure(label, e),
            }
        }

        drop(guards);
        outcome
    }

    /// Turn every bulb behind each gateway on or off in one call per gateway.
    pub async fn power_gateways(&self, gateways: &[GatewayRef], on: bool) -> Outcome {
        let mut outcome = Outcome::new(gateways.len());
        for gateway in gateways {
            let name = gateway.address().to_string();
            let (action, call) = if on {
                ("turn_on", gateway.turn_on())
            } else {
                ("turn_off", gateway.turn_off())
            };
            match self.call(&name, action, call).await {
                Ok(()) => outcome.success(name),
                Err(e) => outcome.failure(name, e),
            }
        }
        outcome
    }

    /// Ask every connected gateway to re-pull its bulbs' state.
    ///
    /// Disconnected gateways are skipped and do not count as requested.
    pub async fn refresh_all(&self, registry: &Registry) -> Outcome {
        let gateways = registry
            .snapshot_gateways()
            .into_iter()
            .filter(|gateway| gateway.is_connected())
            .collect::<Vec<_>>();

        let mut outcome = Outcome::new(gateways.len());
        for gateway in &gateways {
            let name = gateway.address().to_string();
            match self.call(&name, "refresh_bulbs", gateway.refresh_bulbs()).await {
                Ok(()) => outcome.success(name),
                Err(e) => outcome.failure(name, e),
            }
        }
        outcome
    }

    /// Refresh repeatedly while a discovery window is open.
    ///
    /// Runs up to the configured number of rounds, waiting the refresh
    /// interval before each, and stops as soon as `listening` reports the
    /// window closed. Returns the number of rounds run.
    pub async fn refresh_cycle<F>(&self, registry: &Registry, listening: F) -> u32
    where
        F: Fn() -> bool,
    {
        let mut rounds = 0;
        for _ in 0..self.refresh_cycles {
            runtime::sleep(self.refresh_interval).await;
            if !listening() {
                break;
            }
            self.refresh_all(registry).await;
            rounds += 1;
        }
        info!("Refresh cycle finished after {} rounds", rounds);
        rounds
    }

    async fn call(
        &self,
        name: &str,
        action: &str,
        call: BoxFuture<'_, io::Result<()>>,
    ) -> Result<(), Error> {
        debug!("Calling {}() on {}", action, name);
        runtime::bounded(self.device_timeout, call)
            .await
            .map_err(|e| {
                error!("Error calling {}() on {}: {}", action, name, e);
                Error::unreachable(name, action, e)
            })
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod tests {
    use super::*;
    use crate::device::{Bulb, Gateway};
    use crate::runtime::Instant;
    use crate::testing::{FakeBulb, FakeGateway};
    use crate::types::PowerState;

    fn dispatcher() -> CommandDispatcher {
        CommandDispatcher::new(&Config::fast())
    }

    #[tokio::test]
    async fn test_toggle_issues_one_call() {
        let gateway = FakeGateway::connected(1);
        let lit = FakeBulb::attach(&gateway, "Lit", None);
        lit.set_power(PowerState::On);
        let dark = FakeBulb::attach(&gateway, "Dark", None);

        let outcome = dispatcher()
            .apply(&[lit.handle(), dark.handle()], &Action::Toggle)
            .await;

        assert!(outcome.is_success());
        assert_eq!(lit.calls(), vec!["turn_off"]);
        assert_eq!(dark.calls(), vec!["turn_on"]);
        assert_eq!(lit.power_state(), PowerState::Off);
        assert_eq!(dark.power_state(), PowerState::On);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let gateway = FakeGateway::connected(1);
        let a = FakeBulb::attach(&gateway, "A", None);
        let b = FakeBulb::attach(&gateway, "B", None);
        b.fail_on("turn_on");
        let c = FakeBulb::attach(&gateway, "C", None);

        let outcome = dispatcher()
            .apply(&[a.handle(), b.handle(), c.handle()], &Action::PowerOn)
            .await;

        assert_eq!(outcome.to_string(), "2 of 3 devices succeeded");
        assert_eq!(outcome.failures[0].name, "B");
        assert!(matches!(
            outcome.failures[0].error,
            Error::DeviceUnreachable { .. }
        ));
        assert_eq!(c.power_state(), PowerState::On);
    }

    #[tokio::test]
    async fn test_hanging_call_is_bounded() {
        let gateway = FakeGateway::connected(1);
        let stuck = FakeBulb::attach(&gateway, "Stuck", None);
        stuck.hang_on("set_color");

        let started = Instant::now();
        let outcome = dispatcher()
            .apply(&[stuck.handle()], &Action::SetColor(Color::RED))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        match &outcome.failures[0].error {
            Error::DeviceUnreachable { err, .. } => {
                assert_eq!(err.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pulse_skips_unreadable_bulb() {
        let gateway = FakeGateway::connected(1);
        let a = FakeBulb::attach(&gateway, "A", Some(Color::BLUE));
        let b = FakeBulb::attach(&gateway, "B", None);

        let outcome = dispatcher()
            .pulse(
                &[a.handle(), b.handle()],
                Color::RED,
                Duration::from_millis(20),
            )
            .await;

        assert_eq!(a.current_color(), Some(Color::BLUE));
        assert_eq!(a.count("set_color"), 2);
        assert!(b.calls().is_empty());
        assert_eq!(outcome.succeeded, vec!["A"]);
        assert_eq!(outcome.failures[0].error, Error::ColorUnknown("B".into()));
    }

    #[tokio::test]
    async fn test_pulse_restores_after_apply_failure() {
        let gateway = FakeGateway::connected(1);
        let a = FakeBulb::attach(&gateway, "A", Some(Color::BLUE));
        let b = FakeBulb::attach(&gateway, "B", Some(Color::GREEN));
        b.fail_once("set_color");

        let outcome = dispatcher()
            .pulse(
                &[a.handle(), b.handle()],
                Color::RED,
                Duration::from_millis(20),
            )
            .await;

        assert_eq!(a.current_color(), Some(Color::BLUE));
        assert_eq!(b.current_color(), Some(Color::GREEN));
        assert_eq!(b.count("set_color"), 2);
        assert_eq!(outcome.to_string(), "1 of 2 devices succeeded");
    }

    #[tokio::test]
    async fn test_overlapping_pulses_restore_original_color() {
        let gateway = FakeGateway::connected(1);
        let desk = FakeBulb::attach(&gateway, "Desk", Some(Color::BLUE));
        let dispatcher = dispatcher();
        let bulbs = [desk.handle()];

        tokio::join!(
            dispatcher.pulse(&bulbs, Color::RED, Duration::from_millis(30)),
            dispatcher.pulse(&bulbs, Color::GREEN, Duration::from_millis(30)),
        );

        assert_eq!(desk.current_color(), Some(Color::BLUE));
    }

    #[tokio::test]
    async fn test_refresh_skips_disconnected_gateways() {
        let registry = Registry::new();
        let online = FakeGateway::connected(1);
        let offline = FakeGateway::new(2);
        registry.add_gateway(online.handle());
        registry.add_gateway(offline.handle());

        let outcome = dispatcher().refresh_all(&registry).await;

        assert_eq!(outcome.requested, 1);
        assert_eq!(online.calls(), vec!["refresh_bulbs"]);
        assert!(offline.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_cycle_stops_when_window_closes() {
        let registry = Registry::new();
        let gateway = FakeGateway::connected(1);
        registry.add_gateway(gateway.handle());

        let dispatcher = dispatcher();
        assert_eq!(dispatcher.refresh_cycle(&registry, || true).await, 3);
        assert_eq!(dispatcher.refresh_cycle(&registry, || false).await, 0);
        assert_eq!(gateway.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_power_gateways() {
        let online = FakeGateway::connected(1);
        let offline = FakeGateway::new(2);

        let outcome = dispatcher()
            .power_gateways(&[online.handle(), offline.handle()], false)
            .await;

        assert_eq!(outcome.succeeded, vec![online.address().to_string()]);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_locks_are_released() {
        let dispatcher = dispatcher();
        let gateway = FakeGateway::connected(1);
        let desk = FakeBulb::attach(&gateway, "Desk", None);
        dispatcher.apply(&[desk.handle()], &Action::PowerOn).await;
        assert_eq!(dispatcher.locks.len(), 1);

        let busy = dispatcher.locks.get(&bulb_key(&*desk));
        dispatcher.release_idle_locks();
        assert_eq!(dispatcher.locks.len(), 1);

        drop(busy);
        dispatcher.release_idle_locks();
        assert_eq!(dispatcher.locks.len(), 0);
    }
}
