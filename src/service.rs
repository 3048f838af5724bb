//! The operation surface hosts drive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::action::{Action, ActionKind, Request, checked_hold};
use crate::config::Config;
use crate::device::BulbInfo;
use crate::discovery::DiscoverySession;
use crate::dispatch::CommandDispatcher;
use crate::errors::Error;
use crate::history::CommandHistory;
use crate::observer::{Observers, RegistryEvent};
use crate::outcome::Outcome;
use crate::registry::Registry;
use crate::resolver::{Resolution, Resolver};
use crate::transport::Transport;
use crate::types::Color;

type Result<T> = std::result::Result<T, Error>;

/// Discovers gateways through `T` and applies commands to bulbs by name.
///
/// Every command is best effort: names that never resolve and devices that
/// fail are reported in the returned [`Outcome`] while the remaining devices
/// are still handled.
pub struct Service<T: Transport> {
    config: Config,
    registry: Registry,
    observers: Observers,
    session: DiscoverySession<T>,
    resolver: Resolver<T>,
    dispatcher: CommandDispatcher,
    history: Mutex<CommandHistory>,
    running: AtomicBool,
}

impl<T: Transport> Service<T> {
    pub fn new(transport: T, config: Config) -> Self {
        let registry = Registry::new();
        let observers = Observers::new();
        let session =
            DiscoverySession::new(transport, registry.clone(), observers.clone(), &config);
        let resolver = Resolver::new(session.clone(), registry.clone(), &config);
        let dispatcher = CommandDispatcher::new(&config);
        let history = CommandHistory::with_max_entries(config.history_size);

        Service {
            config,
            registry,
            observers,
            session,
            resolver,
            dispatcher,
            history: Mutex::new(history),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn session(&self) -> &DiscoverySession<T> {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start consuming discovery events and open the first discovery window.
    ///
    /// A listener that cannot be opened is returned as an error, but the
    /// service is still started: commands work against devices that are
    /// already known, and later commands try to open a window again.
    pub async fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Starting service");
            self.session.start_pump();
        }
        self.session.start_if_idle().await.map(|_| ())
    }

    /// Stop listening and detach from every gateway's notifications.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping service");
        self.session.stop().await
    }

    /// Turn on every bulb behind every known gateway.
    pub async fn turn_on_all(&self) -> Outcome {
        self.power_all(true).await
    }

    /// Turn off every bulb behind every known gateway.
    pub async fn turn_off_all(&self) -> Outcome {
        self.power_all(false).await
    }

    pub async fn turn_on(&self, name: &str) -> Outcome {
        self.run(&[name], Action::PowerOn).await
    }

    pub async fn turn_off(&self, name: &str) -> Outcome {
        self.run(&[name], Action::PowerOff).await
    }

    pub async fn toggle(&self, name: &str) -> Outcome {
        self.run(&[name], Action::Toggle).await
    }

    pub async fn set_color(&self, name: &str, color: Color) -> Outcome {
        self.run(&[name], Action::SetColor(color)).await
    }

    pub async fn turn_on_many<S: AsRef<str>>(&self, names: &[S]) -> Outcome {
        self.run(names, Action::PowerOn).await
    }

    pub async fn turn_off_many<S: AsRef<str>>(&self, names: &[S]) -> Outcome {
        self.run(names, Action::PowerOff).await
    }

    pub async fn toggle_many<S: AsRef<str>>(&self, names: &[S]) -> Outcome {
        self.run(names, Action::Toggle).await
    }

    pub async fn set_color_many<S: AsRef<str>>(&self, names: &[S], color: Color) -> Outcome {
        self.run(names, Action::SetColor(color)).await
    }

    /// Show `color` on the named bulbs for `hold`, then restore their colors.
    ///
    /// Without `hold` the configured default is used; a zero hold is
    /// rejected. The call returns once the colors have been restored.
    pub async fn pulse<S: AsRef<str>>(
        &self,
        names: &[S],
        color: Color,
        hold: Option<Duration>,
    ) -> Result<Outcome> {
        let hold = match checked_hold(hold, self.config.pulse_hold()) {
            Ok(hold) => hold,
            Err(e) => {
                warn!("Rejected pulse: {}", e);
                self.lock_history().record_error(&e.to_string());
                return Err(e);
            }
        };
        Ok(self.run(names, Action::Pulse { color, hold }).await)
    }

    /// Validate `request` and run it.
    ///
    /// Unknown actions and invalid parameters are returned as errors; device
    /// problems end up in the [`Outcome`].
    pub async fn execute(&self, request: &Request) -> Result<Outcome> {
        let action = match request.to_action(self.config.pulse_hold()) {
            Ok(action) => action,
            Err(e) => {
                warn!("Rejected request {}: {}", request.describe(), e);
                self.lock_history().record_error(&e.to_string());
                return Err(e);
            }
        };
        info!("Executing {}", request.describe());
        Ok(self.run(request.bulbs.as_slice(), action).await)
    }

    /// Ask every connected gateway to re-pull the state of its bulbs.
    pub async fn refresh_all(&self) -> Outcome {
        self.dispatcher.refresh_all(&self.registry).await
    }

    /// Refresh a few times in a row while the discovery window stays open.
    pub async fn refresh_cycle(&self) -> u32 {
        self.dispatcher
            .refresh_cycle(&self.registry, || self.session.is_listening())
            .await
    }

    /// Forget every known gateway and bulb, forcing full rediscovery on the
    /// next command.
    ///
    /// Gateways stay subscribed, so a rediscovered gateway is not bound a
    /// second time.
    pub fn purge_registry(&self) {
        info!("Purging {} known gateways", self.registry.gateway_count());
        self.registry.clear();
        self.dispatcher.release_idle_locks();
        self.observers.publish(RegistryEvent::Purged);
    }

    pub fn list_known_bulbs(&self) -> Vec<BulbInfo> {
        self.registry
            .snapshot_bulbs()
            .iter()
            .map(|bulb| BulbInfo::of(bulb.as_ref()))
            .collect()
    }

    /// Call `callback` after every registry change.
    pub fn subscribe<F>(&self, callback: F) -> Uuid
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn history(&self) -> CommandHistory {
        self.lock_history().clone()
    }

    /// Returns diagnostics including discovery state, known devices, and
    /// command history.
    pub fn diagnostics(&self) -> Value {
        let snapshot = self.registry.snapshot();
        let gateways = snapshot
            .gateways
            .iter()
            .map(|g| {
                json!({
                    "address": g.address().to_string(),
                    "connected": g.is_connected(),
                })
            })
            .collect::<Vec<_>>();
        let bulbs = snapshot
            .bulbs
            .iter()
            .map(|b| BulbInfo::of(b.as_ref()))
            .collect::<Vec<_>>();

        let mut diag = json!({
            "running": self.is_running(),
            "listening": self.session.is_listening(),
            "gateways": gateways,
            "bulbs": serde_json::to_value(bulbs).unwrap_or(Value::Null),
        });
        diag["history"] =
            serde_json::to_value(self.lock_history().summary()).unwrap_or(Value::Null);
        diag
    }

    async fn power_all(&self, on: bool) -> Outcome {
        if !self.registry.is_empty() {
            self.refresh_all().await;
        }
        let (gateways, discovery_error) = self.resolver.wait_for_gateways().await;
        if gateways.is_empty() {
            warn!("No gateways found");
        }

        let mut outcome = self.dispatcher.power_gateways(&gateways, on).await;
        outcome.discovery_error = discovery_error;

        let kind = if on {
            ActionKind::PowerOn
        } else {
            ActionKind::PowerOff
        };
        self.finish(kind, outcome)
    }

    async fn run<S: AsRef<str>>(&self, names: &[S], action: Action) -> Outcome {
        let resolution = match names {
            [name] => self.resolver.resolve_one(name.as_ref()).await,
            _ => self.resolver.resolve_many(names).await,
        };
        let Resolution {
            bulbs,
            failures,
            discovery_error,
        } = resolution;

        let mut outcome = self.dispatcher.apply(&bulbs, &action).await;
        outcome.requested += failures.len();
        outcome.extend_failures(failures);
        outcome.discovery_error = discovery_error;
        self.finish(action.kind(), outcome)
    }

    fn finish(&self, kind: ActionKind, outcome: Outcome) -> Outcome {
        info!("{}: {}", kind, outcome);
        self.lock_history().record(kind, &outcome);
        outcome
    }

    fn lock_history(&self) -> MutexGuard<'_, CommandHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
