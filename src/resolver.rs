//! Name-to-bulb resolution with bounded retries.
//!
//! Discovery is asynchronous, so a bulb named in a command may not be known
//! yet when the command arrives. Resolution opens a discovery window and
//! polls the registry a bounded number of times before giving up on a name.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::Config;
use crate::device::{BulbRef, GatewayRef, label_key};
use crate::discovery::DiscoverySession;
use crate::errors::Error;
use crate::outcome::Failure;
use crate::registry::Registry;
use crate::runtime;
use crate::transport::Transport;

/// Bulbs a set of names resolved to, plus the names that did not make it.
#[derive(Debug, Default)]
pub struct Resolution {
    pub bulbs: Vec<BulbRef>,
    pub failures: Vec<Failure>,
    /// Set when no discovery window could be opened for this resolution.
    pub discovery_error: Option<Error>,
}

impl Resolution {
    /// The first resolved bulb, if any.
    pub fn first(&self) -> Option<&BulbRef> {
        self.bulbs.first()
    }
}

/// Result of reconnecting a gateway, remembered for one resolution so that
/// bulbs sharing a gateway cause a single connection attempt.
type Reachability = HashMap<SocketAddr, Result<(), (io::ErrorKind, String)>>;

pub struct Resolver<T: Transport> {
    session: DiscoverySession<T>,
    registry: Registry,
    attempts: u32,
    lookup_delay: Duration,
    batch_lookup_delay: Duration,
    device_timeout: Duration,
}

impl<T: Transport> Resolver<T> {
    pub fn new(session: DiscoverySession<T>, registry: Registry, config: &Config) -> Self {
        Resolver {
            session,
            registry,
            attempts: config.discovery_attempts,
            lookup_delay: config.lookup_delay(),
            batch_lookup_delay: config.batch_lookup_delay(),
            device_timeout: config.device_timeout(),
        }
    }

    /// Resolve a single name.
    ///
    /// Polls the registry up to the configured number of attempts, plus one
    /// final pass, returning as soon as the name is known. The resolved bulb
    /// is dropped if its gateway is disconnected and cannot be reconnected.
    pub async fn resolve_one(&self, name: &str) -> Resolution {
        let mut resolution = Resolution {
            discovery_error: self.open_window().await,
            ..Default::default()
        };

        let mut found = None;
        for attempt in 0..self.attempts {
            found = self.registry.find_by_label(name);
            if found.is_some() {
                break;
            }
            debug!("Bulb {} not known yet (attempt {})", name, attempt + 1);
            runtime::sleep(self.lookup_delay).await;
        }

        // try one more time
        let Some(bulb) = found.or_else(|| self.registry.find_by_label(name)) else {
            warn!("Bulb could not be found: {}", name);
            resolution
                .failures
                .push(Failure::new(name, Error::NameNotFound(name.to_string())));
            return resolution;
        };

        debug!("Bulb found: {}", bulb.label());
        let mut reachability = Reachability::new();
        match self.ensure_reachable(name, &bulb, &mut reachability).await {
            Ok(()) => resolution.bulbs.push(bulb),
            Err(e) => resolution.failures.push(Failure::new(name, e)),
        }
        resolution
    }

    /// Resolve several names at once.
    ///
    /// Each pass only searches for the names not matched so far, and the
    /// loop ends early once every name is matched. Names are compared
    /// case-insensitively; repeated names are resolved once.
    pub async fn resolve_many<S: AsRef<str>>(&self, names: &[S]) -> Resolution {
        let mut resolution = Resolution {
            discovery_error: self.open_window().await,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut remaining = names
            .iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| seen.insert(label_key(n)))
            .collect::<Vec<_>>();
        info!("Searching for bulbs: {}", remaining.join(", "));

        let mut found = Vec::new();
        let mut passes = 0;
        while passes < self.attempts && !remaining.is_empty() {
            let lookup = self.registry.find_all_by_label(remaining);
            found.extend(lookup.found);
            remaining = lookup.remaining;
            passes += 1;

            if !remaining.is_empty() {
                runtime::sleep(self.batch_lookup_delay).await;
            }
        }

        // try one more time
        if !remaining.is_empty() {
            let lookup = self.registry.find_all_by_label(remaining);
            found.extend(lookup.found);
            remaining = lookup.remaining;
        }

        if remaining.is_empty() {
            info!("All requested bulbs found");
        } else {
            warn!("Bulbs could not be found: {}", remaining.join(", "));
        }
        for name in remaining {
            let err = Error::NameNotFound(name.clone());
            resolution.failures.push(Failure::new(name, err));
        }

        let mut reachability = Reachability::new();
        for bulb in found {
            let label = bulb.label();
            match self.ensure_reachable(&label, &bulb, &mut reachability).await {
                Ok(()) => resolution.bulbs.push(bulb),
                Err(e) => resolution.failures.push(Failure::new(label, e)),
            }
        }
        resolution
    }

    /// Every known gateway; when none is known yet, open a window and wait
    /// a bounded time for the first one.
    pub async fn wait_for_gateways(&self) -> (Vec<GatewayRef>, Option<Error>) {
        if !self.registry.is_empty() {
            return (self.registry.snapshot_gateways(), None);
        }

        let discovery_error = self.open_window().await;
        for _ in 0..self.attempts {
            runtime::sleep(self.batch_lookup_delay).await;
            if !self.registry.is_empty() {
                break;
            }
        }
        (self.registry.snapshot_gateways(), discovery_error)
    }

    async fn open_window(&self) -> Option<Error> {
        match self.session.start_if_idle().await {
            Ok(_) => None,
            // resolve against whatever is already known
            Err(e) => Some(e),
        }
    }

    async fn ensure_reachable(
        &self,
        name: &str,
        bulb: &BulbRef,
        reachability: &mut Reachability,
    ) -> Result<(), Error> {
        let gateway = bulb.gateway();
        if gateway.is_connected() {
            return Ok(());
        }

        let address = gateway.address();
        let result = match reachability.get(&address) {
            Some(known) => known.clone(),
            None => {
                info!("Reconnecting gateway {} for {}", address, name);
                let result = runtime::bounded(self.device_timeout, gateway.connect())
                    .await
                    .map_err(|e| (e.kind(), e.to_string()));
                reachability.insert(address, result.clone());
                result
            }
        };

        result.map_err(|(kind, message)| {
            warn!("Gateway {} unreachable, dropping {}: {}", address, name, message);
            Error::gateway_unreachable(name, address, io::Error::new(kind, message))
        })
    }
}
