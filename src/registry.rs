//! Thread-safe store of discovered gateways and bulbs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::device::{BulbRef, GatewayRef, label_key};

/// Result of a multi-name lookup.
///
/// `remaining` holds the requested names that did not match yet, in request
/// order, so it can be fed straight back into the next lookup pass.
#[derive(Debug, Default)]
pub struct Lookup {
    pub found: Vec<BulbRef>,
    pub remaining: Vec<String>,
}

impl Lookup {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Consistent view of the whole registry.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub gateways: Vec<GatewayRef>,
    pub bulbs: Vec<BulbRef>,
}

#[derive(Default)]
struct Inner {
    gateways: Vec<GatewayRef>,
    bulbs: HashMap<String, BulbRef>,
}

impl Inner {
    fn has_gateway(&self, gateway: &GatewayRef) -> bool {
        let address = gateway.address();
        self.gateways.iter().any(|g| g.address() == address)
    }

    fn insert_gateway(&mut self, gateway: GatewayRef) -> bool {
        if self.has_gateway(&gateway) {
            return false;
        }
        self.gateways.push(gateway);
        true
    }

    fn insert_bulb(&mut self, bulb: BulbRef) {
        self.insert_gateway(bulb.gateway());

        let label = bulb.label();
        if let Some(previous) = self.bulbs.insert(label_key(&label), bulb.clone())
            && previous.gateway().address() != bulb.gateway().address()
        {
            warn!(
                "Duplicate bulb label {:?}: {} replaces {}",
                label,
                bulb.gateway().address(),
                previous.gateway().address()
            );
        }
    }
}

/// Registry of every gateway and bulb discovered so far.
///
/// Bulbs are indexed by case-folded label; when two bulbs share a label the
/// most recently added one wins. A bulb is only ever visible together with
/// its gateway. All operations take one coarse lock, and readers iterate over
/// snapshots rather than the live collections.
///
/// Cloning a `Registry` yields another handle to the same store.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `gateway` unless a gateway with the same address is known.
    ///
    /// Returns `true` if the gateway was new.
    pub fn add_gateway(&self, gateway: GatewayRef) -> bool {
        self.lock().insert_gateway(gateway)
    }

    /// Insert `gateway` together with the bulbs it already reports.
    ///
    /// Both become visible to readers at the same time.
    pub fn add_gateway_with_bulbs(&self, gateway: GatewayRef, bulbs: Vec<BulbRef>) -> bool {
        let mut inner = self.lock();
        let added = inner.insert_gateway(gateway);
        for bulb in bulbs {
            inner.insert_bulb(bulb);
        }
        added
    }

    /// Insert or overwrite the label mapping for `bulb`.
    ///
    /// The bulb's gateway is added in the same step if it is not known yet.
    pub fn add_bulb(&self, bulb: BulbRef) {
        self.lock().insert_bulb(bulb);
    }

    pub fn snapshot_gateways(&self) -> Vec<GatewayRef> {
        self.lock().gateways.clone()
    }

    pub fn snapshot_bulbs(&self) -> Vec<BulbRef> {
        self.lock().bulbs.values().cloned().collect()
    }

    /// Gateways and bulbs taken under the same lock.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            gateways: inner.gateways.clone(),
            bulbs: inner.bulbs.values().cloned().collect(),
        }
    }

    pub fn gateway_count(&self) -> usize {
        self.lock().gateways.len()
    }

    pub fn bulb_count(&self) -> usize {
        self.lock().bulbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().gateways.is_empty()
    }

    /// Case-insensitive lookup of a single label.
    pub fn find_by_label(&self, name: &str) -> Option<BulbRef> {
        let found = self.lock().bulbs.get(&label_key(name)).cloned();
        if found.is_none() {
            debug!("Bulb not found: {}", name);
        }
        found
    }

    /// Case-insensitive lookup of several labels at once.
    ///
    /// Matched names are consumed; the unmatched ones come back in
    /// [`Lookup::remaining`].
    pub fn find_all_by_label<I, S>(&self, names: I) -> Lookup
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = self.lock();
        let mut lookup = Lookup::default();
        for name in names.into_iter().map(Into::into) {
            match inner.bulbs.get(&label_key(&name)) {
                Some(bulb) => lookup.found.push(bulb.clone()),
                None => lookup.remaining.push(name),
            }
        }
        drop(inner);

        if !lookup.is_complete() {
            debug!("Bulbs not found: {}", lookup.remaining.join(", "));
        }
        lookup
    }

    /// Forget every gateway and bulb.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.gateways.clear();
        inner.bulbs.clear();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Registry")
            .field("gateways", &inner.gateways.len())
            .field("bulbs", &inner.bulbs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Gateway;
    use crate::testing::{FakeBulb, FakeGateway};
    use crate::types::Color;
    use std::collections::HashSet;
    use std::thread;

    fn labels(bulbs: &[BulbRef]) -> HashSet<String> {
        bulbs.iter().map(|b| b.label()).collect()
    }

    #[test]
    fn test_add_gateway_is_keyed_by_address() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);

        assert!(registry.add_gateway(gateway.handle()));
        assert!(!registry.add_gateway(gateway.handle()));
        assert!(registry.add_gateway(FakeGateway::new(2).handle()));
        assert_eq!(registry.gateway_count(), 2);
    }

    #[test]
    fn test_add_bulb_registers_its_gateway() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);
        let kitchen = FakeBulb::attach(&gateway, "Kitchen", None);

        registry.add_bulb(kitchen.handle());

        assert_eq!(registry.gateway_count(), 1);
        assert_eq!(registry.snapshot_gateways()[0].address(), gateway.address());
    }

    #[test]
    fn test_find_by_label_ignores_case() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);
        registry.add_bulb(FakeBulb::attach(&gateway, "Kitchen", None).handle());

        assert!(registry.find_by_label("kitchen").is_some());
        assert!(registry.find_by_label("KITCHEN").is_some());
        assert!(registry.find_by_label("Hallway").is_none());
    }

    #[test]
    fn test_duplicate_label_last_write_wins() {
        let registry = Registry::new();
        let first = FakeGateway::new(1);
        let second = FakeGateway::new(2);
        registry.add_bulb(FakeBulb::attach(&first, "Desk", Some(Color::RED)).handle());
        registry.add_bulb(FakeBulb::attach(&second, "desk", Some(Color::BLUE)).handle());

        let found = registry.find_by_label("Desk").unwrap();
        assert_eq!(found.gateway().address(), second.address());
        assert_eq!(registry.bulb_count(), 1);
        assert_eq!(registry.gateway_count(), 2);
    }

    #[test]
    fn test_find_all_by_label_consumes_matches() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);
        registry.add_bulb(FakeBulb::attach(&gateway, "A", None).handle());

        let lookup = registry.find_all_by_label(["a", "B"]);
        assert_eq!(labels(&lookup.found), HashSet::from(["A".to_string()]));
        assert_eq!(lookup.remaining, vec!["B".to_string()]);
        assert!(!lookup.is_complete());
    }

    #[test]
    fn test_find_all_by_label_composes() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);
        registry.add_bulb(FakeBulb::attach(&gateway, "A", None).handle());

        let first = registry.find_all_by_label(["A", "B"]);
        registry.add_bulb(FakeBulb::attach(&gateway, "B", None).handle());
        let second = registry.find_all_by_label(first.remaining);
        let mut staged = first.found;
        staged.extend(second.found);

        let single = registry.find_all_by_label(["A", "B"]);
        assert_eq!(labels(&staged), labels(&single.found));
        assert!(second.remaining.is_empty());
    }

    #[test]
    fn test_add_gateway_with_bulbs_is_atomic() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);
        let a = FakeBulb::attach(&gateway, "A", None);
        let b = FakeBulb::attach(&gateway, "B", None);

        assert!(registry.add_gateway_with_bulbs(gateway.handle(), vec![a.handle(), b.handle()]));
        assert_eq!(registry.bulb_count(), 2);
    }

    #[test]
    fn test_clear_empties_everything() {
        let registry = Registry::new();
        let gateway = FakeGateway::new(1);
        registry.add_bulb(FakeBulb::attach(&gateway, "A", None).handle());

        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.snapshot_bulbs().is_empty());
        assert!(registry.find_by_label("A").is_none());
    }

    #[test]
    fn test_snapshots_never_see_orphan_bulbs() {
        let registry = Registry::new();
        let writer = {
            let registry = registry.clone();
            thread::spawn(move || {
                for round in 0..200u8 {
                    let gateway = FakeGateway::new(round);
                    let bulbs = (0..4)
                        .map(|i| FakeBulb::attach(&gateway, &format!("bulb-{round}-{i}"), None))
                        .collect::<Vec<_>>();
                    registry.add_gateway_with_bulbs(
                        gateway.handle(),
                        bulbs.iter().map(|b| b.handle()).collect(),
                    );
                    registry.add_bulb(FakeBulb::attach(&gateway, &format!("late-{round}"), None).handle());
                    if round % 50 == 49 {
                        registry.clear();
                    }
                }
            })
        };

        for _ in 0..500 {
            let snapshot = registry.snapshot();
            let addresses = snapshot
                .gateways
                .iter()
                .map(|g| g.address())
                .collect::<HashSet<_>>();
            assert!(
                snapshot
                    .bulbs
                    .iter()
                    .all(|b| addresses.contains(&b.gateway().address()))
            );
        }

        writer.join().unwrap();
    }
}
