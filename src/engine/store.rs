use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;
pub type SharedRequester = Arc<RwLock<Requester>>;

/// In-memory tables behind the engine. Records sit behind their own locks;
/// the `DashMap`s are only indexes and are never held across an await.
pub struct Store {
    providers: DashMap<Ulid, SharedProviderState>,
    provider_identities: DashMap<String, Ulid>,
    requesters: DashMap<Ulid, SharedRequester>,
    requester_identities: DashMap<String, Ulid>,
    /// Slot id → owning provider id.
    slot_to_provider: DashMap<Ulid, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Claim `identity` for `id`. False if someone already holds it.
fn reserve(index: &DashMap<String, Ulid>, identity: &str, id: Ulid) -> bool {
    match index.entry(identity.to_string()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(id);
            true
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            provider_identities: DashMap::new(),
            requesters: DashMap::new(),
            requester_identities: DashMap::new(),
            slot_to_provider: DashMap::new(),
        }
    }

    // ── Providers ────────────────────────────────────────────

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn provider_id_for_identity(&self, identity: &str) -> Option<Ulid> {
        self.provider_identities.get(identity).map(|e| *e.value())
    }

    pub fn reserve_provider_identity(&self, identity: &str, id: Ulid) -> bool {
        reserve(&self.provider_identities, identity, id)
    }

    pub fn release_provider_identity(&self, identity: &str) {
        self.provider_identities.remove(identity);
    }

    pub fn insert_provider(&self, provider: Provider) {
        self.provider_identities
            .insert(provider.identity.clone(), provider.id);
        self.providers
            .insert(provider.id, Arc::new(RwLock::new(ProviderState::new(provider))));
    }

    /// True while `handle` is still the registered record for its id.
    /// Call with the handle's lock held to rule out a racing removal.
    pub fn is_live_provider(&self, id: &Ulid, handle: &SharedProviderState) -> bool {
        self.providers
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), handle))
    }

    pub fn provider_handles(&self) -> Vec<SharedProviderState> {
        self.providers.iter().map(|e| e.value().clone()).collect()
    }

    // ── Requesters ───────────────────────────────────────────

    pub fn requester_count(&self) -> usize {
        self.requesters.len()
    }

    pub fn get_requester(&self, id: &Ulid) -> Option<SharedRequester> {
        self.requesters.get(id).map(|e| e.value().clone())
    }

    pub fn requester_id_for_identity(&self, identity: &str) -> Option<Ulid> {
        self.requester_identities.get(identity).map(|e| *e.value())
    }

    pub fn reserve_requester_identity(&self, identity: &str, id: Ulid) -> bool {
        reserve(&self.requester_identities, identity, id)
    }

    pub fn release_requester_identity(&self, identity: &str) {
        self.requester_identities.remove(identity);
    }

    pub fn insert_requester(&self, requester: Requester) {
        self.requester_identities
            .insert(requester.identity.clone(), requester.id);
        self.requesters
            .insert(requester.id, Arc::new(RwLock::new(requester)));
    }

    pub fn is_live_requester(&self, id: &Ulid, handle: &SharedRequester) -> bool {
        self.requesters
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), handle))
    }

    pub fn requester_handles(&self) -> Vec<SharedRequester> {
        self.requesters.iter().map(|e| e.value().clone()).collect()
    }

    // ── Slot index ───────────────────────────────────────────

    pub fn provider_for_slot(&self, slot_id: &Ulid) -> Option<Ulid> {
        self.slot_to_provider.get(slot_id).map(|e| *e.value())
    }

    // ── Event application (caller holds the write locks) ─────

    pub fn apply_slot_created(&self, ps: &mut ProviderState, id: Ulid, time: Ms) -> bool {
        let provider_id = ps.id();
        let inserted = ps.insert_slot(Slot {
            id,
            time,
            provider_id,
            requester_id: None,
        });
        if inserted {
            self.slot_to_provider.insert(id, provider_id);
        }
        inserted
    }

    /// Write both sides of the binding. Returns the bound slot.
    pub fn apply_slot_assigned(
        &self,
        ps: &mut ProviderState,
        requester: &mut Requester,
        slot_id: Ulid,
    ) -> Option<Slot> {
        let slot = ps.get_slot_mut(slot_id)?;
        slot.requester_id = Some(requester.id);
        requester.slot_id = Some(slot_id);
        Some(slot.clone())
    }

    /// Drop a provider with all its slots. `bound` must be the write-locked
    /// requesters bound to those slots; each is unbound.
    pub fn apply_provider_removed(
        &self,
        ps: &mut ProviderState,
        bound: &mut [OwnedRwLockWriteGuard<Requester>],
    ) {
        for requester in bound.iter_mut() {
            requester.slot_id = None;
        }
        for slot in ps.slots.drain(..) {
            self.slot_to_provider.remove(&slot.id);
        }
        self.providers.remove(&ps.id());
        self.provider_identities.remove(&ps.provider.identity);
    }

    /// Drop a requester and, if bound, its slot. `owner` is the write-locked
    /// provider of that slot.
    pub fn apply_requester_removed(&self, requester: &Requester, owner: Option<&mut ProviderState>) {
        if let (Some(slot_id), Some(ps)) = (requester.slot_id, owner) {
            ps.remove_slot(slot_id);
            self.slot_to_provider.remove(&slot_id);
        }
        self.requesters.remove(&requester.id);
        self.requester_identities.remove(&requester.identity);
    }

    // ── Replay ───────────────────────────────────────────────

    /// Apply one WAL event at startup. We are the sole owner of every lock
    /// here, so `try_write_owned` never contends. Never use the blocking
    /// variants: this runs inside an async context.
    pub fn replay(&self, event: Event) {
        match event {
            Event::ProviderRegistered { id, name, identity } => {
                self.insert_provider(Provider { id, name, identity });
            }
            Event::RequesterRegistered { id, name, identity } => {
                self.insert_requester(Requester {
                    id,
                    name,
                    identity,
                    slot_id: None,
                });
            }
            Event::SlotCreated {
                id,
                provider_id,
                time,
            } => {
                if let Some(ps) = self.get_provider(&provider_id) {
                    let mut guard = ps.try_write_owned().expect("replay: uncontended write");
                    self.apply_slot_created(&mut guard, id, time);
                }
            }
            Event::SlotAssigned {
                id,
                provider_id,
                requester_id,
            } => {
                if let (Some(ps), Some(rq)) =
                    (self.get_provider(&provider_id), self.get_requester(&requester_id))
                {
                    let mut slots = ps.try_write_owned().expect("replay: uncontended write");
                    let mut requester = rq.try_write_owned().expect("replay: uncontended write");
                    // First committed binding wins, same as the live re-check.
                    let slot_free = slots.get_slot(id).is_some_and(Slot::is_available);
                    if !slot_free || requester.slot_id.is_some() {
                        warn!(slot_id = %id, %requester_id, "replay: skipping stale assignment");
                        return;
                    }
                    self.apply_slot_assigned(&mut slots, &mut requester, id);
                }
            }
            Event::ProviderRemoved { id } => {
                if let Some(ps) = self.get_provider(&id) {
                    let mut guard = ps.try_write_owned().expect("replay: uncontended write");
                    let mut bound: Vec<_> = guard
                        .slots
                        .iter()
                        .filter_map(|s| s.requester_id)
                        .filter_map(|rid| self.get_requester(&rid))
                        .map(|rq| rq.try_write_owned().expect("replay: uncontended write"))
                        .collect();
                    self.apply_provider_removed(&mut guard, &mut bound);
                }
            }
            Event::RequesterRemoved { id } => {
                if let Some(rq) = self.get_requester(&id) {
                    let requester = rq.try_write_owned().expect("replay: uncontended write");
                    let owner = requester
                        .slot_id
                        .and_then(|sid| self.provider_for_slot(&sid))
                        .and_then(|pid| self.get_provider(&pid))
                        .map(|ps| ps.try_write_owned().expect("replay: uncontended write"));
                    match owner {
                        Some(mut ps) => self.apply_requester_removed(&requester, Some(&mut *ps)),
                        None => self.apply_requester_removed(&requester, None),
                    }
                }
            }
        }
    }

    /// Minimal event sequence that rebuilds the current state. The caller
    /// must exclude concurrent commits.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let mut bindings = Vec::new();

        for ps in self.provider_handles() {
            let guard = ps.read().await;
            events.push(Event::ProviderRegistered {
                id: guard.provider.id,
                name: guard.provider.name.clone(),
                identity: guard.provider.identity.clone(),
            });
            for slot in &guard.slots {
                events.push(Event::SlotCreated {
                    id: slot.id,
                    provider_id: slot.provider_id,
                    time: slot.time,
                });
                if let Some(requester_id) = slot.requester_id {
                    bindings.push(Event::SlotAssigned {
                        id: slot.id,
                        provider_id: slot.provider_id,
                        requester_id,
                    });
                }
            }
        }
        for rq in self.requester_handles() {
            let guard = rq.read().await;
            events.push(Event::RequesterRegistered {
                id: guard.id,
                name: guard.name.clone(),
                identity: guard.identity.clone(),
            });
        }
        events.extend(bindings);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(identity: &str) -> Provider {
        Provider {
            id: Ulid::new(),
            name: "Ada".into(),
            identity: identity.into(),
        }
    }

    fn requester(identity: &str) -> Requester {
        Requester {
            id: Ulid::new(),
            name: "Linus".into(),
            identity: identity.into(),
            slot_id: None,
        }
    }

    #[test]
    fn identity_reservation_is_exclusive() {
        let store = Store::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        assert!(store.reserve_provider_identity("ada@example.com", a));
        assert!(!store.reserve_provider_identity("ada@example.com", b));
        assert_eq!(store.provider_id_for_identity("ada@example.com"), Some(a));

        store.release_provider_identity("ada@example.com");
        assert!(store.reserve_provider_identity("ada@example.com", b));
    }

    #[test]
    fn provider_and_requester_identities_are_separate() {
        let store = Store::new();
        assert!(store.reserve_provider_identity("same@example.com", Ulid::new()));
        assert!(store.reserve_requester_identity("same@example.com", Ulid::new()));
    }

    #[test]
    fn replay_builds_binding_on_both_sides() {
        let store = Store::new();
        let p = provider("p@example.com");
        let r = requester("r@example.com");
        let slot_id = Ulid::new();
        store.replay(Event::ProviderRegistered {
            id: p.id,
            name: p.name.clone(),
            identity: p.identity.clone(),
        });
        store.replay(Event::RequesterRegistered {
            id: r.id,
            name: r.name.clone(),
            identity: r.identity.clone(),
        });
        store.replay(Event::SlotCreated {
            id: slot_id,
            provider_id: p.id,
            time: 1_000,
        });
        store.replay(Event::SlotAssigned {
            id: slot_id,
            provider_id: p.id,
            requester_id: r.id,
        });

        assert_eq!(store.provider_for_slot(&slot_id), Some(p.id));
        let ps = store.get_provider(&p.id).unwrap();
        let ps = ps.try_read().unwrap();
        assert_eq!(ps.slots[0].requester_id, Some(r.id));
        let rq = store.get_requester(&r.id).unwrap();
        assert_eq!(rq.try_read().unwrap().slot_id, Some(slot_id));
    }

    #[test]
    fn replay_provider_removal_unbinds_requesters() {
        let store = Store::new();
        let p = provider("p@example.com");
        let r = requester("r@example.com");
        let slot_id = Ulid::new();
        store.insert_provider(p.clone());
        store.insert_requester(r.clone());
        store.replay(Event::SlotCreated {
            id: slot_id,
            provider_id: p.id,
            time: 1_000,
        });
        store.replay(Event::SlotAssigned {
            id: slot_id,
            provider_id: p.id,
            requester_id: r.id,
        });
        store.replay(Event::ProviderRemoved { id: p.id });

        assert!(store.get_provider(&p.id).is_none());
        assert!(store.provider_id_for_identity("p@example.com").is_none());
        assert!(store.provider_for_slot(&slot_id).is_none());
        let rq = store.get_requester(&r.id).unwrap();
        assert_eq!(rq.try_read().unwrap().slot_id, None);
    }

    #[test]
    fn replay_requester_removal_drops_bound_slot() {
        let store = Store::new();
        let p = provider("p@example.com");
        let r = requester("r@example.com");
        let (bound, free) = (Ulid::new(), Ulid::new());
        store.insert_provider(p.clone());
        store.insert_requester(r.clone());
        for (id, time) in [(bound, 1_000), (free, 2_000)] {
            store.replay(Event::SlotCreated {
                id,
                provider_id: p.id,
                time,
            });
        }
        store.replay(Event::SlotAssigned {
            id: bound,
            provider_id: p.id,
            requester_id: r.id,
        });
        store.replay(Event::RequesterRemoved { id: r.id });

        assert!(store.get_requester(&r.id).is_none());
        assert!(store.requester_id_for_identity("r@example.com").is_none());
        let ps = store.get_provider(&p.id).unwrap();
        let ids: Vec<Ulid> = ps.try_read().unwrap().slots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![free]);
    }

    #[test]
    fn live_check_detects_replaced_handle() {
        let store = Store::new();
        let p = provider("p@example.com");
        store.insert_provider(p.clone());
        let handle = store.get_provider(&p.id).unwrap();
        assert!(store.is_live_provider(&p.id, &handle));

        store.insert_provider(p.clone());
        assert!(!store.is_live_provider(&p.id, &handle));
    }
}
