use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// A party offering slots (an interviewer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Ulid,
    pub name: String,
    /// Unique contact identity, e.g. an email address.
    pub identity: String,
}

/// A party booking a slot (a candidate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: Ulid,
    pub name: String,
    pub identity: String,
    /// The one slot bound to this requester, if any.
    pub slot_id: Option<Ulid>,
}

/// A bookable (provider, time) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub time: Ms,
    pub provider_id: Ulid,
    pub requester_id: Option<Ulid>,
}

impl Slot {
    pub fn is_available(&self) -> bool {
        self.requester_id.is_none()
    }
}

/// Slot creation request as an adapter hands it over. Either field may be
/// missing; the engine rejects that as an invalid request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSlot {
    pub time: Option<Ms>,
    pub provider_identity: Option<String>,
}

impl NewSlot {
    pub fn new(time: Ms, provider_identity: impl Into<String>) -> Self {
        Self {
            time: Some(time),
            provider_identity: Some(provider_identity.into()),
        }
    }
}

/// A provider together with its slots, sorted by `time`.
///
/// The sorted slot list doubles as the (provider, time) unique index: it is
/// only mutated under the write lock of the owning `ProviderState`.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub provider: Provider,
    pub slots: Vec<Slot>,
}

impl ProviderState {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            slots: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.provider.id
    }

    /// Index of the slot at `time`, or the insertion point if none.
    fn position(&self, time: Ms) -> Result<usize, usize> {
        self.slots.binary_search_by_key(&time, |s| s.time)
    }

    pub fn slot_at(&self, time: Ms) -> Option<&Slot> {
        self.position(time).ok().map(|i| &self.slots[i])
    }

    /// Insert keeping time order. Returns false (and leaves the list
    /// untouched) if a slot already occupies `slot.time`.
    pub fn insert_slot(&mut self, slot: Slot) -> bool {
        match self.position(slot.time) {
            Ok(_) => false,
            Err(pos) => {
                self.slots.insert(pos, slot);
                true
            }
        }
    }

    pub fn get_slot(&self, id: Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn get_slot_mut(&mut self, id: Ulid) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderRegistered {
        id: Ulid,
        name: String,
        identity: String,
    },
    /// Cascades: the provider's slots go too, and their requesters are unbound.
    ProviderRemoved {
        id: Ulid,
    },
    RequesterRegistered {
        id: Ulid,
        name: String,
        identity: String,
    },
    /// Cascades: the requester's bound slot goes too.
    RequesterRemoved {
        id: Ulid,
    },
    SlotCreated {
        id: Ulid,
        provider_id: Ulid,
        time: Ms,
    },
    /// Both sides of the binding in one record.
    SlotAssigned {
        id: Ulid,
        provider_id: Ulid,
        requester_id: Ulid,
    },
}

impl Event {
    /// The provider whose change feed carries this event, if any.
    pub fn provider_id(&self) -> Option<Ulid> {
        match self {
            Event::ProviderRegistered { id, .. } | Event::ProviderRemoved { id } => Some(*id),
            Event::SlotCreated { provider_id, .. } | Event::SlotAssigned { provider_id, .. } => {
                Some(*provider_id)
            }
            Event::RequesterRegistered { .. } | Event::RequesterRemoved { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProviderState {
        ProviderState::new(Provider {
            id: Ulid::new(),
            name: "Ada".into(),
            identity: "ada@example.com".into(),
        })
    }

    fn slot(provider_id: Ulid, time: Ms) -> Slot {
        Slot {
            id: Ulid::new(),
            time,
            provider_id,
            requester_id: None,
        }
    }

    #[test]
    fn slots_stay_sorted_by_time() {
        let mut ps = state();
        let pid = ps.id();
        assert!(ps.insert_slot(slot(pid, 300)));
        assert!(ps.insert_slot(slot(pid, 100)));
        assert!(ps.insert_slot(slot(pid, 200)));
        let times: Vec<Ms> = ps.slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn insert_rejects_same_time() {
        let mut ps = state();
        let pid = ps.id();
        let first = slot(pid, 100);
        assert!(ps.insert_slot(first.clone()));
        assert!(!ps.insert_slot(slot(pid, 100)));
        assert_eq!(ps.slots.len(), 1);
        assert_eq!(ps.slot_at(100), Some(&first));
    }

    #[test]
    fn slot_at_missing_time() {
        let mut ps = state();
        let pid = ps.id();
        ps.insert_slot(slot(pid, 100));
        assert!(ps.slot_at(150).is_none());
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut ps = state();
        let pid = ps.id();
        let slots: Vec<Slot> = (1..=3).map(|i| slot(pid, i * 100)).collect();
        for s in &slots {
            ps.insert_slot(s.clone());
        }
        assert_eq!(ps.remove_slot(slots[1].id), Some(slots[1].clone()));
        assert_eq!(ps.slots, vec![slots[0].clone(), slots[2].clone()]);
        assert!(ps.remove_slot(Ulid::new()).is_none());
    }

    #[test]
    fn availability_follows_requester() {
        let mut s = slot(Ulid::new(), 100);
        assert!(s.is_available());
        s.requester_id = Some(Ulid::new());
        assert!(!s.is_available());
    }

    #[test]
    fn event_provider_routing() {
        let pid = Ulid::new();
        let created = Event::SlotCreated {
            id: Ulid::new(),
            provider_id: pid,
            time: 100,
        };
        assert_eq!(created.provider_id(), Some(pid));
        assert_eq!(Event::RequesterRemoved { id: Ulid::new() }.provider_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SlotAssigned {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            requester_id: Ulid::new(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
