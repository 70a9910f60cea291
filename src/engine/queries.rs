use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, Lookup};

fn sort_slots(slots: &mut [Slot]) {
    slots.sort_by_key(|s| (s.time, s.id));
}

impl Engine {
    pub async fn get_slot(&self, id: Ulid) -> Option<Slot> {
        let provider_id = self.store.provider_for_slot(&id)?;
        let ps = self.store.get_provider(&provider_id)?;
        let guard = ps.read().await;
        guard.get_slot(id).cloned()
    }

    /// Every slot matching `keep`, ordered by time. Providers are read one at a time.
    async fn collect_slots(&self, keep: impl Fn(&Slot) -> bool) -> Vec<Slot> {
        let mut slots = Vec::new();
        for ps in self.store.provider_handles() {
            let guard = ps.read().await;
            slots.extend(guard.slots.iter().filter(|s| keep(s)).cloned());
        }
        sort_slots(&mut slots);
        slots
    }

    pub async fn list_slots(&self) -> Vec<Slot> {
        self.collect_slots(|_| true).await
    }

    pub async fn list_available_slots(&self) -> Vec<Slot> {
        self.collect_slots(Slot::is_available).await
    }

    /// All unassigned slots at exactly `time`, across providers. Picking one
    /// of several is left to the caller.
    pub async fn list_available_slots_at(&self, time: Ms) -> Vec<Slot> {
        let mut slots = Vec::new();
        for ps in self.store.provider_handles() {
            let guard = ps.read().await;
            if let Some(slot) = guard.slot_at(time).filter(|s| s.is_available()) {
                slots.push(slot.clone());
            }
        }
        sort_slots(&mut slots);
        slots
    }

    /// Every slot of a provider, booked or not.
    pub async fn list_slots_for_provider(&self, provider_id: Ulid) -> Result<Vec<Slot>, EngineError> {
        let ps = self
            .store
            .get_provider(&provider_id)
            .ok_or(EngineError::ProviderNotFound(Lookup::Id(provider_id)))?;
        let guard = ps.read().await;
        Ok(guard.slots.clone())
    }

    /// `Ok(None)` means the requester exists but holds no slot.
    pub async fn get_slot_for_requester(&self, requester_id: Ulid) -> Result<Option<Slot>, EngineError> {
        let rq = self
            .store
            .get_requester(&requester_id)
            .ok_or(EngineError::RequesterNotFound(requester_id))?;
        // Release the requester before touching the provider (lock order).
        let bound = rq.read().await.slot_id;
        match bound {
            Some(slot_id) => Ok(self.get_slot(slot_id).await),
            None => Ok(None),
        }
    }
}
