use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{now_ms, validate_slot_time};
use super::{record, Engine, EngineError, Lookup, SharedProviderState};

impl Engine {
    /// Open a new unassigned slot at `request.time` for the provider
    /// registered under `request.provider_identity`.
    pub async fn create_slot(&self, request: NewSlot) -> Result<Slot, EngineError> {
        let started = Instant::now();
        let result = self.try_create_slot(request).await;
        record("create_slot", started, &result);
        result
    }

    async fn try_create_slot(&self, request: NewSlot) -> Result<Slot, EngineError> {
        let (Some(time), Some(identity)) = (request.time, request.provider_identity) else {
            return Err(EngineError::InvalidRequest("slot needs a time and a provider"));
        };
        if identity.trim().is_empty() {
            return Err(EngineError::InvalidRequest("slot needs a time and a provider"));
        }

        let (provider_id, ps) = self.resolve_provider_by_identity(&identity)?;
        validate_slot_time(time, now_ms())?;

        // Early exit; the check under the write lock below is the real guard.
        if ps.read().await.slot_at(time).is_some() {
            debug!(%provider_id, time, "slot already exists");
            return Err(EngineError::SlotConflict { provider_id, time });
        }

        let _commit = self.commit_gate.read().await;
        let mut guard = ps.write().await;
        if !self.store.is_live_provider(&provider_id, &ps) {
            return Err(EngineError::ProviderNotFound(Lookup::Identity(identity)));
        }
        if guard.slot_at(time).is_some() {
            debug!(%provider_id, time, "slot created concurrently");
            return Err(EngineError::SlotConflict { provider_id, time });
        }
        if guard.slots.len() >= MAX_SLOTS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many slots for provider"));
        }

        let id = Ulid::new();
        let event = Event::SlotCreated {
            id,
            provider_id,
            time,
        };
        self.wal_append(&event).await?;
        self.store.apply_slot_created(&mut guard, id, time);
        self.notify.send(provider_id, &event);
        info!(slot_id = %id, %provider_id, time, "slot created");

        Ok(Slot {
            id,
            time,
            provider_id,
            requester_id: None,
        })
    }

    /// Bind `slot_id` to `requester_id`. Both sides of the link are written
    /// under one WAL record while both records are write-locked.
    pub async fn assign_slot(&self, slot_id: Ulid, requester_id: Ulid) -> Result<Slot, EngineError> {
        let started = Instant::now();
        let result = self.try_assign_slot(slot_id, requester_id).await;
        record("assign_slot", started, &result);
        result
    }

    async fn try_assign_slot(&self, slot_id: Ulid, requester_id: Ulid) -> Result<Slot, EngineError> {
        let (provider_id, ps) = self.resolve_slot_owner(slot_id)?;
        match ps.read().await.get_slot(slot_id) {
            None => return Err(EngineError::InvalidRequest("unknown slot")),
            Some(slot) if !slot.is_available() => {
                debug!(%slot_id, "slot already booked");
                return Err(EngineError::SlotUnavailable(slot_id));
            }
            Some(_) => {}
        }

        let rq = self
            .store
            .get_requester(&requester_id)
            .ok_or(EngineError::RequesterNotFound(requester_id))?;
        if let Some(held) = rq.read().await.slot_id {
            debug!(%requester_id, %held, "requester already holds a slot");
            return Err(EngineError::RequesterConflict {
                requester_id,
                slot_id: held,
            });
        }

        // Re-check both conditions with both records locked: another
        // assignment may have committed since the reads above.
        let _commit = self.commit_gate.read().await;
        let mut slots = ps.write().await;
        let mut requester = rq.write().await;

        let still_there = self.store.is_live_provider(&provider_id, &ps);
        match slots.get_slot(slot_id).filter(|_| still_there) {
            None => return Err(EngineError::InvalidRequest("unknown slot")),
            Some(slot) if !slot.is_available() => {
                debug!(%slot_id, "slot booked concurrently");
                return Err(EngineError::SlotUnavailable(slot_id));
            }
            Some(_) => {}
        }
        if !self.store.is_live_requester(&requester_id, &rq) {
            return Err(EngineError::RequesterNotFound(requester_id));
        }
        if let Some(held) = requester.slot_id {
            debug!(%requester_id, %held, "requester bound concurrently");
            return Err(EngineError::RequesterConflict {
                requester_id,
                slot_id: held,
            });
        }

        let event = Event::SlotAssigned {
            id: slot_id,
            provider_id,
            requester_id,
        };
        self.wal_append(&event).await?;
        let slot = self
            .store
            .apply_slot_assigned(&mut slots, &mut requester, slot_id)
            .ok_or(EngineError::InvalidRequest("unknown slot"))?;
        self.notify.send(provider_id, &event);
        info!(%slot_id, %requester_id, %provider_id, "slot assigned");
        Ok(slot)
    }

    pub(super) fn resolve_provider_by_identity(
        &self,
        identity: &str,
    ) -> Result<(Ulid, SharedProviderState), EngineError> {
        self.store
            .provider_id_for_identity(identity)
            .and_then(|id| self.store.get_provider(&id).map(|ps| (id, ps)))
            .ok_or_else(|| {
                debug!(identity, "provider not found");
                EngineError::ProviderNotFound(Lookup::Identity(identity.to_string()))
            })
    }

    /// An unknown slot handle is the caller's mistake, not a missing record.
    fn resolve_slot_owner(&self, slot_id: Ulid) -> Result<(Ulid, SharedProviderState), EngineError> {
        self.store
            .provider_for_slot(&slot_id)
            .and_then(|pid| self.store.get_provider(&pid).map(|ps| (pid, ps)))
            .ok_or_else(|| {
                debug!(%slot_id, "slot not found");
                EngineError::InvalidRequest("unknown slot")
            })
    }
}
