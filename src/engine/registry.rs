use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{validate_identity, validate_name};
use super::{record, Engine, EngineError, Lookup};

impl Engine {
    pub async fn register_provider(
        &self,
        name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Result<Provider, EngineError> {
        let started = Instant::now();
        let result = self.try_register_provider(name.into(), identity.into()).await;
        record("register_provider", started, &result);
        result
    }

    async fn try_register_provider(&self, name: String, identity: String) -> Result<Provider, EngineError> {
        validate_identity(&identity)?;
        validate_name(&name)?;
        if self.store.provider_count() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }

        let id = Ulid::new();
        if !self.store.reserve_provider_identity(&identity, id) {
            debug!(identity, "provider identity taken");
            return Err(EngineError::IdentityTaken(identity));
        }

        let _commit = self.commit_gate.read().await;
        let event = Event::ProviderRegistered {
            id,
            name: name.clone(),
            identity: identity.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_provider_identity(&identity);
            return Err(e);
        }
        let provider = Provider { id, name, identity };
        self.store.insert_provider(provider.clone());
        self.notify.send(id, &event);
        info!(provider_id = %id, identity = %provider.identity, "provider registered");
        Ok(provider)
    }

    pub async fn register_requester(
        &self,
        name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Result<Requester, EngineError> {
        let started = Instant::now();
        let result = self.try_register_requester(name.into(), identity.into()).await;
        record("register_requester", started, &result);
        result
    }

    async fn try_register_requester(&self, name: String, identity: String) -> Result<Requester, EngineError> {
        validate_identity(&identity)?;
        validate_name(&name)?;
        if self.store.requester_count() >= MAX_REQUESTERS {
            return Err(EngineError::LimitExceeded("too many requesters"));
        }

        let id = Ulid::new();
        if !self.store.reserve_requester_identity(&identity, id) {
            debug!(identity, "requester identity taken");
            return Err(EngineError::IdentityTaken(identity));
        }

        let _commit = self.commit_gate.read().await;
        let event = Event::RequesterRegistered {
            id,
            name: name.clone(),
            identity: identity.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_requester_identity(&identity);
            return Err(e);
        }
        let requester = Requester {
            id,
            name,
            identity,
            slot_id: None,
        };
        self.store.insert_requester(requester.clone());
        info!(requester_id = %id, identity = %requester.identity, "requester registered");
        Ok(requester)
    }

    /// Remove a provider together with all its slots. Requesters bound to
    /// those slots become unbound.
    pub async fn remove_provider(&self, id: Ulid) -> Result<Provider, EngineError> {
        let started = Instant::now();
        let result = self.try_remove_provider(id).await;
        record("remove_provider", started, &result);
        result
    }

    async fn try_remove_provider(&self, id: Ulid) -> Result<Provider, EngineError> {
        let not_found = || EngineError::ProviderNotFound(Lookup::Id(id));
        let ps = self.store.get_provider(&id).ok_or_else(not_found)?;

        let _commit = self.commit_gate.read().await;
        let mut guard = ps.clone().write_owned().await;
        if !self.store.is_live_provider(&id, &ps) {
            return Err(not_found());
        }

        let mut bound_ids: Vec<Ulid> = guard.slots.iter().filter_map(|s| s.requester_id).collect();
        bound_ids.sort();
        let mut bound = Vec::with_capacity(bound_ids.len());
        for rid in bound_ids {
            if let Some(rq) = self.store.get_requester(&rid) {
                bound.push(rq.write_owned().await);
            }
        }

        let event = Event::ProviderRemoved { id };
        self.wal_append(&event).await?;
        let provider = guard.provider.clone();
        let dropped = guard.slots.len();
        self.store.apply_provider_removed(&mut guard, &mut bound);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        info!(provider_id = %id, slots = dropped, unbound = bound.len(), "provider removed");
        Ok(provider)
    }

    /// Remove a requester. A slot bound to it is removed with it.
    pub async fn remove_requester(&self, id: Ulid) -> Result<Requester, EngineError> {
        let started = Instant::now();
        let result = self.try_remove_requester(id).await;
        record("remove_requester", started, &result);
        result
    }

    async fn try_remove_requester(&self, id: Ulid) -> Result<Requester, EngineError> {
        let rq = self
            .store
            .get_requester(&id)
            .ok_or(EngineError::RequesterNotFound(id))?;
        let _commit = self.commit_gate.read().await;

        // The owning provider has to be locked before the requester. Its
        // identity comes from the binding, which may change before both locks
        // are held; retry until the binding read matches the locked state.
        loop {
            let observed = rq.read().await.slot_id;
            let owner = observed
                .and_then(|sid| self.store.provider_for_slot(&sid))
                .and_then(|pid| self.store.get_provider(&pid));
            let mut owner_guard = match owner {
                Some(ps) => Some(ps.write_owned().await),
                None => None,
            };
            let requester = rq.write().await;

            if !self.store.is_live_requester(&id, &rq) {
                return Err(EngineError::RequesterNotFound(id));
            }
            if requester.slot_id != observed || (observed.is_some() && owner_guard.is_none()) {
                continue;
            }

            let event = Event::RequesterRemoved { id };
            self.wal_append(&event).await?;
            let removed = requester.clone();
            match owner_guard.as_mut() {
                Some(ps) => {
                    let provider_id = ps.id();
                    self.store.apply_requester_removed(&requester, Some(&mut **ps));
                    self.notify.send(provider_id, &event);
                }
                None => self.store.apply_requester_removed(&requester, None),
            }
            info!(requester_id = %id, slot_id = ?removed.slot_id, "requester removed");
            return Ok(removed);
        }
    }

    // ── Directory lookups ────────────────────────────────────

    pub async fn get_provider(&self, id: Ulid) -> Option<Provider> {
        let ps = self.store.get_provider(&id)?;
        let guard = ps.read().await;
        Some(guard.provider.clone())
    }

    pub async fn find_provider_by_identity(&self, identity: &str) -> Option<Provider> {
        let id = self.store.provider_id_for_identity(identity)?;
        self.get_provider(id).await
    }

    /// All providers, ordered by id (registration order).
    pub async fn list_providers(&self) -> Vec<Provider> {
        let mut providers = Vec::with_capacity(self.store.provider_count());
        for ps in self.store.provider_handles() {
            providers.push(ps.read().await.provider.clone());
        }
        providers.sort_by_key(|p| p.id);
        providers
    }

    pub async fn get_requester(&self, id: Ulid) -> Option<Requester> {
        let rq = self.store.get_requester(&id)?;
        let guard = rq.read().await;
        Some(guard.clone())
    }

    pub async fn find_requester_by_identity(&self, identity: &str) -> Option<Requester> {
        let id = self.store.requester_id_for_identity(identity)?;
        self.get_requester(id).await
    }

    pub async fn list_requesters(&self) -> Vec<Requester> {
        let mut requesters = Vec::with_capacity(self.store.requester_count());
        for rq in self.store.requester_handles() {
            requesters.push(rq.read().await.clone());
        }
        requesters.sort_by_key(|r| r.id);
        requesters
    }
}
