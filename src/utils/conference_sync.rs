use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::api::telemost::{ConferenceApi, RawConference, SkipReason, TelemostError};
use crate::api::yandex_oauth::TokenRefresher;
use crate::models::conference_models::{Caller, Conference, ConferenceChanges, ConferenceDraft, NewConference};
use crate::models::credential_models::{Credential, Provider};
use crate::repositories::conference_repository::{ConferenceRepository, RepositoryError};
use crate::repositories::credential_repository::{CredentialError, CredentialStore, ResolvedToken};
use crate::utils::time::now_seconds;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] TelemostError),
    #[error("Conference {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Result of storing one remote record during a list sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Stored(i64),
    Skipped { id: Option<i64>, reason: String },
}

/// Keeps the local conference table in step with Telemost on behalf of a
/// caller. The local table is authoritative for everything returned.
pub struct ConferenceSync {
    repository: Arc<ConferenceRepository>,
    credentials: Arc<CredentialStore>,
    api: Arc<dyn ConferenceApi>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl ConferenceSync {
    pub fn new(
        repository: Arc<ConferenceRepository>,
        credentials: Arc<CredentialStore>,
        api: Arc<dyn ConferenceApi>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Self {
        Self { repository, credentials, api, refresher }
    }

    /// Pulls the remote list into the local table when a token is available,
    /// then returns the caller's own conferences. Remote failures fall back to
    /// the local list silently.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<Conference>, SyncError> {
        let token = match self.credentials.resolve_telemost(&caller.id) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not resolve Telemost token for {}: {}", caller.id, e);
                None
            }
        };

        if let Some(token) = token {
            let api = self.api.clone();
            let remote = self
                .call_with_refresh(caller, &token, |access_token| {
                    let api = api.clone();
                    async move { api.list(&access_token).await }
                })
                .await;

            match remote {
                Ok(records) => {
                    let outcomes = self.sync_remote(caller, &records);
                    let stored = outcomes
                        .iter()
                        .filter(|o| matches!(o, SyncOutcome::Stored(_)))
                        .count();
                    tracing::debug!(
                        "Synced {} of {} remote conferences for {}",
                        stored,
                        outcomes.len(),
                        caller.id
                    );
                }
                Err(e) => {
                    tracing::warn!("Remote list failed for {}, serving local records: {}", caller.id, e);
                }
            }
        }

        Ok(self.repository.list_by_owner(&caller.id)?)
    }

    /// Upserts every remote record as owned by `caller`. Never aborts the batch.
    pub fn sync_remote(&self, caller: &Caller, records: &[RawConference]) -> Vec<SyncOutcome> {
        records
            .iter()
            .map(|raw| {
                let outcome = self.sync_one(caller, raw);
                if let SyncOutcome::Skipped { id, reason } = &outcome {
                    tracing::warn!("Skipped remote conference {:?}: {}", id, reason);
                }
                outcome
            })
            .collect()
    }

    fn sync_one(&self, caller: &Caller, raw: &RawConference) -> SyncOutcome {
        let Some(id) = raw.id() else {
            return SyncOutcome::Skipped { id: None, reason: SkipReason::MissingId.to_string() };
        };
        let skipped = |reason: String| SyncOutcome::Skipped { id: Some(id), reason };

        let base = match self.repository.get_by_id(id) {
            Ok(Some(existing)) => NewConference::from(existing),
            Ok(None) => NewConference::default(),
            Err(e) => return skipped(e.to_string()),
        };

        let mut record = match raw.merge_into(base) {
            Ok(record) => record,
            Err(reason) => return skipped(reason.to_string()),
        };
        if record.name.trim().is_empty() {
            record.name = format!("Conference {}", id);
        }
        record.owner_id = caller.id.clone();
        record.owner_name = caller.name.clone();

        match self.repository.upsert(record) {
            Ok(id) => SyncOutcome::Stored(id),
            Err(e) => skipped(e.to_string()),
        }
    }

    /// Creates remotely when a token is available, else locally. A remote
    /// success is returned even if the local write fails.
    pub async fn create(&self, caller: &Caller, draft: &ConferenceDraft) -> Result<Conference, SyncError> {
        let mut record = NewConference::from_draft(draft, caller);

        let Some(token) = self.credentials.resolve_telemost(&caller.id)? else {
            let id = self.repository.insert(record)?;
            tracing::info!("Created local conference {} for {}", id, caller.id);
            return self.repository.get_by_id(id)?.ok_or(SyncError::NotFound(id));
        };

        let api = self.api.clone();
        let remote = self
            .call_with_refresh(caller, &token, |access_token| {
                let api = api.clone();
                async move { api.create(&access_token, draft).await }
            })
            .await?;

        record.id = remote.id();
        record.link = remote
            .link()
            .or_else(|| record.id.map(|id| self.repository.join_link(id)));
        record.created_at = remote.created_at();
        let fallback = record.clone();

        let stored = self
            .repository
            .insert(record)
            .and_then(|id| self.repository.get_by_id(id));

        match stored {
            Ok(Some(conference)) => {
                tracing::info!("Created conference {} for {}", conference.id, caller.id);
                Ok(conference)
            }
            Ok(None) => Ok(materialize(fallback)),
            Err(e) => {
                tracing::error!("Conference created remotely but not stored locally: {}", e);
                Ok(materialize(fallback))
            }
        }
    }

    /// Forwards the change to Telemost as a courtesy, then applies it locally.
    pub async fn update(&self, caller: &Caller, id: i64, changes: &ConferenceChanges) -> Result<Conference, SyncError> {
        match self.credentials.resolve_telemost(&caller.id) {
            Ok(Some(token)) => {
                let api = self.api.clone();
                let remote = self
                    .call_with_refresh(caller, &token, |access_token| {
                        let api = api.clone();
                        async move { api.update(&access_token, id, changes).await }
                    })
                    .await;
                if let Err(e) = remote {
                    tracing::warn!("Remote update of conference {} failed: {}", id, e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not resolve Telemost token for {}: {}", caller.id, e),
        }

        if !self.repository.update(id, changes)? {
            return Err(SyncError::NotFound(id));
        }
        self.repository.get_by_id(id)?.ok_or(SyncError::NotFound(id))
    }

    /// Local only; Telemost has no delete.
    pub fn delete(&self, id: i64) -> Result<(), SyncError> {
        if self.repository.delete(id)? {
            tracing::info!("Deleted conference {}", id);
            Ok(())
        } else {
            Err(SyncError::NotFound(id))
        }
    }

    /// Runs `call` with the resolved token. On 401, a session token with a
    /// refresh token is refreshed, stored, and the call retried once.
    async fn call_with_refresh<T, F, Fut>(
        &self,
        caller: &Caller,
        token: &ResolvedToken,
        call: F,
    ) -> Result<T, TelemostError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, TelemostError>>,
    {
        match call(token.access_token.clone()).await {
            Err(e) if e.is_unauthorized() && token.can_refresh() => {
                tracing::info!("Telemost token for {} rejected, attempting to refresh", caller.id);
                match self.refresh_session(caller, token).await {
                    Some(access_token) => call(access_token).await,
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    async fn refresh_session(&self, caller: &Caller, token: &ResolvedToken) -> Option<String> {
        let refresher = self.refresher.as_ref()?;
        let refresh_token = token.refresh_token.as_deref()?;

        let grant = match refresher.refresh(refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!("Failed to refresh Telemost token for {}: {}", caller.id, e);
                return None;
            }
        };

        let credential = Credential::new(
            grant.access_token.clone(),
            grant.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            grant.expires_in.map(|secs| now_seconds() + secs).unwrap_or(0),
        );
        if let Err(e) = self.credentials.put(Provider::Telemost, &caller.id, &credential) {
            tracing::error!("Failed to store refreshed Telemost token for {}: {}", caller.id, e);
        }

        Some(grant.access_token)
    }
}

fn materialize(record: NewConference) -> Conference {
    let id = record.id.unwrap_or(0);
    let link = record.link.clone().unwrap_or_default();
    record.into_conference(id, link)
}
