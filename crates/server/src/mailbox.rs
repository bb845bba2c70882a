use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use signalbox_core::{IceCandidate, PeerId, PeerOffer, RecordKind, ScopeKey};
use thiserror::Error;

use crate::store::{ScopedStore, StoreError};

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Inbound signaling for each peer, filed under the target peer's scope.
///
/// Records are never consumed: listing is a pure read and every later listing
/// is a superset of an earlier one.
#[derive(Clone)]
pub struct PeerMailbox {
    store: Arc<dyn ScopedStore>,
}

impl PeerMailbox {
    pub fn new(store: Arc<dyn ScopedStore>) -> Self {
        Self { store }
    }

    pub async fn deposit_candidate(
        &self,
        target: &PeerId,
        source: &PeerId,
        candidate: Option<IceCandidate>,
    ) -> Result<(), MailboxError> {
        let candidate = match candidate {
            Some(candidate) if !candidate.is_empty() => candidate,
            _ => return Err(MailboxError::Invalid("missing candidate")),
        };
        check_peers(target, source)?;

        self.deposit(target, RecordKind::IceCandidate, &candidate.stamped(source))
            .await
    }

    pub async fn deposit_offer(
        &self,
        target: &PeerId,
        source: &PeerId,
        offer: &str,
    ) -> Result<(), MailboxError> {
        if offer.is_empty() {
            return Err(MailboxError::Invalid("missing offer"));
        }
        check_peers(target, source)?;

        let record = PeerOffer {
            source_id: source.as_str().to_owned(),
            offer: offer.to_owned(),
        };
        self.deposit(target, RecordKind::PeerOffer, &record).await
    }

    pub async fn list_candidates(&self, peer: &PeerId) -> Result<Vec<IceCandidate>, StoreError> {
        self.list(peer, RecordKind::IceCandidate).await
    }

    pub async fn list_offers(&self, peer: &PeerId) -> Result<Vec<PeerOffer>, StoreError> {
        self.list(peer, RecordKind::PeerOffer).await
    }

    async fn deposit<T: Serialize>(
        &self,
        target: &PeerId,
        kind: RecordKind,
        record: &T,
    ) -> Result<(), MailboxError> {
        let body = serde_json::to_value(record).map_err(|err| {
            StoreError::Unavailable(format!("encode {} record: {err}", kind.as_str()))
        })?;
        let key = self
            .store
            .create_child(&ScopeKey::peer(target), kind, body)
            .await?;
        tracing::debug!(record = %key, "deposited mailbox record");
        Ok(())
    }

    async fn list<T: DeserializeOwned>(
        &self,
        peer: &PeerId,
        kind: RecordKind,
    ) -> Result<Vec<T>, StoreError> {
        self.store
            .list_children(&ScopeKey::peer(peer), kind)
            .await?
            .into_iter()
            .map(|record| {
                serde_json::from_value(record.body).map_err(|err| {
                    StoreError::Unavailable(format!("corrupt mailbox record {}: {err}", record.key))
                })
            })
            .collect()
    }
}

fn check_peers(target: &PeerId, source: &PeerId) -> Result<(), MailboxError> {
    if target.as_str().is_empty() {
        return Err(MailboxError::Invalid("missing target peer"));
    }
    if source.as_str().is_empty() {
        return Err(MailboxError::Invalid("missing source peer"));
    }
    Ok(())
}
