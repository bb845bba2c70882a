use std::sync::Arc;

use serde::Serialize;
use signalbox_core::{IceCandidate, PeerId, PeerOffer};
use thiserror::Error;

use crate::{
    mailbox::{MailboxError, PeerMailbox},
    membership::ChannelMembership,
    store::{ScopedStore, StoreError},
};

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for RendezvousError {
    fn from(err: StoreError) -> Self {
        RendezvousError::StoreUnavailable(err.to_string())
    }
}

impl RendezvousError {
    fn invalid(message: impl Into<String>) -> Self {
        RendezvousError::InvalidRequest(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RendezvousError::InvalidRequest(_) => "invalid_request",
            RendezvousError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutcome {
    #[serde(rename = "PeerID")]
    pub peer_id: PeerId,
    #[serde(rename = "Peers")]
    pub peers: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "Peers")]
    pub peers: Vec<PeerId>,
    #[serde(rename = "Candidates")]
    pub candidates: Vec<IceCandidate>,
    #[serde(rename = "Offers")]
    pub offers: Vec<PeerOffer>,
}

/// Stateless orchestration of channel membership and peer mailboxes.
///
/// Every operation touches a single scope for its write, so nothing here
/// needs a lock or a cross-scope transaction. Two concurrent joins may each
/// miss the other in their snapshot; polling `query_status` recovers.
#[derive(Clone)]
pub struct RendezvousService {
    membership: ChannelMembership,
    mailbox: PeerMailbox,
}

impl RendezvousService {
    pub fn new(store: Arc<dyn ScopedStore>) -> Self {
        Self {
            membership: ChannelMembership::new(store.clone()),
            mailbox: PeerMailbox::new(store),
        }
    }

    pub fn membership(&self) -> &ChannelMembership {
        &self.membership
    }

    pub fn mailbox(&self) -> &PeerMailbox {
        &self.mailbox
    }

    /// Snapshot the channel, then add a freshly generated peer to it. The
    /// returned peer list never contains the new peer itself.
    pub async fn join(&self, channel_id: &str) -> Result<JoinOutcome, RendezvousError> {
        if channel_id.is_empty() {
            return Err(RendezvousError::invalid("Invalid channel ID"));
        }

        let peers = self.membership.list_peers(channel_id).await?;
        let peer_id = PeerId::generate();
        self.membership.add_member(channel_id, &peer_id).await?;

        tracing::debug!(
            channel_id,
            peer_id = %peer_id,
            existing_peers = peers.len(),
            "peer joined channel"
        );
        Ok(JoinOutcome { peer_id, peers })
    }

    pub async fn deposit_candidate(
        &self,
        source: &PeerId,
        target: &PeerId,
        candidate: Option<IceCandidate>,
    ) -> Result<(), RendezvousError> {
        if source.as_str().is_empty() || target.as_str().is_empty() || candidate.is_none() {
            return Err(RendezvousError::invalid(
                "Invalid 'add ice candidate' request",
            ));
        }

        self.mailbox
            .deposit_candidate(target, source, candidate)
            .await
            .map_err(|err| match err {
                MailboxError::Invalid(_) => {
                    RendezvousError::invalid("Invalid 'add ice candidate' request")
                }
                MailboxError::Store(err) => err.into(),
            })?;

        tracing::debug!(source = %source, target = %target, "candidate deposited");
        Ok(())
    }

    pub async fn deposit_offer(
        &self,
        source: &PeerId,
        target: &PeerId,
        offer: &str,
    ) -> Result<(), RendezvousError> {
        if source.as_str().is_empty() || target.as_str().is_empty() || offer.is_empty() {
            return Err(RendezvousError::invalid("Invalid 'add offer' request"));
        }

        self.mailbox
            .deposit_offer(target, source, offer)
            .await
            .map_err(|err| match err {
                MailboxError::Invalid(_) => RendezvousError::invalid("Invalid 'add offer' request"),
                MailboxError::Store(err) => err.into(),
            })?;

        tracing::debug!(source = %source, target = %target, "offer deposited");
        Ok(())
    }

    /// The single read path: channel members plus everything in the peer's
    /// mailbox. A pure poll with no side effects.
    pub async fn query_status(
        &self,
        peer: &PeerId,
        channel_id: &str,
    ) -> Result<StatusSnapshot, RendezvousError> {
        if peer.as_str().is_empty() || channel_id.is_empty() {
            return Err(RendezvousError::invalid("Invalid 'get status' request"));
        }

        let peers = self.membership.list_peers(channel_id).await?;
        let candidates = self.mailbox.list_candidates(peer).await?;
        let offers = self.mailbox.list_offers(peer).await?;

        Ok(StatusSnapshot {
            peers,
            candidates,
            offers,
        })
    }
}
