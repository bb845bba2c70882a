//! Key construction for the scoped record store.
//!
//! Every record lives under exactly one ancestor scope: a channel for
//! membership entries, a target peer for mailbox entries. Reads anchored at a
//! scope observe every write previously committed under that same scope.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::PeerId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("unknown scope kind '{0}'")]
    UnknownScopeKind(String),
    #[error("unknown record kind '{0}'")]
    UnknownRecordKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Channel,
    Peer,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Channel => "channel",
            ScopeKind::Peer => "peer",
        }
    }
}

impl FromStr for ScopeKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(ScopeKind::Channel),
            "peer" => Ok(ScopeKind::Peer),
            other => Err(KeyError::UnknownScopeKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ChannelEntry,
    IceCandidate,
    PeerOffer,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ChannelEntry => "channel_entry",
            RecordKind::IceCandidate => "ice_candidate",
            RecordKind::PeerOffer => "peer_offer",
        }
    }

    /// Scope kind a record of this kind must be filed under.
    pub fn scope_kind(&self) -> ScopeKind {
        match self {
            RecordKind::ChannelEntry => ScopeKind::Channel,
            RecordKind::IceCandidate | RecordKind::PeerOffer => ScopeKind::Peer,
        }
    }
}

impl FromStr for RecordKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel_entry" => Ok(RecordKind::ChannelEntry),
            "ice_candidate" => Ok(RecordKind::IceCandidate),
            "peer_offer" => Ok(RecordKind::PeerOffer),
            other => Err(KeyError::UnknownRecordKind(other.to_string())),
        }
    }
}

/// Ancestor key identifying one consistency domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    kind: ScopeKind,
    id: String,
}

impl ScopeKey {
    pub fn new(kind: ScopeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self::new(ScopeKind::Channel, channel_id)
    }

    pub fn peer(peer_id: &PeerId) -> Self {
        Self::new(ScopeKind::Peer, peer_id.as_str())
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

/// Complete key of a stored record: its scope, its kind, and the
/// store-assigned sequence that makes it unique among siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub scope: ScopeKey,
    pub kind: RecordKind,
    pub sequence: i64,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.kind.as_str(), self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_names() {
        for kind in [ScopeKind::Channel, ScopeKind::Peer] {
            assert_eq!(kind.as_str().parse::<ScopeKind>().unwrap(), kind);
        }
        for kind in [
            RecordKind::ChannelEntry,
            RecordKind::IceCandidate,
            RecordKind::PeerOffer,
        ] {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_names_are_rejected() {
        assert_eq!(
            "room".parse::<ScopeKind>().unwrap_err(),
            KeyError::UnknownScopeKind("room".into())
        );
        assert!("offer".parse::<RecordKind>().is_err());
    }

    #[test]
    fn mailbox_records_belong_to_peer_scopes() {
        assert_eq!(RecordKind::ChannelEntry.scope_kind(), ScopeKind::Channel);
        assert_eq!(RecordKind::IceCandidate.scope_kind(), ScopeKind::Peer);
        assert_eq!(RecordKind::PeerOffer.scope_kind(), ScopeKind::Peer);
    }

    #[test]
    fn channel_and_peer_scopes_with_same_id_are_distinct() {
        let channel = ScopeKey::channel("shared");
        let peer = ScopeKey::peer(&PeerId::from("shared"));
        assert_ne!(channel, peer);
        assert_eq!(channel.to_string(), "channel/shared");
        assert_eq!(peer.to_string(), "peer/shared");
    }

    #[test]
    fn record_key_display_includes_sequence() {
        let key = RecordKey {
            scope: ScopeKey::channel("room1"),
            kind: RecordKind::ChannelEntry,
            sequence: 7,
        };
        assert_eq!(key.to_string(), "channel/room1/channel_entry/7");
    }
}
