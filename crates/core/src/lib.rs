//! Core domain types for peer rendezvous: identifiers, scope keys, and the
//! signaling records exchanged through mailboxes.

pub mod peer;
pub mod scope;
pub mod signaling;

pub use peer::PeerId;
pub use scope::{KeyError, RecordKey, RecordKind, ScopeKey, ScopeKind};
pub use signaling::{ChannelEntry, IceCandidate, PeerOffer};
