use serde::{Deserialize, Deserializer, Serialize};

use crate::peer::PeerId;

/// Membership record filed under a channel scope, one per join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    #[serde(rename = "PeerID")]
    pub peer_id: PeerId,
}

/// Network-path candidate relayed verbatim between peers.
///
/// `source_id` is stamped by the broker from the depositing peer; whatever a
/// client puts there is overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "Label", default, deserialize_with = "null_as_empty")]
    pub label: String,
    #[serde(rename = "ID", default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(rename = "Candidate", default, deserialize_with = "null_as_empty")]
    pub candidate: String,
    #[serde(rename = "SourceID", default, deserialize_with = "null_as_empty")]
    pub source_id: String,
}

impl IceCandidate {
    /// True when the sender supplied no candidate content at all.
    pub fn is_empty(&self) -> bool {
        self.label.is_empty() && self.id.is_empty() && self.candidate.is_empty()
    }

    pub fn stamped(mut self, source: &PeerId) -> Self {
        self.source_id = source.as_str().to_owned();
        self
    }
}

/// Decodes a string field, reading an explicit `null` as empty.
pub fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Session offer addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOffer {
    #[serde(rename = "SourceID")]
    pub source_id: String,
    #[serde(rename = "Offer")]
    pub offer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_uses_wire_field_names() {
        let candidate = IceCandidate {
            label: "0".into(),
            id: "audio".into(),
            candidate: "candidate:1 1 udp 2122260223 10.0.0.1 54321 typ host".into(),
            source_id: String::new(),
        }
        .stamped(&PeerId::from("A"));

        assert_eq!(
            serde_json::to_value(&candidate).unwrap(),
            json!({
                "Label": "0",
                "ID": "audio",
                "Candidate": "candidate:1 1 udp 2122260223 10.0.0.1 54321 typ host",
                "SourceID": "A",
            })
        );
    }

    #[test]
    fn stamping_overwrites_client_supplied_source() {
        let candidate: IceCandidate =
            serde_json::from_value(json!({"Candidate": "c", "SourceID": "forged"})).unwrap();
        let stamped = candidate.stamped(&PeerId::from("real"));
        assert_eq!(stamped.source_id, "real");
    }

    #[test]
    fn candidate_without_content_is_empty() {
        let candidate: IceCandidate = serde_json::from_value(json!({})).unwrap();
        assert!(candidate.is_empty());

        let candidate: IceCandidate = serde_json::from_value(json!({"Label": "0"})).unwrap();
        assert!(!candidate.is_empty());
    }

    #[test]
    fn null_candidate_fields_read_as_empty() {
        let candidate: IceCandidate = serde_json::from_value(
            json!({"Label": null, "ID": null, "Candidate": null, "SourceID": null}),
        )
        .unwrap();
        assert!(candidate.is_empty());
        assert!(candidate.source_id.is_empty());

        let candidate: IceCandidate =
            serde_json::from_value(json!({"Label": null, "Candidate": "c"})).unwrap();
        assert_eq!(candidate.candidate, "c");
    }

    #[test]
    fn channel_entry_round_trips_peer_id() {
        let entry = ChannelEntry {
            peer_id: PeerId::from("P1"),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"PeerID": "P1"}));
        let back: ChannelEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }
}
