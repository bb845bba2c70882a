use std::sync::Arc;

use signalbox_core::{ChannelEntry, PeerId, RecordKind, ScopeKey};

use crate::store::{ScopedStore, StoreError};

/// Channel membership, one `ChannelEntry` per join filed under the channel.
///
/// Joining twice records the peer twice. There is no uniqueness check and
/// listings are not deduplicated.
#[derive(Clone)]
pub struct ChannelMembership {
    store: Arc<dyn ScopedStore>,
}

impl ChannelMembership {
    pub fn new(store: Arc<dyn ScopedStore>) -> Self {
        Self { store }
    }

    pub async fn list_peers(&self, channel_id: &str) -> Result<Vec<PeerId>, StoreError> {
        let records = self
            .store
            .list_children(&ScopeKey::channel(channel_id), RecordKind::ChannelEntry)
            .await?;

        records
            .into_iter()
            .map(|record| {
                serde_json::from_value::<ChannelEntry>(record.body)
                    .map(|entry| entry.peer_id)
                    .map_err(|err| {
                        StoreError::Unavailable(format!(
                            "corrupt membership record {}: {err}",
                            record.key
                        ))
                    })
            })
            .collect()
    }

    pub async fn add_member(&self, channel_id: &str, peer_id: &PeerId) -> Result<(), StoreError> {
        let entry = ChannelEntry {
            peer_id: peer_id.clone(),
        };
        let body = serde_json::to_value(&entry)
            .map_err(|err| StoreError::Unavailable(format!("encode membership record: {err}")))?;
        let key = self
            .store
            .create_child(&ScopeKey::channel(channel_id), RecordKind::ChannelEntry, body)
            .await?;
        tracing::debug!(record = %key, "recorded channel member");
        Ok(())
    }
}
