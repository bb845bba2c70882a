use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use signalbox_core::{signaling::null_as_empty, IceCandidate, PeerId};

use crate::{rendezvous::RendezvousError, AppState};

#[cfg(feature = "metrics")]
const ROUTE: &str = "broker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Join,
    AddIceCandidate,
    AddOffer,
    GetStatus,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Join => "join",
            Operation::AddIceCandidate => "add ice candidate",
            Operation::AddOffer => "add offer",
            Operation::GetStatus => "get status",
        }
    }
}

impl FromStr for Operation {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(Operation::Join),
            "add ice candidate" => Ok(Operation::AddIceCandidate),
            "add offer" => Ok(Operation::AddOffer),
            "get status" => Ok(Operation::GetStatus),
            other => Err(RendezvousError::InvalidRequest(format!(
                "Invalid operation: {other}"
            ))),
        }
    }
}

/// Request envelope. Absent or `null` fields decode as empty, unknown ones are
/// ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BrokerRequest {
    #[serde(rename = "Operation", deserialize_with = "null_as_empty")]
    pub operation: String,
    #[serde(rename = "ChannelID", deserialize_with = "null_as_empty")]
    pub channel_id: String,
    #[serde(rename = "SourcePeerID", deserialize_with = "null_as_empty")]
    pub source_peer_id: String,
    #[serde(rename = "TargetPeerID", deserialize_with = "null_as_empty")]
    pub target_peer_id: String,
    #[serde(rename = "Candidate")]
    pub candidate: Option<IceCandidate>,
    #[serde(rename = "Offer", deserialize_with = "null_as_empty")]
    pub offer: String,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl<'a> ErrorBody<'a> {
    fn new(error: &'a str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}

impl IntoResponse for RendezvousError {
    fn into_response(self) -> Response {
        let status = match &self {
            RendezvousError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RendezvousError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::new(self.kind(), self.to_string()))).into_response()
    }
}

/// Single signaling endpoint. The JSON body is parsed by hand so that decode
/// failures carry the broker's own error shape.
pub async fn handle(State(state): State<AppState>, body: Bytes) -> Response {
    let request: BrokerRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return reject(
                &state,
                None,
                RendezvousError::InvalidRequest(format!("Invalid request format: {err}")),
            );
        }
    };

    let operation = match request.operation.parse::<Operation>() {
        Ok(operation) => operation,
        Err(err) => return reject(&state, None, err),
    };

    let result = dispatch(&state, operation, request).await;
    match result {
        Ok(response) => {
            state.record_broker_operation(operation.as_str(), "ok");
            #[cfg(feature = "metrics")]
            state.record_http_request(ROUTE, StatusCode::OK.as_u16());
            response
        }
        Err(err) => reject(&state, Some(operation), err),
    }
}

/// Anything other than POST on the broker route.
pub async fn reject_method(State(state): State<AppState>) -> Response {
    reject(
        &state,
        None,
        RendezvousError::InvalidRequest("Invalid request format".into()),
    )
}

async fn dispatch(
    state: &AppState,
    operation: Operation,
    request: BrokerRequest,
) -> Result<Response, RendezvousError> {
    let service = state.rendezvous();
    let source = PeerId::from(request.source_peer_id);

    let response = match operation {
        Operation::Join => Json(service.join(&request.channel_id).await?).into_response(),
        Operation::AddIceCandidate => {
            let target = PeerId::from(request.target_peer_id);
            service
                .deposit_candidate(&source, &target, request.candidate)
                .await?;
            Json(Empty {}).into_response()
        }
        Operation::AddOffer => {
            let target = PeerId::from(request.target_peer_id);
            service
                .deposit_offer(&source, &target, &request.offer)
                .await?;
            Json(Empty {}).into_response()
        }
        Operation::GetStatus => {
            Json(service.query_status(&source, &request.channel_id).await?).into_response()
        }
    };
    Ok(response)
}

fn reject(state: &AppState, operation: Option<Operation>, err: RendezvousError) -> Response {
    let operation = operation.map(|op| op.as_str()).unwrap_or("unknown");
    match &err {
        RendezvousError::InvalidRequest(message) => {
            tracing::debug!(operation, %message, "rejected broker request");
        }
        RendezvousError::StoreUnavailable(message) => {
            tracing::error!(operation, %message, "broker operation failed in store");
        }
    }
    state.record_broker_operation(operation, err.kind());

    let response = err.into_response();
    #[cfg(feature = "metrics")]
    state.record_http_request(ROUTE, response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_match_wire_values() {
        for op in [
            Operation::Join,
            Operation::AddIceCandidate,
            Operation::AddOffer,
            Operation::GetStatus,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn unknown_operation_is_an_invalid_request() {
        let err = "leave".parse::<Operation>().unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert_eq!(err.to_string(), "Invalid operation: leave");
    }

    #[test]
    fn request_defaults_missing_fields() {
        let request: BrokerRequest =
            serde_json::from_str(r#"{"Operation":"join","Extra":1}"#).unwrap();
        assert_eq!(request.operation, "join");
        assert!(request.channel_id.is_empty());
        assert!(request.candidate.is_none());
        assert!(request.offer.is_empty());
    }

    #[test]
    fn request_reads_candidate_object() {
        let request: BrokerRequest = serde_json::from_str(
            r#"{"Operation":"add ice candidate","SourcePeerID":"A","TargetPeerID":"B",
                "Candidate":{"Label":"0","ID":"audio","Candidate":"candidate:1 ..."}}"#,
        )
        .unwrap();
        let candidate = request.candidate.expect("candidate present");
        assert_eq!(candidate.label, "0");
        assert_eq!(candidate.id, "audio");
        assert_eq!(candidate.candidate, "candidate:1 ...");
        assert!(candidate.source_id.is_empty());
    }

    #[test]
    fn null_candidate_decodes_as_absent() {
        let request: BrokerRequest =
            serde_json::from_str(r#"{"Operation":"add ice candidate","Candidate":null}"#).unwrap();
        assert!(request.candidate.is_none());
    }

    #[test]
    fn null_string_fields_decode_as_empty() {
        let request: BrokerRequest = serde_json::from_str(
            r#"{"Operation":"join","ChannelID":null,"SourcePeerID":null,
                "TargetPeerID":null,"Offer":null}"#,
        )
        .unwrap();
        assert_eq!(request.operation, "join");
        assert!(request.channel_id.is_empty());
        assert!(request.source_peer_id.is_empty());
        assert!(request.target_peer_id.is_empty());
        assert!(request.offer.is_empty());
    }
}
