//! The continuation wire format handed from one hop to the next.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{ExecutionPosition, Signer};
use crate::errors::{FlowError, SignatureError};

/// Where a hop finds its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputRef {
    /// The input travels in the continuation's `data` field.
    Inline,
    /// The input was written to the data store under `key`.
    Stored {
        /// The data store key.
        key: String,
    },
}

/// The signed part of a continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    /// The node the receiving hop runs.
    pub position: ExecutionPosition,
    /// Where the node's input lives.
    pub input: InputRef,
}

impl PipelineState {
    /// Creates a state with inline input.
    #[must_use]
    pub fn inline(position: ExecutionPosition) -> Self {
        Self {
            position,
            input: InputRef::Inline,
        }
    }

    /// Creates a state whose input lives in the data store.
    #[must_use]
    pub fn stored(position: ExecutionPosition, key: impl Into<String>) -> Self {
        Self {
            position,
            input: InputRef::Stored { key: key.into() },
        }
    }

    /// Serializes the state to the string that gets signed.
    pub fn encode(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a state string.
    pub fn decode(raw: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// What actually gets signed: the pipeline state bound to the request id
/// and to a digest of the store snapshot travelling next to it.
#[derive(Serialize, Deserialize)]
struct SignedState {
    #[serde(flatten)]
    state: PipelineState,
    id: String,
    store: String,
}

fn store_digest(store: &BTreeMap<String, String>) -> Result<String, FlowError> {
    Ok(hex::encode(Sha256::digest(serde_json::to_vec(store)?)))
}

/// A signed continuation: everything the next hop needs.
///
/// The signature covers `state`, which also carries the request id and a
/// digest of `store`; a state lifted into another request's continuation,
/// or paired with an edited snapshot, fails to open. `data` and `query`
/// are not covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// `sha256=<hex>` HMAC of `state`.
    pub sign: String,
    /// The request id.
    pub id: String,
    /// The original query string.
    #[serde(default)]
    pub query: String,
    /// The JSON-encoded [`PipelineState`], bound to `id` and `store`.
    pub state: String,
    /// Inline input bytes, empty when the input lives in a store.
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Snapshot of stores that travel with the request.
    #[serde(default)]
    pub store: BTreeMap<String, String>,
}

impl Continuation {
    /// Encodes and signs `state`.
    pub fn seal(
        signer: &Signer,
        request_id: impl Into<String>,
        query: impl Into<String>,
        state: &PipelineState,
        data: Vec<u8>,
        store: BTreeMap<String, String>,
    ) -> Result<Self, FlowError> {
        let id = request_id.into();
        let signed = serde_json::to_string(&SignedState {
            state: state.clone(),
            id: id.clone(),
            store: store_digest(&store)?,
        })?;
        Ok(Self {
            sign: signer.sign(signed.as_bytes()),
            id,
            query: query.into(),
            state: signed,
            data,
            store,
        })
    }

    /// Verifies the signature, checks that the state belongs to this
    /// request and snapshot, and decodes it.
    pub fn open(&self, signer: &Signer) -> Result<PipelineState, FlowError> {
        if self.sign.is_empty() {
            return Err(SignatureError::Missing.into());
        }
        signer.verify(self.state.as_bytes(), &self.sign)?;
        let signed: SignedState = serde_json::from_str(&self.state)?;
        if signed.id != self.id {
            return Err(SignatureError::Unbound("request id").into());
        }
        if signed.store != store_digest(&self.store)? {
            return Err(SignatureError::Unbound("store snapshot").into());
        }
        Ok(signed.state)
    }

    /// Serializes to the JSON body posted to the forward endpoint.
    pub fn encode(&self) -> Result<Vec<u8>, FlowError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a forward request body.
    pub fn decode(body: &[u8]) -> Result<Self, FlowError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Serde adapter encoding bytes as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes bytes as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserializes base64 into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_state() -> PipelineState {
        PipelineState::stored(
            ExecutionPosition::root("D").enter(Some("even".to_string()), "x"),
            "D.even-branch-input",
        )
    }

    #[test]
    fn test_state_decode_encode_is_identity() {
        let state = sample_state();
        let raw = state.encode().unwrap();
        assert_eq!(PipelineState::decode(&raw).unwrap(), state);

        let inline = PipelineState::inline(ExecutionPosition::root("A"));
        assert_eq!(PipelineState::decode(&inline.encode().unwrap()).unwrap(), inline);
    }

    #[test]
    fn test_continuation_round_trip_keeps_store_snapshot() {
        let signer = Signer::new("secret");
        let mut store = BTreeMap::new();
        store.insert("state:flow/req/A-join-completion".to_string(), "1".to_string());

        let cont = Continuation::seal(
            &signer,
            "req",
            "a=1",
            &sample_state(),
            b"\x00bytes".to_vec(),
            store.clone(),
        )
        .unwrap();

        let decoded = Continuation::decode(&cont.encode().unwrap()).unwrap();
        assert_eq!(decoded, cont);
        assert_eq!(decoded.store, store);
        assert_eq!(decoded.open(&signer).unwrap(), sample_state());
    }

    #[test]
    fn test_wire_shape() {
        let signer = Signer::new("secret");
        let state = PipelineState::inline(ExecutionPosition::root("A"));
        let cont =
            Continuation::seal(&signer, "req", "", &state, b"hi".to_vec(), BTreeMap::new()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&cont.encode().unwrap()).unwrap();

        assert_eq!(json["id"], "req");
        assert_eq!(json["data"], "aGk=");
        assert!(json["sign"].as_str().unwrap().starts_with("sha256="));

        let signed: serde_json::Value =
            serde_json::from_str(json["state"].as_str().unwrap()).unwrap();
        assert_eq!(signed["position"], serde_json::json!([{ "node": "A" }]));
        assert_eq!(signed["input"], serde_json::json!({ "kind": "inline" }));
        assert_eq!(signed["id"], "req");
        assert_eq!(signed["store"].as_str().unwrap().len(), 64);
        assert_eq!(PipelineState::decode(json["state"].as_str().unwrap()).unwrap(), state);
    }

    #[test]
    fn test_open_rejects_state_moved_to_another_request() {
        let signer = Signer::new("secret");
        let mut cont = Continuation::seal(
            &signer,
            "req-a",
            "",
            &sample_state(),
            Vec::new(),
            BTreeMap::new(),
        )
        .unwrap();
        cont.id = "req-b".to_string();
        assert!(matches!(
            cont.open(&signer),
            Err(FlowError::Signature(SignatureError::Unbound("request id")))
        ));
    }

    #[test]
    fn test_open_rejects_edited_store_snapshot() {
        let signer = Signer::new("secret");
        let mut store = BTreeMap::new();
        store.insert("state:request-state".to_string(), "stopped".to_string());
        let mut cont =
            Continuation::seal(&signer, "req", "", &sample_state(), Vec::new(), store).unwrap();
        assert!(cont.open(&signer).is_ok());

        cont.store
            .insert("state:request-state".to_string(), "running".to_string());
        assert!(matches!(
            cont.open(&signer),
            Err(FlowError::Signature(SignatureError::Unbound("store snapshot")))
        ));
    }

    #[test]
    fn test_open_rejects_bad_signatures() {
        let signer = Signer::new("secret");
        let mut cont = Continuation::seal(
            &signer,
            "req",
            "",
            &sample_state(),
            Vec::new(),
            BTreeMap::new(),
        )
        .unwrap();

        assert!(matches!(
            cont.open(&Signer::new("other")),
            Err(FlowError::Signature(SignatureError::Mismatch))
        ));

        cont.state = cont.state.replace("even", "odd");
        assert!(matches!(
            cont.open(&signer),
            Err(FlowError::Signature(SignatureError::Mismatch))
        ));

        cont.sign.clear();
        assert!(matches!(
            cont.open(&signer),
            Err(FlowError::Signature(SignatureError::Missing))
        ));
    }
}
