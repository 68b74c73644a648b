use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;
use zeromq::ZmqMessage;

type HmacSha256 = Hmac<Sha256>;

/// Frame separating routing identities from the signed message body.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

pub const PROTOCOL_VERSION: &str = "5.3";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("message has no frame delimiter")]
    MissingDelimiter,
    #[error("message is truncated after the frame delimiter")]
    Truncated,
    #[error("message signature does not match")]
    BadSignature,
    #[error("invalid JSON in message frame: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_date() -> DateTime<Utc> {
    Utc::now()
}

/// The header frame of a wire message. Only the fields the proxy actually
/// reads are modeled; everything else rides along in the raw frame bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_date")]
    pub date: DateTime<Utc>,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

/// Payload fields of an execute request that the proxy inspects or rewrites.
#[derive(Debug, Deserialize)]
struct ExecutePayload {
    #[serde(default)]
    code: String,
}

/// A complete multipart message, split into routing identities and the five
/// body frames. Frames are kept as raw bytes so a relayed message can be put
/// back on the wire byte-identical, signature included.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub idents: Vec<Bytes>,
    pub signature: Bytes,
    pub header: Bytes,
    pub parent_header: Bytes,
    pub metadata: Bytes,
    pub content: Bytes,
    pub extra: Vec<Bytes>,
}

impl WireMessage {
    /// Split raw frames into a message. Fails closed: anything without the
    /// delimiter or with fewer than five frames after it is rejected, never
    /// partially relayed.
    pub fn from_frames(frames: Vec<Bytes>) -> Result<Self, WireError> {
        let delim = frames
            .iter()
            .position(|f| f.as_ref() == DELIMITER)
            .ok_or(WireError::MissingDelimiter)?;
        if frames.len() < delim + 6 {
            return Err(WireError::Truncated);
        }

        let mut frames = frames;
        let extra = frames.split_off(delim + 6);
        let mut body = frames.split_off(delim + 1);
        frames.pop(); // drop the delimiter frame itself
        let content = body.pop().unwrap_or_default();
        let metadata = body.pop().unwrap_or_default();
        let parent_header = body.pop().unwrap_or_default();
        let header = body.pop().unwrap_or_default();
        let signature = body.pop().unwrap_or_default();

        Ok(Self {
            idents: frames,
            signature,
            header,
            parent_header,
            metadata,
            content,
            extra,
        })
    }

    pub fn from_zmq(message: ZmqMessage) -> Result<Self, WireError> {
        Self::from_frames(message.into_vec())
    }

    pub fn into_zmq(self) -> ZmqMessage {
        let mut message = ZmqMessage::from(Bytes::from_static(DELIMITER));
        for ident in self.idents.into_iter().rev() {
            message.push_front(ident);
        }
        message.push_back(self.signature);
        message.push_back(self.header);
        message.push_back(self.parent_header);
        message.push_back(self.metadata);
        message.push_back(self.content);
        for frame in self.extra {
            message.push_back(frame);
        }
        message
    }

    pub fn header(&self) -> Result<Header, WireError> {
        Ok(serde_json::from_slice(&self.header)?)
    }

    /// The `code` field of an execute request's content.
    pub fn execute_code(&self) -> Result<String, WireError> {
        let payload: ExecutePayload = serde_json::from_slice(&self.content)?;
        Ok(payload.code)
    }

    /// Rewrite the execution payload in place and re-sign. The header,
    /// parent header, and metadata frames are left byte-identical; only the
    /// content frame and the signature change.
    pub fn rewrite_execution(
        &mut self,
        session: &Session,
        code: &str,
        silent: bool,
    ) -> Result<(), WireError> {
        let mut content: serde_json::Value = serde_json::from_slice(&self.content)?;
        content["code"] = serde_json::Value::from(code);
        content["silent"] = serde_json::Value::from(silent);
        self.content = Bytes::from(serde_json::to_vec(&content)?);
        session.resign(self);
        Ok(())
    }
}

impl From<WireMessage> for ZmqMessage {
    fn from(message: WireMessage) -> Self {
        message.into_zmq()
    }
}

/// Map a request type to its reply type: `execute_request` -> `execute_reply`.
pub fn reply_type(request_type: &str) -> String {
    match request_type.strip_suffix("_request") {
        Some(base) => format!("{}_reply", base),
        None => request_type.to_string(),
    }
}

/// Signing context shared by the proxy and every child it starts. An empty
/// key disables authentication, matching the wire protocol's convention.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub username: String,
    key: String,
}

impl Session {
    pub fn new(key: String) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            username: "kernel".to_string(),
            key,
        }
    }

    fn mac(&self) -> Option<HmacSha256> {
        if self.key.is_empty() {
            return None;
        }
        HmacSha256::new_from_slice(self.key.as_bytes()).ok()
    }

    /// HMAC-SHA256 hex digest over the four body frames, in wire order.
    pub fn sign(&self, header: &[u8], parent: &[u8], metadata: &[u8], content: &[u8]) -> String {
        let Some(mut mac) = self.mac() else {
            return String::new();
        };
        mac.update(header);
        mac.update(parent);
        mac.update(metadata);
        mac.update(content);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check an inbound message's signature before trusting its decoded
    /// fields. Relay paths never call this; they pass frames through
    /// untouched.
    pub fn verify(&self, message: &WireMessage) -> Result<(), WireError> {
        let Some(mut mac) = self.mac() else {
            return Ok(());
        };
        mac.update(&message.header);
        mac.update(&message.parent_header);
        mac.update(&message.metadata);
        mac.update(&message.content);
        let provided = hex::decode(&message.signature).map_err(|_| WireError::BadSignature)?;
        mac.verify_slice(&provided).map_err(|_| WireError::BadSignature)
    }

    /// Recompute the signature frame after a content mutation.
    pub fn resign(&self, message: &mut WireMessage) {
        let signature = self.sign(
            &message.header,
            &message.parent_header,
            &message.metadata,
            &message.content,
        );
        message.signature = Bytes::from(signature.into_bytes());
    }

    /// Build a locally produced message: a reply, a status broadcast, or a
    /// shutdown request toward a child. `parent` carries the raw header bytes
    /// of the request being answered, if any.
    pub fn build(
        &self,
        msg_type: &str,
        content: serde_json::Value,
        parent: Option<&Bytes>,
        idents: Vec<Bytes>,
    ) -> Result<WireMessage, WireError> {
        let header = Header {
            msg_id: Uuid::new_v4().to_string(),
            session: self.session_id.clone(),
            username: self.username.clone(),
            date: Utc::now(),
            msg_type: msg_type.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        };
        let header = Bytes::from(serde_json::to_vec(&header)?);
        let parent_header = match parent {
            Some(raw) => raw.clone(),
            None => Bytes::from_static(b"{}"),
        };
        let metadata = Bytes::from_static(b"{}");
        let content = Bytes::from(serde_json::to_vec(&content)?);
        let signature = self.sign(&header, &parent_header, &metadata, &content);
        let signature = Bytes::from(signature.into_bytes());

        Ok(WireMessage {
            idents,
            signature,
            header,
            parent_header,
            metadata,
            content,
            extra: Vec::new(),
        })
    }
}
