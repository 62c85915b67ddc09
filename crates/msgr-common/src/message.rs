//! Typed wire messages and their JSON mapping encoding.
//!
//! Every message on the wire is a single JSON object. Requests carry an
//! `action` field naming one of a fixed set of operations; server replies
//! carry a numeric `response` code instead. Field tokens are defined in
//! [`crate::proto`].

use crate::proto::{action, code, field};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// A server reply: a bare `response` mapping with optional payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Numeric response code (200, 202, 205, 400, 511).
    pub code: u16,
    /// Error text; set on 400 replies.
    pub error: Option<String>,
    /// Opaque payload; set on 511 replies (nonce, digest, or public key).
    pub data: Option<String>,
    /// List payload; set on 202 replies.
    pub list_info: Option<Vec<String>>,
}

impl Response {
    /// A bare `200 OK`.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            code: code::OK,
            error: None,
            data: None,
            list_info: None,
        }
    }

    /// A `202` reply carrying a list payload.
    #[must_use]
    pub const fn accepted(list_info: Vec<String>) -> Self {
        Self {
            code: code::ACCEPTED,
            error: None,
            data: None,
            list_info: Some(list_info),
        }
    }

    /// The server-initiated `205` refresh-lists notice.
    #[must_use]
    pub const fn lists_changed() -> Self {
        Self {
            code: code::LISTS_CHANGED,
            error: None,
            data: None,
            list_info: None,
        }
    }

    /// A `400` rejection with error text.
    #[must_use]
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            code: code::BAD_REQUEST,
            error: Some(error.into()),
            data: None,
            list_info: None,
        }
    }

    /// A `511` auth carrier with opaque payload.
    #[must_use]
    pub fn auth(data: impl Into<String>) -> Self {
        Self {
            code: code::AUTH,
            error: None,
            data: Some(data.into()),
            list_info: None,
        }
    }
}

/// A parsed wire message.
///
/// Variants map 1:1 to the action names in [`crate::proto::action`], plus
/// [`Message::Reply`] for the bare `response` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Login announcement with the user descriptor.
    Presence {
        /// Send timestamp.
        time: u64,
        /// Account name to log in as.
        account_name: String,
        /// Client's public key string.
        public_key: String,
    },
    /// Point-to-point text message.
    Text {
        /// Sending account name.
        sender: String,
        /// Destination account name.
        destination: String,
        /// Send timestamp.
        time: u64,
        /// Message body.
        text: String,
    },
    /// Clean logout.
    Exit {
        /// Send timestamp.
        time: u64,
        /// Account name logging out.
        account_name: String,
    },
    /// Request the acting user's contact list.
    GetContacts {
        /// Send timestamp.
        time: u64,
        /// Acting account name.
        user: String,
    },
    /// Add a contact edge.
    AddContact {
        /// Send timestamp.
        time: u64,
        /// Acting account name.
        user: String,
        /// Contact to add.
        account_name: String,
    },
    /// Remove a contact edge.
    RemoveContact {
        /// Send timestamp.
        time: u64,
        /// Acting account name.
        user: String,
        /// Contact to remove.
        account_name: String,
    },
    /// Request the full known-user list.
    UsersRequest {
        /// Send timestamp.
        time: u64,
        /// Acting account name.
        account_name: String,
    },
    /// Request another user's stored public key.
    PublicKeyRequest {
        /// Send timestamp.
        time: u64,
        /// Account whose key is requested.
        account_name: String,
    },
    /// A server reply (or the client's 511 handshake answer).
    Reply(Response),
}

/// Errors that can occur while decoding a wire message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload parsed but is not a JSON object.
    #[error("payload is not a mapping")]
    NotAMapping,
    /// The mapping carries neither `action` nor `response`.
    #[error("mapping has no action or response field")]
    NoAction,
    /// The `action` value is not one of the known operations.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// A required field is absent or has the wrong type.
    #[error("missing or invalid field: {0}")]
    BadField(&'static str),
}

impl DecodeError {
    /// `true` when the payload was a well-formed mapping that merely fails
    /// the per-action field requirements. The server answers these with a
    /// `400` and keeps the connection; anything else aborts it.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::NoAction | Self::UnknownAction(_) | Self::BadField(_)
        )
    }
}

fn get_str(map: &Map<String, Value>, key: &'static str) -> Result<String, DecodeError> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(DecodeError::BadField(key))
}

fn get_time(map: &Map<String, Value>) -> Result<u64, DecodeError> {
    map.get(field::TIME)
        .and_then(Value::as_u64)
        .ok_or(DecodeError::BadField(field::TIME))
}

impl Message {
    /// Serializes this message into the JSON mapping sent on the wire.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Presence {
                time,
                account_name,
                public_key,
            } => json!({
                field::ACTION: action::PRESENCE,
                field::TIME: time,
                field::USER: {
                    field::ACCOUNT_NAME: account_name,
                    field::PUBLIC_KEY: public_key,
                },
            }),
            Self::Text {
                sender,
                destination,
                time,
                text,
            } => json!({
                field::ACTION: action::MESSAGE,
                field::SENDER: sender,
                field::DESTINATION: destination,
                field::TIME: time,
                field::MESSAGE_TEXT: text,
            }),
            Self::Exit { time, account_name } => json!({
                field::ACTION: action::EXIT,
                field::TIME: time,
                field::ACCOUNT_NAME: account_name,
            }),
            Self::GetContacts { time, user } => json!({
                field::ACTION: action::GET_CONTACTS,
                field::TIME: time,
                field::USER: user,
            }),
            Self::AddContact {
                time,
                user,
                account_name,
            } => json!({
                field::ACTION: action::ADD_CONTACT,
                field::TIME: time,
                field::USER: user,
                field::ACCOUNT_NAME: account_name,
            }),
            Self::RemoveContact {
                time,
                user,
                account_name,
            } => json!({
                field::ACTION: action::REMOVE_CONTACT,
                field::TIME: time,
                field::USER: user,
                field::ACCOUNT_NAME: account_name,
            }),
            Self::UsersRequest { time, account_name } => json!({
                field::ACTION: action::USERS_REQUEST,
                field::TIME: time,
                field::ACCOUNT_NAME: account_name,
            }),
            Self::PublicKeyRequest { time, account_name } => json!({
                field::ACTION: action::PUBLIC_KEY_REQUEST,
                field::TIME: time,
                field::ACCOUNT_NAME: account_name,
            }),
            Self::Reply(response) => {
                let mut map = Map::new();
                map.insert(field::RESPONSE.to_owned(), json!(response.code));
                if let Some(error) = &response.error {
                    map.insert(field::ERROR.to_owned(), json!(error));
                }
                if let Some(data) = &response.data {
                    map.insert(field::DATA.to_owned(), json!(data));
                }
                if let Some(list_info) = &response.list_info {
                    map.insert(field::LIST_INFO.to_owned(), json!(list_info));
                }
                Value::Object(map)
            }
        }
    }

    /// Serializes this message to UTF-8 JSON bytes (without framing).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_value()).expect("a JSON value always serializes")
    }

    /// Parses a frame body into a typed message.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the bytes are not a JSON object, carry
    /// an unknown action, or fail the per-action field requirements.
    pub fn from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(data)?;
        let Value::Object(map) = value else {
            return Err(DecodeError::NotAMapping);
        };

        if let Some(code_value) = map.get(field::RESPONSE) {
            let code = code_value
                .as_u64()
                .and_then(|c| u16::try_from(c).ok())
                .ok_or(DecodeError::BadField(field::RESPONSE))?;
            let error = map
                .get(field::ERROR)
                .and_then(Value::as_str)
                .map(str::to_owned);
            let data = map
                .get(field::DATA)
                .and_then(Value::as_str)
                .map(str::to_owned);
            let list_info = map.get(field::LIST_INFO).and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            });
            return Ok(Self::Reply(Response {
                code,
                error,
                data,
                list_info,
            }));
        }

        let action_name = map
            .get(field::ACTION)
            .and_then(Value::as_str)
            .ok_or(DecodeError::NoAction)?;

        match action_name {
            action::PRESENCE => {
                let time = get_time(&map)?;
                let user = map
                    .get(field::USER)
                    .and_then(Value::as_object)
                    .ok_or(DecodeError::BadField(field::USER))?;
                Ok(Self::Presence {
                    time,
                    account_name: get_str(user, field::ACCOUNT_NAME)?,
                    public_key: get_str(user, field::PUBLIC_KEY)?,
                })
            }
            action::MESSAGE => Ok(Self::Text {
                sender: get_str(&map, field::SENDER)?,
                destination: get_str(&map, field::DESTINATION)?,
                time: get_time(&map)?,
                text: get_str(&map, field::MESSAGE_TEXT)?,
            }),
            action::EXIT => Ok(Self::Exit {
                time: get_time(&map)?,
                account_name: get_str(&map, field::ACCOUNT_NAME)?,
            }),
            action::GET_CONTACTS => Ok(Self::GetContacts {
                time: get_time(&map)?,
                user: get_str(&map, field::USER)?,
            }),
            action::ADD_CONTACT => Ok(Self::AddContact {
                time: get_time(&map)?,
                user: get_str(&map, field::USER)?,
                account_name: get_str(&map, field::ACCOUNT_NAME)?,
            }),
            action::REMOVE_CONTACT => Ok(Self::RemoveContact {
                time: get_time(&map)?,
                user: get_str(&map, field::USER)?,
                account_name: get_str(&map, field::ACCOUNT_NAME)?,
            }),
            action::USERS_REQUEST => Ok(Self::UsersRequest {
                time: get_time(&map)?,
                account_name: get_str(&map, field::ACCOUNT_NAME)?,
            }),
            action::PUBLIC_KEY_REQUEST => Ok(Self::PublicKeyRequest {
                time: get_time(&map)?,
                account_name: get_str(&map, field::ACCOUNT_NAME)?,
            }),
            other => Err(DecodeError::UnknownAction(other.to_owned())),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    proptest! {
        #[test]
        fn text_round_trips(
            sender in arb_name(),
            destination in arb_name(),
            time in any::<u64>(),
            text in ".{0,256}"
        ) {
            let msg = Message::Text { sender, destination, time, text };
            let parsed = Message::from_slice(&msg.to_bytes()).unwrap();
            prop_assert_eq!(msg, parsed);
        }

        #[test]
        fn accepted_reply_round_trips(list in prop::collection::vec(arb_name(), 0..8)) {
            let msg = Message::Reply(Response::accepted(list));
            let parsed = Message::from_slice(&msg.to_bytes()).unwrap();
            prop_assert_eq!(msg, parsed);
        }
    }
}
