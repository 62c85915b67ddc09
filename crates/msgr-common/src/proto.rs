//! Protocol constants: field tokens, action names, and response codes.

/// JSON field tokens used in wire messages.
///
/// Both ends must agree on these byte-for-byte; they are fixed ASCII and
/// never localized.
pub mod field {
    /// Action name carried by every request message.
    pub const ACTION: &str = "action";
    /// Send timestamp (seconds since the Unix epoch).
    pub const TIME: &str = "time";
    /// User descriptor (in `presence`) or acting account name (list requests).
    pub const USER: &str = "user";
    /// Account name inside a user descriptor or as a request argument.
    pub const ACCOUNT_NAME: &str = "account_name";
    /// Sending account of a routed message.
    pub const SENDER: &str = "sender";
    /// Destination account of a routed message.
    pub const DESTINATION: &str = "destination";
    /// Body of a routed message.
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Numeric response code; present on every server reply.
    pub const RESPONSE: &str = "response";
    /// Human-readable error text accompanying a 400 reply.
    pub const ERROR: &str = "error";
    /// Opaque payload of a 511 exchange (nonce, digest, or public key).
    pub const DATA: &str = "data";
    /// List payload of a 202 reply.
    pub const LIST_INFO: &str = "list_info";
    /// Public key string inside a user descriptor.
    pub const PUBLIC_KEY: &str = "public_key";
}

/// Action names carried in the `action` field.
pub mod action {
    /// Login announcement; opens the authentication handshake.
    pub const PRESENCE: &str = "presence";
    /// Point-to-point text message.
    pub const MESSAGE: &str = "message";
    /// Clean logout.
    pub const EXIT: &str = "exit";
    /// Request the acting user's contact list.
    pub const GET_CONTACTS: &str = "get_contacts";
    /// Add a contact edge for the acting user.
    pub const ADD_CONTACT: &str = "add_contact";
    /// Remove a contact edge for the acting user.
    pub const REMOVE_CONTACT: &str = "remove_contact";
    /// Request the full known-user list.
    pub const USERS_REQUEST: &str = "users_request";
    /// Request another user's stored public key.
    pub const PUBLIC_KEY_REQUEST: &str = "public_key_request";
}

/// Response codes carried in the `response` field.
pub mod code {
    /// Request accepted, no payload.
    pub const OK: u16 = 200;
    /// Request accepted, `list_info` payload attached.
    pub const ACCEPTED: u16 = 202;
    /// Server-initiated notice: refresh your user/contact lists.
    pub const LISTS_CHANGED: u16 = 205;
    /// Malformed or rejected request, `error` text attached.
    pub const BAD_REQUEST: u16 = 400;
    /// Authentication challenge/response carrier, `data` payload attached.
    pub const AUTH: u16 = 511;
}
