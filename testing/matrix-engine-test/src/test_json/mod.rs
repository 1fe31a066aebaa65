//! Test data for the matrix-engine crates.
//!
//! Exporting each const allows all the test data to have a single source of
//! truth.

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

pub mod api_responses;
pub mod sync;

pub use api_responses::{
    CREATE_ROOM, KEYS_CHANGES, KEYS_QUERY, KEYS_UPLOAD, LIMIT_EXCEEDED, LOGIN,
    LOGIN_RESPONSE_ERR, NOT_FOUND, SERVER_ERROR, UNKNOWN_TOKEN,
};
pub use sync::{ENCRYPTION, MEMBER, MESSAGE, SYNC, SYNC_EMPTY, SYNC_ROOM_ID};

/// An empty response.
pub static EMPTY: Lazy<JsonValue> = Lazy::new(|| json!({}));

/// A response with only an event ID.
pub static EVENT_ID: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "event_id": "$h29iv0s8:example.com"
    })
});

/// A response with only a room ID.
pub static ROOM_ID: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "room_id": "!testroom:example.org"
    })
});
