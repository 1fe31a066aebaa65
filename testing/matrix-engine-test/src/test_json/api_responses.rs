//! Canned responses of the client-server API endpoints.

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

/// `POST /_matrix/client/v3/createRoom`
pub static CREATE_ROOM: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "room_id": "!testroom:example.org"
    })
});

/// `GET /_matrix/client/v3/keys/changes`
pub static KEYS_CHANGES: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "changed": [
            "@alice:server.name",
            "@bob:other.server"
        ],
        "left": [
            "@carol:other.server"
        ]
    })
});

/// `POST /_matrix/client/v3/keys/query`, the signature doesn't verify.
pub static KEYS_QUERY: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "device_keys": {
            "@alice:example.org": {
                "JLAFKJWSCS": {
                    "algorithms": [
                        "m.olm.v1.curve25519-aes-sha2",
                        "m.megolm.v1.aes-sha2"
                    ],
                    "device_id": "JLAFKJWSCS",
                    "keys": {
                        "curve25519:JLAFKJWSCS": "3C5BFWi2Y8MaVvjM8M22DBmh24PmgR0nPvJOIArzgyI",
                        "ed25519:JLAFKJWSCS": "lEuiRJBit0IG6nUf5pUzWTUEsRVVe/HJkoKuEww9ULI"
                    },
                    "signatures": {
                        "@alice:example.org": {
                            "ed25519:JLAFKJWSCS": "dSO80A01XiigH3uBiDVx/EjzaoycHcjq9lfQX0uWsqxl2giMIiSPR8a4d291W1ihKJL/a+myXS367WT6NAIcBA"
                        }
                    },
                    "unsigned": {
                        "device_display_name": "Alice's mobile phone"
                    },
                    "user_id": "@alice:example.org"
                }
            }
        },
        "failures": {}
    })
});

/// `POST /_matrix/client/v3/keys/upload`
pub static KEYS_UPLOAD: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "one_time_key_counts": {
        "curve25519": 10,
        "signed_curve25519": 20
      }
    })
});

/// A rate limited response, asking the client to wait for 2 seconds.
pub static LIMIT_EXCEEDED: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "errcode": "M_LIMIT_EXCEEDED",
        "error": "Too many requests",
        "retry_after_ms": 2000
    })
});

/// `POST /_matrix/client/v3/login`
pub static LOGIN: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "access_token": "abc123",
      "device_id": "GHTYAJCE",
      "home_server": "matrix.org",
      "user_id": "@cheeky_monkey:matrix.org"
    })
});

/// `POST /_matrix/client/v3/login` with wrong credentials.
pub static LOGIN_RESPONSE_ERR: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "errcode": "M_FORBIDDEN",
      "error": "Invalid password"
    })
});

pub static NOT_FOUND: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "errcode": "M_NOT_FOUND",
      "error": "No resource was found for this request."
    })
});

pub static SERVER_ERROR: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "errcode": "M_UNKNOWN",
      "error": "Internal server error"
    })
});

/// The access token was revoked.
pub static UNKNOWN_TOKEN: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "errcode": "M_UNKNOWN_TOKEN",
      "error": "Invalid macaroon passed.",
      "soft_logout": false
    })
});
