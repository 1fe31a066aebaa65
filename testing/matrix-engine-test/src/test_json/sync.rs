//! Canned sync responses.

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

/// The room every canned sync response talks about.
pub const SYNC_ROOM_ID: &str = "!SVkFJHzfwvuaIEawgC:localhost";

/// `m.room.encryption` state event.
pub static ENCRYPTION: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "content": {
            "algorithm": "m.megolm.v1.aes-sha2",
            "rotation_period_ms": 604800000,
            "rotation_period_msgs": 100
        },
        "event_id": "$143273582443PhrSn:example.org",
        "origin_server_ts": 1432735824653u64,
        "sender": "@example:localhost",
        "state_key": "",
        "type": "m.room.encryption"
    })
});

/// `m.room.member` state event.
pub static MEMBER: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "content": {
            "avatar_url": null,
            "displayname": "example",
            "membership": "join"
        },
        "event_id": "$151800140517rfvjc:localhost",
        "origin_server_ts": 151800140,
        "sender": "@example:localhost",
        "state_key": "@example:localhost",
        "type": "m.room.member"
    })
});

/// `m.room.message` event.
pub static MESSAGE: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "content": {
            "body": "baba",
            "msgtype": "m.text"
        },
        "event_id": "$152037280074GZeOm:localhost",
        "origin_server_ts": 152037280,
        "sender": "@example:localhost",
        "type": "m.room.message"
    })
});

/// A sync response with a single joined room, device list changes and one-time
/// key counts.
pub static SYNC: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "device_one_time_keys_count": {
            "signed_curve25519": 3
        },
        "device_lists": {
            "changed": [
                "@bob:other.server"
            ],
            "left": [
                "@carol:other.server"
            ]
        },
        "next_batch": "s526_47314_0_7_1_1_1_11444_1",
        "rooms": {
            "invite": {},
            "join": {
                SYNC_ROOM_ID: {
                    "state": {
                        "events": []
                    },
                    "timeline": {
                        "events": [
                            MEMBER.clone(),
                            ENCRYPTION.clone(),
                            MESSAGE.clone(),
                            {
                                "content": {
                                    "topic": "😀"
                                },
                                "event_id": "$151957878228ssqrJ:localhost",
                                "origin_server_ts": 151957878,
                                "sender": "@example:localhost",
                                "state_key": "",
                                "type": "m.room.topic"
                            }
                        ],
                        "limited": true,
                        "prev_batch": "t392-516_47314_0_7_1_1_1_11444_1"
                    }
                }
            },
            "leave": {}
        }
    })
});

/// A sync response without any news.
pub static SYNC_EMPTY: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "next_batch": "s526_47315_0_7_1_1_1_11444_1"
    })
});
