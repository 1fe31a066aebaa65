use once_cell::sync::Lazy;
use ruma::{user_id, UserId};
use serde_json::Value as JsonValue;

mod mock_homeserver;
pub mod test_json;

pub use self::mock_homeserver::MockHomeserver;

pub static ALICE: Lazy<&UserId> = Lazy::new(|| user_id!("@alice:server.name"));
pub static BOB: Lazy<&UserId> = Lazy::new(|| user_id!("@bob:other.server"));
pub static CAROL: Lazy<&UserId> = Lazy::new(|| user_id!("@carol:other.server"));

/// The serialized body of a canned JSON response.
pub fn response_body(json: &JsonValue) -> Vec<u8> {
    json.to_string().into_bytes()
}

/// Install a tracing subscriber for every test binary that links this crate.
///
/// The filter is read from `RUST_LOG`, and the output goes through the test
/// harness so it is only shown for failing tests.
#[ctor::ctor]
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
