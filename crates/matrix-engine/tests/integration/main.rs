use matrix_engine::{Identity, Session};
use matrix_engine_test::MockHomeserver;
use ruma::{device_id, user_id};
use wiremock::MockServer;

mod keys;
mod room;
mod session;
mod sync;

const PASSWORD: &str = "correct horse battery staple";

/// Register `localpart` on the server and log a fresh session in as them.
async fn logged_in_session(server: &MockHomeserver, localpart: &str) -> Session {
    server.register_user(localpart, PASSWORD);

    let session = Session::builder().homeserver_url(server.uri()).build().unwrap();
    session.login(localpart, PASSWORD).await.unwrap();

    session
}

fn test_identity() -> Identity {
    Identity::new(
        user_id!("@example:localhost").to_owned(),
        device_id!("DEVICEID").to_owned(),
        "1234".to_owned(),
    )
}

/// A session talking to a bare mock server, with a made up identity.
fn restored_session(server: &MockServer) -> Session {
    let session = Session::builder().homeserver_url(server.uri()).build().unwrap();
    session.restore_session(test_identity()).unwrap();

    session
}
