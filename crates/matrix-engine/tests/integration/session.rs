use assert_matches2::{assert_let, assert_matches};
use futures_util::future::join;
use matrix_engine::{Error, HttpError, Session};
use matrix_engine_test::MockHomeserver;
use ruma::{
    api::{
        client::{
            session::login::{self, v3::LoginInfo},
            uiaa::{MatrixUserIdentifier, UserIdentifier},
        },
        error::ErrorKind,
    },
    assign, device_id,
};

use crate::{logged_in_session, PASSWORD};

#[tokio::test]
async fn test_login_and_logout() {
    let server = MockHomeserver::start().await;
    let session = logged_in_session(&server, "alice").await;

    let identity = session.identity().unwrap();
    assert_eq!(identity.user_id, "@alice:localhost");
    assert!(identity.access_token.starts_with("syt_alice_"));
    assert!(session.logged_in());

    session.logout().await.unwrap();
    assert!(!session.logged_in());
    assert_eq!(session.identity(), None);

    // The server forgot the token as well.
    let stale = Session::builder().homeserver_url(server.uri()).build().unwrap();
    stale.restore_session(identity).unwrap();
    assert_let!(Err(error) = stale.sync_once(Default::default()).await);
    assert!(error.is_auth_error());

    // Logging out with a dead token still closes the session.
    stale.logout().await.unwrap();
    assert!(!stale.logged_in());
    assert_matches!(stale.sync_once(Default::default()).await, Err(Error::NotLoggedIn));
}

#[tokio::test]
async fn test_expired_token_is_an_auth_error() {
    let server = MockHomeserver::start().await;
    let session = logged_in_session(&server, "alice").await;
    let identity = session.identity().unwrap();

    let other = Session::builder().homeserver_url(server.uri()).build().unwrap();
    other.restore_session(identity).unwrap();
    other.logout().await.unwrap();

    assert_let!(Err(error) = session.sync_once(Default::default()).await);
    assert!(error.is_auth_error());
    assert_matches!(error.client_api_error_kind(), Some(ErrorKind::UnknownToken { .. }));
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let server = MockHomeserver::start().await;
    server.register_user("alice", PASSWORD);
    let session = Session::builder().homeserver_url(server.uri()).build().unwrap();

    assert_let!(Err(error) = session.login("alice", "hunter2").await);
    assert!(error.is_auth_error());
    assert_matches!(error.client_api_error_kind(), Some(ErrorKind::Forbidden { .. }));
    assert!(!session.logged_in());
}

#[tokio::test]
async fn test_login_twice() {
    let server = MockHomeserver::start().await;
    let session = logged_in_session(&server, "alice").await;

    assert_matches!(session.login("alice", PASSWORD).await, Err(Error::AlreadyLoggedIn));
}

#[tokio::test]
async fn test_login_with_a_chosen_device_id() {
    let server = MockHomeserver::start().await;
    server.register_user("alice", PASSWORD);
    let session = Session::builder().homeserver_url(server.uri()).build().unwrap();

    let identifier = UserIdentifier::Matrix(MatrixUserIdentifier::new("@alice:localhost".to_owned()));
    let password = login::v3::Password::new(identifier, PASSWORD.to_owned());
    let request = assign!(login::v3::Request::new(LoginInfo::Password(password)), {
        device_id: Some(device_id!("MYDEVICE").to_owned()),
        initial_device_display_name: Some("My laptop".to_owned()),
    });
    let identity = session.login_with(request).await.unwrap();

    assert_eq!(identity.device_id, "MYDEVICE");
    assert_eq!(session.key_manager().unwrap().device_id(), "MYDEVICE");
}

#[tokio::test]
async fn test_concurrent_logins_get_distinct_devices() {
    let server = MockHomeserver::start().await;

    let (alice, alice_again) =
        join(logged_in_session(&server, "alice"), logged_in_session(&server, "alice")).await;

    assert_eq!(alice.user_id(), alice_again.user_id());
    assert_ne!(alice.device_id(), alice_again.device_id());
    assert_ne!(alice.access_token(), alice_again.access_token());
}

#[tokio::test]
async fn test_unreachable_homeserver() {
    // Nothing listens on the discard port.
    let session = Session::builder().homeserver_url("http://127.0.0.1:9").build().unwrap();

    assert_let!(Err(Error::Http(error)) = session.login("alice", PASSWORD).await);
    assert_matches!(&error, HttpError::Reqwest(_));
    assert!(error.is_transient());
}
