mod common;

use assert_matches::assert_matches;
use common::{next_states, user, FakeAuth};
use mangrove_shared::capabilities::AuthResponse;
use mangrove_shared::model::{AuthToken, Password, Registration};
use mangrove_shared::{AuthEvent, AuthMachine, AuthState, Container};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn check_without_saved_session_is_unauthenticated() {
    let auth = Arc::new(FakeAuth::default());
    let container = Container::spawn(AuthMachine::new(auth.clone()));
    let mut rx = container.transitions();

    container.submit(AuthEvent::CheckRequested);

    let states = next_states(&mut rx, 2).await;
    assert_eq!(states, vec![AuthState::Loading, AuthState::Unauthenticated]);
    assert_eq!(auth.validate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn check_with_valid_session_restores_it() {
    let auth = Arc::new(FakeAuth::signed_in(user("u1"), "tok-1"));
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    container.submit(AuthEvent::CheckRequested);

    let states = next_states(&mut rx, 2).await;
    assert_matches!(&states[1], AuthState::Authenticated { user, token } => {
        assert_eq!(user.name, "Ana");
        assert_eq!(token.expose(), "tok-1");
    });
}

#[tokio::test]
async fn check_with_rejected_token_is_unauthenticated() {
    let auth = Arc::new(FakeAuth::signed_in(user("u1"), "expired"));
    auth.token_valid.store(false, Ordering::SeqCst);
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    container.submit(AuthEvent::CheckRequested);

    assert_eq!(next_states(&mut rx, 2).await[1], AuthState::Unauthenticated);
}

#[tokio::test]
async fn check_transport_fault_is_a_network_error() {
    let auth = Arc::new(FakeAuth::signed_in(user("u1"), "tok"));
    auth.transport_down.store(true, Ordering::SeqCst);
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    container.submit(AuthEvent::CheckRequested);

    assert_matches!(&next_states(&mut rx, 2).await[1], AuthState::Error(m) if m.starts_with("Network error: "));
}

#[tokio::test]
async fn refused_login_carries_the_service_message() {
    let auth = Arc::new(FakeAuth::default());
    *auth.login_response.lock().unwrap() = Some(AuthResponse::refused("bad creds"));
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    container.submit(AuthEvent::login("ana@example.org", "wrong"));

    let states = next_states(&mut rx, 2).await;
    assert_eq!(states, vec![AuthState::Loading, AuthState::Error("bad creds".into())]);
}

#[tokio::test]
async fn login_then_logout() {
    let auth = Arc::new(FakeAuth::default());
    *auth.login_response.lock().unwrap() = Some(AuthResponse::accepted(user("u1"), AuthToken::new("tok")));
    let container = Container::spawn(AuthMachine::new(auth.clone()));
    let mut rx = container.transitions();

    container.submit(AuthEvent::login("ana@example.org", "correct horse"));
    container.submit(AuthEvent::LogoutRequested);

    let states = next_states(&mut rx, 4).await;
    assert_matches!(states[1], AuthState::Authenticated { .. });
    assert_eq!(states[2], AuthState::Loading);
    assert_eq!(states[3], AuthState::Unauthenticated);
    assert!(auth.saved.lock().unwrap().is_none());
}

#[tokio::test]
async fn logout_fault_is_a_network_error() {
    let auth = Arc::new(FakeAuth::signed_in(user("u1"), "tok"));
    auth.logout_fault.store(true, Ordering::SeqCst);
    let container = Container::spawn(AuthMachine::new(auth.clone()));
    let mut rx = container.transitions();

    container.submit(AuthEvent::LogoutRequested);

    let states = next_states(&mut rx, 2).await;
    assert_eq!(
        states,
        vec![
            AuthState::Loading,
            AuthState::Error("Network error: storage error: keychain locked".into())
        ]
    );
    assert!(auth.saved.lock().unwrap().is_some());
}

#[tokio::test]
async fn register_authenticates_the_new_user() {
    let auth = Arc::new(FakeAuth::default());
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    let registration = Registration::new("Baraka", "baraka@example.org", Password::new("mangroves4ever"));
    container.submit(AuthEvent::RegisterRequested(Box::new(registration)));

    let states = next_states(&mut rx, 2).await;
    assert_eq!(states[1].user().map(|u| u.name.as_str()), Some("Baraka"));
}

#[tokio::test]
async fn user_update_is_ignored_when_signed_out() {
    let auth = Arc::new(FakeAuth::default());
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    container.submit(AuthEvent::CheckRequested);
    next_states(&mut rx, 2).await;

    let latest = container.subscribe();
    container.submit(AuthEvent::UserUpdated(Box::new(user("u2"))));
    container.shutdown().await;

    assert!(rx.try_recv().is_err());
    assert_eq!(*latest.borrow(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn user_update_keeps_the_token() {
    let auth = Arc::new(FakeAuth::signed_in(user("u1"), "tok-1"));
    let container = Container::spawn(AuthMachine::new(auth));
    let mut rx = container.transitions();

    container.submit(AuthEvent::CheckRequested);
    next_states(&mut rx, 2).await;

    let mut renamed = user("u1");
    renamed.name = "Ana M.".into();
    container.submit(AuthEvent::UserUpdated(Box::new(renamed)));

    assert_matches!(next_states(&mut rx, 1).await.remove(0), AuthState::Authenticated { user, token } => {
        assert_eq!(user.name, "Ana M.");
        assert_eq!(token.expose(), "tok-1");
    });
}
