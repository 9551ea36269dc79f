//! Unit tests for role profiles and dispatcher registration.

use std::sync::Arc;

use acp_link::acp::handler::{handler_fn, subscriber_fn, RequestContext};
use acp_link::acp::methods;
use acp_link::acp::Dispatcher;
use acp_link::mode::Role;
use acp_link::models::messages::SessionRef;
use acp_link::AppError;

// ── Role profiles ───────────────────────────────────────────────────────────

/// The two profiles are mirror images of each other.
#[test]
fn profiles_mirror_each_other() {
    let agent = Role::Agent.profile();
    let client = Role::Client.profile();

    assert_eq!(agent.serves_requests, client.issues_requests);
    assert_eq!(agent.issues_requests, client.serves_requests);
    assert_eq!(agent.serves_notifications, client.issues_notifications);
}

/// Each role serves only its side of the method table.
#[test]
fn roles_serve_their_own_methods() {
    let agent = Role::Agent.profile();
    assert!(agent.serves_request(methods::SESSION_PROMPT));
    assert!(agent.serves_notification(methods::SESSION_CANCEL));
    assert!(!agent.serves_request(methods::FS_READ_TEXT_FILE));
    assert!(agent.issues_notification(methods::SESSION_UPDATE));

    let client = Role::Client.profile();
    assert!(client.serves_request(methods::TERMINAL_CREATE));
    assert!(client.serves_notification(methods::SESSION_UPDATE));
    assert!(!client.serves_request(methods::INITIALIZE));
}

// ── Registration ────────────────────────────────────────────────────────────

fn noop_handler() -> Arc<dyn acp_link::acp::handler::MethodHandler> {
    handler_fn(|_ctx: RequestContext, _params: SessionRef| async { Ok::<(), AppError>(()) })
}

/// Registering a method the role does not serve is a configuration error.
#[test]
fn foreign_method_registration_fails() {
    let mut dispatcher = Dispatcher::new(Role::Client);

    let err = dispatcher
        .register(methods::SESSION_PROMPT, noop_handler())
        .expect_err("client does not serve prompts");
    assert!(matches!(err, AppError::Config(_)), "{err:?}");
    assert!(!format!("{dispatcher:?}").contains(methods::SESSION_PROMPT));
}

/// Registering a served method succeeds and is visible.
#[test]
fn served_method_registration_succeeds() {
    let mut dispatcher = Dispatcher::new(Role::Agent);
    dispatcher
        .register(methods::SESSION_CLOSE, noop_handler())
        .expect("agent serves session/close");

    assert!(format!("{dispatcher:?}").contains(methods::SESSION_CLOSE));
    assert_eq!(dispatcher.role(), Role::Agent);
}

/// Subscriptions are checked against the consumed notifications.
#[test]
fn subscriptions_are_role_checked() {
    let mut dispatcher = Dispatcher::new(Role::Agent);
    let subscriber = subscriber_fn(methods::SESSION_CANCEL, |_conn, _params: SessionRef| Ok(()));

    dispatcher
        .subscribe(methods::SESSION_CANCEL, Arc::clone(&subscriber))
        .expect("agent consumes session/cancel");
    assert!(matches!(
        dispatcher.subscribe(methods::SESSION_UPDATE, subscriber),
        Err(AppError::Config(_))
    ));
}

/// Every client callback requires a capability; agent methods do not.
#[test]
fn capability_gates_cover_callbacks() {
    for method in methods::CLIENT_CALLBACKS {
        assert!(methods::required_capability(method).is_some(), "{method}");
    }
    for method in methods::AGENT_METHODS {
        assert!(methods::required_capability(method).is_none(), "{method}");
    }
}
