//! Unit tests for capability negotiation and the handshake helpers.

use serde_json::json;

use acp_link::acp::handshake::{agent_capabilities, initialize_params, negotiate, version_compatible};
use acp_link::models::capabilities::{AgentCapabilities, Capability, CapabilitySet};
use acp_link::models::messages::PROTOCOL_VERSION;
use acp_link::AppError;

// ── Negotiation ─────────────────────────────────────────────────────────────

/// Each flag is effective only when both sides advertise it.
#[test]
fn effective_flags_are_the_intersection() {
    let local = CapabilitySet {
        text_files: true,
        terminal: true,
        image: true,
        ..CapabilitySet::default()
    };
    let remote = CapabilitySet {
        text_files: true,
        terminal: false,
        audio: true,
        ..CapabilitySet::default()
    };

    let effective = negotiate(&local, &remote);

    assert!(effective.allows(Capability::TextFiles));
    assert!(!effective.allows(Capability::Terminal));
    assert!(!effective.allows(Capability::Image));
    assert!(!effective.allows(Capability::Audio));
    assert_eq!(negotiate(&remote, &local), effective, "negotiation is symmetric for flags");
}

/// Experimental keys survive only when both sides name them.
#[test]
fn experimental_keys_intersect_keeping_local_value() {
    let mut local = CapabilitySet::default();
    local.experimental.insert("diffs".into(), json!({"v": 2}));
    local.experimental.insert("local_only".into(), json!(true));
    let mut remote = CapabilitySet::default();
    remote.experimental.insert("diffs".into(), json!({"v": 1}));
    remote.experimental.insert("remote_only".into(), json!(true));

    let effective = negotiate(&local, &remote);
    let experimental = &effective.as_set().experimental;

    assert_eq!(experimental.len(), 1);
    assert_eq!(experimental.get("diffs"), Some(&json!({"v": 2})));
}

/// The gate names the missing capability.
#[test]
fn gate_refuses_unnegotiated_methods() {
    let effective = negotiate(&CapabilitySet::all(), &CapabilitySet {
        text_files: true,
        ..CapabilitySet::default()
    });

    effective.check("fs/write_text_file").expect("fs negotiated");
    effective.check("session/prompt").expect("ungated");
    match effective.check("terminal/output") {
        Err(AppError::CapabilityNotSupported(msg)) => assert!(msg.contains("terminal"), "{msg}"),
        other => panic!("expected CapabilityNotSupported, got {other:?}"),
    }
}

// ── Handshake helpers ───────────────────────────────────────────────────────

/// Versions are compatible when the major component matches.
#[test]
fn version_compatibility_uses_major_component() {
    let major = PROTOCOL_VERSION.split('.').next().expect("major");

    assert!(version_compatible(PROTOCOL_VERSION));
    assert!(version_compatible(&format!("{major}.99")));
    assert!(!version_compatible("1999.1"));
    assert!(!version_compatible(""));
}

/// Client parameters carry this crate's identity and protocol version.
#[test]
fn initialize_params_identify_the_client() {
    let params = initialize_params(CapabilitySet::all(), Some("/work".into()));

    assert_eq!(params.protocol_version, PROTOCOL_VERSION);
    assert_eq!(params.client_info.name, "acp-link");
    assert_eq!(params.working_directory.as_deref(), Some("/work"));
    assert!(params.mcp_servers.is_empty());
}

/// Agent capabilities flatten the negotiable flags next to the descriptors.
#[test]
fn agent_capabilities_flatten_on_the_wire() {
    let caps = AgentCapabilities {
        streaming: true,
        supported_modes: vec!["ask".into()],
        ..agent_capabilities(CapabilitySet {
            terminal: true,
            ..CapabilitySet::default()
        })
    };

    let value = serde_json::to_value(&caps).expect("serialize");
    assert_eq!(value["terminal"], json!(true));
    assert_eq!(value["text_files"], json!(false));
    assert_eq!(value["streaming"], json!(true));
    assert_eq!(value["supported_modes"], json!(["ask"]));

    let back: AgentCapabilities = serde_json::from_value(value).expect("deserialize");
    assert_eq!(back, caps);
}

/// Missing capability fields default to `false`.
#[test]
fn missing_flags_default_to_false() {
    let set: CapabilitySet = serde_json::from_value(json!({"text_files": true})).expect("decode");
    assert!(set.text_files);
    assert!(!set.terminal);
    assert!(set.experimental.is_empty());
}
