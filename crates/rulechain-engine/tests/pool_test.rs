//! Chain pool management and cross-chain routing.

mod common;

use std::sync::Arc;

use common::{Harness, chain, msg};
use rulechain_config::DefinitionError;
use rulechain_engine::{EngineError, MsgOptions};
use rulechain_node::NodeError;
use serde_json::json;

fn sub_chain() -> Vec<u8> {
  chain(
    "sub01",
    json!([
      {
        "id": "s1",
        "type": "exprTransform",
        "configuration": { "metadata": { "visited": "sub01" } }
      }
    ]),
    json!([]),
  )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_get_remove() {
  let h = Harness::new();
  let def = chain("rule01", json!([{ "id": "s1", "type": "log" }]), json!([]));

  let engine = h.pool.create("", &def).unwrap();
  assert_eq!(engine.id(), "rule01");

  let explicit = h.pool.create("explicit", &def).unwrap();
  assert_eq!(explicit.id(), "explicit");
  let dsl: serde_json::Value = serde_json::from_str(&explicit.dsl()).unwrap();
  assert_eq!(dsl["ruleChain"]["id"], json!("explicit"));

  // An existing id returns the running engine untouched
  let again = h.pool.create("rule01", &sub_chain()).unwrap();
  assert!(Arc::ptr_eq(&engine, &again));

  assert_eq!(h.pool.ids(), vec!["explicit".to_string(), "rule01".to_string()]);
  assert!(h.pool.get("rule01").is_some());

  let removed = h.pool.remove("rule01").unwrap();
  assert!(!removed.initialized());
  assert!(h.pool.get("rule01").is_none());
  assert!(h.pool.remove("rule01").is_none());

  h.pool.stop();
  assert!(h.pool.ids().is_empty());
  assert!(!explicit.initialized());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generated_id_when_none_given() {
  let h = Harness::new();
  let engine = h
    .pool
    .create("", &chain("", json!([{ "id": "s1", "type": "log" }]), json!([])))
    .unwrap();
  assert!(!engine.id().is_empty());
  assert!(h.pool.get(engine.id()).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_definitions_are_rejected() {
  let h = Harness::new();
  assert!(matches!(
    h.pool.create("x", b""),
    Err(EngineError::Definition(DefinitionError::Empty))
  ));

  let dangling = chain(
    "x",
    json!([{ "id": "s1", "type": "log" }]),
    json!([{ "fromId": "s1", "toId": "s9", "type": "Success" }]),
  );
  assert!(matches!(
    h.pool.create("x", &dangling),
    Err(EngineError::Definition(DefinitionError::InvalidConnection { .. }))
  ));

  let unknown = chain("x", json!([{ "id": "s1", "type": "component:nope" }]), json!([]));
  let err = h.pool.create("x", &unknown).unwrap_err();
  assert_eq!(err.to_string(), "node 's1' has unknown type 'component:nope'");
  assert!(h.pool.get("x").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_component_prefix_resolves_registered_type() {
  let h = Harness::new();
  let def = chain("prefixed", json!([{ "id": "s1", "type": "component:log" }]), json!([]));
  let engine = h.pool.create("", &def).unwrap();

  let ends = engine.on_msg_and_wait(msg(json!({})), MsgOptions::new()).await.unwrap();
  assert_eq!(ends[0].relation, "Success");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chain_reference_continues_into_sub_chain() {
  let h = Harness::new();
  h.pool.create("", &sub_chain()).unwrap();
  let root = h
    .pool
    .create(
      "",
      &chain(
        "root",
        json!([{ "id": "s1", "type": "log" }]),
        json!([{ "fromId": "s1", "toId": "chain:sub01", "type": "Success" }]),
      ),
    )
    .unwrap();

  let ends = root.on_msg_and_wait(msg(json!({})), MsgOptions::new()).await.unwrap();

  assert_eq!(ends.len(), 1);
  assert_eq!(ends[0].node_id, "s1");
  assert_eq!(ends[0].msg.metadata.get("visited"), Some("sub01"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rule_chain_connections_route_to_sub_chain() {
  let h = Harness::new();
  h.pool.create("", &sub_chain()).unwrap();

  let def = json!({
    "ruleChain": { "id": "root" },
    "metadata": {
      "nodes": [{ "id": "s1", "type": "log" }],
      "ruleChainConnections": [{ "fromId": "s1", "toId": "sub01", "type": "Success" }]
    }
  });
  let root = h.pool.create("", &serde_json::to_vec(&def).unwrap()).unwrap();

  let ends = root.on_msg_and_wait(msg(json!({})), MsgOptions::new()).await.unwrap();
  assert_eq!(ends[0].msg.metadata.get("visited"), Some("sub01"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_sub_chain_ends_with_failure() {
  let h = Harness::new();
  let root = h
    .pool
    .create(
      "",
      &chain(
        "root",
        json!([{ "id": "s1", "type": "log" }]),
        json!([{ "fromId": "s1", "toId": "chain:ghost", "type": "Success" }]),
      ),
    )
    .unwrap();

  let ends = root.on_msg_and_wait(msg(json!({})), MsgOptions::new()).await.unwrap();
  assert_eq!(ends[0].relation, "Failure");
  assert_eq!(
    ends[0].error,
    Some(NodeError::ChainNotFound {
      chain_id: "ghost".to_string()
    })
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flow_node_returns_to_parent_chain() {
  let h = Harness::new();
  h.pool.create("", &sub_chain()).unwrap();
  let root = h
    .pool
    .create(
      "",
      &chain(
        "root",
        json!([
          { "id": "s1", "type": "flow", "configuration": { "targetId": "sub01" } },
          { "id": "s2", "type": "test/value" }
        ]),
        json!([{ "fromId": "s1", "toId": "s2", "type": "Success" }]),
      ),
    )
    .unwrap();

  let ends = root
    .on_msg_and_wait(
      msg(json!({})),
      MsgOptions::new().with_value("tenant", json!("acme")),
    )
    .await
    .unwrap();

  // Sub-chain ends are consumed by the flow node
  assert_eq!(ends.len(), 1);
  assert_eq!(ends[0].node_id, "s2");
  assert_eq!(ends[0].msg.metadata.get("visited"), Some("sub01"));
  assert_eq!(ends[0].msg.metadata.get("tenant"), Some("acme"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flow_node_missing_target() {
  let h = Harness::new();
  let root = h
    .pool
    .create(
      "",
      &chain(
        "root",
        json!([{ "id": "s1", "type": "flow", "configuration": { "targetId": "ghost" } }]),
        json!([]),
      ),
    )
    .unwrap();

  let ends = root.on_msg_and_wait(msg(json!({})), MsgOptions::new()).await.unwrap();
  assert_eq!(ends[0].relation, "Failure");
  assert_eq!(
    ends[0].error,
    Some(NodeError::ChainNotFound {
      chain_id: "ghost".to_string()
    })
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_node_dsl_across_chains() {
  let h = Harness::new();
  h.pool.create("", &sub_chain()).unwrap();
  let root = h
    .pool
    .create("", &chain("root", json!([{ "id": "s1", "type": "log" }]), json!([])))
    .unwrap();

  let own: serde_json::Value = serde_json::from_str(&root.node_dsl("", "s1").unwrap()).unwrap();
  assert_eq!(own["type"], json!("log"));

  let other: serde_json::Value =
    serde_json::from_str(&root.node_dsl("sub01", "s1").unwrap()).unwrap();
  assert_eq!(other["type"], json!("exprTransform"));

  assert!(root.node_dsl("sub01", "s9").is_none());
  assert!(root.node_dsl("ghost", "s1").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_dir() {
  let h = Harness::new();
  let dir = tempfile::tempdir().unwrap();

  std::fs::write(dir.path().join("b_sub.json"), sub_chain()).unwrap();
  let anonymous = chain("", json!([{ "id": "s1", "type": "log" }]), json!([]));
  std::fs::write(dir.path().join("a_anonymous.json"), anonymous).unwrap();
  std::fs::write(dir.path().join("notes.txt"), "not a chain").unwrap();

  let loaded = h.pool.load_dir(dir.path()).await.unwrap();

  let ids: Vec<&str> = loaded.iter().map(|e| e.id()).collect();
  assert_eq!(ids, vec!["a_anonymous", "sub01"]);
  assert_eq!(h.pool.ids(), vec!["a_anonymous".to_string(), "sub01".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_dir_errors() {
  let h = Harness::new();
  let dir = tempfile::tempdir().unwrap();

  let missing = h.pool.load_dir(&dir.path().join("missing")).await;
  assert!(matches!(missing, Err(EngineError::Io { .. })));

  std::fs::write(dir.path().join("broken.json"), "{").unwrap();
  let broken = h.pool.load_dir(dir.path()).await;
  assert!(matches!(broken, Err(EngineError::Definition(_))));
}
