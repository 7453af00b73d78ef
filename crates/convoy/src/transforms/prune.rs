//! ✂️ PruneAgentMessages — strips the heavy, redundant bits out of agent message trees.
//!
//! Two kinds of message node exist, and only two:
//! - **user** messages: the body carries a `userMessage` key. We drop `debugInfo`. Done.
//! - **system** messages: the node's `type` is `"system"`. We drop the duplicated
//!   top-level `systemMessage`, the `debugInfo.request` echo, and then walk
//!   `debugInfo → response → data → systemMessage` to drop signatures and the
//!   bulk `result` / `datasources` / `formattedData` / `schema` payloads.
//!
//! Anything else passes through untouched. Every step is a chained optional lookup:
//! if a segment is missing or isn't an object, we stop. No errors. No drama. ✅
//!
//! Running it twice is the same as running it once. Removing an absent key is a no-op.

use serde_json::{Map, Value};

use super::RecordTransform;
use crate::common::Conversation;

/// ✂️ The marker type. Zero bytes. All opinions.
pub struct PruneAgentMessages;

impl RecordTransform for PruneAgentMessages {
    fn transform(conversation: &mut Conversation) {
        if let Value::Array(messages) = &mut conversation.messages {
            prune_messages(messages);
        }
    }
}

/// ✂️ Prune every message node in place.
pub fn prune_messages(messages: &mut [Value]) {
    for node in messages.iter_mut() {
        prune_node(node);
    }
}

fn prune_node(node: &mut Value) {
    let Some(node) = node.as_object_mut() else {
        return;
    };
    // -- the discriminator lives on the node, the payload lives in "message"
    let is_system = node.get("type").and_then(Value::as_str) == Some("system");
    let Some(body) = node.get_mut("message").and_then(Value::as_object_mut) else {
        return;
    };

    if body.contains_key("userMessage") {
        body.remove("debugInfo");
        return;
    }

    if is_system {
        prune_system_body(body);
    }
}

fn prune_system_body(body: &mut Map<String, Value>) {
    // 🗑️ the top-level copy duplicates what debugInfo.response already carries
    body.remove("systemMessage");

    let Some(debug_info) = body.get_mut("debugInfo").and_then(Value::as_object_mut) else {
        return;
    };
    debug_info.remove("request");

    let Some(system_message) = debug_info
        .get_mut("response")
        .and_then(Value::as_object_mut)
        .and_then(|response| response.get_mut("data"))
        .and_then(Value::as_object_mut)
        .and_then(|data| data.get_mut("systemMessage"))
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    if let Some(text) = object_at(system_message, "text") {
        text.remove("thoughtSignature");
    }
    system_message.remove("thoughtSignature");

    if let Some(schema) = object_at(system_message, "schema") {
        schema.remove("result");
        schema.remove("datasources");
    }

    if let Some(data) = object_at(system_message, "data") {
        data.remove("result");
        data.remove("formattedData");
        // -- schemas hide inside query.datasources[*] too. sneaky.
        if let Some(datasources) = object_at(data, "query")
            .and_then(|query| query.get_mut("datasources"))
            .and_then(Value::as_array_mut)
        {
            for datasource in datasources.iter_mut().filter_map(Value::as_object_mut) {
                datasource.remove("schema");
            }
        }
    }

    if let Some(chart) = object_at(system_message, "chart") {
        chart.remove("result");
    }
}

fn object_at<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    map.get_mut(key).and_then(Value::as_object_mut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn system_message_fixture() -> Value {
        json!({
            "type": "system",
            "message": {
                "systemMessage": {"text": {"parts": ["dup"]}},
                "debugInfo": {
                    "request": {"prompt": "a very long prompt"},
                    "response": {
                        "data": {
                            "systemMessage": {
                                "thoughtSignature": "sig-outer",
                                "text": {"parts": ["hello"], "thoughtSignature": "sig-inner"},
                                "schema": {"kind": "schema", "result": {"fields": [1, 2, 3]}, "datasources": [{"name": "ds"}]},
                                "data": {
                                    "kind": "data",
                                    "result": {"rows": [[1]]},
                                    "formattedData": "| 1 |",
                                    "query": {
                                        "question": "how many?",
                                        "datasources": [
                                            {"name": "orders", "schema": {"fields": ["id"]}},
                                            {"name": "users", "schema": {"fields": ["email"]}},
                                            "not-an-object"
                                        ]
                                    }
                                },
                                "chart": {"kind": "bar", "result": {"vega": {}}}
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn the_one_where_user_messages_lose_their_debug_info_and_nothing_else() {
        let mut messages = vec![json!({
            "type": "user",
            "id": "m1",
            "message": {
                "userMessage": {"text": "show me revenue"},
                "debugInfo": {"trace": "x".repeat(64)},
                "createdAt": "2026-10-19T09:00:00Z"
            }
        })];
        prune_messages(&mut messages);
        assert_eq!(
            messages[0],
            json!({
                "type": "user",
                "id": "m1",
                "message": {
                    "userMessage": {"text": "show me revenue"},
                    "createdAt": "2026-10-19T09:00:00Z"
                }
            })
        );
    }

    #[test]
    fn the_one_where_system_messages_go_on_the_full_diet() {
        let mut messages = vec![system_message_fixture()];
        prune_messages(&mut messages);

        let body = &messages[0]["message"];
        assert!(body.get("systemMessage").is_none());
        assert!(body["debugInfo"].get("request").is_none());

        let system_message = &body["debugInfo"]["response"]["data"]["systemMessage"];
        assert!(system_message.get("thoughtSignature").is_none());
        assert_eq!(system_message["text"], json!({"parts": ["hello"]}));
        assert_eq!(system_message["schema"], json!({"kind": "schema"}));
        assert_eq!(system_message["chart"], json!({"kind": "bar"}));

        let data = &system_message["data"];
        assert_eq!(data["kind"], "data");
        assert!(data.get("result").is_none());
        assert!(data.get("formattedData").is_none());
        assert_eq!(data["query"]["question"], "how many?");
        assert_eq!(
            data["query"]["datasources"],
            json!([{"name": "orders"}, {"name": "users"}, "not-an-object"])
        );
    }

    #[test]
    fn the_one_where_schema_result_and_datasources_vanish_but_kind_survives() {
        let mut messages = vec![json!({
            "type": "system",
            "message": {"debugInfo": {"response": {"data": {"systemMessage": {
                "schema": {"kind": "schema", "result": [1], "datasources": [2]}
            }}}}}
        })];
        prune_messages(&mut messages);
        assert_eq!(
            messages[0]["message"]["debugInfo"]["response"]["data"]["systemMessage"]["schema"],
            json!({"kind": "schema"})
        );
    }

    #[test]
    fn the_one_where_pruning_twice_changes_nothing_the_second_time() {
        let mut once = vec![system_message_fixture(), json!({
            "message": {"userMessage": {}, "debugInfo": {}}
        })];
        prune_messages(&mut once);
        let mut twice = once.clone();
        prune_messages(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn the_one_where_broken_paths_stop_quietly() {
        // -- 🧪 each of these stops somewhere along debugInfo → response → data → systemMessage
        let mut messages = vec![
            json!({"type": "system", "message": {"systemMessage": {}, "debugInfo": "not an object"}}),
            json!({"type": "system", "message": {"debugInfo": {"request": {}, "response": []}}}),
            json!({"type": "system", "message": {"debugInfo": {"response": {"data": {"systemMessage": 42}}}}}),
            json!({"type": "system", "message": {}}),
        ];
        prune_messages(&mut messages);
        assert_eq!(
            messages,
            vec![
                json!({"type": "system", "message": {"debugInfo": "not an object"}}),
                json!({"type": "system", "message": {"debugInfo": {"response": []}}}),
                json!({"type": "system", "message": {"debugInfo": {"response": {"data": {"systemMessage": 42}}}}}),
                json!({"type": "system", "message": {}}),
            ]
        );
    }

    #[test]
    fn the_one_where_strangers_pass_through_untouched() {
        let original = vec![
            json!("just a string"),
            json!(null),
            json!({"type": "system"}),
            json!({"type": "system", "message": "not an object"}),
            json!({"type": "tool", "message": {"debugInfo": {"request": {}}, "systemMessage": {}}}),
        ];
        let mut messages = original.clone();
        prune_messages(&mut messages);
        assert_eq!(messages, original);
    }

    #[test]
    fn the_one_where_a_user_marker_wins_over_a_system_type() {
        let mut messages = vec![json!({
            "type": "system",
            "message": {"userMessage": {"text": "hi"}, "systemMessage": {"keep": true}, "debugInfo": {}}
        })];
        prune_messages(&mut messages);
        assert_eq!(
            messages[0]["message"],
            json!({"userMessage": {"text": "hi"}, "systemMessage": {"keep": true}})
        );
    }
}
