// Provider payload builder
//
// Builds the outgoing wire payload for one provider call: aggregates
// leading system messages, delegates translation to the compat, merges
// streaming flags, and applies manifest-driven payload extensions.
//
// Provider extras partition three ways: keys claimed by manifest
// `payloadExtensions` are projected into the payload (manifest-consumed),
// the rest is offered to the compat (compat-consumed), and whatever
// neither accepted comes back as `unconsumed_extras`. Every unconsumed key
// was present in the input extras.

use serde_json::{Map, Value};

use crate::compat::{Compat, CompatRequest};
use crate::error::Result;
use crate::message::{Message, Role};
use crate::provider::ProviderManifest;
use crate::settings::deep_merge;

/// Builder output
#[derive(Debug)]
pub struct BuiltPayload {
    pub payload: Value,
    /// Extras neither the manifest extensions nor the compat consumed
    pub unconsumed_extras: Map<String, Value>,
}

/// Join the leading run of system messages into one system text; returns
/// the joined text and the remaining conversation.
pub fn aggregate_system(messages: &[Message]) -> (Option<String>, &[Message]) {
    let split = messages
        .iter()
        .position(|m| m.role != Role::System)
        .unwrap_or(messages.len());
    if split == 0 {
        return (None, messages);
    }
    let joined = messages[..split]
        .iter()
        .map(Message::joined_text)
        .collect::<Vec<_>>()
        .join("\n\n");
    (Some(joined), &messages[split..])
}

/// Set a dotted path inside a JSON object, creating intermediate objects.
/// Returns false (leaving the payload untouched) when a non-object value
/// blocks the path.
fn set_dotted_path(payload: &mut Value, path: &str, value: Value) -> bool {
    let mut current = payload;
    let segments: Vec<&str> = path.split('.').collect();

    for (i, segment) in segments.iter().enumerate() {
        let Some(obj) = current.as_object_mut() else {
            return false;
        };
        if i == segments.len() - 1 {
            obj.insert(segment.to_string(), value);
            return true;
        }
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Build the full provider payload for one call.
pub fn build_provider_payload(
    manifest: &ProviderManifest,
    compat: &dyn Compat,
    request: &CompatRequest<'_>,
    extras: Map<String, Value>,
) -> Result<BuiltPayload> {
    // System aggregation: leading system messages fold into one block,
    // joined onto any system text the caller already supplied
    let (aggregated, rest) = aggregate_system(request.messages);
    let system = match (request.system, aggregated.as_deref()) {
        (Some(outer), Some(inner)) => Some(format!("{outer}\n\n{inner}")),
        (Some(outer), None) => Some(outer.to_string()),
        (None, Some(inner)) => Some(inner.to_string()),
        (None, None) => None,
    };

    let inner_request = CompatRequest {
        system: system.as_deref(),
        messages: rest,
        ..*request
    };

    let mut payload = compat.build_payload(&inner_request)?;

    if request.streaming {
        deep_merge(&mut payload, &compat.streaming_flags());
    }

    // Partition extras by the manifest's extension keys
    let extension_keys = manifest.extension_setting_keys();
    let mut manifest_consumed = Map::new();
    let mut compat_consumed = Map::new();
    for (key, value) in extras {
        if extension_keys.contains(&key.as_str()) {
            manifest_consumed.insert(key, value);
        } else {
            compat_consumed.insert(key, value);
        }
    }

    // Project manifest extensions; guarded or blocked values come back as
    // leftovers
    let mut leftover = Map::new();
    for extension in &manifest.payload_extensions {
        let Some(value) = manifest_consumed.remove(&extension.setting) else {
            continue;
        };
        if let Some(expected) = extension.value_type {
            if !expected.accepts(&value) {
                leftover.insert(extension.setting.clone(), value);
                continue;
            }
        }
        if !set_dotted_path(&mut payload, &extension.target, value.clone()) {
            leftover.insert(extension.setting.clone(), value);
        }
    }
    // Keys claimed by no extension (duplicate settings in the manifest list
    // already consumed them) fall through as leftovers too
    leftover.extend(manifest_consumed);

    let compat_leftover = compat.apply_provider_extensions(&mut payload, compat_consumed);
    leftover.extend(compat_leftover);

    Ok(BuiltPayload {
        payload,
        unconsumed_extras: leftover,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat;
    use crate::message::ToolChoice;
    use crate::settings::ProviderSettings;
    use serde_json::json;

    fn manifest(extensions: Value) -> ProviderManifest {
        serde_json::from_value(json!({
            "id": "custom",
            "compat": "openai-chat",
            "endpoint": {"urlTemplate": "https://x/{model}"},
            "payloadExtensions": extensions
        }))
        .unwrap()
    }

    fn request(messages: &[Message], streaming: bool) -> CompatRequest<'_> {
        // Settings and tool choice are fixed for these tests
        static SETTINGS: std::sync::OnceLock<ProviderSettings> = std::sync::OnceLock::new();
        static CHOICE: ToolChoice = ToolChoice::Auto;
        CompatRequest {
            model: "gpt-test",
            system: None,
            messages,
            settings: SETTINGS.get_or_init(ProviderSettings::default),
            tools: &[],
            tool_choice: &CHOICE,
            streaming,
        }
    }

    #[test]
    fn aggregates_contiguous_leading_system_messages() {
        let messages = vec![
            Message::system("Rule one."),
            Message::system("Rule two."),
            Message::user("hi"),
        ];
        let (system, rest) = aggregate_system(&messages);
        assert_eq!(system.as_deref(), Some("Rule one.\n\nRule two."));
        assert_eq!(rest.len(), 1);

        let compat = compat::builtin("openai-chat").unwrap();
        let built = build_provider_payload(
            &manifest(json!([])),
            compat.as_ref(),
            &request(&messages, false),
            Map::new(),
        )
        .unwrap();
        let wire_messages = built.payload["messages"].as_array().unwrap();
        assert_eq!(wire_messages.len(), 2);
        assert_eq!(wire_messages[0]["role"], "system");
        assert_eq!(wire_messages[0]["content"], "Rule one.\n\nRule two.");
    }

    #[test]
    fn streaming_merges_compat_flags() {
        let messages = vec![Message::user("hi")];
        let compat = compat::builtin("openai-chat").unwrap();
        let built = build_provider_payload(
            &manifest(json!([])),
            compat.as_ref(),
            &request(&messages, true),
            Map::new(),
        )
        .unwrap();
        assert_eq!(built.payload["stream"], json!(true));
        assert_eq!(built.payload["stream_options"]["include_usage"], json!(true));
    }

    #[test]
    fn extension_projects_value_into_dotted_path() {
        let messages = vec![Message::user("hi")];
        let compat = compat::builtin("openai-chat").unwrap();
        let mut extras = Map::new();
        extras.insert("topK".to_string(), json!(40));
        extras.insert("unknownKnob".to_string(), json!("x"));

        let built = build_provider_payload(
            &manifest(json!([
                {"setting": "topK", "target": "generationConfig.topK", "valueType": "scalar"}
            ])),
            compat.as_ref(),
            &request(&messages, false),
            extras,
        )
        .unwrap();

        assert_eq!(built.payload["generationConfig"]["topK"], json!(40));
        // Unknown keys survive as unconsumed
        assert_eq!(built.unconsumed_extras.len(), 1);
        assert!(built.unconsumed_extras.contains_key("unknownKnob"));
    }

    #[test]
    fn value_type_mismatch_returns_value_as_leftover() {
        let messages = vec![Message::user("hi")];
        let compat = compat::builtin("openai-chat").unwrap();
        let mut extras = Map::new();
        extras.insert("topK".to_string(), json!([1, 2]));

        let built = build_provider_payload(
            &manifest(json!([
                {"setting": "topK", "target": "generationConfig.topK", "valueType": "scalar"}
            ])),
            compat.as_ref(),
            &request(&messages, false),
            extras,
        )
        .unwrap();

        assert!(built.payload.get("generationConfig").is_none());
        assert_eq!(built.unconsumed_extras["topK"], json!([1, 2]));
    }

    #[test]
    fn unconsumed_keys_all_existed_in_input() {
        let messages = vec![Message::user("hi")];
        let compat = compat::builtin("openai-chat").unwrap();
        let mut extras = Map::new();
        extras.insert("a".to_string(), json!(1));
        extras.insert("b".to_string(), json!(2));
        let input_keys: Vec<String> = extras.keys().cloned().collect();

        let built = build_provider_payload(
            &manifest(json!([{"setting": "a", "target": "vendor.a"}])),
            compat.as_ref(),
            &request(&messages, false),
            extras,
        )
        .unwrap();

        for key in built.unconsumed_extras.keys() {
            assert!(input_keys.contains(key));
        }
        assert!(!built.unconsumed_extras.contains_key("a"));
    }
}
