//! Proptest strategies for cache keys, tags and values

use proptest::prelude::*;

/// Keys as applications write them: segments joined by `:`
pub fn cache_key_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_]{1,8}", 1..4)
        .prop_filter("reserved namespace", |segments| {
            segments.len() == 1 || !matches!(segments[0].as_str(), "lock" | "tag_version" | "tagged")
        })
        .prop_map(|segments| segments.join(":"))
}

pub fn tag_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,11}"
}

/// Small tag sets, possibly with duplicates
pub fn tag_set_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(tag_name_strategy(), 1..4)
}

pub fn json_value_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[ -~]{0,16}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
        ]
    })
}
