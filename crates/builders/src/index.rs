//! Request bodies for index templates and lifecycle policies.

use lograft_core::{IndexLifecycleSpec, IndexTemplateSpec};
use serde_json::{json, Map, Value as Json};

/// Legacy `_template` body.
pub fn index_template_body(spec: &IndexTemplateSpec) -> Json {
    let s = &spec.settings;
    let mut settings = Map::new();
    settings.insert("index.number_of_shards".into(), json!(s.shards));
    settings.insert("index.number_of_replicas".into(), json!(s.replicas));
    if let Some(name) = &s.lifecycle_name {
        settings.insert("index.lifecycle.name".into(), json!(name));
    }
    if let Some(alias) = &s.rollover_alias {
        settings.insert("index.lifecycle.rollover_alias".into(), json!(alias));
    }
    json!({ "index_patterns": spec.index_patterns, "settings": settings })
}

/// `_ilm/policy` body: a rollover-only hot phase followed by deletion.
pub fn lifecycle_policy_body(spec: &IndexLifecycleSpec) -> Json {
    json!({
        "policy": {
            "phases": {
                "hot": {
                    "actions": {
                        "rollover": { "max_size": spec.rollover.max_size, "max_age": spec.rollover.max_age }
                    }
                },
                "delete": {
                    "min_age": spec.delete.min_age,
                    "actions": { "delete": {} }
                }
            }
        }
    })
}
