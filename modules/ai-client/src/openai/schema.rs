use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Types usable as OpenAI strict structured output.
///
/// Strict mode wants every object closed (`additionalProperties: false`),
/// every property listed in `required` (nullable ones included) and no
/// `$ref` indirection, so the generated schema is inlined and patched.
/// Numeric `format` hints and `default` values are dropped as well.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn openai_schema() -> Value {
        let settings = SchemaSettings::draft07().with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        });
        let schema = settings.into_generator().into_root_schema_for::<Self>();
        let mut value = serde_json::to_value(schema).unwrap_or_default();
        close_objects(&mut value);
        if let Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("title");
        }
        value
    }

    /// Name sent with the schema; OpenAI only accepts `[a-zA-Z0-9_-]`.
    fn schema_name_for_openai() -> String {
        <Self as JsonSchema>::schema_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_object = match map.get("type") {
                Some(Value::String(t)) => t == "object",
                Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
                _ => false,
            };
            if map.contains_key("type") {
                map.remove("format");
                map.remove("default");
            }
            if is_object {
                map.insert("additionalProperties".into(), Value::Bool(false));
                let keys = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect());
                if let Some(keys) = keys {
                    map.insert("required".into(), Value::Array(keys));
                }
            }
            map.values_mut().for_each(close_objects);
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}
