//! JSON-Schema subset validator with defaults and semantic formats.
//!
//! Supported keywords: `type`, `enum`, `const`, `minimum`, `maximum`,
//! `minLength`, `maxLength`, `pattern`, `format`, `items`, `minItems`,
//! `maxItems`, `properties`, `required`, `additionalProperties`,
//! `minProperties`, `maxProperties`, `oneOf`, `anyOf`, `allOf`, `not`, `$ref`,
//! `default`.
//!
//! Every failure is collected with a pointer into the config and into the
//! schema; nothing short-circuits except a `type` mismatch on a node.

use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value};

use super::ValidationError;
use super::formats::{FormatChecker, builtin_formats};

/// Validator holding `$ref` targets and format checkers.
#[derive(Clone)]
pub struct Validator {
    refs: HashMap<String, Value>,
    formats: HashMap<String, FormatChecker>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut refs: Vec<_> = self.refs.keys().collect();
        refs.sort();
        let mut formats: Vec<_> = self.formats.keys().collect();
        formats.sort();
        f.debug_struct("Validator")
            .field("refs", &refs)
            .field("formats", &formats)
            .finish()
    }
}

struct Walk<'a> {
    path: Vec<String>,
    errors: &'a mut Vec<ValidationError>,
    set_defaults: bool,
}

impl Walk<'_> {
    fn pointer(&self) -> String {
        pointer(&self.path)
    }

    fn error(&mut self, message: String, value: &Value, validator: &str, validator_value: &Value, schema_path: &str) {
        self.errors.push(ValidationError {
            message,
            value: value.clone(),
            validator: validator.to_string(),
            validator_value: validator_value.clone(),
            json_pointer: self.pointer(),
            schema_pointer: schema_path.to_string(),
        });
    }
}

impl Validator {
    /// Validator with the builtin format checkers and no references.
    pub fn new() -> Self {
        Self {
            refs: HashMap::new(),
            formats: builtin_formats()
                .into_iter()
                .map(|(name, f)| (name.to_string(), f))
                .collect(),
        }
    }

    /// Register a schema under a reference such as `/schema/plugin/seen`.
    pub fn add_ref(&mut self, uri: impl Into<String>, schema: Value) {
        self.refs.insert(uri.into(), schema);
    }

    pub fn add_format(&mut self, name: impl Into<String>, checker: FormatChecker) {
        self.formats.insert(name.into(), checker);
    }

    pub fn resolve_ref(&self, uri: &str) -> Option<&Value> {
        self.refs.get(uri)
    }

    pub fn has_format(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }

    /// Validate `config` against `schema`. Returns the normalized config
    /// (with defaults filled in when `set_defaults`) and every error found.
    pub fn process_config(&self, config: &Value, schema: &Value, set_defaults: bool) -> (Value, Vec<ValidationError>) {
        let mut value = config.clone();
        let mut errors = Vec::new();
        let mut walk = Walk {
            path: Vec::new(),
            errors: &mut errors,
            set_defaults,
        };
        self.validate(&mut value, schema, "", &mut walk);
        (value, errors)
    }

    /// Whether `config` is valid, without keeping errors or defaults.
    pub fn is_valid(&self, config: &Value, schema: &Value) -> bool {
        self.process_config(config, schema, false).1.is_empty()
    }

    fn validate(&self, value: &mut Value, schema: &Value, schema_path: &str, walk: &mut Walk<'_>) {
        let rules = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                walk.error(
                    format!("{} is not allowed", short(value)),
                    value,
                    "false",
                    schema,
                    schema_path,
                );
                return;
            }
            Value::Object(rules) => rules,
            _ => return,
        };

        if let Some(Value::String(uri)) = rules.get("$ref") {
            match self.refs.get(uri) {
                Some(target) => self.validate(value, target, uri, walk),
                None => walk.error(
                    format!("unresolvable reference '{uri}'"),
                    value,
                    "$ref",
                    &Value::String(uri.clone()),
                    &format!("{schema_path}/$ref"),
                ),
            }
            return;
        }

        if let Some(expected) = rules.get("type") {
            if !type_matches(value, expected) {
                walk.error(
                    format!("{} is not of type {}", short(value), type_names(expected)),
                    value,
                    "type",
                    expected,
                    &format!("{schema_path}/type"),
                );
                return;
            }
        }

        if let Some(Value::Array(options)) = rules.get("enum") {
            if !options.contains(value) {
                walk.error(
                    format!("{} is not one of {}", short(value), Value::Array(options.clone())),
                    value,
                    "enum",
                    &Value::Array(options.clone()),
                    &format!("{schema_path}/enum"),
                );
            }
        }
        if let Some(expected) = rules.get("const") {
            if value != expected {
                walk.error(
                    format!("{} was expected", expected),
                    value,
                    "const",
                    expected,
                    &format!("{schema_path}/const"),
                );
            }
        }

        // Each check ignores values of other types.
        self.check_number(value, rules, schema_path, walk);
        self.check_string(value, rules, schema_path, walk);
        self.check_array(value, rules, schema_path, walk);
        self.check_object(value, rules, schema_path, walk);

        self.check_combinators(value, rules, schema_path, walk);
    }

    fn check_number(&self, value: &Value, rules: &Map<String, Value>, schema_path: &str, walk: &mut Walk<'_>) {
        let Some(n) = value.as_f64() else { return };
        if let Some(min) = rules.get("minimum").and_then(Value::as_f64) {
            if n < min {
                walk.error(
                    format!("{n} is less than the minimum of {min}"),
                    value,
                    "minimum",
                    &rules["minimum"],
                    &format!("{schema_path}/minimum"),
                );
            }
        }
        if let Some(max) = rules.get("maximum").and_then(Value::as_f64) {
            if n > max {
                walk.error(
                    format!("{n} is greater than the maximum of {max}"),
                    value,
                    "maximum",
                    &rules["maximum"],
                    &format!("{schema_path}/maximum"),
                );
            }
        }
    }

    fn check_string(&self, value: &Value, rules: &Map<String, Value>, schema_path: &str, walk: &mut Walk<'_>) {
        let Some(s) = value.as_str() else { return };
        let len = s.chars().count() as u64;
        if let Some(min) = rules.get("minLength").and_then(Value::as_u64) {
            if len < min {
                walk.error(
                    format!("{} is too short", short(value)),
                    value,
                    "minLength",
                    &rules["minLength"],
                    &format!("{schema_path}/minLength"),
                );
            }
        }
        if let Some(max) = rules.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                walk.error(
                    format!("{} is too long", short(value)),
                    value,
                    "maxLength",
                    &rules["maxLength"],
                    &format!("{schema_path}/maxLength"),
                );
            }
        }
        if let Some(Value::String(pattern)) = rules.get("pattern") {
            let matched = Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false);
            if !matched {
                walk.error(
                    format!("{} does not match '{pattern}'", short(value)),
                    value,
                    "pattern",
                    &rules["pattern"],
                    &format!("{schema_path}/pattern"),
                );
            }
        }
        if let Some(Value::String(format)) = rules.get("format") {
            if let Some(checker) = self.formats.get(format) {
                if let Err(reason) = checker(s) {
                    walk.error(
                        reason,
                        value,
                        "format",
                        &rules["format"],
                        &format!("{schema_path}/format"),
                    );
                }
            }
        }
    }

    fn check_array(&self, value: &mut Value, rules: &Map<String, Value>, schema_path: &str, walk: &mut Walk<'_>) {
        let Value::Array(items) = value else { return };
        let len = items.len() as u64;
        if let Some(min) = rules.get("minItems").and_then(Value::as_u64) {
            if len < min {
                let snapshot = Value::Array(items.clone());
                walk.error(
                    format!("{} is too short", short(&snapshot)),
                    &snapshot,
                    "minItems",
                    &rules["minItems"],
                    &format!("{schema_path}/minItems"),
                );
            }
        }
        if let Some(max) = rules.get("maxItems").and_then(Value::as_u64) {
            if len > max {
                let snapshot = Value::Array(items.clone());
                walk.error(
                    format!("{} is too long", short(&snapshot)),
                    &snapshot,
                    "maxItems",
                    &rules["maxItems"],
                    &format!("{schema_path}/maxItems"),
                );
            }
        }
        if let Some(item_schema) = rules.get("items") {
            let item_path = format!("{schema_path}/items");
            for (i, item) in items.iter_mut().enumerate() {
                walk.path.push(i.to_string());
                self.validate(item, item_schema, &item_path, walk);
                walk.path.pop();
            }
        }
    }

    fn check_object(&self, value: &mut Value, rules: &Map<String, Value>, schema_path: &str, walk: &mut Walk<'_>) {
        let Value::Object(map) = value else { return };
        let properties = rules.get("properties").and_then(Value::as_object);

        if walk.set_defaults {
            if let Some(properties) = properties {
                for (key, sub) in properties {
                    if map.contains_key(key) {
                        continue;
                    }
                    if let Some(default) = sub.get("default") {
                        map.insert(key.clone(), default.clone());
                    }
                }
            }
        }

        if let Some(Value::Array(required)) = rules.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    let snapshot = Value::Object(map.clone());
                    walk.error(
                        format!("'{key}' is a required property"),
                        &snapshot,
                        "required",
                        &rules["required"],
                        &format!("{schema_path}/required"),
                    );
                }
            }
        }

        let count = map.len() as u64;
        if let Some(min) = rules.get("minProperties").and_then(Value::as_u64) {
            if count < min {
                let snapshot = Value::Object(map.clone());
                walk.error(
                    format!("{} does not have enough properties", short(&snapshot)),
                    &snapshot,
                    "minProperties",
                    &rules["minProperties"],
                    &format!("{schema_path}/minProperties"),
                );
            }
        }
        if let Some(max) = rules.get("maxProperties").and_then(Value::as_u64) {
            if count > max {
                let snapshot = Value::Object(map.clone());
                walk.error(
                    format!("{} has too many properties", short(&snapshot)),
                    &snapshot,
                    "maxProperties",
                    &rules["maxProperties"],
                    &format!("{schema_path}/maxProperties"),
                );
            }
        }

        let additional = rules.get("additionalProperties");
        for (key, item) in map.iter_mut() {
            walk.path.push(key.clone());
            match properties.and_then(|p| p.get(key)) {
                Some(sub) => {
                    let sub_path = format!("{schema_path}/properties/{}", escape(key));
                    self.validate(item, sub, &sub_path, walk);
                }
                None => match additional {
                    Some(Value::Bool(false)) => {
                        walk.error(
                            format!("additional property '{key}' is not allowed"),
                            item,
                            "additionalProperties",
                            &Value::Bool(false),
                            &format!("{schema_path}/additionalProperties"),
                        );
                    }
                    Some(sub) => {
                        let sub_path = format!("{schema_path}/additionalProperties");
                        self.validate(item, sub, &sub_path, walk);
                    }
                    None => {}
                },
            }
            walk.path.pop();
        }
    }

    fn check_combinators(&self, value: &mut Value, rules: &Map<String, Value>, schema_path: &str, walk: &mut Walk<'_>) {
        if let Some(Value::Array(all)) = rules.get("allOf") {
            for (i, sub) in all.iter().enumerate() {
                self.validate(value, sub, &format!("{schema_path}/allOf/{i}"), walk);
            }
        }

        for keyword in ["anyOf", "oneOf"] {
            let Some(Value::Array(branches)) = rules.get(keyword) else {
                continue;
            };
            let branch_path = format!("{schema_path}/{keyword}");
            let mut matches: Vec<(usize, Value)> = Vec::new();
            let mut branch_errors: Vec<Vec<ValidationError>> = Vec::new();
            for (i, sub) in branches.iter().enumerate() {
                let mut candidate = value.clone();
                let mut errors = Vec::new();
                let mut inner = Walk {
                    path: walk.path.clone(),
                    errors: &mut errors,
                    set_defaults: walk.set_defaults,
                };
                self.validate(&mut candidate, sub, &format!("{branch_path}/{i}"), &mut inner);
                if errors.is_empty() {
                    matches.push((i, candidate));
                    if keyword == "anyOf" {
                        break;
                    }
                }
                branch_errors.push(errors);
            }

            match matches.len() {
                1 => {
                    if let Some((_, normalized)) = matches.pop() {
                        *value = normalized;
                    }
                }
                0 => {
                    // Report the errors of the one branch whose type fits, when
                    // exactly one does; that is the branch the user meant.
                    let fitting: Vec<usize> = branches
                        .iter()
                        .enumerate()
                        .filter(|(_, b)| b.get("type").is_some_and(|t| type_matches(value, t)))
                        .map(|(i, _)| i)
                        .collect();
                    if let [only] = fitting.as_slice() {
                        walk.errors.append(&mut branch_errors[*only]);
                    } else {
                        walk.error(
                            format!("{} is not valid under any of the given schemas", short(value)),
                            value,
                            keyword,
                            &rules[keyword],
                            &branch_path,
                        );
                    }
                }
                _ => {
                    if keyword == "oneOf" {
                        walk.error(
                            format!("{} is valid under more than one of the given schemas", short(value)),
                            value,
                            keyword,
                            &rules[keyword],
                            &branch_path,
                        );
                    } else if let Some((_, normalized)) = matches.into_iter().next() {
                        *value = normalized;
                    }
                }
            }
        }

        if let Some(not) = rules.get("not") {
            if self.is_valid(value, not) {
                walk.error(
                    format!("{} should not be valid under {}", short(value), not),
                    value,
                    "not",
                    not,
                    &format!("{schema_path}/not"),
                );
            }
        }
    }
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(value, name)),
        _ => true,
    }
}

fn single_type_matches(value: &Value, name: &str) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn type_names(expected: &Value) -> String {
    match expected {
        Value::String(s) => format!("'{s}'"),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn short(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 60 {
        let cut: String = text.chars().take(57).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// JSON pointer for a list of path segments; the root is `""`.
pub fn pointer(path: &[String]) -> String {
    path.iter().map(|s| format!("/{}", escape(s))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn regexp_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "accept": {"type": "array", "items": {"type": "string", "format": "regex"}},
                "from": {"type": "array", "items": {"type": "string"}, "default": ["title"]},
                "rest": {"type": "string", "enum": ["accept", "reject"]}
            },
            "required": ["accept"],
            "additionalProperties": false
        })
    }

    #[test]
    fn test_conformant_config_with_defaults() {
        let v = Validator::new();
        let (out, errors) = v.process_config(&json!({"accept": ["foo"]}), &regexp_schema(), true);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out["from"], json!(["title"]));
    }

    #[test]
    fn test_defaults_not_set_when_disabled() {
        let v = Validator::new();
        let (out, errors) = v.process_config(&json!({"accept": ["foo"]}), &regexp_schema(), false);
        assert!(errors.is_empty());
        assert!(out.get("from").is_none());
    }

    #[test]
    fn test_errors_are_collected_with_pointers() {
        let v = Validator::new();
        let config = json!({"accept": ["(bad", 3], "rest": "maybe", "colour": "red"});
        let (_, errors) = v.process_config(&config, &regexp_schema(), true);
        let pointers: Vec<&str> = errors.iter().map(|e| e.json_pointer.as_str()).collect();
        assert!(pointers.contains(&"/accept/0"), "{pointers:?}");
        assert!(pointers.contains(&"/accept/1"));
        assert!(pointers.contains(&"/rest"));
        assert!(pointers.contains(&"/colour"));
        let format_err = errors.iter().find(|e| e.validator == "format").unwrap();
        assert_eq!(format_err.schema_pointer, "/properties/accept/items/format");
        assert_eq!(format_err.value, json!("(bad"));
    }

    #[test]
    fn test_wrong_type_for_known_key() {
        let v = Validator::new();
        let (_, errors) = v.process_config(&json!({"accept": "foo"}), &regexp_schema(), false);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].json_pointer, "/accept");
        assert_eq!(errors[0].validator, "type");
    }

    #[test]
    fn test_required_reported_at_object() {
        let v = Validator::new();
        let (_, errors) = v.process_config(&json!({}), &regexp_schema(), false);
        assert_eq!(errors[0].validator, "required");
        assert_eq!(errors[0].json_pointer, "");
    }

    #[test]
    fn test_refs_and_one_of() {
        let mut v = Validator::new();
        v.add_ref(
            "/schema/plugin/quality",
            json!({"oneOf": [
                {"type": "string", "format": "quality"},
                {"type": "object", "properties": {"min": {"type": "string", "default": "any"}}}
            ]}),
        );
        let schema = json!({
            "type": "object",
            "properties": {"quality": {"$ref": "/schema/plugin/quality"}}
        });
        assert!(v.is_valid(&json!({"quality": "720p+"}), &schema));

        let (out, errors) = v.process_config(&json!({"quality": {}}), &schema, true);
        assert!(errors.is_empty());
        assert_eq!(out["quality"]["min"], json!("any"));

        let (_, errors) = v.process_config(&json!({"quality": "potato"}), &schema, false);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].validator, "format");
        assert_eq!(errors[0].json_pointer, "/quality");
        assert_eq!(errors[0].schema_pointer, "/schema/plugin/quality/oneOf/0/format");

        let (_, errors) = v.process_config(&json!({"quality": 5}), &schema, false);
        assert_eq!(errors[0].validator, "oneOf");
    }

    #[test]
    fn test_unresolved_ref() {
        let v = Validator::new();
        let (_, errors) = v.process_config(&json!(1), &json!({"$ref": "/schema/nope"}), false);
        assert_eq!(errors[0].validator, "$ref");
    }

    #[test]
    fn test_boolean_schemas_and_integer() {
        let v = Validator::new();
        assert!(v.is_valid(&json!({"anything": 1}), &json!(true)));
        assert!(!v.is_valid(&json!(1), &json!(false)));
        assert!(v.is_valid(&json!(3), &json!({"type": "integer", "minimum": 1})));
        assert!(!v.is_valid(&json!(1.5), &json!({"type": "integer"})));
        assert!(!v.is_valid(&json!(0), &json!({"type": "integer", "minimum": 1})));
    }

    #[test]
    fn test_pointer_escaping() {
        assert_eq!(pointer(&["a/b".into(), "c~d".into()]), "/a~1b/c~0d");
        assert_eq!(pointer(&[]), "");
    }
}
