//! Filter plugins: decide which entries are accepted or rejected.
//!
//! Filters only touch undecided entries, except `set` which enriches every
//! entry still in play.

use std::sync::Arc;

use autoflow_core::phase::PRIORITY_FIRST;
use autoflow_core::quality::{Quality, Requirement};
use autoflow_core::schema::parse_size_mib;
use autoflow_core::{
    ConfigContributor, Entry, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry, PluginSchema,
    Result, Task,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::is_disabled;

fn parse_config<T: for<'de> Deserialize<'de>>(plugin: &str, config: &Value) -> std::result::Result<T, PluginError> {
    serde_json::from_value(config.clone()).map_err(|e| PluginError::fatal(format!("{plugin}: invalid config: {e}")))
}

// ─── set ──────────────────────────────────────────────────

/// `set` — assign fields; string values are templates.
pub struct Set;

impl ConfigContributor for Set {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({"type": "object", "minProperties": 1}))
    }
}

impl PhaseHandler for Set {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let Some(fields) = config.as_object() else {
            return Err(PluginError::fatal("set expects a table of fields"));
        };
        let context = task.context().clone();
        for entry in task.live_mut() {
            for (key, value) in fields {
                let value = match value {
                    Value::String(template) => match entry.render(template, &context) {
                        Ok(rendered) => Value::String(rendered),
                        Err(e) => {
                            entry.fail(format!("set: cannot render '{key}': {e}"));
                            break;
                        }
                    },
                    other => other.clone(),
                };
                entry.set(key.clone(), value);
            }
        }
        Ok(())
    }
}

// ─── accept_all ───────────────────────────────────────────

/// `accept_all: true`
pub struct AcceptAll;

impl ConfigContributor for AcceptAll {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({"type": "boolean"}))
    }
}

impl PhaseHandler for AcceptAll {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        if is_disabled(config) {
            return Ok(());
        }
        for entry in task.undecided_mut() {
            entry.accept("accept_all");
        }
        Ok(())
    }
}

// ─── regexp ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegexpConfig {
    #[serde(default)]
    accept: Vec<String>,
    #[serde(default)]
    reject: Vec<String>,
    #[serde(default = "default_from")]
    from: Vec<String>,
    #[serde(default)]
    rest: Option<Rest>,
}

fn default_from() -> Vec<String> {
    vec!["title".into()]
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Rest {
    Accept,
    Reject,
}

/// `regexp` — match fields against patterns. Reject wins over accept.
pub struct Regexp;

fn compile(patterns: &[String]) -> std::result::Result<Vec<Regex>, PluginError> {
    patterns
        .iter()
        .map(|p| {
            regex::RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| PluginError::fatal(format!("regexp: invalid pattern '{p}': {e}")))
        })
        .collect()
}

fn first_match<'r>(entry: &mut Entry, fields: &[String], regexes: &'r [Regex]) -> Option<(&'r Regex, String)> {
    for field in fields {
        let texts: Vec<String> = match entry.get(field) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            Some(Value::Number(n)) => vec![n.to_string()],
            _ => continue,
        };
        for re in regexes {
            if texts.iter().any(|t| re.is_match(t)) {
                return Some((re, field.clone()));
            }
        }
    }
    None
}

impl ConfigContributor for Regexp {
    fn schema(&self) -> PluginSchema {
        let patterns = json!({"type": "array", "items": {"type": "string", "format": "regex"}});
        PluginSchema::Object(json!({
            "type": "object",
            "properties": {
                "accept": patterns,
                "reject": patterns,
                "from": {"type": "array", "items": {"type": "string"}, "default": ["title"]},
                "rest": {"type": "string", "enum": ["accept", "reject"]}
            },
            "additionalProperties": false,
            "minProperties": 1
        }))
    }
}

impl PhaseHandler for Regexp {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let cfg: RegexpConfig = parse_config("regexp", config)?;
        let accept = compile(&cfg.accept)?;
        let reject = compile(&cfg.reject)?;

        for entry in task.undecided_mut() {
            if let Some((re, field)) = first_match(entry, &cfg.from, &reject) {
                entry.reject(format!("regexp '{}' matched {field}", re.as_str()));
                continue;
            }
            if let Some((re, field)) = first_match(entry, &cfg.from, &accept) {
                entry.accept(format!("regexp '{}' matched {field}", re.as_str()));
                continue;
            }
            match cfg.rest {
                Some(Rest::Accept) => {
                    entry.accept("regexp: rest");
                }
                Some(Rest::Reject) => {
                    entry.reject("regexp: rest");
                }
                None => {}
            }
        }
        Ok(())
    }
}

// ─── quality ──────────────────────────────────────────────

/// `quality = "720p+ hdtv"` — reject entries outside the requirement.
pub struct QualityFilter;

impl ConfigContributor for QualityFilter {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({"type": "string", "format": "quality_requirements"}))
    }
}

impl PhaseHandler for QualityFilter {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let req: Requirement = config
            .as_str()
            .unwrap_or("any")
            .parse()
            .map_err(|e: String| PluginError::fatal(format!("quality: {e}")))?;
        if req.is_any() {
            return Ok(());
        }
        for entry in task.undecided_mut() {
            let quality = match entry.get("quality") {
                Some(Value::String(q)) => Quality::from_title(q),
                _ => Quality::from_title(entry.title()),
            };
            if !req.allows(&quality) {
                entry.reject(format!("quality {quality} does not match {}", config.as_str().unwrap_or("")));
            }
        }
        Ok(())
    }
}

// ─── content_size ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContentSizeConfig {
    min: Option<String>,
    max: Option<String>,
    #[serde(default)]
    strict: bool,
}

/// `content_size` — bounds on the `content_size` field (MiB).
pub struct ContentSize;

impl ConfigContributor for ContentSize {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({
            "type": "object",
            "properties": {
                "min": {"type": "string", "format": "size"},
                "max": {"type": "string", "format": "size"},
                "strict": {"type": "boolean", "default": false}
            },
            "additionalProperties": false,
            "minProperties": 1
        }))
    }
}

impl PhaseHandler for ContentSize {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let cfg: ContentSizeConfig = parse_config("content_size", config)?;
        let bound = |s: &Option<String>| -> std::result::Result<Option<f64>, PluginError> {
            match s {
                None => Ok(None),
                Some(s) => parse_size_mib(s)
                    .map(Some)
                    .ok_or_else(|| PluginError::fatal(format!("content_size: bad size '{s}'"))),
            }
        };
        let min = bound(&cfg.min)?;
        let max = bound(&cfg.max)?;

        for entry in task.undecided_mut() {
            let Some(size) = entry.get("content_size").and_then(Value::as_f64) else {
                if cfg.strict {
                    entry.reject("content_size: unknown size");
                }
                continue;
            };
            if let Some(min) = min {
                if size < min {
                    entry.reject(format!("content_size {size} MiB below {min} MiB"));
                    continue;
                }
            }
            if let Some(max) = max {
                if size > max {
                    entry.reject(format!("content_size {size} MiB above {max} MiB"));
                }
            }
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("set", Arc::new(Set))
            .category("modify")
            .phase_priority(Phase::Filter, PRIORITY_FIRST),
    )?;
    registry.register(
        PluginDescriptor::new("accept_all", Arc::new(AcceptAll))
            .category("filter")
            .phase(Phase::Filter),
    )?;
    registry.register(
        PluginDescriptor::new("regexp", Arc::new(Regexp))
            .category("filter")
            .phase(Phase::Filter),
    )?;
    registry.register(
        PluginDescriptor::new("quality", Arc::new(QualityFilter))
            .category("filter")
            .phase(Phase::Filter)
            .depends_on("metainfo_quality"),
    )?;
    registry.register(
        PluginDescriptor::new("content_size", Arc::new(ContentSize))
            .category("filter")
            .phase(Phase::Filter),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, task_with, titles};
    use autoflow_core::{EntryState, TaskOptions};

    fn entries(titles: &[&str]) -> Vec<Entry> {
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| Entry::new(*t, format!("http://x/{i}")))
            .collect()
    }

    #[test]
    fn test_accept_all_skips_decided() {
        let mut es = entries(&["a", "b"]);
        es[1].reject("earlier");
        let mut task = task_with(es, TaskOptions::default());
        run(&mut task, "accept_all", Phase::Filter, json!(true)).unwrap();
        assert_eq!(titles(task.accepted()), vec!["a"]);
        assert_eq!(task.entries()[1].reason(), Some("earlier"));
    }

    #[test]
    fn test_regexp_reject_wins_and_rest() {
        let mut task = task_with(
            entries(&["Show.S01E01.720p", "Show.S01E02.CAM", "Other.Thing"]),
            TaskOptions::default(),
        );
        run(
            &mut task,
            "regexp",
            Phase::Filter,
            json!({"accept": ["^show"], "reject": ["cam"], "from": ["title"], "rest": "reject"}),
        )
        .unwrap();
        let states: Vec<EntryState> = task.entries().iter().map(Entry::state).collect();
        assert_eq!(states, vec![EntryState::Accepted, EntryState::Rejected, EntryState::Rejected]);
        assert_eq!(task.entries()[2].reason(), Some("regexp: rest"));
    }

    #[test]
    fn test_regexp_matches_list_fields() {
        let mut e = Entry::new("x", "http://x");
        e.set("tags", json!(["drama", "scifi"]));
        let mut task = task_with(vec![e], TaskOptions::default());
        run(&mut task, "regexp", Phase::Filter, json!({"accept": ["sci"], "from": ["tags"]})).unwrap();
        assert_eq!(task.accepted().count(), 1);
    }

    #[test]
    fn test_set_renders_and_fails_on_error() {
        let mut task = task_with(entries(&["A", "B"]), TaskOptions::default());
        task.entries_mut()[1].set("path", json!("/x"));
        run(
            &mut task,
            "set",
            Phase::Filter,
            json!({"path": "/media/{{task}}/{{title|lower}}", "priority": 3}),
        )
        .unwrap();
        assert_eq!(task.entries()[0].peek("path"), Some(&json!("/media/test/a")));
        assert_eq!(task.entries()[0].peek("priority"), Some(&json!(3)));

        run(&mut task, "set", Phase::Filter, json!({"dest": "{{missing}}"})).unwrap();
        assert!(task.entries().iter().all(Entry::is_failed));
    }

    #[test]
    fn test_quality_filter() {
        let mut task = task_with(
            entries(&["Show.720p.HDTV", "Show.480p.HDTV", "Show.1080p.WEB-DL"]),
            TaskOptions::default(),
        );
        run(&mut task, "quality", Phase::Filter, json!("720p+")).unwrap();
        assert_eq!(titles(task.rejected()), vec!["Show.480p.HDTV"]);
        assert_eq!(task.undecided().count(), 2);
    }

    #[test]
    fn test_content_size() {
        let mut es = entries(&["small", "ok", "big", "unknown"]);
        es[0].set("content_size", json!(100));
        es[1].set("content_size", json!(700));
        es[2].set("content_size", json!(5000));
        let mut task = task_with(es, TaskOptions::default());
        run(&mut task, "content_size", Phase::Filter, json!({"min": "300 MB", "max": "2 GB"})).unwrap();
        assert_eq!(titles(task.rejected()), vec!["small", "big"]);
        assert_eq!(titles(task.undecided()), vec!["ok", "unknown"]);

        run(&mut task, "content_size", Phase::Filter, json!({"min": "300 MB", "strict": true})).unwrap();
        assert_eq!(titles(task.rejected()), vec!["small", "big", "unknown"]);
    }
}
