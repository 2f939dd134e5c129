//! Task selection for `execute`.
//!
//! - `all` — every task not marked `manual`
//! - exact name — that task, even when undefined (the worker reports it)
//! - glob pattern — matching non-manual tasks; no match is an error

use autoflow_core::{AutoflowConfig, AutoflowError, Result};
use glob::Pattern;

/// A selected task name and whether it was named explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    pub task: String,
    pub explicit: bool,
}

fn is_pattern(selector: &str) -> bool {
    selector.contains(['*', '?', '['])
}

/// Resolve selectors against `config`, keeping first-seen order without
/// duplicates.
pub fn select(config: &AutoflowConfig, selectors: &[String]) -> Result<Vec<Selected>> {
    let mut out: Vec<Selected> = Vec::new();
    let mut push = |task: &str, explicit: bool| match out.iter_mut().find(|s| s.task == task) {
        Some(existing) => existing.explicit |= explicit,
        None => out.push(Selected {
            task: task.to_string(),
            explicit,
        }),
    };

    let selectors: Vec<&str> = if selectors.is_empty() {
        vec!["all"]
    } else {
        selectors.iter().map(String::as_str).collect()
    };

    for selector in selectors {
        if selector.eq_ignore_ascii_case("all") {
            for name in config.task_names().filter(|n| !config.is_manual(n)) {
                push(name, false);
            }
        } else if is_pattern(selector) {
            let pattern = Pattern::new(selector)
                .map_err(|e| AutoflowError::config(format!("bad task pattern '{selector}': {e}"), vec![]))?;
            let mut matched = false;
            for name in config.task_names() {
                if pattern.matches(name) && !config.is_manual(name) {
                    push(name, false);
                    matched = true;
                }
            }
            if !matched {
                return Err(AutoflowError::NotFound(format!("no task matches '{selector}'")));
            }
        } else {
            if config.task(selector).is_none() {
                tracing::warn!("⚠️ Task '{selector}' is not defined");
            }
            push(selector, true);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> AutoflowConfig {
        let mut c = AutoflowConfig::default();
        c.tasks.insert("tv-daily".into(), json!({"accept_all": true}));
        c.tasks.insert("tv-weekly".into(), json!({"accept_all": true}));
        c.tasks.insert("movies".into(), json!({"accept_all": true}));
        c.tasks.insert("tv-manual".into(), json!({"manual": true}));
        c
    }

    fn names(selected: &[Selected]) -> Vec<&str> {
        selected.iter().map(|s| s.task.as_str()).collect()
    }

    #[test]
    fn test_all_skips_manual() {
        let selected = select(&config(), &[]).unwrap();
        assert_eq!(names(&selected), vec!["movies", "tv-daily", "tv-weekly"]);
        assert!(selected.iter().all(|s| !s.explicit));
    }

    #[test]
    fn test_patterns_and_exact_names() {
        let selected = select(&config(), &["tv-*".into(), "tv-manual".into(), "tv-daily".into()]).unwrap();
        assert_eq!(names(&selected), vec!["tv-daily", "tv-weekly", "tv-manual"]);
        assert_eq!(
            selected.iter().map(|s| s.explicit).collect::<Vec<_>>(),
            vec![true, false, true]
        );

        let selected = select(&config(), &["ghost".into()]).unwrap();
        assert_eq!(names(&selected), vec!["ghost"]);
    }

    #[test]
    fn test_unmatched_pattern_is_not_found() {
        let err = select(&config(), &["books-*".into()]).unwrap_err();
        assert!(matches!(err, AutoflowError::NotFound(_)));
        assert!(select(&config(), &["[".into()]).is_err());
    }
}
