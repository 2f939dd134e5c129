//! Minimal field templates: `{{ title }}`, `{{ series.name|lower }}`,
//! `{{ path|default('/tmp')|pathscrub }}`.
//!
//! A template is parsed once and rendered against a lookup closure, so the
//! caller decides where names resolve (entry fields first, then task context).

use serde_json::Value;

use crate::error::RenderError;

/// Parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
struct Expr {
    path: Vec<String>,
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Lower,
    Upper,
    Trim,
    PathScrub,
    Default(String),
}

impl Template {
    /// Parse template source.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                return Err(RenderError::Syntax {
                    position: offset + start,
                    message: "unclosed '{{'".into(),
                });
            };
            let expr = parse_expr(&after_open[..end], offset + start + 2)?;
            segments.push(Segment::Expr(expr));
            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Root variable names referenced by the template, in order of appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Expr(expr) = segment {
                let root = expr.path[0].as_str();
                if !names.contains(&root) {
                    names.push(root);
                }
            }
        }
        names
    }

    /// Whether the template is plain text (no expressions).
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }

    /// Render with `lookup` resolving root names.
    pub fn render<F>(&self, lookup: F) -> Result<String, RenderError>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&expr.eval(&lookup)?),
            }
        }
        Ok(out)
    }
}

impl Expr {
    fn eval<F>(&self, lookup: &F) -> Result<String, RenderError>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let mut value = lookup(&self.path[0]);
        for key in &self.path[1..] {
            value = value.and_then(|v| match v {
                Value::Object(mut map) => map.remove(key),
                Value::Array(items) => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.into_iter().nth(i)),
                _ => None,
            });
        }
        let mut text = match value {
            Some(Value::Null) | None => None,
            Some(v) => Some(value_to_string(&v)),
        };
        for filter in &self.filters {
            text = match (filter, text) {
                (Filter::Default(d), None) => Some(d.clone()),
                (_, None) => None,
                (Filter::Default(_), Some(t)) => Some(t),
                (Filter::Lower, Some(t)) => Some(t.to_lowercase()),
                (Filter::Upper, Some(t)) => Some(t.to_uppercase()),
                (Filter::Trim, Some(t)) => Some(t.trim().to_string()),
                (Filter::PathScrub, Some(t)) => Some(pathscrub(&t)),
            };
        }
        text.ok_or_else(|| RenderError::Undefined(self.path.join(".")))
    }
}

fn parse_expr(raw: &str, position: usize) -> Result<Expr, RenderError> {
    let mut parts = split_filters(raw).into_iter();
    let head = parts.next().unwrap_or_default();
    let head = head.trim();
    if head.is_empty() {
        return Err(RenderError::Syntax {
            position,
            message: "empty expression".into(),
        });
    }
    let path: Vec<String> = head.split('.').map(|s| s.trim().to_string()).collect();
    if path.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_alphanumeric() || c == '_')) {
        return Err(RenderError::Syntax {
            position,
            message: format!("invalid name '{head}'"),
        });
    }
    let filters = parts
        .map(|f| parse_filter(f.trim(), position))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expr { path, filters })
}

/// Split on `|` outside of quoted filter arguments.
fn split_filters(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in raw.chars() {
        match (quote, c) {
            (None, '|') => parts.push(std::mem::take(&mut current)),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_filter(raw: &str, position: usize) -> Result<Filter, RenderError> {
    let (name, arg) = match raw.find('(') {
        Some(open) => {
            let Some(inner) = raw[open + 1..].strip_suffix(')') else {
                return Err(RenderError::Syntax {
                    position,
                    message: format!("unclosed filter argument in '{raw}'"),
                });
            };
            (raw[..open].trim(), Some(unquote(inner.trim())))
        }
        None => (raw, None),
    };
    match (name, arg) {
        ("lower", None) => Ok(Filter::Lower),
        ("upper", None) => Ok(Filter::Upper),
        ("trim", None) => Ok(Filter::Trim),
        ("pathscrub", None) => Ok(Filter::PathScrub),
        ("default", Some(arg)) => Ok(Filter::Default(arg)),
        _ => Err(RenderError::Filter(raw.to_string())),
    }
}

fn unquote(s: &str) -> String {
    let trimmed = s
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
    trimmed.unwrap_or(s).to_string()
}

/// Render a JSON value the way a template shows it.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace characters that are invalid in file names.
pub fn pathscrub(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
