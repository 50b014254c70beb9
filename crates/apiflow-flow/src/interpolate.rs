//! Resolution of `{{scope.path}}` references against session state
//!
//! The reference grammar is a double-curly-brace delimited, dot-separated
//! path whose first segment names one of the [`Scope`]s. Path segments after
//! the scope navigate nested structures generically: object properties by
//! name, array elements by numeric index. A reference that does not resolve
//! (unknown scope or dead path) is left verbatim in the output; unresolved
//! references are an inspectable condition, not a hard failure.
//!
//! All scans share one compiled pattern so that diagnostics
//! ([`has_variables`], [`reference_scopes`]) can never disagree with
//! resolution.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::trace;

use crate::session::{Scope, SessionState};

static REFERENCE_PATTERN: OnceLock<Regex> = OnceLock::new();

#[allow(clippy::expect_used)]
fn reference_pattern() -> &'static Regex {
    REFERENCE_PATTERN.get_or_init(|| {
        Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_\-]+)*)\}\}")
            .expect("reference grammar is a valid pattern")
    })
}

/// Transient context for one interpolation pass
///
/// Borrows the session state; not owned by any long-lived entity.
#[derive(Debug, Clone, Copy)]
pub struct InterpolationContext<'a> {
    session: &'a SessionState,
    current_step_id: Option<&'a str>,
    debug: bool,
}

impl<'a> InterpolationContext<'a> {
    /// Create a context over the given session
    pub fn new(session: &'a SessionState) -> Self {
        Self {
            session,
            current_step_id: None,
            debug: false,
        }
    }

    /// Scope lookups to the step currently being processed
    pub fn with_step(mut self, step_id: &'a str) -> Self {
        self.current_step_id = Some(step_id);
        self
    }

    /// Enable per-reference trace logging
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Id of the step currently being processed, if any
    pub fn current_step_id(&self) -> Option<&str> {
        self.current_step_id
    }
}

/// A reference that failed validation, with a human-readable reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidReference {
    /// The raw reference text, braces included
    pub reference: String,
    /// Why it cannot resolve
    pub error: String,
}

/// Partition of references into resolvable and unresolvable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceValidation {
    /// References whose scope is recognized and whose path resolves
    pub valid: Vec<String>,
    /// References that cannot resolve, with reasons
    pub invalid: Vec<InvalidReference>,
}

impl ReferenceValidation {
    /// Whether every reference resolved
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Resolve every reference in `text`, leaving unresolved ones verbatim
pub fn resolve_text(text: &str, ctx: &InterpolationContext<'_>) -> String {
    reference_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match resolve_path(path, ctx) {
                Some(value) => {
                    if ctx.debug {
                        trace!(reference = %path, "resolved reference");
                    }
                    value_to_replacement(&value)
                }
                None => {
                    if ctx.debug {
                        trace!(reference = %path, "reference left verbatim");
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Recursively resolve references in every string leaf of a JSON structure.
///
/// Non-string leaves pass through unchanged.
pub fn resolve_value(value: &Value, ctx: &InterpolationContext<'_>) -> Value {
    match value {
        Value::String(text) => Value::String(resolve_text(text, ctx)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect())
        }
        Value::Object(map) => {
            let resolved: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ctx)))
                .collect();
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}

/// Every raw reference found in `text`, braces included, without resolving
pub fn extract_references(text: &str) -> Vec<String> {
    reference_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Every raw reference found in the string leaves of a JSON structure
pub fn extract_value_references(value: &Value) -> Vec<String> {
    match value {
        Value::String(text) => extract_references(text),
        Value::Array(items) => items.iter().flat_map(extract_value_references).collect(),
        Value::Object(map) => map.values().flat_map(extract_value_references).collect(),
        _ => Vec::new(),
    }
}

/// Whether `text` contains at least one reference
pub fn has_variables(text: &str) -> bool {
    reference_pattern().is_match(text)
}

/// Distinct first segments of every reference in `text`, in first-seen order.
///
/// Unknown scope names are included so diagnostics can surface them.
pub fn reference_scopes(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in reference_pattern().captures_iter(text) {
        let scope = caps[1].split('.').next().unwrap_or_default().to_string();
        if !seen.contains(&scope) {
            seen.push(scope);
        }
    }
    seen
}

/// Partition `references` into valid and invalid against the context.
///
/// Used by the executor before committing to run a step, so a flow can fail
/// fast with every unresolvable reference at once.
pub fn validate_references(
    references: &[String],
    ctx: &InterpolationContext<'_>,
) -> ReferenceValidation {
    let mut validation = ReferenceValidation::default();

    for reference in references {
        let path = reference
            .trim_start_matches("{{")
            .trim_end_matches("}}");
        let scope_name = path.split('.').next().unwrap_or_default();

        if Scope::from_str(scope_name).is_err() {
            validation.invalid.push(InvalidReference {
                reference: reference.clone(),
                error: format!("unknown scope '{}'", scope_name),
            });
            continue;
        }

        if resolve_path(path, ctx).is_some() {
            validation.valid.push(reference.clone());
        } else {
            validation.invalid.push(InvalidReference {
                reference: reference.clone(),
                error: format!("path '{}' not found", path),
            });
        }
    }

    validation
}

/// Per-scope key counts and names, for debugging surfaces
pub fn build_variable_summary(ctx: &InterpolationContext<'_>) -> Value {
    let mut summary = Map::new();
    for scope in [
        Scope::Input,
        Scope::Env,
        Scope::Runtime,
        Scope::Config,
        Scope::Header,
        Scope::Step,
    ] {
        let mut keys = ctx.session.scope_keys(scope);
        keys.sort();
        summary.insert(
            scope.as_str().to_string(),
            json!({
                "count": ctx.session.scope_len(scope),
                "keys": keys,
            }),
        );
    }
    if let Some(step_id) = ctx.current_step_id {
        summary.insert("current_step".to_string(), json!(step_id));
    }
    Value::Object(summary)
}

/// Resolve a dot-separated path (first segment = scope) to a value
fn resolve_path(path: &str, ctx: &InterpolationContext<'_>) -> Option<Value> {
    let mut segments = path.split('.');
    let scope = Scope::from_str(segments.next()?).ok()?;
    let first_key = segments.next()?;
    let root = ctx.session.get(scope, first_key)?;
    navigate(&root, segments)
}

/// Walk the remaining dot segments through nested objects and arrays
fn navigate<'s>(root: &Value, segments: impl Iterator<Item = &'s str>) -> Option<Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Replacement text for a resolved value: strings stay raw, everything else
/// becomes its JSON representation
fn value_to_replacement(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use pretty_assertions::assert_eq;

    fn session() -> SessionState {
        let mut state = SessionState::new();
        state.set(Scope::Input, "name", json!("Ada"));
        state.set(Scope::Env, "base_url", json!("https://api.test"));
        state.set(Scope::Runtime, "attempt", json!(2));
        state.set(Scope::Config, "tenant", json!({"id": "t-9"}));
        state.record_step_output(
            "s1",
            json!({"status": 200, "body": {"token": "abc", "items": ["x", "y"]}}),
        );
        state
    }

    #[test]
    fn resolves_input_reference() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(resolve_text("{{input.name}}", &ctx), "Ada");
    }

    #[test]
    fn missing_reference_stays_verbatim() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(resolve_text("{{input.missing}}", &ctx), "{{input.missing}}");
        assert_eq!(resolve_text("{{bogus.name}}", &ctx), "{{bogus.name}}");
    }

    #[test]
    fn resolves_step_output_path() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(resolve_text("{{step.s1.body.token}}", &ctx), "abc");
    }

    #[test]
    fn resolves_array_index_segment() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(resolve_text("{{step.s1.body.items.1}}", &ctx), "y");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(resolve_text("attempt {{runtime.attempt}}", &ctx), "attempt 2");
        assert_eq!(resolve_text("{{config.tenant}}", &ctx), r#"{"id":"t-9"}"#);
    }

    #[test]
    fn multiple_references_in_one_text() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(
            resolve_text("{{env.base_url}}/users/{{input.name}}", &ctx),
            "https://api.test/users/Ada"
        );
    }

    #[test]
    fn resolve_value_walks_structures() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        let input = json!({
            "url": "{{env.base_url}}/login",
            "token": "{{step.s1.body.token}}",
            "count": 3,
            "tags": ["{{input.name}}", "fixed"]
        });
        let resolved = resolve_value(&input, &ctx);
        assert_eq!(
            resolved,
            json!({
                "url": "https://api.test/login",
                "token": "abc",
                "count": 3,
                "tags": ["Ada", "fixed"]
            })
        );
    }

    #[test]
    fn extract_finds_all_references() {
        let refs = extract_references("{{env.a}} text {{step.s1.body}} {{nope}}");
        assert_eq!(refs, vec!["{{env.a}}", "{{step.s1.body}}", "{{nope}}"]);
    }

    #[test]
    fn extraction_agrees_with_resolution() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        let text = "{{env.base_url}} and {{input.missing}}";
        assert!(has_variables(text));
        for reference in extract_references(text) {
            // Every extracted reference must be processed by resolve_text:
            // either replaced or passed through verbatim, never mangled.
            let resolved = resolve_text(&reference, &ctx);
            assert!(resolved == reference || !resolved.contains("{{"));
        }
    }

    #[test]
    fn scope_scan_includes_unknown_scopes() {
        let scopes = reference_scopes("{{env.a}} {{env.b}} {{bogus.c}}");
        assert_eq!(scopes, vec!["env", "bogus"]);
    }

    #[test]
    fn validate_partitions_references() {
        let mut state = SessionState::new();
        state.set(Scope::Env, "X", json!("1"));
        let ctx = InterpolationContext::new(&state);

        let refs = vec!["{{env.X}}".to_string(), "{{bogus.Y}}".to_string()];
        let validation = validate_references(&refs, &ctx);

        assert_eq!(validation.valid, vec!["{{env.X}}"]);
        assert_eq!(validation.invalid.len(), 1);
        assert_eq!(validation.invalid[0].reference, "{{bogus.Y}}");
        assert!(validation.invalid[0].error.contains("unknown scope"));
    }

    #[test]
    fn validate_reports_dead_paths() {
        let state = session();
        let ctx = InterpolationContext::new(&state);
        let refs = vec!["{{step.s1.body.nope}}".to_string()];
        let validation = validate_references(&refs, &ctx);
        assert!(!validation.is_clean());
        assert!(validation.invalid[0].error.contains("not found"));
    }

    #[test]
    fn header_scope_resolves_only_during_step() {
        let mut state = session();
        let ctx = InterpolationContext::new(&state);
        assert_eq!(resolve_text("{{header.X-Auth}}", &ctx), "{{header.X-Auth}}");

        let mut headers = std::collections::HashMap::new();
        headers.insert("X-Auth".to_string(), "token-1".to_string());
        state.set_current_headers(headers);
        let ctx = InterpolationContext::new(&state).with_step("s2");
        assert_eq!(resolve_text("{{header.X-Auth}}", &ctx), "token-1");
    }

    #[test]
    fn variable_summary_counts_scopes() {
        let state = session();
        let ctx = InterpolationContext::new(&state).with_step("s2");
        let summary = build_variable_summary(&ctx);
        assert_eq!(summary["input"]["count"], json!(1));
        assert_eq!(summary["step"]["keys"], json!(["s1"]));
        assert_eq!(summary["current_step"], json!("s2"));
    }
}
