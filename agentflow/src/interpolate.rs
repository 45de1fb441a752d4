//! Placeholder resolution for node instructions.
//!
//! Supported forms:
//!
//! - `${VAR}`, `{{VAR}}`, `{input.VAR}`: run inputs overlaying pipeline variables
//! - `{output.NODE_ID}`: trimmed captured output of a finished node in scope
//! - `$LOOP_ITEM`, `$LOOP_INDEX`, `$LOOP_COUNT` (also `${LOOP_*}`): loop bindings
//!
//! Substitution is a single pass over the template, so substituted values
//! are never expanded again. Placeholders that cannot be resolved are left
//! verbatim.

use dashmap::DashMap;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}",
        r"|\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}",
        r"|\{input\.([A-Za-z_][A-Za-z0-9_]*)\}",
        r"|\{output\.([A-Za-z0-9_.\-]+)\}",
        r"|\$(LOOP_ITEM|LOOP_INDEX|LOOP_COUNT)\b",
    ))
    .expect("placeholder pattern is valid")
});

/// Variables bound for one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBinding {
    /// Current item.
    pub item: String,
    /// Zero-based iteration index.
    pub index: usize,
    /// Total number of iterations.
    pub count: usize,
}

impl LoopBinding {
    fn get(&self, name: &str) -> Option<String> {
        match name {
            "LOOP_ITEM" => Some(self.item.clone()),
            "LOOP_INDEX" => Some(self.index.to_string()),
            "LOOP_COUNT" => Some(self.count.to_string()),
            _ => None,
        }
    }
}

/// Source of upstream node outputs.
pub trait OutputSource {
    /// Captured output of `node_id`, if it has finished.
    fn output_of(&self, node_id: &str) -> Option<String>;
}

impl OutputSource for HashMap<String, String> {
    fn output_of(&self, node_id: &str) -> Option<String> {
        self.get(node_id).cloned()
    }
}

impl OutputSource for DashMap<String, String> {
    fn output_of(&self, node_id: &str) -> Option<String> {
        self.get(node_id).map(|v| v.value().clone())
    }
}

/// Everything a template may refer to.
pub struct Scope<'a> {
    variables: &'a HashMap<String, String>,
    outputs: &'a dyn OutputSource,
    loop_binding: Option<&'a LoopBinding>,
}

impl<'a> Scope<'a> {
    /// Creates a scope over variables and outputs.
    #[must_use]
    pub fn new(variables: &'a HashMap<String, String>, outputs: &'a dyn OutputSource) -> Self {
        Self {
            variables,
            outputs,
            loop_binding: None,
        }
    }

    /// Binds loop variables.
    #[must_use]
    pub fn with_loop(mut self, binding: Option<&'a LoopBinding>) -> Self {
        self.loop_binding = binding;
        self
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.loop_binding
            .and_then(|b| b.get(name))
            .or_else(|| self.variables.get(name).cloned())
    }

    /// Resolves every placeholder in `template`.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures<'_>| {
                let resolved = if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                    self.variable(name.as_str())
                } else if let Some(name) = caps.get(3) {
                    self.variables.get(name.as_str()).cloned()
                } else if let Some(node) = caps.get(4) {
                    self.outputs
                        .output_of(node.as_str())
                        .map(|out| out.trim().to_string())
                } else {
                    caps.get(5)
                        .and_then(|name| self.loop_binding.and_then(|b| b.get(name.as_str())))
                };
                resolved.unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Merges pipeline defaults with run inputs; inputs win.
#[must_use]
pub fn merge_variables(
    defaults: &HashMap<String, String>,
    inputs: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = defaults.clone();
    merged.extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("BRANCH".to_string(), "main".to_string()),
            ("ENVIRONMENT".to_string(), "staging".to_string()),
        ])
    }

    #[test]
    fn test_variable_forms() {
        let variables = vars();
        let outputs = HashMap::new();
        let scope = Scope::new(&variables, &outputs);

        assert_eq!(
            scope.render("git diff ${BRANCH} -- {{ ENVIRONMENT }} {input.BRANCH}"),
            "git diff main -- staging main"
        );
    }

    #[test]
    fn test_unresolved_placeholders_are_left_verbatim() {
        let variables = vars();
        let outputs = HashMap::new();
        let scope = Scope::new(&variables, &outputs);

        assert_eq!(
            scope.render("echo ${MISSING} {output.node-9} $LOOP_ITEM $HOME"),
            "echo ${MISSING} {output.node-9} $LOOP_ITEM $HOME"
        );
    }

    #[test]
    fn test_output_references_are_trimmed() {
        let variables = HashMap::new();
        let outputs = DashMap::new();
        outputs.insert("node-1".to_string(), "  src/a.ts\nsrc/b.ts\n".to_string());
        let scope = Scope::new(&variables, &outputs);

        assert_eq!(scope.render("Review: {output.node-1}"), "Review: src/a.ts\nsrc/b.ts");
    }

    #[test]
    fn test_loop_bindings() {
        let variables = vars();
        let outputs = HashMap::new();
        let binding = LoopBinding {
            item: "src/a.ts".to_string(),
            index: 1,
            count: 3,
        };
        let scope = Scope::new(&variables, &outputs).with_loop(Some(&binding));

        assert_eq!(
            scope.render("review $LOOP_ITEM ($LOOP_INDEX/${LOOP_COUNT}) on ${BRANCH}"),
            "review src/a.ts (1/3) on main"
        );
        assert_eq!(scope.render("$LOOP_ITEMS"), "$LOOP_ITEMS");
    }

    #[test]
    fn test_substitution_is_single_pass() {
        let variables = HashMap::from([
            ("A".to_string(), "${B}".to_string()),
            ("B".to_string(), "boom".to_string()),
        ]);
        let outputs = HashMap::new();
        let scope = Scope::new(&variables, &outputs);

        assert_eq!(scope.render("${A}"), "${B}");
    }

    #[test]
    fn test_inputs_override_defaults() {
        let inputs = HashMap::from([("BRANCH".to_string(), "feature/x".to_string())]);
        let merged = merge_variables(&vars(), &inputs);
        assert_eq!(merged.get("BRANCH").map(String::as_str), Some("feature/x"));
        assert_eq!(merged.get("ENVIRONMENT").map(String::as_str), Some("staging"));
    }
}
