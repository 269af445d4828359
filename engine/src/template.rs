//! Templating capability injected by the host

use serde_json::Value;

use crate::scenario::Context;

/// Pure interpolation of a text value against a scenario context
pub trait Template: Send + Sync {
    fn render(&self, input: &str, context: &Context) -> String;
}

impl<F> Template for F
where
    F: Fn(&str, &Context) -> String + Send + Sync,
{
    fn render(&self, input: &str, context: &Context) -> String {
        self(input, context)
    }
}

/// Returns every input unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Verbatim;

impl Template for Verbatim {
    fn render(&self, input: &str, _context: &Context) -> String {
        input.to_string()
    }
}

/// Replaces `{{ name }}` with the context variable `name` and `{{ _uid }}` with the
/// context uid. Unknown placeholders are left as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct Placeholders;

impl Template for Placeholders {
    fn render(&self, input: &str, context: &Context) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let name = rest[start + 2..start + len].trim();
            out.push_str(&rest[..start]);
            match lookup(name, context) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[start..start + len + 2]),
            }
            rest = &rest[start + len + 2..];
        }

        out.push_str(rest);
        out
    }
}

fn lookup(name: &str, context: &Context) -> Option<String> {
    if name == "_uid" {
        return Some(context.uid.clone());
    }
    context.var(name).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
