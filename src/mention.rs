//! In-text mention rewriting.
//!
//! Platform mention tokens embed platform-native user IDs (`<@U123ABC>` on
//! Slack) that are meaningless to readers on the other platform. Tokens
//! whose ID resolves in the origin directory are replaced with a plain
//! `@display-name`; unresolvable tokens are left untouched.

use regex::Regex;
use std::collections::HashMap;

/// Distinct user IDs referenced by mention tokens in `text`, in order of
/// first appearance. The ID is capture group 1 of the platform's pattern.
pub fn mentioned_ids(pattern: &Regex, text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for captures in pattern.captures_iter(text) {
        if let Some(id) = captures.get(1) {
            if !ids.iter().any(|existing| existing == id.as_str()) {
                ids.push(id.as_str().to_string());
            }
        }
    }
    ids
}

/// Replace each mention token whose ID appears in `resolved` with the
/// mapped display name; leave other tokens unchanged.
pub fn rewrite(pattern: &Regex, text: &str, resolved: &HashMap<String, String>) -> String {
    pattern
        .replace_all(text, |captures: &regex::Captures<'_>| {
            match captures.get(1).and_then(|id| resolved.get(id.as_str())) {
                Some(name) => format!("@{name}"),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}
