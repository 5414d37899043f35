use serde::{Deserialize, Serialize};

use crate::params::ParamValue;

/// While `param` equals `value`, the settings in `excludes` are hidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub param: String,
    pub value: ParamValue,
    pub excludes: Vec<String>,
}

impl ExclusionRule {
    pub fn matches(&self, current: Option<&ParamValue>) -> bool {
        current.map_or(false, |v| v.same_as(&self.value))
    }
}

pub fn is_trigger(rules: &[ExclusionRule], name: &str) -> bool {
    rules.iter().any(|r| r.param == name)
}

/// Settings not excluded by any matching rule nor by `locked`, in declaration
/// order.
pub fn resolve_active<F>(
    settings: &[String],
    rules: &[ExclusionRule],
    current: F,
    locked: &[String],
) -> Vec<String>
where
    F: Fn(&str) -> Option<ParamValue>,
{
    let mut excluded: Vec<&str> = Vec::new();
    for rule in rules {
        if rule.matches(current(&rule.param).as_ref()) {
            excluded.extend(rule.excludes.iter().map(String::as_str));
        }
    }
    excluded.extend(locked.iter().map(String::as_str));

    settings
        .iter()
        .filter(|s| !excluded.contains(&s.as_str()))
        .cloned()
        .collect()
}

/// Published snapshot of the editable settings.
#[derive(Debug, Clone, Default)]
pub struct ActiveSettings {
    current: Vec<String>,
}

impl ActiveSettings {
    /// Replace the snapshot; returns false (and keeps the old one) when nothing
    /// changed.
    pub fn update(&mut self, next: Vec<String>) -> bool {
        if next == self.current {
            return false;
        }
        self.current = next;
        true
    }

    pub fn snapshot(&self) -> &[String] {
        &self.current
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current.iter().any(|s| s == name)
    }
}
