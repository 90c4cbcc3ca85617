//! Kind-specific option bags
//!
//! The parser keeps every kind-specific child node of a declaration as a
//! [`Setting`]. Typed configurations are built from these by the
//! `from_settings` constructors, which reject any key they do not know.

use crate::error::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar value carried by a setting argument or property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl SettingValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::String(s) => write!(f, "\"{}\"", s),
            SettingValue::Integer(i) => write!(f, "{}", i),
            SettingValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One kind-specific option node, e.g. `node-group "custom" desired=2`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub args: Vec<SettingValue>,
    pub props: BTreeMap<String, SettingValue>,
    pub children: Settings,
}

impl Setting {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, value: SettingValue) -> Self {
        self.args.push(value);
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: SettingValue) -> Self {
        self.props.insert(name.into(), value);
        self
    }

    /// Single string argument
    pub fn string(&self, entry: &str) -> Result<String> {
        match self.args.as_slice() {
            [SettingValue::String(s)] => Ok(s.clone()),
            _ => Err(TopologyError::option(
                entry,
                format!("'{}' expects exactly one string argument", self.key),
            )),
        }
    }

    /// Single integer argument
    pub fn integer(&self, entry: &str) -> Result<i64> {
        match self.args.as_slice() {
            [SettingValue::Integer(i)] => Ok(*i),
            _ => Err(TopologyError::option(
                entry,
                format!("'{}' expects exactly one integer argument", self.key),
            )),
        }
    }

    /// Single boolean argument
    pub fn boolean(&self, entry: &str) -> Result<bool> {
        match self.args.as_slice() {
            [SettingValue::Bool(b)] => Ok(*b),
            _ => Err(TopologyError::option(
                entry,
                format!("'{}' expects exactly one boolean argument", self.key),
            )),
        }
    }

    /// One or more string arguments
    pub fn strings(&self, entry: &str) -> Result<Vec<String>> {
        if self.args.is_empty() {
            return Err(TopologyError::option(
                entry,
                format!("'{}' expects at least one argument", self.key),
            ));
        }
        self.args
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    TopologyError::option(
                        entry,
                        format!("'{}' arguments must be strings, got {}", self.key, v),
                    )
                })
            })
            .collect()
    }

    pub fn prop_string(&self, entry: &str, name: &str) -> Result<Option<String>> {
        match self.props.get(name) {
            None => Ok(None),
            Some(SettingValue::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(TopologyError::option(
                entry,
                format!("'{}' property '{}' must be a string, got {}", self.key, name, other),
            )),
        }
    }

    pub fn prop_integer(&self, entry: &str, name: &str) -> Result<Option<i64>> {
        match self.props.get(name) {
            None => Ok(None),
            Some(SettingValue::Integer(i)) => Ok(Some(*i)),
            Some(other) => Err(TopologyError::option(
                entry,
                format!(
                    "'{}' property '{}' must be an integer, got {}",
                    self.key, name, other
                ),
            )),
        }
    }

    /// Fails on any property outside `allowed`
    pub fn reject_unknown_props(&self, entry: &str, allowed: &[&str]) -> Result<()> {
        match self.props.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(TopologyError::option(
                entry,
                format!("unknown property '{}' on '{}'", unknown, self.key),
            )),
            None => Ok(()),
        }
    }

    /// Fails when the setting carries properties or children it cannot use
    pub fn reject_extras(&self, entry: &str) -> Result<()> {
        self.reject_unknown_props(entry, &[])?;
        if !self.children.is_empty() {
            return Err(TopologyError::option(
                entry,
                format!("'{}' does not take a block", self.key),
            ));
        }
        Ok(())
    }
}

/// Ordered list of settings, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    entries: Vec<Setting>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, setting: Setting) {
        self.entries.push(setting);
    }

    pub fn with(mut self, setting: Setting) -> Self {
        self.entries.push(setting);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.entries.iter()
    }

    /// All settings with the given key
    pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Setting> + 'a {
        self.entries.iter().filter(move |s| s.key == key)
    }

    /// The setting with the given key; more than one is an error
    pub fn single(&self, entry: &str, key: &str) -> Result<Option<&Setting>> {
        let mut found = self.entries.iter().filter(|s| s.key == key);
        let first = found.next();
        if found.next().is_some() {
            return Err(TopologyError::option(
                entry,
                format!("'{}' may only be declared once", key),
            ));
        }
        Ok(first)
    }

    /// The setting with the given key, failing when absent
    pub fn required(&self, entry: &str, key: &str) -> Result<&Setting> {
        self.single(entry, key)?
            .ok_or_else(|| TopologyError::option(entry, format!("missing required '{}'", key)))
    }

    /// Fails on the first key outside `allowed`
    pub fn reject_unknown(&self, entry: &str, allowed: &[&str]) -> Result<()> {
        match self.entries.iter().find(|s| !allowed.contains(&s.key.as_str())) {
            Some(unknown) => Err(TopologyError::option(
                entry,
                format!("unknown option '{}'", unknown.key),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::new()
            .with(Setting::new("version").with_arg(SettingValue::String("1.32".into())))
            .with(Setting::new("replicas").with_arg(SettingValue::Integer(2)))
            .with(
                Setting::new("logging")
                    .with_arg(SettingValue::String("audit".into()))
                    .with_arg(SettingValue::String("api".into())),
            )
    }

    #[test]
    fn test_required_and_typed_access() {
        let s = settings();
        assert_eq!(s.required("c", "version").unwrap().string("c").unwrap(), "1.32");
        assert_eq!(s.required("c", "replicas").unwrap().integer("c").unwrap(), 2);
        assert_eq!(
            s.required("c", "logging").unwrap().strings("c").unwrap(),
            vec!["audit", "api"]
        );
    }

    #[test]
    fn test_missing_required() {
        let err = settings().required("orders", "engine-version").unwrap_err();
        assert!(err.to_string().contains("engine-version"));
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let s = settings();
        assert!(s.required("c", "version").unwrap().integer("c").is_err());
    }

    #[test]
    fn test_reject_unknown() {
        let s = settings();
        assert!(s.reject_unknown("c", &["version", "replicas", "logging"]).is_ok());
        let err = s.reject_unknown("c", &["version"]).unwrap_err();
        assert!(err.to_string().contains("replicas"));
    }

    #[test]
    fn test_duplicate_single_setting() {
        let s = settings().with(Setting::new("version").with_arg(SettingValue::String("x".into())));
        assert!(s.single("c", "version").is_err());
    }

    #[test]
    fn test_single_result_outlives_key() {
        let s = settings();
        let found = {
            let key = String::from("version");
            s.single("c", &key).unwrap()
        };
        assert_eq!(found.unwrap().string("c").unwrap(), "1.32");
    }
}
