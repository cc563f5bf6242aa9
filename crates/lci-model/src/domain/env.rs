use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// One environment variable handed to a build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    name: String,
    value: String,
}

impl EnvVar {
    /// Create a variable, validating the name.
    ///
    /// Names must be non-empty, must not start with a digit and may only contain
    /// ASCII letters, digits and `_`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> ModelResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            value: value.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Render as `NAME=value`, the form accepted by `docker run -e`.
    pub fn to_assignment(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

fn validate_name(name: &str) -> ModelResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidEnvName(name.to_string()))
    }
}

/// Ordered set of variables for a build job.
///
/// Setting an existing name replaces its value in place, so iteration order is
/// the order names were first introduced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Env(Vec<EnvVar>);

impl Env {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|v| v.name == name).map(|v| v.value())
    }

    /// Insert or replace a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> ModelResult<()> {
        let var = EnvVar::new(name, value)?;
        match self.0.iter_mut().find(|v| v.name == var.name) {
            Some(slot) => slot.value = var.value,
            None => self.0.push(var),
        }
        Ok(())
    }

    /// Overlay `other` on top of `self`; names in `other` win.
    pub fn merged(&self, other: &Env) -> Env {
        let mut out = self.clone();
        for var in other.iter() {
            match out.0.iter_mut().find(|v| v.name == var.name) {
                Some(slot) => slot.value = var.value.clone(),
                None => out.0.push(var.clone()),
            }
        }
        out
    }
}

impl TryFrom<Vec<(String, String)>> for Env {
    type Error = ModelError;

    fn try_from(pairs: Vec<(String, String)>) -> Result<Self, Self::Error> {
        let mut env = Env::new();
        for (k, v) in pairs {
            env.set(k, v)?;
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut env = Env::new();
        env.set("FOO", "one").unwrap();
        env.set("BAR", "x").unwrap();
        env.set("FOO", "two").unwrap();

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("FOO"), Some("two"));
        let names: Vec<_> = env.iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["FOO", "BAR"]);
    }

    #[test]
    fn invalid_names_are_rejected() {
        for bad in ["", "1ABC", "A-B", "A B", "ÄB"] {
            assert!(
                matches!(EnvVar::new(bad, "v"), Err(ModelError::InvalidEnvName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(EnvVar::new("_PRIVATE_1", "v").is_ok());
    }

    #[test]
    fn merged_overlays_other() {
        let mut base = Env::new();
        base.set("FOO", "base").unwrap();
        base.set("BAR", "bar").unwrap();

        let mut other = Env::new();
        other.set("FOO", "override").unwrap();
        other.set("BAZ", "baz").unwrap();

        let merged = base.merged(&other);
        assert_eq!(merged.get("FOO"), Some("override"));
        assert_eq!(merged.get("BAR"), Some("bar"));
        assert_eq!(merged.get("BAZ"), Some("baz"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn assignment_form() {
        let var = EnvVar::new("CI", "true").unwrap();
        assert_eq!(var.to_assignment(), "CI=true");
    }

    #[test]
    fn serde_is_a_plain_array() {
        let mut env = Env::new();
        env.set("FOO", "bar").unwrap();
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"[{"name":"FOO","value":"bar"}]"#);
        let back: Env = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
