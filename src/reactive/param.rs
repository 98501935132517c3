use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ModelError;

/// Receives the name of every parameter or computation read inside a recording scope.
pub trait Tracker {
    fn track(&mut self, key: &'static str);
}

/// A named, typed parameter slot that may be unset.
///
/// Reads that go through a [`Tracker`] are recorded as dependencies of the computation
/// being evaluated. Writes report whether the stored value actually changed so the owner
/// can invalidate exactly the computations that read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Param<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T: Clone + PartialEq> Param<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }

    pub fn with_value(name: &'static str, value: T) -> Self {
        Self {
            name,
            value: Some(value),
        }
    }

    pub fn with_optional(name: &'static str, value: Option<T>) -> Self {
        Self { name, value }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Tracked read of a required parameter.
    pub fn get(&self, tracker: &mut dyn Tracker) -> Result<&T, ModelError> {
        tracker.track(self.name);
        self.value.as_ref().ok_or(ModelError::UnsetParameter(self.name))
    }

    /// Tracked read of an optional parameter.
    pub fn get_opt(&self, tracker: &mut dyn Tracker) -> Option<&T> {
        tracker.track(self.name);
        self.value.as_ref()
    }

    /// Tracked read falling back to `default` while unset.
    pub fn get_or(&self, tracker: &mut dyn Tracker, default: T) -> T {
        self.get_opt(tracker).cloned().unwrap_or(default)
    }

    /// Untracked read for outputs and diagnostics.
    pub fn peek(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Stores `value`; returns `true` only when it differs from the current value.
    pub fn set(&mut self, value: T) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        self.value = Some(value);
        true
    }

    pub fn clear(&mut self) -> bool {
        self.value.take().is_some()
    }
}

/// Type-erased parameter that can be written from a configuration value.
pub trait ConfigParam {
    fn name(&self) -> &'static str;

    /// Writes a JSON value; `null` clears the parameter. Returns whether it changed.
    fn set_json(&mut self, value: &Value) -> Result<bool, ModelError>;
}

impl<T> ConfigParam for Param<T>
where
    T: Clone + PartialEq + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn set_json(&mut self, value: &Value) -> Result<bool, ModelError> {
        if value.is_null() {
            return Ok(self.clear());
        }
        let parsed: T = serde_json::from_value(value.clone())
            .map_err(|e| ModelError::invalid(self.name, e.to_string()))?;
        Ok(self.set(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<&'static str>);

    impl Tracker for Recorder {
        fn track(&mut self, key: &'static str) {
            self.0.push(key);
        }
    }

    #[test]
    fn test_unset_read_is_an_error() {
        let param: Param<f64> = Param::new("capacity");
        let mut recorder = Recorder::default();
        assert!(matches!(
            param.get(&mut recorder),
            Err(ModelError::UnsetParameter("capacity"))
        ));
        assert_eq!(recorder.0, vec!["capacity"]);
        assert_eq!(param.get_or(&mut recorder, 3.0), 3.0);
    }

    #[test]
    fn test_equal_write_is_not_a_change() {
        let mut param = Param::with_value("periods", vec![1.0, 1.0]);
        assert!(!param.set(vec![1.0, 1.0]));
        assert!(param.set(vec![0.5, 1.0]));
        assert!(param.clear());
        assert!(!param.clear());
    }

    #[test]
    fn test_set_json() {
        let mut param: Param<Vec<f64>> = Param::new("price");
        assert!(param.set_json(&serde_json::json!([0.1, 0.2])).unwrap());
        assert!(!param.set_json(&serde_json::json!([0.1, 0.2])).unwrap());
        assert!(param.set_json(&serde_json::json!("oops")).is_err());
        assert!(param.set_json(&Value::Null).unwrap());
        assert!(!param.is_set());
    }
}
