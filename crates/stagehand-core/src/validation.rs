//! Field validation helpers for `requestData`.
//!
//! Each validator returns the typed field value, or a [`RequestError`] whose
//! status tells the client whether the field was missing, mistyped, empty,
//! or out of range. The `optional_*` variants return `None` for an absent
//! field and validate it otherwise.

use serde_json::{Map, Value};

use crate::errors::RequestError;
use crate::request::Request;

impl Request {
    /// Whether `requestData` holds a non-null value at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.request_data.get(key).is_some_and(|v| !v.is_null())
    }

    /// Require a non-null value at `key`.
    pub fn validate_basic(&self, key: &str) -> Result<&Value, RequestError> {
        match self.request_data.get(key) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(RequestError::missing_field(key)),
        }
    }

    /// Require a number within `min..=max`.
    pub fn validate_number(&self, key: &str, min: f64, max: f64) -> Result<f64, RequestError> {
        let number = self
            .validate_basic(key)?
            .as_f64()
            .ok_or_else(|| RequestError::invalid_type(key, "a number"))?;
        check_range(key, number, min, max)?;
        Ok(number)
    }

    /// Require an integer within `min..=max`.
    pub fn validate_integer(&self, key: &str, min: i64, max: i64) -> Result<i64, RequestError> {
        let number = self
            .validate_basic(key)?
            .as_i64()
            .ok_or_else(|| RequestError::invalid_type(key, "an integer"))?;
        check_range(key, number, min, max)?;
        Ok(number)
    }

    /// Require a string, optionally non-empty.
    pub fn validate_string(&self, key: &str, allow_empty: bool) -> Result<&str, RequestError> {
        let text = self
            .validate_basic(key)?
            .as_str()
            .ok_or_else(|| RequestError::invalid_type(key, "a string"))?;
        if !allow_empty && text.is_empty() {
            return Err(RequestError::empty(key));
        }
        Ok(text)
    }

    /// Require a boolean.
    pub fn validate_boolean(&self, key: &str) -> Result<bool, RequestError> {
        self.validate_basic(key)?
            .as_bool()
            .ok_or_else(|| RequestError::invalid_type(key, "a boolean"))
    }

    /// Require an object, optionally non-empty.
    pub fn validate_object(
        &self,
        key: &str,
        allow_empty: bool,
    ) -> Result<&Map<String, Value>, RequestError> {
        let object = self
            .validate_basic(key)?
            .as_object()
            .ok_or_else(|| RequestError::invalid_type(key, "an object"))?;
        if !allow_empty && object.is_empty() {
            return Err(RequestError::empty(key));
        }
        Ok(object)
    }

    /// Require an array, optionally non-empty.
    pub fn validate_array(&self, key: &str, allow_empty: bool) -> Result<&Vec<Value>, RequestError> {
        let array = self
            .validate_basic(key)?
            .as_array()
            .ok_or_else(|| RequestError::invalid_type(key, "an array"))?;
        if !allow_empty && array.is_empty() {
            return Err(RequestError::empty(key));
        }
        Ok(array)
    }

    /// [`Self::validate_number`] for a field that may be absent.
    pub fn optional_number(&self, key: &str, min: f64, max: f64) -> Result<Option<f64>, RequestError> {
        self.optional(key, |req| req.validate_number(key, min, max))
    }

    /// [`Self::validate_integer`] for a field that may be absent.
    pub fn optional_integer(&self, key: &str, min: i64, max: i64) -> Result<Option<i64>, RequestError> {
        self.optional(key, |req| req.validate_integer(key, min, max))
    }

    /// [`Self::validate_string`] for a field that may be absent.
    pub fn optional_string(&self, key: &str, allow_empty: bool) -> Result<Option<&str>, RequestError> {
        self.optional(key, |req| req.validate_string(key, allow_empty))
    }

    /// [`Self::validate_boolean`] for a field that may be absent.
    pub fn optional_boolean(&self, key: &str) -> Result<Option<bool>, RequestError> {
        self.optional(key, |req| req.validate_boolean(key))
    }

    /// [`Self::validate_object`] for a field that may be absent.
    pub fn optional_object(
        &self,
        key: &str,
        allow_empty: bool,
    ) -> Result<Option<&Map<String, Value>>, RequestError> {
        self.optional(key, |req| req.validate_object(key, allow_empty))
    }

    fn optional<'a, T>(
        &'a self,
        key: &str,
        validate: impl FnOnce(&'a Self) -> Result<T, RequestError>,
    ) -> Result<Option<T>, RequestError> {
        if self.contains(key) {
            validate(self).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn check_range<T>(key: &str, value: T, min: T, max: T) -> Result<(), RequestError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(RequestError::out_of_range(
            key,
            format!("is below the minimum of `{min}`"),
        ));
    }
    if value > max {
        return Err(RequestError::out_of_range(
            key,
            format!("is above the maximum of `{max}`"),
        ));
    }
    Ok(())
}
