//! Field-by-field reader for one JSON configuration section.
//!
//! Every section struct reads its own keys through a [`SectionReader`]. Keys
//! that were never asked for are reported as warnings by [`SectionReader::finish`]
//! instead of being rejected, so an older firmware can boot with a newer file.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{ConfigError, ConfigWarning};

pub struct SectionReader<'a> {
    section: String,
    fields: &'a Map<String, Value>,
    consumed: Vec<&'static str>,
}

impl<'a> SectionReader<'a> {
    pub fn new(section: impl Into<String>, fields: &'a Map<String, Value>) -> Self {
        Self {
            section: section.into(),
            fields,
            consumed: Vec::new(),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    // `null` counts as "not set" and keeps the default.
    fn take(&mut self, key: &'static str) -> Option<&'a Value> {
        self.consumed.push(key);
        match self.fields.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn invalid_type(&self, key: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidType {
            section: self.section.clone(),
            key: key.to_string(),
            expected,
        }
    }

    fn invalid_value(&self, key: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.section.clone(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn string(&mut self, key: &'static str, target: &mut String) -> Result<(), ConfigError> {
        if let Some(value) = self.take(key) {
            let s = value
                .as_str()
                .ok_or_else(|| self.invalid_type(key, "string"))?;
            *target = s.to_string();
        }
        Ok(())
    }

    pub fn boolean(&mut self, key: &'static str, target: &mut bool) -> Result<(), ConfigError> {
        if let Some(value) = self.take(key) {
            *target = value
                .as_bool()
                .ok_or_else(|| self.invalid_type(key, "boolean"))?;
        }
        Ok(())
    }

    pub fn unsigned<T>(&mut self, key: &'static str, target: &mut T) -> Result<(), ConfigError>
    where
        T: TryFrom<u64>,
    {
        if let Some(value) = self.take(key) {
            let n = value
                .as_u64()
                .ok_or_else(|| self.invalid_type(key, "unsigned integer"))?;
            *target =
                T::try_from(n).map_err(|_| self.invalid_value(key, format!("{n} is out of range")))?;
        }
        Ok(())
    }

    pub fn optional_unsigned<T>(
        &mut self,
        key: &'static str,
        target: &mut Option<T>,
    ) -> Result<(), ConfigError>
    where
        T: TryFrom<u64>,
    {
        if let Some(value) = self.take(key) {
            let n = value
                .as_u64()
                .ok_or_else(|| self.invalid_type(key, "unsigned integer"))?;
            let converted =
                T::try_from(n).map_err(|_| self.invalid_value(key, format!("{n} is out of range")))?;
            *target = Some(converted);
        }
        Ok(())
    }

    pub fn list<T>(&mut self, key: &'static str, target: &mut Vec<T>) -> Result<(), ConfigError>
    where
        T: DeserializeOwned,
    {
        if let Some(value) = self.take(key) {
            if !value.is_array() {
                return Err(self.invalid_type(key, "array"));
            }
            *target = serde_json::from_value(value.clone())
                .map_err(|e| self.invalid_value(key, e.to_string()))?;
        }
        Ok(())
    }

    pub fn string_map(
        &mut self,
        key: &'static str,
        target: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = self.take(key) {
            let map = value
                .as_object()
                .ok_or_else(|| self.invalid_type(key, "object"))?;
            let mut out = BTreeMap::new();
            for (name, entry) in map {
                let s = entry
                    .as_str()
                    .ok_or_else(|| self.invalid_type(key, "object of strings"))?;
                out.insert(name.clone(), s.to_string());
            }
            *target = out;
        }
        Ok(())
    }

    /// Opens a nested object as its own reader, e.g. `logging.console_logger`.
    pub fn nested(&mut self, key: &'static str) -> Result<Option<SectionReader<'a>>, ConfigError> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(SectionReader::new(
                format!("{}.{}", self.section, key),
                map,
            ))),
            Some(_) => Err(self.invalid_type(key, "object")),
        }
    }

    pub fn finish(self, warnings: &mut Vec<ConfigWarning>) {
        for key in self.fields.keys() {
            if !self.consumed.iter().any(|known| known == key) {
                warnings.push(ConfigWarning::UnknownKey {
                    section: self.section.clone(),
                    key: key.clone(),
                });
            }
        }
    }
}
