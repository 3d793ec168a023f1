//! # Application event: a topic plus string arguments.
//!
//! Events are created by a publisher, handed to every subscriber of their
//! topic exactly once, then discarded. Arguments stay strings on the wire;
//! typed access goes through [`Event::str`] and [`Event::int`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Named-topic event with a string-keyed argument map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Topic used for subscriber matching, e.g. `"player.levelup"`.
    pub topic: String,
    /// Event arguments.
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl Event {
    /// Creates an event without arguments.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            args: HashMap::new(),
        }
    }

    /// Adds (or replaces) one argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(name.into(), value.to_string());
        self
    }

    /// Raw argument lookup.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    /// Returns the argument `name` or [`EventError::MissingArg`].
    pub fn str(&self, name: &str) -> Result<&str, EventError> {
        self.arg(name)
            .ok_or_else(|| EventError::MissingArg(name.to_string()))
    }

    /// Parses the argument `name` as a signed integer.
    pub fn int(&self, name: &str) -> Result<i64, EventError> {
        let raw = self.str(name)?;
        raw.trim().parse().map_err(|_| EventError::NotANumber {
            name: name.to_string(),
            value: raw.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_report_instead_of_panicking() {
        let ev = Event::new("player.levelup")
            .with_arg("id", 42)
            .with_arg("name", "ann");

        assert_eq!(ev.int("id"), Ok(42));
        assert_eq!(ev.str("name"), Ok("ann"));
        assert_eq!(
            ev.int("name"),
            Err(EventError::NotANumber {
                name: "name".into(),
                value: "ann".into()
            })
        );
        assert_eq!(ev.str("level"), Err(EventError::MissingArg("level".into())));
    }

    #[test]
    fn missing_args_field_decodes_as_empty() {
        let ev: Event = serde_json::from_str(r#"{"topic":"server.ready"}"#).unwrap();
        assert_eq!(ev, Event::new("server.ready"));
    }
}
