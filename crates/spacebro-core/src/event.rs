//! Event names and delivered events.

use spacebro_protocol::Payload;
use std::fmt;

/// The wildcard event name.
pub const WILDCARD: &str = "*";

/// Key under which hooks and listeners are registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// A single event name.
    Named(String),
    /// Every event.
    Wildcard,
}

impl EventKey {
    /// Whether this key applies to the given event name.
    #[must_use]
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            EventKey::Named(name) => name == event_name,
            EventKey::Wildcard => true,
        }
    }

    /// Whether this is the wildcard key.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, EventKey::Wildcard)
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        if name == WILDCARD {
            EventKey::Wildcard
        } else {
            EventKey::Named(name.to_string())
        }
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        if name == WILDCARD {
            EventKey::Wildcard
        } else {
            EventKey::Named(name)
        }
    }
}

impl From<&String> for EventKey {
    fn from(name: &String) -> Self {
        EventKey::from(name.as_str())
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKey::Named(name) => write!(f, "{}", name),
            EventKey::Wildcard => write!(f, "{}", WILDCARD),
        }
    }
}

/// An event as handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Name the event was received under.
    pub name: String,
    /// Event data, after unpackers ran.
    pub data: Payload,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(name: impl Into<String>, data: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// The sending client's name, if the payload carries one.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.data.sender()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_key() {
        assert_eq!(EventKey::from("*"), EventKey::Wildcard);
        assert_eq!(EventKey::from("hello"), EventKey::Named("hello".into()));
        assert!(EventKey::Wildcard.matches("anything"));
        assert!(!EventKey::from("hello").matches("world"));
        assert_eq!(EventKey::Wildcard.to_string(), "*");
    }
}
