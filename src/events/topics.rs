//! Event feed topics
//!
//! A topic is `*`, an area wildcard such as `stream.*`, or one exact event
//! name. Topics are checked against the known events when a client
//! subscribes, so a typo is answered instead of silently matching nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::SystemEvent;
use crate::error::AppError;

/// Subsystem that raised an event; the prefix of its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventArea {
    Auth,
    Devices,
    Stream,
    PubSub,
    Log,
    Error,
}

impl EventArea {
    pub const ALL: [EventArea; 6] = [
        EventArea::Auth,
        EventArea::Devices,
        EventArea::Stream,
        EventArea::PubSub,
        EventArea::Log,
        EventArea::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Devices => "devices",
            Self::Stream => "stream",
            Self::PubSub => "pubsub",
            Self::Log => "log",
            Self::Error => "error",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|area| area.as_str() == prefix)
    }
}

/// One subscription entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Topic {
    All,
    Area(EventArea),
    Event(&'static str),
}

impl Topic {
    pub fn matches(&self, event: &SystemEvent) -> bool {
        match self {
            Self::All => true,
            Self::Area(area) => event.area() == *area,
            Self::Event(name) => event.event_name() == *name,
        }
    }
}

impl FromStr for Topic {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::All);
        }
        let topic = match s.strip_suffix(".*") {
            Some(prefix) => EventArea::from_prefix(prefix).map(Self::Area),
            None => SystemEvent::NAMES
                .into_iter()
                .find(|name| *name == s)
                .map(Self::Event),
        };
        topic.ok_or_else(|| AppError::BadRequest(format!("Unknown event topic: {}", s)))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Area(area) => write!(f, "{}.*", area.as_str()),
            Self::Event(name) => f.write_str(name),
        }
    }
}

/// Topics one feed client listens to; empty lets nothing through
#[derive(Debug, Clone, Default)]
pub struct TopicFilter {
    topics: BTreeSet<Topic>,
}

impl TopicFilter {
    /// Parse every entry before touching the filter
    pub fn parse(topics: &[String]) -> Result<Vec<Topic>, AppError> {
        topics.iter().map(|t| t.parse()).collect()
    }

    pub fn subscribe(&mut self, topics: impl IntoIterator<Item = Topic>) {
        self.topics.extend(topics);
    }

    pub fn unsubscribe(&mut self, topics: &[Topic]) {
        self.topics.retain(|t| !topics.contains(t));
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn matches(&self, event: &SystemEvent) -> bool {
        self.topics.iter().any(|topic| topic.matches(event))
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(Topic::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event() -> SystemEvent {
        SystemEvent::StreamStateChanged {
            state: "awaiting_answer".to_string(),
        }
    }

    #[test]
    fn test_parse_topics() {
        assert_eq!("*".parse::<Topic>().unwrap(), Topic::All);
        assert_eq!(
            "pubsub.*".parse::<Topic>().unwrap(),
            Topic::Area(EventArea::PubSub)
        );
        assert_eq!(
            " stream.analytics ".parse::<Topic>().unwrap(),
            Topic::Event("stream.analytics")
        );
        assert!(matches!(
            "stream.bogus".parse::<Topic>(),
            Err(AppError::BadRequest(_))
        ));
        assert!("camera.*".parse::<Topic>().is_err());
    }

    #[test]
    fn test_topic_matching() {
        let event = state_event();
        assert!(Topic::All.matches(&event));
        assert!(Topic::Area(EventArea::Stream).matches(&event));
        assert!(Topic::Event("stream.state_changed").matches(&event));
        assert!(!Topic::Area(EventArea::PubSub).matches(&event));
        assert!(!Topic::Event("stream.analytics").matches(&event));

        let error = SystemEvent::Error {
            message: "x".to_string(),
        };
        assert!(Topic::Area(EventArea::Error).matches(&error));
        assert!(Topic::Event("error").matches(&error));
    }

    #[test]
    fn test_every_event_name_is_a_topic() {
        for name in SystemEvent::NAMES {
            let topic: Topic = name.parse().unwrap();
            assert_eq!(topic.to_string(), name);
        }
    }

    #[test]
    fn test_filter_subscribe_and_unsubscribe() {
        let mut filter = TopicFilter::default();
        assert!(filter.is_empty());
        assert!(!filter.matches(&state_event()));

        let topics =
            TopicFilter::parse(&["log.*".to_string(), "stream.state_changed".to_string()])
                .unwrap();
        filter.subscribe(topics);
        assert!(filter.matches(&state_event()));
        assert_eq!(filter.topics(), vec!["log.*", "stream.state_changed"]);

        filter.unsubscribe(&[Topic::Event("stream.state_changed")]);
        assert!(!filter.matches(&state_event()));
        assert_eq!(filter.topics(), vec!["log.*"]);
    }

    #[test]
    fn test_filter_parse_is_all_or_nothing() {
        let err = TopicFilter::parse(&["log.*".to_string(), "nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
