//! Event sources driving the world
//!
//! Every source follows the [`EventSource`] contract: the world asks all of
//! them for the time of their next event and pops from the earliest. The
//! internal [`ScheduledUpdates`] queue goes through the same contract.

use std::collections::VecDeque;

use ferry_core::{ConfigError, EventSource, HostAddress, MessageId, Settings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Something that happens at a point in virtual time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SimEvent {
    /// Open a link between two hosts
    ConnectionUp { a: HostAddress, b: HostAddress },
    /// Tear down the link between two hosts
    ConnectionDown { a: HostAddress, b: HostAddress },
    /// Create a message at `from`
    CreateMessage {
        id: MessageId,
        from: HostAddress,
        to: HostAddress,
        size: u64,
    },
    /// Run a host-update pass, nothing else
    ScheduledUpdate,
}

/// A scripted event with its time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub time: f64,
    #[serde(flatten)]
    pub event: SimEvent,
}

impl TimedEvent {
    pub fn new(time: f64, event: SimEvent) -> Self {
        Self { time, event }
    }
}

/// A fixed, time-ordered list of events
///
/// Events with equal times keep their input order.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: VecDeque<TimedEvent>,
}

impl EventQueue {
    pub fn new(mut events: Vec<TimedEvent>) -> Self {
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            events: events.into(),
        }
    }

    /// Read `Events.script`, an empty queue when absent
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let events = settings.namespace("Events");
        if !events.contains("script") {
            return Ok(Self::default());
        }
        let script: Vec<TimedEvent> = events.deserialize("script")?;
        Ok(Self::new(script))
    }

    pub fn into_events(self) -> Vec<TimedEvent> {
        self.events.into()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSource<SimEvent> for EventQueue {
    fn next_event_time(&self) -> f64 {
        self.events.front().map_or(f64::INFINITY, |e| e.time)
    }

    fn pop_next_event(&mut self) -> Option<SimEvent> {
        self.events.pop_front().map(|e| e.event)
    }

    fn name(&self) -> &str {
        "script"
    }
}

/// The world's own queue of pending host-update passes
#[derive(Debug, Clone, Default)]
pub struct ScheduledUpdates {
    times: VecDeque<f64>,
}

impl ScheduledUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a pass at `time`; duplicates collapse into one
    pub fn add(&mut self, time: f64) {
        let at = self.times.partition_point(|&t| t < time);
        if self.times.get(at) != Some(&time) {
            self.times.insert(at, time);
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl EventSource<SimEvent> for ScheduledUpdates {
    fn next_event_time(&self) -> f64 {
        self.times.front().copied().unwrap_or(f64::INFINITY)
    }

    fn pop_next_event(&mut self) -> Option<SimEvent> {
        self.times.pop_front().map(|_| SimEvent::ScheduledUpdate)
    }

    fn name(&self) -> &str {
        "scheduled-updates"
    }
}

/// Settings of the random message generator
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Time between two messages, 0 disables generation
    pub interval: f64,
    pub min_size: u64,
    pub max_size: u64,
    pub prefix: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interval: 30.0,
            min_size: 50_000,
            max_size: 100_000,
            prefix: "M".to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let events = settings.namespace("Events");
        let defaults = Self::default();
        let config = Self {
            interval: events.f64_or("interval", defaults.interval)?,
            min_size: events.u64_or("minSize", defaults.min_size)?,
            max_size: events.u64_or("maxSize", defaults.max_size)?,
            prefix: events.str_or("prefix", &defaults.prefix)?,
        };
        if config.interval < 0.0 {
            return Err(ConfigError::invalid(
                events.full_key("interval"),
                "must not be negative",
            ));
        }
        if config.min_size == 0 || config.max_size < config.min_size {
            return Err(ConfigError::invalid(
                events.full_key("maxSize"),
                format!(
                    "size range [{}, {}] is empty",
                    config.min_size, config.max_size
                ),
            ));
        }
        Ok(config)
    }
}

/// Creates a message between two random distinct hosts every interval
#[derive(Debug, Clone)]
pub struct MessageGenerator {
    config: GeneratorConfig,
    hosts: u32,
    end_time: f64,
    next_time: f64,
    counter: u64,
    rng: StdRng,
}

impl MessageGenerator {
    /// First message at `config.interval`, none after `end_time`
    pub fn new(config: GeneratorConfig, hosts: usize, end_time: f64, seed: u64) -> Self {
        let next_time = if config.interval > 0.0 && hosts >= 2 && config.interval <= end_time {
            config.interval
        } else {
            f64::INFINITY
        };
        Self {
            config,
            hosts: hosts as u32,
            end_time,
            next_time,
            counter: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generated(&self) -> u64 {
        self.counter
    }
}

impl EventSource<SimEvent> for MessageGenerator {
    fn next_event_time(&self) -> f64 {
        self.next_time
    }

    fn pop_next_event(&mut self) -> Option<SimEvent> {
        if !self.next_time.is_finite() {
            return None;
        }
        let from = self.rng.random_range(0..self.hosts);
        // Shift past `from` so the pair is always distinct
        let mut to = self.rng.random_range(0..self.hosts - 1);
        if to >= from {
            to += 1;
        }
        let size = self
            .rng
            .random_range(self.config.min_size..=self.config.max_size);
        self.counter += 1;
        let id = MessageId::new(format!("{}{}", self.config.prefix, self.counter));
        trace!(message = %id, from, to, size, time = self.next_time, "Generated message");

        self.next_time += self.config.interval;
        if self.next_time > self.end_time {
            self.next_time = f64::INFINITY;
        }
        Some(SimEvent::CreateMessage {
            id,
            from: HostAddress(from),
            to: HostAddress(to),
            size,
        })
    }

    fn name(&self) -> &str {
        "message-generator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_time_ordered_and_stable() {
        let up = SimEvent::ConnectionUp {
            a: HostAddress(0),
            b: HostAddress(1),
        };
        let down = SimEvent::ConnectionDown {
            a: HostAddress(0),
            b: HostAddress(1),
        };
        let mut queue = EventQueue::new(vec![
            TimedEvent::new(5.0, down.clone()),
            TimedEvent::new(1.0, up.clone()),
            TimedEvent::new(5.0, SimEvent::ScheduledUpdate),
        ]);
        assert_eq!(queue.next_event_time(), 1.0);
        assert_eq!(queue.pop_next_event(), Some(up));
        assert_eq!(queue.pop_next_event(), Some(down));
        assert_eq!(queue.pop_next_event(), Some(SimEvent::ScheduledUpdate));
        assert_eq!(queue.next_event_time(), f64::INFINITY);
        assert_eq!(queue.pop_next_event(), None);
    }

    #[test]
    fn test_script_from_settings() {
        let settings = Settings::from_toml_str(
            r#"
            [Events]
            script = [
                { time = 10, type = "ConnectionUp", a = 0, b = 1 },
                { time = 2.5, type = "CreateMessage", id = "m1", from = 0, to = 1, size = 100 },
            ]
            "#,
        )
        .unwrap();
        let mut queue = EventQueue::from_settings(&settings).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_event_time(), 2.5);
        assert!(matches!(
            queue.pop_next_event(),
            Some(SimEvent::CreateMessage { size: 100, .. })
        ));
    }

    #[test]
    fn test_scheduled_updates_dedupe() {
        let mut updates = ScheduledUpdates::new();
        updates.add(3.0);
        updates.add(1.0);
        updates.add(3.0);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates.next_event_time(), 1.0);
        assert_eq!(updates.pop_next_event(), Some(SimEvent::ScheduledUpdate));
        assert_eq!(updates.next_event_time(), 3.0);
    }

    #[test]
    fn test_generator_creates_distinct_pairs() {
        let config = GeneratorConfig {
            interval: 10.0,
            min_size: 100,
            max_size: 200,
            prefix: "G".to_string(),
        };
        let mut generator = MessageGenerator::new(config, 3, 50.0, 9);
        let mut times = Vec::new();
        while generator.next_event_time().is_finite() {
            times.push(generator.next_event_time());
            match generator.pop_next_event() {
                Some(SimEvent::CreateMessage { id, from, to, size }) => {
                    assert_ne!(from, to);
                    assert!(to.0 < 3 && from.0 < 3);
                    assert!((100..=200).contains(&size));
                    assert!(id.as_str().starts_with('G'));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(times, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(generator.generated(), 5);
    }

    #[test]
    fn test_generator_needs_two_hosts() {
        let generator = MessageGenerator::new(GeneratorConfig::default(), 1, 100.0, 0);
        assert_eq!(generator.next_event_time(), f64::INFINITY);
    }

    #[test]
    fn test_generator_config_validation() {
        let settings =
            Settings::from_toml_str("[Events]\nminSize = 10\nmaxSize = 5\n").unwrap();
        assert!(GeneratorConfig::from_settings(&settings).is_err());
    }
}
