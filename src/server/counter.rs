//! # Counter Service
//!
//! The one piece of business state: the number currently shown on the
//! displays. It is owned here and changed only through [`CounterService::apply`];
//! every change is pushed to all open subscriptions.

use log::debug;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

/// Numbers run from 0 to `QUEUE_SIZE - 1` and wrap around.
pub const QUEUE_SIZE: u8 = 100;

/// An admin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Prev,
    Reset,
    /// Re-send the current number without changing it
    Repeat,
    /// Jump to a number; ignored unless it lies in `0..QUEUE_SIZE`
    Goto(i64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("command object has no `action`")]
    MissingAction,
    #[error("goto needs a value")]
    MissingValue,
    #[error("goto value `{0}` is not a number")]
    NotANumber(String),
    #[error("unsupported command payload")]
    Unsupported,
}

impl Command {
    /// Parse a push-channel frame.
    ///
    /// Accepted forms: `next`, `"next"`, `{"action": "next"}` and
    /// `{"action": "goto", "value": 12}` (the value may also be a string).
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let text = text.trim();
        let payload = serde_json::from_str::<Value>(text)
            .unwrap_or_else(|_| Value::String(text.to_string()));

        match payload {
            Value::String(name) => Self::from_action(&name, None),
            Value::Object(fields) => {
                let action = fields
                    .get("action")
                    .and_then(Value::as_str)
                    .ok_or(CommandError::MissingAction)?;
                Self::from_action(action, fields.get("value"))
            }
            _ => Err(CommandError::Unsupported),
        }
    }

    fn from_action(action: &str, value: Option<&Value>) -> Result<Self, CommandError> {
        match action.trim() {
            "next" => Ok(Self::Next),
            "prev" => Ok(Self::Prev),
            "reset" => Ok(Self::Reset),
            "repeat" => Ok(Self::Repeat),
            "goto" => {
                let value = value.ok_or(CommandError::MissingValue)?;
                parse_number(value).map(Self::Goto)
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_number(value: &Value) -> Result<i64, CommandError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| CommandError::NotANumber(value.to_string()))
}

/// Receiving end of a counter subscription.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<u8>,
}

impl Subscription {
    /// Next published number, `None` once the service is gone.
    pub async fn recv(&mut self) -> Option<u8> {
        self.receiver.recv().await
    }
}

struct CounterState {
    value: u8,
    subscribers: Vec<mpsc::UnboundedSender<u8>>,
}

/// Single-writer counter with subscriber fan-out.
pub struct CounterService {
    state: Mutex<CounterState>,
}

impl Default for CounterService {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CounterState {
                value: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_value(&self) -> u8 {
        self.lock().value
    }

    /// Apply a command and publish the result.
    ///
    /// # Returns
    /// - `Some(value)`: the number after the command, sent to every subscriber
    /// - `None`: the command was ignored (out-of-range `goto`), nothing sent
    pub fn apply(&self, command: Command) -> Option<u8> {
        let mut state = self.lock();

        let next = match command {
            Command::Next => (state.value + 1) % QUEUE_SIZE,
            Command::Prev => (state.value + QUEUE_SIZE - 1) % QUEUE_SIZE,
            Command::Reset => 0,
            Command::Repeat => state.value,
            Command::Goto(target) => match u8::try_from(target) {
                Ok(target) if target < QUEUE_SIZE => target,
                _ => {
                    debug!("Ignoring goto {}", target);
                    return None;
                }
            },
        };

        state.value = next;
        // Closed subscriptions drop out here
        state.subscribers.retain(|tx| tx.send(next).is_ok());
        debug!(
            "{:?} -> {} ({} subscribers)",
            command,
            next,
            state.subscribers.len()
        );

        Some(next)
    }

    /// Register a listener. The current number is delivered first.
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        // Cannot fail, the receiver is still in hand
        let _ = tx.send(state.value);
        state.subscribers.push(tx);
        Subscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(Command::parse("next"), Ok(Command::Next));
        assert_eq!(Command::parse("\"prev\""), Ok(Command::Prev));
        assert_eq!(Command::parse(" reset \n"), Ok(Command::Reset));
        assert_eq!(Command::parse(r#"{"action":"repeat"}"#), Ok(Command::Repeat));
        assert_eq!(
            Command::parse(r#"{"action":"goto","value":42}"#),
            Ok(Command::Goto(42))
        );
        assert_eq!(
            Command::parse(r#"{"action":"goto","value":"7"}"#),
            Ok(Command::Goto(7))
        );
        assert_eq!(
            Command::parse(r#"{"action":"goto","value":150}"#),
            Ok(Command::Goto(150))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Command::parse("launch"),
            Err(CommandError::Unknown("launch".to_string()))
        );
        assert_eq!(
            Command::parse(r#"{"value":3}"#),
            Err(CommandError::MissingAction)
        );
        assert_eq!(
            Command::parse(r#"{"action":"goto"}"#),
            Err(CommandError::MissingValue)
        );
        assert!(matches!(
            Command::parse(r#"{"action":"goto","value":"abc"}"#),
            Err(CommandError::NotANumber(_))
        ));
        assert!(matches!(
            Command::parse(r#"{"action":"goto","value":2.5}"#),
            Err(CommandError::NotANumber(_))
        ));
        assert_eq!(Command::parse("[1,2]"), Err(CommandError::Unsupported));
    }

    #[test]
    fn test_wraps_around() {
        let counter = CounterService::new();

        assert_eq!(counter.apply(Command::Prev), Some(99));
        assert_eq!(counter.apply(Command::Next), Some(0));

        counter.apply(Command::Goto(99));
        assert_eq!(counter.apply(Command::Next), Some(0));
    }

    #[test]
    fn test_hundred_steps_round_trip() {
        let counter = CounterService::new();

        for _ in 0..100 {
            counter.apply(Command::Next);
        }
        assert_eq!(counter.current_value(), 0);

        for _ in 0..100 {
            counter.apply(Command::Prev);
        }
        assert_eq!(counter.current_value(), 0);

        for _ in 0..100 {
            counter.apply(Command::Next);
            counter.apply(Command::Prev);
        }
        assert_eq!(counter.current_value(), 0);
    }

    #[test]
    fn test_goto_bounds() {
        let counter = CounterService::new();

        assert_eq!(counter.apply(Command::Goto(12)), Some(12));
        assert_eq!(counter.apply(Command::Goto(100)), None);
        assert_eq!(counter.apply(Command::Goto(-1)), None);
        assert_eq!(counter.apply(Command::Goto(i64::MAX)), None);
        assert_eq!(counter.current_value(), 12);
        assert_eq!(counter.apply(Command::Goto(0)), Some(0));
        assert_eq!(counter.apply(Command::Reset), Some(0));
    }

    #[tokio::test]
    async fn test_repeat_redelivers_without_change() {
        let counter = CounterService::new();
        counter.apply(Command::Goto(5));

        let mut sub = counter.subscribe();
        assert_eq!(sub.recv().await, Some(5));

        for _ in 0..3 {
            assert_eq!(counter.apply(Command::Repeat), Some(5));
            assert_eq!(sub.recv().await, Some(5));
        }
        assert_eq!(counter.current_value(), 5);
    }

    #[tokio::test]
    async fn test_fan_out_skips_closed_subscribers() {
        let counter = CounterService::new();
        let mut first = counter.subscribe();
        let second = counter.subscribe();
        assert_eq!(counter.subscriber_count(), 2);

        drop(second);
        counter.apply(Command::Next);

        assert_eq!(counter.subscriber_count(), 1);
        assert_eq!(first.recv().await, Some(0));
        assert_eq!(first.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_ignored_goto_publishes_nothing() {
        let counter = CounterService::new();
        let mut sub = counter.subscribe();
        assert_eq!(sub.recv().await, Some(0));

        counter.apply(Command::Goto(250));
        counter.apply(Command::Next);

        assert_eq!(sub.recv().await, Some(1));
    }
}
