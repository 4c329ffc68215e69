/*!
 * Pending-request correlation.
 *
 * Some devices answer a query with a bare value whose meaning depends on what
 * was asked. When such a command is sent, the correlator records the kind of
 * answer expected under a correlation key (a channel, a controller id). When
 * a response arrives, rules that declare a correlation consult that record
 * before falling back to classification by shape alone.
 *
 * Entries are evicted lazily once they are older than the staleness window;
 * every evaluation checks staleness first, so no timer is needed.
 */
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use avlink_core::types::Value;

use crate::matcher::{Event, Fields, ResponseRule};

/// Reinterprets the fields of an ambiguous response; `None` if it does not fit
pub type InterpretFn = fn(&Fields) -> Option<Fields>;

/// An event type together with the function producing its fields
#[derive(Debug, Clone)]
pub struct Interpretation {
    /// Event type emitted
    pub event_type: String,
    /// Field mapping
    pub interpret: InterpretFn,
}

/// Interpretation used when a request of a given shape is pending
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Expected shape of the pending request
    pub shape: String,
    /// Interpretation to apply
    pub then: Interpretation,
}

/// How a response rule relates to pending requests
#[derive(Debug, Clone)]
pub struct Correlation {
    /// Field holding the correlation key
    pub key_field: String,
    /// Take the key from the pending request when the response lacks it
    pub infer_key: bool,
    /// Interpretations by pending shape, tried in order
    pub candidates: Vec<Candidate>,
    /// Interpretation when no candidate applies; `None` drops the response
    pub fallback: Option<Interpretation>,
}

impl Correlation {
    /// Correlate on `key_field`
    pub fn keyed_by<S: Into<String>>(key_field: S) -> Self {
        Self {
            key_field: key_field.into(),
            infer_key: false,
            candidates: Vec::new(),
            fallback: None,
        }
    }

    /// Infer the key from the oldest suitable pending request
    pub fn infer_key(mut self) -> Self {
        self.infer_key = true;
        self
    }

    /// When `shape` is pending, emit `event_type` through `interpret`
    pub fn when_pending<S, T>(mut self, shape: S, event_type: T, interpret: InterpretFn) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        self.candidates.push(Candidate {
            shape: shape.into(),
            then: Interpretation {
                event_type: event_type.into(),
                interpret,
            },
        });
        self
    }

    /// Otherwise emit `event_type` through `interpret`
    pub fn otherwise<T: Into<String>>(mut self, event_type: T, interpret: InterpretFn) -> Self {
        self.fallback = Some(Interpretation {
            event_type: event_type.into(),
            interpret,
        });
        self
    }

    fn shapes<'a>(&'a self, rule: &'a ResponseRule) -> Vec<&'a str> {
        if self.candidates.is_empty() {
            vec![rule.event_type.as_str()]
        } else {
            self.candidates.iter().map(|c| c.shape.as_str()).collect()
        }
    }
}

/// A request waiting for its reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    /// Correlation key
    pub key: String,
    /// Expected response shape
    pub expected: String,
    /// Command that created the request
    pub command: String,
    /// When the command was built
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Pending requests of one driver instance, at most one per key
#[derive(Debug)]
pub struct Correlator {
    pending: HashMap<String, PendingRequest>,
    window: Duration,
}

impl Correlator {
    /// Create a correlator with the given staleness window
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
        }
    }

    /// The staleness window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a pending request, replacing any entry for the same key
    pub fn register<K, E, C>(
        &mut self,
        key: K,
        expected: E,
        command: C,
        now: DateTime<Utc>,
    ) -> Option<PendingRequest>
    where
        K: Into<String>,
        E: Into<String>,
        C: Into<String>,
    {
        let request = PendingRequest {
            key: key.into(),
            expected: expected.into(),
            command: command.into(),
            created_at: now,
        };
        debug!(key = %request.key, expected = %request.expected, "Registered pending request");
        let superseded = self.pending.insert(request.key.clone(), request);
        if let Some(old) = &superseded {
            debug!(key = %old.key, expected = %old.expected, "Superseded pending request");
        }
        superseded
    }

    /// The pending request for `key`
    pub fn pending(&self, key: &str) -> Option<&PendingRequest> {
        self.pending.get(key)
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every pending request
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Drop requests older than the window, oldest first
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let window = self.window;
        let mut stale: Vec<PendingRequest> = Vec::new();
        self.pending.retain(|_, request| {
            if request.age(now) > window {
                stale.push(request.clone());
                false
            } else {
                true
            }
        });
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));

        stale
            .into_iter()
            .map(|request| {
                let age_ms = request.age(now).num_milliseconds().max(0) as u64;
                warn!(
                    key = %request.key,
                    expected = %request.expected,
                    command = %request.command,
                    age_ms,
                    "Evicted unanswered request"
                );
                Event::RequestEvicted {
                    key: request.key,
                    expected: request.expected,
                    command: request.command,
                    age_ms,
                }
            })
            .collect()
    }

    /// Turn the fields a rule extracted into events
    ///
    /// Stale requests are evicted first and reported ahead of the response.
    /// Rules without a correlation pass straight through.
    pub fn resolve(&mut self, rule: &ResponseRule, mut fields: Fields, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = self.evict_stale(now);

        let Some(correlation) = &rule.correlation else {
            events.push(Event::response(&rule.event_type, &rule.id, fields));
            return events;
        };

        let mut key = fields.get(&correlation.key_field).map(Value::to_string);
        if key.is_none() && correlation.infer_key {
            key = self.oldest_expecting(&correlation.shapes(rule));
            if let Some(inferred) = &key {
                fields.insert(correlation.key_field.clone(), key_value(inferred));
            }
        }

        if correlation.candidates.is_empty() {
            if let Some(key) = &key {
                if self.pending(key).is_some_and(|p| p.expected == rule.event_type) {
                    self.pending.remove(key);
                    debug!(key = %key, rule = %rule.id, "Resolved pending request");
                }
            }
            events.push(Event::response(&rule.event_type, &rule.id, fields));
            return events;
        }

        let expected = key
            .as_deref()
            .and_then(|k| self.pending(k))
            .map(|p| p.expected.clone());

        if let (Some(key), Some(expected)) = (&key, expected) {
            for candidate in correlation.candidates.iter().filter(|c| c.shape == expected) {
                if let Some(interpreted) = (candidate.then.interpret)(&fields) {
                    self.pending.remove(key);
                    debug!(key = %key, rule = %rule.id, shape = %expected, "Resolved pending request");
                    events.push(Event::response(&candidate.then.event_type, &rule.id, interpreted));
                    return events;
                }
            }
        }

        match &correlation.fallback {
            Some(fallback) => {
                if let Some(interpreted) = (fallback.interpret)(&fields) {
                    events.push(Event::response(&fallback.event_type, &rule.id, interpreted));
                }
            }
            None => debug!(rule = %rule.id, "No pending request for uncorrelated response"),
        }

        events
    }

    fn oldest_expecting(&self, shapes: &[&str]) -> Option<String> {
        self.pending
            .values()
            .filter(|p| shapes.contains(&p.expected.as_str()))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)))
            .map(|p| p.key.clone())
    }
}

fn key_value(key: &str) -> Value {
    key.parse::<i64>()
        .map(Value::Integer)
        .unwrap_or_else(|_| Value::String(key.to_string()))
}
