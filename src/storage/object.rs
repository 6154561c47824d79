//! Stored values and their expiry metadata.

use bytes::Bytes;

/// Payload held under a key.
///
/// Only strings exist today; other payload kinds would be new variants and
/// leave the keyspace contract untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
}

impl Value {
    /// Raw bytes of the payload.
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Value::String(b) => b,
        }
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::String(b)
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::String(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Bytes::from(s))
    }
}

/// A value plus its absolute expiry.
///
/// `expires_at` is milliseconds since the Unix epoch; `None` means the object
/// never expires. An object is live while `expires_at` is `None` or strictly
/// after the observing instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub value: Value,
    pub expires_at: Option<u64>,
}

impl Object {
    /// An object that never expires.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// An object that expires at `expires_at_ms`.
    pub fn expiring(value: impl Into<Value>, expires_at_ms: u64) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at_ms),
        }
    }

    #[inline]
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at.map_or(true, |at| at > now_ms)
    }

    /// Milliseconds left before expiry, `None` when the object never expires.
    /// Zero for an object that is already gone.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at.map(|at| at.saturating_sub(now_ms))
    }
}
