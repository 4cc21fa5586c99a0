//! Tri-state attribute values.
//!
//! A plan or state document distinguishes three situations for every field:
//! the field is not configured at all, it has a concrete value, or its value
//! only becomes known once some other object has been applied. In JSON these
//! are `null` (or an absent key), the value itself, and `{"unknown": true}`.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Attr<T> {
    #[default]
    Unset,
    Known(T),
    Pending,
}

impl<T> Attr<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Attr::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Attr::Known(_))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Attr::Unset)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Attr::Pending)
    }

    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Attr::Known(v),
            None => Attr::Unset,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Attr::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attr<U> {
        match self {
            Attr::Unset => Attr::Unset,
            Attr::Known(v) => Attr::Known(f(v)),
            Attr::Pending => Attr::Pending,
        }
    }

    /// Overwrite a tracked value with what the server reports. Fields the
    /// state never tracked stay `Unset`, so server-side defaults do not show up
    /// as drift.
    pub fn refresh(&mut self, remote: Option<T>) {
        if self.is_known() {
            *self = Attr::from_option(remote);
        }
    }

    /// `refresh` for reads, or take the remote value unconditionally when
    /// adopting an existing object.
    pub fn sync(&mut self, remote: Option<T>, adopt: bool) {
        if adopt {
            *self = Attr::from_option(remote);
        } else {
            self.refresh(remote);
        }
    }
}

impl Attr<bool> {
    pub fn is_true(&self) -> bool {
        matches!(self, Attr::Known(true))
    }
}

impl<T> From<T> for Attr<T> {
    fn from(value: T) -> Self {
        Attr::Known(value)
    }
}

impl<T: Serialize> Serialize for Attr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Attr::Unset => serializer.serialize_none(),
            Attr::Known(v) => v.serialize(serializer),
            Attr::Pending => serde_json::json!({ "unknown": true }).serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Attr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match raw {
            Value::Null => Ok(Attr::Unset),
            Value::Object(ref obj)
                if obj.len() == 1 && obj.get("unknown") == Some(&Value::Bool(true)) =>
            {
                Ok(Attr::Pending)
            }
            other => serde_json::from_value(other)
                .map(Attr::Known)
                .map_err(D::Error::custom),
        }
    }
}
