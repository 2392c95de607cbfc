//! Three-state memo slot.
//!
//! A slot distinguishes "never computed" from "computed and found nothing".
//! Fallback decisions in the default-resource resolver depend on that
//! distinction, so memoised state never uses a bare `Option`.

use serde::{Deserialize, Serialize};

/// The memoisation state of a lazily computed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Slot<T> {
  /// Not computed yet, or invalidated since.
  #[default]
  Unset,
  /// Computed; there was nothing to hold.
  Empty,
  /// Computed and holding a value.
  Value(T),
}

impl<T> Slot<T> {
  pub fn is_unset(&self) -> bool { matches!(self, Self::Unset) }

  /// `true` once the slot has been computed, whether or not it holds a value.
  pub fn is_set(&self) -> bool { !self.is_unset() }

  pub fn value(&self) -> Option<&T> {
    match self {
      Self::Value(v) => Some(v),
      _ => None,
    }
  }

  pub fn value_mut(&mut self) -> Option<&mut T> {
    match self {
      Self::Value(v) => Some(v),
      _ => None,
    }
  }

  /// Reset to [`Slot::Unset`].
  pub fn clear(&mut self) { *self = Self::Unset; }

  pub fn take(&mut self) -> Self { std::mem::take(self) }

  /// Map the held value, preserving the unset/empty distinction.
  pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> Slot<U> {
    match self {
      Self::Unset => Slot::Unset,
      Self::Empty => Slot::Empty,
      Self::Value(v) => Slot::Value(f(v)),
    }
  }
}

impl<T> From<Option<T>> for Slot<T> {
  fn from(value: Option<T>) -> Self {
    match value {
      Some(v) => Self::Value(v),
      None => Self::Empty,
    }
  }
}

impl<T: Default> Slot<T> {
  /// The computed value, with [`Slot::Empty`] read as `T::default()`.
  /// Returns `None` only while unset.
  pub fn computed(&self) -> Option<T>
  where
    T: Clone,
  {
    match self {
      Self::Unset => None,
      Self::Empty => Some(T::default()),
      Self::Value(v) => Some(v.clone()),
    }
  }

  /// Promote an empty or unset slot to a default value and borrow it.
  pub fn get_or_insert_default(&mut self) -> &mut T {
    if !matches!(self, Self::Value(_)) {
      *self = Self::Value(T::default());
    }
    match self {
      Self::Value(v) => v,
      _ => unreachable!("slot was just populated"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_is_unset() {
    let slot: Slot<u8> = Slot::default();
    assert!(slot.is_unset());
    assert_eq!(slot.value(), None);
  }

  #[test]
  fn empty_is_set_but_holds_nothing() {
    let slot: Slot<u8> = None.into();
    assert!(slot.is_set());
    assert_eq!(slot.value(), None);
  }

  #[test]
  fn computed_reads_empty_as_default() {
    let empty: Slot<Vec<u8>> = Slot::Empty;
    let unset: Slot<Vec<u8>> = Slot::Unset;
    assert_eq!(empty.computed(), Some(Vec::new()));
    assert_eq!(unset.computed(), None);
  }

  #[test]
  fn get_or_insert_default_promotes_empty() {
    let mut slot: Slot<Vec<u8>> = Slot::Empty;
    slot.get_or_insert_default().push(7);
    assert_eq!(slot, Slot::Value(vec![7]));
  }

  #[test]
  fn serde_roundtrip_keeps_state() {
    let json = serde_json::to_string(&Slot::<u8>::Empty).unwrap();
    assert_eq!(json, r#"{"state":"empty"}"#);
    let back: Slot<u8> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Slot::Empty);
  }
}
