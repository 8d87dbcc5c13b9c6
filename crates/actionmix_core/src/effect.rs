//! One-shot values carried in state.

use std::mem;

/// A value meant to be acted on once (e.g. "show a snackbar", "clear the
/// text field").
///
/// A new state carries a fresh effect; whoever reacts to it calls
/// [`consume`](Effect::consume), after which it is spent for every later
/// reader of the same state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Effect<T> {
    /// Not yet consumed.
    Fresh(T),
    /// Already consumed, or never set.
    #[default]
    Spent,
}

impl<T> Effect<T> {
    /// Creates a fresh effect.
    pub fn new(value: T) -> Self {
        Effect::Fresh(value)
    }

    /// Takes the payload and marks the effect spent.
    pub fn consume(&mut self) -> Option<T> {
        match mem::replace(self, Effect::Spent) {
            Effect::Fresh(value) => Some(value),
            Effect::Spent => None,
        }
    }

    /// Returns true once the payload has been taken.
    pub fn is_spent(&self) -> bool {
        matches!(self, Effect::Spent)
    }

    /// Borrows the payload without consuming it.
    pub fn peek(&self) -> Option<&T> {
        match self {
            Effect::Fresh(value) => Some(value),
            Effect::Spent => None,
        }
    }
}
