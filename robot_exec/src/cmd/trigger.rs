//! # Triggers
//!
//! A trigger is a boolean condition polled once per tick, typically a gamepad button. Bind it to
//! a command with [`super::Scheduler::bind`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::rc::Rc;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Clone)]
pub struct Trigger {
    condition: Rc<dyn Fn() -> bool>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Trigger {
    pub fn new<F: Fn() -> bool + 'static>(condition: F) -> Self {
        Self {
            condition: Rc::new(condition),
        }
    }

    /// Current value of the condition.
    pub fn get(&self) -> bool {
        (self.condition)()
    }

    pub fn and(&self, other: &Trigger) -> Trigger {
        let (a, b) = (self.clone(), other.clone());
        Trigger::new(move || a.get() && b.get())
    }

    pub fn or(&self, other: &Trigger) -> Trigger {
        let (a, b) = (self.clone(), other.clone());
        Trigger::new(move || a.get() || b.get())
    }

    pub fn negate(&self) -> Trigger {
        let a = self.clone();
        Trigger::new(move || !a.get())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_combinators() {
        let a = Rc::new(Cell::new(false));
        let b = Rc::new(Cell::new(true));
        let (ta, tb) = {
            let (a, b) = (a.clone(), b.clone());
            (Trigger::new(move || a.get()), Trigger::new(move || b.get()))
        };

        assert!(!ta.and(&tb).get());
        assert!(ta.or(&tb).get());
        assert!(ta.negate().get());

        a.set(true);
        assert!(ta.and(&tb).get());
        b.set(false);
        assert!(!ta.and(&tb).negate().negate().get());
    }
}
