//! # Tunables
//!
//! Named parameters which can be changed from the driver station while the robot runs. Each
//! tunable is published to telemetry under `Tuning/<key>` when created and whenever it changes.
//! Updates arrive in [`comms_if::ds::DsPacket::tunables`] and are applied by
//! [`TuningManager::update_all`] once per main tick, which is also when change callbacks fire.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{ds::TunableUpdate, tm::TmValue};
use log::{debug, warn};
use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::telemetry::LogContext;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Types which can be tuned.
pub trait TunableValue: Copy + PartialEq + std::fmt::Debug + Into<TmValue> + 'static {
    fn from_tm(value: &TmValue) -> Option<Self>;
}

/// Type-erased view of a tunable held by the manager.
trait TunableEntry {
    /// Stage a new value, returns false if the value has the wrong type.
    fn offer(&mut self, value: &TmValue) -> bool;

    /// Apply any staged value, firing callbacks if it changed.
    fn apply(&mut self, tm: &LogContext);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A handle to a tunable value.
#[derive(Clone)]
pub struct Tunable<T: TunableValue> {
    state: Rc<RefCell<TunableState<T>>>,
}

struct TunableState<T: TunableValue> {
    key: String,
    value: T,
    staged: Option<T>,
    callbacks: Vec<Box<dyn FnMut(T)>>,
}

/// Registry of every tunable in the robot.
pub struct TuningManager {
    entries: HashMap<String, Rc<RefCell<dyn TunableEntry>>>,
    order: Vec<String>,
    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TunableValue for f64 {
    fn from_tm(value: &TmValue) -> Option<Self> {
        value.as_f64()
    }
}

impl TunableValue for i64 {
    fn from_tm(value: &TmValue) -> Option<Self> {
        value.as_i64()
    }
}

impl TunableValue for bool {
    fn from_tm(value: &TmValue) -> Option<Self> {
        value.as_bool()
    }
}

impl<T: TunableValue> Tunable<T> {
    pub fn get(&self) -> T {
        self.state.borrow().value
    }

    pub fn key(&self) -> String {
        self.state.borrow().key.clone()
    }

    /// Register a callback fired with the new value whenever it changes.
    pub fn on_change<F: FnMut(T) + 'static>(&self, callback: F) {
        self.state.borrow_mut().callbacks.push(Box::new(callback));
    }
}

impl<T: TunableValue> TunableEntry for TunableState<T> {
    fn offer(&mut self, value: &TmValue) -> bool {
        match T::from_tm(value) {
            Some(v) => {
                self.staged = Some(v);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, tm: &LogContext) {
        let new_value = match self.staged.take() {
            Some(v) if v != self.value => v,
            _ => return,
        };

        debug!("Tunable {} changed {:?} -> {:?}", self.key, self.value, new_value);
        self.value = new_value;
        tm.put(&self.key, new_value);

        for cb in self.callbacks.iter_mut() {
            cb(new_value);
        }
    }
}

impl TuningManager {
    pub fn new() -> Self {
        Self::with_context(LogContext::new("Tuning"))
    }

    pub fn with_context(tm: LogContext) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            tm,
        }
    }

    /// Create and register a tunable.
    ///
    /// Registering a key twice replaces the first registration.
    pub fn register<T: TunableValue>(&mut self, key: &str, default: T) -> Tunable<T> {
        let state = Rc::new(RefCell::new(TunableState {
            key: key.to_string(),
            value: default,
            staged: None,
            callbacks: Vec::new(),
        }));

        if self.entries.insert(key.to_string(), state.clone()).is_some() {
            warn!("Tunable {} registered twice", key);
        } else {
            self.order.push(key.to_string());
        }

        self.tm.put(key, default);

        Tunable { state }
    }

    /// Apply the given updates. Unknown keys and mistyped values are logged and skipped.
    pub fn update_all(&mut self, updates: &[TunableUpdate]) {
        for update in updates {
            match self.entries.get(&update.key) {
                Some(entry) => {
                    if !entry.borrow_mut().offer(&update.value) {
                        warn!(
                            "Tunable {} given a value of the wrong type: {:?}",
                            update.key, update.value
                        );
                    }
                }
                None => warn!("Update for unknown tunable {}", update.key),
            }
        }

        for key in self.order.iter() {
            if let Some(entry) = self.entries.get(key) {
                entry.borrow_mut().apply(&self.tm);
            }
        }
    }

    pub fn num_tunables(&self) -> usize {
        self.order.len()
    }
}

impl Default for TuningManager {
    fn default() -> Self {
        Self::new()
    }
}
