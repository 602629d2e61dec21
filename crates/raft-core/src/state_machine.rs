//! # state_machine
//!
//! why: raft only orders commands; what they mean is supplied by the host
//! relations: node.rs applies committed entries and serves read-only requests
//! what: StateMachine trait, FnStateMachine adapter for an injected apply function

use serde_json::Value;

/// Deterministic application of committed commands.
///
/// An `Err` from `apply` is reported to the waiting client as an error
/// status; it never stops later entries from being applied.
pub trait StateMachine {
    fn apply(&mut self, command: &Value) -> Result<Value, String>;

    /// Answer a read-only command without changing state.
    fn query(&self, command: &Value) -> Result<Value, String>;
}

/// Wraps an apply function and the state it mutates.
pub struct FnStateMachine<St, F> {
    state: St,
    apply_fn: F,
}

impl<St, F> FnStateMachine<St, F>
where
    St: Clone,
    F: FnMut(&mut St, &Value) -> Result<Value, String>,
{
    pub fn new(state: St, apply_fn: F) -> Self {
        Self { state, apply_fn }
    }

    pub fn state(&self) -> &St {
        &self.state
    }
}

impl<St, F> StateMachine for FnStateMachine<St, F>
where
    St: Clone,
    F: FnMut(&mut St, &Value) -> Result<Value, String> + Clone,
{
    fn apply(&mut self, command: &Value) -> Result<Value, String> {
        (self.apply_fn)(&mut self.state, command)
    }

    // runs the apply function against a scratch copy so reads never mutate
    fn query(&self, command: &Value) -> Result<Value, String> {
        let mut scratch = self.state.clone();
        let mut apply_fn = self.apply_fn.clone();
        apply_fn(&mut scratch, command)
    }
}
