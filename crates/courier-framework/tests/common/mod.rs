#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Context, Inbound, ProcessingError, ProcessingResult};
use courier_framework::{Flow, Middleware, Outcome, Recovery};
use parking_lot::Mutex;

/// Shared log of phase names.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// What a recorder does in one of its phases.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub enum Act {
    #[default]
    Pass,
    ShortCircuit,
    Raise,
    Suppress,
}

/// A middleware that records every phase it runs.
pub struct Recorder {
    name: &'static str,
    trace: Trace,
    before: Act,
    after: Act,
    failure: Act,
}

impl Recorder {
    pub fn new(name: &'static str, trace: &Trace) -> Self {
        Self {
            name,
            trace: trace.clone(),
            before: Act::Pass,
            after: Act::Pass,
            failure: Act::Pass,
        }
    }

    pub fn short_circuit(mut self) -> Self {
        self.before = Act::ShortCircuit;
        self
    }

    pub fn raise_before(mut self) -> Self {
        self.before = Act::Raise;
        self
    }

    pub fn raise_after(mut self) -> Self {
        self.after = Act::Raise;
        self
    }

    pub fn suppress(mut self) -> Self {
        self.failure = Act::Suppress;
        self
    }
}

#[async_trait]
impl Middleware for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn before(&self, _ctx: &mut Context, _msg: &Inbound) -> ProcessingResult<Flow> {
        self.trace.push(format!("{}.before", self.name));
        match self.before {
            Act::ShortCircuit => Ok(Flow::ShortCircuit(Outcome::Success)),
            Act::Raise => Err(ProcessingError::middleware(format!("{} refused", self.name))),
            _ => Ok(Flow::Continue),
        }
    }

    async fn after(&self, _ctx: &mut Context, _msg: &Inbound, outcome: &Outcome) -> ProcessingResult<()> {
        let tag = if outcome.is_success() { "ok" } else { "failed" };
        self.trace.push(format!("{}.after({tag})", self.name));
        if self.after == Act::Raise {
            return Err(ProcessingError::middleware(format!("{} after failed", self.name)));
        }
        Ok(())
    }

    async fn on_failure(&self, _ctx: &mut Context, _msg: &Inbound, error: ProcessingError) -> Recovery {
        self.trace.push(format!("{}.failure", self.name));
        if self.failure == Act::Suppress {
            Recovery::Suppress
        } else {
            Recovery::Propagate(error)
        }
    }
}

pub fn recorders(trace: &Trace, names: &[&'static str]) -> Vec<Arc<dyn Middleware>> {
    names
        .iter()
        .map(|name| Arc::new(Recorder::new(*name, trace)) as Arc<dyn Middleware>)
        .collect()
}
