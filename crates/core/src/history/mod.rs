//! Snapshot-based undo/redo over [`Composition`].
//!
//! `present` is always an independent value; the past and future stacks hold
//! whole snapshots. Interactive drags mutate `present` through [`History::preview`]
//! and are collapsed into one undo step by [`History::finalize_preview`].

use std::collections::VecDeque;

use crate::{config::HistoryConfig, model::Composition, Result};

#[derive(Debug, Clone)]
pub struct History {
    past: VecDeque<Composition>,
    present: Composition,
    future: Vec<Composition>,
    max_depth: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(Composition::default(), &HistoryConfig::default())
    }
}

impl History {
    pub fn new(initial: Composition, config: &HistoryConfig) -> Self {
        Self {
            past: VecDeque::new(),
            present: initial,
            future: Vec::new(),
            max_depth: config.max_depth.max(1),
        }
    }

    pub fn present(&self) -> &Composition {
        &self.present
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    /// Applies `mutator` to a copy of the present and installs the result,
    /// pushing the previous present onto the undo stack.
    pub fn commit<R>(&mut self, mutator: impl FnOnce(&mut Composition) -> R) -> R {
        let mut next = self.present.clone();
        let out = mutator(&mut next);
        self.install(next);
        out
    }

    /// Like [`History::commit`] but installs the result only when `mutator`
    /// succeeds. On error the present and both stacks are untouched.
    pub fn try_commit<R>(
        &mut self,
        mutator: impl FnOnce(&mut Composition) -> Result<R>,
    ) -> Result<R> {
        let mut next = self.present.clone();
        let out = mutator(&mut next)?;
        self.install(next);
        Ok(out)
    }

    /// Mutates the present in place without touching either stack.
    pub fn preview<R>(&mut self, mutator: impl FnOnce(&mut Composition) -> R) -> R {
        mutator(&mut self.present)
    }

    /// Snapshot to hand back to [`History::finalize_preview`] when a drag ends.
    pub fn begin_preview(&self) -> Composition {
        self.present.clone()
    }

    /// Records `base` as the state before a run of previews.
    pub fn finalize_preview(&mut self, base: Composition) {
        self.push_past(base);
        self.future.clear();
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, previous);
        self.future.push(current);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, next);
        self.push_past(current);
        true
    }

    fn install(&mut self, next: Composition) {
        let previous = std::mem::replace(&mut self.present, next);
        self.push_past(previous);
        self.future.clear();
    }

    fn push_past(&mut self, snapshot: Composition) {
        self.past.push_back(snapshot);
        while self.past.len() > self.max_depth {
            self.past.pop_front();
        }
    }
}
