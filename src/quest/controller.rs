//! Quest Controller
//!
//! Drives one quest's state machine through its bound [`QuestBehavior`].
//!
//! ```text
//! Unbound --bind--> Bound(no state) --request_state--> Bound(S) --request_state--> Bound(S')
//!    ^          \                                        |
//!    |           +--resume_state--> Bound(S)             |
//!    +---------------------- unbind / suspend ------------+
//! ```
//!
//! A transition always finishes `on_deinit` and `on_exit` of the old state
//! before the new state is installed, entered and initialized. `suspend` and
//! `resume_state` only deinitialize and initialize, so progress made in
//! `on_enter` is never replayed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use super::behavior::{QuestBehavior, StateBehavior, StateHandle};
use super::error::QuestError;
use super::sink::LogSink;

/// Result of a successful state request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State that was exited, if one was active
    pub from: Option<StateHandle>,
    /// State that was entered
    pub to: StateHandle,
}

#[derive(Default)]
struct ActiveState {
    handle: Option<StateHandle>,
    behavior: Option<Rc<dyn StateBehavior>>,
}

/// Marks the controller busy for the duration of a lifecycle operation
struct TransitionGuard<'a>(&'a Cell<bool>);

impl<'a> TransitionGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Result<Self, QuestError> {
        if flag.replace(true) {
            return Err(QuestError::ReentrantTransition);
        }
        Ok(Self(flag))
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Per-quest state machine.
///
/// Single-threaded: all methods take `&self` so callbacks that hold a
/// reference to their own controller can be detected instead of corrupting
/// the exit/enter order. No `RefCell` borrow is held while a callback runs.
pub struct QuestController {
    name: String,
    sink: Arc<dyn LogSink>,
    resolver: RefCell<Option<Rc<dyn QuestBehavior>>>,
    active: RefCell<ActiveState>,
    busy: Cell<bool>,
}

impl QuestController {
    pub fn new(name: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            name: name.into(),
            sink,
            resolver: RefCell::new(None),
            active: RefCell::new(ActiveState::default()),
            busy: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a resolver. The controller starts with no active state.
    pub fn bind(&self, behavior: Box<dyn QuestBehavior>) -> Result<(), QuestError> {
        let _guard = TransitionGuard::acquire(&self.busy)?;
        let mut resolver = self.resolver.borrow_mut();
        if resolver.is_some() {
            return Err(QuestError::AlreadyBound);
        }
        *resolver = Some(Rc::from(behavior));
        debug!(quest = %self.name, "quest behavior bound");
        Ok(())
    }

    fn resolve(&self, handle: StateHandle) -> Result<Rc<dyn StateBehavior>, QuestError> {
        let resolver = self.resolver.borrow().clone().ok_or(QuestError::NotBound)?;
        match resolver.resolve(handle)? {
            Some(state) => Ok(state),
            None => {
                self.sink.log(&format!("{}: no such state {}", self.name, handle));
                Err(QuestError::UnknownState(handle))
            }
        }
    }

    fn install(&self, handle: StateHandle, state: &Rc<dyn StateBehavior>) -> Option<StateHandle> {
        let mut active = self.active.borrow_mut();
        active.behavior = Some(Rc::clone(state));
        active.handle.replace(handle)
    }

    /// Resolve `handle` and make it the active state.
    ///
    /// An unresolvable handle logs one diagnostic, leaves the active state
    /// untouched and returns the recoverable [`QuestError::UnknownState`].
    pub fn request_state(&self, handle: StateHandle) -> Result<Transition, QuestError> {
        let _guard = TransitionGuard::acquire(&self.busy)?;
        let next = self.resolve(handle)?;

        let previous = self.active.borrow().behavior.clone();
        if let Some(previous) = previous {
            // A failed deinit or exit keeps the old state active
            previous.on_deinit()?;
            previous.on_exit()?;
        }

        let from = self.install(handle, &next);

        next.on_enter()?;
        next.on_init()?;
        debug!(quest = %self.name, from = ?from, to = %handle, "quest state entered");

        Ok(Transition { from, to: handle })
    }

    /// Pick up `handle` as a state that was entered earlier, running only
    /// `on_init`. Used when a paused or loaded quest becomes active again.
    pub fn resume_state(&self, handle: StateHandle) -> Result<(), QuestError> {
        let _guard = TransitionGuard::acquire(&self.busy)?;
        let state = self.resolve(handle)?;

        let previous = self.active.borrow().behavior.clone();
        if let Some(previous) = previous {
            previous.on_deinit()?;
        }

        self.install(handle, &state);
        state.on_init()?;
        debug!(quest = %self.name, state = %handle, "quest state resumed");
        Ok(())
    }

    /// Run `on_update` on the active state, if any
    pub fn update(&self) -> Result<(), QuestError> {
        let _guard = TransitionGuard::acquire(&self.busy)?;
        if self.resolver.borrow().is_none() {
            return Err(QuestError::NotBound);
        }

        let current = self.active.borrow().behavior.clone();
        match current {
            Some(state) => state.on_update(),
            None => Ok(()),
        }
    }

    /// Deinitialize and exit the active state, then detach the resolver.
    ///
    /// The controller ends up unbound even when a callback fails; the first
    /// failure is still returned.
    pub fn unbind(&self) -> Result<Option<StateHandle>, QuestError> {
        self.detach(true)
    }

    /// Deinitialize the active state without exiting it, then detach the
    /// resolver. The state can later be picked up with [`Self::resume_state`].
    pub fn suspend(&self) -> Result<Option<StateHandle>, QuestError> {
        self.detach(false)
    }

    fn detach(&self, exit: bool) -> Result<Option<StateHandle>, QuestError> {
        let _guard = TransitionGuard::acquire(&self.busy)?;
        if self.resolver.borrow().is_none() {
            return Err(QuestError::NotBound);
        }

        let previous = std::mem::take(&mut *self.active.borrow_mut());
        let finished = match previous.behavior {
            Some(state) => {
                let deinit = state.on_deinit();
                let exited = if exit { state.on_exit() } else { Ok(()) };
                deinit.and(exited)
            }
            None => Ok(()),
        };

        self.resolver.borrow_mut().take();
        debug!(quest = %self.name, last = ?previous.handle, exit, "quest behavior unbound");

        finished.map(|()| previous.handle)
    }

    /// Ask the bound behavior for data to keep in a snapshot
    pub fn save_data(&self) -> Result<Option<serde_json::Value>, QuestError> {
        let _guard = TransitionGuard::acquire(&self.busy)?;
        let resolver = self.resolver.borrow().clone().ok_or(QuestError::NotBound)?;
        resolver.save()
    }

    pub fn is_bound(&self) -> bool {
        self.resolver.borrow().is_some()
    }

    /// Handle of the active state
    pub fn active_handle(&self) -> Option<StateHandle> {
        self.active.borrow().handle
    }

    /// Whether a lifecycle operation is currently running
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }
}
