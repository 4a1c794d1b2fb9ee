use metro_transport::Status;

use crate::AudioEngineHandle;

type Starter = Box<dyn FnMut() -> anyhow::Result<AudioEngineHandle> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Nothing has asked for audio yet.
    Uninitialized,
    Running,
    Suspended,
    /// Opening the output failed; further requests are no-ops.
    Unavailable,
    Closed,
}

/// Lazily opened output engine shared by the click trigger and playback.
///
/// The engine is created on the first [`AudioContext::ensure_running`] call,
/// reused afterwards and resumed if it was suspended.
pub struct AudioContext {
    engine: Option<AudioEngineHandle>,
    state: ContextState,
    starter: Starter,
}

impl Default for AudioContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioContext {
    pub fn new() -> Self {
        Self::with_starter(crate::start)
    }

    pub fn with_starter<F>(starter: F) -> Self
    where
        F: FnMut() -> anyhow::Result<AudioEngineHandle> + Send + 'static,
    {
        Self {
            engine: None,
            state: ContextState::Uninitialized,
            starter: Box::new(starter),
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// The running engine, opening or resuming it first if needed.
    /// `None` when no output is available.
    pub fn ensure_running(&mut self) -> Option<&mut AudioEngineHandle> {
        match self.state {
            ContextState::Running => {}
            ContextState::Uninitialized | ContextState::Closed => match (self.starter)() {
                Ok(engine) => {
                    self.engine = Some(engine);
                    self.state = ContextState::Running;
                }
                Err(e) => {
                    log::warn!("audio output unavailable, clicks are muted: {e:#}");
                    self.state = ContextState::Unavailable;
                    return None;
                }
            },
            ContextState::Suspended => {
                let engine = self.engine.as_ref()?;
                if let Err(e) = engine.resume() {
                    log::warn!("could not resume audio output: {e:#}");
                    return None;
                }
                self.state = ContextState::Running;
            }
            ContextState::Unavailable => return None,
        }

        self.engine.as_mut()
    }

    /// The engine if it is already open; never opens one.
    pub fn engine(&mut self) -> Option<&mut AudioEngineHandle> {
        self.engine.as_mut()
    }

    pub fn suspend(&mut self) {
        if self.state != ContextState::Running {
            return;
        }
        if let Some(engine) = &self.engine {
            match engine.suspend() {
                Ok(()) => self.state = ContextState::Suspended,
                Err(e) => log::warn!("could not suspend audio output: {e:#}"),
            }
        }
    }

    /// Drain engine status and reclaim released buffers.
    pub fn poll(&mut self) -> Vec<Status> {
        match self.engine.as_mut() {
            Some(engine) => {
                let status = engine.drain_status();
                engine.collect();
                status
            }
            None => Vec::new(),
        }
    }

    /// Close the output stream. A later `ensure_running` opens a new one.
    pub fn dispose(&mut self) {
        if self.engine.take().is_some() {
            log::debug!("audio context disposed");
        }
        if self.state != ContextState::Unavailable {
            self.state = ContextState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing_context(attempts: Arc<AtomicUsize>) -> AudioContext {
        AudioContext::with_starter(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("no output device found")
        })
    }

    #[test]
    fn test_context_is_lazy() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let ctx = failing_context(attempts.clone());

        assert_eq!(ctx.state(), ContextState::Uninitialized);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unavailable_output_is_tried_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut ctx = failing_context(attempts.clone());

        assert!(ctx.ensure_running().is_none());
        assert!(ctx.ensure_running().is_none());

        assert_eq!(ctx.state(), ContextState::Unavailable);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_poll_and_dispose_without_engine() {
        let mut ctx = failing_context(Arc::new(AtomicUsize::new(0)));

        assert!(ctx.poll().is_empty());
        ctx.suspend();
        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Closed);
    }
}
