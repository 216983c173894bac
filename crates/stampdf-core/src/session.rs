//! Pointer interaction sessions
//!
//! A drag or resize needs pointer moves from anywhere on screen, not just over
//! the element that was pressed. The host provides that through
//! [`PointerCapture`] (in the browser: window-level `pointermove`/`pointerup`
//! listeners). An [`InteractionSession`] is the only thing that acquires the
//! capture, and it releases it on every exit path, so no listener outlives the
//! session that installed it.

use crate::elements::ElementId;
use crate::geometry::{DocRect, DragTracker, Handle, ResizeStart, ScreenPoint};

/// Host hook for global pointer tracking.
pub trait PointerCapture {
    /// Start delivering pointer moves/releases from the whole window.
    fn acquire(&mut self);
    /// Stop delivering them.
    fn release(&mut self);
}

/// Capture for hosts that already route every pointer event to the editor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl PointerCapture for NoCapture {
    fn acquire(&mut self) {}
    fn release(&mut self) {}
}

/// What the active session is doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionKind {
    /// Press on an element; becomes a drag once it passes the threshold.
    Drag(DragTracker),
    Resize { handle: Handle, start: ResizeStart },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveSession {
    pub element: ElementId,
    pub kind: SessionKind,
}

/// Owns the single active session and the host capture it holds.
#[derive(Debug)]
pub struct InteractionSession<C: PointerCapture> {
    capture: C,
    active: Option<ActiveSession>,
}

impl<C: PointerCapture> InteractionSession<C> {
    pub fn new(capture: C) -> Self {
        Self {
            capture,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveSession> {
        self.active.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a press/drag session on `element`.
    ///
    /// Returns false (and does nothing) if another session is running.
    pub fn begin_drag(&mut self, element: ElementId, tracker: DragTracker) -> bool {
        self.begin(ActiveSession {
            element,
            kind: SessionKind::Drag(tracker),
        })
    }

    pub fn begin_resize(
        &mut self,
        element: ElementId,
        handle: Handle,
        rect: DocRect,
        press: ScreenPoint,
        scale: f64,
    ) -> bool {
        self.begin(ActiveSession {
            element,
            kind: SessionKind::Resize {
                handle,
                start: ResizeStart { rect, press, scale },
            },
        })
    }

    fn begin(&mut self, session: ActiveSession) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.capture.acquire();
        tracing::debug!(element = %session.element, "pointer session started");
        self.active = Some(session);
        true
    }

    /// End the active session, releasing the capture. No-op when idle.
    pub fn end(&mut self) -> Option<ActiveSession> {
        let ended = self.active.take()?;
        self.capture.release();
        tracing::debug!(element = %ended.element, "pointer session ended");
        Some(ended)
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }
}

impl<C: PointerCapture> Drop for InteractionSession<C> {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::DocPoint;

    /// Counts acquire/release calls and flags any unbalanced use.
    #[derive(Debug, Default)]
    pub(crate) struct CountingCapture {
        pub acquired: usize,
        pub released: usize,
        pub held: bool,
        pub misuse: bool,
    }

    impl PointerCapture for CountingCapture {
        fn acquire(&mut self) {
            if self.held {
                self.misuse = true;
            }
            self.held = true;
            self.acquired += 1;
        }

        fn release(&mut self) {
            if !self.held {
                self.misuse = true;
            }
            self.held = false;
            self.released += 1;
        }
    }

    fn tracker() -> DragTracker {
        DragTracker::new(DocPoint::new(0.0, 0.0), ScreenPoint::new(0.0, 0.0), 1.0, 5.0)
    }

    #[test]
    fn test_begin_and_end_balance_capture() {
        let mut session = InteractionSession::new(CountingCapture::default());
        assert!(session.begin_drag(ElementId(1), tracker()));
        assert!(session.capture().held);
        let ended = session.end().unwrap();
        assert_eq!(ended.element, ElementId(1));
        assert!(!session.capture().held);
        assert_eq!(session.capture().acquired, 1);
        assert_eq!(session.capture().released, 1);
    }

    #[test]
    fn test_second_session_is_refused() {
        let mut session = InteractionSession::new(CountingCapture::default());
        assert!(session.begin_drag(ElementId(1), tracker()));
        assert!(!session.begin_resize(
            ElementId(2),
            Handle::BottomRight,
            DocRect::default(),
            ScreenPoint::default(),
            1.0
        ));
        assert_eq!(session.active().unwrap().element, ElementId(1));
        assert_eq!(session.capture().acquired, 1);
        assert!(!session.capture().misuse);
    }

    #[test]
    fn test_end_when_idle_does_not_release() {
        let mut session = InteractionSession::new(CountingCapture::default());
        assert!(session.end().is_none());
        assert_eq!(session.capture().released, 0);
    }
}
