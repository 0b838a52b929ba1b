//! Lifecycle listener trait for whole-cache state changes.

use crate::listener::{MapLifecycleEvent, MapLifecycleKind};

/// A listener for whole-cache lifecycle events.
///
/// Lifecycle listeners are registered against the handle itself, not against
/// entries. All methods default to no-ops.
pub trait MapLifecycleListener: Send + Sync {
    /// Called when the cache is truncated.
    fn on_truncated(&self, event: &MapLifecycleEvent) {
        let _ = event;
    }

    /// Called when the cache is destroyed on the grid.
    fn on_destroyed(&self, event: &MapLifecycleEvent) {
        let _ = event;
    }

    /// Called when the local handle is released.
    fn on_released(&self, event: &MapLifecycleEvent) {
        let _ = event;
    }

    /// Called when the session channel is lost outside a clean close.
    fn on_disconnected(&self, event: &MapLifecycleEvent) {
        let _ = event;
    }
}

/// Dispatches one lifecycle event to the matching listener method.
pub fn dispatch_lifecycle_event(listener: &dyn MapLifecycleListener, event: &MapLifecycleEvent) {
    match event.kind() {
        MapLifecycleKind::Truncated => listener.on_truncated(event),
        MapLifecycleKind::Destroyed => listener.on_destroyed(event),
        MapLifecycleKind::Released => listener.on_released(event),
        MapLifecycleKind::Disconnected => listener.on_disconnected(event),
    }
}

type LifecycleFn = Box<dyn Fn(&MapLifecycleEvent) + Send + Sync>;

/// A [`MapLifecycleListener`] built from closures.
pub struct FnLifecycleListener {
    on_truncated: Option<LifecycleFn>,
    on_destroyed: Option<LifecycleFn>,
    on_released: Option<LifecycleFn>,
    on_disconnected: Option<LifecycleFn>,
}

impl FnLifecycleListener {
    /// Creates a new builder.
    pub fn builder() -> FnLifecycleListenerBuilder {
        FnLifecycleListenerBuilder::new()
    }
}

impl MapLifecycleListener for FnLifecycleListener {
    fn on_truncated(&self, event: &MapLifecycleEvent) {
        if let Some(ref f) = self.on_truncated {
            f(event);
        }
    }

    fn on_destroyed(&self, event: &MapLifecycleEvent) {
        if let Some(ref f) = self.on_destroyed {
            f(event);
        }
    }

    fn on_released(&self, event: &MapLifecycleEvent) {
        if let Some(ref f) = self.on_released {
            f(event);
        }
    }

    fn on_disconnected(&self, event: &MapLifecycleEvent) {
        if let Some(ref f) = self.on_disconnected {
            f(event);
        }
    }
}

impl std::fmt::Debug for FnLifecycleListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLifecycleListener")
            .field("on_truncated", &self.on_truncated.is_some())
            .field("on_destroyed", &self.on_destroyed.is_some())
            .field("on_released", &self.on_released.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .finish()
    }
}

/// Builder for [`FnLifecycleListener`].
#[derive(Default)]
pub struct FnLifecycleListenerBuilder {
    on_truncated: Option<LifecycleFn>,
    on_destroyed: Option<LifecycleFn>,
    on_released: Option<LifecycleFn>,
    on_disconnected: Option<LifecycleFn>,
}

impl FnLifecycleListenerBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Sets the handler for truncate events.
    pub fn on_truncated<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapLifecycleEvent) + Send + Sync + 'static,
    {
        self.on_truncated = Some(Box::new(f));
        self
    }

    /// Sets the handler for destroy events.
    pub fn on_destroyed<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapLifecycleEvent) + Send + Sync + 'static,
    {
        self.on_destroyed = Some(Box::new(f));
        self
    }

    /// Sets the handler for release events.
    pub fn on_released<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapLifecycleEvent) + Send + Sync + 'static,
    {
        self.on_released = Some(Box::new(f));
        self
    }

    /// Sets the handler for disconnect events.
    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapLifecycleEvent) + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Box::new(f));
        self
    }

    /// Builds the listener.
    pub fn build(self) -> FnLifecycleListener {
        FnLifecycleListener {
            on_truncated: self.on_truncated,
            on_destroyed: self.on_destroyed,
            on_released: self.on_released,
            on_disconnected: self.on_disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispatch_routes_by_kind() {
        let truncated = Arc::new(AtomicU32::new(0));
        let destroyed = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&truncated);
        let d = Arc::clone(&destroyed);

        let listener = FnLifecycleListener::builder()
            .on_truncated(move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .on_destroyed(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        dispatch_lifecycle_event(
            &listener,
            &MapLifecycleEvent::new("c", MapLifecycleKind::Truncated),
        );
        dispatch_lifecycle_event(
            &listener,
            &MapLifecycleEvent::new("c", MapLifecycleKind::Destroyed),
        );
        dispatch_lifecycle_event(
            &listener,
            &MapLifecycleEvent::new("c", MapLifecycleKind::Released),
        );

        assert_eq!(truncated.load(Ordering::SeqCst), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_methods_are_no_ops() {
        struct Quiet;
        impl MapLifecycleListener for Quiet {}
        let listener = Quiet;
        dispatch_lifecycle_event(
            &listener,
            &MapLifecycleEvent::new("c", MapLifecycleKind::Disconnected),
        );
    }
}
