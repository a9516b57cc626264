//! Typed hook objects with ordered, named taps
//!
//! Three flavours cover every extension point in the engine:
//! - [`SyncHook`]: fire-and-forget notification
//! - [`SyncWaterfallHook`]: each tap transforms the value produced by the previous one
//! - [`SyncBailHook`]: first tap returning `Some` wins
//!
//! Taps are stored behind a `parking_lot::RwLock`. `call` snapshots the tap list
//! and releases the lock before invoking, so a tap may register further taps.

use std::sync::Arc;

use parking_lot::RwLock;

type Tap<F> = (Arc<str>, Arc<F>);

/// Fire-and-forget notification hook
pub struct SyncHook<A: ?Sized, B: ?Sized = ()> {
    taps: RwLock<Vec<Tap<dyn Fn(&A, &B) + Send + Sync>>>,
}

impl<A: ?Sized, B: ?Sized> Default for SyncHook<A, B> {
    fn default() -> Self {
        Self {
            taps: RwLock::new(Vec::new()),
        }
    }
}

impl<A: ?Sized, B: ?Sized> SyncHook<A, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(&self, name: impl Into<Arc<str>>, f: impl Fn(&A, &B) + Send + Sync + 'static) {
        self.taps.write().push((name.into(), Arc::new(f)));
    }

    pub fn call(&self, a: &A, b: &B) {
        let taps = self.taps.read().clone();
        for (_, tap) in taps {
            tap(a, b);
        }
    }

    pub fn is_used(&self) -> bool {
        !self.taps.read().is_empty()
    }

    /// Names of the registered taps, in call order
    pub fn tap_names(&self) -> Vec<Arc<str>> {
        self.taps.read().iter().map(|(name, _)| Arc::clone(name)).collect()
    }
}

/// Hook where every tap receives the previous tap's output
pub struct SyncWaterfallHook<T, A: ?Sized = (), B: ?Sized = ()> {
    taps: RwLock<Vec<Tap<dyn Fn(T, &A, &B) -> T + Send + Sync>>>,
}

impl<T, A: ?Sized, B: ?Sized> Default for SyncWaterfallHook<T, A, B> {
    fn default() -> Self {
        Self {
            taps: RwLock::new(Vec::new()),
        }
    }
}

impl<T, A: ?Sized, B: ?Sized> SyncWaterfallHook<T, A, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(
        &self,
        name: impl Into<Arc<str>>,
        f: impl Fn(T, &A, &B) -> T + Send + Sync + 'static,
    ) {
        self.taps.write().push((name.into(), Arc::new(f)));
    }

    pub fn call(&self, init: T, a: &A, b: &B) -> T {
        let taps = self.taps.read().clone();
        taps.into_iter().fold(init, |acc, (_, tap)| tap(acc, a, b))
    }

    pub fn is_used(&self) -> bool {
        !self.taps.read().is_empty()
    }
}

/// Hook that stops at the first tap returning `Some`
pub struct SyncBailHook<R, A: ?Sized, B: ?Sized = ()> {
    taps: RwLock<Vec<Tap<dyn Fn(&A, &B) -> Option<R> + Send + Sync>>>,
}

impl<R, A: ?Sized, B: ?Sized> Default for SyncBailHook<R, A, B> {
    fn default() -> Self {
        Self {
            taps: RwLock::new(Vec::new()),
        }
    }
}

impl<R, A: ?Sized, B: ?Sized> SyncBailHook<R, A, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(
        &self,
        name: impl Into<Arc<str>>,
        f: impl Fn(&A, &B) -> Option<R> + Send + Sync + 'static,
    ) {
        self.taps.write().push((name.into(), Arc::new(f)));
    }

    pub fn call(&self, a: &A, b: &B) -> Option<R> {
        let taps = self.taps.read().clone();
        taps.into_iter().find_map(|(_, tap)| tap(a, b))
    }

    pub fn is_used(&self) -> bool {
        !self.taps.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sync_hook_calls_taps_in_order() {
        let hook: SyncHook<str> = SyncHook::new();
        let seen = Arc::new(RwLock::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        hook.tap("first", move |v: &str, _| s1.write().push(format!("1:{v}")));
        let s2 = Arc::clone(&seen);
        hook.tap("second", move |v: &str, _| s2.write().push(format!("2:{v}")));

        hook.call("x", &());

        assert_eq!(*seen.read(), vec!["1:x", "2:x"]);
        assert_eq!(hook.tap_names().len(), 2);
    }

    #[test]
    fn waterfall_threads_value() {
        let hook: SyncWaterfallHook<i64, i64> = SyncWaterfallHook::new();
        hook.tap("add", |acc, n, _| acc + n);
        hook.tap("double", |acc, _, _| acc * 2);

        assert_eq!(hook.call(1, &2, &()), 6);
    }

    #[test]
    fn bail_stops_at_first_some() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: SyncBailHook<&'static str, i32> = SyncBailHook::new();

        let c1 = Arc::clone(&calls);
        hook.tap("none", move |_, _| {
            c1.fetch_add(1, Ordering::SeqCst);
            None
        });
        hook.tap("some", |n, _| (*n > 0).then_some("positive"));
        let c3 = Arc::clone(&calls);
        hook.tap("never", move |_, _| {
            c3.fetch_add(100, Ordering::SeqCst);
            Some("late")
        });

        assert_eq!(hook.call(&5, &()), Some("positive"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tap_during_call_does_not_deadlock() {
        let hook: Arc<SyncHook<()>> = Arc::new(SyncHook::new());
        let inner = Arc::clone(&hook);
        hook.tap("registrar", move |_, _| inner.tap("late", |_, _| {}));

        hook.call(&(), &());

        assert_eq!(hook.tap_names().len(), 2);
    }
}
