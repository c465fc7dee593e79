//! Per-call metadata forwarded to the secret store.
//!
//! A [`CallContextSource`] is either a fixed set of entries or a closure that
//! is invoked once per store call, which is how tracing headers or request ids
//! get attached to every round-trip.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Metadata entries attached to one store call (sent as request headers by
/// remote stores).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    entries: BTreeMap<String, String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Produces the [`CallContext`] for each store call.
#[derive(Clone, Default)]
pub enum CallContextSource {
    #[default]
    None,
    Static(CallContext),
    PerCall(Arc<dyn Fn() -> CallContext + Send + Sync>),
}

impl CallContextSource {
    pub fn per_call<F>(f: F) -> Self
    where
        F: Fn() -> CallContext + Send + Sync + 'static,
    {
        Self::PerCall(Arc::new(f))
    }

    /// Resolve the context for one call.
    pub fn resolve(&self) -> CallContext {
        match self {
            Self::None => CallContext::default(),
            Self::Static(ctx) => ctx.clone(),
            Self::PerCall(f) => f(),
        }
    }
}

impl From<CallContext> for CallContextSource {
    fn from(ctx: CallContext) -> Self {
        Self::Static(ctx)
    }
}

impl fmt::Debug for CallContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("CallContextSource::None"),
            Self::Static(ctx) => f.debug_tuple("CallContextSource::Static").field(ctx).finish(),
            Self::PerCall(_) => f.write_str("CallContextSource::PerCall(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_static_context() {
        let source: CallContextSource = CallContext::new().with("x-request-id", "abc").into();
        assert_eq!(source.resolve().get("x-request-id"), Some("abc"));
        assert_eq!(source.resolve(), source.resolve());
    }

    #[test]
    fn test_per_call_context_invoked_each_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let source = CallContextSource::per_call(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            CallContext::new().with("attempt", n.to_string())
        });

        assert_eq!(source.resolve().get("attempt"), Some("0"));
        assert_eq!(source.resolve().get("attempt"), Some("1"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_is_empty() {
        assert!(CallContextSource::default().resolve().is_empty());
    }
}
