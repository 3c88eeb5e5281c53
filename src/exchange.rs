//! One request/response cycle and its context metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method};
use tracing::{Span, info_span};

// ── HandlerId ─────────────────────────────────────────────────────────────────

/// Logical name of the code unit a route dispatches to.
///
/// Resolved once at route registration from the handler's type path:
/// `legumes::LegumeResource::add` becomes class `LegumeResource`, method
/// `add`. A free function `app::health` becomes class `app`, method `health`.
/// A closure defined in `app::main` becomes class `main`, method `closure`.
/// Function pointers carry no path and are reported as
/// [`HandlerId::ANONYMOUS`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HandlerId {
    class: &'static str,
    method: &'static str,
}

impl HandlerId {
    pub const ANONYMOUS: HandlerId = HandlerId::new("", "anonymous");

    pub const fn new(class: &'static str, method: &'static str) -> Self {
        Self { class, method }
    }

    pub(crate) fn of<F>() -> Self {
        Self::parse(std::any::type_name::<F>())
    }

    fn parse(path: &'static str) -> Self {
        let named = path.starts_with(|c: char| c.is_alphabetic() || c == '_');
        if !named || ["fn(", "fn ", "unsafe ", "extern "].iter().any(|p| path.starts_with(p)) {
            return Self::ANONYMOUS;
        }

        let mut segments = item_segments(path);
        let closures = segments.iter().rev().take_while(|s| **s == "{{closure}}").count();
        segments.truncate(segments.len() - closures);

        let mut rev = segments.iter().rev();
        if closures > 0 {
            let class = rev.next().copied().unwrap_or("");
            return Self { class, method: "closure" };
        }
        let method = rev.next().copied().unwrap_or(path);
        let class = rev.next().copied().unwrap_or("");
        Self { class, method }
    }

    pub fn class(&self) -> &'static str { self.class }
    pub fn method(&self) -> &'static str { self.method }
}

/// Splits a type path on the `::` separators that sit outside generic
/// arguments, argument lists and arrays, dropping each segment's own `<...>`
/// suffix.
fn item_segments(path: &'static str) -> Vec<&'static str> {
    let bytes = path.as_bytes();
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' | b'[' => depth += 1,
            // `->` inside a nested fn type is not a closing bracket
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b'>' | b')' | b']' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                segments.push(strip_generics(&path[start..i]));
                i += 1;
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(strip_generics(&path[start..]));
    segments
}

fn strip_generics(segment: &'static str) -> &'static str {
    segment.split('<').next().unwrap_or(segment)
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class.is_empty() {
            f.write_str(self.method)
        } else {
            write!(f, "{}::{}", self.class, self.method)
        }
    }
}

// ── Metadata ──────────────────────────────────────────────────────────────────

/// Key/value annotations owned by one exchange and attached to its log lines.
///
/// While the map is non-empty it is mirrored into a `context` span, a child
/// of the exchange span. The router enters that span around every hook and
/// every poll of the handler, so any `tracing` event emitted while serving
/// the exchange carries the metadata as its `meta` field. Once the map is
/// cleared the span is gone and later lines carry nothing.
///
/// Cloning yields another handle to the same map. The map is never shared
/// between exchanges, so the lock is uncontended.
#[derive(Clone)]
pub struct Metadata(Arc<MetadataInner>);

struct MetadataInner {
    state: Mutex<State>,
    cleanups: AtomicUsize,
    parent: Span,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<&'static str, String>,
    // `None` until first asked for after a change.
    context: Option<Span>,
}

impl Metadata {
    /// An empty map whose context span will hang off `parent`.
    pub(crate) fn under(parent: Span) -> Self {
        Self(Arc::new(MetadataInner {
            state: Mutex::new(State::default()),
            cleanups: AtomicUsize::new(0),
            parent,
        }))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: &'static str, value: impl Into<String>) {
        let mut state = self.state();
        state.entries.insert(key, value.into());
        state.context = None;
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state().entries.get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Removes `keys` and counts one cleanup. Returns how many were present.
    pub fn clear(&self, keys: &[&str]) -> usize {
        let mut state = self.state();
        let removed = keys.iter().filter(|k| state.entries.remove(**k).is_some()).count();
        state.context = None;
        self.0.cleanups.fetch_add(1, Ordering::AcqRel);
        removed
    }

    /// How many times [`clear`](Self::clear) has run on this exchange.
    pub fn cleanups(&self) -> usize {
        self.0.cleanups.load(Ordering::Acquire)
    }

    /// The span carrying the current metadata, or [`Span::none`] when the
    /// map is empty. Enter it to tag events emitted outside the router's
    /// own scopes.
    pub fn span(&self) -> Span {
        let mut guard = self.state();
        let State { entries, context } = &mut *guard;
        context
            .get_or_insert_with(|| {
                if entries.is_empty() {
                    return Span::none();
                }
                let meta = Rendered(entries);
                info_span!(parent: &self.0.parent, "context", meta = %meta)
            })
            .clone()
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::under(Span::none())
    }
}

/// `{key=value key=value}`
struct Rendered<'a>(&'a BTreeMap<&'static str, String>);

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Rendered(&self.state().entries), f)
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.state().entries.iter()).finish()
    }
}

// ── Exchange ──────────────────────────────────────────────────────────────────

/// Everything the pipeline knows about the request being served.
///
/// Created when a route matches, shared by the middleware hooks and the
/// handler's [`Request`](crate::Request), dropped when the response is built.
pub struct Exchange {
    method: Method,
    path: String,
    remote_addr: SocketAddr,
    handler: HandlerId,
    headers: HeaderMap,
    metadata: Metadata,
}

impl Exchange {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        remote_addr: SocketAddr,
        handler: HandlerId,
        headers: HeaderMap,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            remote_addr,
            handler,
            headers,
            metadata: Metadata::default(),
        }
    }

    /// Hangs this exchange's context span off `span`.
    pub(crate) fn within(mut self, span: &Span) -> Self {
        self.metadata = Metadata::under(span.clone());
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn handler(&self) -> HandlerId { self.handler }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn metadata(&self) -> &Metadata { &self.metadata }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Declared request body length, if the client sent a valid one.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("remote_addr", &self.remote_addr)
            .field("handler", &self.handler)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LegumeResource;

    impl LegumeResource {
        async fn list() {}
    }

    async fn health() {}

    #[test]
    fn handler_id_from_associated_fn() {
        let id = HandlerId::parse("legumes::LegumeResource::list");
        assert_eq!(id, HandlerId::new("LegumeResource", "list"));
    }

    #[test]
    fn handler_id_ignores_generic_arguments() {
        let id = HandlerId::parse("app::Store<alloc::string::String>::get");
        assert_eq!(id, HandlerId::new("Store", "get"));

        let id = HandlerId::parse("app::fetch<app::Store<u8>>");
        assert_eq!(id, HandlerId::new("app", "fetch"));

        let id = HandlerId::parse("get");
        assert_eq!(id, HandlerId::new("", "get"));
    }

    #[test]
    fn handler_id_of_real_functions() {
        fn id_of<F>(_: F) -> HandlerId { HandlerId::of::<F>() }

        assert_eq!(id_of(LegumeResource::list), HandlerId::new("LegumeResource", "list"));
        assert_eq!(id_of(health), HandlerId::new("tests", "health"));
        assert_eq!(id_of(|| async {}), HandlerId::new("handler_id_of_real_functions", "closure"));

        let pointer: fn() -> u8 = || 7;
        assert_eq!(id_of(pointer), HandlerId::ANONYMOUS);
        assert_eq!(HandlerId::ANONYMOUS.to_string(), "anonymous");
    }

    #[test]
    fn handler_id_skips_separators_inside_argument_lists() {
        let id = HandlerId::parse("app::Store<fn(app::Item) -> app::Out>::get");
        assert_eq!(id, HandlerId::new("Store", "get"));

        let id = HandlerId::parse("app::routes::{{closure}}::{{closure}}");
        assert_eq!(id, HandlerId::new("routes", "closure"));

        let id = HandlerId::parse("fn(tapline::request::Request) -> core::pin::Pin<alloc::boxed::Box<u8>>");
        assert_eq!(id, HandlerId::ANONYMOUS);
    }

    #[test]
    fn context_span_follows_the_map() {
        let meta = Metadata::default();
        assert!(meta.span().is_none());

        meta.insert("handler-class", "LegumeResource");
        let _ = meta.span();

        meta.clear(&["handler-class"]);
        assert!(meta.span().is_none());
    }

    #[test]
    fn metadata_clear_counts_every_call() {
        let meta = Metadata::default();
        meta.insert("handler-class", "LegumeResource");
        meta.insert("handler-method", "list");
        assert_eq!(meta.to_string(), "{handler-class=LegumeResource handler-method=list}");

        assert_eq!(meta.clear(&["handler-class", "handler-method", "request-content-type"]), 2);
        assert!(meta.is_empty());
        assert_eq!(meta.cleanups(), 1);

        assert_eq!(meta.clear(&["handler-class"]), 0);
        assert_eq!(meta.cleanups(), 2);
        assert_eq!(meta.to_string(), "{}");
    }

    #[test]
    fn clones_share_one_map() {
        let meta = Metadata::default();
        let handle = meta.clone();
        meta.insert("k", "v");
        assert_eq!(handle.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn content_length_parses_declared_value() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, "36".parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        let exchange = Exchange::new(
            Method::POST,
            "/legumes",
            "127.0.0.1:4000".parse().unwrap(),
            HandlerId::new("LegumeResource", "add"),
            headers,
        );
        assert_eq!(exchange.content_length(), Some(36));
        assert_eq!(exchange.content_type(), Some("application/json"));
        assert_eq!(exchange.header("Content-Type"), Some("application/json"));
    }
}
