//! Update context and per-update scope.
//!
//! This module provides three types that together model one inbound update:
//!
//! - [`UpdateContext`] — the **immutable** unit of work. Created once per
//!   inbound event by the source/mapper, it flows through exactly one
//!   pipeline invocation and is discarded. All mutation happens through
//!   copy-with-changes builders (`with_command`, `with_args`, ...).
//!
//! - [`Items`] — the one deliberate exception to immutability: a shared,
//!   string-keyed bag used as a cross-middleware side channel. The router
//!   writes the handler name before invoking the handler; the logging
//!   middleware reads it afterwards. Known keys live in [`item_keys`].
//!
//! - [`UpdateScope`] — request-scoped state created by the pipeline for
//!   each invocation. Middleware instances are built against it, so scoped
//!   collaborators are shared within one update but never across two
//!   concurrently-processing updates.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Well-known keys for the [`Items`] bag.
///
/// Every reader/writer pair is enumerated here so the side channel stays
/// auditable:
/// - [`UPDATE_KIND`]: written by the source mapper, read by logging.
/// - [`MESSAGE_ID`]: written by the source mapper, read by handlers.
/// - [`HANDLER`]: written by the router, read by logging.
/// - [`FROM_WEB_APP`]: written by the source mapper, read by handlers.
/// - [`BOUND_ARGS`]: written by the registry on a successful argument
///   bind, read by the matched handler.
pub mod item_keys {
    /// Resolved update type (e.g. `"message"`, `"callback"`).
    pub const UPDATE_KIND: &str = "update_kind";
    /// Platform message id, when the update carries one.
    pub const MESSAGE_ID: &str = "message_id";
    /// Name of the handler selected by the router.
    pub const HANDLER: &str = "handler";
    /// Set when the update originated from an embedded web surface.
    pub const FROM_WEB_APP: &str = "from_web_app";
    /// Typed arguments bound by the registry for the matched handler.
    pub const BOUND_ARGS: &str = "bound_args";
}

/// Identifies the chat an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatRef(pub i64);

/// Identifies the user an update originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserRef(pub i64);

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Items — shared mutable side channel
// =============================================================================

/// String-keyed bag of per-update annotations.
///
/// Shared (via `Arc`) between all copies of one [`UpdateContext`], so an
/// annotation written by one middleware is visible to every later stage of
/// the same invocation. Values are stored type-erased; readers supply the
/// concrete type.
#[derive(Default)]
pub struct Items {
    inner: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl Items {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under `key`, replacing any previous value.
    pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T) {
        self.inner.lock().insert(key.to_string(), Box::new(value));
    }

    /// Stores an already-boxed value under `key`, replacing any previous
    /// value. Readers downcast with [`take`](Self::take) or
    /// [`get`](Self::get).
    pub fn set_boxed(&self, key: &str, value: Box<dyn Any + Send + Sync>) {
        self.inner.lock().insert(key.to_string(), value);
    }

    /// Retrieves a cloned value of type `T` stored under `key`.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .lock()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the value stored under `key`.
    pub fn take<T: 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .lock()
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Returns `true` if a value exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }
}

impl std::fmt::Debug for Items {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.inner.lock().keys().cloned().collect();
        f.debug_struct("Items").field("keys", &keys).finish()
    }
}

// =============================================================================
// UpdateScope — per-invocation dependency scope
// =============================================================================

/// Request-scoped state for one pipeline invocation.
///
/// The pipeline creates exactly one scope per invocation and constructs
/// every middleware from its factory against it. Collaborators stored here
/// are shared within the update and isolated from concurrent updates —
/// there is no global container behind this type.
#[derive(Default)]
pub struct UpdateScope {
    state: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl UpdateScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a scoped value, replacing any previous value of type `T`.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Retrieves a scoped value of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|arc| arc.downcast::<T>().ok())
    }

    /// Retrieves a scoped value of type `T`, inserting it first if absent.
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut state = self.state.lock();
        let entry = state
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()));
        // The entry under this TypeId always holds a T.
        Arc::clone(entry)
            .downcast::<T>()
            .expect("scope entry type mismatch")
    }
}

impl std::fmt::Debug for UpdateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScope")
            .field("entries", &self.state.lock().len())
            .finish()
    }
}

// =============================================================================
// UpdateContext — the unit of work
// =============================================================================

/// One inbound update flowing through the pipeline.
///
/// Cloning is cheap-ish (a handful of `String`s plus `Arc`s) and is how
/// copy-with-changes works: builders return a modified clone, never mutate
/// in place. The [`Items`] bag is the documented exception — it is shared
/// across all copies of the same update.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    transport: String,
    update_id: String,
    chat: ChatRef,
    user: UserRef,
    text: Option<String>,
    command: Option<String>,
    args: Option<Vec<String>>,
    payload: Option<String>,
    items: Arc<Items>,
    scope: Option<Arc<UpdateScope>>,
    cancel: CancellationToken,
}

impl UpdateContext {
    /// Creates a new update context.
    pub fn new(
        transport: impl Into<String>,
        update_id: impl Into<String>,
        chat: ChatRef,
        user: UserRef,
    ) -> Self {
        Self {
            transport: transport.into(),
            update_id: update_id.into(),
            chat,
            user,
            text: None,
            command: None,
            args: None,
            payload: None,
            items: Arc::new(Items::new()),
            scope: None,
            cancel: CancellationToken::new(),
        }
    }

    /// The transport this update arrived on.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// The update id, used as the dedup key.
    pub fn update_id(&self) -> &str {
        &self.update_id
    }

    /// The chat this update belongs to.
    pub fn chat(&self) -> ChatRef {
        self.chat
    }

    /// The user this update originates from.
    pub fn user(&self) -> UserRef {
        self.user
    }

    /// Raw message text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Parsed command token, if the command middleware recognized one.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Parsed argument list, if the command middleware recognized one.
    pub fn args(&self) -> Option<&[String]> {
        self.args.as_deref()
    }

    /// Raw payload string following the command token.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// The per-update annotation bag.
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Shared handle to the annotation bag, for readers that outlive this
    /// copy of the context.
    pub fn items_handle(&self) -> Arc<Items> {
        Arc::clone(&self.items)
    }

    /// The per-invocation dependency scope, once attached by the pipeline.
    pub fn scope(&self) -> Option<&Arc<UpdateScope>> {
        self.scope.as_ref()
    }

    /// The cancellation token tied to this update's lifetime.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the update's cancellation token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // Copy-with-changes builders.

    /// Returns a copy carrying the given raw text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Returns a copy carrying the parsed command token.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Returns a copy carrying the parsed argument list.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    /// Returns a copy carrying the raw payload string.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Returns a copy bound to the given dependency scope.
    pub fn with_scope(mut self, scope: Arc<UpdateScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Returns a copy bound to the given cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> UpdateContext {
        UpdateContext::new("test", "1", ChatRef(10), UserRef(20))
    }

    #[test]
    fn test_copy_with_changes_leaves_original_untouched() {
        let original = ctx().with_text("/echo hi");
        let derived = original.clone().with_command("echo");

        assert!(original.command().is_none());
        assert_eq!(derived.command(), Some("echo"));
        assert_eq!(derived.text(), Some("/echo hi"));
    }

    #[test]
    fn test_items_shared_across_copies() {
        let original = ctx();
        let derived = original.clone().with_command("echo");

        derived.items().set(item_keys::HANDLER, "echo".to_string());
        let seen: Option<String> = original.items().get(item_keys::HANDLER);
        assert_eq!(seen.as_deref(), Some("echo"));
    }

    #[test]
    fn test_items_typed_roundtrip() {
        let items = Items::new();
        items.set("n", 42u64);
        assert_eq!(items.get::<u64>("n"), Some(42));
        assert!(items.get::<String>("n").is_none());
        assert_eq!(items.take::<u64>("n"), Some(42));
        assert!(!items.contains("n"));
    }

    #[test]
    fn test_scope_isolated_per_instance() {
        let a = UpdateScope::new();
        let b = UpdateScope::new();
        a.insert(7usize);
        assert_eq!(a.get::<usize>().as_deref(), Some(&7));
        assert!(b.get::<usize>().is_none());
    }

    #[test]
    fn test_scope_get_or_insert_with() {
        let scope = UpdateScope::new();
        let first = scope.get_or_insert_with(|| String::from("a"));
        let second = scope.get_or_insert_with(|| String::from("b"));
        assert_eq!(first.as_str(), "a");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
