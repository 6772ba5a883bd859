//! Handler descriptors and the first-match registry.
//!
//! A [`HandlerDescriptor`] declares how a handler is matched — an exact
//! command literal or a compiled pattern — plus an optional typed argument
//! binder backed by `clap`. Registration order is captured explicitly as a
//! field and used as the tie-break; it is never inferred.
//!
//! Matching invariants:
//! 1. Command descriptors always outrank pattern descriptors, regardless
//!    of registration order.
//! 2. Among descriptors of the same kind, the first registered wins.
//! 3. A candidate whose binder rejects the arguments is *not matched* and
//!    falls through to the next candidate.

use std::any::Any;
use std::sync::Arc;

use clap::Parser;
use regex::Regex;
use tracing::trace;

use crate::handler::{BoxedHandler, UpdateHandler};
use crate::update::{item_keys, UpdateContext, UpdateScope};

/// How a descriptor matches an update.
#[derive(Clone)]
pub enum MatchRule {
    /// Exact, case-sensitive match against the parsed command token.
    Command(String),
    /// Pattern match against the raw message text.
    Pattern(Regex),
}

impl std::fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(cmd) => write!(f, "Command({cmd:?})"),
            Self::Pattern(re) => write!(f, "Pattern({:?})", re.as_str()),
        }
    }
}

/// Resolves a fresh handler instance from the per-update scope.
pub type HandlerFactory = Arc<dyn Fn(&UpdateScope) -> BoxedHandler + Send + Sync>;

/// Binds positional arguments into a typed value, or rejects them.
pub type ArgBinder = Arc<dyn Fn(&[String]) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Declares one routable handler.
///
/// Created at startup via [`command`](Self::command) /
/// [`pattern`](Self::pattern) and immutable after registration.
#[derive(Clone)]
pub struct HandlerDescriptor {
    rule: MatchRule,
    name: String,
    binder: Option<ArgBinder>,
    factory: HandlerFactory,
    /// Assigned by the registry at registration time.
    order: usize,
}

impl HandlerDescriptor {
    /// Declares a command handler matching `/<literal>`.
    pub fn command(literal: impl Into<String>, handler: BoxedHandler) -> Self {
        let literal = literal.into();
        let name = handler.name().to_string();
        Self {
            rule: MatchRule::Command(literal),
            name,
            binder: None,
            factory: shared_factory(handler),
            order: 0,
        }
    }

    /// Declares a pattern handler matching the raw message text.
    pub fn pattern(pattern: Regex, handler: BoxedHandler) -> Self {
        let name = handler.name().to_string();
        Self {
            rule: MatchRule::Pattern(pattern),
            name,
            binder: None,
            factory: shared_factory(handler),
            order: 0,
        }
    }

    /// Replaces the shared-instance factory with a scope-aware one, so a
    /// fresh handler is resolved per update.
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&UpdateScope) -> BoxedHandler + Send + Sync + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    /// Attaches a typed argument binder.
    ///
    /// `T` is a `clap::Parser`; positional arguments are bound into its
    /// fields and clap's declared constraints (value ranges, arity) act as
    /// validation. A parse failure makes this descriptor fall through.
    pub fn with_args<T>(mut self) -> Self
    where
        T: Parser + Send + Sync + 'static,
    {
        self.binder = Some(Arc::new(|args: &[String]| {
            // clap expects argv[0] to be the program name.
            let argv = std::iter::once("").chain(args.iter().map(String::as_str));
            T::try_parse_from(argv)
                .ok()
                .map(|parsed| Box::new(parsed) as Box<dyn Any + Send + Sync>)
        }));
        self
    }

    /// The handler name used for stats and logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The match rule this descriptor was declared with.
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    /// Registration order captured by the registry.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Resolves a handler instance from the per-update scope.
    pub fn resolve(&self, scope: &UpdateScope) -> BoxedHandler {
        (self.factory)(scope)
    }

    /// Runs the binder against the context's arguments, stashing a
    /// successful bind in the item bag. Descriptors without a binder
    /// always succeed.
    fn bind(&self, ctx: &UpdateContext) -> bool {
        let Some(binder) = &self.binder else {
            return true;
        };
        let empty: &[String] = &[];
        match binder(ctx.args().unwrap_or(empty)) {
            Some(bound) => {
                ctx.items().set_boxed(item_keys::BOUND_ARGS, bound);
                true
            }
            None => {
                trace!(handler = %self.name, "argument binding failed, falling through");
                false
            }
        }
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("rule", &self.rule)
            .field("name", &self.name)
            .field("has_binder", &self.binder.is_some())
            .field("order", &self.order)
            .finish()
    }
}

fn shared_factory(handler: BoxedHandler) -> HandlerFactory {
    Arc::new(move |_scope| Arc::clone(&handler))
}

// =============================================================================
// HandlerRegistry
// =============================================================================

/// Ordered collection of handler descriptors with first-match routing.
#[derive(Default)]
pub struct HandlerRegistry {
    descriptors: Vec<HandlerDescriptor>,
    fallback: Option<BoxedHandler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, capturing its registration order.
    pub fn register(&mut self, mut descriptor: HandlerDescriptor) {
        descriptor.order = self.descriptors.len();
        self.descriptors.push(descriptor);
    }

    /// Sets the handler invoked when nothing matches.
    pub fn set_fallback(&mut self, handler: BoxedHandler) {
        self.fallback = Some(handler);
    }

    /// The configured fallback handler, if any.
    pub fn fallback(&self) -> Option<&BoxedHandler> {
        self.fallback.as_ref()
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no descriptors are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Finds the first descriptor matching the update.
    ///
    /// Commands are checked before patterns; within each kind candidates
    /// are tried in registration order, and a candidate whose binder
    /// rejects the arguments falls through. A successful bind has already
    /// been stored in the item bag when this returns.
    pub fn find_for(&self, ctx: &UpdateContext) -> Option<&HandlerDescriptor> {
        if let Some(command) = ctx.command() {
            for descriptor in &self.descriptors {
                if let MatchRule::Command(literal) = &descriptor.rule {
                    if literal == command && descriptor.bind(ctx) {
                        return Some(descriptor);
                    }
                }
            }
        }

        if let Some(text) = ctx.text() {
            for descriptor in &self.descriptors {
                if let MatchRule::Pattern(pattern) = &descriptor.rule {
                    if pattern.is_match(text) && descriptor.bind(ctx) {
                        return Some(descriptor);
                    }
                }
            }
        }

        None
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("descriptors", &self.descriptors.len())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
