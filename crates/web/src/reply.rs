//! The responder interface.
//!
//! Every lifecycle invocation gets exactly one single-use reply object bound
//! to that invocation. The callback signals its decision through it: proceed
//! to the next stage, substitute a response, take over transmission, or close
//! the connection. Each phase gets its own reply type exposing only the
//! decisions legal at that phase, so an illegal decision is unrepresentable
//! instead of a runtime policy check.
//!
//! Finalizing twice within one invocation is a programming error and panics.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{AuthDecision, Credentials};
use crate::config::ConfigError;
use crate::fault::Fault;
use crate::request::Request;
use crate::response::{ReplyValue, Response};
use crate::state::{Cookie, CookieOp};

/// The decision produced by one lifecycle invocation.
#[derive(Debug)]
pub enum ReplyAction {
    /// No opinion, run the next stage.
    Continue,
    /// Substitute this response; remaining callbacks at the point still see
    /// the short-circuit rule applied by the registry, in document order.
    Respond(Response),
    /// Finalize immediately, bypassing the remaining callbacks at the
    /// current point.
    TakeOver(Response),
    /// End the response with no payload; the transport stops processing.
    Close,
}

/// An opaque, finalized decision. Only a reply object can mint one.
#[derive(Debug)]
pub struct Reply(pub(crate) ReplyAction);

impl Reply {
    pub fn is_continue(&self) -> bool {
        matches!(self.0, ReplyAction::Continue)
    }

    pub(crate) fn into_action(self) -> ReplyAction {
        self.0
    }
}

/// Shared single-use bookkeeping behind every phase reply.
#[derive(Debug, Default)]
struct ReplyCore {
    finalized: bool,
    cookie_ops: Vec<CookieOp>,
}

impl ReplyCore {
    fn finalize(&mut self, action: ReplyAction) -> Reply {
        assert!(!self.finalized, "reply finalized twice within one invocation");
        self.finalized = true;
        Reply(action)
    }

    fn take_cookie_ops(&mut self) -> Vec<CookieOp> {
        std::mem::take(&mut self.cookie_ops)
    }
}

/// A named reply decoration, invoked against the current request.
pub type DecorationFn = Arc<dyn Fn(&mut Request) -> ReplyValue + Send + Sync>;

/// Names already claimed by the reply interface itself.
const BUILTIN_NAMES: &[&str] = &[
    "response",
    "close",
    "state",
    "unstate",
    "redirect",
    "continue",
    "authenticated",
    "unauthenticated",
    "realm",
    "request",
    "wrap",
    "entity",
];

/// Registry of user-added reply methods, fixed at server build time.
#[derive(Default, Clone)]
pub struct Decorations {
    methods: HashMap<String, DecorationFn>,
}

impl Decorations {
    pub fn register(&mut self, name: impl Into<String>, method: DecorationFn) -> Result<(), ConfigError> {
        let name = name.into();
        if BUILTIN_NAMES.contains(&name.as_str()) {
            return Err(ConfigError::ReservedDecoration(name));
        }
        if self.methods.contains_key(&name) {
            return Err(ConfigError::DuplicateDecoration(name));
        }
        self.methods.insert(name, method);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&DecorationFn> {
        self.methods.get(name)
    }
}

impl std::fmt::Debug for Decorations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decorations").field("names", &self.methods.keys().collect::<Vec<_>>()).finish()
    }
}

/// Reply object handed to extension callbacks.
#[derive(Debug)]
pub struct ExtReply {
    core: ReplyCore,
    decorations: Arc<Decorations>,
}

impl ExtReply {
    pub(crate) fn new(decorations: Arc<Decorations>) -> Self {
        Self { core: ReplyCore::default(), decorations }
    }

    /// No opinion; the next callback at this point runs.
    pub fn proceed(&mut self) -> Reply {
        self.core.finalize(ReplyAction::Continue)
    }

    /// Builds a response without finalizing, for mutation before a later
    /// `respond_with` or `take_over`.
    pub fn wrap(&self, value: impl Into<ReplyValue>) -> Response {
        Response::wrap(value)
    }

    pub fn respond(&mut self, value: impl Into<ReplyValue>) -> Reply {
        self.core.finalize(ReplyAction::Respond(Response::wrap(value)))
    }

    pub fn respond_with(&mut self, response: Response) -> Reply {
        self.core.finalize(ReplyAction::Respond(response))
    }

    /// Finalizes immediately, skipping the remaining callbacks at this point.
    pub fn take_over(&mut self, response: Response) -> Reply {
        self.core.finalize(ReplyAction::TakeOver(response))
    }

    pub fn fault(&mut self, fault: Fault) -> Reply {
        self.core.finalize(ReplyAction::Respond(Response::from_fault(fault)))
    }

    /// Abandons the response; used for hijacked connections.
    pub fn close(&mut self) -> Reply {
        self.core.finalize(ReplyAction::Close)
    }

    /// Queues a cookie; does not finalize.
    pub fn state(&mut self, cookie: Cookie) {
        self.core.cookie_ops.push(CookieOp::Set(cookie));
    }

    /// Queues a cookie clear; does not finalize.
    pub fn unstate(&mut self, name: impl Into<String>) {
        self.core.cookie_ops.push(CookieOp::Clear(name.into()));
    }

    /// Runs a registered decoration by name.
    pub fn decorated(&self, name: &str, request: &mut Request) -> Option<ReplyValue> {
        self.decorations.get(name).map(|method| method(request))
    }

    pub(crate) fn take_cookie_ops(&mut self) -> Vec<CookieOp> {
        self.core.take_cookie_ops()
    }
}

/// Reply object handed to route handlers and prerequisites.
///
/// Unlike an extension, a handler has no `proceed`: it must always produce
/// something. Returning a bare value goes through [`HandlerReply::respond`].
#[derive(Debug)]
pub struct HandlerReply {
    core: ReplyCore,
    decorations: Arc<Decorations>,
}

impl HandlerReply {
    pub(crate) fn new(decorations: Arc<Decorations>) -> Self {
        Self { core: ReplyCore::default(), decorations }
    }

    pub fn wrap(&self, value: impl Into<ReplyValue>) -> Response {
        Response::wrap(value)
    }

    pub fn respond(&mut self, value: impl Into<ReplyValue>) -> Reply {
        self.core.finalize(ReplyAction::Respond(Response::wrap(value)))
    }

    pub fn respond_with(&mut self, response: Response) -> Reply {
        self.core.finalize(ReplyAction::Respond(response))
    }

    /// Finalizes immediately; the post-handler point is skipped.
    pub fn take_over(&mut self, response: Response) -> Reply {
        self.core.finalize(ReplyAction::TakeOver(response))
    }

    pub fn fault(&mut self, fault: Fault) -> Reply {
        self.core.finalize(ReplyAction::Respond(Response::from_fault(fault)))
    }

    pub fn close(&mut self) -> Reply {
        self.core.finalize(ReplyAction::Close)
    }

    pub fn state(&mut self, cookie: Cookie) {
        self.core.cookie_ops.push(CookieOp::Set(cookie));
    }

    pub fn unstate(&mut self, name: impl Into<String>) {
        self.core.cookie_ops.push(CookieOp::Clear(name.into()));
    }

    pub fn decorated(&self, name: &str, request: &mut Request) -> Option<ReplyValue> {
        self.decorations.get(name).map(|method| method(request))
    }

    pub(crate) fn take_cookie_ops(&mut self) -> Vec<CookieOp> {
        self.core.take_cookie_ops()
    }
}

/// Reply object handed to auth scheme `authenticate` callbacks.
///
/// Auth has no continue and no free-form response: the scheme either
/// succeeds with credentials or fails with an error tagged missing or
/// invalid.
#[derive(Debug)]
pub struct AuthReply {
    core: ReplyCore,
}

impl AuthReply {
    pub(crate) fn new() -> Self {
        Self { core: ReplyCore::default() }
    }

    pub fn authenticated(&mut self, credentials: Credentials) -> AuthDecision {
        self.finalize_auth(AuthDecision::Authenticated { credentials, artifacts: None })
    }

    pub fn authenticated_with_artifacts(&mut self, credentials: Credentials, artifacts: serde_json::Value) -> AuthDecision {
        self.finalize_auth(AuthDecision::Authenticated { credentials, artifacts: Some(artifacts) })
    }

    /// No credentials were presented at all; the negotiator records the
    /// challenge and tries the next strategy.
    pub fn unauthenticated_missing(&mut self, fault: Fault) -> AuthDecision {
        self.finalize_auth(AuthDecision::Unauthenticated { fault, missing: true, partial: None })
    }

    /// Credentials were presented but rejected.
    pub fn unauthenticated(&mut self, fault: Fault) -> AuthDecision {
        self.finalize_auth(AuthDecision::Unauthenticated { fault, missing: false, partial: None })
    }

    /// An invalid-credentials failure that still carries partial credentials,
    /// kept for logging before the rejection is surfaced.
    pub fn unauthenticated_with_partial(&mut self, fault: Fault, partial: Credentials) -> AuthDecision {
        self.finalize_auth(AuthDecision::Unauthenticated { fault, missing: false, partial: Some(partial) })
    }

    fn finalize_auth(&mut self, decision: AuthDecision) -> AuthDecision {
        // Reuse the single-use check; the action itself is unused.
        let _ = self.core.finalize(ReplyAction::Continue);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ext_reply() -> ExtReply {
        ExtReply::new(Arc::new(Decorations::default()))
    }

    #[test]
    #[should_panic(expected = "reply finalized twice")]
    fn double_finalize_panics() {
        let mut reply = ext_reply();
        let _ = reply.respond("first");
        let _ = reply.respond("second");
    }

    #[test]
    #[should_panic(expected = "reply finalized twice")]
    fn proceed_then_respond_panics() {
        let mut reply = ext_reply();
        let _ = reply.proceed();
        let _ = reply.respond("late");
    }

    #[test]
    #[should_panic(expected = "reply finalized twice")]
    fn auth_double_decision_panics() {
        let mut reply = AuthReply::new();
        let _ = reply.unauthenticated_missing(Fault::unauthorized("none"));
        let _ = reply.authenticated(Credentials::user("u"));
    }

    #[test]
    fn state_does_not_finalize() {
        let mut reply = ext_reply();
        reply.state(Cookie::new("sid", "abc"));
        reply.unstate("old");

        let decision = reply.respond("done");
        assert!(!decision.is_continue());
        assert_eq!(reply.take_cookie_ops().len(), 2);
    }

    #[test]
    fn wrap_does_not_finalize() {
        let mut reply = ext_reply();
        let mut response = reply.wrap("draft");
        response.code(http::StatusCode::CREATED);
        let decision = reply.respond_with(response);

        match decision.into_action() {
            ReplyAction::Respond(response) => assert_eq!(response.status(), http::StatusCode::CREATED),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn decoration_names_are_guarded() {
        let mut decorations = Decorations::default();
        let method: DecorationFn = Arc::new(|_req| ReplyValue::Text("decorated".to_owned()));

        assert!(matches!(
            decorations.register("redirect", method.clone()),
            Err(ConfigError::ReservedDecoration(_))
        ));
        decorations.register("view", method.clone()).unwrap();
        assert!(matches!(decorations.register("view", method), Err(ConfigError::DuplicateDecoration(_))));
    }

    #[test]
    fn decoration_runs_against_the_request() {
        let mut decorations = Decorations::default();
        decorations
            .register("echo_path", Arc::new(|req: &mut Request| ReplyValue::Text(req.path().to_owned())))
            .unwrap();

        let reply = ExtReply::new(Arc::new(decorations));
        let mut request =
            Request::from_http(http::Request::builder().uri("/widgets").body(Bytes::new()).unwrap());

        match reply.decorated("echo_path", &mut request) {
            Some(ReplyValue::Text(path)) => assert_eq!(path, "/widgets"),
            other => panic!("unexpected decoration result: {other:?}"),
        }
        assert!(reply.decorated("missing", &mut request).is_none());
    }
}
