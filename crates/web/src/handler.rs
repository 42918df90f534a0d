//! Route handlers and prerequisites.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::fault::Fault;
use crate::reply::{HandlerReply, Reply};
use crate::request::Request;
use crate::response::ReplyValue;

/// The main route callback. A handler must always produce a decision;
/// there is no continue at this stage.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &mut Request, reply: &mut HandlerReply) -> Result<Reply, Fault>;
}

pub struct HandlerFn<F>(F);

/// Wraps a boxed-future closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut HandlerReply) -> BoxFuture<'a, Result<Reply, Fault>> + Send + Sync,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut HandlerReply) -> BoxFuture<'a, Result<Reply, Fault>> + Send + Sync,
{
    async fn handle(&self, request: &mut Request, reply: &mut HandlerReply) -> Result<Reply, Fault> {
        (self.0)(request, reply).await
    }
}

/// A pre-handler data-fetching step.
///
/// Prerequisites in one group run concurrently, so they see the request
/// read-only; their results are assigned once the whole group completes.
#[async_trait]
pub trait Prerequisite: Send + Sync {
    async fn call(&self, request: &Request) -> Result<ReplyValue, Fault>;
}

pub struct PreFn<F>(F);

pub fn pre_fn<F>(f: F) -> PreFn<F>
where
    F: for<'a> Fn(&'a Request) -> BoxFuture<'a, Result<ReplyValue, Fault>> + Send + Sync,
{
    PreFn(f)
}

#[async_trait]
impl<F> Prerequisite for PreFn<F>
where
    F: for<'a> Fn(&'a Request) -> BoxFuture<'a, Result<ReplyValue, Fault>> + Send + Sync,
{
    async fn call(&self, request: &Request) -> Result<ReplyValue, Fault> {
        (self.0)(request).await
    }
}

/// What a failing prerequisite does to the pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FailAction {
    /// Abort with the error.
    #[default]
    Error,
    /// Log, assign the error value, continue.
    Log,
    /// Assign the error value, continue silently.
    Ignore,
}

/// One prerequisite entry on a route.
pub struct RoutePre {
    pub(crate) method: Arc<dyn Prerequisite>,
    pub(crate) assign: String,
    pub(crate) fail_action: FailAction,
}

impl RoutePre {
    pub fn new(assign: impl Into<String>, method: Arc<dyn Prerequisite>) -> Self {
        Self { method, assign: assign.into(), fail_action: FailAction::Error }
    }

    pub fn fail_action(mut self, action: FailAction) -> Self {
        self.fail_action = action;
        self
    }
}

impl std::fmt::Debug for RoutePre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutePre")
            .field("assign", &self.assign)
            .field("fail_action", &self.fail_action)
            .finish()
    }
}
