//! Lifecycle extension points.
//!
//! Callbacks register at a named point with an owning group and optional
//! before/after constraints referencing other groups. The registry keeps each
//! point totally ordered with a stable topological sort, re-run on every
//! registration so a constraint cycle surfaces at startup, never at request
//! time. Invocation is strictly sequential; callbacks may depend on request
//! mutation ordering.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error};

use crate::config::ConfigError;
use crate::fault::Fault;
use crate::reply::{Decorations, ExtReply, Reply, ReplyAction};
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtPoint {
    OnRequest,
    OnPreAuth,
    OnPostAuth,
    OnPreHandler,
    OnPostHandler,
    OnPreResponse,
}

impl ExtPoint {
    pub fn name(self) -> &'static str {
        match self {
            ExtPoint::OnRequest => "onRequest",
            ExtPoint::OnPreAuth => "onPreAuth",
            ExtPoint::OnPostAuth => "onPostAuth",
            ExtPoint::OnPreHandler => "onPreHandler",
            ExtPoint::OnPostHandler => "onPostHandler",
            ExtPoint::OnPreResponse => "onPreResponse",
        }
    }
}

#[async_trait]
pub trait ExtHandler: Send + Sync {
    async fn run(&self, request: &mut Request, reply: &mut ExtReply) -> Result<Reply, Fault>;
}

pub struct ExtFn<F>(F);

/// Wraps a boxed-future closure as an [`ExtHandler`].
pub fn ext_fn<F>(f: F) -> ExtFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ExtReply) -> BoxFuture<'a, Result<Reply, Fault>> + Send + Sync,
{
    ExtFn(f)
}

#[async_trait]
impl<F> ExtHandler for ExtFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ExtReply) -> BoxFuture<'a, Result<Reply, Fault>> + Send + Sync,
{
    async fn run(&self, request: &mut Request, reply: &mut ExtReply) -> Result<Reply, Fault> {
        (self.0)(request, reply).await
    }
}

/// Ordering constraints for one registration.
#[derive(Debug, Default, Clone)]
pub struct ExtOptions {
    /// Owning group identifier, usually a plugin name. Constraints reference
    /// groups, not individual callbacks.
    pub group: Option<String>,
    /// Groups this callback must run before.
    pub before: Vec<String>,
    /// Groups this callback must run after.
    pub after: Vec<String>,
}

impl ExtOptions {
    pub fn group(name: impl Into<String>) -> Self {
        Self { group: Some(name.into()), ..Self::default() }
    }

    pub fn before(mut self, group: impl Into<String>) -> Self {
        self.before.push(group.into());
        self
    }

    pub fn after(mut self, group: impl Into<String>) -> Self {
        self.after.push(group.into());
        self
    }
}

struct Node {
    handler: Arc<dyn ExtHandler>,
    group: String,
    before: Vec<String>,
    after: Vec<String>,
    seq: usize,
}

#[derive(Default)]
struct PointRegistry {
    nodes: Vec<Node>,
    /// Indices into `nodes` in execution order.
    order: Vec<usize>,
}

impl PointRegistry {
    /// Stable Kahn's algorithm: among ready nodes, lowest registration
    /// sequence wins, so unconstrained callbacks keep insertion order.
    fn sort(&mut self, point: ExtPoint) -> Result<(), ConfigError> {
        let n = self.nodes.len();
        let mut by_group: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            by_group.entry(node.group.as_str()).or_default().push(idx);
        }

        // edge a -> b means a runs before b
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (idx, node) in self.nodes.iter().enumerate() {
            for group in &node.before {
                for &target in by_group.get(group.as_str()).into_iter().flatten() {
                    if target != idx {
                        edges[idx].push(target);
                        indegree[target] += 1;
                    }
                }
            }
            for group in &node.after {
                for &source in by_group.get(group.as_str()).into_iter().flatten() {
                    if source != idx {
                        edges[source].push(idx);
                        indegree[idx] += 1;
                    }
                }
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        while order.len() < n {
            let next = (0..n).find(|&idx| !placed[idx] && indegree[idx] == 0);
            let Some(idx) = next else {
                let mut groups: Vec<String> = (0..n)
                    .filter(|&idx| !placed[idx])
                    .map(|idx| self.nodes[idx].group.clone())
                    .collect();
                groups.dedup();
                return Err(ConfigError::ExtensionCycle { point, groups });
            };
            placed[idx] = true;
            for &target in &edges[idx] {
                indegree[target] -= 1;
            }
            order.push(idx);
        }

        self.order = order;
        Ok(())
    }
}

/// The outcome of running one lifecycle point.
#[derive(Debug)]
pub enum ExtOutcome {
    Continue,
    Finalized(Response),
    /// A callback returned an error. Equivalent to a finalized error
    /// response everywhere except inside the final pre-response point,
    /// where the driver degrades to a minimal fallback body instead.
    Failed(Fault),
    Closed,
}

#[derive(Default)]
pub struct ExtRegistry {
    points: HashMap<ExtPoint, PointRegistry>,
    next_seq: usize,
}

impl ExtRegistry {
    /// Registers a callback and re-sorts the point. A constraint cycle is
    /// rejected here, at configuration time.
    pub fn add(
        &mut self,
        point: ExtPoint,
        handler: Arc<dyn ExtHandler>,
        options: ExtOptions,
    ) -> Result<(), ConfigError> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let registry = self.points.entry(point).or_default();
        registry.nodes.push(Node {
            handler,
            group: options.group.unwrap_or_else(|| format!("x{seq}")),
            before: options.before,
            after: options.after,
            seq,
        });
        registry.sort(point)
    }

    pub fn is_empty(&self, point: ExtPoint) -> bool {
        self.points.get(&point).is_none_or(|registry| registry.nodes.is_empty())
    }

    /// Runs the point's callbacks in sorted order, one at a time. The first
    /// non-continue decision ends the point; remaining callbacks never run.
    pub(crate) async fn invoke(
        &self,
        point: ExtPoint,
        request: &mut Request,
        decorations: &Arc<Decorations>,
    ) -> ExtOutcome {
        let Some(registry) = self.points.get(&point) else {
            return ExtOutcome::Continue;
        };

        for &idx in &registry.order {
            let node = &registry.nodes[idx];
            let mut reply = ExtReply::new(Arc::clone(decorations));
            let result = node.handler.run(request, &mut reply).await;
            request.absorb_cookie_ops(reply.take_cookie_ops());

            match result {
                Ok(reply) => match reply.into_action() {
                    ReplyAction::Continue => {
                        debug!(point = point.name(), group = %node.group, seq = node.seq, "extension continued");
                    }
                    ReplyAction::Respond(response) | ReplyAction::TakeOver(response) => {
                        debug!(point = point.name(), group = %node.group, "extension finalized response");
                        return ExtOutcome::Finalized(response);
                    }
                    ReplyAction::Close => return ExtOutcome::Closed,
                },
                Err(fault) => {
                    error!(point = point.name(), group = %node.group, %fault, "extension failed");
                    return ExtOutcome::Failed(fault);
                }
            }
        }

        ExtOutcome::Continue
    }

    /// Execution-order sequence numbers for one point, for diagnostics.
    pub fn sorted_seqs(&self, point: ExtPoint) -> Vec<usize> {
        self.points
            .get(&point)
            .map(|registry| registry.order.iter().map(|&idx| registry.nodes[idx].seq).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn noop() -> Arc<dyn ExtHandler> {
        Arc::new(ext_fn(|_req, reply| Box::pin(async move { Ok(reply.proceed()) })))
    }

    fn request() -> Request {
        Request::from_http(http::Request::builder().uri("/").body(Bytes::new()).unwrap())
    }

    #[test]
    fn sort_respects_constraints_and_insertion_order() {
        let mut registry = ExtRegistry::default();
        let add = |registry: &mut ExtRegistry, options: ExtOptions| {
            registry.add(ExtPoint::OnRequest, noop(), options).unwrap();
        };

        add(&mut registry, ExtOptions::default().before("a")); // seq 0
        add(&mut registry, ExtOptions::group("a")); // seq 1
        add(&mut registry, ExtOptions::group("a").before("b")); // seq 2
        add(&mut registry, ExtOptions::group("b")); // seq 3
        add(&mut registry, ExtOptions::group("b").after("c")); // seq 4
        add(&mut registry, ExtOptions::group("c")); // seq 5

        let first = registry.sorted_seqs(ExtPoint::OnRequest);
        assert_eq!(first, [0, 1, 2, 3, 5, 4]);

        // Re-sorting must be deterministic.
        for _ in 0..5 {
            registry.points.get_mut(&ExtPoint::OnRequest).unwrap().sort(ExtPoint::OnRequest).unwrap();
            assert_eq!(registry.sorted_seqs(ExtPoint::OnRequest), first);
        }
    }

    #[test]
    fn unconstrained_callbacks_keep_insertion_order() {
        let mut registry = ExtRegistry::default();
        for _ in 0..4 {
            registry.add(ExtPoint::OnPreHandler, noop(), ExtOptions::default()).unwrap();
        }
        assert_eq!(registry.sorted_seqs(ExtPoint::OnPreHandler), [0, 1, 2, 3]);
    }

    #[test]
    fn cycle_is_a_configuration_error() {
        let mut registry = ExtRegistry::default();
        registry.add(ExtPoint::OnRequest, noop(), ExtOptions::group("a").before("b")).unwrap();
        let err = registry.add(ExtPoint::OnRequest, noop(), ExtOptions::group("b").before("a")).unwrap_err();

        match err {
            ConfigError::ExtensionCycle { point, groups } => {
                assert_eq!(point, ExtPoint::OnRequest);
                assert_eq!(groups, ["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn first_finalization_skips_the_rest() {
        let mut registry = ExtRegistry::default();
        let second_ran = Arc::new(AtomicBool::new(false));

        registry
            .add(
                ExtPoint::OnPreHandler,
                Arc::new(ext_fn(|_req, reply| Box::pin(async move { Ok(reply.respond("first wins")) }))),
                ExtOptions::default(),
            )
            .unwrap();
        let flag = Arc::clone(&second_ran);
        registry
            .add(
                ExtPoint::OnPreHandler,
                Arc::new(ext_fn(move |_req, reply| {
                    let flag = Arc::clone(&flag);
                    Box::pin(async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(reply.proceed())
                    })
                })),
                ExtOptions::default(),
            )
            .unwrap();

        let decorations = Arc::new(Decorations::default());
        let outcome = registry.invoke(ExtPoint::OnPreHandler, &mut request(), &decorations).await;

        assert!(matches!(outcome, ExtOutcome::Finalized(_)));
        assert!(!second_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn callback_error_ends_the_point() {
        let mut registry = ExtRegistry::default();
        registry
            .add(
                ExtPoint::OnRequest,
                Arc::new(ext_fn(|_req, _reply| {
                    Box::pin(async move { Err(Fault::service_unavailable("warming up")) })
                })),
                ExtOptions::default(),
            )
            .unwrap();

        let decorations = Arc::new(Decorations::default());
        match registry.invoke(ExtPoint::OnRequest, &mut request(), &decorations).await {
            ExtOutcome::Failed(fault) => {
                assert_eq!(fault.status(), http::StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
