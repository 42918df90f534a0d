//! Authentication negotiation.
//!
//! A route carries a resolved auth configuration: a mode, an ordered strategy
//! list and a scope/TOS/entity policy. Per request the negotiator walks the
//! strategies in order. A strategy that saw no credentials at all records its
//! challenge and yields to the next one; invalid credentials are terminal
//! unless the route mode tolerates them. A success is then validated against
//! the policy before the request is marked authenticated.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::fault::Fault;
use crate::reply::AuthReply;
use crate::request::Request;
use crate::response::Response;

/// The identity a strategy produced.
///
/// Either `user` or `app` (or both) should be set; the entity policy
/// distinguishes user-bound from application-bound credentials by the
/// presence of a user identity.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub app: Option<String>,
    pub scope: Vec<String>,
    /// Highest terms-of-service version the principal accepted.
    pub tos: Option<String>,
    /// Scheme-specific baggage.
    pub extra: Value,
}

impl Credentials {
    pub fn user(id: impl Into<String>) -> Self {
        Self { user: Some(id.into()), ..Self::default() }
    }

    pub fn app(id: impl Into<String>) -> Self {
        Self { app: Some(id.into()), ..Self::default() }
    }

    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tos(mut self, tos: impl Into<String>) -> Self {
        self.tos = Some(tos.into());
        self
    }
}

/// Per-request auth state, populated by the negotiator.
#[derive(Debug, Default)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub strategy: Option<String>,
    pub credentials: Option<Credentials>,
    pub artifacts: Option<Value>,
}

/// What one strategy decided, minted through [`AuthReply`].
#[derive(Debug)]
pub enum AuthDecision {
    Authenticated {
        credentials: Credentials,
        artifacts: Option<Value>,
    },
    Unauthenticated {
        fault: Fault,
        /// No credentials were presented, as opposed to invalid ones.
        missing: bool,
        /// Partial credentials kept for logging before rejection.
        partial: Option<Credentials>,
    },
}

#[async_trait]
pub trait AuthScheme: Send + Sync {
    /// Inspects the request and decides through the reply, exactly once.
    async fn authenticate(&self, request: &Request, reply: &mut AuthReply) -> AuthDecision;

    /// Whether this scheme can verify the request payload after parsing.
    fn authenticates_payload(&self) -> bool {
        false
    }

    /// Verifies the parsed payload. `Ok(false)` means the payload carried no
    /// authentication at all; an `Err` means it carried one that failed.
    async fn payload(&self, request: &Request, credentials: &Credentials) -> Result<bool, Fault> {
        let _ = (request, credentials);
        Ok(true)
    }

    /// Runs after all other header computation, immediately before the
    /// response is assembled, so the scheme may sign final headers.
    async fn response(&self, request: &Request, response: &mut Response) {
        let _ = (request, response);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Authentication must succeed.
    #[default]
    Required,
    /// Absent credentials pass through unauthenticated; invalid ones fail.
    Optional,
    /// Both absent and invalid credentials pass through unauthenticated.
    Try,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Entity {
    #[default]
    Any,
    User,
    App,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PayloadAuth {
    #[default]
    Off,
    Required,
    Optional,
}

/// Auth requirements for one route, resolved at registration time.
#[derive(Debug, Clone, Default)]
pub struct RouteAuth {
    pub mode: AuthMode,
    /// Strategy names in negotiation order. Empty means the server default.
    pub strategies: Vec<String>,
    /// Required scope; credentials must intersect it. Empty means no check.
    pub scope: Vec<String>,
    pub entity: Entity,
    pub payload: PayloadAuth,
    /// Minimum accepted TOS version, compared numerically per dotted segment.
    pub tos: Option<String>,
}

impl RouteAuth {
    pub fn required() -> Self {
        Self { mode: AuthMode::Required, ..Self::default() }
    }

    pub fn optional() -> Self {
        Self { mode: AuthMode::Optional, ..Self::default() }
    }

    pub fn try_mode() -> Self {
        Self { mode: AuthMode::Try, ..Self::default() }
    }

    pub fn strategy(mut self, name: impl Into<String>) -> Self {
        self.strategies.push(name.into());
        self
    }

    pub fn scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.entity = entity;
        self
    }

    pub fn payload(mut self, payload: PayloadAuth) -> Self {
        self.payload = payload;
        self
    }

    pub fn tos(mut self, version: impl Into<String>) -> Self {
        self.tos = Some(version.into());
        self
    }
}

/// Named strategies, fixed at server build time.
#[derive(Default, Clone)]
pub struct AuthRegistry {
    strategies: HashMap<String, Arc<dyn AuthScheme>>,
    default_strategy: Option<String>,
}

impl AuthRegistry {
    pub fn add(
        &mut self,
        name: impl Into<String>,
        scheme: Arc<dyn AuthScheme>,
        default: bool,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.strategies.contains_key(&name) {
            return Err(ConfigError::DuplicateStrategy(name));
        }
        if default {
            if let Some(existing) = &self.default_strategy {
                return Err(ConfigError::DefaultStrategyTaken { existing: existing.clone(), requested: name });
            }
            self.default_strategy = Some(name.clone());
        }
        self.strategies.insert(name, scheme);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AuthScheme>> {
        self.strategies.get(name)
    }

    pub fn default_strategy(&self) -> Option<&str> {
        self.default_strategy.as_deref()
    }

    /// Checks a route's strategy list at registration time, substituting the
    /// server default when the route names none.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<String>, ConfigError> {
        if names.is_empty() {
            return match &self.default_strategy {
                Some(default) => Ok(vec![default.clone()]),
                None => Err(ConfigError::UnknownStrategy("<default>".to_owned())),
            };
        }
        for name in names {
            if !self.strategies.contains_key(name) {
                return Err(ConfigError::UnknownStrategy(name.clone()));
            }
        }
        Ok(names.to_vec())
    }
}

impl std::fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRegistry")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("default", &self.default_strategy)
            .finish()
    }
}

/// Walks the route's strategies. `Ok(())` means the pipeline proceeds, either
/// authenticated or deliberately bypassed; `Err` is terminal.
pub(crate) async fn negotiate(
    registry: &AuthRegistry,
    route_auth: &RouteAuth,
    request: &mut Request,
) -> Result<(), Fault> {
    // Credentials injected ahead of the lifecycle (test harness) skip the
    // schemes entirely and go straight to policy validation.
    if let Some(credentials) = request.auth.credentials.clone() {
        validate_policy(&credentials, route_auth)?;
        request.auth.is_authenticated = true;
        request.auth.strategy = Some("bypass".to_owned());
        return Ok(());
    }

    let mut challenges: Vec<String> = Vec::new();

    for name in &route_auth.strategies {
        let Some(scheme) = registry.get(name) else {
            return Err(Fault::internal(format!("strategy '{name}' disappeared after route resolution")));
        };

        let mut reply = AuthReply::new();
        match scheme.authenticate(request, &mut reply).await {
            AuthDecision::Authenticated { credentials, artifacts } => {
                request.auth.strategy = Some(name.clone());
                request.auth.artifacts = artifacts;
                validate_policy(&credentials, route_auth)?;
                request.auth.credentials = Some(credentials);
                request.auth.is_authenticated = true;
                return Ok(());
            }
            AuthDecision::Unauthenticated { fault, missing: true, .. } => {
                debug!(strategy = %name, "no credentials presented, trying next strategy");
                challenges.extend(fault.challenges().iter().cloned());
            }
            AuthDecision::Unauthenticated { fault, missing: false, partial } => {
                if let Some(partial) = partial {
                    warn!(strategy = %name, user = ?partial.user, app = ?partial.app, "credentials rejected");
                }
                if route_auth.mode == AuthMode::Try {
                    debug!(strategy = %name, %fault, "invalid credentials tolerated by try mode");
                    return Ok(());
                }
                return Err(fault);
            }
        }
    }

    match route_auth.mode {
        AuthMode::Optional | AuthMode::Try => Ok(()),
        AuthMode::Required => {
            Err(Fault::unauthorized("Missing authentication").with_challenges(challenges))
        }
    }
}

/// Verifies the parsed payload against the authenticated strategy, when the
/// route asks for it.
pub(crate) async fn negotiate_payload(
    registry: &AuthRegistry,
    route_auth: &RouteAuth,
    request: &Request,
) -> Result<(), Fault> {
    if route_auth.payload == PayloadAuth::Off || !request.auth.is_authenticated {
        return Ok(());
    }
    let (Some(name), Some(credentials)) = (&request.auth.strategy, &request.auth.credentials) else {
        return Ok(());
    };
    let Some(scheme) = registry.get(name) else {
        return Ok(());
    };
    if !scheme.authenticates_payload() {
        return Ok(());
    }

    if scheme.payload(request, credentials).await? || route_auth.payload == PayloadAuth::Optional {
        Ok(())
    } else {
        Err(Fault::unauthorized("Missing payload authentication"))
    }
}

/// Scope, then TOS, then entity; first failure wins.
fn validate_policy(credentials: &Credentials, route_auth: &RouteAuth) -> Result<(), Fault> {
    if !route_auth.scope.is_empty()
        && !route_auth.scope.iter().any(|required| credentials.scope.contains(required))
    {
        return Err(Fault::forbidden("Insufficient scope"));
    }

    if let Some(required) = route_auth.tos.as_deref().filter(|tos| *tos != "none") {
        let accepted = credentials.tos.as_deref().unwrap_or("0");
        if version_cmp(accepted, required) == Ordering::Less {
            return Err(Fault::forbidden("Insufficient TOS accepted"));
        }
    }

    match route_auth.entity {
        Entity::Any => {}
        Entity::User if credentials.user.is_none() => {
            return Err(Fault::forbidden("Application credentials cannot be used on a user endpoint"));
        }
        Entity::App if credentials.user.is_some() => {
            return Err(Fault::forbidden("User credentials cannot be used on an application endpoint"));
        }
        Entity::User | Entity::App => {}
    }

    Ok(())
}

/// Numeric comparison per dotted segment; missing segments count as zero and
/// non-numeric segments as zero, so "9" sorts below "10" and "1.2.0" equals
/// "1.2".
fn version_cmp(left: &str, right: &str) -> Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version.split('.').map(|segment| segment.trim().parse().unwrap_or(0)).collect()
    };
    let left = parse(left);
    let right = parse(right);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
