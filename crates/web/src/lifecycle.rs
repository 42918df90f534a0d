//! The request lifecycle driver.
//!
//! One engine per server, one pass per request:
//!
//! ```text
//! onRequest -> route match -> onPreAuth -> authenticate -> onPostAuth
//!   -> payload parse -> payload auth -> onPreHandler
//!   -> prerequisites -> handler -> onPostHandler
//!   -> onPreResponse -> transmit
//! ```
//!
//! The first point that finalizes a response ends the pass; the driver jumps
//! straight to `onPreResponse`, which runs for every outcome (404s, auth
//! failures, extension errors included) and may replace it. Everything up to
//! transmission is recoverable: errors become error responses and keep
//! flowing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{self, AuthRegistry};
use crate::body::ResponseBody;
use crate::ext::{ExtOutcome, ExtPoint, ExtRegistry};
use crate::fault::Fault;
use crate::handler::FailAction;
use crate::reply::{Decorations, HandlerReply, ReplyAction};
use crate::request::Request;
use crate::response::{ReplyValue, Response};
use crate::route::Router;
use crate::state::Cookie;
use crate::transmit::{self, SecurityConfig, TransmitContext};

pub(crate) struct Engine {
    pub router: Router,
    pub ext: ExtRegistry,
    pub auth: AuthRegistry,
    pub decorations: Arc<Decorations>,
    pub auto_cookies: Vec<Cookie>,
    pub security: Option<SecurityConfig>,
    pub timeout: Option<Duration>,
}

/// How the pipeline ended, before the pre-response point.
enum Flow {
    Respond(Response),
    Close,
}

impl Engine {
    pub(crate) async fn dispatch(&self, req: http::Request<Bytes>) -> http::Response<ResponseBody> {
        self.dispatch_request(Request::from_http(req)).await
    }

    pub(crate) async fn dispatch_request(&self, mut request: Request) -> http::Response<ResponseBody> {
        let flow = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_pipeline(&mut request)).await {
                Ok(flow) => flow,
                Err(_) => {
                    warn!(path = request.path(), "request timed out");
                    Flow::Respond(Response::from_fault(Fault::service_unavailable("Service Unavailable")))
                }
            },
            None => self.run_pipeline(&mut request).await,
        };

        let response = match flow {
            Flow::Close => Response::closed(),
            Flow::Respond(response) => {
                // onPreResponse always runs and may replace any outcome. A
                // failure inside it degrades to the minimal fallback body so
                // the client still gets a response.
                request.set_response(response);
                match self.ext.invoke(ExtPoint::OnPreResponse, &mut request, &self.decorations).await {
                    ExtOutcome::Continue => request.take_response().unwrap_or_else(Response::empty),
                    ExtOutcome::Finalized(replacement) => replacement,
                    ExtOutcome::Failed(fault) => return transmit::fallback(fault.status()),
                    ExtOutcome::Closed => Response::closed(),
                }
            }
        };

        let ctx = TransmitContext {
            auth: &self.auth,
            security: self.security.as_ref(),
            auto_cookies: &self.auto_cookies,
        };
        transmit::finalize(&ctx, &mut request, response).await
    }

    async fn run_pipeline(&self, request: &mut Request) -> Flow {
        macro_rules! point {
            ($point:expr) => {
                match self.ext.invoke($point, request, &self.decorations).await {
                    ExtOutcome::Continue => {}
                    ExtOutcome::Finalized(response) => return Flow::Respond(response),
                    ExtOutcome::Failed(fault) => return Flow::Respond(Response::from_fault(fault)),
                    ExtOutcome::Closed => return Flow::Close,
                }
            };
        }

        point!(ExtPoint::OnRequest);

        let Some((route, params)) = self.router.lookup(request.method(), request.path()) else {
            debug!(method = %request.method(), path = request.path(), "no route matched");
            return Flow::Respond(Response::from_fault(Fault::not_found("Not Found")));
        };
        request.attach_route(Arc::clone(&route), params);

        point!(ExtPoint::OnPreAuth);

        if let Some(route_auth) = route.auth()
            && let Err(fault) = auth::negotiate(&self.auth, route_auth, request).await
        {
            return Flow::Respond(Response::from_fault(fault));
        }

        point!(ExtPoint::OnPostAuth);

        if route.parse_payload
            && let Err(fault) = parse_payload(request)
        {
            return Flow::Respond(Response::from_fault(fault));
        }

        if let Some(route_auth) = route.auth()
            && let Err(fault) = auth::negotiate_payload(&self.auth, route_auth, request).await
        {
            return Flow::Respond(Response::from_fault(fault));
        }

        point!(ExtPoint::OnPreHandler);

        for group in &route.pre {
            let shared: &Request = request;
            let results = join_all(group.iter().map(|pre| pre.method.call(shared))).await;
            for (pre, result) in group.iter().zip(results) {
                match result {
                    Ok(value) => {
                        request.pre.insert(pre.assign.clone(), pre_value(&value));
                        request.pre_responses.insert(pre.assign.clone(), Response::wrap(value));
                    }
                    Err(fault) => match pre.fail_action {
                        FailAction::Error => return Flow::Respond(Response::from_fault(fault)),
                        FailAction::Log => {
                            warn!(assign = %pre.assign, %fault, "prerequisite failed");
                            assign_failure(request, &pre.assign, fault);
                        }
                        FailAction::Ignore => assign_failure(request, &pre.assign, fault),
                    },
                }
            }
        }

        let mut reply = HandlerReply::new(Arc::clone(&self.decorations));
        let result = route.handler.handle(request, &mut reply).await;
        request.absorb_cookie_ops(reply.take_cookie_ops());

        match result {
            Err(fault) => Flow::Respond(Response::from_fault(fault)),
            Ok(reply) => match reply.into_action() {
                ReplyAction::Continue => {
                    Flow::Respond(Response::from_fault(Fault::internal("handler produced no response")))
                }
                // takeover skips the post-handler point
                ReplyAction::TakeOver(response) => Flow::Respond(response),
                ReplyAction::Close => Flow::Close,
                ReplyAction::Respond(response) => {
                    request.set_response(response);
                    match self.ext.invoke(ExtPoint::OnPostHandler, request, &self.decorations).await {
                        ExtOutcome::Continue => {
                            Flow::Respond(request.take_response().unwrap_or_else(Response::empty))
                        }
                        ExtOutcome::Finalized(replacement) => Flow::Respond(replacement),
                        ExtOutcome::Failed(fault) => Flow::Respond(Response::from_fault(fault)),
                        ExtOutcome::Closed => Flow::Close,
                    }
                }
            },
        }
    }
}

/// Parses the body by content type: JSON and form-urlencoded are decoded
/// into a JSON value, text is left raw, anything else is a 415.
fn parse_payload(request: &mut Request) -> Result<(), Fault> {
    if request.payload().is_empty() {
        return Ok(());
    }
    let Some(content_type) = request
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
    else {
        return Ok(());
    };

    match content_type.as_str() {
        "application/json" => {
            let parsed: Value = serde_json::from_slice(request.payload())
                .map_err(|_| Fault::bad_request("Invalid request payload JSON format"))?;
            request.set_parsed_payload(parsed);
            Ok(())
        }
        "application/x-www-form-urlencoded" => {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(request.payload())
                .map_err(|_| Fault::bad_request("Invalid request payload form format"))?;
            let mut object = serde_json::Map::new();
            for (key, value) in pairs {
                object.insert(key, Value::String(value));
            }
            request.set_parsed_payload(Value::Object(object));
            Ok(())
        }
        other if other.starts_with("text/") => Ok(()),
        other => Err(Fault::unsupported_media_type(format!("Unsupported content type: {other}"))),
    }
}

/// The unwrapped value stored at `pre[assign]`. Binary and stream results
/// have no JSON projection and store null; the wrapped response keeps the
/// real payload.
fn pre_value(value: &ReplyValue) -> Value {
    match value {
        ReplyValue::Null | ReplyValue::Binary(_) | ReplyValue::Stream(_) => Value::Null,
        ReplyValue::Text(text) => Value::String(text.clone()),
        ReplyValue::Json(value) => value.clone(),
        ReplyValue::Error(fault) => fault.client_payload(),
    }
}

fn assign_failure(request: &mut Request, assign: &str, fault: Fault) {
    request.pre.insert(assign.to_owned(), fault.client_payload());
    request.pre_responses.insert(assign.to_owned(), Response::from_fault(fault));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_request(body: &str, content_type: &str) -> Request {
        Request::from_http(
            http::Request::builder()
                .method(http::Method::POST)
                .uri("/things")
                .header("content-type", content_type)
                .body(Bytes::from(body.to_owned()))
                .unwrap(),
        )
    }

    #[test]
    fn json_payload_is_parsed() {
        let mut request = json_request(r#"{"name":"widget"}"#, "application/json");
        parse_payload(&mut request).unwrap();
        assert_eq!(request.parsed_payload().unwrap()["name"], "widget");
    }

    #[test]
    fn bad_json_is_a_400() {
        let mut request = json_request("{not json", "application/json");
        let fault = parse_payload(&mut request).unwrap_err();
        assert_eq!(fault.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn form_payload_becomes_an_object() {
        let mut request = json_request("a=1&b=two", "application/x-www-form-urlencoded");
        parse_payload(&mut request).unwrap();
        let parsed = request.parsed_payload().unwrap();
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "two");
    }

    #[test]
    fn unknown_content_type_is_a_415() {
        let mut request = json_request("<xml/>", "application/msword");
        let fault = parse_payload(&mut request).unwrap_err();
        assert_eq!(fault.status(), http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn text_payload_stays_raw() {
        let mut request = json_request("plain words", "text/plain");
        parse_payload(&mut request).unwrap();
        assert!(request.parsed_payload().is_none());
        assert_eq!(request.payload().as_ref(), b"plain words");
    }
}
