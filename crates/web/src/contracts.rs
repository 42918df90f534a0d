//! Contracts for external collaborators.
//!
//! The lifecycle engine does not ship cache backends or template engines; it
//! consumes them through these narrow traits. Applications hand in an
//! implementation and use it from handlers and prerequisites.

use async_trait::async_trait;
use serde_json::Value;

use crate::fault::Fault;

/// A cache backend keyed by opaque string keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, Fault>;
    async fn set(&self, key: &str, value: Value, ttl_ms: u64) -> Result<(), Fault>;
    async fn drop_key(&self, key: &str) -> Result<(), Fault>;
}

/// A template renderer.
#[cfg_attr(test, mockall::automock)]
pub trait ViewManager: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String, Fault>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::route::RouteSpec;
    use crate::server::Server;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use mockall::predicate::eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn handler_reads_through_a_cache_client() {
        let mut cache = MockCacheClient::new();
        cache
            .expect_get()
            .with(eq("widgets/7"))
            .times(1)
            .returning(|_| Ok(Some(serde_json::json!({"id": 7}))));
        let cache: Arc<dyn CacheClient> = Arc::new(cache);

        let server = Server::builder()
            .route(RouteSpec::get(
                "/widgets/{id}",
                Arc::new(handler_fn(move |req, reply| {
                    let cache = Arc::clone(&cache);
                    Box::pin(async move {
                        let key = format!("widgets/{}", req.param("id").unwrap_or_default());
                        match cache.get(&key).await? {
                            Some(value) => Ok(reply.respond(value)),
                            None => Ok(reply.fault(Fault::not_found("no such widget"))),
                        }
                    })
                })),
            ))
            .build()
            .unwrap();

        let response = server
            .inject(http::Request::builder().uri("/widgets/7").body(Bytes::new()).unwrap())
            .await;
        assert_eq!(response.status(), http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), br#"{"id":7}"#);
    }

    #[tokio::test]
    async fn handler_renders_through_a_view_manager() {
        let mut views = MockViewManager::new();
        views
            .expect_render()
            .withf(|template, _context| template == "greeting")
            .returning(|_, context| Ok(format!("<p>hello {}</p>", context["name"].as_str().unwrap_or("?"))));
        let views: Arc<dyn ViewManager> = Arc::new(views);

        let server = Server::builder()
            .route(RouteSpec::get(
                "/hello/{name}",
                Arc::new(handler_fn(move |req, reply| {
                    let views = Arc::clone(&views);
                    Box::pin(async move {
                        let context = serde_json::json!({"name": req.param("name").unwrap_or_default()});
                        let rendered = views.render("greeting", &context)?;
                        Ok(reply.respond(rendered))
                    })
                })),
            ))
            .build()
            .unwrap();

        let response = server
            .inject(http::Request::builder().uri("/hello/ada").body(Bytes::new()).unwrap())
            .await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"<p>hello ada</p>");
    }
}
