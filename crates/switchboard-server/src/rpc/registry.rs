//! Method registry and async dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use switchboard_rpc::errors::{self, code_name};
use switchboard_rpc::{Message, RpcError, RpcRequest};
use tracing::{error, info, warn};

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUESTS_TOTAL, RPC_REQUEST_DURATION_SECONDS};
use crate::rpc::context::RpcContext;

/// Default upper bound on a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Handlers slower than this are logged.
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(5);

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    handler_timeout: Duration,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Change the per-invocation handler timeout.
    pub fn set_handler_timeout(&mut self, timeout: Duration) {
        self.handler_timeout = timeout;
    }

    /// Current handler timeout.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Register a handler. Re-registering a name replaces the old handler.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        if self
            .handlers
            .insert(method.to_owned(), Arc::new(handler))
            .is_some()
        {
            warn!(method, "method handler replaced");
        }
    }

    /// Dispatch a request and produce exactly one reply carrying its id.
    pub async fn dispatch(&self, request: RpcRequest, ctx: &RpcContext) -> Message {
        let RpcRequest { id, method, params } = request;
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "method_not_found")
                .increment(1);
            info!(
                tenant_id = %ctx.tenant_id,
                channel_ref = %ctx.channel_ref(),
                method = %method,
                "unknown method"
            );
            return Message::error(
                id,
                errors::METHOD_NOT_FOUND,
                format!("Method '{method}' not found"),
            );
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            self.handler_timeout,
            AssertUnwindSafe(handler.handle(params, ctx)).catch_unwind(),
        )
        .await;

        let reply = match outcome {
            Ok(Ok(Ok(result))) => Message::success(id, result),
            Ok(Ok(Err(err))) => {
                let code = err.code();
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => code_name(code))
                    .increment(1);
                match &err {
                    RpcError::Internal { message } => error!(
                        tenant_id = %ctx.tenant_id,
                        channel_ref = %ctx.channel_ref(),
                        method = %method,
                        error = %message,
                        "handler failed"
                    ),
                    _ => info!(
                        tenant_id = %ctx.tenant_id,
                        channel_ref = %ctx.channel_ref(),
                        method = %method,
                        code,
                        error = %err,
                        "handler rejected request"
                    ),
                }
                Message::error_body(id, err.to_error_body())
            }
            Ok(Err(panic)) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "panic")
                    .increment(1);
                error!(
                    tenant_id = %ctx.tenant_id,
                    channel_ref = %ctx.channel_ref(),
                    method = %method,
                    panic = panic_message(panic.as_ref()),
                    "handler panicked"
                );
                Message::error(id, errors::INTERNAL_ERROR, errors::SANITIZED_INTERNAL_MESSAGE)
            }
            Err(_elapsed) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "timeout")
                    .increment(1);
                error!(
                    tenant_id = %ctx.tenant_id,
                    channel_ref = %ctx.channel_ref(),
                    method = %method,
                    timeout_ms = u64::try_from(self.handler_timeout.as_millis()).unwrap_or(u64::MAX),
                    "handler timed out"
                );
                Message::error(
                    id,
                    errors::INTERNAL_ERROR,
                    format!("Handler for '{method}' timed out"),
                )
            }
        };

        let duration = start.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(duration.as_secs_f64());
        if duration >= SLOW_REQUEST_THRESHOLD {
            warn!(method = %method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        reply
    }

    /// All registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_test_context;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchboard_rpc::RequestId;

    // ── Test handler implementations ────────────────────────────────

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(Value::Null))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Err(RpcError::internal("db at /var/lib/presence.db is locked"))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl MethodHandler for PanicHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            panic!("handler exploded");
        }
    }

    struct GreetHandler;

    #[async_trait]
    impl MethodHandler for GreetHandler {
        async fn handle(&self, params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            let name = crate::rpc::validation::require_string_param(params.as_ref(), "name")?;
            Ok(json!({ "hello": name }))
        }
    }

    struct CustomErrorHandler;

    #[async_trait]
    impl MethodHandler for CustomErrorHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Err(RpcError::Custom {
                code: 4009,
                message: "conflict".into(),
                data: Some(json!({"field": "route"})),
            })
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl MethodHandler for CountingHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!(n))
        }
    }

    struct SlowHandler(Duration);

    #[async_trait]
    impl MethodHandler for SlowHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            tokio::time::sleep(self.0).await;
            Ok(json!("done"))
        }
    }

    fn request(id: &str, method: &str, params: Option<Value>) -> RpcRequest {
        RpcRequest {
            id: RequestId::from(id),
            method: method.into(),
            params,
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn dispatch_success() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);

        let reply = reg.dispatch(request("r1", "echo", Some(json!({"x": 1}))), &ctx).await;
        assert_matches!(reply, Message::Response(r) => {
            assert_eq!(r.id, RequestId::from("r1"));
            assert_eq!(r.result["x"], 1);
        });
    }

    #[tokio::test]
    async fn dispatch_method_not_found_preserves_id() {
        let (ctx, _rx) = make_test_context("t1");
        let reg = MethodRegistry::new();

        let reply = reg.dispatch(request("id-99", "no.such", None), &ctx).await;
        assert_matches!(reply, Message::Error(e) => {
            assert_eq!(e.id, RequestId::from("id-99"));
            assert_eq!(e.error.code, errors::METHOD_NOT_FOUND);
            assert!(e.error.message.contains("no.such"));
        });
    }

    #[tokio::test]
    async fn internal_error_is_sanitized() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("fail", FailHandler);

        let reply = reg.dispatch(request("r3", "fail", None), &ctx).await;
        assert_matches!(reply, Message::Error(e) => {
            assert_eq!(e.id, RequestId::from("r3"));
            assert_eq!(e.error.code, errors::INTERNAL_ERROR);
            assert_eq!(e.error.message, errors::SANITIZED_INTERNAL_MESSAGE);
            assert!(!e.error.message.contains("/var/lib"));
        });
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("boom", PanicHandler);

        let reply = reg.dispatch(request("p1", "boom", None), &ctx).await;
        assert_matches!(reply, Message::Error(e) => {
            assert_eq!(e.id, RequestId::from("p1"));
            assert_eq!(e.error.code, errors::INTERNAL_ERROR);
            assert!(!e.error.message.contains("exploded"));
        });
    }

    #[tokio::test]
    async fn invalid_params_keep_message() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("greet", GreetHandler);

        let reply = reg.dispatch(request("g1", "greet", None), &ctx).await;
        assert_matches!(reply, Message::Error(e) => {
            assert_eq!(e.error.code, errors::INVALID_PARAMS);
            assert!(e.error.message.contains("name"));
        });

        let reply = reg
            .dispatch(request("g2", "greet", Some(json!({"name": "alice"}))), &ctx)
            .await;
        assert_matches!(reply, Message::Response(r) => assert_eq!(r.result["hello"], "alice"));
    }

    #[tokio::test]
    async fn custom_error_keeps_code_and_data() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("conflict", CustomErrorHandler);

        let reply = reg.dispatch(request("c1", "conflict", None), &ctx).await;
        assert_matches!(reply, Message::Error(e) => {
            assert_eq!(e.error.code, 4009);
            assert_eq!(e.error.message, "conflict");
            assert_eq!(e.error.data.unwrap()["field"], "route");
        });
    }

    #[tokio::test]
    async fn handler_invoked_exactly_once() {
        let (ctx, _rx) = make_test_context("t1");
        let hits = Arc::new(AtomicUsize::new(0));
        let mut reg = MethodRegistry::new();
        reg.register("count", CountingHandler(hits.clone()));
        reg.register("other", EchoHandler);

        let reply = reg.dispatch(request("n1", "count", None), &ctx).await;
        assert_matches!(reply, Message::Response(r) => assert_eq!(r.result, json!(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let _ = reg.dispatch(request("n2", "other", None), &ctx).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_internal_error() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("slow", SlowHandler(Duration::from_secs(120)));

        let reply = reg.dispatch(request("r-timeout", "slow", None), &ctx).await;
        assert_matches!(reply, Message::Error(e) => {
            assert_eq!(e.id, RequestId::from("r-timeout"));
            assert_eq!(e.error.code, errors::INTERNAL_ERROR);
            assert_eq!(e.error.message, "Handler for 'slow' timed out");
        });
    }

    #[tokio::test(start_paused = true)]
    async fn custom_handler_timeout() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.set_handler_timeout(Duration::from_millis(100));
        reg.register("slow", SlowHandler(Duration::from_millis(200)));
        reg.register("fast", SlowHandler(Duration::from_millis(50)));

        assert_matches!(reg.dispatch(request("a", "slow", None), &ctx).await, Message::Error(_));
        assert_matches!(reg.dispatch(request("b", "fast", None), &ctx).await, Message::Response(_));
    }

    #[tokio::test]
    async fn register_overwrites_previous() {
        let (ctx, _rx) = make_test_context("t1");
        let mut reg = MethodRegistry::new();
        reg.register("test", EchoHandler);
        reg.register("test", FailHandler);

        let reply = reg.dispatch(request("r1", "test", None), &ctx).await;
        assert_matches!(reply, Message::Error(_));
        assert_eq!(reg.methods(), vec!["test"]);
    }

    #[test]
    fn methods_sorted_and_has_method() {
        let mut reg = MethodRegistry::default();
        assert!(reg.methods().is_empty());
        reg.register("b.method", EchoHandler);
        reg.register("a.method", EchoHandler);
        assert_eq!(reg.methods(), vec!["a.method", "b.method"]);
        assert!(reg.has_method("a.method"));
        assert!(!reg.has_method("c.method"));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
