use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

// ============================================================================
// Callback Dispatcher
// ============================================================================
//
// Registry: category -> ordered handler list. Each list is an immutable
// `Arc<Vec<_>>` snapshot; registration copies the list, appends and swaps
// the Arc in. Dispatch clones the Arc under a short read lock and runs the
// handlers without holding any lock, so handlers may register more handlers
// and registration never waits on a slow handler.
//
// A failing or panicking handler is recorded in the DispatchReport and the
// remaining handlers still run.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackCategory {
    NewOrder,
    StatusChanged,
    OrderCanceled,
    DriverAssigned,
    MerchantStatus,
    MerchantOffline,
    Alert,
    PollError,
}

impl CallbackCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackCategory::NewOrder => "new_order",
            CallbackCategory::StatusChanged => "status_changed",
            CallbackCategory::OrderCanceled => "order_canceled",
            CallbackCategory::DriverAssigned => "driver_assigned",
            CallbackCategory::MerchantStatus => "merchant_status",
            CallbackCategory::MerchantOffline => "merchant_offline",
            CallbackCategory::Alert => "alert",
            CallbackCategory::PollError => "poll_error",
        }
    }
}

impl fmt::Display for CallbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait CallbackHandler: Send + Sync {
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, category: CallbackCategory, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// Adapts an async closure into a handler
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> CallbackHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _category: CallbackCategory, payload: &serde_json::Value) -> anyhow::Result<()> {
        (self.f)(payload.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    pub handler: String,
    /// Registration position within the category
    pub position: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type HandlerList = Arc<Vec<Arc<dyn CallbackHandler>>>;

#[derive(Default)]
pub struct CallbackDispatcher {
    registry: RwLock<HashMap<CallbackCategory, HandlerList>>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, category: CallbackCategory, handler: Arc<dyn CallbackHandler>) {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut handlers: Vec<Arc<dyn CallbackHandler>> = registry
            .get(&category)
            .map(|list| list.as_ref().clone())
            .unwrap_or_default();
        handlers.push(handler);
        registry.insert(category, Arc::new(handlers));

        tracing::debug!(category = %category, "Callback registered");
    }

    pub fn register_fn<F, Fut>(&self, category: CallbackCategory, name: &str, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(category, Arc::new(FnHandler::new(name, f)));
    }

    pub fn handler_count(&self, category: CallbackCategory) -> usize {
        self.snapshot(category).len()
    }

    fn snapshot(&self, category: CallbackCategory) -> HandlerList {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// Invoke every handler of `category` in registration order
    pub async fn dispatch(&self, category: CallbackCategory, payload: serde_json::Value) -> DispatchReport {
        let handlers = self.snapshot(category);
        let mut report = DispatchReport::default();

        for (position, handler) in handlers.iter().enumerate() {
            report.invoked += 1;

            let outcome = AssertUnwindSafe(handler.handle(category, &payload))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };

            tracing::error!(
                category = %category,
                handler = handler.name(),
                position = position,
                error = %error,
                "Callback handler failed"
            );
            report.failures.push(HandlerFailure {
                handler: handler.name().to_string(),
                position,
                error,
            });
        }

        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    type Ready = futures_util::future::Ready<anyhow::Result<()>>;

    fn ok() -> Ready {
        futures_util::future::ready(Ok(()))
    }

    fn recorder(
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(serde_json::Value) -> Ready + Send + Sync {
        move |_payload| {
            log.lock().unwrap().push(label.to_string());
            ok()
        }
    }

    struct Failing;

    #[async_trait]
    impl CallbackHandler for Failing {
        fn name(&self) -> &str {
            "fails"
        }

        async fn handle(&self, _category: CallbackCategory, _payload: &serde_json::Value) -> anyhow::Result<()> {
            anyhow::bail!("webhook returned 500")
        }
    }

    struct Panicking;

    #[async_trait]
    impl CallbackHandler for Panicking {
        fn name(&self) -> &str {
            "panics"
        }

        async fn handle(&self, _category: CallbackCategory, _payload: &serde_json::Value) -> anyhow::Result<()> {
            panic!("handler bug")
        }
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let dispatcher = CallbackDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register_fn(CallbackCategory::NewOrder, "first", recorder(log.clone(), "first"));
        dispatcher.register_fn(CallbackCategory::NewOrder, "second", recorder(log.clone(), "second"));
        dispatcher.register_fn(CallbackCategory::Alert, "other", recorder(log.clone(), "other"));

        let report = dispatcher.dispatch(CallbackCategory::NewOrder, json!({"order_id": "1"})).await;

        assert_eq!(report.invoked, 2);
        assert!(report.is_clean());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let dispatcher = CallbackDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register_fn(CallbackCategory::StatusChanged, "ok", recorder(log.clone(), "ok"));
        dispatcher.register(CallbackCategory::StatusChanged, Arc::new(Failing));
        dispatcher.register(CallbackCategory::StatusChanged, Arc::new(Panicking));
        dispatcher.register_fn(CallbackCategory::StatusChanged, "last", recorder(log.clone(), "last"));

        let report = dispatcher.dispatch(CallbackCategory::StatusChanged, json!({})).await;

        assert_eq!(report.invoked, 4);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].handler, "fails");
        assert_eq!(report.failures[0].position, 1);
        assert!(report.failures[0].error.contains("500"));
        assert_eq!(report.failures[1].handler, "panics");
        assert!(report.failures[1].error.contains("handler bug"));
        assert_eq!(*log.lock().unwrap(), vec!["ok", "last"]);
    }

    #[tokio::test]
    async fn test_registration_during_dispatch_applies_to_next_dispatch() {
        let dispatcher = Arc::new(CallbackDispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner = dispatcher.clone();
        let inner_log = log.clone();
        dispatcher.register_fn(CallbackCategory::Alert, "registrar", move |_payload| {
            inner.register_fn(CallbackCategory::Alert, "late", recorder(inner_log.clone(), "late"));
            ok()
        });

        let first = dispatcher.dispatch(CallbackCategory::Alert, json!({})).await;
        assert_eq!(first.invoked, 1);
        assert!(log.lock().unwrap().is_empty());

        let second = dispatcher.dispatch(CallbackCategory::Alert, json!({})).await;
        assert_eq!(second.invoked, 2);
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_dispatch() {
        let dispatcher = Arc::new(CallbackDispatcher::new());

        let mut tasks = Vec::new();
        for i in 0..20 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    dispatcher.register_fn(CallbackCategory::PollError, "noop", |_payload| ok());
                } else {
                    let report = dispatcher.dispatch(CallbackCategory::PollError, json!({})).await;
                    assert!(report.is_clean());
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(dispatcher.handler_count(CallbackCategory::PollError), 10);
    }

    #[tokio::test]
    async fn test_dispatch_without_handlers_is_empty() {
        let dispatcher = CallbackDispatcher::new();
        let report = dispatcher.dispatch(CallbackCategory::MerchantOffline, json!(null)).await;
        assert_eq!(report, DispatchReport::default());
    }
}
