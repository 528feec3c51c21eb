//! Once a request has been decoded and validated, it needs to be routed to
//! the handler registered for its method name.  The mapping lives in
//! [`Router`].
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::handler::Handler;

/// Type alias for the handlers map to simplify the type signature
type HandlersMap = Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>;

/// Method name -> handler registry, shared between the server front-end and
/// every live connection.
///
/// Much simpler than an HTTP router: method names are matched as strings,
/// exactly as registered.  Registration is allowed at any time; a lookup
/// sees whatever was registered most recently under that name.
#[derive(Clone, Default)]
pub struct Router {
    handlers: HandlersMap,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.handlers.read().unwrap().len())
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a method name.  Registering the same name
    /// twice replaces the previous handler; this is not an error.
    pub fn register<H>(&self, method: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        let mut handlers = self.handlers.write().unwrap();
        handlers.insert(method.into(), Arc::new(handler));
    }

    pub fn lookup(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().unwrap().get(method).cloned()
    }

    /// Remove every registered method.
    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, json};

    fn constant(value: JsonValue) -> impl Handler {
        move |_params: JsonValue| {
            let value = value.clone();
            async move { Ok(value) }
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let router = Router::new();
        router.register("a", constant(json!(1)));

        let handler = router.lookup("a").expect("registered method");
        assert_eq!(handler.call(json!([])).await.unwrap(), json!(1));

        assert!(router.lookup("b").is_none());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let router = Router::new();
        router.register("a", constant(json!("first")));
        router.register("a", constant(json!("second")));

        let handler = router.lookup("a").expect("registered method");
        assert_eq!(handler.call(json!([])).await.unwrap(), json!("second"));
    }

    #[test]
    fn clear_empties_the_registry() {
        let router = Router::new();
        router.register("a", constant(json!(1)));
        router.register("b", constant(json!(2)));

        router.clear();

        assert!(router.lookup("a").is_none());
        assert!(router.lookup("b").is_none());
    }
}
