// resilient_ws_client/src/client/dispatch.rs

//! 处理器注册表与消息分发。
//!
//! 三类处理器的注册语义不同：
//! - 消息处理器：每个精确类型至多一个，后注册的覆盖先注册的；另有一个通配处理器。
//! - 错误处理器：每个错误分类可叠加任意多个，按注册顺序调用；另有通配分类。
//! - 生命周期处理器（open / close / unhandled）：每种至多一个，后注册的覆盖先注册的。
//!
//! 任何处理器 panic 都会被捕获并记录日志，不会影响其它处理器或连接状态。

use log::{debug, error, warn};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{ErrorCategory, ErrorEvent};
use crate::message::Envelope;

pub type MessageHandler = Box<dyn FnMut(&Envelope) + Send + 'static>;
pub type ErrorHandler = Box<dyn FnMut(&ErrorEvent) + Send + 'static>;
pub type LifecycleHandler = Box<dyn FnMut(&LifecycleEvent) + Send + 'static>;

/// 连接生命周期事件。它们不是错误，也不走消息类型注册表。
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Open,
    Close { code: u16, reason: String },
    /// 合法信封既没有精确处理器也没有通配处理器。
    Unhandled { message_type: String, data: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Open,
    Close,
    Unhandled,
}

impl LifecycleEvent {
    pub fn kind(&self) -> LifecycleKind {
        match self {
            LifecycleEvent::Open => LifecycleKind::Open,
            LifecycleEvent::Close { .. } => LifecycleKind::Close,
            LifecycleEvent::Unhandled { .. } => LifecycleKind::Unhandled,
        }
    }
}

/// 一条入站消息最终交给了谁。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Exact,
    Wildcard,
    Unhandled,
}

#[derive(Default)]
pub struct HandlerRegistry {
    message_handlers: HashMap<String, MessageHandler>,
    wildcard_handler: Option<MessageHandler>,
    error_handlers: HashMap<ErrorCategory, Vec<ErrorHandler>>,
    wildcard_error_handlers: Vec<ErrorHandler>,
    lifecycle_handlers: HashMap<LifecycleKind, LifecycleHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.message_handlers.keys().collect::<Vec<_>>())
            .field("has_wildcard", &self.wildcard_handler.is_some())
            .field("error_categories", &self.error_handlers.keys().collect::<Vec<_>>())
            .field("wildcard_error_handlers", &self.wildcard_error_handlers.len())
            .field("lifecycle", &self.lifecycle_handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为精确类型注册处理器。返回 `true` 表示覆盖了已有的处理器。
    pub fn on(&mut self, message_type: impl Into<String>, handler: MessageHandler) -> bool {
        let message_type = message_type.into();
        let replaced = self.message_handlers.insert(message_type.clone(), handler).is_some();
        if replaced {
            debug!("[分发] 类型 '{}' 的处理器已被覆盖", message_type);
        }
        replaced
    }

    pub fn on_any(&mut self, handler: MessageHandler) -> bool {
        self.wildcard_handler.replace(handler).is_some()
    }

    /// 追加错误处理器，`None` 表示通配分类。
    pub fn on_error(&mut self, category: Option<ErrorCategory>, handler: ErrorHandler) {
        match category {
            Some(category) => self.error_handlers.entry(category).or_default().push(handler),
            None => self.wildcard_error_handlers.push(handler),
        }
    }

    pub fn on_lifecycle(&mut self, kind: LifecycleKind, handler: LifecycleHandler) -> bool {
        self.lifecycle_handlers.insert(kind, handler).is_some()
    }

    /// 精确类型优先，其次通配，都没有则发出 `unhandled` 生命周期事件。每条消息只会交给一个处理器。
    pub fn dispatch(&mut self, envelope: &Envelope) -> DispatchOutcome {
        if let Some(handler) = self.message_handlers.get_mut(&envelope.message_type) {
            invoke_guarded(&envelope.message_type, || handler(envelope));
            return DispatchOutcome::Exact;
        }
        if let Some(handler) = self.wildcard_handler.as_mut() {
            invoke_guarded("*", || handler(envelope));
            return DispatchOutcome::Wildcard;
        }
        warn!("[分发] 未处理的消息类型: {}", envelope.message_type);
        self.emit_lifecycle(&LifecycleEvent::Unhandled {
            message_type: envelope.message_type.clone(),
            data: envelope.data.clone(),
        });
        DispatchOutcome::Unhandled
    }

    /// 依次调用该分类的处理器与通配处理器，返回实际调用的数量。
    pub fn emit_error(&mut self, event: &ErrorEvent) -> usize {
        let category = event.category();
        let mut invoked = 0;
        let specific = self.error_handlers.get_mut(&category).into_iter().flatten();
        for handler in specific.chain(self.wildcard_error_handlers.iter_mut()) {
            invoke_guarded(category.as_str(), || handler(event));
            invoked += 1;
        }
        invoked
    }

    pub fn emit_lifecycle(&mut self, event: &LifecycleEvent) -> bool {
        match self.lifecycle_handlers.get_mut(&event.kind()) {
            Some(handler) => {
                invoke_guarded(&format!("{:?}", event.kind()), || handler(event));
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.message_handlers.clear();
        self.wildcard_handler = None;
        self.error_handlers.clear();
        self.wildcard_error_handlers.clear();
        self.lifecycle_handlers.clear();
    }
}

/// 调用处理器并捕获 panic。返回 `false` 表示处理器 panic 了。
fn invoke_guarded<F: FnOnce()>(label: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            error!("[分发] 处理器 '{}' 执行时发生 panic: {}", label, panic_message(&panic));
            false
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_envelope;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn FnMut(&Envelope) + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = log.clone();
        let factory = move |tag: &str| {
            let log = log_for_factory.clone();
            let tag = tag.to_string();
            Box::new(move |env: &Envelope| {
                log.lock().unwrap().push(format!("{}:{}", tag, env.message_type));
            }) as MessageHandler
        };
        (log, factory)
    }

    #[test]
    fn test_exact_handler_takes_precedence_over_wildcard() {
        let (log, handler) = recorder();
        let mut registry = HandlerRegistry::new();
        registry.on("foo", handler("exact"));
        registry.on_any(handler("any"));

        let foo = parse_envelope(r#"{"type":"foo"}"#).unwrap();
        let bar = parse_envelope(r#"{"type":"bar"}"#).unwrap();
        assert_eq!(registry.dispatch(&foo), DispatchOutcome::Exact);
        assert_eq!(registry.dispatch(&bar), DispatchOutcome::Wildcard);
        assert_eq!(*log.lock().unwrap(), vec!["exact:foo", "any:bar"]);
    }

    #[test]
    fn test_last_exact_registration_wins() {
        let (log, handler) = recorder();
        let mut registry = HandlerRegistry::new();
        assert!(!registry.on("foo", handler("first")));
        assert!(registry.on("foo", handler("second")));

        registry.dispatch(&parse_envelope(r#"{"type":"foo"}"#).unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["second:foo"]);
    }

    #[test]
    fn test_unhandled_message_emits_lifecycle_event() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_handler = seen.clone();
        let mut registry = HandlerRegistry::new();
        registry.on_lifecycle(
            LifecycleKind::Unhandled,
            Box::new(move |event| *seen_in_handler.lock().unwrap() = Some(event.clone())),
        );

        let env = parse_envelope(r#"{"type":"mystery","n":1}"#).unwrap();
        assert_eq!(registry.dispatch(&env), DispatchOutcome::Unhandled);
        match seen.lock().unwrap().clone() {
            Some(LifecycleEvent::Unhandled { message_type, data }) => {
                assert_eq!(message_type, "mystery");
                assert_eq!(data["n"], 1);
            }
            other => panic!("预期 unhandled 事件，实际为 {:?}", other),
        }
    }

    #[test]
    fn test_error_handlers_stack_and_include_wildcard() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for tag in ["close-1", "close-2"] {
            let calls = calls.clone();
            registry.on_error(
                Some(ErrorCategory::WsClose),
                Box::new(move |e| calls.lock().unwrap().push(format!("{}:{}", tag, e.category().as_str()))),
            );
        }
        let wildcard_calls = calls.clone();
        registry.on_error(
            None,
            Box::new(move |e| wildcard_calls.lock().unwrap().push(format!("all:{}", e.category().as_str()))),
        );

        let invoked = registry.emit_error(&ErrorEvent::WsClose { code: 1006, reason: "x".into() });
        assert_eq!(invoked, 3);
        let invoked = registry.emit_error(&ErrorEvent::WsError { error: "boom".into() });
        assert_eq!(invoked, 1);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["close-1:ws_close", "close-2:ws_close", "all:ws_close", "all:ws_error"]
        );
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let calls = Arc::new(Mutex::new(0));
        let mut registry = HandlerRegistry::new();
        registry.on_error(Some(ErrorCategory::ParseError), Box::new(|_| panic!("处理器故障")));
        let counter = calls.clone();
        registry.on_error(None, Box::new(move |_| *counter.lock().unwrap() += 1));
        registry.on("boom", Box::new(|_| panic!("消息处理器故障")));

        let invoked = registry.emit_error(&ErrorEvent::ParseError { error: "e".into(), raw_data: "r".into() });
        assert_eq!(invoked, 2);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(
            registry.dispatch(&parse_envelope(r#"{"type":"boom"}"#).unwrap()),
            DispatchOutcome::Exact
        );
    }

    #[test]
    fn test_clear_removes_every_handler() {
        let (log, handler) = recorder();
        let mut registry = HandlerRegistry::new();
        registry.on("foo", handler("exact"));
        registry.on_any(handler("any"));
        registry.on_error(None, Box::new(|_| {}));
        registry.clear();

        assert_eq!(
            registry.dispatch(&parse_envelope(r#"{"type":"foo"}"#).unwrap()),
            DispatchOutcome::Unhandled
        );
        assert_eq!(registry.emit_error(&ErrorEvent::WsError { error: "e".into() }), 0);
        assert!(log.lock().unwrap().is_empty());
    }
}
