//! Worker primitives exposed to JavaScript
//!
//! Worker contexts get `self`, `postMessage`, `onmessage` and
//! `addEventListener("message", ..)` bound to their port. Every context gets
//! `setInterval`, `clearInterval` and the `Worker` class.
//!
//! JS functions never leave their context. The native side only hands out
//! `CallbackRef` slots into a per-context `CallbackTable`, and the worker core
//! passes those slots back when it wants a callback invoked.

use boa_engine::{
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction, Source,
    object::builtins::JsMap, property::PropertyKey,
};
use boa_gc::{Finalize, Trace};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::script::{CallbackRef, ContextScope, Value};
use crate::worker::{IntervalId, WorkerHandle, check_constructor_args};

/// Strong references to the JS functions registered with the worker core
#[derive(Clone, Trace, Finalize)]
pub(crate) struct CallbackTable {
    functions: JsMap,
    #[unsafe_ignore_trace]
    next_slot: Rc<Cell<u32>>,
}

impl CallbackTable {
    pub(crate) fn new(context: &mut Context) -> Self {
        Self {
            functions: JsMap::new(context),
            next_slot: Rc::new(Cell::new(1)),
        }
    }

    pub(crate) fn retain(&self, function: JsValue, context: &mut Context) -> JsResult<CallbackRef> {
        let slot = self.next_slot.get();
        self.next_slot.set(slot.wrapping_add(1));
        self.functions.set(slot, function, context)?;
        Ok(CallbackRef::new(slot))
    }

    pub(crate) fn release(&self, callback: CallbackRef, context: &mut Context) -> JsResult<()> {
        self.functions.delete(callback.slot(), context)?;
        Ok(())
    }

    /// Number of retained functions
    pub(crate) fn len(&self, context: &mut Context) -> JsResult<usize> {
        let size = self.functions.get_size(context)?;
        Ok(size.to_u32(context)? as usize)
    }

    /// The function behind `callback`, or `undefined` once released
    pub(crate) fn get(&self, callback: CallbackRef, context: &mut Context) -> JsResult<JsValue> {
        self.functions.get(callback.slot(), context)
    }

    fn lookup(&self, callback: Option<CallbackRef>, context: &mut Context) -> JsResult<JsValue> {
        match callback {
            Some(callback) => self.get(callback, context),
            None => Ok(JsValue::null()),
        }
    }

    /// Release a replaced or removed callback, if there was one
    fn forget(&self, previous: Option<CallbackRef>, context: &mut Context) -> JsResult<JsValue> {
        if let Some(previous) = previous {
            self.release(previous, context)?;
        }
        Ok(JsValue::undefined())
    }
}

/// Captured by every native function of one context
#[derive(Clone, Trace, Finalize)]
pub(crate) struct Host {
    #[unsafe_ignore_trace]
    scope: Rc<ContextScope>,
    callbacks: CallbackTable,
    /// Live workers created from this context, by thread id
    #[unsafe_ignore_trace]
    handles: Rc<RefCell<HashMap<u32, WorkerHandle>>>,
}

impl Host {
    pub(crate) fn new(scope: ContextScope, callbacks: CallbackTable) -> Self {
        Self {
            scope: Rc::new(scope),
            callbacks,
            handles: Rc::default(),
        }
    }

    pub(crate) fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    /// Number of workers this context still holds a handle for
    pub(crate) fn live_workers(&self) -> usize {
        self.handles.borrow().len()
    }

    /// The handle behind a `Worker`'s thread id. Terminated workers are gone
    /// from the table, so every operation on them is a no-op.
    fn handle(&self, id: &JsValue, context: &mut Context) -> JsResult<Option<WorkerHandle>> {
        let id = id.to_u32(context)?;
        Ok(self.handles.borrow().get(&id).cloned())
    }

    /// Turn a handler assignment into a callback slot
    fn handler(&self, value: &JsValue, context: &mut Context) -> JsResult<Handler> {
        if value.is_callable() {
            Ok(Handler::Set(self.callbacks.retain(value.clone(), context)?))
        } else if value.is_null_or_undefined() {
            Ok(Handler::Clear)
        } else {
            Ok(Handler::Invalid)
        }
    }
}

enum Handler {
    Set(CallbackRef),
    Clear,
    Invalid,
}

impl Handler {
    /// The callback to register, or `None` for a value that must be ignored
    fn into_callback(self) -> Option<Option<CallbackRef>> {
        match self {
            Handler::Set(callback) => Some(Some(callback)),
            Handler::Clear => Some(None),
            Handler::Invalid => {
                tracing::error!("[set_onmessage]: argument is neither a function nor null");
                None
            }
        }
    }
}

type HostFn = fn(&JsValue, &[JsValue], &Host, &mut Context) -> JsResult<JsValue>;

fn register(
    context: &mut Context,
    host: &Host,
    name: &str,
    length: usize,
    body: HostFn,
) -> JsResult<()> {
    context.register_global_callable(
        JsString::from(name),
        length,
        NativeFunction::from_copy_closure_with_captures(body, host.clone()),
    )
}

fn data_clone_error(message: impl std::fmt::Display) -> JsNativeError {
    JsNativeError::typ().with_message(format!("DataCloneError: {message}"))
}

/// Convert a JS value into a message payload.
///
/// Functions cannot be cloned into another context, at any depth.
pub(crate) fn to_message(value: &JsValue, context: &mut Context) -> JsResult<Value> {
    reject_functions(value, &mut Vec::new(), context)?;
    let json = value.to_json(context).map_err(data_clone_error)?;
    Ok(json.unwrap_or(Value::Null))
}

fn reject_functions(
    value: &JsValue,
    seen: &mut Vec<JsObject>,
    context: &mut Context,
) -> JsResult<()> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };
    if object.is_callable() {
        return Err(data_clone_error("function could not be cloned").into());
    }
    // Cycles are left for `to_json` to report
    if seen.iter().any(|parent| JsObject::equals(parent, &object)) {
        return Ok(());
    }
    seen.push(object.clone());

    for key in object.own_property_keys(context)? {
        if matches!(key, PropertyKey::Symbol(_)) {
            continue;
        }
        let property = object.get(key, context)?;
        reject_functions(&property, seen, context)?;
    }
    Ok(())
}

/// Install the worker primitives of `host` into `context`
pub(crate) fn install(host: &Host, context: &mut Context) -> JsResult<()> {
    let is_worker = host.scope.is_worker();
    let host = host.clone();

    register(context, &host, "setInterval", 2, set_interval)?;
    register(context, &host, "clearInterval", 1, clear_interval)?;

    register(context, &host, "__krait_worker_create", 1, worker_create)?;
    register(context, &host, "__krait_worker_post", 2, worker_post)?;
    register(context, &host, "__krait_worker_get_onmessage", 1, worker_get_onmessage)?;
    register(context, &host, "__krait_worker_set_onmessage", 2, worker_set_onmessage)?;
    register(context, &host, "__krait_worker_add_listener", 3, worker_add_listener)?;
    register(context, &host, "__krait_worker_terminate", 1, worker_terminate)?;
    context.eval(Source::from_bytes(WORKER_CLASS.as_bytes()))?;

    if is_worker {
        register(context, &host, "postMessage", 1, post_message)?;
        register(context, &host, "addEventListener", 2, add_event_listener)?;
        register(context, &host, "__krait_get_onmessage", 0, get_onmessage)?;
        register(context, &host, "__krait_set_onmessage", 1, set_onmessage)?;
        context.eval(Source::from_bytes(WORKER_SCOPE.as_bytes()))?;
    }

    Ok(())
}

const WORKER_CLASS: &str = r#"
    globalThis.Worker = class Worker {
        #id;

        constructor(...args) {
            this.#id = __krait_worker_create(...args);
        }

        get threadId() {
            return this.#id;
        }

        get onmessage() {
            return __krait_worker_get_onmessage(this.#id);
        }

        set onmessage(listener) {
            __krait_worker_set_onmessage(this.#id, listener);
        }

        postMessage(...args) {
            __krait_worker_post(this.#id, ...args);
        }

        addEventListener(...args) {
            __krait_worker_add_listener(this.#id, ...args);
        }

        terminate() {
            __krait_worker_terminate(this.#id);
        }
    };
"#;

const WORKER_SCOPE: &str = r#"
    globalThis.self = globalThis;
    Object.defineProperty(globalThis, 'onmessage', {
        get() { return __krait_get_onmessage(); },
        set(listener) { __krait_set_onmessage(listener); },
        configurable: true,
    });
"#;

// ============================================================================
// Worker side
// ============================================================================

fn post_message(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    if args.len() > 1 {
        tracing::warn!("only support 1 argument for postMessage");
    }
    let Some(port) = host.scope.port.as_ref() else {
        return Ok(JsValue::undefined());
    };

    let message = to_message(args.get_or_undefined(0), context)?;
    port.to_owner()
        .post(&message)
        .map_err(|error| JsNativeError::typ().with_message(error.to_string()))?;
    Ok(JsValue::undefined())
}

fn get_onmessage(
    _this: &JsValue,
    _args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let callback = host.scope.port.as_ref().and_then(|port| port.to_worker().callback());
    host.callbacks.lookup(callback, context)
}

fn set_onmessage(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(port) = host.scope.port.as_ref() else {
        return Ok(JsValue::undefined());
    };
    match host.handler(args.get_or_undefined(0), context)?.into_callback() {
        Some(callback) => {
            let previous = port.to_worker().set_callback(callback);
            host.callbacks.forget(previous, context)
        }
        None => Ok(JsValue::undefined()),
    }
}

fn add_event_listener(
    this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    if args.len() < 2 {
        return Ok(JsValue::undefined());
    }
    let event = args[0].to_string(context)?.to_std_string_escaped();
    if event != "message" {
        tracing::warn!("Trying to add listener for unknown event {}", event);
        return Ok(JsValue::undefined());
    }
    set_onmessage(this, &args[1..], host, context)
}

// ============================================================================
// Intervals
// ============================================================================

fn set_interval(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let function = args.get_or_undefined(0);
    if !function.is_callable() {
        return Err(JsNativeError::typ()
            .with_message("setInterval: callback is not a function")
            .into());
    }

    let delay = args.get_or_undefined(1);
    let period = if delay.is_undefined() {
        None
    } else {
        Some(delay.to_number(context)? / 1000.0)
    };

    let callback = host.callbacks.retain(function.clone(), context)?;
    let id = host.scope.intervals.add(callback, period);
    Ok(JsValue::from(id.get()))
}

fn clear_interval(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let id = args.get_or_undefined(0);
    if id.is_null_or_undefined() {
        return Ok(JsValue::undefined());
    }

    let id = IntervalId::new(id.to_u32(context)?);
    let removed = host.scope.intervals.remove(id);
    host.callbacks.forget(removed, context)
}

// ============================================================================
// Owner side
// ============================================================================

fn worker_create(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    check_constructor_args(args.len())
        .map_err(|error| JsNativeError::typ().with_message(error.to_string()))?;

    let script = args[0].to_string(context)?.to_std_string_escaped();
    let handle = host
        .scope
        .spawner
        .spawn(&host.scope.workers, &script)
        .map_err(|error| JsNativeError::error().with_message(error.to_string()))?;

    let id = handle.id().get();
    host.handles.borrow_mut().insert(id, handle);
    Ok(JsValue::from(id))
}

fn worker_post(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    if args.len() > 2 {
        tracing::warn!("only support 1 argument for postMessage");
    }
    let Some(handle) = host.handle(args.get_or_undefined(0), context)? else {
        return Ok(JsValue::undefined());
    };
    let message = to_message(args.get_or_undefined(1), context)?;
    handle
        .post(&message)
        .map_err(|error| JsNativeError::typ().with_message(error.to_string()))?;
    Ok(JsValue::undefined())
}

fn worker_get_onmessage(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let callback = host
        .handle(args.get_or_undefined(0), context)?
        .and_then(|handle| handle.on_message());
    host.callbacks.lookup(callback, context)
}

fn worker_set_onmessage(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(handle) = host.handle(args.get_or_undefined(0), context)? else {
        return Ok(JsValue::undefined());
    };
    match host.handler(args.get_or_undefined(1), context)?.into_callback() {
        Some(callback) => {
            let previous = handle.set_on_message(callback);
            host.callbacks.forget(previous, context)
        }
        None => Ok(JsValue::undefined()),
    }
}

fn worker_add_listener(
    this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    // Thread id, event type and listener
    if args.len() < 3 {
        return Ok(JsValue::undefined());
    }
    let event = args[1].to_string(context)?.to_std_string_escaped();
    if event != "message" {
        tracing::warn!("Trying to add listener for unknown event {}", event);
        return Ok(JsValue::undefined());
    }
    let forwarded = [args[0].clone(), args[2].clone()];
    worker_set_onmessage(this, &forwarded, host, context)
}

fn worker_terminate(
    _this: &JsValue,
    args: &[JsValue],
    host: &Host,
    context: &mut Context,
) -> JsResult<JsValue> {
    let id = args.get_or_undefined(0).to_u32(context)?;
    let removed = host.handles.borrow_mut().remove(&id);
    let Some(handle) = removed else {
        return Ok(JsValue::undefined());
    };
    handle.terminate(&host.scope.workers);
    let previous = handle.set_on_message(None);
    host.callbacks.forget(previous, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_table() {
        let mut context = Context::default();
        let table = CallbackTable::new(&mut context);
        let function = context
            .eval(Source::from_bytes(b"(() => 1)"))
            .unwrap();

        let a = table.retain(function.clone(), &mut context).unwrap();
        let b = table.retain(function, &mut context).unwrap();
        assert_ne!(a, b);
        assert!(table.get(a, &mut context).unwrap().is_callable());

        table.release(a, &mut context).unwrap();
        assert!(table.get(a, &mut context).unwrap().is_undefined());
        assert!(table.get(b, &mut context).unwrap().is_callable());
    }

    #[test]
    fn test_to_message() {
        let mut context = Context::default();
        let value = context
            .eval(Source::from_bytes(br#"({ a: [1, "two", null], b: { c: true } })"#))
            .unwrap();
        assert_eq!(
            to_message(&value, &mut context).unwrap(),
            serde_json::json!({"a": [1, "two", null], "b": {"c": true}})
        );
        assert_eq!(
            to_message(&JsValue::undefined(), &mut context).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_to_message_rejects_bigint() {
        let mut context = Context::default();
        let value = context.eval(Source::from_bytes(b"10n")).unwrap();
        assert!(to_message(&value, &mut context).is_err());
    }

    #[test]
    fn test_to_message_rejects_functions() {
        let mut context = Context::default();
        let function = context.eval(Source::from_bytes(b"(() => 1)")).unwrap();
        let error = to_message(&function, &mut context).unwrap_err();
        assert!(error.to_string().contains("DataCloneError"));
    }

    #[test]
    fn test_to_message_rejects_nested_functions() {
        let mut context = Context::default();
        for source in [
            "({ a: () => 1, b: 2 })",
            "[1, [2, function f() {}]]",
            "({ deep: { method() {} } })",
        ] {
            let value = context.eval(Source::from_bytes(source.as_bytes())).unwrap();
            assert!(to_message(&value, &mut context).is_err(), "{source}");
        }
    }

    #[test]
    fn test_to_message_reports_cycles() {
        let mut context = Context::default();
        let value = context
            .eval(Source::from_bytes(b"(() => { const a = {}; a.self = a; return a; })()"))
            .unwrap();
        assert!(to_message(&value, &mut context).is_err());
    }
}
