//! Thread-local correlation context
//!
//! The well-known `String -> String` mapping used to correlate log lines
//! across threads, mirrored from diagnostic-context facilities in other
//! logging stacks. The scheduler treats this map as a fixed, built-in
//! propagator; the library itself never inspects its contents.
//!
//! The contract is exactly three operations: obtain a copy
//! ([`copy_of_context`]), replace the mapping with a copy ([`set_context`]),
//! and wipe it ([`clear`]). `put`/`get`/`remove` are per-key conveniences on
//! top.

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CONTEXT: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

/// Associate `value` with `key` in the calling thread's context
pub fn put(key: impl Into<String>, value: impl Into<String>) {
    CONTEXT.with(|context| {
        context.borrow_mut().insert(key.into(), value.into());
    });
}

/// Look up `key` in the calling thread's context
pub fn get(key: &str) -> Option<String> {
    CONTEXT.with(|context| context.borrow().get(key).cloned())
}

/// Remove `key` from the calling thread's context, returning its value
pub fn remove(key: &str) -> Option<String> {
    CONTEXT.with(|context| context.borrow_mut().remove(key))
}

/// Obtain a copy of the calling thread's entire context
pub fn copy_of_context() -> HashMap<String, String> {
    CONTEXT.with(|context| context.borrow().clone())
}

/// Replace the calling thread's context with a copy of `map`
pub fn set_context(map: HashMap<String, String>) {
    CONTEXT.with(|context| {
        *context.borrow_mut() = map;
    });
}

/// Wipe the calling thread's context
pub fn clear() {
    CONTEXT.with(|context| {
        context.borrow_mut().clear();
    });
}

/// Whether the calling thread's context holds no entries
pub fn is_empty() -> bool {
    CONTEXT.with(|context| context.borrow().is_empty())
}
