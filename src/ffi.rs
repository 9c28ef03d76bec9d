//! FFI bindings for attention-link
//!
//! C-compatible functions for embedding the attention reducer and alert policy
//! in a host application that owns its own socket. All functions take C strings
//! (null-terminated) and return allocated memory that must be freed by the
//! caller using `attn_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::alert;
use crate::config::DEFAULT_TIMELINE_CAPACITY;
use crate::protocol::ServerMessage;
use crate::reducer::AttentionReducer;
use crate::types::{window_label, AttentionLevel, SubjectId};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn to_json_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

unsafe fn parse_level(ptr: *const c_char, what: &str) -> Option<AttentionLevel> {
    let Some(text) = cstr_to_string(ptr) else {
        set_last_error(&format!("Invalid {} string pointer", what));
        return None;
    };
    match text.parse() {
        Ok(level) => Some(level),
        Err(e) => {
            set_last_error(&e);
            None
        }
    }
}

// ============================================================================
// Reducer API
// ============================================================================

/// Opaque handle to an AttentionReducer
pub struct AttentionReducerHandle {
    reducer: AttentionReducer,
}

/// Create a reducer keeping at most `capacity` samples per subject.
///
/// # Safety
/// - Returns a pointer to a newly allocated reducer.
/// - Must be freed with `attn_reducer_free`.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_new(capacity: i32) -> *mut AttentionReducerHandle {
    clear_last_error();

    let capacity = if capacity <= 0 {
        DEFAULT_TIMELINE_CAPACITY
    } else {
        capacity as usize
    };

    let handle = Box::new(AttentionReducerHandle {
        reducer: AttentionReducer::new(capacity),
    });
    Box::into_raw(handle)
}

/// Free a reducer.
///
/// # Safety
/// - `reducer` must be a valid pointer returned by `attn_reducer_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_free(reducer: *mut AttentionReducerHandle) {
    if !reducer.is_null() {
        drop(Box::from_raw(reducer));
    }
}

/// Fold one inbound server frame.
///
/// `active_subject` is the subject whose stream is open, or a negative value
/// when no profile stream is active.
///
/// # Safety
/// - `reducer` must be a valid pointer returned by `attn_reducer_new`.
/// - `frame` must be a valid null-terminated C string.
/// - Returns the level change as JSON, or the string `null` when the frame
///   carried no level (ignored or dropped). Free with `attn_free_string`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_apply_frame(
    reducer: *mut AttentionReducerHandle,
    frame: *const c_char,
    active_subject: i64,
) -> *mut c_char {
    clear_last_error();

    if reducer.is_null() {
        set_last_error("Null reducer pointer");
        return ptr::null_mut();
    }

    let handle = &mut *reducer;

    let frame_str = match cstr_to_string(frame) {
        Some(s) => s,
        None => {
            set_last_error("Invalid frame string pointer");
            return ptr::null_mut();
        }
    };

    let message = match ServerMessage::decode(&frame_str) {
        Ok(message) => message,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let active = SubjectId::try_from(active_subject).ok();
    let change = handle.reducer.apply(&message, active);
    to_json_cstr(&change)
}

/// Timeline of one subject as a JSON array of samples, oldest first.
///
/// # Safety
/// - `reducer` must be a valid pointer returned by `attn_reducer_new`.
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_timeline(
    reducer: *mut AttentionReducerHandle,
    subject_id: u32,
) -> *mut c_char {
    clear_last_error();

    if reducer.is_null() {
        set_last_error("Null reducer pointer");
        return ptr::null_mut();
    }

    let handle = &*reducer;
    to_json_cstr(&handle.reducer.timeline(subject_id))
}

/// Subjects whose current level is Low, as a JSON array of ids.
///
/// # Safety
/// - `reducer` must be a valid pointer returned by `attn_reducer_new`.
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_low_set(reducer: *mut AttentionReducerHandle) -> *mut c_char {
    clear_last_error();

    if reducer.is_null() {
        set_last_error("Null reducer pointer");
        return ptr::null_mut();
    }

    let handle = &*reducer;
    to_json_cstr(&handle.reducer.aggregate_low_set())
}

/// Save reducer state to JSON.
///
/// # Safety
/// - `reducer` must be a valid pointer returned by `attn_reducer_new`.
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_save(reducer: *mut AttentionReducerHandle) -> *mut c_char {
    clear_last_error();

    if reducer.is_null() {
        set_last_error("Null reducer pointer");
        return ptr::null_mut();
    }

    let handle = &*reducer;

    match handle.reducer.to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Replace reducer state with JSON produced by `attn_reducer_save`.
///
/// # Safety
/// - `reducer` must be a valid pointer returned by `attn_reducer_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_reducer_load(
    reducer: *mut AttentionReducerHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if reducer.is_null() {
        set_last_error("Null reducer pointer");
        return -1;
    }

    let handle = &mut *reducer;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match AttentionReducer::from_json(&json_str) {
        Ok(loaded) => {
            handle.reducer = loaded;
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Decide whether a level transition raises an alert.
///
/// # Safety
/// - `previous` and `current` must be valid null-terminated C strings holding
///   `Low`, `Mid` or `High`.
/// - Returns 1 if an alert fires, 0 if not, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn attn_alert_evaluate(
    previous: *const c_char,
    current: *const c_char,
    enabled: bool,
) -> i32 {
    clear_last_error();

    let Some(previous) = parse_level(previous, "previous level") else {
        return -1;
    };
    let Some(current) = parse_level(current, "current level") else {
        return -1;
    };

    i32::from(alert::evaluate(previous, current, enabled))
}

/// Time label for a 1-based window number, e.g. `15-20s` for window 4.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
#[no_mangle]
pub unsafe extern "C" fn attn_window_label(window: u32) -> *mut c_char {
    clear_last_error();
    string_to_cstr(&window_label(window))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by attention-link functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an `attn_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn attn_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next `attn_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn attn_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn attn_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        attn_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_reducer_lifecycle() {
        unsafe {
            let reducer = attn_reducer_new(0);
            assert!(!reducer.is_null());

            let update = CString::new(
                r#"{"type":"dashboard_update","child_id":3,"attention_level":"Low"}"#,
            )
            .unwrap();
            let change = take_string(attn_reducer_apply_frame(reducer, update.as_ptr(), -1));
            assert!(change.contains(r#""current":"Low""#));

            let sample = CString::new(
                r#"{"type":"profile_data","window":4,"attention_level":"High"}"#,
            )
            .unwrap();
            let change = take_string(attn_reducer_apply_frame(reducer, sample.as_ptr(), 5));
            assert!(change.contains("15-20s"));

            let timeline = take_string(attn_reducer_timeline(reducer, 5));
            assert!(timeline.starts_with('['));
            assert!(timeline.contains(r#""window":4"#));

            assert_eq!(take_string(attn_reducer_low_set(reducer)), "[3]");

            // Save into a fresh reducer
            let saved = attn_reducer_save(reducer);
            assert!(!saved.is_null());
            let reducer2 = attn_reducer_new(10);
            assert_eq!(attn_reducer_load(reducer2, saved), 0);
            assert_eq!(take_string(attn_reducer_low_set(reducer2)), "[3]");

            attn_free_string(saved);
            attn_reducer_free(reducer);
            attn_reducer_free(reducer2);
        }
    }

    #[test]
    fn test_ffi_profile_frame_without_stream_returns_null_json() {
        unsafe {
            let reducer = attn_reducer_new(5);
            let sample = CString::new(
                r#"{"type":"profile_data","window":1,"attention_level":"Mid"}"#,
            )
            .unwrap();
            let change = take_string(attn_reducer_apply_frame(reducer, sample.as_ptr(), -1));
            assert_eq!(change, "null");
            attn_reducer_free(reducer);
        }
    }

    #[test]
    fn test_ffi_largest_window_frame() {
        unsafe {
            let reducer = attn_reducer_new(5);
            let sample = CString::new(
                r#"{"type":"profile_data","window":4294967295,"attention_level":"Low"}"#,
            )
            .unwrap();
            let change = take_string(attn_reducer_apply_frame(reducer, sample.as_ptr(), 4));
            assert!(change.contains("21474836470-21474836475s"));
            attn_reducer_free(reducer);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let reducer = attn_reducer_new(5);
            let invalid = CString::new("not json").unwrap();

            let result = attn_reducer_apply_frame(reducer, invalid.as_ptr(), -1);
            assert!(result.is_null());

            let error = attn_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            assert!(attn_reducer_low_set(ptr::null_mut()).is_null());
            assert_eq!(attn_reducer_load(reducer, invalid.as_ptr()), -1);
            attn_reducer_free(reducer);
        }
    }

    #[test]
    fn test_ffi_alert_evaluate() {
        let low = CString::new("Low").unwrap();
        let mid = CString::new("Mid").unwrap();
        let bogus = CString::new("Sleepy").unwrap();

        unsafe {
            assert_eq!(attn_alert_evaluate(mid.as_ptr(), low.as_ptr(), true), 1);
            assert_eq!(attn_alert_evaluate(low.as_ptr(), low.as_ptr(), true), 0);
            assert_eq!(attn_alert_evaluate(mid.as_ptr(), low.as_ptr(), false), 0);
            assert_eq!(attn_alert_evaluate(bogus.as_ptr(), low.as_ptr(), true), -1);
            assert!(!attn_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_window_label() {
        unsafe {
            assert_eq!(take_string(attn_window_label(4)), "15-20s");
            assert_eq!(take_string(attn_window_label(1)), "0-5s");
            assert_eq!(
                take_string(attn_window_label(u32::MAX)),
                "21474836470-21474836475s"
            );
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = attn_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
