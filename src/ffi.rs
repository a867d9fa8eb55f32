//! FFI interface for C/C++ hosts
//!
//! Lets a native host run record assembly and selector synthesis over an
//! HTML snapshot. Rules go in and results come out as JSON.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use serde::Serialize;

use crate::assembler::{assemble, preview};
use crate::dom::{HtmlDocument, Scope};
use crate::rules::Rule;
use crate::selector::SelectorSynthesizer;

/// Result struct returned to the host
/// Both pointers are owned by Rust and must be freed via vs_free_result
#[repr(C)]
pub struct ScraperResultFFI {
    /// JSON-serialized result (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message if the call failed (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

#[derive(Serialize)]
struct SynthesizedSelector {
    selector: String,
}

/// Assemble every record the rules describe.
///
/// # Arguments
/// * `html_ptr` - Pointer to HTML content (UTF-8, not necessarily null-terminated)
/// * `html_len` - Length of HTML content in bytes
/// * `rules_json` - JSON array of rules (null-terminated)
///
/// # Returns
/// ScraperResultFFI whose json_ptr holds a JSON array of flat objects
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `rules_json` must be a valid null-terminated C string
/// - Caller must free the result via `vs_free_result`
#[no_mangle]
pub unsafe extern "C" fn vs_assemble_records(
    html_ptr: *const c_char,
    html_len: usize,
    rules_json: *const c_char,
) -> ScraperResultFFI {
    let html = match read_html(html_ptr, html_len) {
        Ok(html) => html,
        Err(msg) => return make_error_result(msg),
    };
    let rules = match read_rules(rules_json) {
        Ok(rules) => rules,
        Err(msg) => return make_error_result(&msg),
    };

    let document = HtmlDocument::parse(&html);
    make_json_result(&assemble(&rules, &document))
}

/// Like `vs_assemble_records`, keeping the first `limit` records.
///
/// # Safety
/// Same as vs_assemble_records
#[no_mangle]
pub unsafe extern "C" fn vs_preview_records(
    html_ptr: *const c_char,
    html_len: usize,
    rules_json: *const c_char,
    limit: usize,
) -> ScraperResultFFI {
    let html = match read_html(html_ptr, html_len) {
        Ok(html) => html,
        Err(msg) => return make_error_result(msg),
    };
    let rules = match read_rules(rules_json) {
        Ok(rules) => rules,
        Err(msg) => return make_error_result(&msg),
    };

    let document = HtmlDocument::parse(&html);
    make_json_result(&preview(&rules, &document, limit))
}

/// Synthesize a selector for the first element matching `target_selector`.
///
/// With a non-null `scope_selector` the selector is relative to the first
/// element that matches it, which must contain the target.
///
/// # Returns
/// ScraperResultFFI whose json_ptr holds `{"selector": "..."}`
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `target_selector` must be a valid null-terminated C string
/// - `scope_selector` must be null or a valid null-terminated C string
#[no_mangle]
pub unsafe extern "C" fn vs_synthesize_selector(
    html_ptr: *const c_char,
    html_len: usize,
    target_selector: *const c_char,
    scope_selector: *const c_char,
) -> ScraperResultFFI {
    let html = match read_html(html_ptr, html_len) {
        Ok(html) => html,
        Err(msg) => return make_error_result(msg),
    };
    let target = match read_str(target_selector, "Target selector") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };
    let scope = if scope_selector.is_null() {
        None
    } else {
        match read_str(scope_selector, "Scope selector") {
            Ok(s) => Some(s),
            Err(msg) => return make_error_result(&msg),
        }
    };

    let document = HtmlDocument::parse(&html);
    match synthesize_in(&document, target, scope) {
        Ok(selector) => make_json_result(&SynthesizedSelector { selector }),
        Err(msg) => make_error_result(&msg),
    }
}

/// Free a ScraperResultFFI returned by any vs_* function
///
/// # Safety
/// - `result` must have been returned by a vs_* function
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn vs_free_result(result: ScraperResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

fn synthesize_in(document: &HtmlDocument, target: &str, scope: Option<&str>) -> Result<String, String> {
    let element = document
        .find(target)
        .ok_or_else(|| format!("No element matches '{}'", target))?;
    let scope = match scope {
        Some(selector) => Scope::Within(
            document
                .find(selector)
                .ok_or_else(|| format!("No element matches scope '{}'", selector))?,
        ),
        None => Scope::Document,
    };

    SelectorSynthesizer::default()
        .try_synthesize(document, element, scope)
        .map_err(|e| e.to_string())
}

unsafe fn read_html(html_ptr: *const c_char, html_len: usize) -> Result<String, &'static str> {
    if html_ptr.is_null() || html_len == 0 {
        return Ok(String::new());
    }
    let slice = std::slice::from_raw_parts(html_ptr as *const u8, html_len);
    std::str::from_utf8(slice)
        .map(str::to_string)
        .map_err(|_| "Invalid UTF-8 in HTML content")
}

unsafe fn read_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{} is null", what));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| format!("Invalid UTF-8 in {}", what.to_lowercase()))
}

unsafe fn read_rules(rules_json: *const c_char) -> Result<Vec<Rule>, String> {
    let json = read_str(rules_json, "Rules JSON")?;
    serde_json::from_str(json).map_err(|e| format!("Failed to parse rules JSON: {}", e))
}

// Helper to create success result
fn make_json_result<T: Serialize + ?Sized>(value: &T) -> ScraperResultFFI {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => ScraperResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

// Helper to create error result
fn make_error_result(msg: &str) -> ScraperResultFFI {
    let error_cstr = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    ScraperResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}
