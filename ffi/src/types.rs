//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible representations:
//! `*mut c_char` instead of `String`, pointer + length instead of `Bytes`,
//! and enums with explicit discriminants. Conversions live here to keep
//! `lib.rs` focused on the `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use netcache_core::{ApiError, Coordinator, HttpMethod, Payload, Persistence, Route, TransportError};

/// Opaque handle. Owns the runtime that exchanges run on and the coordinator
/// that spawns them.
pub struct FfiClient {
    // Dropped before the runtime it spawns on.
    pub(crate) coordinator: Coordinator,
    pub(crate) runtime: tokio::runtime::Runtime,
}

/// Completion callback. Runs on the library's completion thread; the host
/// owns `result` and must release it with `netcache_free_result`.
pub type FfiCallback = extern "C" fn(user_data: *mut c_void, result: *mut FfiResult);

/// Host context handed back to the callback untouched.
pub(crate) struct UserData(pub(crate) *mut c_void);

// The library never dereferences the pointer; it only passes it back to the
// host's callback.
unsafe impl Send for UserData {}

impl UserData {
    pub(crate) fn into_raw(self) -> *mut c_void {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Request inputs
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Patch = 4,
}

impl From<FfiHttpMethod> for HttpMethod {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => HttpMethod::Get,
            FfiHttpMethod::Post => HttpMethod::Post,
            FfiHttpMethod::Put => HttpMethod::Put,
            FfiHttpMethod::Delete => HttpMethod::Delete,
            FfiHttpMethod::Patch => HttpMethod::Patch,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiPersistence {
    None = 0,
    Cache = 1,
}

impl From<FfiPersistence> for Persistence {
    fn from(p: FfiPersistence) -> Self {
        match p {
            FfiPersistence::None => Persistence::None,
            FfiPersistence::Cache => Persistence::Cache,
        }
    }
}

/// What `netcache_request` did with the call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiRoute {
    Dispatched = 0,
    Coalesced = 1,
    Offline = 2,
    Rejected = 3,
}

impl From<Route> for FfiRoute {
    fn from(r: Route) -> Self {
        match r {
            Route::Dispatched => FfiRoute::Dispatched,
            Route::Coalesced => FfiRoute::Coalesced,
            Route::Offline => FfiRoute::Offline,
            Route::Rejected => FfiRoute::Rejected,
        }
    }
}

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NoConnection = 1,
    Http = 2,
    Timeout = 3,
    Network = 4,
    Decode = 5,
    Serialization = 6,
    InvalidUrl = 7,
    Cancelled = 8,
    Configuration = 9,
    Panic = 10,
    NullArg = 11,
    Download = 12,
}

/// Result envelope delivered to `FfiCallback`.
///
/// On success `error_code` is `Ok`, `error_message` is null and
/// `data`/`data_len` hold the raw response body (`data` is null when the body
/// is empty). `from_cache` tells whether the body came from the offline cache.
/// `file_path` is the stored file for downloads and null otherwise.
/// On failure `error_code` describes the category, `error_message` is a
/// human-readable C string and `http_status` is set for `Http` errors.
#[repr(C)]
pub struct FfiResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub from_cache: bool,
    pub file_path: *mut c_char,
    pub data: *mut u8,
    pub data_len: usize,
}

impl FfiResult {
    pub(crate) fn from_outcome(outcome: Result<Payload, ApiError>) -> *mut Self {
        match outcome {
            Ok(payload) => Self::ok(payload),
            Err(e) => Self::from_error(&e),
        }
    }

    pub(crate) fn ok(payload: Payload) -> *mut Self {
        let from_cache = payload.is_cached();
        let file_path = payload
            .file
            .as_deref()
            .map_or(std::ptr::null_mut(), |path| c_string(&path.to_string_lossy()));
        let (data, data_len) = if payload.body.is_empty() {
            (std::ptr::null_mut(), 0)
        } else {
            let bytes: Box<[u8]> = payload.body.to_vec().into_boxed_slice();
            let len = bytes.len();
            (Box::into_raw(bytes) as *mut u8, len)
        };
        Box::into_raw(Box::new(FfiResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            from_cache,
            file_path,
            data,
            data_len,
        }))
    }

    pub(crate) fn from_error(err: &ApiError) -> *mut Self {
        let (error_code, http_status) = match err {
            ApiError::NoConnection => (FfiErrorCode::NoConnection, 0),
            ApiError::Transport(TransportError::Status { status, .. }) => (FfiErrorCode::Http, *status),
            ApiError::Transport(TransportError::Timeout) => (FfiErrorCode::Timeout, 0),
            ApiError::Transport(TransportError::Network(_)) => (FfiErrorCode::Network, 0),
            ApiError::Decode(_) => (FfiErrorCode::Decode, 0),
            ApiError::Serialization(_) => (FfiErrorCode::Serialization, 0),
            ApiError::InvalidUrl(_) => (FfiErrorCode::InvalidUrl, 0),
            ApiError::Cancelled => (FfiErrorCode::Cancelled, 0),
            ApiError::Configuration(_) => (FfiErrorCode::Configuration, 0),
            ApiError::Download(_) => (FfiErrorCode::Download, 0),
        };
        Self::error(error_code, http_status, &err.to_string())
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, 0, &format!("null argument: {name}"))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::Panic, 0, msg)
    }

    fn error(error_code: FfiErrorCode, http_status: u16, msg: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiResult {
            error_code,
            error_message: c_string(msg),
            http_status,
            from_cache: false,
            file_path: std::ptr::null_mut(),
            data: std::ptr::null_mut(),
            data_len: 0,
        }))
    }
}

/// Heap C string. Interior NULs are dropped.
pub(crate) fn c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', ""))
        .unwrap_or_default()
        .into_raw()
}
