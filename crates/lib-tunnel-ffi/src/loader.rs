//! Dynamic library loading for tunnel libraries.
//!
//! This module loads the vendor-supplied shared library, resolves the
//! tunnel entry points and exposes them through [`TunnelApi`].

use crate::api::{TunnelApi, TunnelHandle};
use crate::error::{TunnelError, TunnelResult};
use crate::logbridge::LogForwarder;
use lib_types::{Sample, Status, StreamInfo};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex};

/// `int Bambu_Create(Bambu_Tunnel* tunnel, char const* path);`
pub type CreateFn = unsafe extern "C" fn(tunnel: *mut *mut c_void, path: *const c_char) -> c_int;

/// `int Bambu_Open(Bambu_Tunnel tunnel);`
pub type OpenFn = unsafe extern "C" fn(tunnel: *mut c_void) -> c_int;

/// `int Bambu_StartStreamEx(Bambu_Tunnel tunnel, int type);`
pub type StartStreamExFn = unsafe extern "C" fn(tunnel: *mut c_void, stream_type: c_int) -> c_int;

/// `int Bambu_GetStreamCount(Bambu_Tunnel tunnel);`
pub type GetStreamCountFn = unsafe extern "C" fn(tunnel: *mut c_void) -> c_int;

/// `int Bambu_GetStreamInfo(Bambu_Tunnel tunnel, int index, Bambu_StreamInfo* info);`
pub type GetStreamInfoFn =
    unsafe extern "C" fn(tunnel: *mut c_void, index: c_int, info: *mut RawStreamInfo) -> c_int;

/// `int Bambu_ReadSample(Bambu_Tunnel tunnel, Bambu_Sample* sample);`
pub type ReadSampleFn = unsafe extern "C" fn(tunnel: *mut c_void, sample: *mut RawSample) -> c_int;

/// `void Bambu_Close(Bambu_Tunnel tunnel);`
pub type CloseFn = unsafe extern "C" fn(tunnel: *mut c_void);

/// `void Bambu_Destroy(Bambu_Tunnel tunnel);`
pub type DestroyFn = unsafe extern "C" fn(tunnel: *mut c_void);

/// `typedef void (*Logger)(void* context, int level, tchar const* msg);`
pub type LoggerFn = unsafe extern "C" fn(context: *mut c_void, level: c_int, msg: *const c_char);

/// `void Bambu_SetLogger(Bambu_Tunnel tunnel, Logger logger, void* context);`
pub type SetLoggerFn =
    unsafe extern "C" fn(tunnel: *mut c_void, logger: Option<LoggerFn>, context: *mut c_void);

/// `void Bambu_FreeLogMsg(tchar const* msg);`
pub type FreeLogMsgFn = unsafe extern "C" fn(msg: *const c_char);

/// Stream description as laid out by the vendor.
#[repr(C)]
#[derive(Debug)]
pub struct RawStreamInfo {
    pub stream_type: u32,
    pub sub_type: i32,
    pub width: i32,
    pub height: i32,
    pub frame_rate: i32,
    pub format_type: i32,
    pub format_size: i32,
    pub max_frame_size: i32,
    pub format_buffer: *const c_char,
}

impl RawStreamInfo {
    fn zeroed() -> Self {
        Self {
            stream_type: 0,
            sub_type: 0,
            width: 0,
            height: 0,
            frame_rate: 0,
            format_type: 0,
            format_size: 0,
            max_frame_size: 0,
            format_buffer: ptr::null(),
        }
    }
}

impl From<&RawStreamInfo> for StreamInfo {
    fn from(raw: &RawStreamInfo) -> Self {
        Self {
            stream_type: raw.stream_type,
            sub_type: raw.sub_type,
            width: raw.width,
            height: raw.height,
            frame_rate: raw.frame_rate,
            format_type: raw.format_type,
            format_size: raw.format_size,
            max_frame_size: raw.max_frame_size,
        }
    }
}

/// Sample record filled by `Bambu_ReadSample`. The buffer stays owned by
/// the library and is only valid until the next read on the same tunnel.
#[repr(C)]
#[derive(Debug)]
pub struct RawSample {
    pub itrack: i32,
    pub size: i32,
    pub flags: i32,
    pub buffer: *const u8,
    pub decode_time: u64,
}

impl RawSample {
    fn zeroed() -> Self {
        Self {
            itrack: 0,
            size: 0,
            flags: 0,
            buffer: ptr::null(),
            decode_time: 0,
        }
    }
}

const CREATE: &[u8] = b"Bambu_Create\0";
const OPEN: &[u8] = b"Bambu_Open\0";
const START_STREAM_EX: &[u8] = b"Bambu_StartStreamEx\0";
const GET_STREAM_COUNT: &[u8] = b"Bambu_GetStreamCount\0";
const GET_STREAM_INFO: &[u8] = b"Bambu_GetStreamInfo\0";
const READ_SAMPLE: &[u8] = b"Bambu_ReadSample\0";
const CLOSE: &[u8] = b"Bambu_Close\0";
const DESTROY: &[u8] = b"Bambu_Destroy\0";
const SET_LOGGER: &[u8] = b"Bambu_SetLogger\0";
const FREE_LOG_MSG: &[u8] = b"Bambu_FreeLogMsg\0";

/// NUL-terminated names of the entry points that must resolve before any
/// call is made, in the order they are checked.
pub const REQUIRED_SYMBOLS: [&[u8]; 9] = [
    CREATE,
    OPEN,
    START_STREAM_EX,
    GET_STREAM_INFO,
    READ_SAMPLE,
    CLOSE,
    DESTROY,
    SET_LOGGER,
    FREE_LOG_MSG,
];

/// Resolved vendor entry points.
#[derive(Clone, Copy)]
struct EntryPoints {
    create: CreateFn,
    open: OpenFn,
    start_stream_ex: StartStreamExFn,
    get_stream_count: Option<GetStreamCountFn>,
    get_stream_info: GetStreamInfoFn,
    read_sample: ReadSampleFn,
    close: CloseFn,
    destroy: DestroyFn,
    set_logger: SetLoggerFn,
    free_log_msg: FreeLogMsgFn,
}

/// Context handed to the vendor alongside [`forward_log`].
struct LoggerContext {
    forwarder: Arc<LogForwarder>,
    free_log_msg: FreeLogMsgFn,
}

/// Loaded tunnel library with extracted function pointers.
pub struct TunnelLibrary {
    /// The underlying dynamic library handle. Must outlive every call
    /// through `entry`.
    #[allow(dead_code)]
    library: Library,

    /// Path to the library file.
    pub path: String,

    entry: EntryPoints,

    /// Logger contexts keyed by tunnel address, kept alive until Destroy.
    loggers: Mutex<HashMap<usize, Box<LoggerContext>>>,
}

impl TunnelLibrary {
    /// Load a tunnel library from a shared library file.
    ///
    /// Every symbol in [`REQUIRED_SYMBOLS`] must resolve; the first missing
    /// one is reported as [`TunnelError::SymbolNotFound`].
    /// `Bambu_GetStreamCount` is optional.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initializers. The library must implement
    /// the tunnel ABI described by the function types in this module;
    /// anything else is undefined behavior once called.
    pub fn load<P: AsRef<Path>>(path: P) -> TunnelResult<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let library =
            unsafe { Library::new(path) }.map_err(|e| TunnelError::load_error(&path_str, e))?;

        // Check the whole set before extracting anything.
        let missing = REQUIRED_SYMBOLS
            .iter()
            .copied()
            .find(|&symbol| unsafe { library.get::<*const c_void>(symbol) }.is_err());
        if let Some(symbol) = missing {
            return Err(TunnelError::symbol_not_found(display_name(symbol)));
        }

        // SAFETY: each symbol is read with the signature the vendor header declares
        let entry = unsafe {
            EntryPoints {
                create: required(&library, CREATE)?,
                open: required(&library, OPEN)?,
                start_stream_ex: required(&library, START_STREAM_EX)?,
                get_stream_count: optional(&library, GET_STREAM_COUNT),
                get_stream_info: required(&library, GET_STREAM_INFO)?,
                read_sample: required(&library, READ_SAMPLE)?,
                close: required(&library, CLOSE)?,
                destroy: required(&library, DESTROY)?,
                set_logger: required(&library, SET_LOGGER)?,
                free_log_msg: required(&library, FREE_LOG_MSG)?,
            }
        };

        tracing::info!(
            path = %path_str,
            has_stream_count = entry.get_stream_count.is_some(),
            "Loaded tunnel library"
        );

        Ok(Self {
            library,
            path: path_str,
            entry,
            loggers: Mutex::new(HashMap::new()),
        })
    }

    fn loggers(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Box<LoggerContext>>> {
        self.loggers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolve a required symbol.
///
/// # Safety
///
/// `T` must match the symbol's real signature.
unsafe fn required<T: Copy>(library: &Library, symbol: &'static [u8]) -> TunnelResult<T> {
    unsafe { library.get::<T>(symbol) }
        .map(|s| *s)
        .map_err(|_| TunnelError::symbol_not_found(display_name(symbol)))
}

/// Resolve an optional symbol.
///
/// # Safety
///
/// `T` must match the symbol's real signature.
unsafe fn optional<T: Copy>(library: &Library, symbol: &'static [u8]) -> Option<T> {
    unsafe { library.get::<T>(symbol) }.ok().map(|s| *s)
}

/// Symbol name without its NUL terminator.
fn display_name(symbol: &'static [u8]) -> &'static str {
    let name = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    std::str::from_utf8(name).unwrap_or("<non-utf8 symbol>")
}

/// Logger trampoline registered with `Bambu_SetLogger`.
unsafe extern "C" fn forward_log(context: *mut c_void, level: c_int, msg: *const c_char) {
    if context.is_null() {
        return;
    }

    // Never unwind into vendor code.
    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: context is the LoggerContext registered in set_logger and
        // lives until the tunnel is destroyed
        let ctx = unsafe { &*(context as *const LoggerContext) };
        unsafe {
            ctx.forwarder
                .deliver(level, msg, |m| (ctx.free_log_msg)(m));
        }
    }));

    if result.is_err() {
        tracing::error!(level, "Panic while forwarding vendor log message");
    }
}

impl TunnelApi for TunnelLibrary {
    fn create(&self, camera_url: &CStr) -> (Status, Option<TunnelHandle>) {
        let mut tunnel: *mut c_void = ptr::null_mut();
        let status = unsafe { (self.entry.create)(&mut tunnel, camera_url.as_ptr()) };
        (Status(status), TunnelHandle::from_raw(tunnel))
    }

    fn set_logger(&self, tunnel: TunnelHandle, forwarder: Arc<LogForwarder>) {
        let context = Box::new(LoggerContext {
            forwarder,
            free_log_msg: self.entry.free_log_msg,
        });
        let context_ptr = &*context as *const LoggerContext as *mut c_void;

        // Register the context before the vendor can call back with it.
        let previous = self.loggers().insert(tunnel.addr(), context);
        unsafe { (self.entry.set_logger)(tunnel.as_ptr(), Some(forward_log), context_ptr) };
        drop(previous);
    }

    fn open(&self, tunnel: TunnelHandle) -> Status {
        Status(unsafe { (self.entry.open)(tunnel.as_ptr()) })
    }

    fn start_stream(&self, tunnel: TunnelHandle, stream_type: i32) -> Status {
        Status(unsafe { (self.entry.start_stream_ex)(tunnel.as_ptr(), stream_type) })
    }

    fn stream_count(&self, tunnel: TunnelHandle) -> Option<i32> {
        let count_fn = self.entry.get_stream_count?;
        Some(unsafe { count_fn(tunnel.as_ptr()) })
    }

    fn stream_info(&self, tunnel: TunnelHandle, index: i32) -> Result<StreamInfo, Status> {
        let mut raw = RawStreamInfo::zeroed();
        let status = Status(unsafe { (self.entry.get_stream_info)(tunnel.as_ptr(), index, &mut raw) });
        if status.is_success() {
            Ok(StreamInfo::from(&raw))
        } else {
            Err(status)
        }
    }

    fn read_sample(&self, tunnel: TunnelHandle, sample: &mut Sample) -> Status {
        let mut raw = RawSample::zeroed();
        let status = Status(unsafe { (self.entry.read_sample)(tunnel.as_ptr(), &mut raw) });
        if !status.is_success() {
            return status;
        }

        sample.track = raw.itrack;
        sample.flags = raw.flags;
        sample.decode_time = raw.decode_time;

        let size = usize::try_from(raw.size).unwrap_or(0);
        if raw.buffer.is_null() || size == 0 {
            if raw.size < 0 || (raw.buffer.is_null() && size > 0) {
                tracing::warn!(
                    size = raw.size,
                    null_buffer = raw.buffer.is_null(),
                    "Bambu_ReadSample reported an unusable buffer, forwarding an empty sample"
                );
            }
            sample.fill(&[]);
        } else {
            // SAFETY: the library guarantees `size` readable bytes at
            // `buffer` until the next ReadSample on this tunnel
            let bytes = unsafe { std::slice::from_raw_parts(raw.buffer, size) };
            sample.fill(bytes);
        }

        status
    }

    fn close(&self, tunnel: TunnelHandle) {
        unsafe { (self.entry.close)(tunnel.as_ptr()) }
    }

    fn destroy(&self, tunnel: TunnelHandle) {
        unsafe { (self.entry.destroy)(tunnel.as_ptr()) };
        // The vendor stops calling the logger once the tunnel is gone.
        self.loggers().remove(&tunnel.addr());
    }

    unsafe fn free_log_msg(&self, msg: *const c_char) {
        unsafe { (self.entry.free_log_msg)(msg) }
    }
}

// TunnelLibrary is Send + Sync because it only stores function pointers,
// the Library handle and a mutex-guarded map.
unsafe impl Send for TunnelLibrary {}
unsafe impl Sync for TunnelLibrary {}
