//! The capability set exposed by a tunnel library.
//!
//! [`TunnelApi`] mirrors the vendor entry points one to one. The driver only
//! ever talks to this trait, so it runs the same against a library loaded
//! from disk ([`crate::TunnelLibrary`]) and against the in-memory fake used
//! by the tests.

use crate::logbridge::LogForwarder;
use lib_types::{Sample, Status, StreamInfo};
use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;
use std::sync::Arc;

/// Opaque, non-null tunnel handle owned by the vendor library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TunnelHandle(NonNull<c_void>);

impl TunnelHandle {
    /// Wrap a raw handle, returning `None` for null.
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Address used as a map key and in log fields.
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// The nine vendor operations the driver depends on.
///
/// Status-returning calls report the vendor code verbatim; interpretation
/// (success, would-block, failure) is left to the caller.
pub trait TunnelApi {
    /// `Bambu_Create`: allocate a tunnel for `camera_url`.
    ///
    /// Returns the status and the handle the library wrote back, which may
    /// be present even when the status is non-zero.
    fn create(&self, camera_url: &CStr) -> (Status, Option<TunnelHandle>);

    /// `Bambu_SetLogger`: route the tunnel's log messages to `forwarder`.
    fn set_logger(&self, tunnel: TunnelHandle, forwarder: Arc<LogForwarder>);

    /// `Bambu_Open`.
    fn open(&self, tunnel: TunnelHandle) -> Status;

    /// `Bambu_StartStreamEx` with the given stream type.
    fn start_stream(&self, tunnel: TunnelHandle, stream_type: i32) -> Status;

    /// `Bambu_GetStreamCount`. Optional in vendor builds, `None` when absent.
    fn stream_count(&self, _tunnel: TunnelHandle) -> Option<i32> {
        None
    }

    /// `Bambu_GetStreamInfo` for stream `index`.
    fn stream_info(&self, tunnel: TunnelHandle, index: i32) -> Result<StreamInfo, Status>;

    /// `Bambu_ReadSample`. On success `sample` holds a copy of the bytes.
    fn read_sample(&self, tunnel: TunnelHandle, sample: &mut Sample) -> Status;

    /// `Bambu_Close`.
    fn close(&self, tunnel: TunnelHandle);

    /// `Bambu_Destroy`. The handle must not be used afterwards.
    fn destroy(&self, tunnel: TunnelHandle);

    /// `Bambu_FreeLogMsg`: hand a log message back to the library.
    ///
    /// # Safety
    ///
    /// `msg` must be a message pointer this library passed to a logger and
    /// must not have been freed already.
    unsafe fn free_log_msg(&self, msg: *const c_char);
}

impl<T: TunnelApi + ?Sized> TunnelApi for &T {
    fn create(&self, camera_url: &CStr) -> (Status, Option<TunnelHandle>) {
        (**self).create(camera_url)
    }

    fn set_logger(&self, tunnel: TunnelHandle, forwarder: Arc<LogForwarder>) {
        (**self).set_logger(tunnel, forwarder)
    }

    fn open(&self, tunnel: TunnelHandle) -> Status {
        (**self).open(tunnel)
    }

    fn start_stream(&self, tunnel: TunnelHandle, stream_type: i32) -> Status {
        (**self).start_stream(tunnel, stream_type)
    }

    fn stream_count(&self, tunnel: TunnelHandle) -> Option<i32> {
        (**self).stream_count(tunnel)
    }

    fn stream_info(&self, tunnel: TunnelHandle, index: i32) -> Result<StreamInfo, Status> {
        (**self).stream_info(tunnel, index)
    }

    fn read_sample(&self, tunnel: TunnelHandle, sample: &mut Sample) -> Status {
        (**self).read_sample(tunnel, sample)
    }

    fn close(&self, tunnel: TunnelHandle) {
        (**self).close(tunnel)
    }

    fn destroy(&self, tunnel: TunnelHandle) {
        (**self).destroy(tunnel)
    }

    unsafe fn free_log_msg(&self, msg: *const c_char) {
        // SAFETY: forwarded verbatim, caller upholds the contract
        unsafe { (**self).free_log_msg(msg) }
    }
}
