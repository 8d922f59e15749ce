/// Native disk-arbitration backend
///
/// Owns the DASession plus a dedicated thread that pumps its run loop so
/// completion callbacks are delivered. Unmount/eject calls may be issued
/// from any thread; each one carries a completion token as its context
/// pointer and parks on the bridge until the callback resolves it. All
/// raw handles stay inside the synchronous issue helpers, so nothing
/// non-Send is ever held across an await.
use std::ffi::CString;
use std::os::raw::c_void;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use core_foundation::base::TCFType;
use core_foundation::string::CFString;
use core_foundation::url::CFURL;
use core_foundation_sys::base::{kCFAllocatorDefault, CFRelease, CFRetain, CFTypeRef};
use core_foundation_sys::runloop::{
    kCFRunLoopDefaultMode, CFRunLoopGetCurrent, CFRunLoopRef, CFRunLoopRunInMode, CFRunLoopStop,
};

use crate::arbitration::bridge::CompletionToken;
use crate::arbitration::dissent::{Dissent, DissenterStatus};
use crate::arbitration::session::VolumeArbiter;
use crate::batch::report::OperationResult;
use crate::volume::DeviceId;
use crate::{EjectError, EjectResult};

mod ffi {
    #![allow(non_upper_case_globals)]

    use std::os::raw::{c_char, c_void};

    use core_foundation_sys::base::CFAllocatorRef;
    use core_foundation_sys::runloop::CFRunLoopRef;
    use core_foundation_sys::string::CFStringRef;
    use core_foundation_sys::url::CFURLRef;

    pub enum __DASession {}
    pub type DASessionRef = *mut __DASession;

    pub enum __DADisk {}
    pub type DADiskRef = *mut __DADisk;

    pub enum __DADissenter {}
    pub type DADissenterRef = *mut __DADissenter;

    pub type DAReturn = i32;
    pub type DADiskUnmountOptions = u32;
    pub type DADiskEjectOptions = u32;

    pub const kDADiskUnmountOptionDefault: DADiskUnmountOptions = 0x0000_0000;
    pub const kDADiskUnmountOptionForce: DADiskUnmountOptions = 0x0008_0000;
    pub const kDADiskUnmountOptionWhole: DADiskUnmountOptions = 0x0000_0001;
    pub const kDADiskEjectOptionDefault: DADiskEjectOptions = 0x0000_0000;

    pub type DADiskUnmountCallback =
        extern "C" fn(disk: DADiskRef, dissenter: DADissenterRef, context: *mut c_void);
    pub type DADiskEjectCallback =
        extern "C" fn(disk: DADiskRef, dissenter: DADissenterRef, context: *mut c_void);

    #[link(name = "DiskArbitration", kind = "framework")]
    extern "C" {
        pub fn DASessionCreate(allocator: CFAllocatorRef) -> DASessionRef;
        pub fn DASessionScheduleWithRunLoop(
            session: DASessionRef,
            run_loop: CFRunLoopRef,
            mode: CFStringRef,
        );
        pub fn DASessionUnscheduleFromRunLoop(
            session: DASessionRef,
            run_loop: CFRunLoopRef,
            mode: CFStringRef,
        );
        pub fn DADiskCreateFromBSDName(
            allocator: CFAllocatorRef,
            session: DASessionRef,
            name: *const c_char,
        ) -> DADiskRef;
        pub fn DADiskCreateFromVolumePath(
            allocator: CFAllocatorRef,
            session: DASessionRef,
            path: CFURLRef,
        ) -> DADiskRef;
        pub fn DADiskUnmount(
            disk: DADiskRef,
            options: DADiskUnmountOptions,
            callback: Option<DADiskUnmountCallback>,
            context: *mut c_void,
        );
        pub fn DADiskEject(
            disk: DADiskRef,
            options: DADiskEjectOptions,
            callback: Option<DADiskEjectCallback>,
            context: *mut c_void,
        );
        pub fn DADissenterGetStatus(dissenter: DADissenterRef) -> DAReturn;
        pub fn DADissenterGetStatusString(dissenter: DADissenterRef) -> CFStringRef;
    }
}

// How long the pump sleeps inside the run loop before rechecking the stop
// flag; bounds the worst-case shutdown latency.
const PUMP_INTERVAL_SECONDS: f64 = 0.25;

/// A session pointer that moves between threads. The CF object itself is
/// thread-safe; all releases are funneled through the pump teardown and
/// the retain guard below.
struct RawSession(ffi::DASessionRef);
// SAFETY: DASession functions may be called from any thread; ownership
// moves one-way into SessionHandles.
unsafe impl Send for RawSession {}

struct RawRunLoop(CFRunLoopRef);
// SAFETY: only used to wake the pump thread via CFRunLoopStop, which is
// documented as safe from other threads.
unsafe impl Send for RawRunLoop {}

struct SessionHandles {
    session: RawSession,
    run_loop: RawRunLoop,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Keeps the session alive for the span of one native call, independent
/// of a concurrent shutdown releasing the owner reference.
struct RetainedSession(ffi::DASessionRef);

impl RetainedSession {
    fn as_ptr(&self) -> ffi::DASessionRef {
        self.0
    }
}

impl Drop for RetainedSession {
    fn drop(&mut self) {
        // SAFETY: balanced against the CFRetain taken in retained_session.
        unsafe { CFRelease(self.0 as CFTypeRef) };
    }
}

/// A disk object from one of the Create functions; released on drop.
struct OwnedDisk(ffi::DADiskRef);

impl OwnedDisk {
    fn as_ptr(&self) -> ffi::DADiskRef {
        self.0
    }
}

impl Drop for OwnedDisk {
    fn drop(&mut self) {
        // SAFETY: the pointer came from a Create-rule function.
        unsafe { CFRelease(self.0 as CFTypeRef) };
    }
}

pub(crate) struct NativeArbiter {
    handles: Mutex<Option<SessionHandles>>,
}

impl NativeArbiter {
    /// Create the native session and start the callback pump. Fails when
    /// the subsystem refuses a session, which callers treat as fatal.
    pub(crate) fn new() -> EjectResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let pump_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("disk-arbitration".into())
            .spawn(move || callback_pump(ready_tx, pump_stop))
            .map_err(|err| EjectError::SessionCreate(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok((session, run_loop))) => {
                tracing::info!("disk arbitration session ready");
                Ok(NativeArbiter {
                    handles: Mutex::new(Some(SessionHandles {
                        session,
                        run_loop,
                        stop,
                        thread,
                    })),
                })
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EjectError::SessionCreate(
                    "callback thread exited before the session was ready".to_string(),
                ))
            }
        }
    }

    /// Retain the session for the span of one native call. `None` once
    /// shutdown has taken the handles.
    fn retained_session(&self) -> Option<RetainedSession> {
        let guard = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().map(|handles| {
            // SAFETY: the owner reference is live while the lock is held;
            // the retain keeps the object past it.
            unsafe { CFRetain(handles.session.0 as CFTypeRef) };
            RetainedSession(handles.session.0)
        })
    }

    /// Issue a single-volume unmount. Consumes the token either by
    /// handing it to the native call or by completing it with a refusal.
    fn issue_unmount_volume(&self, mount_path: &Path, force: bool, token: CompletionToken) {
        let Some(session) = self.retained_session() else {
            token.complete(Some(session_released_dissent()));
            return;
        };
        let Some(url) = CFURL::from_path(mount_path, true) else {
            token.complete(Some(Dissent::new(DissenterStatus::BAD_ARGUMENT, None)));
            return;
        };
        // SAFETY: session and url are live for the duration of the call.
        let disk = unsafe {
            ffi::DADiskCreateFromVolumePath(
                kCFAllocatorDefault,
                session.as_ptr(),
                url.as_concrete_TypeRef(),
            )
        };
        if disk.is_null() {
            tracing::warn!(path = %mount_path.display(), "no disk object for volume path");
            token.complete(Some(Dissent::new(DissenterStatus::NOT_FOUND, None)));
            return;
        }
        let disk = OwnedDisk(disk);

        let mut options = ffi::kDADiskUnmountOptionDefault;
        if force {
            options |= ffi::kDADiskUnmountOptionForce;
        }
        // SAFETY: disk is live; the context pointer is owned by the
        // callback from here on.
        unsafe {
            ffi::DADiskUnmount(
                disk.as_ptr(),
                options,
                Some(disk_operation_callback),
                token.into_raw(),
            )
        };
    }

    /// Issue a whole-device unmount covering every mounted partition.
    fn issue_unmount_device(&self, device: &DeviceId, force: bool, token: CompletionToken) {
        let Some(session) = self.retained_session() else {
            token.complete(Some(session_released_dissent()));
            return;
        };
        let Some(disk) = disk_for_device(&session, device) else {
            token.complete(Some(Dissent::new(DissenterStatus::NOT_FOUND, None)));
            return;
        };

        let mut options = ffi::kDADiskUnmountOptionWhole;
        if force {
            options |= ffi::kDADiskUnmountOptionForce;
        }
        // SAFETY: disk is live; the context pointer is owned by the
        // callback from here on.
        unsafe {
            ffi::DADiskUnmount(
                disk.as_ptr(),
                options,
                Some(disk_operation_callback),
                token.into_raw(),
            )
        };
    }

    fn issue_eject_device(&self, device: &DeviceId, token: CompletionToken) {
        let Some(session) = self.retained_session() else {
            token.complete(Some(session_released_dissent()));
            return;
        };
        let Some(disk) = disk_for_device(&session, device) else {
            token.complete(Some(Dissent::new(DissenterStatus::NOT_FOUND, None)));
            return;
        };
        // SAFETY: disk is live; the context pointer is owned by the
        // callback from here on.
        unsafe {
            ffi::DADiskEject(
                disk.as_ptr(),
                ffi::kDADiskEjectOptionDefault,
                Some(disk_operation_callback),
                token.into_raw(),
            )
        };
    }
}

#[async_trait]
impl VolumeArbiter for NativeArbiter {
    async fn unmount_volume(&self, mount_path: &Path, force: bool) -> OperationResult {
        let (token, receiver) = CompletionToken::pair("unmount", mount_path.display().to_string());
        self.issue_unmount_volume(mount_path, force, token);
        receiver.wait().await
    }

    async fn unmount_whole_device(&self, device: &DeviceId, force: bool) -> OperationResult {
        let (token, receiver) = CompletionToken::pair("unmount", device.as_str());
        self.issue_unmount_device(device, force, token);
        receiver.wait().await
    }

    async fn eject_device(&self, device: &DeviceId) -> OperationResult {
        let (token, receiver) = CompletionToken::pair("eject", device.as_str());
        self.issue_eject_device(device, token);
        receiver.wait().await
    }

    fn shutdown(&self) {
        let handles = {
            let mut guard = self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        let Some(handles) = handles else { return };

        handles.stop.store(true, Ordering::Release);
        // SAFETY: the run loop belongs to the pump thread, which stays
        // alive until the join below; stopping from here is allowed.
        unsafe { CFRunLoopStop(handles.run_loop.0) };
        if handles.thread.join().is_err() {
            tracing::error!("disk-arbitration callback thread panicked during shutdown");
        }
        tracing::debug!("disk arbitration session released");
    }
}

impl Drop for NativeArbiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn session_released_dissent() -> Dissent {
    Dissent::new(
        DissenterStatus::ERROR,
        Some("session already released".to_string()),
    )
}

fn disk_for_device(session: &RetainedSession, device: &DeviceId) -> Option<OwnedDisk> {
    let name = CString::new(device.as_str()).ok()?;
    // SAFETY: session and name are live for the duration of the call.
    let disk = unsafe {
        ffi::DADiskCreateFromBSDName(kCFAllocatorDefault, session.as_ptr(), name.as_ptr())
    };
    if disk.is_null() {
        tracing::warn!(device = %device, "no disk object for device");
        return None;
    }
    Some(OwnedDisk(disk))
}

/// Shared callback for unmount and eject. Reclaims the completion token
/// from the context pointer and resolves it with the dissent, if any.
extern "C" fn disk_operation_callback(
    _disk: ffi::DADiskRef,
    dissenter: ffi::DADissenterRef,
    context: *mut c_void,
) {
    // SAFETY: context is null or the token pointer handed to the call.
    let Some(token) = (unsafe { CompletionToken::reclaim(context) }) else {
        return;
    };

    let dissent = if dissenter.is_null() {
        None
    } else {
        // SAFETY: the dissenter is live for the span of the callback.
        let status = DissenterStatus(unsafe { ffi::DADissenterGetStatus(dissenter) } as u32);
        let message = unsafe { dissenter_message(dissenter) };
        Some(Dissent::new(status, message))
    };
    token.complete(dissent);
}

/// # Safety
///
/// `dissenter` must be a live dissenter reference for the duration of the
/// call; the returned string is copied out under the get rule.
unsafe fn dissenter_message(dissenter: ffi::DADissenterRef) -> Option<String> {
    let raw = ffi::DADissenterGetStatusString(dissenter);
    if raw.is_null() {
        return None;
    }
    let text = CFString::wrap_under_get_rule(raw).to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Body of the pump thread: create the session, schedule it on this
/// thread's run loop, report readiness, then pump callbacks until asked
/// to stop. The session is unscheduled and released here, on the same
/// thread that scheduled it.
fn callback_pump(
    ready: mpsc::Sender<Result<(RawSession, RawRunLoop), EjectError>>,
    stop: Arc<AtomicBool>,
) {
    // SAFETY: plain constructor call; a null result means refusal.
    let session = unsafe { ffi::DASessionCreate(kCFAllocatorDefault) };
    if session.is_null() {
        let _ = ready.send(Err(EjectError::SessionCreate(
            "DASessionCreate returned null".to_string(),
        )));
        return;
    }

    // SAFETY: both references are live; the session stays scheduled until
    // the teardown below.
    let run_loop = unsafe {
        let run_loop = CFRunLoopGetCurrent();
        ffi::DASessionScheduleWithRunLoop(session, run_loop, kCFRunLoopDefaultMode);
        run_loop
    };

    if ready
        .send(Ok((RawSession(session), RawRunLoop(run_loop))))
        .is_err()
    {
        // Creator is gone; tear down immediately.
        // SAFETY: same references that were scheduled above.
        unsafe {
            ffi::DASessionUnscheduleFromRunLoop(session, run_loop, kCFRunLoopDefaultMode);
            CFRelease(session as CFTypeRef);
        }
        return;
    }

    while !stop.load(Ordering::Acquire) {
        // SAFETY: runs the current thread's loop; returns after the
        // interval or when CFRunLoopStop wakes it.
        unsafe { CFRunLoopRunInMode(kCFRunLoopDefaultMode, PUMP_INTERVAL_SECONDS, 0) };
    }

    // SAFETY: same references that were scheduled above; after this no
    // more callbacks are delivered.
    unsafe {
        ffi::DASessionUnscheduleFromRunLoop(session, run_loop, kCFRunLoopDefaultMode);
        CFRelease(session as CFTypeRef);
    }
}
