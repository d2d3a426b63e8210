//! Raw clFFT bindings and library lifecycle
//!
//! Thin FFI surface over the clFFT C library, plus the one-time process-wide
//! `clfftSetup` call. Everything typed or safe lives in [`crate::plan`];
//! this module only declares the C entry points the plan factory needs and
//! translates their status codes into [`Error::Fft`].
//!
//! `clfftTeardown` is intentionally never called: setup is process-lifetime
//! (guarded by a `OnceLock`), and tearing the library down would invalidate
//! plans owned by other live pipelines.

use std::sync::OnceLock;

use crate::error::Error;

#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
pub(crate) mod ffi {
    use opencl3::types::{cl_command_queue, cl_context, cl_event, cl_mem, cl_uint};
    use std::ffi::{c_char, c_void};

    pub type clfftPlanHandle = usize;

    // Returned statuses are not limited to a closed set of values, so the
    // status stays a raw integer rather than a Rust enum.
    pub type clfftStatus = i32;
    pub const CLFFT_SUCCESS: clfftStatus = 0;

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftDim {
        CLFFT_1D = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftPrecision {
        CLFFT_SINGLE = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftLayout {
        CLFFT_COMPLEX_INTERLEAVED = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftResultLocation {
        CLFFT_OUTOFPLACE = 2,
    }

    #[repr(i32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftDirection {
        CLFFT_FORWARD = -1,
        CLFFT_BACKWARD = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftCallbackType {
        PRECALLBACK = 0,
        POSTCALLBACK = 1,
    }

    #[repr(C)]
    #[derive(Copy, Clone)]
    pub struct clfftSetupData {
        pub major: cl_uint,
        pub minor: cl_uint,
        pub patch: cl_uint,
        pub debugFlags: cl_uint,
    }

    #[link(name = "clFFT")]
    extern "C" {
        pub fn clfftGetVersion(
            major: *mut cl_uint,
            minor: *mut cl_uint,
            patch: *mut cl_uint,
        ) -> clfftStatus;
        pub fn clfftSetup(setupData: *const clfftSetupData) -> clfftStatus;

        pub fn clfftCreateDefaultPlan(
            plHandle: *mut clfftPlanHandle,
            context: cl_context,
            dim: clfftDim,
            clLengths: *const usize,
        ) -> clfftStatus;
        pub fn clfftDestroyPlan(plHandle: *mut clfftPlanHandle) -> clfftStatus;
        pub fn clfftSetPlanPrecision(
            plHandle: clfftPlanHandle,
            precision: clfftPrecision,
        ) -> clfftStatus;
        pub fn clfftSetLayout(
            plHandle: clfftPlanHandle,
            iLayout: clfftLayout,
            oLayout: clfftLayout,
        ) -> clfftStatus;
        pub fn clfftSetResultLocation(
            plHandle: clfftPlanHandle,
            placeness: clfftResultLocation,
        ) -> clfftStatus;
        pub fn clfftSetPlanBatchSize(
            plHandle: clfftPlanHandle,
            batchSize: usize,
        ) -> clfftStatus;
        pub fn clfftSetPlanDistance(
            plHandle: clfftPlanHandle,
            iDist: usize,
            oDist: usize,
        ) -> clfftStatus;
        pub fn clfftSetPlanCallback(
            plHandle: clfftPlanHandle,
            funcName: *const c_char,
            funcString: *const c_char,
            localMemSize: i32,
            callbackType: clfftCallbackType,
            userdata: *mut cl_mem,
            numUserdataBuffers: i32,
        ) -> clfftStatus;
        pub fn clfftBakePlan(
            plHandle: clfftPlanHandle,
            numQueues: cl_uint,
            commQueues: *mut cl_command_queue,
            pfn_notify: Option<extern "C" fn(clfftPlanHandle, cl_uint, *mut c_void)>,
            user_data: *mut c_void,
        ) -> clfftStatus;
        pub fn clfftEnqueueTransform(
            plHandle: clfftPlanHandle,
            dir: clfftDirection,
            numQueuesAndEvents: cl_uint,
            commQueues: *mut cl_command_queue,
            numWaitEvents: cl_uint,
            waitEvents: *const cl_event,
            outEvents: *mut cl_event,
            inputBuffers: *mut cl_mem,
            outputBuffers: *mut cl_mem,
            tmpBuffer: cl_mem,
        ) -> clfftStatus;
    }
}

/// Map a clFFT status to a pipeline error
pub(crate) fn check(
    status: ffi::clfftStatus,
    op: &'static str,
    plan: &'static str,
) -> Result<(), Error> {
    if status == ffi::CLFFT_SUCCESS {
        Ok(())
    } else {
        Err(Error::Fft { op, plan, status })
    }
}

/// Initialize the clFFT library once per process
pub(crate) fn setup() -> Result<(), Error> {
    static SETUP: OnceLock<Result<(), (&'static str, ffi::clfftStatus)>> = OnceLock::new();
    let result = SETUP.get_or_init(|| unsafe {
        let mut major: u32 = 0;
        let mut minor: u32 = 0;
        let mut patch: u32 = 0;
        let status = ffi::clfftGetVersion(&mut major, &mut minor, &mut patch);
        if status != ffi::CLFFT_SUCCESS {
            return Err(("clfftGetVersion", status));
        }
        log::debug!("clFFT version {major}.{minor}.{patch}");
        let data = ffi::clfftSetupData {
            major,
            minor,
            patch,
            debugFlags: 0,
        };
        let status = ffi::clfftSetup(&data);
        if status != ffi::CLFFT_SUCCESS {
            return Err(("clfftSetup", status));
        }
        Ok(())
    });
    match *result {
        Ok(()) => Ok(()),
        Err((op, status)) => Err(Error::Fft {
            op,
            plan: "library",
            status,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_success_and_maps_failure() {
        assert!(check(ffi::CLFFT_SUCCESS, "op", "plan").is_ok());
        let err = check(-5, "bake", "reference forward").unwrap_err();
        assert!(matches!(err, Error::Fft { status: -5, .. }));
    }

    #[test]
    fn direction_constants_match_clfft_header() {
        assert_eq!(ffi::clfftDirection::CLFFT_FORWARD as i32, -1);
        assert_eq!(ffi::clfftDirection::CLFFT_BACKWARD as i32, 1);
        assert_eq!(ffi::clfftCallbackType::PRECALLBACK as u32, 0);
        assert_eq!(ffi::clfftCallbackType::POSTCALLBACK as u32, 1);
    }
}
