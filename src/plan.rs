//! Transform plan factory
//!
//! Builds the three baked clFFT plans of the pipeline and wraps their raw
//! handles in RAII owners. All per-element work other than the transform
//! itself (sample conversion, windowing, shift generation, conjugation,
//! spectral multiply, peak extraction) is fused into the plans as pre/post
//! callbacks, so enqueueing a plan runs the whole fused stage.
//!
//! Every plan is out-of-place, single precision, interleaved complex on both
//! sides, with unit-stride rows and a row distance equal to the transform
//! length. The inverse plan keeps clFFT's default backward scale of 1/N.

use std::ffi::CString;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::event::Event;
use opencl3::memory::{Buffer, ClMem};
use opencl3::types::{cl_command_queue, cl_event, cl_mem};

use crate::clfft::{check, ffi, setup};
use crate::device::GpuContext;
use crate::error::Error;
use crate::kernels;
use crate::layout::BufferLayout;

/// Which side of the transform a callback attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackKind {
    Pre,
    Post,
}

/// A baked clFFT plan owning its handle
///
/// The handle is destroyed exactly once, either through [`destroy`] during
/// pipeline cleanup or by `Drop`. Plans must be destroyed before the
/// buffers their callbacks reference are released.
///
/// [`destroy`]: TransformPlan::destroy
pub struct TransformPlan {
    handle: ffi::clfftPlanHandle,
    name: &'static str,
    direction: ffi::clfftDirection,
    fft_size: usize,
    batch: usize,
    destroyed: bool,
}

impl TransformPlan {
    /// Create an unbaked plan; configuration and bake follow before use
    fn create(
        ctx: &GpuContext,
        name: &'static str,
        direction: ffi::clfftDirection,
        fft_size: usize,
        batch: usize,
    ) -> Result<Self, Error> {
        setup()?;
        let mut handle: ffi::clfftPlanHandle = 0;
        let lengths = [fft_size];
        let status = unsafe {
            ffi::clfftCreateDefaultPlan(
                &mut handle,
                ctx.context().get(),
                ffi::clfftDim::CLFFT_1D,
                lengths.as_ptr(),
            )
        };
        check(status, "clfftCreateDefaultPlan", name)?;
        // From here on the handle is owned; any failed configuration step
        // releases it through Drop.
        Ok(Self {
            handle,
            name,
            direction,
            fft_size,
            batch,
            destroyed: false,
        })
    }

    fn configure(&mut self) -> Result<(), Error> {
        unsafe {
            check(
                ffi::clfftSetPlanPrecision(self.handle, ffi::clfftPrecision::CLFFT_SINGLE),
                "clfftSetPlanPrecision",
                self.name,
            )?;
            check(
                ffi::clfftSetLayout(
                    self.handle,
                    ffi::clfftLayout::CLFFT_COMPLEX_INTERLEAVED,
                    ffi::clfftLayout::CLFFT_COMPLEX_INTERLEAVED,
                ),
                "clfftSetLayout",
                self.name,
            )?;
            check(
                ffi::clfftSetResultLocation(self.handle, ffi::clfftResultLocation::CLFFT_OUTOFPLACE),
                "clfftSetResultLocation",
                self.name,
            )?;
            check(
                ffi::clfftSetPlanBatchSize(self.handle, self.batch),
                "clfftSetPlanBatchSize",
                self.name,
            )?;
            check(
                ffi::clfftSetPlanDistance(self.handle, self.fft_size, self.fft_size),
                "clfftSetPlanDistance",
                self.name,
            )?;
        }
        Ok(())
    }

    /// Attach a callback fragment, optionally bound to a userdata buffer
    fn set_callback(
        &mut self,
        func_name: &str,
        source: &str,
        kind: CallbackKind,
        userdata: Option<&Buffer<u8>>,
    ) -> Result<(), Error> {
        let name_c = CString::new(func_name)
            .map_err(|_| Error::Input(format!("callback name {func_name:?} contains NUL")))?;
        let source_c = CString::new(source)
            .map_err(|_| Error::Input("callback source contains NUL".into()))?;
        let callback_type = match kind {
            CallbackKind::Pre => ffi::clfftCallbackType::PRECALLBACK,
            CallbackKind::Post => ffi::clfftCallbackType::POSTCALLBACK,
        };
        let status = unsafe {
            match userdata {
                Some(buf) => {
                    let mut mem: cl_mem = buf.get();
                    ffi::clfftSetPlanCallback(
                        self.handle,
                        name_c.as_ptr(),
                        source_c.as_ptr(),
                        0,
                        callback_type,
                        &mut mem,
                        1,
                    )
                }
                None => ffi::clfftSetPlanCallback(
                    self.handle,
                    name_c.as_ptr(),
                    source_c.as_ptr(),
                    0,
                    callback_type,
                    ptr::null_mut(),
                    0,
                ),
            }
        };
        check(status, "clfftSetPlanCallback", self.name)
    }

    /// Compile the plan (and its fused callbacks) for the given queue
    fn bake(&mut self, queue: &CommandQueue) -> Result<(), Error> {
        let mut q: cl_command_queue = queue.get();
        let status = unsafe { ffi::clfftBakePlan(self.handle, 1, &mut q, None, ptr::null_mut()) };
        check(status, "clfftBakePlan", self.name)?;
        log::debug!(
            "baked {} plan (length {}, batch {})",
            self.name,
            self.fft_size,
            self.batch
        );
        Ok(())
    }

    /// Enqueue the transform, gated on `wait`, returning its event
    pub fn enqueue(
        &self,
        queue: &CommandQueue,
        wait: &[cl_event],
        input: &Buffer<u8>,
        output: &Buffer<u8>,
    ) -> Result<Event, Error> {
        if self.destroyed {
            return Err(Error::CleanedUp);
        }
        let mut q: cl_command_queue = queue.get();
        let mut in_mem: cl_mem = input.get();
        let mut out_mem: cl_mem = output.get();
        let mut out_event: cl_event = ptr::null_mut();
        let wait_ptr = if wait.is_empty() {
            ptr::null()
        } else {
            wait.as_ptr()
        };
        let status = unsafe {
            ffi::clfftEnqueueTransform(
                self.handle,
                self.direction,
                1,
                &mut q,
                wait.len() as u32,
                wait_ptr,
                &mut out_event,
                &mut in_mem,
                &mut out_mem,
                0 as cl_mem,
            )
        };
        check(status, "clfftEnqueueTransform", self.name)?;
        Ok(Event::new(out_event))
    }

    /// Release the plan handle; safe to call more than once
    pub fn destroy(&mut self) -> Result<(), Error> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let mut handle = self.handle;
        let status = unsafe { ffi::clfftDestroyPlan(&mut handle) };
        check(status, "clfftDestroyPlan", self.name)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn batch(&self) -> usize {
        self.batch
    }
}

impl Drop for TransformPlan {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::warn!("leaking {} plan: {e}", self.name);
        }
    }
}

/// Forward plan over the reference bank
///
/// Pre-callback converts, windows, and cyclically shifts the N raw samples
/// into `num_shifts` rows; post-callback stores the conjugated spectrum so
/// the downstream multiply is a plain complex product.
pub fn build_reference_plan(
    ctx: &GpuContext,
    layout: &BufferLayout,
    convert_userdata: &Buffer<u8>,
) -> Result<TransformPlan, Error> {
    let mut plan = TransformPlan::create(
        ctx,
        "reference forward",
        ffi::clfftDirection::CLFFT_FORWARD,
        layout.fft_size,
        layout.num_shifts,
    )?;
    plan.configure()?;
    plan.set_callback(
        kernels::CONVERT_SHIFT_NAME,
        kernels::CONVERT_SHIFT_PRE,
        CallbackKind::Pre,
        Some(convert_userdata),
    )?;
    plan.set_callback(
        kernels::CONJUGATE_NAME,
        kernels::CONJUGATE_POST,
        CallbackKind::Post,
        None,
    )?;
    plan.bake(ctx.queue())?;
    Ok(plan)
}

/// Forward plan over the input signal batch
pub fn build_input_plan(
    ctx: &GpuContext,
    layout: &BufferLayout,
    convert_userdata: &Buffer<u8>,
) -> Result<TransformPlan, Error> {
    let mut plan = TransformPlan::create(
        ctx,
        "input forward",
        ffi::clfftDirection::CLFFT_FORWARD,
        layout.fft_size,
        layout.num_signals,
    )?;
    plan.configure()?;
    plan.set_callback(
        kernels::CONVERT_NAME,
        kernels::CONVERT_PRE,
        CallbackKind::Pre,
        Some(convert_userdata),
    )?;
    plan.bake(ctx.queue())?;
    Ok(plan)
}

/// Inverse plan over every (signal, shift) correlation window
///
/// Pre-callback multiplies the two spectra out of the fused userdata copy;
/// post-callback writes the time-domain sample and extracts the peak
/// magnitudes into the peak userdata payload.
pub fn build_correlation_plan(
    ctx: &GpuContext,
    layout: &BufferLayout,
    multiply_userdata: &Buffer<u8>,
    peak_userdata: &Buffer<u8>,
) -> Result<TransformPlan, Error> {
    let mut plan = TransformPlan::create(
        ctx,
        "correlation inverse",
        ffi::clfftDirection::CLFFT_BACKWARD,
        layout.fft_size,
        layout.correlation_batch(),
    )?;
    plan.configure()?;
    plan.set_callback(
        kernels::MULTIPLY_NAME,
        kernels::MULTIPLY_PRE,
        CallbackKind::Pre,
        Some(multiply_userdata),
    )?;
    plan.set_callback(
        kernels::PEAK_NAME,
        kernels::PEAK_POST,
        CallbackKind::Post,
        Some(peak_userdata),
    )?;
    plan.bake(ctx.queue())?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencl3::command_queue::CL_BLOCKING;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn bakes_and_destroys_an_input_plan() {
        init_logger();
        if !GpuContext::is_available() {
            println!("no OpenCL device, skipping");
            return;
        }
        let ctx = GpuContext::new().unwrap();
        let layout = BufferLayout::new(1024, 4, 2, 3).unwrap();

        let mut userdata = ctx
            .alloc_bytes("convert userdata", layout.convert_userdata_bytes)
            .unwrap();
        let header = kernels::convert_params(1.0, 1024, 4, false);
        unsafe {
            ctx.queue()
                .enqueue_write_buffer(&mut userdata, CL_BLOCKING, 0, &header, &[])
                .unwrap();
        }

        let mut plan = build_input_plan(&ctx, &layout, &userdata).unwrap();
        assert_eq!(plan.batch(), 2);
        plan.destroy().unwrap();
        // second destroy is a no-op
        plan.destroy().unwrap();
    }

    #[test]
    fn enqueue_after_destroy_fails() {
        init_logger();
        if !GpuContext::is_available() {
            println!("no OpenCL device, skipping");
            return;
        }
        let ctx = GpuContext::new().unwrap();
        let layout = BufferLayout::new(256, 2, 1, 1).unwrap();

        let mut userdata = ctx
            .alloc_bytes("convert userdata", layout.convert_userdata_bytes)
            .unwrap();
        let header = kernels::convert_params(1.0, 256, 2, false);
        unsafe {
            ctx.queue()
                .enqueue_write_buffer(&mut userdata, CL_BLOCKING, 0, &header, &[])
                .unwrap();
        }

        let input = ctx
            .alloc_bytes("input samples", layout.input_samples_bytes)
            .unwrap();
        let output = ctx
            .alloc_bytes("input spectrum", layout.input_spectrum_bytes)
            .unwrap();

        let mut plan = build_input_plan(&ctx, &layout, &userdata).unwrap();
        plan.destroy().unwrap();
        assert!(matches!(
            plan.enqueue(ctx.queue(), &[], &input, &output),
            Err(Error::CleanedUp)
        ));
    }
}
