//! Correlation pipeline orchestrator
//!
//! Three-step state machine owning every device buffer and baked plan of one
//! correlation run:
//!
//! 1. upload the reference signal and run the forward plan over the shift
//!    bank (conversion, windowing, shift generation, and conjugation fused
//!    into the plan),
//! 2. upload the input signal batch and run its forward plan,
//! 3. rebuild the fused multiply userdata with two device-to-device copies,
//!    run the inverse plan (spectral multiply and peak extraction fused),
//!    and read back the peak payload.
//!
//! All enqueues are non-blocking; ordering is carried entirely by event
//! wait lists so the device can pipeline adjacent work. The host blocks
//! only inside the timing collector, which waits per event to read its
//! profiling counters. Steps must run in order; re-running a completed
//! step is a no-op, and skipping a prerequisite is a caller bug reported
//! as a sequencing error.

use opencl3::command_queue::{CommandQueue, CL_BLOCKING, CL_NON_BLOCKING};
use opencl3::event::Event;
use opencl3::memory::{Buffer, ClMem};
use opencl3::types::cl_event;

use crate::config::CorrelatorConfig;
use crate::device::GpuContext;
use crate::error::Error;
use crate::kernels;
use crate::layout::BufferLayout;
use crate::plan::{
    build_correlation_plan, build_input_plan, build_reference_plan, TransformPlan,
};
use crate::profile::{
    profile_event, CorrelationStepTiming, ForwardStepTiming, PipelineTimings,
};

/// Progress of the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Initialized,
    Step1Done,
    Step2Done,
    Step3Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reference,
    Input,
    Correlation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Run,
    AlreadyDone,
}

/// Pure sequencing gate: whether `step` may run from `state`
fn disposition(state: PipelineState, step: Step) -> Result<Disposition, Error> {
    let (done_at, required_at, attempted, required) = match step {
        Step::Reference => (
            PipelineState::Step1Done,
            PipelineState::Initialized,
            "step1 (reference transform)",
            "initialization",
        ),
        Step::Input => (
            PipelineState::Step2Done,
            PipelineState::Step1Done,
            "step2 (input transform)",
            "step1 (reference transform)",
        ),
        Step::Correlation => (
            PipelineState::Step3Done,
            PipelineState::Step2Done,
            "step3 (correlation)",
            "step2 (input transform)",
        ),
    };
    if state >= done_at {
        Ok(Disposition::AlreadyDone)
    } else if state >= required_at {
        Ok(Disposition::Run)
    } else {
        Err(Error::Sequencing {
            attempted,
            required,
        })
    }
}

struct DeviceBuffers {
    reference_samples: Buffer<u8>,
    reference_spectrum: Buffer<u8>,
    input_samples: Buffer<u8>,
    input_spectrum: Buffer<u8>,
    /// Inverse plan input; its contents are never read (the multiply
    /// pre-callback sources both operands from the userdata copy), but
    /// clFFT requires a correctly sized buffer to drive the batch
    correlation_spectrum: Buffer<u8>,
    correlation_output: Buffer<u8>,
    reference_convert_userdata: Buffer<u8>,
    input_convert_userdata: Buffer<u8>,
    multiply_userdata: Buffer<u8>,
    peak_userdata: Buffer<u8>,
}

struct Plans {
    reference: TransformPlan,
    input: TransformPlan,
    correlation: TransformPlan,
}

/// Read-only view of the peak payload as peaks[signal][shift][point]
pub struct PeakMatrix<'a> {
    values: &'a [f32],
    num_shifts: usize,
    n_kg: usize,
}

impl<'a> PeakMatrix<'a> {
    /// Peak magnitude at (signal, shift, point), if in range
    pub fn get(&self, signal: usize, shift: usize, point: usize) -> Option<f32> {
        if shift >= self.num_shifts || point >= self.n_kg {
            return None;
        }
        self.values
            .get((signal * self.num_shifts + shift) * self.n_kg + point)
            .copied()
    }

    /// Shift whose zero-lag magnitude is largest for `signal`
    pub fn best_shift(&self, signal: usize) -> Option<usize> {
        (0..self.num_shifts)
            .filter_map(|shift| Some((shift, self.get(signal, shift, 0)?)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(shift, _)| shift)
    }

    pub fn as_slice(&self) -> &'a [f32] {
        self.values
    }
}

/// The correlation pipeline
///
/// Field order is load-bearing: if `cleanup` could not run to completion,
/// the default drop order must still destroy plans before buffers and
/// buffers before the context.
pub struct CorrelationPipeline {
    plans: Option<Plans>,
    buffers: Option<DeviceBuffers>,
    ctx: GpuContext,
    config: CorrelatorConfig,
    layout: BufferLayout,
    state: PipelineState,
    step1_event: Option<Event>,
    step2_event: Option<Event>,
    timings: PipelineTimings,
    peaks: Vec<f32>,
    cleaned_up: bool,
}

impl CorrelationPipeline {
    /// Validate the configuration, allocate every device buffer, write the
    /// callback headers, and bake the three plans
    pub fn new(ctx: GpuContext, config: CorrelatorConfig) -> Result<Self, Error> {
        config.validate()?;
        let layout = BufferLayout::new(
            config.fft_size,
            config.num_shifts,
            config.num_signals,
            config.n_kg,
        )?;

        let mut buffers = DeviceBuffers {
            reference_samples: ctx.alloc_bytes("reference samples", layout.reference_samples_bytes)?,
            reference_spectrum: ctx
                .alloc_bytes("reference spectrum", layout.reference_spectrum_bytes)?,
            input_samples: ctx.alloc_bytes("input samples", layout.input_samples_bytes)?,
            input_spectrum: ctx.alloc_bytes("input spectrum", layout.input_spectrum_bytes)?,
            correlation_spectrum: ctx
                .alloc_bytes("correlation spectrum", layout.correlation_bytes)?,
            correlation_output: ctx.alloc_bytes("correlation output", layout.correlation_bytes)?,
            reference_convert_userdata: ctx
                .alloc_bytes("reference convert userdata", layout.convert_userdata_bytes)?,
            input_convert_userdata: ctx
                .alloc_bytes("input convert userdata", layout.convert_userdata_bytes)?,
            multiply_userdata: ctx
                .alloc_bytes("multiply userdata", layout.multiply_userdata_bytes)?,
            peak_userdata: ctx.alloc_bytes("peak userdata", layout.peak_userdata_bytes)?,
        };

        write_headers(&ctx, &config, &layout, &mut buffers)?;

        let plans = Plans {
            reference: build_reference_plan(&ctx, &layout, &buffers.reference_convert_userdata)?,
            input: build_input_plan(&ctx, &layout, &buffers.input_convert_userdata)?,
            correlation: build_correlation_plan(
                &ctx,
                &layout,
                &buffers.multiply_userdata,
                &buffers.peak_userdata,
            )?,
        };

        log::info!(
            "pipeline ready: N={}, shifts={}, signals={}, n_kg={}",
            config.fft_size,
            config.num_shifts,
            config.num_signals,
            config.n_kg
        );

        let pipeline = Self {
            ctx,
            config,
            layout,
            buffers: Some(buffers),
            plans: Some(plans),
            state: PipelineState::Initialized,
            step1_event: None,
            step2_event: None,
            timings: PipelineTimings::default(),
            peaks: Vec::new(),
            cleaned_up: false,
        };
        pipeline.verify_allocations()?;
        Ok(pipeline)
    }

    /// Step 1: upload the reference signal and transform the shift bank
    pub fn step1(&mut self, reference: &[i32]) -> Result<(), Error> {
        self.ensure_live()?;
        match disposition(self.state, Step::Reference)? {
            Disposition::AlreadyDone => return Ok(()),
            Disposition::Run => {}
        }
        if reference.len() != self.config.fft_size {
            return Err(Error::Input(format!(
                "reference signal must hold {} samples, got {}",
                self.config.fft_size,
                reference.len()
            )));
        }

        let bufs = self.buffers.as_mut().ok_or(Error::CleanedUp)?;
        let plans = self.plans.as_ref().ok_or(Error::CleanedUp)?;

        let (transform, timing) = run_forward_step(
            self.ctx.queue(),
            &plans.reference,
            reference,
            &mut bufs.reference_samples,
            &bufs.reference_spectrum,
            None,
            "upload reference samples",
            "reference upload",
            "reference forward transform",
        )?;
        log::info!(
            "step1 complete: transform {:.3} ms",
            timing.transform.execute_ms
        );
        self.timings.reference = Some(timing);
        self.step1_event = Some(transform);
        self.state = PipelineState::Step1Done;
        Ok(())
    }

    /// Step 2: upload the input signal batch and transform it
    ///
    /// `inputs` holds `num_signals` concatenated signals of `fft_size`
    /// samples each.
    pub fn step2(&mut self, inputs: &[i32]) -> Result<(), Error> {
        self.ensure_live()?;
        match disposition(self.state, Step::Input)? {
            Disposition::AlreadyDone => return Ok(()),
            Disposition::Run => {}
        }
        let expected = self.config.num_signals * self.config.fft_size;
        if inputs.len() != expected {
            return Err(Error::Input(format!(
                "input signal batch must hold {expected} samples ({} signals of {}), got {}",
                self.config.num_signals,
                self.config.fft_size,
                inputs.len()
            )));
        }

        let bufs = self.buffers.as_mut().ok_or(Error::CleanedUp)?;
        let plans = self.plans.as_ref().ok_or(Error::CleanedUp)?;
        let step1_event = self.step1_event.as_ref().ok_or(Error::Sequencing {
            attempted: "step2 (input transform)",
            required: "step1 (reference transform)",
        })?;

        let (transform, timing) = run_forward_step(
            self.ctx.queue(),
            &plans.input,
            inputs,
            &mut bufs.input_samples,
            &bufs.input_spectrum,
            Some(step1_event),
            "upload input samples",
            "input upload",
            "input forward transform",
        )?;
        log::info!(
            "step2 complete: transform {:.3} ms",
            timing.transform.execute_ms
        );
        self.timings.input = Some(timing);
        self.step2_event = Some(transform);
        self.state = PipelineState::Step2Done;
        Ok(())
    }

    /// Step 3: rebuild the multiply userdata on-device, run the fused
    /// inverse transform, and read back the peak payload
    pub fn step3(&mut self) -> Result<(), Error> {
        self.ensure_live()?;
        match disposition(self.state, Step::Correlation)? {
            Disposition::AlreadyDone => return Ok(()),
            Disposition::Run => {}
        }

        let bufs = self.buffers.as_mut().ok_or(Error::CleanedUp)?;
        let plans = self.plans.as_ref().ok_or(Error::CleanedUp)?;
        let step2_event = self.step2_event.as_ref().ok_or(Error::Sequencing {
            attempted: "step3 (correlation)",
            required: "step2 (input transform)",
        })?;

        let (peaks, timing) = run_correlation_step(
            self.ctx.queue(),
            &plans.correlation,
            bufs,
            &self.layout,
            step2_event,
        )?;
        log::info!(
            "step3 complete: transform {:.3} ms",
            timing.transform.execute_ms
        );
        self.timings.correlation = Some(timing);
        self.peaks = peaks;
        self.state = PipelineState::Step3Done;
        Ok(())
    }

    /// Peak magnitudes of the completed run
    pub fn peaks(&self) -> Result<PeakMatrix<'_>, Error> {
        self.ensure_live()?;
        if self.state < PipelineState::Step3Done {
            return Err(Error::Sequencing {
                attempted: "peaks()",
                required: "step3 (correlation)",
            });
        }
        Ok(PeakMatrix {
            values: &self.peaks,
            num_shifts: self.config.num_shifts,
            n_kg: self.config.n_kg,
        })
    }

    /// Blocking snapshot of the reference spectrum (interleaved complex)
    pub fn reference_spectrum(&self) -> Result<Vec<f32>, Error> {
        self.read_spectrum(
            PipelineState::Step1Done,
            "step1 (reference transform)",
            |bufs| &bufs.reference_spectrum,
            self.layout.reference_spectrum_bytes,
        )
    }

    /// Blocking snapshot of the input spectrum (interleaved complex)
    pub fn input_spectrum(&self) -> Result<Vec<f32>, Error> {
        self.read_spectrum(
            PipelineState::Step2Done,
            "step2 (input transform)",
            |bufs| &bufs.input_spectrum,
            self.layout.input_spectrum_bytes,
        )
    }

    /// Blocking snapshot of the correlation output (interleaved complex)
    pub fn correlation_output(&self) -> Result<Vec<f32>, Error> {
        self.read_spectrum(
            PipelineState::Step3Done,
            "step3 (correlation)",
            |bufs| &bufs.correlation_output,
            self.layout.correlation_bytes,
        )
    }

    fn read_spectrum(
        &self,
        required_state: PipelineState,
        required: &'static str,
        select: impl FnOnce(&DeviceBuffers) -> &Buffer<u8>,
        bytes: usize,
    ) -> Result<Vec<f32>, Error> {
        self.ensure_live()?;
        if self.state < required_state {
            return Err(Error::Sequencing {
                attempted: "spectrum snapshot",
                required,
            });
        }
        let bufs = self.buffers.as_ref().ok_or(Error::CleanedUp)?;
        let mut out = vec![0.0f32; bytes / std::mem::size_of::<f32>()];
        unsafe {
            self.ctx
                .queue()
                .enqueue_read_buffer(
                    select(bufs),
                    CL_BLOCKING,
                    0,
                    f32s_as_bytes_mut(&mut out),
                    &[],
                )
                .map_err(|e| Error::device("read spectrum snapshot", e))?;
        }
        Ok(out)
    }

    /// Check every device allocation against the planned layout
    pub fn verify_allocations(&self) -> Result<(), Error> {
        let bufs = self.buffers.as_ref().ok_or(Error::CleanedUp)?;
        let layout = &self.layout;
        let expected: [(&'static str, &Buffer<u8>, usize); 10] = [
            ("reference samples", &bufs.reference_samples, layout.reference_samples_bytes),
            ("reference spectrum", &bufs.reference_spectrum, layout.reference_spectrum_bytes),
            ("input samples", &bufs.input_samples, layout.input_samples_bytes),
            ("input spectrum", &bufs.input_spectrum, layout.input_spectrum_bytes),
            ("correlation spectrum", &bufs.correlation_spectrum, layout.correlation_bytes),
            ("correlation output", &bufs.correlation_output, layout.correlation_bytes),
            (
                "reference convert userdata",
                &bufs.reference_convert_userdata,
                layout.convert_userdata_bytes,
            ),
            (
                "input convert userdata",
                &bufs.input_convert_userdata,
                layout.convert_userdata_bytes,
            ),
            ("multiply userdata", &bufs.multiply_userdata, layout.multiply_userdata_bytes),
            ("peak userdata", &bufs.peak_userdata, layout.peak_userdata_bytes),
        ];
        for (what, buffer, expected_bytes) in expected {
            let actual = buffer
                .size()
                .map_err(|e| Error::device("query buffer size", e))?;
            if actual != expected_bytes {
                return Err(Error::SizeMismatch {
                    what,
                    expected: expected_bytes,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Release all device resources; idempotent
    ///
    /// Plans hold references to the userdata buffers, so they are destroyed
    /// first; buffers drop next; the context outlives both and drops with
    /// the pipeline.
    pub fn cleanup(&mut self) -> Result<(), Error> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        self.step1_event = None;
        self.step2_event = None;
        self.ctx.finish()?;
        if let Some(mut plans) = self.plans.take() {
            plans.reference.destroy()?;
            plans.input.destroy()?;
            plans.correlation.destroy()?;
        }
        self.buffers = None;
        log::debug!("pipeline resources released");
        Ok(())
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn timings(&self) -> &PipelineTimings {
        &self.timings
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.cleaned_up {
            Err(Error::CleanedUp)
        } else {
            Ok(())
        }
    }
}

impl Drop for CorrelationPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("pipeline cleanup during drop failed: {e}");
        }
    }
}

/// Drain the queue before propagating a mid-step error
///
/// A failure between an enqueue and its profiling wait can leave transfers
/// in flight that still reference host memory owned by the caller (sample
/// slices, the peaks vector). Returning through here guarantees those
/// operations have completed before that memory can be freed.
fn drain_on_error<T>(queue: &CommandQueue, result: Result<T, Error>) -> Result<T, Error> {
    if result.is_err() {
        let _ = queue.finish();
    }
    result
}

/// Shared body of steps 1 and 2: gated upload, forward transform, profiling
fn run_forward_step(
    queue: &CommandQueue,
    plan: &TransformPlan,
    samples: &[i32],
    sample_buffer: &mut Buffer<u8>,
    spectrum_buffer: &Buffer<u8>,
    gate: Option<&Event>,
    upload_op: &'static str,
    upload_label: &'static str,
    transform_label: &'static str,
) -> Result<(Event, ForwardStepTiming), Error> {
    let wait: Vec<cl_event> = gate.iter().map(|event| event.get()).collect();
    let upload = unsafe {
        queue
            .enqueue_write_buffer(
                sample_buffer,
                CL_NON_BLOCKING,
                0,
                samples_as_bytes(samples),
                &wait,
            )
            .map_err(|e| Error::device(upload_op, e))?
    };
    // The upload now references the caller's samples until it completes.
    let result = (|| {
        let transform =
            plan.enqueue(queue, &[upload.get()], sample_buffer, spectrum_buffer)?;
        let timing = ForwardStepTiming {
            upload: profile_event(&upload, upload_label)?,
            transform: profile_event(&transform, transform_label)?,
        };
        Ok((transform, timing))
    })();
    drain_on_error(queue, result)
}

/// Step 3 body: userdata rebuild copies, inverse transform, peak download
fn run_correlation_step(
    queue: &CommandQueue,
    plan: &TransformPlan,
    bufs: &mut DeviceBuffers,
    layout: &BufferLayout,
    gate: &Event,
) -> Result<(Vec<f32>, CorrelationStepTiming), Error> {
    // The spectra are snapshotted into the userdata buffer on-device;
    // no spectral data crosses the host boundary. Failures up to the
    // transform enqueue leave only device-to-device work in flight, so
    // they may propagate directly.
    let copy_reference = unsafe {
        queue
            .enqueue_copy_buffer(
                &bufs.reference_spectrum,
                &mut bufs.multiply_userdata,
                0,
                layout.multiply_reference_offset,
                layout.reference_spectrum_bytes,
                &[gate.get()],
            )
            .map_err(|e| Error::device("copy reference spectrum", e))?
    };
    let copy_input = unsafe {
        queue
            .enqueue_copy_buffer(
                &bufs.input_spectrum,
                &mut bufs.multiply_userdata,
                0,
                layout.multiply_input_offset,
                layout.input_spectrum_bytes,
                &[copy_reference.get()],
            )
            .map_err(|e| Error::device("copy input spectrum", e))?
    };
    let transform = plan.enqueue(
        queue,
        &[copy_input.get()],
        &bufs.correlation_spectrum,
        &bufs.correlation_output,
    )?;

    let mut peaks = vec![0.0f32; layout.peak_slots];
    let result = (|| {
        let download = unsafe {
            queue
                .enqueue_read_buffer(
                    &bufs.peak_userdata,
                    CL_NON_BLOCKING,
                    layout.peak_payload_offset,
                    f32s_as_bytes_mut(&mut peaks),
                    &[transform.get()],
                )
                .map_err(|e| Error::device("read peak payload", e))?
        };
        Ok(CorrelationStepTiming {
            copy_reference: profile_event(&copy_reference, "reference spectrum copy")?,
            copy_input: profile_event(&copy_input, "input spectrum copy")?,
            transform: profile_event(&transform, "correlation inverse transform")?,
            download: profile_event(&download, "peak payload read")?,
        })
    })();
    // The download writes into the peaks vector; it must be complete (or
    // drained after a failure) before the vector can drop.
    let timing = drain_on_error(queue, result)?;
    Ok((peaks, timing))
}

fn write_headers(
    ctx: &GpuContext,
    config: &CorrelatorConfig,
    layout: &BufferLayout,
    buffers: &mut DeviceBuffers,
) -> Result<(), Error> {
    let n = config.fft_size as u32;
    let shifts = config.num_shifts as u32;
    let signals = config.num_signals as u32;

    let reference_header =
        kernels::convert_params(config.scale_factor, n, shifts, config.hamming);
    // The input plan neither shifts nor windows; its header carries a
    // neutral shift count.
    let input_header = kernels::convert_params(config.scale_factor, n, 1, false);
    let multiply_header = kernels::multiply_params(signals, shifts, n);
    let peak_header = kernels::peak_params(
        signals,
        shifts,
        n,
        config.n_kg as u32,
        layout.search_range() as u32,
    );

    let queue = ctx.queue();
    let writes: [(&mut Buffer<u8>, &[u8], &'static str); 4] = [
        (
            &mut buffers.reference_convert_userdata,
            &reference_header,
            "write reference convert header",
        ),
        (
            &mut buffers.input_convert_userdata,
            &input_header,
            "write input convert header",
        ),
        (
            &mut buffers.multiply_userdata,
            &multiply_header,
            "write multiply header",
        ),
        (&mut buffers.peak_userdata, &peak_header, "write peak header"),
    ];
    for (buffer, bytes, op) in writes {
        unsafe {
            queue
                .enqueue_write_buffer(buffer, CL_BLOCKING, 0, bytes, &[])
                .map_err(|e| Error::device(op, e))?;
        }
    }
    Ok(())
}

fn samples_as_bytes(samples: &[i32]) -> &[u8] {
    debug_assert_eq!(std::mem::size_of::<i32>(), crate::layout::SAMPLE_BYTES);
    unsafe { std::slice::from_raw_parts(samples.as_ptr().cast::<u8>(), samples.len() * 4) }
}

fn f32s_as_bytes_mut(values: &mut [f32]) -> &mut [u8] {
    debug_assert_eq!(std::mem::size_of::<f32>(), crate::layout::REAL_BYTES);
    unsafe { std::slice::from_raw_parts_mut(values.as_mut_ptr().cast::<u8>(), values.len() * 4) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered() {
        assert!(PipelineState::Initialized < PipelineState::Step1Done);
        assert!(PipelineState::Step1Done < PipelineState::Step2Done);
        assert!(PipelineState::Step2Done < PipelineState::Step3Done);
    }

    #[test]
    fn steps_run_in_order() {
        assert_eq!(
            disposition(PipelineState::Initialized, Step::Reference).unwrap(),
            Disposition::Run
        );
        assert_eq!(
            disposition(PipelineState::Step1Done, Step::Input).unwrap(),
            Disposition::Run
        );
        assert_eq!(
            disposition(PipelineState::Step2Done, Step::Correlation).unwrap(),
            Disposition::Run
        );
    }

    #[test]
    fn completed_steps_are_no_ops() {
        for state in [
            PipelineState::Step1Done,
            PipelineState::Step2Done,
            PipelineState::Step3Done,
        ] {
            assert_eq!(
                disposition(state, Step::Reference).unwrap(),
                Disposition::AlreadyDone
            );
        }
        assert_eq!(
            disposition(PipelineState::Step2Done, Step::Input).unwrap(),
            Disposition::AlreadyDone
        );
        assert_eq!(
            disposition(PipelineState::Step3Done, Step::Correlation).unwrap(),
            Disposition::AlreadyDone
        );
    }

    #[test]
    fn out_of_order_steps_fail() {
        assert!(matches!(
            disposition(PipelineState::Initialized, Step::Input),
            Err(Error::Sequencing { .. })
        ));
        assert!(matches!(
            disposition(PipelineState::Initialized, Step::Correlation),
            Err(Error::Sequencing { .. })
        ));
        assert!(matches!(
            disposition(PipelineState::Step1Done, Step::Correlation),
            Err(Error::Sequencing { .. })
        ));
    }

    #[test]
    fn peak_matrix_indexing() {
        let values: Vec<f32> = (0..2 * 3 * 2).map(|v| v as f32).collect();
        let matrix = PeakMatrix {
            values: &values,
            num_shifts: 3,
            n_kg: 2,
        };
        assert_eq!(matrix.get(0, 0, 0), Some(0.0));
        assert_eq!(matrix.get(0, 2, 1), Some(5.0));
        assert_eq!(matrix.get(1, 1, 0), Some(8.0));
        assert_eq!(matrix.get(0, 3, 0), None);
        assert_eq!(matrix.get(0, 0, 2), None);
    }

    #[test]
    fn best_shift_picks_the_zero_lag_maximum() {
        let values: Vec<f32> = (0..2 * 3 * 2).map(|v| v as f32).collect();
        let matrix = PeakMatrix {
            values: &values,
            num_shifts: 3,
            n_kg: 2,
        };
        assert_eq!(matrix.best_shift(0), Some(2));
        assert_eq!(matrix.best_shift(1), Some(2));
        // out-of-range signal has no slots at all
        assert_eq!(matrix.best_shift(2), None);
    }

    #[test]
    fn drain_passes_results_through_and_keeps_the_queue_usable() {
        if !GpuContext::is_available() {
            println!("no OpenCL device, skipping");
            return;
        }
        let ctx = GpuContext::new().unwrap();
        assert_eq!(drain_on_error(ctx.queue(), Ok(7)).unwrap(), 7);
        assert!(matches!(
            drain_on_error::<()>(ctx.queue(), Err(Error::CleanedUp)),
            Err(Error::CleanedUp)
        ));

        // The error path finishes the queue; it must stay usable after.
        let mut buf = ctx.alloc_bytes("scratch", 64).unwrap();
        let data = [0u8; 64];
        unsafe {
            ctx.queue()
                .enqueue_write_buffer(&mut buf, CL_BLOCKING, 0, &data[..], &[])
                .unwrap();
        }
    }

    #[test]
    fn sample_cast_preserves_bytes() {
        let samples = [1i32, -1, i32::MAX];
        let bytes = samples_as_bytes(&samples);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-1i32).to_le_bytes());
    }
}
