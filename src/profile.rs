//! Event timing collector
//!
//! Every enqueued operation in the pipeline is profiled through its OpenCL
//! event: the queue is created with profiling enabled, so each event carries
//! queued/submit/start/end counters in device nanoseconds. The collector
//! waits on the event (timing the host-side wait separately) and converts
//! the counters into millisecond segments.

use std::time::Instant;

use opencl3::event::Event;

use crate::error::Error;

const NS_PER_MS: f64 = 1_000_000.0;

/// Timing breakdown of one enqueued operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventTiming {
    pub label: &'static str,
    /// Time spent in the host queue before submission to the device
    pub queued_to_submit_ms: f64,
    /// Time between device submission and execution start
    pub submit_to_start_ms: f64,
    /// Device execution time
    pub execute_ms: f64,
    /// Queued-to-end total on the device clock
    pub total_ms: f64,
    /// Host-side blocking wait until the event completed
    pub host_wait_ms: f64,
}

impl EventTiming {
    /// Build a timing record from raw device counters (nanoseconds)
    pub(crate) fn from_counters(
        label: &'static str,
        queued: u64,
        submit: u64,
        start: u64,
        end: u64,
        host_wait_ms: f64,
    ) -> Self {
        let segment = |from: u64, to: u64| to.saturating_sub(from) as f64 / NS_PER_MS;
        Self {
            label,
            queued_to_submit_ms: segment(queued, submit),
            submit_to_start_ms: segment(submit, start),
            execute_ms: segment(start, end),
            total_ms: segment(queued, end),
            host_wait_ms,
        }
    }
}

impl std::fmt::Display for EventTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {:.3} ms total ({:.3} queued, {:.3} submit, {:.3} exec), host wait {:.3} ms",
            self.label,
            self.total_ms,
            self.queued_to_submit_ms,
            self.submit_to_start_ms,
            self.execute_ms,
            self.host_wait_ms
        )
    }
}

/// Wait for `event` and read its profiling counters
pub(crate) fn profile_event(event: &Event, label: &'static str) -> Result<EventTiming, Error> {
    let started = Instant::now();
    event.wait().map_err(|e| Error::device("wait for event", e))?;
    let host_wait_ms = started.elapsed().as_secs_f64() * 1e3;

    let queued = event
        .profiling_command_queued()
        .map_err(|e| Error::device("read queued counter", e))?;
    let submit = event
        .profiling_command_submit()
        .map_err(|e| Error::device("read submit counter", e))?;
    let start = event
        .profiling_command_start()
        .map_err(|e| Error::device("read start counter", e))?;
    let end = event
        .profiling_command_end()
        .map_err(|e| Error::device("read end counter", e))?;

    let timing = EventTiming::from_counters(label, queued, submit, start, end, host_wait_ms);
    log::debug!("{timing}");
    Ok(timing)
}

/// Timings of one forward-transform step (upload + transform)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardStepTiming {
    pub upload: EventTiming,
    pub transform: EventTiming,
}

/// Timings of the fused correlation step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationStepTiming {
    pub copy_reference: EventTiming,
    pub copy_input: EventTiming,
    pub transform: EventTiming,
    pub download: EventTiming,
}

/// Per-step timings of the most recent pipeline run
///
/// A step's slot is `None` until that step has executed at least once; each
/// re-run overwrites its slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineTimings {
    pub reference: Option<ForwardStepTiming>,
    pub input: Option<ForwardStepTiming>,
    pub correlation: Option<CorrelationStepTiming>,
}

impl PipelineTimings {
    /// Sum of device execution time across every recorded operation
    pub fn device_execute_ms(&self) -> f64 {
        let mut total = 0.0;
        if let Some(step) = &self.reference {
            total += step.upload.execute_ms + step.transform.execute_ms;
        }
        if let Some(step) = &self.input {
            total += step.upload.execute_ms + step.transform.execute_ms;
        }
        if let Some(step) = &self.correlation {
            total += step.copy_reference.execute_ms
                + step.copy_input.execute_ms
                + step.transform.execute_ms
                + step.download.execute_ms;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_convert_to_millisecond_segments() {
        let t = EventTiming::from_counters("fft", 1_000_000, 2_500_000, 4_000_000, 9_000_000, 0.25);
        assert_eq!(t.queued_to_submit_ms, 1.5);
        assert_eq!(t.submit_to_start_ms, 1.5);
        assert_eq!(t.execute_ms, 5.0);
        assert_eq!(t.total_ms, 8.0);
        assert_eq!(t.host_wait_ms, 0.25);
    }

    #[test]
    fn out_of_order_counters_do_not_underflow() {
        // Some runtimes report submit == queued or slightly out of order.
        let t = EventTiming::from_counters("fft", 5_000_000, 4_000_000, 6_000_000, 7_000_000, 0.0);
        assert_eq!(t.queued_to_submit_ms, 0.0);
        assert_eq!(t.execute_ms, 1.0);
    }

    #[test]
    fn execute_totals_sum_recorded_steps() {
        let ev = |exec_ns: u64| EventTiming::from_counters("op", 0, 0, 0, exec_ns, 0.0);
        let timings = PipelineTimings {
            reference: Some(ForwardStepTiming {
                upload: ev(1_000_000),
                transform: ev(2_000_000),
            }),
            input: None,
            correlation: Some(CorrelationStepTiming {
                copy_reference: ev(500_000),
                copy_input: ev(500_000),
                transform: ev(3_000_000),
                download: ev(1_000_000),
            }),
        };
        assert_eq!(timings.device_execute_ms(), 8.0);
    }
}
