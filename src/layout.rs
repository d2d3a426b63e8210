//! Buffer and userdata layout planner
//!
//! Every byte size and offset shared between the host (buffer allocation,
//! header writes, payload reads) and the device-side callback fragments is
//! computed here, from the four pipeline integers. The callback sources in
//! [`crate::kernels`] hard-code the same header struct definitions; the unit
//! tests below pin the two views to each other so they cannot drift apart
//! silently.

use crate::error::Error;

/// Bytes per raw sample (int32)
pub const SAMPLE_BYTES: usize = 4;
/// Bytes per real output value (float)
pub const REAL_BYTES: usize = 4;
/// Bytes per interleaved complex value (two floats)
pub const COMPLEX_BYTES: usize = 8;

/// Bytes of the convert-callback header: {f32 scale; u32 n; u32 shifts; u32 window}
pub const CONVERT_HEADER_BYTES: usize = 16;
/// Bytes of the complex-multiply header: {u32 signals; u32 shifts; u32 n; u32 pad}
pub const MULTIPLY_HEADER_BYTES: usize = 16;
/// Bytes of the peak-extraction header: {u32 signals; u32 shifts; u32 n; u32 n_kg; u32 range; u32 pad}
pub const PEAK_HEADER_BYTES: usize = 24;

/// Byte sizes and offsets for every device buffer of one pipeline instance
///
/// Pure arithmetic over (N, num_shifts, num_signals, n_kg); all products are
/// checked, so an overflowing configuration is rejected here instead of
/// corrupting an allocation size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub fft_size: usize,
    pub num_shifts: usize,
    pub num_signals: usize,
    pub n_kg: usize,

    /// Reference signal upload buffer: N int32 samples
    pub reference_samples_bytes: usize,
    /// Reference spectral buffer: [num_shifts][N] complex
    pub reference_spectrum_bytes: usize,
    /// Input signal upload buffer: [num_signals][N] int32
    pub input_samples_bytes: usize,
    /// Input spectral buffer: [num_signals][N] complex
    pub input_spectrum_bytes: usize,
    /// Correlation plan input/output buffers: [num_signals][num_shifts][N] complex
    pub correlation_bytes: usize,

    /// Convert-callback userdata (header only)
    pub convert_userdata_bytes: usize,

    /// Fused complex-multiply userdata: header + reference copy + input copy
    pub multiply_userdata_bytes: usize,
    /// Offset of the reference spectrum copy inside the multiply userdata
    pub multiply_reference_offset: usize,
    /// Offset of the input spectrum copy inside the multiply userdata
    pub multiply_input_offset: usize,

    /// Peak userdata: header + [num_signals][num_shifts][n_kg] f32 payload
    pub peak_userdata_bytes: usize,
    /// Offset of the peaks payload inside the peak userdata
    pub peak_payload_offset: usize,
    /// Bytes of the peaks payload
    pub peak_payload_bytes: usize,
    /// Number of f32 slots in the peaks payload
    pub peak_slots: usize,
}

fn mul(a: usize, b: usize, what: &str) -> Result<usize, Error> {
    a.checked_mul(b)
        .ok_or_else(|| Error::Config(format!("{what} size overflows usize ({a} * {b})")))
}

fn add(a: usize, b: usize, what: &str) -> Result<usize, Error> {
    a.checked_add(b)
        .ok_or_else(|| Error::Config(format!("{what} size overflows usize ({a} + {b})")))
}

impl BufferLayout {
    pub fn new(
        fft_size: usize,
        num_shifts: usize,
        num_signals: usize,
        n_kg: usize,
    ) -> Result<Self, Error> {
        if fft_size == 0 || num_shifts == 0 || num_signals == 0 || n_kg == 0 {
            return Err(Error::Config(format!(
                "layout parameters must be positive \
                 (fft_size={fft_size}, num_shifts={num_shifts}, \
                 num_signals={num_signals}, n_kg={n_kg})"
            )));
        }

        let reference_samples_bytes = mul(fft_size, SAMPLE_BYTES, "reference samples")?;
        let spectrum_row = mul(fft_size, COMPLEX_BYTES, "spectrum row")?;
        let reference_spectrum_bytes = mul(num_shifts, spectrum_row, "reference spectrum")?;
        let input_samples_bytes = mul(num_signals, reference_samples_bytes, "input samples")?;
        let input_spectrum_bytes = mul(num_signals, spectrum_row, "input spectrum")?;
        let correlation_bytes = mul(num_signals, reference_spectrum_bytes, "correlation")?;

        let multiply_reference_offset = MULTIPLY_HEADER_BYTES;
        let multiply_input_offset = add(
            multiply_reference_offset,
            reference_spectrum_bytes,
            "multiply userdata",
        )?;
        let multiply_userdata_bytes =
            add(multiply_input_offset, input_spectrum_bytes, "multiply userdata")?;

        let peak_slots = mul(
            mul(num_signals, num_shifts, "peak slots")?,
            n_kg,
            "peak slots",
        )?;
        let peak_payload_bytes = mul(peak_slots, REAL_BYTES, "peak payload")?;
        let peak_payload_offset = PEAK_HEADER_BYTES;
        let peak_userdata_bytes = add(peak_payload_offset, peak_payload_bytes, "peak userdata")?;

        Ok(Self {
            fft_size,
            num_shifts,
            num_signals,
            n_kg,
            reference_samples_bytes,
            reference_spectrum_bytes,
            input_samples_bytes,
            input_spectrum_bytes,
            correlation_bytes,
            convert_userdata_bytes: CONVERT_HEADER_BYTES,
            multiply_userdata_bytes,
            multiply_reference_offset,
            multiply_input_offset,
            peak_userdata_bytes,
            peak_payload_offset,
            peak_payload_bytes,
            peak_slots,
        })
    }

    /// Correlation batch count of the inverse plan
    pub fn correlation_batch(&self) -> usize {
        self.num_signals * self.num_shifts
    }

    /// Upper bound of the peak search window within each correlation window
    pub fn search_range(&self) -> usize {
        self.fft_size / 2
    }

    /// Source sample index read by the reference pre-callback for output
    /// element (shift, pos): the cyclic-shift remap
    pub fn shifted_sample_index(&self, shift: usize, pos: usize) -> usize {
        (pos + shift) % self.fft_size
    }

    /// Decompose a correlation batch index into (signal, shift)
    ///
    /// Batch ordering is signal-major, matching the host-visible peaks
    /// layout; the multiply and peak callbacks use the same decomposition.
    pub fn decompose_batch(&self, batch: usize) -> (usize, usize) {
        (batch / self.num_shifts, batch % self.num_shifts)
    }

    /// Flat f32 index of peaks[signal][shift][point]
    pub fn peak_index(&self, signal: usize, shift: usize, point: usize) -> usize {
        (signal * self.num_shifts + shift) * self.n_kg + point
    }
}
