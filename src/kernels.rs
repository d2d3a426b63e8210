//! Device-side callback program fragments
//!
//! clFFT compiles these OpenCL C fragments into the transform kernels at
//! plan-bake time; each function runs once per output element. The struct
//! definitions at the top of each fragment must describe exactly the bytes
//! the host writes through the serializers below; the header sizes are
//! pinned against [`crate::layout`] in the tests.
//!
//! Conjugation convention: the reference plan's post-callback stores the
//! conjugated spectrum, so the multiply fragment computes the plain complex
//! product. Applying the conjugate in both places would time-reverse the
//! correlation.

use crate::layout::{CONVERT_HEADER_BYTES, MULTIPLY_HEADER_BYTES, PEAK_HEADER_BYTES};

/// Entry point of [`CONVERT_SHIFT_PRE`]
pub const CONVERT_SHIFT_NAME: &str = "convert_shift_window";
/// Entry point of [`CONVERT_PRE`]
pub const CONVERT_NAME: &str = "convert_scale";
/// Entry point of [`CONJUGATE_POST`]
pub const CONJUGATE_NAME: &str = "conjugate_store";
/// Entry point of [`MULTIPLY_PRE`]
pub const MULTIPLY_NAME: &str = "spectral_multiply";
/// Entry point of [`PEAK_POST`]
pub const PEAK_NAME: &str = "extract_peaks";

/// Reference forward plan pre-callback: int32 -> complex conversion, optional
/// Hamming window, and cyclic-shift generation by index remapping.
///
/// The plan batch spans `num_shifts * N` elements but the input buffer holds
/// only the N raw reference samples; the `(pos + shift) % N` remap both
/// synthesizes the shift bank and keeps every read inside the buffer.
pub const CONVERT_SHIFT_PRE: &str = r#"
typedef struct {
    float scale_factor;
    uint fft_size;
    uint num_shifts;
    uint window;
} ConvertParams;

float2 convert_shift_window(__global void* input, uint inoffset, __global void* userdata) {
    __global const int* in = (__global const int*)input;
    __global ConvertParams* params = (__global ConvertParams*)userdata;

    uint n = params->fft_size;
    uint shift = inoffset / n;
    uint pos = inoffset % n;
    uint src = (pos + shift) % n;

    float real = (float)in[src] * params->scale_factor;
    if (params->window != 0) {
        real *= 0.54f - 0.46f * cos(2.0f * M_PI_F * (float)pos / (float)(n - 1));
    }
    return (float2)(real, 0.0f);
}
"#;

/// Input forward plan pre-callback: int32 -> complex conversion only; the
/// batch index selects the signal directly.
pub const CONVERT_PRE: &str = r#"
typedef struct {
    float scale_factor;
    uint fft_size;
    uint num_shifts;
    uint window;
} ConvertParams;

float2 convert_scale(__global void* input, uint inoffset, __global void* userdata) {
    __global const int* in = (__global const int*)input;
    __global ConvertParams* params = (__global ConvertParams*)userdata;
    return (float2)((float)in[inoffset] * params->scale_factor, 0.0f);
}
"#;

/// Reference forward plan post-callback: store the conjugated spectrum
pub const CONJUGATE_POST: &str = r#"
void conjugate_store(__global void* output, uint outoffset, __global void* userdata, float2 fftoutput) {
    __global float2* out = (__global float2*)output;
    out[outoffset] = (float2)(fftoutput.x, -fftoutput.y);
}
"#;

/// Correlation inverse plan pre-callback: per-frequency complex product of
/// the (already conjugated) reference spectrum and the input spectrum, both
/// read from the fused userdata buffer at the planned offsets.
pub const MULTIPLY_PRE: &str = r#"
typedef struct {
    uint num_signals;
    uint num_shifts;
    uint fft_size;
    uint pad;
} MultiplyParams;

float2 spectral_multiply(__global void* input, uint inoffset, __global void* userdata) {
    __global MultiplyParams* params = (__global MultiplyParams*)userdata;
    __global float2* reference = (__global float2*)
        ((__global char*)userdata + sizeof(MultiplyParams));
    __global float2* signals = (__global float2*)
        ((__global char*)userdata + sizeof(MultiplyParams)
         + sizeof(float2) * params->num_shifts * params->fft_size);

    uint freq = inoffset % params->fft_size;
    uint batch = inoffset / params->fft_size;
    uint shift = batch % params->num_shifts;
    uint signal = batch / params->num_shifts;

    float2 r = reference[shift * params->fft_size + freq];
    float2 x = signals[signal * params->fft_size + freq];

    /* (a+bi)(c+di) = (ac - bd) + (ad + bc)i */
    return (float2)(r.x * x.x - r.y * x.y, r.x * x.y + r.y * x.x);
}
"#;

/// Correlation inverse plan post-callback: store the inverse-transform sample
/// and report the first n_kg magnitudes of each correlation window.
///
/// Each work item owns one (signal, shift, pos) payload slot, so the write is
/// race-free. Positions at or beyond the search range are ignored.
pub const PEAK_POST: &str = r#"
typedef struct {
    uint num_signals;
    uint num_shifts;
    uint fft_size;
    uint n_kg;
    uint search_range;
    uint pad;
} PeakParams;

void extract_peaks(__global void* output, uint outoffset, __global void* userdata, float2 fftoutput) {
    __global PeakParams* params = (__global PeakParams*)userdata;
    __global float* peaks = (__global float*)
        ((__global char*)userdata + sizeof(PeakParams));

    __global float2* out = (__global float2*)output;
    out[outoffset] = fftoutput;

    uint window = outoffset / params->fft_size;
    uint pos = outoffset % params->fft_size;
    if (window >= params->num_signals * params->num_shifts) return;
    if (pos >= params->search_range || pos >= params->n_kg) return;

    uint signal = window / params->num_shifts;
    uint shift = window % params->num_shifts;
    uint slot = (signal * params->num_shifts + shift) * params->n_kg;
    peaks[slot + pos] = length(fftoutput);
}
"#;

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

/// Serialize the convert-callback header
pub fn convert_params(scale_factor: f32, fft_size: u32, num_shifts: u32, window: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(CONVERT_HEADER_BYTES);
    push_u32(&mut bytes, scale_factor.to_bits());
    push_u32(&mut bytes, fft_size);
    push_u32(&mut bytes, num_shifts);
    push_u32(&mut bytes, window as u32);
    bytes
}

/// Serialize the complex-multiply header
pub fn multiply_params(num_signals: u32, num_shifts: u32, fft_size: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MULTIPLY_HEADER_BYTES);
    push_u32(&mut bytes, num_signals);
    push_u32(&mut bytes, num_shifts);
    push_u32(&mut bytes, fft_size);
    push_u32(&mut bytes, 0);
    bytes
}

/// Serialize the peak-extraction header
pub fn peak_params(
    num_signals: u32,
    num_shifts: u32,
    fft_size: u32,
    n_kg: u32,
    search_range: u32,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(PEAK_HEADER_BYTES);
    push_u32(&mut bytes, num_signals);
    push_u32(&mut bytes, num_shifts);
    push_u32(&mut bytes, fft_size);
    push_u32(&mut bytes, n_kg);
    push_u32(&mut bytes, search_range);
    push_u32(&mut bytes, 0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lengths_match_layout() {
        assert_eq!(convert_params(1.0, 1024, 8, true).len(), CONVERT_HEADER_BYTES);
        assert_eq!(multiply_params(4, 8, 1024).len(), MULTIPLY_HEADER_BYTES);
        assert_eq!(peak_params(4, 8, 1024, 5, 512).len(), PEAK_HEADER_BYTES);
    }

    #[test]
    fn convert_header_field_order() {
        let bytes = convert_params(0.5, 1024, 8, true);
        assert_eq!(&bytes[0..4], &0.5f32.to_bits().to_le_bytes());
        assert_eq!(&bytes[4..8], &1024u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &8u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
    }

    #[test]
    fn peak_header_field_order() {
        let bytes = peak_params(4, 8, 32768, 5, 16384);
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &8u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &32768u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &5u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &16384u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0u32.to_le_bytes());
    }

    #[test]
    fn fragments_define_their_entry_points() {
        for (source, name) in [
            (CONVERT_SHIFT_PRE, CONVERT_SHIFT_NAME),
            (CONVERT_PRE, CONVERT_NAME),
            (CONJUGATE_POST, CONJUGATE_NAME),
            (MULTIPLY_PRE, MULTIPLY_NAME),
            (PEAK_POST, PEAK_NAME),
        ] {
            assert!(source.contains(name), "{name} missing from its fragment");
        }
    }

    #[test]
    fn multiply_fragment_uses_plain_product() {
        // The conjugate is applied upstream by the reference post-callback;
        // the multiply must not conjugate again.
        assert!(MULTIPLY_PRE.contains("r.x * x.x - r.y * x.y"));
        assert!(MULTIPLY_PRE.contains("r.x * x.y + r.y * x.x"));
        assert!(CONJUGATE_POST.contains("-fftoutput.y"));
    }
}
