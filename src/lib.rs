//! clxcorr: batched frequency-domain cross-correlation on OpenCL
//!
//! Correlates a bank of cyclically-shifted copies of one reference signal
//! against a batch of input signals, reporting per-(signal, shift) peak
//! magnitudes. Everything outside the Fourier transforms themselves
//! (int32-to-complex conversion, Hamming windowing, cyclic-shift generation,
//! spectral conjugate-multiply, and peak extraction) is fused into the
//! baked clFFT plans as pre/post callbacks, so a full run is three transform
//! enqueues plus two device-to-device copies with no intermediate host
//! round-trips.
//!
//! # Architecture
//!
//! - **device**: OpenCL context/queue ownership and buffer allocation
//! - **layout**: byte sizes and offsets shared by host and callback code
//! - **kernels**: OpenCL C callback fragments and their header serializers
//! - **plan**: clFFT bindings and the baked transform plan factory
//! - **pipeline**: the three-step orchestrator and peak access
//! - **profile**: per-operation event timing
//!
//! # Example
//!
//! ```no_run
//! use clxcorr::{CorrelationPipeline, CorrelatorConfig, GpuContext};
//!
//! # fn main() -> Result<(), clxcorr::Error> {
//! let config = CorrelatorConfig::default();
//! let reference: Vec<i32> = vec![0; config.fft_size];
//! let inputs: Vec<i32> = vec![0; config.num_signals * config.fft_size];
//!
//! let mut pipeline = CorrelationPipeline::new(GpuContext::new()?, config)?;
//! pipeline.step1(&reference)?;
//! pipeline.step2(&inputs)?;
//! pipeline.step3()?;
//!
//! let peaks = pipeline.peaks()?;
//! for signal in 0..config.num_signals {
//!     println!("signal {signal}: best shift {:?}", peaks.best_shift(signal));
//! }
//! # Ok(())
//! # }
//! ```

mod clfft;
pub mod config;
pub mod device;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod pipeline;
pub mod plan;
pub mod profile;

pub use config::CorrelatorConfig;
pub use device::{Backend, GpuContext};
pub use error::Error;
pub use layout::BufferLayout;
pub use pipeline::{CorrelationPipeline, PeakMatrix, PipelineState};
pub use profile::{EventTiming, PipelineTimings};
