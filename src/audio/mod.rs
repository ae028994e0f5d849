//! # Audio Input Module
//!
//! Everything needed to turn a WAV file on disk into a paced sequence of frames.
//!
//! ## Key Components:
//! - **WAV header reader**: Extracts sample rate, channel count and bit depth
//! - **Chunk plan**: Splits the file into ~0.25s byte ranges
//! - **Audio file**: The immutable, fully read input of one upload session
//!
//! ## Pacing Model:
//! The remote service models a live microphone. Byte rate is derived from the
//! header (`sample_rate * channels * bits_per_sample / 8`) and the whole file,
//! header included, is cut into slices of a quarter second each.

pub mod chunk; // Quarter-second chunk planning
pub mod file; // Input file loading
pub mod wav; // RIFF/WAVE header parsing
