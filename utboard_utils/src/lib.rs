//! # UT Board Utilities
//!
//! File formats for the images a UT board is loaded with at startup: the FPGA configuration
//! bitstream and the DSP program in its hex transfer format.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod program_sources;
