//! qpu-remap - Lens-Dewarp Kernel Builder for the VideoCore IV QPUs
//!
//! Generates the program every QPU thread runs to remap a YUYV 4:2:2 camera
//! frame through a precomputed displacement map into a planar I420 frame.
//! Each thread owns one row of every tile, gathers its source pixels through
//! the texture unit and writes them into shared scratch memory, from which a
//! single coordinator thread drives the store engine.
//!
//! # Pipeline
//!
//! ```text
//! map entry --TMU0--> fixed-point coords --TMU1--> YUV sample
//!     --> unpack + chroma gather --> scratch slot w --(store engine)--> frame
//! ```
//!
//! Scratch memory is double-buffered: while the threads fill slot `w`, the
//! coordinator stores slot `1 - w`, filled one half-tile earlier. A
//! semaphore rendezvous at the end of every half-tile keeps the two apart.
//!
//! # Geometry
//!
//! | Unit | Columns | Rows |
//! |------|---------|------|
//! | sub-step | 16 | N |
//! | half-tile | 64 | N |
//! | tile | 128 | N |
//!
//! `N` is the thread count (even, at most 12). Frame width must be a
//! multiple of 128 and height a multiple of `N`.
//!
//! # Example: Building the Kernel
//!
//! ```
//! use qpu_remap::{build_kernel, KernelConfig};
//!
//! let program = build_kernel(&KernelConfig::default()).unwrap();
//! let blob = program.to_bytes();
//! assert_eq!(blob.len(), program.len() * 8);
//! ```
//!
//! # Example: Emulating a Frame
//!
//! ```
//! use qpu_remap::emu::{EmulatorOptions, ProtocolReport, Scene, YuyvFrame};
//! use qpu_remap::launch::Filter;
//! use qpu_remap::map::{DisplacementMap, MapHeader};
//! use qpu_remap::{build_kernel, KernelConfig};
//!
//! let map = DisplacementMap::identity(MapHeader::same_size(128, 2), 2).unwrap();
//! let source = YuyvFrame::from_fn(128, 2, |x, _| [x as u8, 128, 128]);
//! let scene = Scene::new(&map, &source, Filter::Nearest).unwrap();
//! let program = build_kernel(&KernelConfig::with_threads(2)).unwrap();
//! let (run, frame) = scene.run(program.words(), EmulatorOptions::default()).unwrap();
//! assert!(ProtocolReport::analyze(&run, scene.launch()).all_passed());
//! assert_eq!(frame.luma(5, 0), Some(5));
//! ```

// Instruction IR, builder and encoder
pub mod asm;

// Kernel generator
pub mod kernel;

// Uniform-stream ABI and texture configuration
pub mod launch;

// Displacement-map format
pub mod map;

// Reference emulator
pub mod emu;

// Typed errors
pub mod error;

pub use asm::{Program, ProgramStats};
pub use emu::{Emulator, EmulatorOptions, ProtocolReport, Run, Scene};
pub use error::{AsmError, EmulatorError, KernelError, MapError, PlanError};
pub use kernel::{build_kernel, KernelConfig, DEFAULT_THREADS, MAX_THREADS};
pub use launch::{Filter, LaunchConfig, TextureConfig};
pub use map::{DisplacementMap, MapHeader};
