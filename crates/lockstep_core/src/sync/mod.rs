//! # Synchronization Primitives for Parallel Update Routines
//!
//! ## The Problem
//!
//! ```text
//! Routine A:  WRITE position of entity 7
//! Routine B:  READ  position of entity 7      (same tick)
//! Renderer:   READ  position of entity 7      (between ticks)
//!
//! Without buffering: B and the renderer may observe a half-applied tick.
//! ```
//!
//! ## The Solution: Double Buffering per Field
//!
//! ```text
//! Tick N:
//!   Writers stage into the write slot
//!   Readers see the read slot (tick N-1's published state)
//!
//! Barrier, then publish:
//!   generation += 1 on every dirty field -> write slot becomes read slot
//! ```

mod double_buffer;

pub use double_buffer::DoubleBuffered;
