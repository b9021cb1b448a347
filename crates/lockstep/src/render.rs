//! # Renderer Interface
//!
//! The renderer runs on the scheduler thread once per loop iteration, after
//! ticking. It gets a read-only store whose buffers were just swapped, so
//! every `DoubleBuffered::get` it performs sees one consistent tick.

use lockstep_core::ComponentStore;

/// Presentation collaborator driven by [`Core::render`](crate::Core::render).
pub trait Renderer: Send {
    /// Draws the current state.
    ///
    /// # Arguments
    ///
    /// * `store` - Published component state
    /// * `tick_size_ms` - Simulated duration of one tick
    /// * `fraction` - Progress toward the next tick in `[0, 1]`, for interpolation
    fn render_components(&mut self, store: &ComponentStore, tick_size_ms: u64, fraction: f64);

    /// Presents the frame built by `render_components`.
    fn finalize_render(&mut self) {}

    /// Releases renderer resources. Called once when the core shuts down.
    fn shutdown(&mut self) {}
}

/// Renderer that draws nothing. Used for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    #[inline]
    fn render_components(&mut self, _store: &ComponentStore, _tick_size_ms: u64, _fraction: f64) {}
}
