use galaxy_core::BufferRole;

/// The freshly completed read buffer, lent to the renderer for one call
#[derive(Debug)]
pub struct Frame<'a, B> {
    pub buffer: &'a B,
    pub role: BufferRole,
    pub body_count: usize,
    pub step: u64,
    pub elapsed_years: f64,
}

/// Receives the current positions once per completed step.
/// Must not hold on to the buffer; the next step swaps it out.
pub trait Renderer<B> {
    fn present(&mut self, frame: Frame<'_, B>);
}

impl<B, F> Renderer<B> for F
where
    F: FnMut(Frame<'_, B>),
{
    fn present(&mut self, frame: Frame<'_, B>) {
        self(frame)
    }
}

/// Headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl<B> Renderer<B> for NullRenderer {
    fn present(&mut self, _frame: Frame<'_, B>) {}
}
