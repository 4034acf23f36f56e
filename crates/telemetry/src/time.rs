//! A small RAII timer for recording a duration into a histogram-shaped
//! callback when it drops, so callers don't have to remember to record on
//! every early-return path.

use std::time::Instant;

pub struct Timer<F: FnMut(f64)> {
    start: Instant,
    on_drop: Option<F>,
}

impl<F: FnMut(f64)> Timer<F> {
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F: FnMut(f64)> Drop for Timer<F> {
    fn drop(&mut self) {
        if let Some(mut f) = self.on_drop.take() {
            f(self.start.elapsed().as_secs_f64());
        }
    }
}
