use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receives one tick per completed runner invocation.
pub trait Progress {
    fn start(&mut self, total: u64);
    fn tick(&mut self);
    fn finish(&mut self);
}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn start(&mut self, total: u64) {
        (**self).start(total)
    }

    fn tick(&mut self) {
        (**self).tick()
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

/// Terminal progress bar on stderr.
pub struct BarProgress {
    bar: ProgressBar,
    visible: bool,
}

impl BarProgress {
    pub fn new(visible: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            visible,
        }
    }
}

impl Progress for BarProgress {
    fn start(&mut self, total: u64) {
        self.bar = if self.visible {
            ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };
        self.bar.set_length(total);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("  Sweep: [{bar:40}] {pos}/{len} runs ({elapsed_precise}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
    }

    fn tick(&mut self) {
        self.bar.inc(1);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

/// Counts ticks without drawing anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountingProgress {
    pub total: Option<u64>,
    pub ticks: u64,
    pub finished: bool,
}

impl Progress for CountingProgress {
    fn start(&mut self, total: u64) {
        self.total = Some(total);
        self.ticks = 0;
        self.finished = false;
    }

    fn tick(&mut self) {
        self.ticks += 1;
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_bar_tracks_position() {
        let mut progress = BarProgress::new(false);
        progress.start(4);
        progress.tick();
        progress.tick();
        assert_eq!(progress.bar.position(), 2);
        assert_eq!(progress.bar.length(), Some(4));
        progress.finish();
        assert!(progress.bar.is_finished());
    }

    #[test]
    fn counting_progress_resets_on_start() {
        let mut progress = CountingProgress::default();
        progress.start(2);
        progress.tick();
        progress.start(3);
        assert_eq!(progress.ticks, 0);
        assert_eq!(progress.total, Some(3));
    }
}
