//! Multi-line status block for in-flight transfers

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;

use super::transfer::TransferProgress;

const BAR_TEMPLATE: &str =
    "{msg:30!} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%)";

/// One bar per in-flight transfer, refreshed on each coordinator tick
pub struct ProgressBoard {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<usize, (ProgressBar, Arc<TransferProgress>)>,
}

impl ProgressBoard {
    pub fn new(visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        Self {
            multi: MultiProgress::with_draw_target(target),
            style,
            bars: HashMap::new(),
        }
    }

    /// Start showing a bar for task `index`
    pub fn track(&mut self, index: usize, label: String, progress: Arc<TransferProgress>) {
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(self.style.clone());
        bar.set_message(label);
        self.bars.insert(index, (bar, progress));
    }

    /// Copy the shared counters into every live bar
    pub fn redraw(&self) {
        for (bar, progress) in self.bars.values() {
            let total = progress.total();
            if total > 0 {
                bar.set_length(total);
            }
            bar.set_position(progress.transferred());
        }
    }

    /// Remove the bar for task `index` from the block
    pub fn finish(&mut self, index: usize) {
        if let Some((bar, progress)) = self.bars.remove(&index) {
            bar.set_position(progress.transferred());
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.bars.len()
    }

    pub fn clear(&mut self) {
        for (_, (bar, _)) in self.bars.drain() {
            bar.finish_and_clear();
        }
        let _ = self.multi.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_board_tracks_and_finishes() {
        let mut board = ProgressBoard::new(false);
        board.track(0, "a.csv".to_string(), Arc::new(TransferProgress::default()));
        board.track(1, "b.csv".to_string(), Arc::new(TransferProgress::default()));
        board.redraw();
        assert_eq!(board.in_flight(), 2);

        board.finish(0);
        assert_eq!(board.in_flight(), 1);

        board.clear();
        assert_eq!(board.in_flight(), 0);
    }
}
