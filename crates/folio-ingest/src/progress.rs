use std::collections::BTreeSet;

/// Contiguous-prefix watermark over item positions.
///
/// Items finish out of order; the watermark only moves past a position once
/// it and every earlier position are terminal.
#[derive(Clone, Debug)]
pub struct CommitTracker {
    watermark: usize,
    done:      BTreeSet<usize>,
}

impl CommitTracker {
    pub fn new(start: usize) -> Self {
        Self {
            watermark: start,
            done:      BTreeSet::new(),
        }
    }

    /// Marks `position` terminal and returns the new watermark.
    pub fn complete(&mut self, position: usize) -> usize {
        if position >= self.watermark {
            self.done.insert(position);
            while self.done.remove(&self.watermark) {
                self.watermark += 1;
            }
        }
        self.watermark
    }

    /// First position not yet known to be committed.
    pub fn watermark(&self) -> usize { self.watermark }

    /// Terminal positions held back by an earlier unfinished one.
    pub fn pending(&self) -> usize { self.done.len() }
}
