//! Outward spiral traversal of a grid
//!
//! Starting from a given cell, cells are visited ring by ring:
//!
//! ```text
//!  _____ _____ _____
//! |     |     |     |
//! |  7  |  6  |  5  |
//! |_____|_____|_____|
//! |     |     |     |
//! |  8  |  1  |  4  |
//! |_____|_____|_____|
//! |     |     |     |
//! |  9  |  2  |  3  |
//! |_____|_____|_____|
//! ```
//!
//! Cells falling outside the grid still consume a step of the spiral but are
//! not yielded, so an off-center start covers the whole grid.

use std::ops::ControlFlow;

/// Spiral walk over a `rows × cols` grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpiralSelector {
    rows: usize,
    cols: usize,
    start_row: usize,
    start_col: usize,
}

impl SpiralSelector {
    /// The start cell is clamped into the grid.
    #[must_use]
    pub fn new(rows: usize, cols: usize, start_row: usize, start_col: usize) -> Self {
        Self {
            rows,
            cols,
            start_row: start_row.min(rows.saturating_sub(1)),
            start_col: start_col.min(cols.saturating_sub(1)),
        }
    }

    #[must_use]
    pub fn total_cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Iterate over `(row, col)` cells in spiral order
    #[must_use]
    pub fn iter(&self) -> Spiral {
        Spiral {
            rows: self.rows as isize,
            cols: self.cols as isize,
            row: self.start_row as isize,
            col: self.start_col as isize,
            progress: 1,
            variation: 1,
            steps: 0,
            along_rows: true,
            emitted: 0,
            total: self.total_cells(),
        }
    }

    /// Call `visit` for each cell until the grid is exhausted or the visitor
    /// breaks. Returns the number of cells visited.
    pub fn walk<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(usize, usize) -> ControlFlow<()>,
    {
        let mut visited = 0;
        for (row, col) in self.iter() {
            visited += 1;
            if visit(row, col).is_break() {
                break;
            }
        }
        visited
    }
}

impl IntoIterator for &SpiralSelector {
    type Item = (usize, usize);
    type IntoIter = Spiral;

    fn into_iter(self) -> Spiral {
        self.iter()
    }
}

/// Iterator produced by [`SpiralSelector::iter`]
#[derive(Clone, Debug)]
pub struct Spiral {
    rows: isize,
    cols: isize,
    row: isize,
    col: isize,
    progress: isize,
    variation: isize,
    steps: isize,
    along_rows: bool,
    emitted: usize,
    total: usize,
}

impl Spiral {
    fn in_bounds(&self) -> bool {
        (0..self.rows).contains(&self.row) && (0..self.cols).contains(&self.col)
    }
}

impl Iterator for Spiral {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted >= self.total {
            return None;
        }

        if self.emitted == 0 {
            self.emitted = 1;
            return Some((self.row as usize, self.col as usize));
        }

        loop {
            if self.steps == self.progress {
                self.steps = 0;
                if self.along_rows {
                    self.along_rows = false;
                } else {
                    self.along_rows = true;
                    self.progress += 1;
                    self.variation = -self.variation;
                }
            }

            if self.along_rows {
                self.row += self.variation;
            } else {
                self.col += self.variation;
            }
            self.steps += 1;

            if self.in_bounds() {
                self.emitted += 1;
                return Some((self.row as usize, self.col as usize));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.emitted;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Spiral {}
