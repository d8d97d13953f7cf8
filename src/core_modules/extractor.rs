// THEORY:
// The `ConnectedComponentExtractor` reduces a boolean difference mask to the
// final list of bounding rectangles, one per connected set of differing
// pixels.
//
// Key architectural principles:
// 1.  **8-connectivity**: diagonal neighbors count as connected, so a single
//     visually contiguous change that touches only diagonally still becomes
//     one rectangle instead of splintering.
// 2.  **Deterministic labeling**: labels are assigned by a raster-order
//     flood fill, so label ids (and with them the output order) depend only
//     on the mask, never on thread scheduling.
// 3.  **Concurrency as an optimization**: the bounding-box reduction
//     partitions the label ids into balanced chunks processed on the shared
//     worker pool. The chunking decides which worker handles a label, not
//     what the label's rectangle is; output is identical for any chunk
//     count.
// 4.  **Discovery order out**: rectangles are returned in ascending label
//     id, the order the components were first touched by the raster scan,
//     not spatially sorted.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core_modules::control::{CancelToken, ProgressFn};
use crate::core_modules::diff_mask::DiffMask;
use crate::core_modules::diff_result::Rectangle;
use crate::core_modules::scheduler::TileScheduler;
use crate::error::DiffError;

const DEFAULT_CHUNK_COUNT: usize = 8;

/// Per-pixel component labels: 0 is background, components are numbered
/// 1..=label_count in discovery order.
pub struct LabelGrid {
    width: u32,
    height: u32,
    labels: Vec<u32>,
    label_count: u32,
}

impl LabelGrid {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn label_count(&self) -> u32 {
        self.label_count
    }

    #[inline]
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }
}

pub struct ConnectedComponentExtractor {
    chunk_count: usize,
}

impl ConnectedComponentExtractor {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            chunk_count: chunk_count.max(1),
        }
    }

    pub fn with_default_chunks() -> Self {
        Self::new(DEFAULT_CHUNK_COUNT)
    }

    /// Labels the connected components of the mask with a raster-order
    /// breadth-first flood fill over the 8-neighborhood.
    pub fn label(mask: &DiffMask) -> LabelGrid {
        let width = mask.width();
        let height = mask.height();
        let mut labels = vec![0u32; width as usize * height as usize];
        let mut label_count = 0u32;
        let mut queue: VecDeque<(u32, u32)> = VecDeque::new();

        for y in 0..height {
            for x in 0..width {
                let index = y as usize * width as usize + x as usize;
                if !mask.get(x, y) || labels[index] != 0 {
                    continue;
                }
                label_count += 1;
                labels[index] = label_count;
                queue.push_back((x, y));
                while let Some((cx, cy)) = queue.pop_front() {
                    for dy in -1..=1i64 {
                        for dx in -1..=1i64 {
                            if dx == 0 && dy == 0 {
                                continue;
                            }
                            let nx = cx as i64 + dx;
                            let ny = cy as i64 + dy;
                            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                                continue;
                            }
                            let (nx, ny) = (nx as u32, ny as u32);
                            let neighbor = ny as usize * width as usize + nx as usize;
                            if mask.get(nx, ny) && labels[neighbor] == 0 {
                                labels[neighbor] = label_count;
                                queue.push_back((nx, ny));
                            }
                        }
                    }
                }
            }
        }

        LabelGrid {
            width,
            height,
            labels,
            label_count,
        }
    }

    /// Labels the mask and reduces every component to its tight bounding
    /// rectangle, in discovery order. An all-false mask produces an empty
    /// list.
    pub async fn extract(
        &self,
        scheduler: &TileScheduler,
        mask: &DiffMask,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<Rectangle>, DiffError> {
        let grid = Arc::new(Self::label(mask));
        let count = grid.label_count;
        if count == 0 {
            return Ok(Vec::new());
        }

        let chunks = label_chunks(count, self.chunk_count);
        let worker_grid = Arc::clone(&grid);
        let batches = scheduler
            .run_batch(
                chunks,
                move |range: (u32, u32)| Ok(chunk_bounds(&worker_grid, range)),
                "extracting regions",
                cancel,
                progress,
            )
            .await?;

        // Labels are dense 1..=count, so every slot gets filled exactly once
        // no matter which chunk (or worker) produced it.
        let mut boxes: Vec<Option<Rectangle>> = vec![None; count as usize];
        for (_, partial) in batches {
            for (label, rect) in partial {
                boxes[(label - 1) as usize] = Some(rect);
            }
        }
        Ok(boxes.into_iter().flatten().collect())
    }
}

/// Splits label ids 1..=count into at most `chunk_count` balanced
/// half-open ranges.
fn label_chunks(count: u32, chunk_count: usize) -> Vec<(u32, u32)> {
    let chunk_count = chunk_count.clamp(1, count as usize) as u32;
    let base = count / chunk_count;
    let extra = count % chunk_count;
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    let mut start = 1u32;
    for i in 0..chunk_count {
        let len = base + u32::from(i < extra);
        chunks.push((start, start + len));
        start += len;
    }
    chunks
}

/// Scans the grid for the labels in `range` and accumulates their tight
/// bounding boxes.
fn chunk_bounds(grid: &LabelGrid, (lo, hi): (u32, u32)) -> Vec<(u32, Rectangle)> {
    struct Bounds {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
    }
    let mut acc: Vec<Option<Bounds>> = (0..hi - lo).map(|_| None).collect();
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let label = grid.label_at(x, y);
            if label < lo || label >= hi {
                continue;
            }
            match &mut acc[(label - lo) as usize] {
                Some(bounds) => {
                    bounds.min_x = bounds.min_x.min(x);
                    bounds.min_y = bounds.min_y.min(y);
                    bounds.max_x = bounds.max_x.max(x);
                    bounds.max_y = bounds.max_y.max(y);
                }
                slot @ None => {
                    *slot = Some(Bounds {
                        min_x: x,
                        min_y: y,
                        max_x: x,
                        max_y: y,
                    });
                }
            }
        }
    }
    acc.into_iter()
        .enumerate()
        .filter_map(|(offset, bounds)| {
            bounds.map(|b| {
                (
                    lo + offset as u32,
                    Rectangle::new(b.min_x, b.min_y, b.max_x - b.min_x + 1, b.max_y - b.min_y + 1),
                )
            })
        })
        .collect()
}
