//! Parallel execution layer.
//!
//! Three ways of running the per-cell loops of the updater and the energy
//! evaluator:
//!
//! - [`Backend::Serial`]: plain loops on the calling thread.
//! - [`Backend::Threads`]: fork-join over interior rows on a dedicated rayon
//!   pool. Each row is written by exactly one task.
//! - [`Backend::Device`]: a GPU-style launch over a 2D grid of tiles with one
//!   work-item per cell, executed on the same rayon pool. Kernels write
//!   through a [`DeviceView`], a raw non-owning pointer view of a buffer the
//!   host keeps alive for the whole launch.
//!
//! Every call returns only after all of its work has finished, which is the
//! barrier between the update and the reads that follow it.

use std::marker::PhantomData;
use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WaveError;

/// Which execution strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Serial,
    Threads {
        threads: usize,
    },
    Device {
        tile_rows: usize,
        tile_cols: usize,
    },
}

impl Backend {
    /// Serial for one thread, a row-parallel pool otherwise.
    pub fn from_threads(threads: usize) -> Backend {
        if threads <= 1 {
            Backend::Serial
        } else {
            Backend::Threads { threads }
        }
    }

    pub fn validate(&self) -> Result<(), WaveError> {
        match *self {
            Backend::Serial => Ok(()),
            Backend::Threads { threads } if threads == 0 => {
                Err(WaveError::Config("thread count must be >= 1".into()))
            }
            Backend::Threads { .. } => Ok(()),
            Backend::Device {
                tile_rows,
                tile_cols,
            } if tile_rows == 0 || tile_cols == 0 => Err(WaveError::Config(format!(
                "device tile must be non-empty, got {tile_rows}x{tile_cols}"
            ))),
            Backend::Device { .. } => Ok(()),
        }
    }
}

/// Owns the thread pool (if any) for a backend.
pub struct Executor {
    backend: Backend,
    pool: Option<rayon::ThreadPool>,
}

impl Executor {
    pub fn new(backend: Backend) -> Result<Executor, WaveError> {
        backend.validate()?;
        let pool = match backend {
            Backend::Serial => None,
            Backend::Threads { threads } => Some(build_pool(threads)?),
            // Zero lets rayon pick one worker per core, like a device picking
            // its own occupancy.
            Backend::Device { .. } => Some(build_pool(0)?),
        };
        Ok(Executor { backend, pool })
    }

    pub fn serial() -> Executor {
        Executor {
            backend: Backend::Serial,
            pool: None,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn is_device(&self) -> bool {
        matches!(self.backend, Backend::Device { .. })
    }

    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(|p| p.current_num_threads())
            .unwrap_or(1)
    }

    fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    // ---- Row-parallel (serial / threads) ----

    /// Call `f(i, a_row, b_row)` for every interior row `i` of two row-major
    /// buffers with `cols` columns.
    ///
    /// Rows are handed out as disjoint mutable slices, so no two tasks can
    /// write the same cell.
    pub fn for_each_interior_row<F>(&self, cols: usize, a: &mut [f64], b: &mut [f64], f: F)
    where
        F: Fn(usize, &mut [f64], &mut [f64]) + Sync + Send,
    {
        debug_assert_eq!(a.len(), b.len());
        let rows = a.len() / cols;
        let interior = cols..(rows - 1) * cols;
        let a_int = &mut a[interior.clone()];
        let b_int = &mut b[interior];

        match self.backend {
            Backend::Serial => {
                for (r, (a_row, b_row)) in a_int
                    .chunks_mut(cols)
                    .zip(b_int.chunks_mut(cols))
                    .enumerate()
                {
                    f(r + 1, a_row, b_row);
                }
            }
            _ => self.install(|| {
                a_int
                    .par_chunks_mut(cols)
                    .zip(b_int.par_chunks_mut(cols))
                    .enumerate()
                    .for_each(|(r, (a_row, b_row))| f(r + 1, a_row, b_row));
            }),
        }
    }

    /// Evaluate `f(i)` for every row in `rows` and combine the partial sums
    /// in row order on the calling thread.
    ///
    /// The partials are independent of how rows were scheduled, so the
    /// result is bit-identical for any thread count.
    pub fn sum_rows<F>(&self, rows: Range<usize>, f: F) -> f64
    where
        F: Fn(usize) -> f64 + Sync + Send,
    {
        let partials: Vec<f64> = match self.backend {
            Backend::Serial => rows.map(f).collect(),
            _ => self.install(|| rows.into_par_iter().map(f).collect()),
        };
        combine(&partials)
    }

    // ---- Device-style 2D launch ----

    /// Launch `kernel(i, j)` once per cell of the `rows x cols` box, grouped
    /// into tiles of the configured shape. Non-device backends use a single
    /// tile per row.
    pub fn launch_2d<K>(&self, rows: Range<usize>, cols: Range<usize>, kernel: K)
    where
        K: Fn(usize, usize) + Sync + Send,
    {
        let tiles = TileGrid::new(rows, cols, self.tile_shape());
        match self.backend {
            Backend::Serial => {
                for t in 0..tiles.count() {
                    tiles.run(t, &kernel);
                }
            }
            _ => self.install(|| {
                (0..tiles.count())
                    .into_par_iter()
                    .for_each(|t| tiles.run(t, &kernel))
            }),
        }
    }

    /// Per-tile partial sums of `kernel(i, j)`, combined in tile order.
    ///
    /// Tile partials reassociate the sum relative to [`Executor::sum_rows`],
    /// so results agree only to rounding.
    pub fn reduce_2d<K>(&self, rows: Range<usize>, cols: Range<usize>, kernel: K) -> f64
    where
        K: Fn(usize, usize) -> f64 + Sync + Send,
    {
        let tiles = TileGrid::new(rows, cols, self.tile_shape());
        let tile_sum = |t: usize| {
            let mut acc = 0.0;
            tiles.run(t, |i, j| acc += kernel(i, j));
            acc
        };
        let partials: Vec<f64> = match self.backend {
            Backend::Serial => (0..tiles.count()).map(tile_sum).collect(),
            _ => self.install(|| (0..tiles.count()).into_par_iter().map(tile_sum).collect()),
        };
        combine(&partials)
    }

    pub fn all_finite(&self, data: &[f64]) -> bool {
        match self.backend {
            Backend::Serial => data.iter().all(|x| x.is_finite()),
            _ => self.install(|| data.par_iter().all(|x| x.is_finite())),
        }
    }

    fn tile_shape(&self) -> (usize, usize) {
        match self.backend {
            Backend::Device {
                tile_rows,
                tile_cols,
            } => (tile_rows, tile_cols),
            _ => (1, usize::MAX),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("backend", &self.backend)
            .field("threads", &self.threads())
            .finish()
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool, WaveError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("wave-worker-{i}"))
        .build()
        .map_err(|e| WaveError::ThreadPool(e.to_string()))
}

fn combine(partials: &[f64]) -> f64 {
    let mut total = 0.0;
    for &p in partials {
        total += p;
    }
    total
}

/// Tiling of a rectangular index box.
struct TileGrid {
    rows: Range<usize>,
    cols: Range<usize>,
    tile_rows: usize,
    tile_cols: usize,
    tiles_across: usize,
    tiles_down: usize,
}

impl TileGrid {
    fn new(rows: Range<usize>, cols: Range<usize>, (tile_rows, tile_cols): (usize, usize)) -> Self {
        // A tile never needs to be larger than the box it covers.
        let tile_rows = tile_rows.min(rows.len().max(1));
        let tile_cols = tile_cols.min(cols.len().max(1));
        let tiles_down = rows.len().div_ceil(tile_rows);
        let tiles_across = cols.len().div_ceil(tile_cols);
        TileGrid {
            rows,
            cols,
            tile_rows,
            tile_cols,
            tiles_across,
            tiles_down,
        }
    }

    fn count(&self) -> usize {
        self.tiles_down * self.tiles_across
    }

    /// Run `kernel` over the cells of tile `t`, row-major within the tile.
    fn run<K: FnMut(usize, usize)>(&self, t: usize, mut kernel: K) {
        let (ty, tx) = (t / self.tiles_across, t % self.tiles_across);
        let i0 = self.rows.start + ty * self.tile_rows;
        let j0 = self.cols.start + tx * self.tile_cols;
        let i1 = (i0 + self.tile_rows).min(self.rows.end);
        let j1 = (j0 + self.tile_cols).min(self.cols.end);
        for i in i0..i1 {
            for j in j0..j1 {
                kernel(i, j);
            }
        }
    }
}

/// Raw, non-owning, writable view of a host buffer for device kernels.
///
/// The borrow it is created from keeps the buffer alive and unaliased for
/// `'a`; work-items may write disjoint cells concurrently.
#[derive(Clone, Copy)]
pub struct DeviceView<'a> {
    ptr: *mut f64,
    len: usize,
    _buf: PhantomData<&'a mut [f64]>,
}

// SAFETY: the view is only handed to kernels whose work-items write
// pairwise-distinct indices, and the host borrow outlives the launch.
unsafe impl Send for DeviceView<'_> {}
unsafe impl Sync for DeviceView<'_> {}

impl<'a> DeviceView<'a> {
    pub fn new(buf: &'a mut [f64]) -> Self {
        DeviceView {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
            _buf: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// `idx < len`, and no other work-item of the same launch may access
    /// `idx`.
    #[inline(always)]
    pub unsafe fn write(&self, idx: usize, value: f64) {
        debug_assert!(idx < self.len);
        unsafe { self.ptr.add(idx).write(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn from_threads_picks_serial_for_one() {
        assert_eq!(Backend::from_threads(0), Backend::Serial);
        assert_eq!(Backend::from_threads(1), Backend::Serial);
        assert_eq!(Backend::from_threads(4), Backend::Threads { threads: 4 });
    }

    #[test]
    fn rejects_degenerate_backends() {
        assert!(Executor::new(Backend::Threads { threads: 0 }).is_err());
        assert!(
            Executor::new(Backend::Device {
                tile_rows: 0,
                tile_cols: 8
            })
            .is_err()
        );
    }

    #[test]
    fn interior_rows_visited_once() {
        for backend in [Backend::Serial, Backend::Threads { threads: 3 }] {
            let exec = Executor::new(backend).unwrap();
            let (rows, cols) = (6, 4);
            let mut a = vec![0.0; rows * cols];
            let mut b = vec![0.0; rows * cols];
            exec.for_each_interior_row(cols, &mut a, &mut b, |i, a_row, b_row| {
                a_row.fill(i as f64);
                b_row[0] += 1.0;
            });
            for i in 0..rows {
                let expect = if i == 0 || i == rows - 1 { 0.0 } else { i as f64 };
                assert!(a[i * cols..(i + 1) * cols].iter().all(|&x| x == expect));
            }
            let visits: f64 = b.iter().sum();
            assert_eq!(visits, (rows - 2) as f64);
        }
    }

    #[test]
    fn launch_covers_box_exactly_once() {
        let exec = Executor::new(Backend::Device {
            tile_rows: 3,
            tile_cols: 2,
        })
        .unwrap();
        let (rows, cols) = (9, 7);
        let hits: Vec<AtomicUsize> = (0..rows * cols).map(|_| AtomicUsize::new(0)).collect();
        exec.launch_2d(1..rows - 1, 1..cols - 1, |i, j| {
            hits[i * cols + j].fetch_add(1, Ordering::Relaxed);
        });
        for i in 0..rows {
            for j in 0..cols {
                let interior = i > 0 && j > 0 && i < rows - 1 && j < cols - 1;
                assert_eq!(hits[i * cols + j].load(Ordering::Relaxed), interior as usize);
            }
        }
    }

    #[test]
    fn device_view_writes_land_in_host_buffer() {
        let exec = Executor::new(Backend::Device {
            tile_rows: 2,
            tile_cols: 2,
        })
        .unwrap();
        let cols = 5;
        let mut buf = vec![0.0; 5 * cols];
        {
            let view = DeviceView::new(&mut buf);
            exec.launch_2d(0..5, 0..cols, |i, j| unsafe {
                view.write(i * cols + j, (i * 10 + j) as f64)
            });
        }
        assert_eq!(buf[3 * cols + 4], 34.0);
        assert_eq!(buf[0], 0.0);
    }

    #[test]
    fn oversized_tiles_cover_the_box() {
        for (tile_rows, tile_cols) in [(usize::MAX, 4), (4, usize::MAX), (usize::MAX, usize::MAX)] {
            let exec = Executor::new(Backend::Device {
                tile_rows,
                tile_cols,
            })
            .unwrap();
            let hits = AtomicUsize::new(0);
            exec.launch_2d(1..6, 1..8, |_, _| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(hits.load(Ordering::Relaxed), 5 * 7);
            assert_eq!(exec.reduce_2d(1..6, 1..8, |_, _| 1.0), 35.0);
        }
    }

    #[test]
    fn row_sums_independent_of_thread_count() {
        let f = |i: usize| 1.0 / (i as f64 + 0.3);
        let serial = Executor::serial().sum_rows(0..1000, f);
        for threads in [2, 4, 8] {
            let exec = Executor::new(Backend::Threads { threads }).unwrap();
            assert_eq!(exec.sum_rows(0..1000, f).to_bits(), serial.to_bits());
        }
    }

    #[test]
    fn tile_reduction_matches_to_rounding() {
        let exec = Executor::new(Backend::Device {
            tile_rows: 4,
            tile_cols: 3,
        })
        .unwrap();
        let k = |i: usize, j: usize| ((i * 31 + j) as f64).sqrt();
        let tiled = exec.reduce_2d(0..40, 0..25, k);
        let reference: f64 = (0..40)
            .flat_map(|i| (0..25).map(move |j| k(i, j)))
            .sum();
        assert!((tiled - reference).abs() <= 1e-9 * reference);
    }

    #[test]
    fn all_finite_detects_nan() {
        let exec = Executor::new(Backend::Threads { threads: 2 }).unwrap();
        let mut data = vec![1.0; 100];
        assert!(exec.all_finite(&data));
        data[57] = f64::NAN;
        assert!(!exec.all_finite(&data));
        data[57] = f64::INFINITY;
        assert!(!Executor::serial().all_finite(&data));
    }
}
