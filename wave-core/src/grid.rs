use crate::error::GridError;

/// A 2D scalar field stored flat in row-major order.
///
/// Row `0`, row `rows - 1`, column `0` and column `cols - 1` are boundary
/// cells; everything else is interior and belongs to the stencil.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Field {
    pub fn new(rows: usize, cols: usize) -> Result<Field, GridError> {
        let size = checked_size(rows, cols)?;
        Ok(Field {
            rows,
            cols,
            data: vec![0.0; size],
        })
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Field, GridError> {
        let size = checked_size(rows, cols)?;
        if data.len() != size {
            return Err(GridError::LengthMismatch {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Field { rows, cols, data })
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Result<Field, GridError> {
        let mut f = Field::new(rows, cols)?;
        f.data.fill(value);
        Ok(f)
    }

    // ---- Addressing ----

    #[inline(always)]
    pub fn index(&self, i: usize, j: usize) -> usize {
        i * self.cols + j
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i < self.rows && j < self.cols {
            Some(self.data[self.index(i, j)])
        } else {
            None
        }
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) -> Result<(), GridError> {
        if i >= self.rows || j >= self.cols {
            return Err(GridError::OutOfBounds {
                i,
                j,
                rows: self.rows,
                cols: self.cols,
            });
        }
        let idx = self.index(i, j);
        self.data[idx] = value;
        Ok(())
    }

    pub fn is_boundary(&self, i: usize, j: usize) -> bool {
        i == 0 || j == 0 || i == self.rows - 1 || j == self.cols - 1
    }

    // ---- Accessors ----

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other: &Field) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let start = i * self.cols;
        &self.data[start..start + self.cols]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

pub(crate) fn checked_size(rows: usize, cols: usize) -> Result<usize, GridError> {
    if rows < 3 || cols < 3 {
        return Err(GridError::TooSmall { rows, cols });
    }
    rows.checked_mul(cols)
        .ok_or(GridError::Overflow { rows, cols })
}
