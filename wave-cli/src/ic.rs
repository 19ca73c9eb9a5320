use clap::ValueEnum;
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum IcType {
    Gaussians,
    Plateaus,
    SmoothNoise,
    Pluck,
}

impl IcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IcType::Gaussians => "gaussians",
            IcType::Plateaus => "plateaus",
            IcType::SmoothNoise => "smooth_noise",
            IcType::Pluck => "pluck",
        }
    }
}

pub fn sample_ic_type<R: Rng>(rng: &mut R) -> IcType {
    match rng.gen_range(0..4) {
        0 => IcType::Gaussians,
        1 => IcType::Plateaus,
        2 => IcType::SmoothNoise,
        _ => IcType::Pluck,
    }
}

/// Displacement field (len = rows*cols) whose largest magnitude is
/// `amplitude`. Boundary cells are zero so the fixed boundary starts at rest.
pub fn generate_ic<R: Rng>(rng: &mut R, rows: usize, cols: usize, ic: IcType, amplitude: f64) -> Vec<f64> {
    let mut f = vec![0.0f64; rows * cols];
    let (h, w) = (rows as f64 - 1.0, cols as f64 - 1.0);

    match ic {
        IcType::Gaussians => {
            let blobs = rng.gen_range(1..=3);
            for _ in 0..blobs {
                let ci = rng.gen_range(0.2..0.8) * h;
                let cj = rng.gen_range(0.2..0.8) * w;
                let sigma = rng.gen_range(0.05..0.15) * h.min(w) + 0.5;
                let amp = rng.gen_range(-1.0..1.0);
                for i in 0..rows {
                    for j in 0..cols {
                        let di = i as f64 - ci;
                        let dj = j as f64 - cj;
                        f[i * cols + j] += amp * (-0.5 * (di * di + dj * dj) / (sigma * sigma)).exp();
                    }
                }
            }
        }

        IcType::Plateaus => {
            let count = rng.gen_range(1..=4);
            for _ in 0..count {
                let i0 = rng.gen_range(1..=(rows - 2));
                let j0 = rng.gen_range(1..=(cols - 2));
                let i1 = (i0 + rng.gen_range(0..=(rows / 3))).min(rows - 2);
                let j1 = (j0 + rng.gen_range(0..=(cols / 3))).min(cols - 2);
                let val = rng.gen_range(0.3..1.0);
                for i in i0..=i1 {
                    for j in j0..=j1 {
                        f[i * cols + j] = f[i * cols + j].max(val);
                    }
                }
            }
        }

        IcType::SmoothNoise => {
            for x in f.iter_mut() {
                *x = rng.gen_range(-1.0..1.0);
            }
            f = box_blur(&f, rows, cols, 2);
        }

        IcType::Pluck => {
            // A string-like ridge along one axis, peaked at a random point.
            let horizontal = rng.gen_bool(0.5);
            let at = rng.gen_range(0.25..0.75);
            let line = if horizontal {
                ((at * h) as usize).clamp(1, rows - 2)
            } else {
                ((at * w) as usize).clamp(1, cols - 2)
            };
            let len = if horizontal { cols } else { rows };
            let peak = rng.gen_range(0.3..0.7) * (len as f64 - 1.0);
            for k in 1..len - 1 {
                let x = k as f64;
                let shape = if x <= peak {
                    x / peak
                } else {
                    (len as f64 - 1.0 - x) / (len as f64 - 1.0 - peak)
                };
                let idx = if horizontal { line * cols + k } else { k * cols + line };
                f[idx] = shape;
            }
        }
    }

    zero_boundary(&mut f, rows, cols);
    normalize_peak(&mut f, amplitude);
    f
}

fn zero_boundary(f: &mut [f64], rows: usize, cols: usize) {
    for j in 0..cols {
        f[j] = 0.0;
        f[(rows - 1) * cols + j] = 0.0;
    }
    for i in 0..rows {
        f[i * cols] = 0.0;
        f[i * cols + cols - 1] = 0.0;
    }
}

fn normalize_peak(f: &mut [f64], amplitude: f64) {
    let mx = f.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if mx > 0.0 {
        for v in f.iter_mut() {
            *v *= amplitude / mx;
        }
    }
}

fn box_blur(src: &[f64], rows: usize, cols: usize, passes: usize) -> Vec<f64> {
    let mut cur = src.to_vec();
    let mut tmp = vec![0.0f64; rows * cols];

    for _ in 0..passes {
        for i in 0..rows {
            for j in 0..cols {
                let mut sum = 0.0;
                let mut cnt = 0.0;
                for ii in i.saturating_sub(1)..=(i + 1).min(rows - 1) {
                    for jj in j.saturating_sub(1)..=(j + 1).min(cols - 1) {
                        sum += cur[ii * cols + jj];
                        cnt += 1.0;
                    }
                }
                tmp[i * cols + j] = sum / cnt;
            }
        }
        std::mem::swap(&mut cur, &mut tmp);
    }
    cur
}
