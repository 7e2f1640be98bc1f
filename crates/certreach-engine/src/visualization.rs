//! Diagnostic rendering of a certificate over a 2-D state slice.
//!
//! Read-only: nothing here feeds back into training or verification.

use certreach_ir::certificate::Certificate;
use certreach_ir::domain::DomainBox;

use crate::counterexample::Counterexample;

/// Which slice of `[t, x]` to render.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceSpec {
    /// State axes on the horizontal and vertical direction.
    pub axes: (usize, usize),
    pub time: f64,
    /// Grid cells per direction.
    pub resolution: usize,
    /// Values of the remaining state coordinates; `None` uses the domain
    /// center.
    pub fixed: Option<Vec<f64>>,
}

impl SliceSpec {
    pub fn new(axes: (usize, usize), time: f64) -> Self {
        Self {
            axes,
            time,
            resolution: 41,
            fixed: None,
        }
    }
}

/// `V` sampled on a regular grid; `values[row][col]` with row 0 at the
/// lowest vertical coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub spec: SliceSpec,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![0.5 * (lo + hi)];
    }
    let step = (hi - lo) / (n - 1) as f64;
    (0..n).map(|i| lo + step * i as f64).collect()
}

pub fn render_slice(cert: &Certificate, domain: &DomainBox, spec: &SliceSpec) -> Slice {
    let (ax, ay) = spec.axes;
    let n = spec.resolution.max(2);
    let xs = linspace(domain.lower[ax], domain.upper[ax], n);
    let ys = linspace(domain.lower[ay], domain.upper[ay], n);
    let base = spec.fixed.clone().unwrap_or_else(|| domain.center());

    let values = ys
        .iter()
        .map(|&y| {
            xs.iter()
                .map(|&x| {
                    let mut state = base.clone();
                    state[ax] = x;
                    state[ay] = y;
                    let input: Vec<f64> = if cert.time_varying {
                        std::iter::once(spec.time).chain(state).collect()
                    } else {
                        state
                    };
                    cert.evaluate(&input)
                })
                .collect()
        })
        .collect();

    Slice {
        spec: spec.clone(),
        xs,
        ys,
        values,
    }
}

impl Slice {
    /// One `x,y,value` row per grid point, with a header.
    pub fn to_csv(&self) -> String {
        let (ax, ay) = self.spec.axes;
        let mut out = format!("x{},x{},value\n", ax + 1, ay + 1);
        for (row, &y) in self.values.iter().zip(&self.ys) {
            for (v, &x) in row.iter().zip(&self.xs) {
                out.push_str(&format!("{x},{y},{v}\n"));
            }
        }
        out
    }

    /// Character map: `#` where `V < 0` (inside the zero sublevel set), `.`
    /// elsewhere, `X` on cells containing a counterexample state. Top row
    /// is the highest vertical coordinate.
    pub fn to_ascii(&self, counterexamples: &[Counterexample]) -> String {
        let (ax, ay) = self.spec.axes;
        let cols = self.xs.len();
        let rows = self.ys.len();
        let mut grid: Vec<Vec<char>> = self
            .values
            .iter()
            .map(|row| row.iter().map(|&v| if v < 0.0 { '#' } else { '.' }).collect())
            .collect();

        for cex in counterexamples {
            let state = cex.state();
            if state.len() <= ax.max(ay) {
                continue;
            }
            let cell = (nearest(&self.xs, state[ax]), nearest(&self.ys, state[ay]));
            if let (Some(c), Some(r)) = cell {
                grid[r][c] = 'X';
            }
        }

        let mut out = String::with_capacity((cols + 1) * rows + 64);
        out.push_str(&format!(
            "V(t={}, x{}, x{})  x{} in [{}, {}], x{} in [{}, {}]\n",
            self.spec.time,
            ax + 1,
            ay + 1,
            ax + 1,
            self.xs[0],
            self.xs[cols - 1],
            ay + 1,
            self.ys[0],
            self.ys[rows - 1],
        ));
        for row in grid.iter().rev() {
            out.extend(row.iter());
            out.push('\n');
        }
        out
    }
}

/// Index of the grid coordinate closest to `v`, if `v` lies on the grid's
/// span.
fn nearest(axis: &[f64], v: f64) -> Option<usize> {
    let (lo, hi) = (axis[0], axis[axis.len() - 1]);
    if !(lo..=hi).contains(&v) {
        return None;
    }
    let step = (hi - lo) / (axis.len() - 1) as f64;
    Some((((v - lo) / step).round() as usize).min(axis.len() - 1))
}
