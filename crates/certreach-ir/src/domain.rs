use serde::{Deserialize, Serialize};

/// Axis-aligned box `lower[i] <= x[i] <= upper[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainBox {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl DomainBox {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { lower, upper }
    }

    /// `[lo, hi]^dim`.
    pub fn cube(dim: usize, lo: f64, hi: f64) -> Self {
        Self {
            lower: vec![lo; dim],
            upper: vec![hi; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Finite, non-empty, and with matching bound lengths.
    pub fn is_well_formed(&self) -> bool {
        self.lower.len() == self.upper.len()
            && self
                .lower
                .iter()
                .zip(&self.upper)
                .all(|(lo, hi)| lo.is_finite() && hi.is_finite() && lo <= hi)
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dim()
            && x.iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (lo, hi))| *lo <= *v && *v <= *hi)
    }

    pub fn clamp(&self, x: &mut [f64]) {
        for (v, (lo, hi)) in x.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            *v = v.clamp(*lo, *hi);
        }
    }

    pub fn width(&self, axis: usize) -> f64 {
        self.upper[axis] - self.lower[axis]
    }

    pub fn center(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| 0.5 * (lo + hi))
            .collect()
    }

    /// Map unit-cube coordinates `u in [0,1]^dim` into the box.
    pub fn lerp(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(s, (lo, hi))| lo + s * (hi - lo))
            .collect()
    }

    /// Cut every axis into `parts` equal slices (`parts^dim` boxes).
    pub fn partition(&self, parts: usize) -> Vec<DomainBox> {
        let parts = parts.max(1);
        let mut boxes = vec![DomainBox::new(Vec::new(), Vec::new())];
        for axis in 0..self.dim() {
            let step = self.width(axis) / parts as f64;
            let mut next = Vec::with_capacity(boxes.len() * parts);
            for b in &boxes {
                for k in 0..parts {
                    let lo = self.lower[axis] + step * k as f64;
                    let hi = if k + 1 == parts {
                        self.upper[axis]
                    } else {
                        self.lower[axis] + step * (k + 1) as f64
                    };
                    let mut nb = b.clone();
                    nb.lower.push(lo);
                    nb.upper.push(hi);
                    next.push(nb);
                }
            }
            boxes = next;
        }
        boxes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_box_exactly() {
        let b = DomainBox::cube(2, -1.0, 1.0);
        let parts = b.partition(2);
        assert_eq!(parts.len(), 4);
        let total: f64 = parts.iter().map(|p| p.width(0) * p.width(1)).sum();
        assert!((total - 4.0).abs() < 1e-12);
        assert!(parts.iter().all(|p| p.is_well_formed()));
        assert_eq!(parts[3].upper, vec![1.0, 1.0]);
    }

    #[test]
    fn partition_of_one_is_identity() {
        let b = DomainBox::new(vec![0.0, -2.0], vec![1.0, 2.0]);
        assert_eq!(b.partition(1), vec![b.clone()]);
        assert_eq!(b.partition(0), vec![b]);
    }

    #[test]
    fn contains_clamp_and_lerp() {
        let b = DomainBox::cube(2, -1.0, 1.0);
        assert!(b.contains(&[0.0, 1.0]));
        assert!(!b.contains(&[0.0, 1.5]));
        assert!(!b.contains(&[0.0]));
        let mut x = [2.0, -3.0];
        b.clamp(&mut x);
        assert_eq!(x, [1.0, -1.0]);
        assert_eq!(b.lerp(&[0.5, 1.0]), vec![0.0, 1.0]);
        assert_eq!(b.center(), vec![0.0, 0.0]);
    }

    #[test]
    fn malformed_boxes_are_detected() {
        assert!(!DomainBox::new(vec![1.0], vec![0.0]).is_well_formed());
        assert!(!DomainBox::new(vec![0.0], vec![f64::INFINITY]).is_well_formed());
        assert!(!DomainBox::new(vec![0.0, 0.0], vec![1.0]).is_well_formed());
    }
}
