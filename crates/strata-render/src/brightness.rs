/// Height-to-brightness curve: `1 + B_J(h / divider) / 2`, where `B_J` is the
/// Brillouin function. Monotonic in `h`, 1 at `h = 0`, bounded by (0.5, 1.5).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Brillouin {
    j: f64,
    divider: f64,
}

impl Brillouin {
    pub fn new(j: f32, divider: f32) -> Self {
        Self {
            j: (j as f64).max(0.5),
            divider: if divider.abs() < f32::EPSILON {
                1.0
            } else {
                divider as f64
            },
        }
    }

    /// `B_J(x)`, odd and saturating at +-1.
    pub fn b_j(&self, x: f64) -> f64 {
        let j = self.j;
        if x.abs() < 1e-6 {
            // first term of the series; avoids the 0 * inf of both coth terms
            return (j + 1.0) / (3.0 * j) * x;
        }
        let a = (2.0 * j + 1.0) / (2.0 * j);
        let b = 1.0 / (2.0 * j);
        a * coth(a * x) - b * coth(b * x)
    }

    #[inline]
    pub fn brightness(&self, h: i32) -> f32 {
        let v = 1.0 + 0.5 * self.b_j(h as f64 / self.divider);
        v.clamp(0.5, 1.5) as f32
    }
}

#[inline]
fn coth(x: f64) -> f64 {
    1.0 / x.tanh()
}
