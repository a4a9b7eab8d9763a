//! SIP (Simple Imaging Polynomial) distortion terms as written by Astrometry.net.
//!
//! # Model
//!
//! Pixel offsets (u, v) from CRPIX are corrected before the CD matrix:
//!
//! ```text
//! u' = u + Σ A_pq * u^p * v^q    (2 ≤ p+q ≤ A_ORDER)
//! v' = v + Σ B_pq * u^p * v^q    (2 ≤ p+q ≤ B_ORDER)
//! ```
//!
//! The optional reverse polynomials AP/BP (which may include linear terms) give
//! an approximate inverse; it is refined by fixed-point iteration against A/B.

use glam::DVec2;

const INVERSE_ITERATIONS: usize = 20;
const INVERSE_TOLERANCE: f64 = 1e-10;

/// One polynomial axis: a sparse list of `(p, q, coefficient)` terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SipPolynomial {
    pub order: usize,
    pub terms: Vec<(usize, usize, f64)>,
}

impl SipPolynomial {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            terms: Vec::new(),
        }
    }

    pub fn push(&mut self, p: usize, q: usize, coeff: f64) {
        if coeff != 0.0 && p + q <= self.order {
            self.terms.push((p, q, coeff));
        }
    }

    pub fn evaluate(&self, u: f64, v: f64) -> f64 {
        self.terms
            .iter()
            .map(|&(p, q, c)| c * monomial(u, v, p, q))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Evaluate a monomial u^p * v^q.
#[inline]
fn monomial(u: f64, v: f64, p: usize, q: usize) -> f64 {
    u.powi(p as i32) * v.powi(q as i32)
}

/// Forward (A, B) and optional reverse (AP, BP) distortion polynomials.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sip {
    pub a: SipPolynomial,
    pub b: SipPolynomial,
    pub ap: Option<SipPolynomial>,
    pub bp: Option<SipPolynomial>,
}

impl Sip {
    /// Distorted pixel offset → corrected (linear) offset.
    pub fn forward(&self, offset: DVec2) -> DVec2 {
        let (u, v) = (offset.x, offset.y);
        DVec2::new(u + self.a.evaluate(u, v), v + self.b.evaluate(u, v))
    }

    /// Corrected (linear) offset → distorted pixel offset.
    pub fn inverse(&self, corrected: DVec2) -> DVec2 {
        let (uc, vc) = (corrected.x, corrected.y);
        let mut guess = match (&self.ap, &self.bp) {
            (Some(ap), Some(bp)) => DVec2::new(uc + ap.evaluate(uc, vc), vc + bp.evaluate(uc, vc)),
            _ => corrected,
        };

        for _ in 0..INVERSE_ITERATIONS {
            let next = DVec2::new(
                uc - self.a.evaluate(guess.x, guess.y),
                vc - self.b.evaluate(guess.x, guess.y),
            );
            if !next.is_finite() {
                return next;
            }
            let step = (next - guess).length();
            guess = next;
            if step < INVERSE_TOLERANCE {
                break;
            }
        }
        guess
    }
}
