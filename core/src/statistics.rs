//! Derived statistics of the current recurrence row.
//!
//! For `N` independent walkers in the same environment the maximum `M`
//! satisfies `P(M < x_n) = (1 - Z(n, t))^N`. Appending `Z(t+1, t) = 0`
//! closes the distribution, so
//!
//!   P(M = x_n) = (1 - Z(n+1))^N - (1 - Z(n))^N,   n = 0..=t
//!
//! and the Gumbel variance is the variance of that law.

use serde::Serialize;

use crate::{
    error::{SimError, SimResult},
    numeric::Quad,
    quantile::{check_quantile, leading_above},
    types::{Position, Time},
};

/// Probability and velocity of a quantile crossing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbAndVelocity {
    pub position:    Position,
    pub probability: Quad,
    pub velocity:    f64,
}

fn check_particles(n_particles: f64) -> SimResult<()> {
    if !(n_particles >= 1.0) || !n_particles.is_finite() {
        return Err(SimError::precondition(format!(
            "particle count must be a finite value >= 1, got {n_particles}"
        )));
    }
    Ok(())
}

/// `ln(1 - z)`, accurate at both ends of [0, 1].
fn ln_survival(z: Quad) -> f64 {
    let w = Quad::ONE - z;
    if w.hi() > 0.5 {
        (-z.to_f64()).ln_1p()
    } else {
        // Exact 1 - z from the double-double subtraction; ln(0) = -inf.
        w.to_f64().ln()
    }
}

/// Gumbel variance of the maximum of `n_particles` walkers.
pub fn gumbel_variance(prefix: &[Quad], time: Time, n_particles: f64) -> SimResult<f64> {
    check_particles(n_particles)?;
    let ln_w: Vec<f64> = prefix.iter().map(|z| ln_survival(*z)).collect();
    Ok(variance_of_max(&ln_w, time, n_particles))
}

/// Gumbel variance for several particle counts, in input order.
pub fn gumbel_variances(prefix: &[Quad], time: Time, n_particles: &[f64]) -> SimResult<Vec<f64>> {
    for &n in n_particles {
        check_particles(n)?;
    }
    let ln_w: Vec<f64> = prefix.iter().map(|z| ln_survival(*z)).collect();
    Ok(n_particles
        .iter()
        .map(|&n| variance_of_max(&ln_w, time, n))
        .collect())
}

fn variance_of_max(ln_w: &[f64], time: Time, n: f64) -> f64 {
    let t = time as f64;
    // P(M < x_n) for n = 0..=t+1; the appended entry is 1.
    let below: Vec<f64> = ln_w
        .iter()
        .map(|&l| (n * l).exp())
        .chain(std::iter::once(1.0))
        .collect();

    let mass = |i: usize| (below[i + 1] - below[i]).max(0.0);
    let x = |i: usize| 2.0 * i as f64 - t;

    let mean: f64 = (0..ln_w.len()).map(|i| x(i) * mass(i)).sum();
    (0..ln_w.len())
        .map(|i| {
            let d = x(i) - mean;
            d * d * mass(i)
        })
        .sum()
}

/// Probability and velocity at the last site where `Z` still exceeds
/// `1/quantile`.
///
/// Velocities below zero are legitimate for quantiles near the median. For
/// a consistent prefix of `time + 1` entries, `|position| <= time`, so
/// `VelocityOutOfRange` only fires on a prefix that is longer than its time
/// claims. It is reported, never clamped.
pub fn prob_and_v(prefix: &[Quad], time: Time, quantile: Quad) -> SimResult<ProbAndVelocity> {
    check_quantile(quantile)?;
    if time == 0 {
        return Err(SimError::precondition("velocity is undefined at time 0"));
    }
    let k = leading_above(prefix, quantile.recip());
    if k == 0 {
        return Err(SimError::precondition(format!(
            "no site has probability above 1/{quantile}"
        )));
    }
    let n = k - 1;
    let position = 2 * n as Position - time as Position;
    let velocity = position as f64 / time as f64;
    if !(-1.0..=1.0).contains(&velocity) {
        return Err(SimError::VelocityOutOfRange { velocity });
    }
    Ok(ProbAndVelocity {
        position,
        probability: prefix[n],
        velocity,
    })
}
