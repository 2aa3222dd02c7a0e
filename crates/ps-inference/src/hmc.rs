//! Hamiltonian Monte Carlo leapfrog integrator.
//!
//! Core building block for the NUTS sampler in [`crate::nuts`]: phase-space
//! state plus a leapfrog integrator with a diagonal (inverse) mass matrix.

use crate::posterior::Posterior;
use ps_core::Result;
use ps_core::traits::LogDensityModel;

/// HMC phase-space state: position + momentum + cached potential/gradient.
#[derive(Debug, Clone)]
pub struct HmcState {
    /// Position in unconstrained space.
    pub q: Vec<f64>,
    /// Momentum.
    pub p: Vec<f64>,
    /// Potential energy: `-logpdf_unconstrained(q)`.
    pub potential: f64,
    /// Gradient of potential: `-grad_unconstrained(q)`.
    pub grad_potential: Vec<f64>,
}

impl HmcState {
    /// Kinetic energy: `0.5 * p^T * M^{-1} * p` with diagonal `M^{-1}`.
    pub fn kinetic_energy(&self, inv_mass: &[f64]) -> f64 {
        0.5 * self
            .p
            .iter()
            .zip(inv_mass.iter())
            .map(|(&pi, &mi)| pi * pi * mi)
            .sum::<f64>()
    }

    /// Total Hamiltonian: `H = U(q) + K(p)`.
    pub fn hamiltonian(&self, inv_mass: &[f64]) -> f64 {
        self.potential + self.kinetic_energy(inv_mass)
    }
}

/// Leapfrog integrator for HMC.
pub struct LeapfrogIntegrator<'a, 'b, M: LogDensityModel + ?Sized> {
    posterior: &'a Posterior<'b, M>,
    step_size: f64,
    inv_mass: Vec<f64>,
}

impl<'a, 'b, M: LogDensityModel + ?Sized> LeapfrogIntegrator<'a, 'b, M> {
    /// Create a new leapfrog integrator.
    pub fn new(posterior: &'a Posterior<'b, M>, step_size: f64, inv_mass: Vec<f64>) -> Self {
        Self { posterior, step_size, inv_mass }
    }

    /// Current step size.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Current inverse mass diagonal.
    pub fn inv_mass(&self) -> &[f64] {
        &self.inv_mass
    }

    /// Initialize an HMC state at position `q`.
    pub fn init_state(&self, q: Vec<f64>) -> Result<HmcState> {
        let lp = self.posterior.logpdf_unconstrained(&q)?;
        let grad_lp = self.posterior.grad_unconstrained(&q)?;
        let potential = -lp;
        let grad_potential: Vec<f64> = grad_lp.iter().map(|&g| -g).collect();
        Ok(HmcState { q, p: vec![0.0; grad_potential.len()], potential, grad_potential })
    }

    /// Single leapfrog step with explicit step size (sign encodes direction).
    pub fn step_with_eps(&self, state: &mut HmcState, eps: f64) -> Result<()> {
        let n = state.q.len();

        // Half-step momentum
        for i in 0..n {
            state.p[i] -= 0.5 * eps * state.grad_potential[i];
        }

        // Full-step position
        for i in 0..n {
            state.q[i] += eps * self.inv_mass[i] * state.p[i];
        }

        // Recompute potential and gradient at new position
        let lp = self.posterior.logpdf_unconstrained(&state.q)?;
        let grad_lp = self.posterior.grad_unconstrained(&state.q)?;
        state.potential = -lp;
        for i in 0..n {
            state.grad_potential[i] = -grad_lp[i];
        }

        // Half-step momentum
        for i in 0..n {
            state.p[i] -= 0.5 * eps * state.grad_potential[i];
        }

        Ok(())
    }

    /// Single leapfrog step at the configured step size.
    pub fn step(&self, state: &mut HmcState) -> Result<()> {
        self.step_with_eps(state, self.step_size)
    }

    /// Take one leapfrog step in the given direction (`+1` forward, `-1` backward).
    pub fn step_dir(&self, state: &mut HmcState, direction: i32) -> Result<()> {
        debug_assert!(direction == 1 || direction == -1);
        self.step_with_eps(state, self.step_size * (direction as f64))
    }
}
