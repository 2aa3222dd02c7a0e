//! Chain storage, multi-chain parallel runner, and wall-clock deadline.

use std::sync::mpsc;
use std::time::Duration;

use crate::nuts::{NutsConfig, sample_nuts};
use ps_core::Result;
use ps_core::traits::LogDensityModel;
use serde::Serialize;

/// Raw MCMC chain from one NUTS run.
#[derive(Debug, Clone, Serialize)]
pub struct Chain {
    /// Draws in unconstrained space.
    pub draws_unconstrained: Vec<Vec<f64>>,
    /// Draws in constrained (model) space.
    pub draws_constrained: Vec<Vec<f64>>,
    /// Divergence flag per draw.
    pub divergences: Vec<bool>,
    /// Tree depth per draw.
    pub tree_depths: Vec<usize>,
    /// Acceptance probability per draw.
    pub accept_probs: Vec<f64>,
    /// Hamiltonian energy per draw (after momentum resampling at start of transition).
    pub energies: Vec<f64>,
    /// Configured maximum tree depth for this chain (for diagnostics).
    pub max_treedepth: usize,
    /// Final adapted step size.
    pub step_size: f64,
    /// Final adapted mass matrix diagonal.
    pub mass_diag: Vec<f64>,
}

/// Result of a multi-chain NUTS sampling run.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerResult {
    /// Individual chains.
    pub chains: Vec<Chain>,
    /// Parameter names.
    pub param_names: Vec<String>,
    /// Number of warmup iterations per chain.
    pub n_warmup: usize,
    /// Number of post-warmup samples per chain.
    pub n_samples: usize,
}

impl SamplerResult {
    /// Total number of post-warmup draws across all chains.
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws_constrained.len()).sum()
    }

    /// Get draws for a single parameter (index) across all chains.
    pub fn param_draws(&self, param_idx: usize) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|c| c.draws_constrained.iter().map(|d| d[param_idx]).collect())
            .collect()
    }

    /// All draws for a single parameter, flattened across chains.
    pub fn param_draws_flat(&self, param_idx: usize) -> Vec<f64> {
        self.chains
            .iter()
            .flat_map(|c| c.draws_constrained.iter().map(move |d| d[param_idx]))
            .collect()
    }

    /// Mean of a parameter across all draws and chains.
    pub fn param_mean(&self, param_idx: usize) -> f64 {
        let draws = self.param_draws(param_idx);
        let n: usize = draws.iter().map(|c| c.len()).sum();
        let sum: f64 = draws.iter().flat_map(|c| c.iter()).sum();
        sum / n as f64
    }

    /// Index of a parameter by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }
}

/// Run NUTS sampling on multiple chains in parallel via Rayon.
///
/// Each chain gets seed `seed + chain_id` and its own adaptation state.
pub fn sample_nuts_multichain(
    model: &(impl LogDensityModel + Sync + ?Sized),
    n_chains: usize,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: NutsConfig,
) -> Result<SamplerResult> {
    use rayon::prelude::*;

    let chains: Vec<Result<Chain>> = (0..n_chains)
        .into_par_iter()
        .map(|chain_id| {
            let chain_seed = seed.wrapping_add(chain_id as u64);
            sample_nuts(model, n_warmup, n_samples, chain_seed, config.clone())
        })
        .collect();

    let chains: Vec<Chain> = chains.into_iter().collect::<Result<Vec<_>>>()?;

    let param_names: Vec<String> = model.parameter_names();

    Ok(SamplerResult { chains, param_names, n_warmup, n_samples })
}

/// Run multi-chain NUTS with a wall-clock deadline.
///
/// The sampling run executes on a worker thread; if it does not complete
/// within `deadline`, the run is abandoned and an error is returned. Partial
/// chains are discarded rather than summarized, since a truncated run would
/// silently bias every downstream estimate.
pub fn sample_nuts_multichain_deadline<M>(
    model: M,
    n_chains: usize,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: NutsConfig,
    deadline: Duration,
) -> Result<SamplerResult>
where
    M: LogDensityModel + Clone + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let result = sample_nuts_multichain(&model, n_chains, n_warmup, n_samples, seed, config);
        // Receiver may already have given up; nothing to do in that case.
        let _ = tx.send(result);
    });

    match rx.recv_timeout(deadline) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!(
                "sampling exceeded the {:.1}s deadline; discarding partial chains",
                deadline.as_secs_f64()
            );
            Err(ps_core::Error::Sampling(format!(
                "sampling did not complete within {:.1}s",
                deadline.as_secs_f64()
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(ps_core::Error::Sampling("sampling worker thread terminated".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_core::Result;

    /// Independent bivariate normal with distinct scales.
    #[derive(Clone)]
    struct DiagNormal2;

    impl LogDensityModel for DiagNormal2 {
        fn dim(&self) -> usize {
            2
        }
        fn parameter_names(&self) -> Vec<String> {
            vec!["mu".to_string(), "sigma_like".to_string()]
        }
        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); 2]
        }
        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }
        fn nll(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1] / 2.0;
            Ok(0.5 * (x * x + y * y))
        }
        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![params[0], params[1] / 4.0])
        }
    }

    #[test]
    fn test_multichain_deterministic() {
        let model = DiagNormal2;

        // No jitter so identical seeds produce identical chains.
        let config = NutsConfig { max_treedepth: 8, target_accept: 0.8, init_jitter: 0.0 };
        let r1 = sample_nuts_multichain(&model, 2, 50, 20, 42, config.clone()).unwrap();
        let r2 = sample_nuts_multichain(&model, 2, 50, 20, 42, config).unwrap();

        for (c1, c2) in r1.chains.iter().zip(r2.chains.iter()) {
            assert_eq!(
                c1.draws_constrained, c2.draws_constrained,
                "multi-chain should be deterministic"
            );
        }
    }

    #[test]
    fn test_multichain_basic() {
        let model = DiagNormal2;

        let config = NutsConfig { max_treedepth: 8, target_accept: 0.8, init_jitter: 0.5 };
        let result = sample_nuts_multichain(&model, 2, 100, 50, 42, config).unwrap();

        assert_eq!(result.chains.len(), 2);
        assert_eq!(result.n_warmup, 100);
        assert_eq!(result.n_samples, 50);
        assert_eq!(result.total_draws(), 100);
        assert_eq!(result.param_index("mu"), Some(0));
        assert_eq!(result.param_index("missing"), None);

        let mu_mean = result.param_mean(0);
        assert!(mu_mean.abs() < 1.0, "mu mean should be near 0: {}", mu_mean);

        for c in &result.chains {
            assert_eq!(c.energies.len(), 50);
        }
    }

    #[test]
    fn test_deadline_completes_in_time() {
        let model = DiagNormal2;
        let config = NutsConfig { max_treedepth: 8, target_accept: 0.8, init_jitter: 0.5 };
        let result = sample_nuts_multichain_deadline(
            model,
            2,
            50,
            20,
            42,
            config,
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(result.total_draws(), 40);
    }

    #[test]
    fn test_deadline_expires() {
        /// Model that stalls long enough to trip a short deadline.
        #[derive(Clone)]
        struct SlowModel;

        impl LogDensityModel for SlowModel {
            fn dim(&self) -> usize {
                1
            }
            fn parameter_names(&self) -> Vec<String> {
                vec!["x".to_string()]
            }
            fn parameter_bounds(&self) -> Vec<(f64, f64)> {
                vec![(f64::NEG_INFINITY, f64::INFINITY)]
            }
            fn parameter_init(&self) -> Vec<f64> {
                vec![0.0]
            }
            fn nll(&self, params: &[f64]) -> Result<f64> {
                std::thread::sleep(Duration::from_millis(20));
                Ok(0.5 * params[0] * params[0])
            }
            fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
                Ok(vec![params[0]])
            }
        }

        let config = NutsConfig::default();
        let err = sample_nuts_multichain_deadline(
            SlowModel,
            1,
            500,
            500,
            42,
            config,
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(err, ps_core::Error::Sampling(_)));
    }
}
