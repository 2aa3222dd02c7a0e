//! Evidence adapters.
//!
//! Pure constructors that validate raw per-stream inputs and expose the
//! sufficient statistics each likelihood term needs. All domain violations
//! are reported as [`ps_core::Error::Validation`] naming the offending field
//! and constraint; nothing is silently coerced.

use ps_core::{Error, Result};

/// Two-arm trial evidence: event counts and person-time per arm.
#[derive(Debug, Clone)]
pub struct TrialEvidence {
    /// Events in the exposed arm.
    pub exposed_events: u64,
    /// Person-years in the exposed arm.
    pub exposed_person_years: f64,
    /// Events in the comparator arm.
    pub comparator_events: u64,
    /// Person-years in the comparator arm.
    pub comparator_person_years: f64,
}

impl TrialEvidence {
    /// Validate and construct trial evidence.
    pub fn new(
        exposed_events: u64,
        exposed_person_years: f64,
        comparator_events: u64,
        comparator_person_years: f64,
    ) -> Result<Self> {
        if !exposed_person_years.is_finite() || exposed_person_years <= 0.0 {
            return Err(Error::Validation(format!(
                "exposed_person_years must be finite and > 0, got {}",
                exposed_person_years
            )));
        }
        if !comparator_person_years.is_finite() || comparator_person_years <= 0.0 {
            return Err(Error::Validation(format!(
                "comparator_person_years must be finite and > 0, got {}",
                comparator_person_years
            )));
        }
        Ok(Self {
            exposed_events,
            exposed_person_years,
            comparator_events,
            comparator_person_years,
        })
    }

    /// Crude (observed) incidence rate ratio. `None` when the comparator arm
    /// has zero events, where the ratio is undefined.
    pub fn crude_rate_ratio(&self) -> Option<f64> {
        if self.comparator_events == 0 {
            return None;
        }
        let rate_e = self.exposed_events as f64 / self.exposed_person_years;
        let rate_c = self.comparator_events as f64 / self.comparator_person_years;
        Some(rate_e / rate_c)
    }

    /// Crude comparator-arm event rate (events per person-year).
    pub fn comparator_rate(&self) -> f64 {
        self.comparator_events as f64 / self.comparator_person_years
    }
}

/// Monthly case-report count series.
#[derive(Debug, Clone)]
pub struct CaseSeriesEvidence {
    counts: Vec<u64>,
}

impl CaseSeriesEvidence {
    /// Validate and construct a case-report series (length >= 1).
    pub fn new(counts: Vec<u64>) -> Result<Self> {
        if counts.is_empty() {
            return Err(Error::Validation(
                "case_series must contain at least one monthly count".to_string(),
            ));
        }
        Ok(Self { counts })
    }

    /// The monthly counts in time order.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the series is empty (never true for a validated instance).
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Total count across all months.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Mean monthly count.
    pub fn mean(&self) -> f64 {
        self.total() as f64 / self.counts.len() as f64
    }

    /// Sample variance of monthly counts (0 for a length-1 series).
    pub fn variance(&self) -> f64 {
        let n = self.counts.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.counts.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)
    }
}

/// Pharmacovigilance disproportionality evidence: a reporting odds ratio and
/// its standard error on the log scale.
#[derive(Debug, Clone)]
pub struct PharmacovigilanceEvidence {
    /// Observed reporting odds ratio.
    pub ror: f64,
    /// Standard error of `ln(ror)`.
    pub log_se: f64,
}

impl PharmacovigilanceEvidence {
    /// Validate and construct pharmacovigilance evidence.
    pub fn new(ror: f64, log_se: f64) -> Result<Self> {
        if !ror.is_finite() || ror <= 0.0 {
            return Err(Error::Validation(format!("ror must be finite and > 0, got {}", ror)));
        }
        if !log_se.is_finite() || log_se <= 0.0 {
            return Err(Error::Validation(format!(
                "ror_log_se must be finite and > 0, got {}",
                log_se
            )));
        }
        Ok(Self { ror, log_se })
    }

    /// Log of the observed reporting odds ratio.
    pub fn log_ror(&self) -> f64 {
        self.ror.ln()
    }
}

/// Mechanistic evidence: one effect-size estimate per study.
#[derive(Debug, Clone)]
pub struct MechanisticEvidence {
    effects: Vec<f64>,
}

impl MechanisticEvidence {
    /// Validate and construct mechanistic evidence (>= 1 finite effect).
    pub fn new(effects: Vec<f64>) -> Result<Self> {
        if effects.is_empty() {
            return Err(Error::Validation(
                "mechanistic_effects must contain at least one study effect".to_string(),
            ));
        }
        if let Some((i, bad)) = effects.iter().enumerate().find(|(_, e)| !e.is_finite()) {
            return Err(Error::Validation(format!(
                "mechanistic_effects[{}] must be finite, got {}",
                i, bad
            )));
        }
        Ok(Self { effects })
    }

    /// The per-study effect sizes.
    pub fn effects(&self) -> &[f64] {
        &self.effects
    }

    /// Number of studies.
    pub fn n_studies(&self) -> usize {
        self.effects.len()
    }

    /// Unweighted mean effect across studies.
    pub fn mean_effect(&self) -> f64 {
        self.effects.iter().sum::<f64>() / self.effects.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_valid_and_crude_ratio() {
        let t = TrialEvidence::new(8, 144_226.0, 4, 132_922.0).unwrap();
        let rr = t.crude_rate_ratio().unwrap();
        // (8/144226) / (4/132922) ~= 1.843
        assert!((rr - 1.843).abs() < 0.01, "crude RR: {}", rr);
    }

    #[test]
    fn test_trial_zero_events_boundary_valid() {
        let t = TrialEvidence::new(0, 100.0, 0, 100.0).unwrap();
        assert!(t.crude_rate_ratio().is_none());
    }

    #[test]
    fn test_trial_rejects_nonpositive_person_years() {
        let err = TrialEvidence::new(1, 0.0, 1, 100.0).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("exposed_person_years")));
        let err = TrialEvidence::new(1, 100.0, 1, -5.0).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("comparator_person_years")));
    }

    #[test]
    fn test_case_series_stats() {
        let s = CaseSeriesEvidence::new(vec![1, 2, 3, 2]).unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(s.total(), 8);
        assert!((s.mean() - 2.0).abs() < 1e-12);
        assert!((s.variance() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_case_series_rejects_empty() {
        assert!(CaseSeriesEvidence::new(vec![]).is_err());
    }

    #[test]
    fn test_case_series_single_element_boundary() {
        let s = CaseSeriesEvidence::new(vec![0]).unwrap();
        assert_eq!(s.variance(), 0.0);
    }

    #[test]
    fn test_pharmacovigilance() {
        let p = PharmacovigilanceEvidence::new(1.23, 0.35).unwrap();
        assert!((p.log_ror() - 1.23_f64.ln()).abs() < 1e-12);

        assert!(PharmacovigilanceEvidence::new(0.0, 0.35).is_err());
        assert!(PharmacovigilanceEvidence::new(1.23, 0.0).is_err());
        assert!(PharmacovigilanceEvidence::new(f64::NAN, 0.35).is_err());
    }

    #[test]
    fn test_mechanistic() {
        let m = MechanisticEvidence::new(vec![0.3, 0.5, -0.1]).unwrap();
        assert_eq!(m.n_studies(), 3);
        assert!((m.mean_effect() - 0.7 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mechanistic_single_study_boundary() {
        assert!(MechanisticEvidence::new(vec![0.2]).is_ok());
    }

    #[test]
    fn test_mechanistic_rejects_empty_and_nonfinite() {
        assert!(MechanisticEvidence::new(vec![]).is_err());
        let err = MechanisticEvidence::new(vec![0.1, f64::INFINITY]).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("mechanistic_effects[1]")));
    }
}
