//! Shutdown case studies: one tank layout, many shutdown schedules.

use std::fmt;
use std::str::FromStr;

use refinery_solver::{SolutionStatus, Solver};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::builder::{BuildError, RefineryModel};
use crate::data::{RefineryData, Shutdown};
use crate::network::{BufferTank, ParseNameError, ProcessUnit};
use crate::report::RefineryReport;

/// A named set of unit shutdowns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownCase {
    pub name: String,
    pub shutdowns: Vec<Shutdown>,
}

impl ShutdownCase {
    /// Name the case after its shutdowns, e.g. `rf@3+cc@1`
    pub fn new(shutdowns: Vec<Shutdown>) -> Self {
        let name = if shutdowns.is_empty() {
            "base".to_string()
        } else {
            shutdowns.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("+")
        };
        Self { name, shutdowns }
    }
}

impl fmt::Display for ShutdownCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for ShutdownCase {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "base" {
            return Ok(Self::new(Vec::new()));
        }
        let shutdowns = s.split('+').map(str::parse).collect::<Result<Vec<Shutdown>, _>>()?;
        Ok(Self::new(shutdowns))
    }
}

/// Reformer and cracker outages across a four-period horizon
pub fn default_cases() -> Vec<ShutdownCase> {
    use ProcessUnit::{Cc, Rf};
    let schedule: [&[(ProcessUnit, usize)]; 10] = [
        &[(Cc, 3)],
        &[(Cc, 2), (Cc, 3)],
        &[(Rf, 3)],
        &[(Rf, 2), (Rf, 3)],
        &[(Rf, 3), (Cc, 1)],
        &[(Rf, 3), (Cc, 2)],
        &[(Rf, 3), (Cc, 3)],
        &[(Rf, 1), (Cc, 4)],
        &[(Rf, 2), (Cc, 4)],
        &[(Rf, 3), (Cc, 4)],
    ];
    schedule
        .iter()
        .map(|pairs| ShutdownCase::new(pairs.iter().map(|&(unit, period)| Shutdown::new(unit, period)).collect()))
        .collect()
}

/// Buffer tanks the shutdown study runs with
pub const STUDY_TANKS: [BufferTank; 2] = [BufferTank::Rfg, BufferTank::Ccfo];

#[derive(Debug, Clone)]
pub struct CaseStudy {
    /// Buffer tanks enabled in every case
    pub tanks: Vec<BufferTank>,
    pub cases: Vec<ShutdownCase>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub case: ShutdownCase,
    pub report: RefineryReport,
}

impl CaseOutcome {
    pub fn status(&self) -> SolutionStatus {
        self.report.status
    }

    pub fn profit(&self) -> Option<f64> {
        self.report.total_profit()
    }
}

impl Default for CaseStudy {
    /// The default cases with reformate and cracked fuel oil buffered
    fn default() -> Self {
        Self::new(STUDY_TANKS.to_vec())
    }
}

impl CaseStudy {
    pub fn new(tanks: Vec<BufferTank>) -> Self {
        Self { tanks, cases: default_cases() }
    }

    pub fn with_cases(mut self, cases: Vec<ShutdownCase>) -> Self {
        self.cases = cases;
        self
    }

    /// Build and solve every case. Each case replaces the scenario's own shutdowns.
    pub fn run(&self, data: &RefineryData, solver: &Solver) -> Result<Vec<CaseOutcome>, BuildError> {
        let base = data.clone().with_tanks(&self.tanks);
        let mut outcomes = Vec::with_capacity(self.cases.len());

        for case in &self.cases {
            let scenario = base.clone().with_shutdowns(case.shutdowns.clone());
            let model = RefineryModel::build(&scenario)?;
            let solution = model.solve(solver);
            let report = RefineryReport::new(&model, &solution);
            info!(
                case = %case,
                status = report.status.label(),
                profit = report.total_profit().unwrap_or(f64::NAN),
                "case solved"
            );
            outcomes.push(CaseOutcome { case: case.clone(), report });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(s: &str) -> ShutdownCase {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_cases() {
        let cases = default_cases();
        assert_eq!(cases.len(), 10);
        assert_eq!(cases[0].name, "cc@3");
        assert_eq!(cases[4].name, "rf@3+cc@1");
        assert_eq!(cases[9].shutdowns, vec![Shutdown::new(ProcessUnit::Rf, 3), Shutdown::new(ProcessUnit::Cc, 4)]);
        assert!(cases.iter().all(|c| c.shutdowns.iter().all(|s| (1..=4).contains(&s.period))));
    }

    #[test]
    fn test_default_study_layout() {
        let study = CaseStudy::default();
        assert_eq!(study.tanks, vec![BufferTank::Rfg, BufferTank::Ccfo]);
        assert_eq!(study.cases, default_cases());
    }

    #[test]
    fn test_parse_case() {
        assert_eq!(case("rf@2+cc:4"), ShutdownCase::new(vec![Shutdown::new(ProcessUnit::Rf, 2), Shutdown::new(ProcessUnit::Cc, 4)]));
        assert_eq!(case("rf@2+cc:4").name, "rf@2+cc@4");
        assert!(case("base").shutdowns.is_empty());
        assert!("rf@x".parse::<ShutdownCase>().is_err());
    }

    #[test]
    fn test_cracker_outage_with_and_without_tanks() {
        let data = RefineryData::default();
        let cases = vec![case("cc@3"), case("rf@3+cc@3")];
        let solver = Solver::new();

        let bare = CaseStudy::new(Vec::new()).with_cases(cases.clone()).run(&data, &solver).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0].status(), SolutionStatus::Optimal);
        assert_eq!(bare[1].status(), SolutionStatus::Infeasible);
        assert!(bare[1].profit().is_none());
        assert!(!bare[1].report.violations.is_empty());

        let tanked = CaseStudy::new(BufferTank::ALL.to_vec()).with_cases(cases).run(&data, &solver).unwrap();
        assert_eq!(tanked[0].status(), SolutionStatus::Optimal);
        assert_eq!(tanked[0].report.periods[0].tanks.len(), 4);

        // Tanks only add options, so the optimum cannot get worse
        let without = bare[0].profit().unwrap();
        let with = tanked[0].profit().unwrap();
        assert!(with >= without - 1e-6 * (1.0 + without.abs()), "{} < {}", with, without);
    }

    #[test]
    fn test_case_replaces_scenario_shutdowns() {
        let data = RefineryData { periods: 2, ..RefineryData::default() }
            .with_shutdowns(vec![Shutdown::new(ProcessUnit::Cc, 1)]);
        let outcomes = CaseStudy::new(Vec::new())
            .with_cases(vec![case("base")])
            .run(&data, &Solver::new())
            .unwrap();
        assert!(outcomes[0].report.periods[0].units[&ProcessUnit::Cc].running);
    }

    #[test]
    fn test_case_outside_horizon() {
        let data = RefineryData { periods: 2, ..RefineryData::default() };
        let err = CaseStudy::new(Vec::new())
            .with_cases(vec![case("rf@3")])
            .run(&data, &Solver::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::ShutdownPeriod { period: 3, .. }));
    }
}
