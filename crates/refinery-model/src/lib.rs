pub mod builder;
pub mod case_study;
pub mod data;
pub mod network;
pub mod report;

pub use builder::{BuildError, RefineryModel};
pub use case_study::{default_cases, CaseOutcome, CaseStudy, ShutdownCase, STUDY_TANKS};
pub use data::{
    Bound, CrudeSupply, DataError, ProductData, QualitySpec, RefineryData, Shutdown, TankData, UnitData,
};
pub use network::{
    BufferTank, FlowKey, Material, Network, Node, NodeKind, ParseNameError, ProcessUnit, Product, Quality,
};
pub use report::{FlowReport, PeriodReport, ProductReport, ProfitBreakdown, RefineryReport, TankReport, UnitReport};
