//! Scenario data: prices, capacities, yields, blend specifications, tank
//! geometry and the shutdown schedule.
//!
//! `Default` is the textbook refinery. Scenario files are JSON; any field
//! left out keeps its default, and map entries replace whole default entries.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::{BufferTank, Material, ParseNameError, ProcessUnit, Product, Quality};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid scenario: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineryData {
    /// Number of planning periods
    pub periods: usize,
    /// Length of one period; flows are rates per unit time
    pub period_length: f64,
    pub crude: CrudeSupply,
    /// Credit per unit of fuel gas produced
    pub fuel_gas_value: f64,
    pub units: BTreeMap<ProcessUnit, UnitData>,
    pub products: BTreeMap<Product, ProductData>,
    /// Blending properties per material
    pub qualities: BTreeMap<Material, BTreeMap<Quality, f64>>,
    pub tanks: BTreeMap<BufferTank, TankData>,
    pub shutdowns: Vec<Shutdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrudeSupply {
    pub price: f64,
    /// Maximum intake per period
    pub max_intake: f64,
    /// Pin the intake to this rate in every period
    pub fixed_intake: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitData {
    /// Maximum total inlet rate
    pub capacity: f64,
    /// Minimum total inlet rate while running
    #[serde(default)]
    pub min_throughput: f64,
    /// Cost per unit of feed processed
    #[serde(default)]
    pub operating_cost: f64,
    /// Yield per unit of each feed material, by product material
    pub yields: BTreeMap<Material, BTreeMap<Material, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductData {
    pub price: f64,
    /// Minimum sales per period; a single entry applies to every period
    pub demand: Vec<f64>,
    #[serde(default)]
    pub specs: Vec<QualitySpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySpec {
    pub quality: Quality,
    pub bound: Bound,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Min,
    Max,
}

impl Bound {
    pub fn name(self) -> &'static str {
        match self {
            Bound::Min => "min",
            Bound::Max => "max",
        }
    }
}

/// Vertical cylindrical buffer tank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TankData {
    pub enabled: bool,
    pub radius: f64,
    pub max_height: f64,
    pub initial_volume: f64,
    /// Cost per unit of inflow
    pub processing_cost: f64,
    /// Cost per unit of inventory per unit time
    pub holding_cost: f64,
}

/// Unit `unit` is down for the whole of `period` (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    pub unit: ProcessUnit,
    pub period: usize,
}

impl Shutdown {
    pub fn new(unit: ProcessUnit, period: usize) -> Self {
        Self { unit, period }
    }
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.unit, self.period)
    }
}

impl FromStr for Shutdown {
    type Err = ParseNameError;

    /// `rf@3` or `rf:3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseNameError { kind: "shutdown", name: s.to_string() };
        let (unit, period) = s.split_once(|c: char| c == '@' || c == ':').ok_or_else(invalid)?;
        let period = period.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(unit.parse()?, period))
    }
}

impl TankData {
    pub fn area(&self) -> f64 {
        PI * self.radius * self.radius
    }

    /// Volume at maximum height
    pub fn capacity(&self) -> f64 {
        self.area() * self.max_height
    }
}

impl ProductData {
    pub fn demand_at(&self, period: usize) -> f64 {
        match self.demand.as_slice() {
            [] => 0.0,
            [single] => *single,
            list => list.get(period.saturating_sub(1)).copied().unwrap_or(0.0),
        }
    }

    pub fn spec(&self, quality: Quality, bound: Bound) -> Option<f64> {
        self.specs
            .iter()
            .find(|s| s.quality == quality && s.bound == bound)
            .map(|s| s.value)
    }
}

impl Default for CrudeSupply {
    fn default() -> Self {
        Self {
            price: 33.0,
            max_intake: 110_000.0,
            fixed_intake: None,
        }
    }
}

impl Default for TankData {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 40.0,
            max_height: 20.0,
            initial_volume: 0.0,
            processing_cost: 0.1,
            holding_cost: 0.05,
        }
    }
}

fn yields(feed: Material, out: &[(Material, f64)]) -> (Material, BTreeMap<Material, f64>) {
    (feed, out.iter().copied().collect())
}

fn spec(quality: Quality, bound: Bound, value: f64) -> QualitySpec {
    QualitySpec { quality, bound, value }
}

impl Default for RefineryData {
    fn default() -> Self {
        use Material as M;

        let units = BTreeMap::from([
            (
                ProcessUnit::Ad,
                UnitData {
                    capacity: 100_000.0,
                    min_throughput: 0.0,
                    operating_cost: 0.0,
                    yields: BTreeMap::from([yields(
                        M::Crude,
                        &[(M::Fg, 35.42), (M::Srg, 0.270), (M::Srn, 0.237), (M::Srds, 0.087), (M::Srfo, 0.372)],
                    )]),
                },
            ),
            (
                ProcessUnit::Rf,
                UnitData {
                    capacity: 25_000.0,
                    min_throughput: 5_000.0,
                    operating_cost: 2.5,
                    yields: BTreeMap::from([yields(M::Srn, &[(M::Fg, 158.7), (M::Rfg, 0.928)])]),
                },
            ),
            (
                ProcessUnit::Cc,
                UnitData {
                    capacity: 30_000.0,
                    min_throughput: 5_000.0,
                    operating_cost: 2.2,
                    yields: BTreeMap::from([
                        yields(M::Srds, &[(M::Fg, 336.9), (M::Ccg, 0.619), (M::Ccfo, 0.189)]),
                        yields(M::Srfo, &[(M::Fg, 386.4), (M::Ccg, 0.688), (M::Ccfo, 0.2197)]),
                    ]),
                },
            ),
        ]);

        let products = BTreeMap::from([
            (
                Product::Pg,
                ProductData {
                    price: 45.36,
                    demand: vec![10_000.0],
                    specs: vec![spec(Quality::Ron, Bound::Min, 93.0), spec(Quality::Rvp, Bound::Max, 12.7)],
                },
            ),
            (
                Product::Rg,
                ProductData {
                    price: 43.68,
                    demand: vec![10_000.0],
                    specs: vec![spec(Quality::Ron, Bound::Min, 83.0), spec(Quality::Rvp, Bound::Max, 12.7)],
                },
            ),
            (
                Product::Df,
                ProductData {
                    price: 40.32,
                    demand: vec![10_000.0],
                    specs: vec![spec(Quality::Density, Bound::Max, 306.0), spec(Quality::Sulfur, Bound::Max, 0.5)],
                },
            ),
            (
                Product::Fo,
                ProductData {
                    price: 13.14,
                    demand: vec![10_000.0],
                    specs: vec![spec(Quality::Density, Bound::Max, 352.0), spec(Quality::Sulfur, Bound::Max, 3.0)],
                },
            ),
        ]);

        let qualities = BTreeMap::from([
            (M::Srg, BTreeMap::from([(Quality::Ron, 78.5), (Quality::Rvp, 18.4)])),
            (M::Rfg, BTreeMap::from([(Quality::Ron, 104.0), (Quality::Rvp, 2.57)])),
            (
                M::Srn,
                BTreeMap::from([
                    (Quality::Ron, 65.0),
                    (Quality::Rvp, 6.54),
                    (Quality::Density, 272.0),
                    (Quality::Sulfur, 0.283),
                ]),
            ),
            (M::Ccg, BTreeMap::from([(Quality::Ron, 93.7), (Quality::Rvp, 6.9)])),
            (M::Ccfo, BTreeMap::from([(Quality::Density, 294.4), (Quality::Sulfur, 0.353)])),
            (M::Srds, BTreeMap::from([(Quality::Density, 292.0), (Quality::Sulfur, 0.526)])),
            (M::Srfo, BTreeMap::from([(Quality::Density, 295.0), (Quality::Sulfur, 0.980)])),
        ]);

        let tanks = BufferTank::ALL.into_iter().map(|t| (t, TankData::default())).collect();

        Self {
            periods: 4,
            period_length: 1.0,
            crude: CrudeSupply::default(),
            fuel_gas_value: 0.01965,
            units,
            products,
            qualities,
            tanks,
            shutdowns: Vec::new(),
        }
    }
}

impl RefineryData {
    pub fn from_json_str(source: &str) -> Result<Self, DataError> {
        let mut data: RefineryData = serde_json::from_str(source)?;
        data.fill_missing_entries();
        Ok(data)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&source)
    }

    pub fn to_json_pretty(&self) -> Result<String, DataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Units, products, materials and tanks absent from a scenario keep their defaults
    fn fill_missing_entries(&mut self) {
        let defaults = RefineryData::default();
        for (unit, data) in defaults.units {
            self.units.entry(unit).or_insert(data);
        }
        for (product, data) in defaults.products {
            self.products.entry(product).or_insert(data);
        }
        for (material, values) in defaults.qualities {
            self.qualities.entry(material).or_insert(values);
        }
        for (tank, data) in defaults.tanks {
            self.tanks.entry(tank).or_insert(data);
        }
    }

    /// Enable exactly the given tanks
    pub fn with_tanks(mut self, enabled: &[BufferTank]) -> Self {
        for (tank, data) in self.tanks.iter_mut() {
            data.enabled = enabled.contains(tank);
        }
        for tank in enabled {
            self.tanks.entry(*tank).or_default().enabled = true;
        }
        self
    }

    pub fn with_shutdowns(mut self, shutdowns: Vec<Shutdown>) -> Self {
        self.shutdowns = shutdowns;
        self
    }

    pub fn enabled_tanks(&self) -> Vec<BufferTank> {
        self.tanks
            .iter()
            .filter(|(_, t)| t.enabled)
            .map(|(tank, _)| *tank)
            .collect()
    }

    /// The shutdown indicator for a unit and 1-based period
    pub fn is_shut_down(&self, unit: ProcessUnit, period: usize) -> bool {
        self.shutdowns.iter().any(|s| s.unit == unit && s.period == period)
    }

    pub fn quality(&self, material: Material, quality: Quality) -> Option<f64> {
        self.qualities.get(&material).and_then(|q| q.get(&quality)).copied()
    }
}
