//! Reads a solved refinery model back into per-period plant figures.

use std::collections::BTreeMap;
use std::fmt;

use refinery_solver::{ConstraintViolation, Solution, SolutionStatus};
use serde::Serialize;

use crate::builder::RefineryModel;
use crate::network::{BufferTank, FlowKey, Material, Node, ProcessUnit, Product, Quality};

/// Flows and volumes below this are reported as zero
const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Serialize)]
pub struct RefineryReport {
    pub status: SolutionStatus,
    /// Present when the solve was optimal
    pub objective_value: Option<f64>,
    /// Present when the solve was optimal
    pub profit: Option<ProfitBreakdown>,
    pub periods: Vec<PeriodReport>,
    pub violations: Vec<ConstraintViolation>,
}

/// Profit by category, summed over all periods. Costs are positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfitBreakdown {
    pub product_revenue: f64,
    pub fuel_gas_credit: f64,
    pub crude_cost: f64,
    pub operating_cost: f64,
    pub tank_processing_cost: f64,
    pub tank_holding_cost: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub period: usize,
    pub crude_intake: f64,
    pub fuel_gas: f64,
    pub units: BTreeMap<ProcessUnit, UnitReport>,
    pub products: BTreeMap<Product, ProductReport>,
    pub tanks: BTreeMap<BufferTank, TankReport>,
    /// Non-zero arc flows
    pub flows: Vec<FlowReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub throughput: f64,
    pub capacity: f64,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductReport {
    pub volume: f64,
    pub demand: f64,
    /// Volume-weighted blend qualities, omitted when nothing is blended
    pub qualities: BTreeMap<Quality, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TankReport {
    pub volume: f64,
    pub height: f64,
    pub max_height: f64,
    pub inflow: f64,
    pub outflow: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub arc: FlowKey,
    pub rate: f64,
}

impl ProfitBreakdown {
    fn new(model: &RefineryModel, solution: &Solution) -> Self {
        let data = &model.data;
        let dt = data.period_length;
        let mut profit = ProfitBreakdown::default();

        for t in 1..=model.periods() {
            for product in Product::ALL {
                if let Some(product_data) = data.products.get(&product) {
                    let sold = model.node_inflow(solution, product.outlet(), t);
                    profit.product_revenue += dt * product_data.price * sold;
                }
            }
            profit.fuel_gas_credit += dt * data.fuel_gas_value * model.node_inflow(solution, Node::FgSink, t);
            profit.crude_cost += dt * data.crude.price * model.unit_inlet(solution, ProcessUnit::Ad, t);
            for unit in ProcessUnit::ALL {
                if let Some(unit_data) = data.units.get(&unit) {
                    profit.operating_cost += dt * unit_data.operating_cost * model.unit_inlet(solution, unit, t);
                }
            }
            for &tank in model.network.tanks() {
                if let Some(tank_data) = data.tanks.get(&tank) {
                    let inflow = model.node_inflow(solution, tank.node(), t);
                    profit.tank_processing_cost += dt * tank_data.processing_cost * inflow;
                    profit.tank_holding_cost += dt * tank_data.holding_cost * model.inventory(solution, tank, t);
                }
            }
        }

        profit.total = profit.product_revenue + profit.fuel_gas_credit
            - profit.crude_cost
            - profit.operating_cost
            - profit.tank_processing_cost
            - profit.tank_holding_cost;
        profit
    }
}

impl PeriodReport {
    fn new(model: &RefineryModel, solution: &Solution, t: usize) -> Self {
        let data = &model.data;

        let units = ProcessUnit::ALL
            .into_iter()
            .map(|unit| {
                let report = UnitReport {
                    throughput: model.unit_inlet(solution, unit, t),
                    capacity: data.units.get(&unit).map_or(0.0, |u| u.capacity),
                    running: !data.is_shut_down(unit, t),
                };
                (unit, report)
            })
            .collect();

        let products = Product::ALL
            .into_iter()
            .map(|product| {
                let volume = model.node_inflow(solution, product.outlet(), t);
                let demand = data.products.get(&product).map_or(0.0, |p| p.demand_at(t));
                let qualities = if volume > EPSILON {
                    blend_qualities(model, solution, product, t)
                } else {
                    BTreeMap::new()
                };
                (product, ProductReport { volume, demand, qualities })
            })
            .collect();

        let tanks = model
            .network
            .tanks()
            .iter()
            .map(|&tank| {
                let report = TankReport {
                    volume: model.inventory(solution, tank, t),
                    height: model.height(solution, tank, t),
                    max_height: data.tanks.get(&tank).map_or(0.0, |k| k.max_height),
                    inflow: model.node_inflow(solution, tank.node(), t),
                    outflow: model.node_outflow(solution, tank.node(), t),
                };
                (tank, report)
            })
            .collect();

        let flows = model
            .network
            .arcs()
            .iter()
            .map(|arc| FlowReport { arc: *arc, rate: model.flow(solution, arc, t) })
            .filter(|f| f.rate > EPSILON)
            .collect();

        Self {
            period: t,
            crude_intake: model.unit_inlet(solution, ProcessUnit::Ad, t),
            fuel_gas: model.node_inflow(solution, Node::FgSink, t),
            units,
            products,
            tanks,
            flows,
        }
    }
}

/// Weighted average of each specified quality over the streams entering a blend tank
fn blend_qualities(model: &RefineryModel, solution: &Solution, product: Product, t: usize) -> BTreeMap<Quality, f64> {
    let Some(product_data) = model.data.products.get(&product) else {
        return BTreeMap::new();
    };
    let inputs: Vec<(Material, f64)> = model
        .network
        .inflows(product.blend_tank())
        .map(|(_, arc)| (arc.material, model.flow(solution, arc, t)))
        .collect();
    let total: f64 = inputs.iter().map(|(_, rate)| rate).sum();
    if total <= EPSILON {
        return BTreeMap::new();
    }

    let mut qualities = BTreeMap::new();
    for spec in &product_data.specs {
        let weighted: f64 = inputs
            .iter()
            .map(|(material, rate)| rate * model.data.quality(*material, spec.quality).unwrap_or(0.0))
            .sum();
        qualities.insert(spec.quality, weighted / total);
    }
    qualities
}

impl RefineryReport {
    pub fn new(model: &RefineryModel, solution: &Solution) -> Self {
        let optimal = solution.status.is_optimal();
        let (profit, periods) = if optimal {
            let periods = (1..=model.periods())
                .map(|t| PeriodReport::new(model, solution, t))
                .collect();
            (Some(ProfitBreakdown::new(model, solution)), periods)
        } else {
            (None, Vec::new())
        };

        Self {
            status: solution.status,
            objective_value: optimal.then_some(solution.objective_value),
            profit,
            periods,
            violations: solution.violations.clone(),
        }
    }

    pub fn total_profit(&self) -> Option<f64> {
        self.profit.as_ref().map(|p| p.total)
    }
}

impl fmt::Display for RefineryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {}", self.status.label())?;

        if let Some(profit) = &self.profit {
            writeln!(f, "Total profit: {:.2}", profit.total)?;
            writeln!(f)?;
            writeln!(f, "Profit breakdown:")?;
            writeln!(f, "  {:22} {:14.2}", "product revenue", profit.product_revenue)?;
            writeln!(f, "  {:22} {:14.2}", "fuel gas credit", profit.fuel_gas_credit)?;
            writeln!(f, "  {:22} {:14.2}", "crude cost", -profit.crude_cost)?;
            writeln!(f, "  {:22} {:14.2}", "operating cost", -profit.operating_cost)?;
            if profit.tank_processing_cost != 0.0 || profit.tank_holding_cost != 0.0 {
                writeln!(f, "  {:22} {:14.2}", "tank processing", -profit.tank_processing_cost)?;
                writeln!(f, "  {:22} {:14.2}", "tank holding", -profit.tank_holding_cost)?;
            }
        }

        for period in &self.periods {
            writeln!(f)?;
            writeln!(f, "Period {}: crude {:.1}, fuel gas {:.1}", period.period, period.crude_intake, period.fuel_gas)?;

            writeln!(f, "  Units:")?;
            for (unit, report) in &period.units {
                let state = if report.running { "" } else { " (shut down)" };
                writeln!(
                    f,
                    "    {:6} {:12.1} / {:.0}{}",
                    unit.name(),
                    report.throughput,
                    report.capacity,
                    state
                )?;
            }

            writeln!(f, "  Products:")?;
            for (product, report) in &period.products {
                let qualities: Vec<String> = report
                    .qualities
                    .iter()
                    .map(|(q, v)| format!("{} {:.2}", q, v))
                    .collect();
                writeln!(
                    f,
                    "    {:6} {:12.1} (demand {:.0}) {}",
                    product.name(),
                    report.volume,
                    report.demand,
                    qualities.join(", ")
                )?;
            }

            if !period.tanks.is_empty() {
                writeln!(f, "  Buffer tanks:")?;
                for (tank, report) in &period.tanks {
                    writeln!(
                        f,
                        "    {:8} volume {:12.1}  height {:6.2}/{:.0}  in {:10.1}  out {:10.1}",
                        tank.name(),
                        report.volume,
                        report.height,
                        report.max_height,
                        report.inflow,
                        report.outflow
                    )?;
                }
            }

            writeln!(f, "  Flows:")?;
            for flow in &period.flows {
                writeln!(f, "    {:28} {:12.1}", flow.arc.to_string(), flow.rate)?;
            }
        }

        if !self.violations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Violated constraints (relaxed solution):")?;
            for v in &self.violations {
                writeln!(f, "  - {}", v.description)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Bound, RefineryData, Shutdown};
    use refinery_solver::Solver;

    fn solved(data: &RefineryData) -> (RefineryModel, Solution) {
        let model = RefineryModel::build(data).unwrap();
        let solution = model.solve(&Solver::new());
        (model, solution)
    }

    #[test]
    fn test_profit_matches_objective() {
        let mut data = RefineryData { periods: 2, ..RefineryData::default() }.with_tanks(&BufferTank::ALL);
        data.period_length = 2.0;
        let (model, solution) = solved(&data);
        assert!(solution.status.is_optimal());

        let report = RefineryReport::new(&model, &solution);
        let profit = report.profit.as_ref().unwrap();
        let tol = 1e-6 * (1.0 + solution.objective_value.abs());
        assert!(
            (profit.total - solution.objective_value).abs() < tol,
            "breakdown {} vs objective {}",
            profit.total,
            solution.objective_value
        );
        assert!(profit.total > 0.0);
        assert_eq!(report.objective_value, Some(solution.objective_value));
        assert!(profit.tank_processing_cost >= 0.0);
        assert_eq!(report.periods.len(), 2);
    }

    #[test]
    fn test_period_figures() {
        let data = RefineryData { periods: 2, ..RefineryData::default() }
            .with_shutdowns(vec![Shutdown::new(ProcessUnit::Cc, 2)]);
        let (model, solution) = solved(&data);
        let report = RefineryReport::new(&model, &solution);

        let second = &report.periods[1];
        assert_eq!(second.period, 2);
        assert!(!second.units[&ProcessUnit::Cc].running);
        assert!(second.units[&ProcessUnit::Cc].throughput.abs() < 1e-6);
        assert!(second.tanks.is_empty());
        assert!(second.flows.iter().all(|f| f.arc.to != Node::Cc));

        let pg_data = &data.products[&Product::Pg];
        let ron_min = pg_data.spec(Quality::Ron, Bound::Min).unwrap();
        let rvp_max = pg_data.spec(Quality::Rvp, Bound::Max).unwrap();
        let sulfur_max = data.products[&Product::Df].spec(Quality::Sulfur, Bound::Max).unwrap();
        for period in &report.periods {
            let pg = &period.products[&Product::Pg];
            assert!(pg.volume >= pg.demand - 1e-3);
            assert!(pg.qualities[&Quality::Ron] >= ron_min - 1e-6);
            assert!(pg.qualities[&Quality::Rvp] <= rvp_max + 1e-6);
            let df = &period.products[&Product::Df];
            assert!(df.qualities[&Quality::Sulfur] <= sulfur_max + 1e-6);
        }

        let text = report.to_string();
        assert!(text.starts_with("Status: OPTIMAL"));
        assert!(text.contains("Period 2"));
        assert!(text.contains("(shut down)"));
    }

    #[test]
    fn test_infeasible_report_lists_violations() {
        let data = RefineryData { periods: 1, ..RefineryData::default() }
            .with_shutdowns(vec![Shutdown::new(ProcessUnit::Rf, 1), Shutdown::new(ProcessUnit::Cc, 1)]);
        let (model, solution) = solved(&data);
        let report = RefineryReport::new(&model, &solution);

        assert_eq!(report.status, SolutionStatus::Infeasible);
        assert!(report.profit.is_none());
        assert!(report.objective_value.is_none());
        assert!(report.periods.is_empty());
        assert!(!report.violations.is_empty());
        assert!(report.to_string().contains("Violated constraints"));

        // The relaxed plan's objective stays out of the published report
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["objective_value"].is_null());
        assert!(json["profit"].is_null());
    }

    #[test]
    fn test_report_serializes() {
        let data = RefineryData { periods: 1, ..RefineryData::default() }.with_tanks(&[BufferTank::Ccg]);
        let (model, solution) = solved(&data);
        let report = RefineryReport::new(&model, &solution);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "Optimal");
        assert!(json["periods"][0]["units"]["rf"]["running"].as_bool().unwrap());
        assert!(json["periods"][0]["tanks"]["ccg_tk"].is_object());
        assert!(json["profit"]["total"].is_number());
    }
}
