//! Assembles the multi-period refinery LP from scenario data.
//!
//! Variables are laid out period by period: one flow per network arc, then
//! inventory and height for each enabled buffer tank. Every row is named
//! `{family}[{period}]` so solutions and duals can be read back by name.

use refinery_solver::{ConstraintOp, LpProblem, ProblemError, Solution, Solver};
use thiserror::Error;
use tracing::debug;

use crate::data::{Bound, RefineryData};
use crate::network::{BufferTank, FlowKey, Material, Network, Node, NodeKind, ProcessUnit, Product, Quality};

/// Liquid yields may exceed one by this much before the data is rejected
const YIELD_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Scenario has no periods")]
    NoPeriods,
    #[error("Period length must be positive, got {0}")]
    InvalidPeriodLength(f64),
    #[error("Demand for {product} has {found} entries but there are {periods} periods")]
    DemandLength { product: Product, found: usize, periods: usize },
    #[error("Shutdown of {unit} in period {period} is outside 1..={periods}")]
    ShutdownPeriod { unit: ProcessUnit, period: usize, periods: usize },
    #[error("{unit} has yields for {material} but is not fed {material}")]
    UnknownFeed { unit: ProcessUnit, material: Material },
    #[error("{unit} cannot produce {material}")]
    UnknownYield { unit: ProcessUnit, material: Material },
    #[error("{unit} has no yields for feed {feed}")]
    MissingYields { unit: ProcessUnit, feed: Material },
    #[error("{unit} liquid yields from {feed} sum to {total}, more than the feed")]
    YieldExceedsFeed { unit: ProcessUnit, feed: Material, total: f64 },
    #[error("Missing data for unit {0}")]
    MissingUnit(ProcessUnit),
    #[error("Missing data for product {0}")]
    MissingProduct(Product),
    #[error("{product} has a {quality} spec but {material} has no {quality} value")]
    MissingQuality { quality: Quality, material: Material, product: Product },
    #[error("{0} needs a positive radius and max height")]
    TankGeometry(BufferTank),
    #[error("{tank} initial volume {volume} is outside 0..={capacity}")]
    TankInitialVolume { tank: BufferTank, volume: f64, capacity: f64 },
    #[error("Network has no arc {0}")]
    MissingArc(FlowKey),
    #[error("{field} must be non-negative, got {value}")]
    Negative { field: String, value: f64 },
    #[error(transparent)]
    Problem(#[from] ProblemError),
}

/// A refinery scenario compiled into an LP
#[derive(Debug, Clone)]
pub struct RefineryModel {
    pub data: RefineryData,
    pub network: Network,
    pub problem: LpProblem,
    /// Per period, the variable of each arc in `network.arcs()` order
    flow_vars: Vec<Vec<usize>>,
    /// Per period, the inventory variable of each tank in `network.tanks()` order
    inventory_vars: Vec<Vec<usize>>,
    height_vars: Vec<Vec<usize>>,
}

fn push_var(variables: &mut Vec<String>, name: String) -> usize {
    variables.push(name);
    variables.len() - 1
}

impl RefineryModel {
    pub fn build(data: &RefineryData) -> Result<Self, BuildError> {
        validate(data)?;

        let network = Network::new(&data.enabled_tanks());
        let mut variables = Vec::new();
        let mut flow_vars = Vec::with_capacity(data.periods);
        let mut inventory_vars = Vec::with_capacity(data.periods);
        let mut height_vars = Vec::with_capacity(data.periods);

        for t in 1..=data.periods {
            let flows: Vec<usize> = network
                .arcs()
                .iter()
                .map(|arc| push_var(&mut variables, format!("x[{},{}]", arc, t)))
                .collect();
            flow_vars.push(flows);

            let mut inventory = Vec::with_capacity(network.tanks().len());
            let mut height = Vec::with_capacity(network.tanks().len());
            for tank in network.tanks() {
                inventory.push(push_var(&mut variables, format!("v[{},{}]", tank, t)));
                height.push(push_var(&mut variables, format!("h[{},{}]", tank, t)));
            }
            inventory_vars.push(inventory);
            height_vars.push(height);
        }

        let mut model = Self {
            data: data.clone(),
            network,
            problem: LpProblem::new(variables),
            flow_vars,
            inventory_vars,
            height_vars,
        };

        let objective = model.objective();
        model.problem.set_objective(objective, false);

        for t in 1..=data.periods {
            model.add_crude_rows(t)?;
            model.add_unit_rows(t)?;
            model.add_splitter_rows(t)?;
            model.add_product_rows(t)?;
            model.add_tank_rows(t)?;
        }

        debug!(
            periods = data.periods,
            tanks = model.network.tanks().len(),
            variables = model.problem.num_variables(),
            constraints = model.problem.num_constraints(),
            "built refinery model"
        );
        Ok(model)
    }

    pub fn periods(&self) -> usize {
        self.data.periods
    }

    pub fn solve(&self, solver: &Solver) -> Solution {
        let solution = solver.solve(&self.problem);
        debug!(
            status = solution.status.label(),
            objective = solution.objective_value,
            iterations = solution.iterations,
            "solved refinery model"
        );
        solution
    }

    /// Variable index of an arc's flow in a 1-based period
    pub fn flow_var(&self, key: &FlowKey, period: usize) -> Option<usize> {
        let arc = self.network.arc_index(key)?;
        self.flow_vars.get(period.checked_sub(1)?)?.get(arc).copied()
    }

    pub fn inventory_var(&self, tank: BufferTank, period: usize) -> Option<usize> {
        let k = self.network.tanks().iter().position(|t| *t == tank)?;
        self.inventory_vars.get(period.checked_sub(1)?)?.get(k).copied()
    }

    pub fn height_var(&self, tank: BufferTank, period: usize) -> Option<usize> {
        let k = self.network.tanks().iter().position(|t| *t == tank)?;
        self.height_vars.get(period.checked_sub(1)?)?.get(k).copied()
    }

    /// Solved flow on an arc, zero for arcs absent from this configuration
    pub fn flow(&self, solution: &Solution, key: &FlowKey, period: usize) -> f64 {
        self.flow_var(key, period).map_or(0.0, |v| solution.value(v))
    }

    pub fn inventory(&self, solution: &Solution, tank: BufferTank, period: usize) -> f64 {
        self.inventory_var(tank, period).map_or(0.0, |v| solution.value(v))
    }

    pub fn height(&self, solution: &Solution, tank: BufferTank, period: usize) -> f64 {
        self.height_var(tank, period).map_or(0.0, |v| solution.value(v))
    }

    pub fn node_inflow(&self, solution: &Solution, node: Node, period: usize) -> f64 {
        self.network
            .inflows(node)
            .map(|(_, arc)| self.flow(solution, arc, period))
            .sum()
    }

    pub fn node_outflow(&self, solution: &Solution, node: Node, period: usize) -> f64 {
        self.network
            .outflows(node)
            .map(|(_, arc)| self.flow(solution, arc, period))
            .sum()
    }

    /// Inflow minus outflow; zero at splitters and blend tanks
    pub fn node_balance(&self, solution: &Solution, node: Node, period: usize) -> f64 {
        self.node_inflow(solution, node, period) - self.node_outflow(solution, node, period)
    }

    /// Total feed to a unit, including feed drawn from a buffer tank
    pub fn unit_inlet(&self, solution: &Solution, unit: ProcessUnit, period: usize) -> f64 {
        self.node_inflow(solution, unit.node(), period)
    }

    fn arc_vars(&self, t: usize) -> &[usize] {
        &self.flow_vars[t - 1]
    }

    fn inflow_terms(&self, node: Node, t: usize, coef: f64) -> Vec<(usize, f64)> {
        let vars = self.arc_vars(t);
        self.network.inflows(node).map(|(i, _)| (vars[i], coef)).collect()
    }

    fn outflow_terms(&self, node: Node, t: usize, coef: f64) -> Vec<(usize, f64)> {
        let vars = self.arc_vars(t);
        self.network.outflows(node).map(|(i, _)| (vars[i], coef)).collect()
    }

    fn arc_term(&self, key: &FlowKey, t: usize) -> Result<usize, BuildError> {
        self.flow_var(key, t).ok_or(BuildError::MissingArc(*key))
    }

    /// Money per unit of flow on an arc, before scaling by period length
    fn arc_value(&self, arc: &FlowKey) -> f64 {
        let mut value = 0.0;
        if arc.from == Node::CrudeSource {
            value -= self.data.crude.price;
        }
        match arc.to.kind() {
            NodeKind::Outlet => {
                if let Some(data) = Product::ALL
                    .into_iter()
                    .find(|p| p.outlet() == arc.to)
                    .and_then(|p| self.data.products.get(&p))
                {
                    value += data.price;
                }
            }
            NodeKind::Sink => value += self.data.fuel_gas_value,
            NodeKind::Unit => {
                if let Some(data) = ProcessUnit::ALL
                    .into_iter()
                    .find(|u| u.node() == arc.to)
                    .and_then(|u| self.data.units.get(&u))
                {
                    value -= data.operating_cost;
                }
            }
            NodeKind::BufferTank => {
                if let Some(data) = BufferTank::ALL
                    .into_iter()
                    .find(|k| k.node() == arc.to)
                    .and_then(|k| self.data.tanks.get(&k))
                {
                    value -= data.processing_cost;
                }
            }
            _ => {}
        }
        value
    }

    fn objective(&self) -> Vec<f64> {
        let dt = self.data.period_length;
        let mut coefficients = vec![0.0; self.problem.num_variables()];
        for t in 1..=self.periods() {
            for (arc, &var) in self.network.arcs().iter().zip(self.arc_vars(t)) {
                coefficients[var] += dt * self.arc_value(arc);
            }
            for (tank, &var) in self.network.tanks().iter().zip(&self.inventory_vars[t - 1]) {
                if let Some(data) = self.data.tanks.get(tank) {
                    coefficients[var] -= dt * data.holding_cost;
                }
            }
        }
        coefficients
    }

    fn add_crude_rows(&mut self, t: usize) -> Result<(), BuildError> {
        let crude = self.arc_term(&FlowKey::new(Material::Crude, Node::CrudeSource, Node::Ad), t)?;
        self.problem.add_sparse_constraint(
            format!("crude_limit[{}]", t),
            &[(crude, 1.0)],
            ConstraintOp::Le,
            self.data.crude.max_intake,
        )?;
        if let Some(fixed) = self.data.crude.fixed_intake {
            self.problem
                .add_sparse_constraint(format!("crude_fixed[{}]", t), &[(crude, 1.0)], ConstraintOp::Eq, fixed)?;
        }
        Ok(())
    }

    fn add_unit_rows(&mut self, t: usize) -> Result<(), BuildError> {
        for unit in ProcessUnit::ALL {
            let unit_data = self.data.units.get(&unit).ok_or(BuildError::MissingUnit(unit))?;
            let node = unit.node();
            let inlet = self.inflow_terms(node, t, 1.0);

            self.problem.add_sparse_constraint(
                format!("{}_capacity[{}]", unit, t),
                &inlet,
                ConstraintOp::Le,
                unit_data.capacity,
            )?;

            if self.data.is_shut_down(unit, t) {
                self.problem
                    .add_sparse_constraint(format!("{}_shutdown[{}]", unit, t), &inlet, ConstraintOp::Le, 0.0)?;
            } else if unit_data.min_throughput > 0.0 {
                self.problem.add_sparse_constraint(
                    format!("{}_min_throughput[{}]", unit, t),
                    &inlet,
                    ConstraintOp::Ge,
                    unit_data.min_throughput,
                )?;
            }

            // Each product stream is a fixed fraction of each feed
            let vars = &self.flow_vars[t - 1];
            for material in self.network.outlet_materials(node) {
                let mut terms: Vec<(usize, f64)> = self
                    .network
                    .outflows(node)
                    .filter(|(_, arc)| arc.material == material)
                    .map(|(i, _)| (vars[i], 1.0))
                    .collect();
                for (i, arc) in self.network.inflows(node) {
                    let gamma = unit_data
                        .yields
                        .get(&arc.material)
                        .and_then(|out| out.get(&material))
                        .copied()
                        .unwrap_or(0.0);
                    if gamma != 0.0 {
                        terms.push((vars[i], -gamma));
                    }
                }
                self.problem.add_sparse_constraint(
                    format!("{}_yield[{},{}]", unit, material, t),
                    &terms,
                    ConstraintOp::Eq,
                    0.0,
                )?;
            }
        }
        Ok(())
    }

    fn add_splitter_rows(&mut self, t: usize) -> Result<(), BuildError> {
        for sp in Node::SPLITTERS {
            let mut terms = self.inflow_terms(sp, t, 1.0);
            terms.extend(self.outflow_terms(sp, t, -1.0));
            self.problem
                .add_sparse_constraint(format!("{}_balance[{}]", sp, t), &terms, ConstraintOp::Eq, 0.0)?;
        }
        Ok(())
    }

    fn add_product_rows(&mut self, t: usize) -> Result<(), BuildError> {
        for product in Product::ALL {
            let product_data = self.data.products.get(&product).ok_or(BuildError::MissingProduct(product))?;
            let tank = product.blend_tank();
            let outlet = self.arc_term(&FlowKey::new(product.material(), tank, product.outlet()), t)?;

            self.problem.add_sparse_constraint(
                format!("{}_demand[{}]", product, t),
                &[(outlet, 1.0)],
                ConstraintOp::Ge,
                product_data.demand_at(t),
            )?;

            let mut blend = vec![(outlet, 1.0)];
            blend.extend(self.inflow_terms(tank, t, -1.0));
            self.problem
                .add_sparse_constraint(format!("{}_blend[{}]", product, t), &blend, ConstraintOp::Eq, 0.0)?;

            // Linear blending: sum of q_i * F_i against spec * product flow
            let vars = &self.flow_vars[t - 1];
            for spec in &product_data.specs {
                let mut terms = Vec::new();
                for (i, arc) in self.network.inflows(tank) {
                    let q = self.data.quality(arc.material, spec.quality).ok_or(BuildError::MissingQuality {
                        quality: spec.quality,
                        material: arc.material,
                        product,
                    })?;
                    terms.push((vars[i], q));
                }
                terms.push((outlet, -spec.value));
                let op = match spec.bound {
                    Bound::Min => ConstraintOp::Ge,
                    Bound::Max => ConstraintOp::Le,
                };
                self.problem.add_sparse_constraint(
                    format!("{}_{}_{}[{}]", product, spec.quality, spec.bound.name(), t),
                    &terms,
                    op,
                    0.0,
                )?;
            }
        }
        Ok(())
    }

    fn add_tank_rows(&mut self, t: usize) -> Result<(), BuildError> {
        let dt = self.data.period_length;
        for (k, &tank) in self.network.tanks().iter().enumerate() {
            let Some(tank_data) = self.data.tanks.get(&tank) else {
                continue;
            };
            let node = tank.node();
            let volume = self.inventory_vars[t - 1][k];
            let height = self.height_vars[t - 1][k];

            // V_t - V_{t-1} - dt * (in - out) = 0, with V_0 on the right-hand side
            let mut terms = vec![(volume, 1.0)];
            let mut rhs = 0.0;
            if t == 1 {
                rhs = tank_data.initial_volume;
            } else {
                terms.push((self.inventory_vars[t - 2][k], -1.0));
            }
            terms.extend(self.inflow_terms(node, t, -dt));
            terms.extend(self.outflow_terms(node, t, dt));
            self.problem
                .add_sparse_constraint(format!("{}_inventory[{}]", tank, t), &terms, ConstraintOp::Eq, rhs)?;

            self.problem.add_sparse_constraint(
                format!("{}_height[{}]", tank, t),
                &[(height, tank_data.area()), (volume, -1.0)],
                ConstraintOp::Eq,
                0.0,
            )?;
            self.problem.add_sparse_constraint(
                format!("{}_height_max[{}]", tank, t),
                &[(height, 1.0)],
                ConstraintOp::Le,
                tank_data.max_height,
            )?;
        }
        Ok(())
    }
}

fn check_non_negative(field: impl FnOnce() -> String, value: f64) -> Result<(), BuildError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(BuildError::Negative { field: field(), value })
    }
}

/// Reject scenario data the LP cannot represent
fn validate(data: &RefineryData) -> Result<(), BuildError> {
    if data.periods == 0 {
        return Err(BuildError::NoPeriods);
    }
    if !(data.period_length > 0.0 && data.period_length.is_finite()) {
        return Err(BuildError::InvalidPeriodLength(data.period_length));
    }
    check_non_negative(|| "crude.price".to_string(), data.crude.price)?;
    check_non_negative(|| "crude.max_intake".to_string(), data.crude.max_intake)?;
    if let Some(fixed) = data.crude.fixed_intake {
        check_non_negative(|| "crude.fixed_intake".to_string(), fixed)?;
    }
    check_non_negative(|| "fuel_gas_value".to_string(), data.fuel_gas_value)?;

    // Tank routes carry the same materials as the direct arcs
    let network = Network::new(&[]);
    for unit in ProcessUnit::ALL {
        let unit_data = data.units.get(&unit).ok_or(BuildError::MissingUnit(unit))?;
        check_non_negative(|| format!("{}.capacity", unit), unit_data.capacity)?;
        check_non_negative(|| format!("{}.min_throughput", unit), unit_data.min_throughput)?;
        check_non_negative(|| format!("{}.operating_cost", unit), unit_data.operating_cost)?;

        let feeds = network.inlet_materials(unit.node());
        let outputs = network.outlet_materials(unit.node());
        if let Some(feed) = feeds.iter().find(|f| !unit_data.yields.contains_key(*f)) {
            return Err(BuildError::MissingYields { unit, feed: *feed });
        }
        for (feed, out) in &unit_data.yields {
            if !feeds.contains(feed) {
                return Err(BuildError::UnknownFeed { unit, material: *feed });
            }
            for (material, gamma) in out {
                if !outputs.contains(material) {
                    return Err(BuildError::UnknownYield { unit, material: *material });
                }
                check_non_negative(|| format!("{}.yields.{}.{}", unit, feed, material), *gamma)?;
            }
            let liquid: f64 = out.iter().filter(|(m, _)| m.is_liquid()).map(|(_, y)| y).sum();
            if liquid > 1.0 + YIELD_TOLERANCE {
                return Err(BuildError::YieldExceedsFeed { unit, feed: *feed, total: liquid });
            }
        }
    }

    for product in Product::ALL {
        let product_data = data.products.get(&product).ok_or(BuildError::MissingProduct(product))?;
        let found = product_data.demand.len();
        if found > 1 && found != data.periods {
            return Err(BuildError::DemandLength { product, found, periods: data.periods });
        }
        for demand in &product_data.demand {
            check_non_negative(|| format!("{}.demand", product), *demand)?;
        }
        for spec in &product_data.specs {
            for material in network.inlet_materials(product.blend_tank()) {
                if data.quality(material, spec.quality).is_none() {
                    return Err(BuildError::MissingQuality { quality: spec.quality, material, product });
                }
            }
        }
    }

    for shutdown in &data.shutdowns {
        if shutdown.period == 0 || shutdown.period > data.periods {
            return Err(BuildError::ShutdownPeriod {
                unit: shutdown.unit,
                period: shutdown.period,
                periods: data.periods,
            });
        }
    }

    for tank in data.enabled_tanks() {
        let Some(tank_data) = data.tanks.get(&tank) else {
            continue;
        };
        let positive = |x: f64| x > 0.0 && x.is_finite();
        if !positive(tank_data.radius) || !positive(tank_data.max_height) {
            return Err(BuildError::TankGeometry(tank));
        }
        let capacity = tank_data.capacity();
        if !(tank_data.initial_volume >= 0.0 && tank_data.initial_volume <= capacity) {
            return Err(BuildError::TankInitialVolume {
                tank,
                volume: tank_data.initial_volume,
                capacity,
            });
        }
        check_non_negative(|| format!("{}.processing_cost", tank), tank_data.processing_cost)?;
        check_non_negative(|| format!("{}.holding_cost", tank), tank_data.holding_cost)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Shutdown;
    use refinery_solver::SolutionStatus;

    fn periods(n: usize) -> RefineryData {
        RefineryData { periods: n, ..RefineryData::default() }
    }

    /// Every row holds, relative to the magnitude of its terms
    fn assert_rows_hold(model: &RefineryModel, solution: &Solution) {
        for c in &model.problem.constraints {
            let scale: f64 = c
                .coefficients
                .iter()
                .zip(&solution.values)
                .map(|(a, x)| (a * x).abs())
                .sum();
            let tol = 1e-6 * (1.0 + scale + c.rhs.abs());
            assert!(
                c.is_satisfied(&solution.values, tol),
                "{} violated: lhs {} {} {}",
                c.name,
                c.lhs(&solution.values),
                c.op.symbol(),
                c.rhs
            );
        }
    }

    #[test]
    fn test_build_structure() {
        let model = RefineryModel::build(&periods(2)).unwrap();
        assert_eq!(model.problem.num_variables(), 66);
        assert_eq!(model.problem.num_constraints(), 78);
        assert!(!model.problem.objective.minimize);

        for name in [
            "crude_limit[1]",
            "ad_capacity[2]",
            "rf_capacity[1]",
            "rf_min_throughput[1]",
            "cc_min_throughput[2]",
            "ad_yield[srn,1]",
            "cc_yield[fg,2]",
            "srn_sp_balance[2]",
            "pg_demand[1]",
            "pg_blend[1]",
            "pg_ron_min[1]",
            "rg_rvp_max[2]",
            "df_sulfur_max[2]",
            "fo_density_max[1]",
        ] {
            assert!(model.problem.constraint(name).is_some(), "missing {}", name);
        }
        assert!(model.problem.constraint("ad_min_throughput[1]").is_none());
        assert!(model.problem.constraint("crude_fixed[1]").is_none());
        assert!(model.problem.constraint("rf_shutdown[1]").is_none());

        let key = FlowKey::new(Material::Srn, Node::SrnSp, Node::Rf);
        let var = model.flow_var(&key, 2).unwrap();
        assert_eq!(model.problem.variable_index("x[srn,srn_sp,rf,2]"), Some(var));
        assert!(model.flow_var(&key, 3).is_none());
        assert!(model.flow_var(&key, 0).is_none());
    }

    #[test]
    fn test_yield_row_coefficients() {
        let model = RefineryModel::build(&periods(1)).unwrap();
        let row = model.problem.constraint("cc_yield[ccg,1]").unwrap();
        let srds = model.flow_var(&FlowKey::new(Material::Srds, Node::SrdsSp, Node::Cc), 1).unwrap();
        let srfo = model.flow_var(&FlowKey::new(Material::Srfo, Node::SrfoSp, Node::Cc), 1).unwrap();
        let ccg = model.flow_var(&FlowKey::new(Material::Ccg, Node::Cc, Node::CcgSp), 1).unwrap();
        assert_eq!(row.coefficients[ccg], 1.0);
        assert_eq!(row.coefficients[srds], -0.619);
        assert_eq!(row.coefficients[srfo], -0.688);
        assert_eq!(row.op, ConstraintOp::Eq);
    }

    #[test]
    fn test_tank_rows_and_variables() {
        let mut data = periods(2).with_tanks(&BufferTank::ALL);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Rfg) {
            tank.initial_volume = 1_000.0;
        }
        let model = RefineryModel::build(&data).unwrap();
        assert_eq!(model.problem.num_variables(), 2 * (41 + 8));
        assert_eq!(model.problem.num_constraints(), 2 * (39 + 12));

        let v = model.inventory_var(BufferTank::Rfg, 2).unwrap();
        let h = model.height_var(BufferTank::Rfg, 2).unwrap();
        assert_eq!(model.problem.variable_index("v[rfg_tk,2]"), Some(v));
        assert_eq!(model.problem.variable_index("h[rfg_tk,2]"), Some(h));

        assert_eq!(model.problem.constraint("rfg_tk_inventory[1]").unwrap().rhs, 1_000.0);
        let second = model.problem.constraint("rfg_tk_inventory[2]").unwrap();
        assert_eq!(second.rhs, 0.0);
        assert_eq!(second.coefficients[model.inventory_var(BufferTank::Rfg, 1).unwrap()], -1.0);

        let height = model.problem.constraint("rfg_tk_height[2]").unwrap();
        assert!((height.coefficients[h] - data.tanks[&BufferTank::Rfg].area()).abs() < 1e-9);
        assert_eq!(model.problem.constraint("rfg_tk_height_max[2]").unwrap().rhs, 20.0);

        // Holding cost lands on the inventory variable
        assert_eq!(model.problem.objective.coefficients[v], -0.05);
    }

    #[test]
    fn test_shutdown_replaces_min_throughput() {
        let data = periods(2).with_shutdowns(vec![Shutdown::new(ProcessUnit::Rf, 2)]);
        let model = RefineryModel::build(&data).unwrap();
        assert!(model.problem.constraint("rf_min_throughput[1]").is_some());
        assert!(model.problem.constraint("rf_min_throughput[2]").is_none());
        let row = model.problem.constraint("rf_shutdown[2]").unwrap();
        assert_eq!(row.op, ConstraintOp::Le);
        assert_eq!(row.rhs, 0.0);
    }

    #[test]
    fn test_fixed_crude_single_period_is_profitable() {
        let mut data = periods(1);
        data.crude.fixed_intake = Some(100_000.0);
        let model = RefineryModel::build(&data).unwrap();
        let solution = model.solve(&Solver::new());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert!(solution.objective_value >= 0.0, "profit {}", solution.objective_value);
        assert_rows_hold(&model, &solution);

        let crude = model.flow(&solution, &FlowKey::new(Material::Crude, Node::CrudeSource, Node::Ad), 1);
        assert!((crude - 100_000.0).abs() < 1e-3);

        for sp in Node::SPLITTERS {
            let inflow = model.node_inflow(&solution, sp, 1);
            assert!(model.node_balance(&solution, sp, 1).abs() <= 1e-6 * (1.0 + inflow), "{}", sp);
            if inflow > 1e-6 {
                let fractions: f64 = model
                    .network
                    .outflows(sp)
                    .map(|(_, arc)| model.flow(&solution, arc, 1) / inflow)
                    .sum();
                assert!((fractions - 1.0).abs() < 1e-6, "{} fractions sum to {}", sp, fractions);
            }
        }
        for product in Product::ALL {
            let tank = product.blend_tank();
            let inflow = model.node_inflow(&solution, tank, 1);
            assert!(model.node_balance(&solution, tank, 1).abs() <= 1e-6 * (1.0 + inflow));
            assert!(model.node_outflow(&solution, tank, 1) >= 10_000.0 - 1e-3);
        }

        // Liquid products never exceed the feed
        for unit in ProcessUnit::ALL {
            let inlet = model.unit_inlet(&solution, unit, 1);
            let liquid: f64 = model
                .network
                .outflows(unit.node())
                .filter(|(_, arc)| arc.material.is_liquid())
                .map(|(_, arc)| model.flow(&solution, arc, 1))
                .sum();
            assert!(liquid <= inlet + 1e-6 * (1.0 + inlet), "{}", unit);
        }
    }

    #[test]
    fn test_shutdown_bounds_unit_inlet() {
        let data = periods(2).with_shutdowns(vec![Shutdown::new(ProcessUnit::Cc, 2)]);
        let model = RefineryModel::build(&data).unwrap();
        let solution = model.solve(&Solver::new());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert_rows_hold(&model, &solution);

        assert!(model.unit_inlet(&solution, ProcessUnit::Cc, 2).abs() < 1e-6);
        let cc = model.unit_inlet(&solution, ProcessUnit::Cc, 1);
        assert!((5_000.0 - 1e-6..=30_000.0 + 1e-6).contains(&cc), "cc inlet {}", cc);
        for t in 1..=2 {
            let rf = model.unit_inlet(&solution, ProcessUnit::Rf, t);
            assert!((5_000.0 - 1e-6..=25_000.0 + 1e-6).contains(&rf), "rf inlet {} in {}", rf, t);
        }
    }

    #[test]
    fn test_buffer_tanks_carry_reformer_outage() {
        let mut data = periods(2)
            .with_tanks(&BufferTank::ALL)
            .with_shutdowns(vec![Shutdown::new(ProcessUnit::Rf, 2)]);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Rfg) {
            tank.initial_volume = 30_000.0;
        }
        let model = RefineryModel::build(&data).unwrap();
        let solution = model.solve(&Solver::new());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert_rows_hold(&model, &solution);
        assert!(model.unit_inlet(&solution, ProcessUnit::Rf, 2).abs() < 1e-6);

        for &tank in model.network.tanks() {
            let tank_data = &data.tanks[&tank];
            let mut previous = tank_data.initial_volume;
            for t in 1..=2 {
                let volume = model.inventory(&solution, tank, t);
                let height = model.height(&solution, tank, t);
                assert!(height <= tank_data.max_height + 1e-6, "{} height {}", tank, height);
                assert!((tank_data.area() * height - volume).abs() <= 1e-6 * (1.0 + volume));

                let net = model.node_balance(&solution, tank.node(), t);
                let change = volume - previous;
                assert!((change - net).abs() <= 1e-6 * (1.0 + volume + previous), "{} in {}", tank, t);
                previous = volume;
            }
        }
    }

    #[test]
    fn test_small_tank_fills_to_height_cap() {
        let mut data = RefineryData::default()
            .with_tanks(&[BufferTank::Rfg])
            .with_shutdowns(vec![Shutdown::new(ProcessUnit::Rf, 3)]);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Rfg) {
            tank.radius = 10.0;
            tank.max_height = 10.0;
            tank.processing_cost = 0.0;
            tank.holding_cost = 0.0;
        }
        let model = RefineryModel::build(&data).unwrap();
        let solution = model.solve(&Solver::new());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert_rows_hold(&model, &solution);

        // Reformate is stocked up to the brim ahead of the outage
        let tank = &data.tanks[&BufferTank::Rfg];
        let height = model.height(&solution, BufferTank::Rfg, 2);
        let volume = model.inventory(&solution, BufferTank::Rfg, 2);
        assert!((height - 10.0).abs() < 1e-6, "height {}", height);
        assert!((volume - tank.capacity()).abs() < 1e-3, "volume {}", volume);
        assert!(
            solution
                .analysis
                .binding_constraints
                .iter()
                .any(|c| c == "rfg_tk_height_max[2]")
        );
        for t in 1..=data.periods {
            assert!(model.height(&solution, BufferTank::Rfg, t) <= tank.max_height + 1e-6);
        }
    }

    #[test]
    fn test_outage_without_tanks_is_infeasible() {
        let data = periods(1).with_shutdowns(vec![Shutdown::new(ProcessUnit::Rf, 1), Shutdown::new(ProcessUnit::Cc, 1)]);
        let model = RefineryModel::build(&data).unwrap();
        let solution = model.solve(&Solver::new());

        assert_eq!(solution.status, SolutionStatus::Infeasible);
        assert!(!solution.violations.is_empty());
    }

    #[test]
    fn test_rejects_bad_data() {
        assert_eq!(RefineryModel::build(&periods(0)).unwrap_err(), BuildError::NoPeriods);

        let data = RefineryData { period_length: 0.0, ..RefineryData::default() };
        assert_eq!(RefineryModel::build(&data).unwrap_err(), BuildError::InvalidPeriodLength(0.0));

        let data = periods(2).with_shutdowns(vec![Shutdown::new(ProcessUnit::Cc, 3)]);
        assert!(matches!(
            RefineryModel::build(&data),
            Err(BuildError::ShutdownPeriod { period: 3, periods: 2, .. })
        ));

        let mut data = periods(2);
        if let Some(pg) = data.products.get_mut(&Product::Pg) {
            pg.demand = vec![1.0, 2.0, 3.0];
        }
        assert_eq!(
            RefineryModel::build(&data).unwrap_err(),
            BuildError::DemandLength { product: Product::Pg, found: 3, periods: 2 }
        );

        let mut data = periods(1);
        if let Some(rf) = data.units.get_mut(&ProcessUnit::Rf) {
            rf.yields.insert(Material::Srds, Default::default());
        }
        assert_eq!(
            RefineryModel::build(&data).unwrap_err(),
            BuildError::UnknownFeed { unit: ProcessUnit::Rf, material: Material::Srds }
        );

        let mut data = periods(1);
        if let Some(rf) = data.units.get_mut(&ProcessUnit::Rf) {
            rf.yields.insert(Material::Srn, [(Material::Rfg, 1.2)].into_iter().collect());
        }
        assert!(matches!(
            RefineryModel::build(&data),
            Err(BuildError::YieldExceedsFeed { unit: ProcessUnit::Rf, .. })
        ));

        let mut data = periods(1);
        if let Some(rf) = data.units.get_mut(&ProcessUnit::Rf) {
            rf.yields.remove(&Material::Srn);
        }
        assert_eq!(
            RefineryModel::build(&data).unwrap_err(),
            BuildError::MissingYields { unit: ProcessUnit::Rf, feed: Material::Srn }
        );

        let mut data = periods(1);
        if let Some(out) = data.units.get_mut(&ProcessUnit::Rf).and_then(|rf| rf.yields.get_mut(&Material::Srn)) {
            out.insert(Material::Ccg, 0.05);
        }
        assert_eq!(
            RefineryModel::build(&data).unwrap_err(),
            BuildError::UnknownYield { unit: ProcessUnit::Rf, material: Material::Ccg }
        );

        let mut data = periods(1).with_tanks(&[BufferTank::Rfg]);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Rfg) {
            tank.radius = 0.0;
        }
        assert_eq!(RefineryModel::build(&data).unwrap_err(), BuildError::TankGeometry(BufferTank::Rfg));

        let mut data = periods(1).with_tanks(&[BufferTank::Ccfo]);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Ccfo) {
            tank.max_height = -1.0;
        }
        assert_eq!(RefineryModel::build(&data).unwrap_err(), BuildError::TankGeometry(BufferTank::Ccfo));

        // Geometry of a disabled tank is never looked at
        let mut data = periods(1);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Ccfo) {
            tank.radius = 0.0;
        }
        assert!(RefineryModel::build(&data).is_ok());

        let mut data = periods(1);
        data.qualities.remove(&Material::Ccg);
        assert!(matches!(
            RefineryModel::build(&data),
            Err(BuildError::MissingQuality { material: Material::Ccg, .. })
        ));

        let mut data = periods(1).with_tanks(&[BufferTank::Srn]);
        if let Some(tank) = data.tanks.get_mut(&BufferTank::Srn) {
            tank.initial_volume = 1e9;
        }
        assert!(matches!(
            RefineryModel::build(&data),
            Err(BuildError::TankInitialVolume { tank: BufferTank::Srn, .. })
        ));

        let mut data = periods(1);
        data.crude.max_intake = -1.0;
        let err = RefineryModel::build(&data).unwrap_err();
        assert_eq!(err.to_string(), "crude.max_intake must be non-negative, got -1");
    }
}
