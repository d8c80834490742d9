use std::collections::HashMap;

use tracing::{debug, warn};

use crate::problem::{Constraint, ConstraintOp, LpProblem};
use crate::solution::{Analysis, ConstraintViolation, ReducedCost, ShadowPrice, Solution, SolutionStatus};

/// Simplex solver for linear programming problems
#[derive(Debug, Clone)]
pub struct Solver {
    /// Maximum pivots (both phases) before giving up
    max_iterations: usize,
    /// Tolerance for pivot elements and reduced costs
    tolerance: f64,
    /// Relative tolerance for constraint residuals
    feasibility_tolerance: f64,
    /// Consecutive degenerate pivots before switching to Bland's rule
    degenerate_limit: usize,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
            degenerate_limit: 50,
        }
    }
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_feasibility_tolerance(mut self, tol: f64) -> Self {
        self.feasibility_tolerance = tol;
        self
    }

    /// Residual allowed on a constraint with the given right-hand side
    pub fn residual_tolerance(&self, rhs: f64) -> f64 {
        self.feasibility_tolerance * (1.0 + rhs.abs())
    }

    /// Solve the LP problem using the two-phase simplex method
    pub fn solve(&self, problem: &LpProblem) -> Solution {
        if let Err(e) = problem.validate() {
            warn!(error = %e, "rejecting malformed problem");
            return Solution::error();
        }

        debug!(
            variables = problem.num_variables(),
            constraints = problem.num_constraints(),
            "solving"
        );

        match self.solve_exact(problem) {
            Ok(solution) => solution,
            Err(SimplexResult::Infeasible) => {
                debug!("no feasible point, solving relaxation for diagnostics");
                self.solve_with_relaxation(problem)
            }
            Err(SimplexResult::Unbounded) => {
                warn!("problem is unbounded");
                Solution::unbounded()
            }
            Err(_) => {
                warn!(max_iterations = self.max_iterations, "iteration limit reached");
                Solution::iteration_limit()
            }
        }
    }

    /// Both phases without infeasibility recovery
    fn solve_exact(&self, problem: &LpProblem) -> Result<Solution, SimplexResult> {
        let mut tableau = Tableau::new(problem);
        let mut iterations = 0;

        // Phase 1: Find initial basic feasible solution
        if tableau.n_artificial > 0 {
            match self.phase1(&mut tableau, &mut iterations) {
                SimplexResult::Optimal => {}
                other => return Err(other),
            }
        }

        // Phase 2: Optimize
        match self.phase2(&mut tableau, &mut iterations) {
            SimplexResult::Optimal => {}
            other => return Err(other),
        }

        debug!(iterations, "optimal basis found");
        let mut solution = self.extract_solution(&tableau, problem);
        solution.iterations = iterations;
        Ok(solution)
    }

    /// When the original problem is infeasible, try to find a "best effort" solution
    /// by relaxing constraints and reporting which ones are violated
    fn solve_with_relaxation(&self, problem: &LpProblem) -> Solution {
        // Lower bounds (demands, quality minimums) are dropped; limits and
        // balances define the structure and stay.
        let mut relaxed = LpProblem::new(problem.variables.clone());
        relaxed.set_objective(
            problem.objective.coefficients.clone(),
            problem.objective.minimize,
        );
        for c in problem.constraints.iter().filter(|c| c.op != ConstraintOp::Ge) {
            relaxed.add_constraint(c.name.clone(), c.coefficients.clone(), c.op, c.rhs);
        }

        let relaxed_solution = match self.solve_exact(&relaxed) {
            Ok(s) => s,
            // Even relaxed problem fails - analyze direct conflicts
            Err(_) => return self.analyze_conflicts(problem),
        };

        let violations = self.find_violations(problem, &relaxed_solution.values);

        if violations.is_empty() {
            // Phase 1 was too strict numerically; the relaxed optimum satisfies everything
            return relaxed_solution;
        }

        warn!(
            violations = violations.len(),
            worst = %violations[0].constraint,
            "problem is infeasible"
        );
        Solution::infeasible_with_relaxed(
            relaxed_solution.values,
            relaxed_solution.objective_value,
            violations,
        )
    }

    /// Find which constraints are violated by a given solution
    pub fn find_violations(&self, problem: &LpProblem, values: &[f64]) -> Vec<ConstraintViolation> {
        let mut violations: Vec<ConstraintViolation> = problem
            .constraints
            .iter()
            .filter(|c| !c.is_satisfied(values, self.residual_tolerance(c.rhs)))
            .map(|c| {
                let lhs = c.lhs(values);
                let (violation_amount, description) = match c.op {
                    ConstraintOp::Le => {
                        let amt = lhs - c.rhs;
                        (amt, format!("{} exceeds maximum of {:.2} by {:.2}", c.name, c.rhs, amt))
                    }
                    ConstraintOp::Ge => {
                        let amt = c.rhs - lhs;
                        (amt, format!("{} is below minimum of {:.2} by {:.2}", c.name, c.rhs, amt))
                    }
                    ConstraintOp::Eq => (
                        (lhs - c.rhs).abs(),
                        format!("{} requires exactly {:.2} but got {:.2}", c.name, c.rhs, lhs),
                    ),
                };
                ConstraintViolation {
                    constraint: c.name.clone(),
                    required: c.rhs,
                    actual: lhs,
                    violation_amount,
                    description,
                }
            })
            .collect();

        // Sort by violation amount (worst first)
        violations.sort_by(|a, b| b.violation_amount.total_cmp(&a.violation_amount));
        violations
    }

    /// Analyze direct constraint conflicts when even relaxed solve fails
    fn analyze_conflicts(&self, problem: &LpProblem) -> Solution {
        // Constraints over the same expression, keyed by exact coefficients
        let mut groups: HashMap<Vec<u64>, Vec<&Constraint>> = HashMap::new();
        for c in &problem.constraints {
            let key = c.coefficients.iter().map(|x| (x + 0.0).to_bits()).collect();
            groups.entry(key).or_default().push(c);
        }

        let mut violations = Vec::new();
        for constraints in groups.values() {
            let mut min_bound: Option<(f64, &str)> = None;
            let mut max_bound: Option<(f64, &str)> = None;

            for c in constraints {
                if matches!(c.op, ConstraintOp::Ge | ConstraintOp::Eq)
                    && min_bound.is_none_or(|(v, _)| c.rhs > v)
                {
                    min_bound = Some((c.rhs, c.name.as_str()));
                }
                if matches!(c.op, ConstraintOp::Le | ConstraintOp::Eq)
                    && max_bound.is_none_or(|(v, _)| c.rhs < v)
                {
                    max_bound = Some((c.rhs, c.name.as_str()));
                }
            }

            if let (Some((min_val, min_name)), Some((max_val, max_name))) = (min_bound, max_bound) {
                if min_val > max_val + self.residual_tolerance(max_val) {
                    violations.push(ConstraintViolation {
                        constraint: format!("{} vs {}", min_name, max_name),
                        required: min_val,
                        actual: max_val,
                        violation_amount: min_val - max_val,
                        description: format!(
                            "Conflict: {} requires >= {:.2} but {} requires <= {:.2}",
                            min_name, min_val, max_name, max_val
                        ),
                    });
                }
            }
        }

        violations.sort_by(|a, b| b.violation_amount.total_cmp(&a.violation_amount));
        warn!(conflicts = violations.len(), "relaxed problem is infeasible too");
        Solution::infeasible_with_violations(violations)
    }

    fn phase1(&self, tableau: &mut Tableau, iterations: &mut usize) -> SimplexResult {
        // Auxiliary objective: maximize -sum(artificials)
        let obj_row = tableau.obj_row();
        let n_cols = tableau.n_cols();
        let rhs_col = n_cols - 1;
        let art_start = tableau.art_start();

        let original_objective = std::mem::replace(&mut tableau.data[obj_row], vec![0.0; n_cols]);
        for j in art_start..rhs_col {
            tableau.data[obj_row][j] = -1.0;
        }
        // Price out the basic artificials
        for i in 0..obj_row {
            if tableau.basic_vars[i] >= art_start {
                for j in 0..n_cols {
                    tableau.data[obj_row][j] += tableau.data[i][j];
                }
            }
        }

        match self.run(tableau, rhs_col, iterations) {
            SimplexResult::Optimal => {}
            // The auxiliary objective is bounded by zero
            SimplexResult::Unbounded => return SimplexResult::Infeasible,
            other => return other,
        }

        let residual_limit = self.feasibility_tolerance * (1.0 + tableau.rhs_scale);
        for i in 0..obj_row {
            if tableau.basic_vars[i] >= art_start && tableau.data[i][rhs_col] > residual_limit {
                debug!(
                    row = %tableau.row_names[i],
                    residual = tableau.data[i][rhs_col],
                    "artificial remains positive"
                );
                return SimplexResult::Infeasible;
            }
        }

        self.drive_out_artificials(tableau);

        // Restore the real objective and price out the basis
        tableau.data[obj_row] = original_objective;
        for i in 0..obj_row {
            let basic = tableau.basic_vars[i];
            let ratio = tableau.data[obj_row][basic];
            if ratio != 0.0 {
                for j in 0..n_cols {
                    tableau.data[obj_row][j] -= ratio * tableau.data[i][j];
                }
            }
        }

        SimplexResult::Optimal
    }

    /// Pivot zero-level artificials out of the basis. Rows where that is
    /// impossible are linearly dependent on the others and get cleared.
    fn drive_out_artificials(&self, tableau: &mut Tableau) {
        let art_start = tableau.art_start();
        let rhs_col = tableau.n_cols() - 1;
        let pivot_floor = self.tolerance.sqrt().max(self.tolerance);

        for i in 0..tableau.obj_row() {
            if tableau.basic_vars[i] < art_start {
                continue;
            }
            tableau.data[i][rhs_col] = 0.0;

            let candidate = (0..art_start)
                .filter(|&j| tableau.data[i][j].abs() > pivot_floor)
                .max_by(|&a, &b| tableau.data[i][a].abs().total_cmp(&tableau.data[i][b].abs()));

            match candidate {
                Some(col) => self.pivot(tableau, i, col),
                None => {
                    debug!(row = %tableau.row_names[i], "redundant constraint");
                    for j in 0..art_start {
                        tableau.data[i][j] = 0.0;
                    }
                }
            }
        }
    }

    fn phase2(&self, tableau: &mut Tableau, iterations: &mut usize) -> SimplexResult {
        // Artificial columns never re-enter
        let limit = tableau.art_start();
        self.run(tableau, limit, iterations)
    }

    /// Pivot until no column below `limit` improves the objective
    fn run(&self, tableau: &mut Tableau, limit: usize, iterations: &mut usize) -> SimplexResult {
        let rhs_col = tableau.n_cols() - 1;
        let mut degenerate_run = 0;

        loop {
            let bland = degenerate_run >= self.degenerate_limit;
            let Some(pivot_col) = self.find_pivot_column(tableau, limit, bland) else {
                return SimplexResult::Optimal;
            };
            if *iterations >= self.max_iterations {
                return SimplexResult::IterationLimit;
            }
            let Some(pivot_row) = self.find_pivot_row(tableau, pivot_col) else {
                return SimplexResult::Unbounded;
            };

            if tableau.data[pivot_row][rhs_col] <= self.tolerance {
                degenerate_run += 1;
            } else {
                degenerate_run = 0;
            }

            self.pivot(tableau, pivot_row, pivot_col);
            *iterations += 1;
        }
    }

    fn find_pivot_column(&self, tableau: &Tableau, limit: usize, bland: bool) -> Option<usize> {
        let obj = &tableau.data[tableau.obj_row()];

        if bland {
            // Smallest improving index
            return (0..limit).find(|&j| obj[j] > self.tolerance);
        }

        // Most positive reduced cost
        let mut max_val = self.tolerance;
        let mut max_col = None;
        for (j, &value) in obj.iter().enumerate().take(limit) {
            if value > max_val {
                max_val = value;
                max_col = Some(j);
            }
        }
        max_col
    }

    fn find_pivot_row(&self, tableau: &Tableau, col: usize) -> Option<usize> {
        let rhs_col = tableau.n_cols() - 1;

        let mut min_ratio = f64::INFINITY;
        let mut min_row: Option<usize> = None;

        for i in 0..tableau.obj_row() {
            let val = tableau.data[i][col];
            if val <= self.tolerance {
                continue;
            }
            let ratio = tableau.data[i][rhs_col].max(0.0) / val;
            let better = match min_row {
                None => true,
                Some(current) => {
                    ratio < min_ratio - self.tolerance
                        || (ratio <= min_ratio + self.tolerance
                            && tableau.basic_vars[i] < tableau.basic_vars[current])
                }
            };
            if better {
                min_ratio = ratio;
                min_row = Some(i);
            }
        }

        min_row
    }

    fn pivot(&self, tableau: &mut Tableau, row: usize, col: usize) {
        let n_cols = tableau.n_cols();

        // Update basic variable
        tableau.basic_vars[row] = col;

        // Scale pivot row
        let pivot_val = tableau.data[row][col];
        for value in tableau.data[row].iter_mut() {
            *value /= pivot_val;
        }

        // Eliminate column in other rows
        let pivot_row = tableau.data[row].clone();
        for (i, data_row) in tableau.data.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = data_row[col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n_cols {
                data_row[j] -= factor * pivot_row[j];
            }
            data_row[col] = 0.0;
        }
    }

    fn extract_solution(&self, tableau: &Tableau, problem: &LpProblem) -> Solution {
        let n_vars = problem.num_variables();
        let rhs_col = tableau.n_cols() - 1;

        // Extract variable values
        let mut values = vec![0.0; n_vars];
        for (i, &basic) in tableau.basic_vars.iter().enumerate() {
            if basic < n_vars {
                values[basic] = tableau.data[i][rhs_col].max(0.0);
            }
        }

        let objective_value = problem.objective_value(&values);
        let analysis = self.analyze(tableau, problem, &values);

        Solution {
            status: SolutionStatus::Optimal,
            values,
            objective_value,
            iterations: 0,
            analysis,
            violations: Vec::new(),
        }
    }

    fn analyze(&self, tableau: &Tableau, problem: &LpProblem, values: &[f64]) -> Analysis {
        let obj = &tableau.data[tableau.obj_row()];
        // Internally the tableau always maximizes
        let sense = if problem.objective.minimize { -1.0 } else { 1.0 };
        let clean = |x: f64| if x.abs() < self.tolerance { 0.0 } else { x };

        let shadow_prices = problem
            .constraints
            .iter()
            .zip(&tableau.rows)
            .map(|(constraint, row)| {
                let internal = match (row.op, row.slack, row.artificial) {
                    (ConstraintOp::Le, Some(slack), _) => -obj[slack],
                    (ConstraintOp::Ge, Some(surplus), _) => obj[surplus],
                    (_, _, Some(artificial)) => -obj[artificial],
                    _ => 0.0,
                };
                let flip = if row.flipped { -1.0 } else { 1.0 };
                let value = clean(internal * flip * sense);
                let interpretation = if value == 0.0 {
                    "Non-binding constraint".to_string()
                } else if value > 0.0 {
                    format!("Increasing RHS by 1 unit would raise the objective by {:.4}", value)
                } else {
                    format!("Increasing RHS by 1 unit would lower the objective by {:.4}", -value)
                };
                ShadowPrice {
                    constraint: constraint.name.clone(),
                    value,
                    interpretation,
                }
            })
            .collect();

        let mut is_basic = vec![false; problem.num_variables()];
        for &basic in &tableau.basic_vars {
            if basic < is_basic.len() {
                is_basic[basic] = true;
            }
        }
        let reduced_costs = problem
            .variables
            .iter()
            .enumerate()
            .map(|(j, name)| ReducedCost {
                variable: name.clone(),
                value: values[j],
                reduced_cost: if is_basic[j] { 0.0 } else { clean(obj[j] * sense) },
                is_basic: is_basic[j],
            })
            .collect();

        let binding_constraints = problem
            .constraints
            .iter()
            .filter(|c| c.op != ConstraintOp::Eq)
            .filter(|c| (c.lhs(values) - c.rhs).abs() <= self.residual_tolerance(c.rhs))
            .map(|c| c.name.clone())
            .collect();

        Analysis {
            shadow_prices,
            reduced_costs,
            binding_constraints,
        }
    }
}

/// How a constraint landed in the tableau
struct RowInfo {
    /// Row was negated to make its RHS non-negative
    flipped: bool,
    /// Operator after normalisation
    op: ConstraintOp,
    slack: Option<usize>,
    artificial: Option<usize>,
}

struct Tableau {
    data: Vec<Vec<f64>>,
    basic_vars: Vec<usize>,
    n_vars: usize,
    n_slack: usize,
    n_artificial: usize,
    rows: Vec<RowInfo>,
    row_names: Vec<String>,
    /// Largest absolute RHS, scales the phase 1 residual check
    rhs_scale: f64,
}

impl Tableau {
    fn new(problem: &LpProblem) -> Self {
        let n_vars = problem.num_variables();
        let n_constraints = problem.num_constraints();

        let ops: Vec<(bool, ConstraintOp)> = problem
            .constraints
            .iter()
            .map(|c| {
                let flipped = c.rhs < 0.0;
                (flipped, if flipped { c.op.flipped() } else { c.op })
            })
            .collect();

        // Count slack and artificial variables needed
        let n_slack = ops.iter().filter(|(_, op)| *op != ConstraintOp::Eq).count();
        let n_artificial = ops.iter().filter(|(_, op)| *op != ConstraintOp::Le).count();

        let total_cols = n_vars + n_slack + n_artificial + 1; // +1 for RHS
        let rhs_col = total_cols - 1;

        let mut data = vec![vec![0.0; total_cols]; n_constraints + 1];
        let mut basic_vars = vec![0; n_constraints];
        let mut rows = Vec::with_capacity(n_constraints);

        let mut slack_idx = n_vars;
        let mut artificial_idx = n_vars + n_slack;

        for (i, (c, &(flipped, op))) in problem.constraints.iter().zip(&ops).enumerate() {
            let sign = if flipped { -1.0 } else { 1.0 };
            for (j, &coef) in c.coefficients.iter().enumerate() {
                data[i][j] = sign * coef;
            }
            data[i][rhs_col] = sign * c.rhs;

            let mut info = RowInfo {
                flipped,
                op,
                slack: None,
                artificial: None,
            };
            match op {
                ConstraintOp::Le => {
                    data[i][slack_idx] = 1.0;
                    basic_vars[i] = slack_idx;
                    info.slack = Some(slack_idx);
                    slack_idx += 1;
                }
                ConstraintOp::Ge => {
                    data[i][slack_idx] = -1.0; // surplus
                    info.slack = Some(slack_idx);
                    slack_idx += 1;
                    data[i][artificial_idx] = 1.0;
                    basic_vars[i] = artificial_idx;
                    info.artificial = Some(artificial_idx);
                    artificial_idx += 1;
                }
                ConstraintOp::Eq => {
                    data[i][artificial_idx] = 1.0;
                    basic_vars[i] = artificial_idx;
                    info.artificial = Some(artificial_idx);
                    artificial_idx += 1;
                }
            }
            rows.push(info);
        }

        // Objective row stores reduced costs of a maximization
        for (j, &coef) in problem.objective.coefficients.iter().enumerate() {
            data[n_constraints][j] = if problem.objective.minimize { -coef } else { coef };
        }

        let rhs_scale = problem.constraints.iter().map(|c| c.rhs.abs()).fold(0.0, f64::max);

        Self {
            data,
            basic_vars,
            n_vars,
            n_slack,
            n_artificial,
            rows,
            row_names: problem.constraints.iter().map(|c| c.name.clone()).collect(),
            rhs_scale,
        }
    }

    fn obj_row(&self) -> usize {
        self.data.len() - 1
    }

    fn n_cols(&self) -> usize {
        self.data[0].len()
    }

    fn art_start(&self) -> usize {
        self.n_vars + self.n_slack
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimplexResult {
    Optimal,
    Unbounded,
    Infeasible,
    IterationLimit,
}
