use std::fmt;

use thiserror::Error;

/// Represents a linear programming problem
///
/// All variables are implicitly non-negative.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct LpProblem {
    /// Variable names
    pub variables: Vec<String>,
    /// Objective function coefficients
    pub objective: Objective,
    /// Constraints
    pub constraints: Vec<Constraint>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Objective {
    /// Coefficients for each variable
    pub coefficients: Vec<f64>,
    /// Whether to minimize or maximize
    pub minimize: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Name/label for the constraint (for diagnostics)
    pub name: String,
    /// Coefficients for each variable
    pub coefficients: Vec<f64>,
    /// Comparison operator
    pub op: ConstraintOp,
    /// Right-hand side value
    pub rhs: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// Less than or equal (<=)
    Le,
    /// Greater than or equal (>=)
    Ge,
    /// Equal (=)
    Eq,
}

impl ConstraintOp {
    /// The operator that holds after both sides are negated
    pub fn flipped(self) -> Self {
        match self {
            ConstraintOp::Le => ConstraintOp::Ge,
            ConstraintOp::Ge => ConstraintOp::Le,
            ConstraintOp::Eq => ConstraintOp::Eq,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ConstraintOp::Le => "<=",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Eq => "==",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProblemError {
    #[error("Objective has {found} coefficients but the problem has {expected} variables")]
    ObjectiveLength { expected: usize, found: usize },
    #[error("Constraint {name} has {found} coefficients but the problem has {expected} variables")]
    ConstraintLength { name: String, expected: usize, found: usize },
    #[error("Non-finite value in {0}")]
    NonFinite(String),
    #[error("Variable index {index} out of range in constraint {name}")]
    VariableIndex { name: String, index: usize },
}

impl LpProblem {
    pub fn new(variables: Vec<String>) -> Self {
        let n = variables.len();
        Self {
            variables,
            objective: Objective {
                coefficients: vec![0.0; n],
                minimize: true,
            },
            constraints: Vec::new(),
        }
    }

    pub fn set_objective(&mut self, coefficients: Vec<f64>, minimize: bool) {
        self.objective = Objective { coefficients, minimize };
    }

    pub fn add_constraint(&mut self, name: impl Into<String>, coefficients: Vec<f64>, op: ConstraintOp, rhs: f64) {
        self.constraints.push(Constraint {
            name: name.into(),
            coefficients,
            op,
            rhs,
        });
    }

    /// Add a constraint given as `(variable index, coefficient)` terms.
    ///
    /// Repeated indices are summed.
    pub fn add_sparse_constraint(
        &mut self,
        name: impl Into<String>,
        terms: &[(usize, f64)],
        op: ConstraintOp,
        rhs: f64,
    ) -> Result<(), ProblemError> {
        let name = name.into();
        let mut coefficients = vec![0.0; self.variables.len()];
        for &(index, coef) in terms {
            let slot = coefficients
                .get_mut(index)
                .ok_or_else(|| ProblemError::VariableIndex { name: name.clone(), index })?;
            *slot += coef;
        }
        self.add_constraint(name, coefficients, op, rhs);
        Ok(())
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Objective value of a point
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        dot(&self.objective.coefficients, values)
    }

    /// Check dimensions and finiteness before solving
    pub fn validate(&self) -> Result<(), ProblemError> {
        let n = self.variables.len();
        if self.objective.coefficients.len() != n {
            return Err(ProblemError::ObjectiveLength {
                expected: n,
                found: self.objective.coefficients.len(),
            });
        }
        if self.objective.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ProblemError::NonFinite("objective".to_string()));
        }
        for c in &self.constraints {
            if c.coefficients.len() != n {
                return Err(ProblemError::ConstraintLength {
                    name: c.name.clone(),
                    expected: n,
                    found: c.coefficients.len(),
                });
            }
            if !c.rhs.is_finite() || c.coefficients.iter().any(|x| !x.is_finite()) {
                return Err(ProblemError::NonFinite(c.name.clone()));
            }
        }
        Ok(())
    }
}

impl Constraint {
    /// Left-hand side value at a point
    pub fn lhs(&self, values: &[f64]) -> f64 {
        dot(&self.coefficients, values)
    }

    /// Whether a point satisfies this constraint within `tolerance`
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.lhs(values);
        match self.op {
            ConstraintOp::Le => lhs <= self.rhs + tolerance,
            ConstraintOp::Ge => lhs >= self.rhs - tolerance,
            ConstraintOp::Eq => (lhs - self.rhs).abs() <= tolerance,
        }
    }
}

fn dot(coefficients: &[f64], values: &[f64]) -> f64 {
    coefficients.iter().zip(values).map(|(c, v)| c * v).sum()
}

struct Terms<'a> {
    coefficients: &'a [f64],
    variables: &'a [String],
}

impl fmt::Display for Terms<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (coef, name) in self.coefficients.iter().zip(self.variables) {
            if *coef == 0.0 {
                continue;
            }
            let sign = if *coef < 0.0 { "-" } else { "+" };
            if first {
                if *coef < 0.0 {
                    write!(f, "-")?;
                }
            } else {
                write!(f, " {} ", sign)?;
            }
            let magnitude = coef.abs();
            if magnitude == 1.0 {
                write!(f, "{}", name)?;
            } else {
                write!(f, "{}*{}", magnitude, name)?;
            }
            first = false;
        }
        if first {
            write!(f, "0")?;
        }
        Ok(())
    }
}

impl fmt::Display for LpProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Variables (all >= 0)", self.variables.len())?;
        for name in &self.variables {
            writeln!(f, "    {}", name)?;
        }
        writeln!(f)?;
        writeln!(f, "Objective: {}", if self.objective.minimize { "minimize" } else { "maximize" })?;
        writeln!(
            f,
            "    {}",
            Terms {
                coefficients: &self.objective.coefficients,
                variables: &self.variables,
            }
        )?;
        writeln!(f)?;
        writeln!(f, "{} Constraints", self.constraints.len())?;
        for c in &self.constraints {
            writeln!(
                f,
                "    {}: {} {} {}",
                c.name,
                Terms {
                    coefficients: &c.coefficients,
                    variables: &self.variables,
                },
                c.op.symbol(),
                c.rhs
            )?;
        }
        Ok(())
    }
}
