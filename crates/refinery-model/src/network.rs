//! Refinery flowsheet: materials, nodes and the arcs that connect them.
//!
//! The topology is fixed. Buffer tanks are optional: an enabled tank adds a
//! parallel route through itself next to the direct connection it buffers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    Crude,
    /// Straight-run gasoline
    Srg,
    /// Straight-run naphtha
    Srn,
    /// Straight-run distillate
    Srds,
    /// Straight-run fuel oil
    Srfo,
    /// Reformer gasoline
    Rfg,
    /// Cat-cracked gasoline
    Ccg,
    /// Cat-cracked fuel oil
    Ccfo,
    /// Fuel gas, measured in its own unit
    Fg,
    PgProd,
    RgProd,
    DfProd,
    FoProd,
}

impl Material {
    pub fn name(self) -> &'static str {
        match self {
            Material::Crude => "crude",
            Material::Srg => "srg",
            Material::Srn => "srn",
            Material::Srds => "srds",
            Material::Srfo => "srfo",
            Material::Rfg => "rfg",
            Material::Ccg => "ccg",
            Material::Ccfo => "ccfo",
            Material::Fg => "fg",
            Material::PgProd => "pg_prod",
            Material::RgProd => "rg_prod",
            Material::DfProd => "df_prod",
            Material::FoProd => "fo_prod",
        }
    }

    /// Liquid streams count towards a unit's volumetric yield
    pub fn is_liquid(self) -> bool {
        self != Material::Fg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    CrudeSource,
    Ad,
    Rf,
    Cc,
    SrgSp,
    SrnSp,
    SrdsSp,
    SrfoSp,
    RfgSp,
    CcgSp,
    CcfoSp,
    SrnTk,
    RfgTk,
    CcgTk,
    CcfoTk,
    PgTk,
    RgTk,
    DfTk,
    FoTk,
    PgOut,
    RgOut,
    DfOut,
    FoOut,
    FgSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    Unit,
    Splitter,
    BufferTank,
    BlendTank,
    Outlet,
    Sink,
}

impl Node {
    pub const SPLITTERS: [Node; 7] = [
        Node::SrgSp,
        Node::SrnSp,
        Node::SrdsSp,
        Node::SrfoSp,
        Node::RfgSp,
        Node::CcgSp,
        Node::CcfoSp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Node::CrudeSource => "crude_source",
            Node::Ad => "ad",
            Node::Rf => "rf",
            Node::Cc => "cc",
            Node::SrgSp => "srg_sp",
            Node::SrnSp => "srn_sp",
            Node::SrdsSp => "srds_sp",
            Node::SrfoSp => "srfo_sp",
            Node::RfgSp => "rfg_sp",
            Node::CcgSp => "ccg_sp",
            Node::CcfoSp => "ccfo_sp",
            Node::SrnTk => "srn_tk",
            Node::RfgTk => "rfg_tk",
            Node::CcgTk => "ccg_tk",
            Node::CcfoTk => "ccfo_tk",
            Node::PgTk => "pg_tk",
            Node::RgTk => "rg_tk",
            Node::DfTk => "df_tk",
            Node::FoTk => "fo_tk",
            Node::PgOut => "pg_out",
            Node::RgOut => "rg_out",
            Node::DfOut => "df_out",
            Node::FoOut => "fo_out",
            Node::FgSink => "fg_sink",
        }
    }

    pub fn kind(self) -> NodeKind {
        match self {
            Node::CrudeSource => NodeKind::Source,
            Node::Ad | Node::Rf | Node::Cc => NodeKind::Unit,
            Node::SrgSp
            | Node::SrnSp
            | Node::SrdsSp
            | Node::SrfoSp
            | Node::RfgSp
            | Node::CcgSp
            | Node::CcfoSp => NodeKind::Splitter,
            Node::SrnTk | Node::RfgTk | Node::CcgTk | Node::CcfoTk => NodeKind::BufferTank,
            Node::PgTk | Node::RgTk | Node::DfTk | Node::FoTk => NodeKind::BlendTank,
            Node::PgOut | Node::RgOut | Node::DfOut | Node::FoOut => NodeKind::Outlet,
            Node::FgSink => NodeKind::Sink,
        }
    }
}

/// Units with yields, capacities and shutdown schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessUnit {
    /// Atmospheric distillation
    Ad,
    /// Reformer
    Rf,
    /// Catalytic cracker
    Cc,
}

impl ProcessUnit {
    pub const ALL: [ProcessUnit; 3] = [ProcessUnit::Ad, ProcessUnit::Rf, ProcessUnit::Cc];

    pub fn node(self) -> Node {
        match self {
            ProcessUnit::Ad => Node::Ad,
            ProcessUnit::Rf => Node::Rf,
            ProcessUnit::Cc => Node::Cc,
        }
    }

    pub fn name(self) -> &'static str {
        self.node().name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    /// Premium gasoline
    Pg,
    /// Regular gasoline
    Rg,
    /// Diesel fuel
    Df,
    /// Fuel oil
    Fo,
}

impl Product {
    pub const ALL: [Product; 4] = [Product::Pg, Product::Rg, Product::Df, Product::Fo];

    pub fn name(self) -> &'static str {
        match self {
            Product::Pg => "pg",
            Product::Rg => "rg",
            Product::Df => "df",
            Product::Fo => "fo",
        }
    }

    pub fn blend_tank(self) -> Node {
        match self {
            Product::Pg => Node::PgTk,
            Product::Rg => Node::RgTk,
            Product::Df => Node::DfTk,
            Product::Fo => Node::FoTk,
        }
    }

    pub fn outlet(self) -> Node {
        match self {
            Product::Pg => Node::PgOut,
            Product::Rg => Node::RgOut,
            Product::Df => Node::DfOut,
            Product::Fo => Node::FoOut,
        }
    }

    pub fn material(self) -> Material {
        match self {
            Product::Pg => Material::PgProd,
            Product::Rg => Material::RgProd,
            Product::Df => Material::DfProd,
            Product::Fo => Material::FoProd,
        }
    }
}

/// Intermediate storage that decouples a unit from its neighbour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BufferTank {
    #[serde(rename = "srn_tk")]
    Srn,
    #[serde(rename = "rfg_tk")]
    Rfg,
    #[serde(rename = "ccg_tk")]
    Ccg,
    #[serde(rename = "ccfo_tk")]
    Ccfo,
}

impl BufferTank {
    pub const ALL: [BufferTank; 4] = [BufferTank::Srn, BufferTank::Rfg, BufferTank::Ccg, BufferTank::Ccfo];

    pub fn node(self) -> Node {
        match self {
            BufferTank::Srn => Node::SrnTk,
            BufferTank::Rfg => Node::RfgTk,
            BufferTank::Ccg => Node::CcgTk,
            BufferTank::Ccfo => Node::CcfoTk,
        }
    }

    pub fn name(self) -> &'static str {
        self.node().name()
    }

    pub fn material(self) -> Material {
        match self {
            BufferTank::Srn => Material::Srn,
            BufferTank::Rfg => Material::Rfg,
            BufferTank::Ccg => Material::Ccg,
            BufferTank::Ccfo => Material::Ccfo,
        }
    }

    /// Node that fills the tank
    pub fn upstream(self) -> Node {
        match self {
            BufferTank::Srn => Node::SrnSp,
            BufferTank::Rfg => Node::Rf,
            BufferTank::Ccg | BufferTank::Ccfo => Node::Cc,
        }
    }

    /// Node the tank drains into
    pub fn downstream(self) -> Node {
        match self {
            BufferTank::Srn => Node::Rf,
            BufferTank::Rfg => Node::RfgSp,
            BufferTank::Ccg => Node::CcgSp,
            BufferTank::Ccfo => Node::CcfoSp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Research octane number
    Ron,
    /// Reid vapour pressure
    Rvp,
    Density,
    Sulfur,
}

impl Quality {
    pub fn name(self) -> &'static str {
        match self {
            Quality::Ron => "ron",
            Quality::Rvp => "rvp",
            Quality::Density => "density",
            Quality::Sulfur => "sulfur",
        }
    }
}

macro_rules! display_by_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_by_name!(Material, Node, ProcessUnit, Product, BufferTank, Quality);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} '{name}'")]
pub struct ParseNameError {
    pub kind: &'static str,
    pub name: String,
}

impl FromStr for ProcessUnit {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessUnit::ALL
            .into_iter()
            .find(|u| u.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseNameError { kind: "unit", name: s.to_string() })
    }
}

impl FromStr for BufferTank {
    type Err = ParseNameError;

    /// Accepts `srn_tk` as well as the bare material name `srn`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        BufferTank::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s) || t.material().name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseNameError { kind: "tank", name: s.to_string() })
    }
}

/// Flow of one material from one node to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub material: Material,
    pub from: Node,
    pub to: Node,
}

impl FlowKey {
    pub const fn new(material: Material, from: Node, to: Node) -> Self {
        Self { material, from, to }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.material, self.from, self.to)
    }
}

const BASE_ARCS: [FlowKey; 33] = {
    use Material as M;
    use Node as N;
    [
        FlowKey::new(M::Crude, N::CrudeSource, N::Ad),
        FlowKey::new(M::Fg, N::Ad, N::FgSink),
        FlowKey::new(M::Fg, N::Rf, N::FgSink),
        FlowKey::new(M::Fg, N::Cc, N::FgSink),
        FlowKey::new(M::Srg, N::Ad, N::SrgSp),
        FlowKey::new(M::Srg, N::SrgSp, N::PgTk),
        FlowKey::new(M::Srg, N::SrgSp, N::RgTk),
        FlowKey::new(M::Srn, N::Ad, N::SrnSp),
        FlowKey::new(M::Srn, N::SrnSp, N::Rf),
        FlowKey::new(M::Srn, N::SrnSp, N::PgTk),
        FlowKey::new(M::Srn, N::SrnSp, N::RgTk),
        FlowKey::new(M::Srn, N::SrnSp, N::DfTk),
        FlowKey::new(M::Srds, N::Ad, N::SrdsSp),
        FlowKey::new(M::Srds, N::SrdsSp, N::Cc),
        FlowKey::new(M::Srds, N::SrdsSp, N::DfTk),
        FlowKey::new(M::Srds, N::SrdsSp, N::FoTk),
        FlowKey::new(M::Srfo, N::Ad, N::SrfoSp),
        FlowKey::new(M::Srfo, N::SrfoSp, N::Cc),
        FlowKey::new(M::Srfo, N::SrfoSp, N::DfTk),
        FlowKey::new(M::Srfo, N::SrfoSp, N::FoTk),
        FlowKey::new(M::Rfg, N::Rf, N::RfgSp),
        FlowKey::new(M::Rfg, N::RfgSp, N::PgTk),
        FlowKey::new(M::Rfg, N::RfgSp, N::RgTk),
        FlowKey::new(M::Ccg, N::Cc, N::CcgSp),
        FlowKey::new(M::Ccg, N::CcgSp, N::PgTk),
        FlowKey::new(M::Ccg, N::CcgSp, N::RgTk),
        FlowKey::new(M::Ccfo, N::Cc, N::CcfoSp),
        FlowKey::new(M::Ccfo, N::CcfoSp, N::DfTk),
        FlowKey::new(M::Ccfo, N::CcfoSp, N::FoTk),
        FlowKey::new(M::PgProd, N::PgTk, N::PgOut),
        FlowKey::new(M::RgProd, N::RgTk, N::RgOut),
        FlowKey::new(M::DfProd, N::DfTk, N::DfOut),
        FlowKey::new(M::FoProd, N::FoTk, N::FoOut),
    ]
};

/// The arcs of one refinery configuration
#[derive(Debug, Clone)]
pub struct Network {
    arcs: Vec<FlowKey>,
    tanks: Vec<BufferTank>,
}

impl Network {
    pub fn new(tanks: &[BufferTank]) -> Self {
        let mut enabled: Vec<BufferTank> = tanks.to_vec();
        enabled.sort();
        enabled.dedup();

        let mut arcs = BASE_ARCS.to_vec();
        for tank in &enabled {
            arcs.push(FlowKey::new(tank.material(), tank.upstream(), tank.node()));
            arcs.push(FlowKey::new(tank.material(), tank.node(), tank.downstream()));
        }

        Self { arcs, tanks: enabled }
    }

    pub fn arcs(&self) -> &[FlowKey] {
        &self.arcs
    }

    /// Enabled buffer tanks, sorted
    pub fn tanks(&self) -> &[BufferTank] {
        &self.tanks
    }

    pub fn arc_index(&self, key: &FlowKey) -> Option<usize> {
        self.arcs.iter().position(|a| a == key)
    }

    pub fn inflows(&self, node: Node) -> impl Iterator<Item = (usize, &FlowKey)> + '_ {
        self.arcs.iter().enumerate().filter(move |(_, a)| a.to == node)
    }

    pub fn outflows(&self, node: Node) -> impl Iterator<Item = (usize, &FlowKey)> + '_ {
        self.arcs.iter().enumerate().filter(move |(_, a)| a.from == node)
    }

    /// Distinct materials leaving a node, in declaration order
    pub fn outlet_materials(&self, node: Node) -> Vec<Material> {
        let mut materials: Vec<Material> = self.outflows(node).map(|(_, a)| a.material).collect();
        materials.sort();
        materials.dedup();
        materials
    }

    /// Distinct materials entering a node, in declaration order
    pub fn inlet_materials(&self, node: Node) -> Vec<Material> {
        let mut materials: Vec<Material> = self.inflows(node).map(|(_, a)| a.material).collect();
        materials.sort();
        materials.dedup();
        materials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_network() {
        let network = Network::new(&[]);
        assert_eq!(network.arcs().len(), 33);
        assert!(network.tanks().is_empty());

        let mut sorted = network.arcs().to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), network.arcs().len(), "duplicate arcs");
    }

    #[test]
    fn test_splitters_pass_one_material() {
        let network = Network::new(&BufferTank::ALL);
        for sp in Node::SPLITTERS {
            let inlet = network.inlet_materials(sp);
            let outlet = network.outlet_materials(sp);
            assert_eq!(inlet.len(), 1, "{} inlet materials {:?}", sp, inlet);
            assert_eq!(inlet, outlet, "{} changes material", sp);
            assert!(network.outflows(sp).count() >= 2, "{} does not split", sp);
        }
    }

    #[test]
    fn test_tank_adds_parallel_route() {
        let network = Network::new(&[BufferTank::Srn, BufferTank::Srn]);
        assert_eq!(network.tanks(), &[BufferTank::Srn]);
        assert_eq!(network.arcs().len(), 35);

        let into_rf: Vec<Node> = network
            .inflows(Node::Rf)
            .map(|(_, a)| a.from)
            .collect();
        assert_eq!(into_rf, vec![Node::SrnSp, Node::SrnTk]);

        assert!(network.arc_index(&FlowKey::new(Material::Srn, Node::SrnSp, Node::SrnTk)).is_some());
        assert!(network.arc_index(&FlowKey::new(Material::Rfg, Node::Rf, Node::RfgTk)).is_none());
    }

    #[test]
    fn test_blend_inputs_come_from_splitters() {
        let network = Network::new(&BufferTank::ALL);
        for product in Product::ALL {
            for (_, arc) in network.inflows(product.blend_tank()) {
                assert_eq!(arc.from.kind(), NodeKind::Splitter, "{}", arc);
            }
            let out: Vec<_> = network.outflows(product.blend_tank()).collect();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].1.to, product.outlet());
            assert_eq!(out[0].1.material, product.material());
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("RF".parse::<ProcessUnit>().unwrap(), ProcessUnit::Rf);
        assert_eq!("ccfo".parse::<BufferTank>().unwrap(), BufferTank::Ccfo);
        assert_eq!("rfg_tk".parse::<BufferTank>().unwrap(), BufferTank::Rfg);
        let err = "xx".parse::<ProcessUnit>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown unit 'xx'");
    }

    #[test]
    fn test_flow_key_display() {
        let key = FlowKey::new(Material::Srn, Node::SrnSp, Node::Rf);
        assert_eq!(key.to_string(), "srn,srn_sp,rf");
    }
}
