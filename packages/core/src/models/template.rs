//! Nested subtree definitions
//!
//! `SubtreeDefinition` is the shared shape of templates, exports and imports:
//!
//! ```json
//! {
//!   "name": "Algebra",
//!   "level": "chapter",
//!   "description": "Algebra chapter",
//!   "children": [{ "name": "Equations", "level": "topic" }]
//! }
//! ```
//!
//! `question_count` is filled in on export and ignored on import.

use crate::models::Level;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeDefinition {
    pub name: String,

    pub level: Level,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub children: Vec<SubtreeDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<u64>,
}

impl SubtreeDefinition {
    pub fn new(name: impl Into<String>, level: Level) -> Self {
        Self {
            name: name.into(),
            level,
            description: String::new(),
            children: Vec::new(),
            question_count: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_children(mut self, children: Vec<SubtreeDefinition>) -> Self {
        self.children = children;
        self
    }

    pub fn with_child(mut self, child: SubtreeDefinition) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes this definition materializes into, itself included
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(SubtreeDefinition::node_count)
            .sum::<usize>()
    }

    /// Copy without any export annotations
    pub fn without_counts(&self) -> Self {
        Self {
            name: self.name.clone(),
            level: self.level,
            description: self.description.clone(),
            children: self.children.iter().map(Self::without_counts).collect(),
            question_count: None,
        }
    }
}

/// Structures shipped with the engine, applied beneath a subject node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTemplate {
    MathHighSchool,
    PhysicsHighSchool,
    ChemistryHighSchool,
}

impl BuiltinTemplate {
    pub const ALL: [BuiltinTemplate; 3] = [
        BuiltinTemplate::MathHighSchool,
        BuiltinTemplate::PhysicsHighSchool,
        BuiltinTemplate::ChemistryHighSchool,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTemplate::MathHighSchool => "math_high_school",
            BuiltinTemplate::PhysicsHighSchool => "physics_high_school",
            BuiltinTemplate::ChemistryHighSchool => "chemistry_high_school",
        }
    }

    /// Chapter definitions, each with its topics
    pub fn definitions(&self) -> Vec<SubtreeDefinition> {
        let chapter = |name: &str, description: &str, topics: &[(&str, &str)]| {
            SubtreeDefinition::new(name, Level::Chapter)
                .with_description(description)
                .with_children(
                    topics
                        .iter()
                        .map(|(topic, about)| {
                            SubtreeDefinition::new(*topic, Level::Topic).with_description(*about)
                        })
                        .collect(),
                )
        };

        match self {
            BuiltinTemplate::MathHighSchool => vec![
                chapter(
                    "Algebra",
                    "Algebra chapter",
                    &[
                        ("Equations", "Kinds of equations"),
                        ("Inequalities", "Kinds of inequalities"),
                        ("Systems of equations", "Linear systems"),
                    ],
                ),
                chapter(
                    "Geometry",
                    "Geometry chapter",
                    &[
                        ("Triangles", "Properties of triangles"),
                        ("Quadrilaterals", "Kinds of quadrilaterals"),
                        ("Circles", "Properties of circles"),
                    ],
                ),
            ],
            BuiltinTemplate::PhysicsHighSchool => vec![
                chapter(
                    "Mechanics",
                    "Mechanics chapter",
                    &[
                        ("Kinematics", "Mechanical motion"),
                        ("Dynamics", "Forces and motion"),
                    ],
                ),
                chapter(
                    "Thermodynamics",
                    "Thermodynamics chapter",
                    &[
                        ("Temperature", "The notion of temperature"),
                        ("Thermal expansion", "Expansion under heat"),
                    ],
                ),
            ],
            BuiltinTemplate::ChemistryHighSchool => vec![
                chapter(
                    "Inorganic chemistry",
                    "Inorganic chemistry chapter",
                    &[
                        ("Acids and bases", "Properties of acids and bases"),
                        ("Salts", "Kinds of salts"),
                    ],
                ),
                chapter(
                    "Organic chemistry",
                    "Organic chemistry chapter",
                    &[
                        ("Hydrocarbons", "Hydrocarbon compounds"),
                        ("Derivatives", "Hydrocarbon derivatives"),
                    ],
                ),
            ],
        }
    }
}

impl fmt::Display for BuiltinTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinTemplate::ALL
            .iter()
            .copied()
            .find(|template| template.name() == s)
            .ok_or_else(|| format!("Unknown template: {}", s))
    }
}
