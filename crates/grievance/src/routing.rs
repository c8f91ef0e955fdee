//! Category-to-department routing for complaints filed without an explicit
//! department.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DepartmentCode;

/// Category used when a complaint has none or an unknown one.
pub const FALLBACK_CATEGORY: &str = "Other";

const DEFAULT_ROUTES: &[(&str, &str)] = &[
    ("Sanitation", "BBMP"),
    ("Street Lighting", "BESCOM"),
    ("Water Supply", "PW"),
    ("Roads", "PW-SUB"),
    ("Public Safety", "PD"),
    (FALLBACK_CATEGORY, DEFAULT_FALLBACK),
];

const DEFAULT_FALLBACK: &str = "PW";

/// Maps complaint categories to department codes.
///
/// Category matching ignores case and surrounding whitespace. Categories
/// with no route go to the `Other` route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, DepartmentCode>", into = "BTreeMap<String, DepartmentCode>")]
pub struct CategoryRoutes {
    routes: BTreeMap<String, (String, DepartmentCode)>,
    fallback: DepartmentCode,
}

impl CategoryRoutes {
    /// Builds a route table. An `Other` entry is required.
    pub fn new(
        routes: impl IntoIterator<Item = (String, DepartmentCode)>,
    ) -> Result<Self, String> {
        let routes: BTreeMap<_, _> = routes
            .into_iter()
            .map(|(category, code)| (normalize(&category), (category, code)))
            .collect();
        let fallback = routes
            .get(&normalize(FALLBACK_CATEGORY))
            .map(|(_, code)| code.clone())
            .ok_or_else(|| format!("routing table has no '{FALLBACK_CATEGORY}' entry"))?;
        Ok(Self { routes, fallback })
    }

    /// Department for `category`.
    pub fn route(&self, category: Option<&str>) -> &DepartmentCode {
        category
            .and_then(|c| self.routes.get(&normalize(c)))
            .map_or(&self.fallback, |(_, code)| code)
    }

    /// Every department code the table can route to.
    pub fn destinations(&self) -> impl Iterator<Item = &DepartmentCode> {
        self.routes.values().map(|(_, code)| code)
    }

    /// `(category, department)` pairs, with categories as configured.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DepartmentCode)> {
        self.routes
            .values()
            .map(|(category, code)| (category.as_str(), code))
    }
}

impl Default for CategoryRoutes {
    fn default() -> Self {
        let routes = DEFAULT_ROUTES
            .iter()
            .map(|&(category, code)| {
                (
                    normalize(category),
                    (category.to_string(), DepartmentCode::from_static(code)),
                )
            })
            .collect();
        Self {
            routes,
            fallback: DepartmentCode::from_static(DEFAULT_FALLBACK),
        }
    }
}

impl TryFrom<BTreeMap<String, DepartmentCode>> for CategoryRoutes {
    type Error = String;

    fn try_from(value: BTreeMap<String, DepartmentCode>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CategoryRoutes> for BTreeMap<String, DepartmentCode> {
    fn from(value: CategoryRoutes) -> Self {
        value.routes.into_values().collect()
    }
}

fn normalize(category: &str) -> String {
    category.trim().to_lowercase()
}
