//! KPI catalog: metric definitions, their sectors, declared aggregation
//! kinds, and derived ratio metrics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a metric rolls up over a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    /// Additive count over the period (calls made). Summed.
    Flow,
    /// Point-in-time quantity (open requisitions). Averaged.
    Stock,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Flow => "flow",
            AggregationKind::Stock => "stock",
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "flow" | "sum" => Ok(AggregationKind::Flow),
            "stock" | "avg" | "average" => Ok(AggregationKind::Stock),
            other => Err(Error::InvalidInput(format!(
                "unknown aggregation kind '{other}' (expected flow or stock)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub id: String,
    pub name: String,
    pub sector: String,
    pub aggregation: AggregationKind,
    pub sort_order: i64,
}

/// A derived percentage metric: Σ numerator / Σ denominator × 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioDefinition {
    pub id: String,
    pub name: String,
    pub numerator_kpi_id: String,
    pub denominator_kpi_id: String,
}

/// The set of KPIs (and ratios) in scope for a report or an edit form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub kpis: Vec<KpiDefinition>,
    pub ratios: Vec<RatioDefinition>,
}

impl Catalog {
    pub fn new(kpis: Vec<KpiDefinition>, ratios: Vec<RatioDefinition>) -> Self {
        Self { kpis, ratios }
    }

    pub fn by_id(&self, id: &str) -> Option<&KpiDefinition> {
        self.kpis.iter().find(|k| k.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&KpiDefinition> {
        self.kpis.iter().find(|k| k.name == name)
    }

    /// Look up a KPI by id, then by case-insensitive name.
    pub fn resolve(&self, key: &str) -> Option<&KpiDefinition> {
        self.by_id(key).or_else(|| {
            self.kpis
                .iter()
                .find(|k| k.name.eq_ignore_ascii_case(key.trim()))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kpis.iter().map(|k| k.name.as_str())
    }

    /// KPIs grouped by sector, sectors in first-seen catalog order.
    pub fn by_sector(&self) -> Vec<(&str, Vec<&KpiDefinition>)> {
        let mut groups: Vec<(&str, Vec<&KpiDefinition>)> = Vec::new();
        for kpi in &self.kpis {
            match groups.iter_mut().find(|(s, _)| *s == kpi.sector) {
                Some((_, list)) => list.push(kpi),
                None => groups.push((kpi.sector.as_str(), vec![kpi])),
            }
        }
        groups
    }

    /// Restrict the catalog to the given KPI ids. An empty id list means
    /// "no explicit assignment" and keeps everything.
    pub fn restricted_to(&self, kpi_ids: &[String]) -> Catalog {
        if kpi_ids.is_empty() {
            return self.clone();
        }
        let kpis: Vec<KpiDefinition> = self
            .kpis
            .iter()
            .filter(|k| kpi_ids.contains(&k.id))
            .cloned()
            .collect();
        let ratios = self
            .ratios
            .iter()
            .filter(|r| {
                kpis.iter().any(|k| k.id == r.numerator_kpi_id)
                    && kpis.iter().any(|k| k.id == r.denominator_kpi_id)
            })
            .cloned()
            .collect();
        Catalog { kpis, ratios }
    }
}
