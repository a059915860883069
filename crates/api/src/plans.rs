//! Address type and plan listing derived from cached address space schemas.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDetails {
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressType {
    pub name: String,
    pub plans: Vec<PlanDetails>,
}

struct Plan<'a> {
    address_type: &'a str,
    order: Option<f64>,
    details: PlanDetails,
}

fn text(v: &Value, key: &str) -> Option<String> { v.get(key).and_then(|s| s.as_str()).map(str::to_string) }

/// Explicitly ordered plans come first; plans without `displayOrder` keep their relative order at the end.
fn display_order(a: &Plan<'_>, b: &Plan<'_>) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Group the plans of a schema payload by address type.
/// Types appear in the order their first plan takes after sorting by display order.
pub fn address_types(schema: &Value) -> Vec<AddressType> {
    let mut plans: Vec<Plan<'_>> = Vec::new();
    let types = schema.pointer("/spec/addressTypes").and_then(|v| v.as_array());
    for ty in types.into_iter().flatten() {
        let Some(type_name) = ty.get("name").and_then(|v| v.as_str()) else { continue };
        for plan in ty.get("plans").and_then(|v| v.as_array()).into_iter().flatten() {
            let Some(name) = text(plan, "name") else { continue };
            plans.push(Plan {
                address_type: type_name,
                order: plan.get("displayOrder").and_then(|v| v.as_f64()),
                details: PlanDetails {
                    display_name: text(plan, "displayName").unwrap_or_else(|| name.clone()),
                    name,
                    short_description: text(plan, "shortDescription"),
                    long_description: text(plan, "longDescription"),
                },
            });
        }
    }
    plans.sort_by(display_order);

    let mut out: Vec<AddressType> = Vec::new();
    for p in plans {
        match out.iter_mut().find(|t| t.name == p.address_type) {
            Some(t) => t.plans.push(p.details),
            None => out.push(AddressType { name: p.address_type.to_string(), plans: vec![p.details] }),
        }
    }
    out
}
