//! Lenient payload decoder.
//!
//! Pipeline:
//!   raw &str
//!     └─ serde_json::Value        → top-level object
//!          └─ type tag + region   → fatal on failure
//!               └─ nested fields  → decoded one by one; failures become
//!                                   SubrecordIssues and the field is dropped

use std::collections::BTreeMap;

use atlas_core::{normalize::normalize, observation::DWELL_BUCKETS};
use serde_json::{Map, Value};

use crate::{
  Demographics, IndustrySpend, Observation, RankedEntry, RegionRef, Share,
  SpendingObservation, SubrecordIssue, VisitorObservation,
  error::{Error, Result},
};

type Object = Map<String, Value>;

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Decode a payload string into an [`Observation`] plus the issues found in
/// its nested structures.
pub fn decode_payload(input: &str) -> Result<(Observation, Vec<SubrecordIssue>)> {
  let value: Value = serde_json::from_str(input).map_err(Error::InvalidJson)?;
  let Value::Object(obj) = value else {
    return Err(Error::NotAnObject);
  };

  let tag = obj
    .get("type")
    .and_then(Value::as_str)
    .ok_or(Error::MissingType)?;
  let region = decode_region(obj.get("region"))?;

  let mut issues = Issues::default();
  let observation = match tag {
    "visitor" => Observation::Visitor(decode_visitor(&obj, region, &mut issues)),
    "spending" => Observation::Spending(decode_spending(&obj, region, &mut issues)),
    other => return Err(Error::UnknownType(other.to_owned())),
  };

  Ok((observation, issues.0))
}

// ─── Issue accumulator ───────────────────────────────────────────────────────

#[derive(Default)]
struct Issues(Vec<SubrecordIssue>);

impl Issues {
  fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
    self.0.push(SubrecordIssue { field: field.into(), reason: reason.into() });
  }
}

// ─── Region ──────────────────────────────────────────────────────────────────

fn decode_region(value: Option<&Value>) -> Result<RegionRef> {
  let obj = value
    .and_then(Value::as_object)
    .ok_or_else(|| Error::InvalidRegion("\"region\" must be an object".into()))?;

  let name = obj
    .get("name")
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| Error::InvalidRegion("missing region name".into()))?;
  let kind = obj
    .get("kind")
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| Error::InvalidRegion(format!("missing kind for region {name:?}")))?;

  Ok(RegionRef { name: name.to_owned(), kind: kind.to_owned() })
}

// ─── Visitor observations ────────────────────────────────────────────────────

fn decode_visitor(obj: &Object, region: RegionRef, issues: &mut Issues) -> VisitorObservation {
  let total_visitors = match obj.get("total_visitors") {
    None | Some(Value::Null) => None,
    Some(v) => {
      let count = as_count(v);
      if count.is_none() {
        issues.push("total_visitors", format!("not a non-negative count: {v}"));
      }
      count
    }
  };

  VisitorObservation {
    region,
    total_visitors,
    visitor_categories: decode_categories(obj.get("visitor_categories"), issues),
    demographics: decode_demographics(obj.get("demographics"), issues),
    dwell_time: decode_dwell_time(obj.get("dwell_time"), issues),
    top_foreign_countries: decode_ranked(obj, "top_foreign_countries", issues),
    top_swiss_cantons: decode_ranked(obj, "top_swiss_cantons", issues),
    top_swiss_municipalities: decode_ranked(obj, "top_swiss_municipalities", issues),
  }
}

fn decode_categories(value: Option<&Value>, issues: &mut Issues) -> BTreeMap<String, i64> {
  let mut out = BTreeMap::new();
  let obj = match value {
    None | Some(Value::Null) => return out,
    Some(Value::Object(obj)) => obj,
    Some(_) => {
      issues.push("visitor_categories", "expected an object of category counts");
      return out;
    }
  };

  for (raw_key, v) in obj {
    let field = format!("visitor_categories.{raw_key}");
    let key = category_key(raw_key);
    if key.is_empty() || key == atlas_core::observation::TOTAL_CATEGORY {
      issues.push(field, "reserved or empty category name");
      continue;
    }
    let Some(count) = as_count(v) else {
      issues.push(field, format!("not a non-negative count: {v}"));
      continue;
    };
    if out.insert(key.clone(), count).is_some() {
      issues.push(field, format!("duplicate category {key:?}"));
    }
  }
  out
}

fn decode_demographics(value: Option<&Value>, issues: &mut Issues) -> Option<Demographics> {
  let obj = match value {
    None | Some(Value::Null) => return None,
    Some(Value::Object(obj)) => obj,
    Some(_) => {
      issues.push("demographics", "expected an object");
      return None;
    }
  };

  let age_groups = decode_shares(obj.get("age_groups"), "demographics.age_groups", issues);
  let gender = decode_shares(obj.get("gender"), "demographics.gender", issues);
  if age_groups.is_none() && gender.is_none() {
    return None;
  }
  Some(Demographics { age_groups, gender })
}

/// Shares may be an object `{label: value}` or a list of `{label, value}`.
fn decode_shares(value: Option<&Value>, field: &str, issues: &mut Issues) -> Option<Vec<Share>> {
  let shares: Option<Vec<Share>> = match value? {
    Value::Null => return None,
    Value::Object(obj) => obj
      .iter()
      .map(|(label, v)| as_share(v).map(|value| Share { label: label.clone(), value }))
      .collect(),
    Value::Array(items) => items
      .iter()
      .map(|item| {
        let label = item.get("label")?.as_str()?.to_owned();
        let value = as_share(item.get("value")?)?;
        Some(Share { label, value })
      })
      .collect(),
    _ => None,
  };

  if shares.is_none() {
    issues.push(field, "malformed share breakdown");
  }
  shares
}

/// A histogram is a list of six values in bucket order, or an object keyed
/// by bucket label.
fn decode_dwell_time(value: Option<&Value>, issues: &mut Issues) -> Option<Vec<f64>> {
  let values: Option<Vec<f64>> = match value? {
    Value::Null => return None,
    Value::Array(items) if items.len() == DWELL_BUCKETS.len() => {
      items.iter().map(as_share).collect()
    }
    Value::Object(obj) if obj.len() == DWELL_BUCKETS.len() => DWELL_BUCKETS
      .iter()
      .map(|(label, _)| obj.get(*label).and_then(as_share))
      .collect(),
    _ => None,
  };

  if values.is_none() {
    issues.push(
      "dwell_time",
      format!("expected {} non-negative bucket values", DWELL_BUCKETS.len()),
    );
  }
  values
}

/// A ranked list is dropped whole if any entry is malformed, since ranks
/// depend on every position.
fn decode_ranked(obj: &Object, field: &str, issues: &mut Issues) -> Option<Vec<RankedEntry>> {
  let entries: Option<Vec<RankedEntry>> = match obj.get(field)? {
    Value::Null => return None,
    Value::Array(items) => items
      .iter()
      .map(|item| {
        let name = item.get("name")?.as_str()?.trim();
        let visitors = as_share(item.get("visitors")?)?;
        (!name.is_empty()).then(|| RankedEntry { name: name.to_owned(), visitors })
      })
      .collect(),
    _ => None,
  };

  if entries.is_none() {
    issues.push(field, "malformed ranked list");
  }
  entries
}

// ─── Spending observations ───────────────────────────────────────────────────

fn decode_spending(obj: &Object, region: RegionRef, issues: &mut Issues) -> SpendingObservation {
  let origin = match obj.get("origin") {
    None | Some(Value::Null) => None,
    Some(Value::String(s)) => Some(s.trim().to_owned()),
    Some(v) => {
      issues.push("origin", format!("expected a string, got {v}"));
      None
    }
  };

  let mut industries = Vec::new();
  match obj.get("industries") {
    None | Some(Value::Null) => {}
    Some(Value::Array(items)) => {
      for (i, item) in items.iter().enumerate() {
        match decode_industry(item) {
          Some(spend) => industries.push(spend),
          None => issues.push(format!("industries[{i}]"), "malformed industry entry"),
        }
      }
    }
    Some(_) => issues.push("industries", "expected a list"),
  }

  SpendingObservation { region, origin, industries }
}

fn decode_industry(item: &Value) -> Option<IndustrySpend> {
  let industry = item.get("industry")?.as_str()?.trim();
  let transactions = as_count(item.get("transactions")?)?;
  let amount = item.get("amount")?.as_f64().filter(|a| a.is_finite())?;
  (!industry.is_empty()).then(|| IndustrySpend {
    industry: industry.to_owned(),
    transactions,
    amount,
  })
}

// ─── Scalars ─────────────────────────────────────────────────────────────────

/// A non-negative integer; integral floats such as `14.0` are accepted.
fn as_count(v: &Value) -> Option<i64> {
  if let Some(n) = v.as_i64() {
    return (n >= 0).then_some(n);
  }
  let f = v.as_f64()?;
  (f >= 0.0 && f.fract() == 0.0 && f <= i64::MAX as f64).then_some(f as i64)
}

/// A finite, non-negative number.
fn as_share(v: &Value) -> Option<f64> {
  v.as_f64().filter(|f| f.is_finite() && *f >= 0.0)
}

/// Category labels are stored in snake case: `"Swiss Local"` → `swiss_local`.
fn category_key(raw: &str) -> String { normalize(raw).replace(' ', "_") }
