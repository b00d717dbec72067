//! Decomposition of decoded observations into fact rows.

use std::collections::BTreeMap;

use atlas_core::{
  normalize::normalize,
  observation::{
    BreakdownKind, BreakdownRow, BreakdownSet, DWELL_BUCKETS, FactChunk, ObservationKey,
    SpendingFact, TOTAL_CATEGORY, VisitorDerived, VisitorFact,
  },
  region::RegionId,
};
use atlas_payload::{
  DecodedRecord, Observation, RankedEntry, Share, SpendingObservation, SubrecordIssue,
  VisitorObservation,
};

/// Append the rows of `record`, resolved to `region_id`, to `chunk`.
/// Returns the sub-structures that could not be turned into rows.
pub fn decompose(
  record: &DecodedRecord,
  region_id: RegionId,
  chunk: &mut FactChunk,
) -> Vec<SubrecordIssue> {
  let key = ObservationKey {
    fact_date: record.fact_date,
    region_id,
    source_system: record.source_system.clone(),
  };
  match &record.observation {
    Observation::Visitor(visitor) => decompose_visitor(visitor, &key, chunk),
    Observation::Spending(spending) => {
      decompose_spending(spending, &key, chunk);
      Vec::new()
    }
  }
}

fn decompose_visitor(
  obs: &VisitorObservation,
  key: &ObservationKey,
  chunk: &mut FactChunk,
) -> Vec<SubrecordIssue> {
  let mut issues = Vec::new();

  if let Some(total) = obs.total_visitors {
    chunk.visitor_facts.push(VisitorFact { key: key.fact_key(TOTAL_CATEGORY), visitors: total });
  }
  for (category, visitors) in &obs.visitor_categories {
    chunk
      .visitor_facts
      .push(VisitorFact { key: key.fact_key(category.as_str()), visitors: *visitors });
  }

  if let Some(demographics) = &obs.demographics {
    if let Some(ages) = &demographics.age_groups {
      chunk.breakdowns.push(share_set(key, BreakdownKind::AgeGroup, ages));
    }
    if let Some(gender) = &demographics.gender {
      chunk.breakdowns.push(share_set(key, BreakdownKind::Gender, gender));
    }
  }

  if let Some(dwell) = &obs.dwell_time {
    if dwell.len() != DWELL_BUCKETS.len() || dwell.iter().any(|v| !v.is_finite() || *v < 0.0) {
      issues.push(SubrecordIssue {
        field:  "dwell_time".into(),
        reason: "histogram must hold six non-negative values".into(),
      });
    } else {
      let rows = DWELL_BUCKETS
        .iter()
        .zip(dwell)
        .enumerate()
        .map(|(i, ((label, _), value))| BreakdownRow {
          label: (*label).to_owned(),
          rank:  i as u32 + 1,
          value: *value,
        })
        .collect();
      chunk.breakdowns.push(BreakdownSet {
        key: key.clone(),
        kind: BreakdownKind::DwellTime,
        rows,
      });
      chunk.derived.push(VisitorDerived {
        key:               key.clone(),
        avg_dwell_minutes: weighted_dwell_minutes(dwell),
      });
    }
  }

  let ranked = [
    (BreakdownKind::TopForeignCountry, &obs.top_foreign_countries),
    (BreakdownKind::TopSwissCanton, &obs.top_swiss_cantons),
    (BreakdownKind::TopSwissMunicipality, &obs.top_swiss_municipalities),
  ];
  for (kind, entries) in ranked {
    if let Some(entries) = entries {
      chunk.breakdowns.push(ranked_set(key, kind, entries));
    }
  }

  issues
}

fn decompose_spending(obs: &SpendingObservation, key: &ObservationKey, chunk: &mut FactChunk) {
  let origin = obs
    .origin
    .as_deref()
    .map(|o| normalize(o).replace(' ', "_"))
    .filter(|o| !o.is_empty());

  // Industries repeated within one payload are summed.
  let mut by_category: BTreeMap<String, (i64, f64)> = BTreeMap::new();
  for spend in &obs.industries {
    let category = spending_category(&spend.industry, origin.as_deref());
    let slot = by_category.entry(category).or_default();
    slot.0 += spend.transactions;
    slot.1 += spend.amount;
  }

  for (category, (transactions, amount)) in by_category {
    chunk.spending_facts.push(SpendingFact {
      key: key.fact_key(category),
      transactions,
      amount,
      avg_ticket: average_ticket(amount, transactions),
    });
  }
}

/// Spending category key: the folded industry, qualified by the spend
/// origin when the source reports one (`retail:domestic`).
pub fn spending_category(industry: &str, origin: Option<&str>) -> String {
  let industry = normalize(industry).replace(' ', "_");
  match origin {
    Some(origin) => format!("{industry}:{origin}"),
    None => industry,
  }
}

fn share_set(key: &ObservationKey, kind: BreakdownKind, shares: &[Share]) -> BreakdownSet {
  BreakdownSet {
    key: key.clone(),
    kind,
    rows: shares
      .iter()
      .enumerate()
      .map(|(i, s)| BreakdownRow { label: s.label.clone(), rank: i as u32 + 1, value: s.value })
      .collect(),
  }
}

fn ranked_set(key: &ObservationKey, kind: BreakdownKind, entries: &[RankedEntry]) -> BreakdownSet {
  BreakdownSet {
    key: key.clone(),
    kind,
    rows: entries
      .iter()
      .enumerate()
      .map(|(i, e)| BreakdownRow { label: e.name.clone(), rank: i as u32 + 1, value: e.visitors })
      .collect(),
  }
}

/// Weighted average of the bucket midpoints; `None` for an empty histogram.
pub fn weighted_dwell_minutes(histogram: &[f64]) -> Option<f64> {
  let weight: f64 = histogram.iter().sum();
  if weight <= 0.0 {
    return None;
  }
  let minutes: f64 = DWELL_BUCKETS
    .iter()
    .zip(histogram)
    .map(|((_, midpoint), value)| midpoint * value)
    .sum();
  Some(minutes / weight)
}

pub fn average_ticket(amount: f64, transactions: i64) -> Option<f64> {
  (transactions > 0).then(|| amount / transactions as f64)
}

#[cfg(test)]
mod tests {
  use atlas_payload::{Demographics, IndustrySpend, RegionRef};
  use chrono::NaiveDate;

  use super::*;

  fn record(observation: Observation) -> DecodedRecord {
    DecodedRecord {
      record_id: 1,
      source_system: "intervista".into(),
      fact_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
      observation,
      issues: Vec::new(),
    }
  }

  fn region() -> RegionRef { RegionRef { name: "Bern".into(), kind: "kanton".into() } }

  #[test]
  fn dwell_average_uses_bucket_midpoints() {
    // All weight in the first two buckets: (7.5 + 22.5) / 2.
    assert_eq!(weighted_dwell_minutes(&[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]), Some(15.0));
    assert_eq!(weighted_dwell_minutes(&[0.0; 6]), None);
    assert_eq!(weighted_dwell_minutes(&[0.0, 0.0, 0.0, 0.0, 0.0, 2.0]), Some(300.0));
  }

  #[test]
  fn average_ticket_needs_transactions() {
    assert_eq!(average_ticket(90.0, 3), Some(30.0));
    assert_eq!(average_ticket(90.0, 0), None);
  }

  #[test]
  fn visitor_observation_becomes_rows() {
    let obs = Observation::Visitor(VisitorObservation {
      region: region(),
      total_visitors: Some(14),
      visitor_categories: BTreeMap::from([
        ("swiss_local".to_owned(), 10),
        ("foreign_tourist".to_owned(), 5),
        ("swiss_tourist".to_owned(), 0),
      ]),
      demographics: Some(Demographics {
        age_groups: Some(vec![Share { label: "0-19".into(), value: 0.4 }]),
        gender:     None,
      }),
      dwell_time: Some(vec![2.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
      top_foreign_countries: Some(vec![
        RankedEntry { name: "DE".into(), visitors: 3.0 },
        RankedEntry { name: "FR".into(), visitors: 1.0 },
      ]),
      ..VisitorObservation::default()
    });

    let mut chunk = FactChunk::default();
    let issues = decompose(&record(obs), RegionId(9), &mut chunk);
    assert!(issues.is_empty());
    assert_eq!(chunk.visitor_facts.len(), 4);
    assert_eq!(chunk.visitor_facts[0].key.category, TOTAL_CATEGORY);
    assert_eq!(chunk.breakdowns.len(), 3);
    let top = chunk
      .breakdowns
      .iter()
      .find(|b| b.kind == BreakdownKind::TopForeignCountry)
      .unwrap();
    assert_eq!(top.rows[1].rank, 2);
    assert_eq!(top.rows[1].label, "FR");
    assert_eq!(chunk.derived[0].avg_dwell_minutes, Some(7.5));
  }

  #[test]
  fn malformed_histogram_is_skipped_not_fatal() {
    let obs = Observation::Visitor(VisitorObservation {
      region: region(),
      total_visitors: Some(3),
      dwell_time: Some(vec![1.0, -2.0, 0.0, 0.0, 0.0, 0.0]),
      ..VisitorObservation::default()
    });
    let mut chunk = FactChunk::default();
    let issues = decompose(&record(obs), RegionId(1), &mut chunk);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].field, "dwell_time");
    assert_eq!(chunk.visitor_facts.len(), 1);
    assert!(chunk.breakdowns.is_empty());
    assert!(chunk.derived.is_empty());
  }

  #[test]
  fn repeated_industries_are_summed() {
    let obs = Observation::Spending(SpendingObservation {
      region: region(),
      origin: None,
      industries: vec![
        IndustrySpend { industry: "Retail".into(), transactions: 2, amount: 40.0 },
        IndustrySpend { industry: "Food & Drink".into(), transactions: 1, amount: 12.0 },
        IndustrySpend { industry: "RETAIL".into(), transactions: 2, amount: 20.0 },
      ],
    });
    let mut chunk = FactChunk::default();
    decompose(&record(obs), RegionId(1), &mut chunk);
    assert_eq!(chunk.spending_facts.len(), 2);
    let retail = chunk
      .spending_facts
      .iter()
      .find(|s| s.key.category == "retail")
      .unwrap();
    assert_eq!(retail.transactions, 4);
    assert_eq!(retail.avg_ticket, Some(15.0));
    assert!(chunk.spending_facts.iter().any(|s| s.key.category == "food_drink"));
  }

  #[test]
  fn spending_origins_stay_separate() {
    let spend = |origin: &str, amount: f64| {
      Observation::Spending(SpendingObservation {
        region:     region(),
        origin:     Some(origin.into()),
        industries: vec![IndustrySpend { industry: "Retail".into(), transactions: 1, amount }],
      })
    };
    let mut chunk = FactChunk::default();
    decompose(&record(spend("Domestic", 100.0)), RegionId(1), &mut chunk);
    decompose(&record(spend("foreign", 900.0)), RegionId(1), &mut chunk);

    let categories: Vec<&str> =
      chunk.spending_facts.iter().map(|s| s.key.category.as_str()).collect();
    assert_eq!(categories, ["retail:domestic", "retail:foreign"]);
    assert_eq!(spending_category("Food & Drink", None), "food_drink");
  }
}
