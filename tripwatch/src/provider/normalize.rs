//! Normalization of travel-time provider responses.
//!
//! Upstream responses do not follow a single schema. Rather than parse one
//! shape strictly, the [`ResponseNormalizer`] runs an ordered list of named
//! [`ShapeStrategy`] implementations; the first one that extracts at least one
//! usable record wins. When none does, the response is reported as
//! unparseable and every slot stays empty. Nothing here returns an error.
//!
//! | Strategy | Shape |
//! |---|---|
//! | [`MatrixRows`] | `rows[i].elements[0].{duration,distance}` |
//! | [`FlatSummaries`] | `summaries \| data \| results: [{originIndex?, summary?}]` |
//! | [`RouteList`] | `routes[0].{summary?}.{lengthInMeters,distance}` |
//! | [`DeepSearch`] | any nested object exposing time/distance fields |

use serde_json::Value;

use crate::estimate::RawEstimate;

/// Field names recognized as travel time in seconds, in priority order.
const TIME_KEYS: &[&str] = &[
    "duration_in_traffic",
    "travelTimeInSeconds",
    "etaSeconds",
    "eta_seconds",
    "durationSeconds",
    "duration",
    "travelTime",
    "travel_time",
];

/// Field names recognized as distance in metres, in priority order.
const DISTANCE_KEYS: &[&str] = &[
    "lengthInMeters",
    "distanceMeters",
    "distance_meters",
    "distance",
];

/// Array names holding flat per-origin summaries.
const SUMMARY_ARRAY_KEYS: &[&str] = &["summaries", "data", "results"];

/// Nested record names inside a flat summary entry.
const SUMMARY_RECORD_KEYS: &[&str] = &["routeSummary", "summary"];

/// Recursion limit for [`DeepSearch`].
const MAX_SEARCH_DEPTH: usize = 32;

/// What a caller needs from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// Any record with a travel time or a distance.
    Any,
    /// Only records carrying a distance.
    Distance,
}

impl Want {
    fn accepts(self, estimate: &RawEstimate) -> bool {
        match self {
            Want::Any => estimate.eta_seconds.is_some() || estimate.distance_meters.is_some(),
            Want::Distance => estimate.distance_meters.is_some(),
        }
    }
}

/// A named way of reading one response shape.
pub trait ShapeStrategy: Send + Sync {
    /// Extracts up to `slots` records in input order.
    ///
    /// Returns `None` when the shape is not recognized or yields nothing the
    /// caller wants, so the next strategy can try.
    fn extract(&self, response: &Value, slots: usize, want: Want)
        -> Option<Vec<Option<RawEstimate>>>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Reads a positive, finite number, either bare or wrapped as `{"value": n}`.
fn number_of(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => map.get("value").and_then(Value::as_f64),
        _ => None,
    }?;
    (n.is_finite() && n >= 0.0).then_some(n)
}

fn first_number(record: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| record.get(*k).and_then(number_of))
}

/// Reads a single record's time and distance fields.
///
/// Records marked with a non-`OK` `status` are treated as unresolved.
fn record_estimate(value: &Value) -> Option<RawEstimate> {
    let record = value.as_object()?;
    if let Some(status) = record.get("status").and_then(Value::as_str) {
        if !status.eq_ignore_ascii_case("ok") {
            return None;
        }
    }
    let estimate = RawEstimate::new(
        first_number(record, TIME_KEYS),
        first_number(record, DISTANCE_KEYS),
    );
    (estimate.eta_seconds.is_some() || estimate.distance_meters.is_some()).then_some(estimate)
}

fn finish(slots: Vec<Option<RawEstimate>>, want: Want) -> Option<Vec<Option<RawEstimate>>> {
    let found = slots.iter().flatten().any(|e| want.accepts(e));
    found.then_some(slots)
}

/// Matrix of rows, first cell per row. Row `i` belongs to origin `i`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixRows;

impl ShapeStrategy for MatrixRows {
    fn extract(
        &self,
        response: &Value,
        slots: usize,
        want: Want,
    ) -> Option<Vec<Option<RawEstimate>>> {
        let rows = response.get("rows")?.as_array()?;
        let out = (0..slots)
            .map(|i| {
                rows.get(i)
                    .and_then(|row| row.get("elements"))
                    .and_then(Value::as_array)
                    .and_then(|cells| cells.first())
                    .and_then(record_estimate)
                    .filter(|e| want.accepts(e))
            })
            .collect();
        finish(out, want)
    }

    fn name(&self) -> &'static str {
        "matrix_rows"
    }
}

/// Flat array of per-origin summaries.
///
/// An entry's `originIndex` places it; otherwise its array position does.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatSummaries;

impl ShapeStrategy for FlatSummaries {
    fn extract(
        &self,
        response: &Value,
        slots: usize,
        want: Want,
    ) -> Option<Vec<Option<RawEstimate>>> {
        let items = SUMMARY_ARRAY_KEYS
            .iter()
            .find_map(|k| response.get(*k).and_then(Value::as_array))?;

        let mut out = vec![None; slots];
        for (position, item) in items.iter().enumerate() {
            let index = item
                .get("originIndex")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            if index >= slots || out[index].is_some() {
                continue;
            }
            let record = SUMMARY_RECORD_KEYS
                .iter()
                .find_map(|k| item.get(*k))
                .unwrap_or(item);
            out[index] = record_estimate(record).filter(|e| want.accepts(e));
        }
        finish(out, want)
    }

    fn name(&self) -> &'static str {
        "flat_summaries"
    }
}

/// Single-route response: the first entry of `routes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteList;

impl ShapeStrategy for RouteList {
    fn extract(
        &self,
        response: &Value,
        slots: usize,
        want: Want,
    ) -> Option<Vec<Option<RawEstimate>>> {
        let route = response.get("routes")?.as_array()?.first()?;
        let estimate = SUMMARY_RECORD_KEYS
            .iter()
            .find_map(|k| route.get(*k))
            .and_then(record_estimate)
            .or_else(|| record_estimate(route))
            .filter(|e| want.accepts(e));
        let mut out = vec![None; slots];
        if let Some(first) = out.first_mut() {
            *first = estimate;
        }
        finish(out, want)
    }

    fn name(&self) -> &'static str {
        "route_list"
    }
}

/// Last resort: walk the whole document and take every object that exposes
/// time or distance fields, filling slots in traversal order.
///
/// Objects are visited in document order; a matching object is not searched
/// further.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepSearch;

impl DeepSearch {
    fn walk(value: &Value, depth: usize, want: Want, found: &mut Vec<RawEstimate>, limit: usize) {
        if found.len() >= limit || depth > MAX_SEARCH_DEPTH {
            return;
        }
        match value {
            Value::Object(map) => {
                if let Some(estimate) = record_estimate(value).filter(|e| want.accepts(e)) {
                    found.push(estimate);
                    return;
                }
                for child in map.values() {
                    Self::walk(child, depth + 1, want, found, limit);
                }
            }
            Value::Array(items) => {
                for child in items {
                    Self::walk(child, depth + 1, want, found, limit);
                }
            }
            _ => {}
        }
    }
}

impl ShapeStrategy for DeepSearch {
    fn extract(
        &self,
        response: &Value,
        slots: usize,
        want: Want,
    ) -> Option<Vec<Option<RawEstimate>>> {
        let mut found = Vec::with_capacity(slots);
        Self::walk(response, 0, want, &mut found, slots);
        let mut out: Vec<Option<RawEstimate>> = found.into_iter().map(Some).collect();
        out.resize(slots, None);
        finish(out, want)
    }

    fn name(&self) -> &'static str {
        "deep_search"
    }
}

/// Result of normalizing one batch response.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Name of the strategy that matched, `None` if the response was unparseable.
    pub strategy: Option<&'static str>,
    /// One slot per requested origin, in input order.
    pub estimates: Vec<Option<RawEstimate>>,
}

impl Normalized {
    pub fn is_unparseable(&self) -> bool {
        self.strategy.is_none()
    }

    /// Number of slots that received an estimate.
    pub fn resolved(&self) -> usize {
        self.estimates.iter().filter(|e| e.is_some()).count()
    }
}

/// Runs the batch and route strategy chains.
pub struct ResponseNormalizer {
    batch: Vec<Box<dyn ShapeStrategy>>,
    route: Vec<Box<dyn ShapeStrategy>>,
}

impl std::fmt::Debug for ResponseNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |list: &[Box<dyn ShapeStrategy>]| -> Vec<&'static str> {
            list.iter().map(|s| s.name()).collect()
        };
        f.debug_struct("ResponseNormalizer")
            .field("batch", &names(&self.batch))
            .field("route", &names(&self.route))
            .finish()
    }
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ResponseNormalizer {
    /// Creates the default chains, optionally ending in [`DeepSearch`].
    pub fn new(deep_search: bool) -> Self {
        let mut batch: Vec<Box<dyn ShapeStrategy>> =
            vec![Box::new(MatrixRows), Box::new(FlatSummaries)];
        let mut route: Vec<Box<dyn ShapeStrategy>> = vec![
            Box::new(RouteList),
            Box::new(MatrixRows),
            Box::new(FlatSummaries),
        ];
        if deep_search {
            batch.push(Box::new(DeepSearch));
            route.push(Box::new(DeepSearch));
        }
        Self { batch, route }
    }

    /// Normalizes a batch response into exactly `slots` entries.
    pub fn normalize_batch(&self, response: &Value, slots: usize) -> Normalized {
        for strategy in &self.batch {
            if let Some(estimates) = strategy.extract(response, slots, Want::Any) {
                return Normalized {
                    strategy: Some(strategy.name()),
                    estimates,
                };
            }
        }
        Normalized {
            strategy: None,
            estimates: vec![None; slots],
        }
    }

    /// Pulls the route distance out of a single-route response.
    pub fn route_distance(&self, response: &Value) -> Option<f64> {
        self.route.iter().find_map(|strategy| {
            strategy
                .extract(response, 1, Want::Distance)
                .and_then(|slots| slots.into_iter().next().flatten())
                .and_then(|e| e.distance_meters)
        })
    }
}
