// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Random value generation for payload attributes.
//!
//! Every generator takes its bounds as raw JSON (as authored in the device
//! type), validates each one independently, substitutes the documented
//! default for anything missing or malformed, and clamps inverted ranges.
//! Generation never fails.

use std::f64::consts::PI;

use chrono::{TimeZone, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::UnitDisc;
use serde_json::{json, Value};

/// Fallback center used when a location's coordinates are invalid.
pub const DEFAULT_LATITUDE: f64 = 38.9072;
pub const DEFAULT_LONGITUDE: f64 = -77.0369;
/// Fallback location radius in meters (one mile).
pub const DEFAULT_RADIUS_M: f64 = 1609.3;

/// Ticks per full period of a `sinusoidal` attribute.
pub const SINUSOIDAL_PERIOD_TICKS: f64 = 36.0;
/// Per-tick exponent of a `decay` attribute.
pub const DECAY_RATE: f64 = 0.1;
/// Longest generated `string` or `id`; longer requests use the defaults.
pub const MAX_STRING_LENGTH: i64 = 4096;
/// Most elements a `range` may produce; larger ranges use the defaults.
pub const MAX_RANGE_ELEMENTS: i64 = 10_000;

const METERS_PER_DEGREE: f64 = 111_320.0;
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const SHORTID_ALPHABET: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_-";

/// Read an integer bound. Floats with no fractional part count.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    value.as_f64().filter(|f| f.is_finite())
}

/// Integer bound with a default, optionally required to be non-negative.
fn int_or(value: &Value, default: i64, non_negative: bool) -> i64 {
    match as_int(value) {
        Some(v) if !non_negative || v >= 0 => v,
        _ => default,
    }
}

/// Random value generator for attribute specs.
#[derive(Debug, Clone)]
pub struct AttributeGenerator<R: Rng = StdRng> {
    rng: R,
}

impl AttributeGenerator<StdRng> {
    /// Create a generator seeded from entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a reproducible generator
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for AttributeGenerator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> AttributeGenerator<R> {
    /// Wrap an existing random source
    pub fn from_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Access the underlying random source
    pub fn rng(&mut self) -> &mut R {
        &mut self.rng
    }

    /// Lowercase string with length in `[min, max]` (defaults 3, 7).
    pub fn str(&mut self, min: &Value, max: &Value) -> String {
        let (min, max) = match int_or(max, 7, true) {
            max if max > MAX_STRING_LENGTH => (3, 7),
            max => (int_or(min, 3, true).min(max), max),
        };
        let len = self.rng.gen_range(min..=max) as usize;
        (0..len)
            .map(|_| LOWERCASE[self.rng.gen_range(0..LOWERCASE.len())] as char)
            .collect()
    }

    /// Integer in `[min, max]` (defaults 0, 5).
    pub fn int(&mut self, min: &Value, max: &Value) -> i64 {
        let max = int_or(max, 5, false);
        let min = int_or(min, 0, false).min(max);
        self.rng.gen_range(min..=max)
    }

    /// Float built from an integer part in `[imin, imax]` and a decimal part
    /// in `[dmin, dmax]`, rounded to `precision` digits.
    ///
    /// The decimal part contributes its digits verbatim: integer part 3 and
    /// decimal part 57 give 3.57. Defaults are (0, 0, 0, 99, 1).
    pub fn float(
        &mut self,
        imin: &Value,
        imax: &Value,
        dmin: &Value,
        dmax: &Value,
        precision: &Value,
    ) -> f64 {
        let imax = int_or(imax, 0, false);
        let imin = int_or(imin, 0, false).min(imax);
        let dmax = int_or(dmax, 99, true);
        let dmin = int_or(dmin, 0, true).min(dmax);
        let precision = int_or(precision, 1, true).min(8) as i32;

        let whole = self.rng.gen_range(imin..=imax);
        let decimal = self.rng.gen_range(dmin..=dmax);

        let digits = decimal.to_string();
        let fraction = decimal as f64 / 10f64.powi(digits.len() as i32);
        let magnitude = whole.unsigned_abs() as f64 + fraction;
        let value = if whole < 0 { -magnitude } else { magnitude };

        let scale = 10f64.powi(precision);
        (value * scale).round() / scale
    }

    /// Seeded boolean: draws an integer in `[min, max]` and reports whether it
    /// falls below `seed`. Defaults (0, 5, 2).
    pub fn bool(&mut self, min: &Value, max: &Value, seed: &Value) -> bool {
        let max = int_or(max, 5, false);
        let min = int_or(min, 0, false).min(max);
        let seed = int_or(seed, 2, false);
        self.rng.gen_range(min..=max) < seed
    }

    /// Inclusive arithmetic sequence (defaults 0, 10, 2).
    ///
    /// An inverted range yields the single element `[stop]`.
    pub fn range(start: &Value, stop: &Value, step: &Value) -> Vec<i64> {
        let start = int_or(start, 0, false);
        let stop = int_or(stop, 10, false);
        let step = match as_int(step) {
            Some(s) if s > 0 => s,
            _ => 2,
        };
        if start > stop {
            return vec![stop];
        }
        let count = (stop as i128 - start as i128) / step as i128 + 1;
        if count > MAX_RANGE_ELEMENTS as i128 {
            return (0..=10).step_by(2).collect();
        }
        (start..=stop).step_by(step as usize).collect()
    }

    /// One element of `arr`, uniformly (default `[1, 2, 3, 4, 5]`).
    pub fn pick_one(&mut self, arr: &Value) -> Value {
        let choices = choices_or_default(arr);
        choices
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// `count` distinct elements of `arr` (default count 2, at least 1).
    ///
    /// Selected elements keep their original order unless `shuffle` is true.
    pub fn pick_some(&mut self, arr: &Value, count: &Value, shuffle: &Value) -> Vec<Value> {
        let choices = choices_or_default(arr);
        let count = match as_int(count) {
            Some(c) if c > 0 => c as usize,
            _ => 2,
        }
        .min(choices.len());

        let mut indices = rand::seq::index::sample(&mut self.rng, choices.len(), count).into_vec();
        if !shuffle.as_bool().unwrap_or(false) {
            indices.sort_unstable();
        }
        indices.into_iter().map(|i| choices[i].clone()).collect()
    }

    /// A point drawn uniformly within `radius` meters of `(lat, long)`.
    ///
    /// Out-of-range coordinates fall back to the default center and a
    /// non-positive radius to one mile.
    pub fn location(&mut self, lat: &Value, long: &Value, radius: &Value) -> (f64, f64) {
        let lat = as_float(lat)
            .filter(|l| (-90.0..=90.0).contains(l))
            .unwrap_or(DEFAULT_LATITUDE);
        let long = as_float(long)
            .filter(|l| (-180.0..=180.0).contains(l))
            .unwrap_or(DEFAULT_LONGITUDE);
        let radius = as_float(radius)
            .filter(|r| *r > 0.0)
            .unwrap_or(DEFAULT_RADIUS_M);

        let [x, y]: [f64; 2] = UnitDisc.sample(&mut self.rng);
        let d_lat = y * radius / METERS_PER_DEGREE;
        let d_long = x * radius / (METERS_PER_DEGREE * lat.to_radians().cos().max(1e-6));
        (lat + d_lat, long + d_long)
    }

    /// Random v4 UUID
    pub fn uuid(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid().to_string()
    }

    /// Short URL-safe identifier (9 characters)
    pub fn shortid(&mut self) -> String {
        (0..9)
            .map(|_| SHORTID_ALPHABET[self.rng.gen_range(0..SHORTID_ALPHABET.len())] as char)
            .collect()
    }

    /// Identifier drawn from a named character set (default alphanumeric, length 21)
    pub fn id(&mut self, char_set: &Value, length: &Value) -> String {
        let alphabet: &[u8] = match char_set.as_str() {
            Some("alpha") => b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz",
            Some("numeric") => b"0123456789",
            Some("hex") => b"0123456789abcdef",
            _ => b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz",
        };
        let length = match as_int(length) {
            Some(l) if l > 0 && l <= MAX_STRING_LENGTH => l as usize,
            _ => 21,
        };
        (0..length)
            .map(|_| alphabet[self.rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    /// Timestamp for `now_ms`: epoch millis string for `"unix"`, else
    /// `YYYY-MM-DDTHH:mm:ss` (UTC).
    pub fn ts(format: &Value, now_ms: u64) -> String {
        if format.as_str() == Some("unix") {
            return now_ms.to_string();
        }
        match Utc.timestamp_millis_opt(now_ms as i64).single() {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => now_ms.to_string(),
        }
    }

    /// Sine wave between `min` and `max` (defaults 0, 100) indexed by tick count.
    pub fn sinusoidal(min: &Value, max: &Value, cnt: u64) -> f64 {
        let (min, max) = float_bounds(min, max);
        let mid = (min + max) / 2.0;
        let amplitude = (max - min) / 2.0;
        let angle = 2.0 * PI * cnt as f64 / SINUSOIDAL_PERIOD_TICKS;
        mid + amplitude * angle.sin()
    }

    /// Exponential fall from `max` toward `min` (defaults 0, 100) by tick count.
    pub fn decay(min: &Value, max: &Value, cnt: u64) -> f64 {
        let (min, max) = float_bounds(min, max);
        min + (max - min) * (-DECAY_RATE * cnt as f64).exp()
    }

    /// Raw access for callers needing a plain uniform draw.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..high)
    }
}

fn float_bounds(min: &Value, max: &Value) -> (f64, f64) {
    let max = as_float(max).unwrap_or(100.0);
    let min = as_float(min).unwrap_or(0.0).min(max);
    (min, max)
}

fn choices_or_default(arr: &Value) -> Vec<Value> {
    match arr {
        Value::Array(items) if !items.is_empty() => items.clone(),
        _ => vec![json!(1), json!(2), json!(3), json!(4), json!(5)],
    }
}
