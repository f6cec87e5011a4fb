//! Small statistics toolkit used by the detectors and A/B analysis

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n - 1 denominator)
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64)
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).map_or(0.0, f64::sqrt)
}

/// Least-squares fit of `values` against their index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub slope: f64,
    /// Pearson correlation between index and value
    pub correlation: f64,
    pub mean: f64,
}

impl Trend {
    pub fn is_increasing(&self) -> bool {
        self.slope > 0.0
    }

    /// Change across the whole window relative to the mean
    pub fn relative_change(&self, len: usize) -> f64 {
        if self.mean == 0.0 || len < 2 {
            return 0.0;
        }
        self.slope * (len - 1) as f64 / self.mean.abs()
    }
}

pub fn linear_trend(values: &[f64]) -> Option<Trend> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = mean(values)?;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denominator = (sxx * syy).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return None;
    }

    Some(Trend {
        slope: sxy / sxx,
        correlation: sxy / denominator,
        mean: mean_y,
    })
}

/// Values outside the 1.5 x IQR fences
#[derive(Debug, Clone, PartialEq)]
pub struct Outliers {
    pub count: usize,
    pub lower_fence: f64,
    pub upper_fence: f64,
    /// Largest distance beyond a fence, in IQR units
    pub max_deviation: f64,
}

impl Outliers {
    pub fn confidence(&self) -> f64 {
        (0.5 + self.max_deviation * 0.1).min(0.95)
    }
}

/// IQR outlier scan; `None` with fewer than five values or no outliers.
///
/// Quartiles are taken by index (`n/4` and `3n/4`) rather than interpolated.
pub fn iqr_outliers(values: &[f64]) -> Option<Outliers> {
    let n = values.len();
    if n < 5 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q1 = sorted[n / 4];
    let q3 = sorted[3 * n / 4];
    let iqr = q3 - q1;
    let lower_fence = q1 - 1.5 * iqr;
    let upper_fence = q3 + 1.5 * iqr;

    let mut count = 0;
    let mut max_deviation: f64 = 0.0;
    for &v in values {
        let beyond = if v < lower_fence {
            lower_fence - v
        } else if v > upper_fence {
            v - upper_fence
        } else {
            continue;
        };
        count += 1;
        if iqr > 0.0 {
            max_deviation = max_deviation.max(beyond / iqr);
        }
    }

    (count > 0).then_some(Outliers {
        count,
        lower_fence,
        upper_fence,
        max_deviation,
    })
}

/// Count every contiguous run of 2 to 5 items, keyed as `a -> b -> c`.
/// Only runs seen more than once are returned.
pub fn common_subsequences(items: &[String]) -> BTreeMap<String, usize> {
    const MIN_LEN: usize = 2;
    const MAX_LEN: usize = 5;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for start in 0..items.len() {
        for len in MIN_LEN..=MAX_LEN {
            let Some(window) = items.get(start..start + len) else {
                break;
            };
            *counts.entry(window.join(" -> ")).or_default() += 1;
        }
    }
    counts.retain(|_, count| *count > 1);
    counts
}

/// Keys present in at least 70% of `contexts` whose most common value
/// covers at least 60% of the contexts carrying the key.
pub fn common_context_factors(contexts: &[&Map<String, Value>]) -> Map<String, Value> {
    let mut factors = Map::new();
    if contexts.is_empty() {
        return factors;
    }

    let mut by_key: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for ctx in contexts {
        for (key, value) in ctx.iter() {
            by_key.entry(key.as_str()).or_default().push(value);
        }
    }

    for (key, values) in by_key {
        if (values.len() as f64) < contexts.len() as f64 * 0.7 {
            continue;
        }
        let mut tally: HashMap<String, (usize, &Value)> = HashMap::new();
        for &value in &values {
            tally.entry(value.to_string()).or_insert((0, value)).0 += 1;
        }
        let best = tally
            .into_iter()
            .max_by(|(ka, (ca, _)), (kb, (cb, _))| ca.cmp(cb).then_with(|| kb.cmp(ka)));
        if let Some((_, (count, value))) = best {
            if count as f64 >= values.len() as f64 * 0.6 {
                factors.insert(key.to_string(), value.clone());
            }
        }
    }
    factors
}

/// Outcome of Welch's unequal-variance two-sample t-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t: f64,
    pub degrees_of_freedom: f64,
    /// Two-sided
    pub p_value: f64,
}

/// `None` unless both samples have at least two values
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchTest> {
    let (mean_a, mean_b) = (mean(a)?, mean(b)?);
    let (var_a, var_b) = (variance(a)?, variance(b)?);
    let (na, nb) = (a.len() as f64, b.len() as f64);

    let se_a = var_a / na;
    let se_b = var_b / nb;
    let se = (se_a + se_b).sqrt();

    if se == 0.0 {
        // Both samples are constant
        let p_value = if mean_a == mean_b { 1.0 } else { 0.0 };
        return Some(WelchTest {
            t: 0.0,
            degrees_of_freedom: na + nb - 2.0,
            p_value,
        });
    }

    let t = (mean_a - mean_b) / se;
    let df = (se_a + se_b).powi(2) / (se_a.powi(2) / (na - 1.0) + se_b.powi(2) / (nb - 1.0));
    let p_value = regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t)).clamp(0.0, 1.0);

    Some(WelchTest {
        t,
        degrees_of_freedom: df,
        p_value,
    })
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// I_x(a, b) by Lentz's continued fraction
fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 3e-14;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let (qab, qap, qam) = (a + b, a + 1.0, a - 1.0);
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}
