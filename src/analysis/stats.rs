//! Descriptive statistics and Welch's two-sample t-test

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample variance (n - 1 denominator); needs at least two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
}

/// Welch's unequal-variance t-test, two-tailed. `None` if either side has
/// fewer than two values.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchTest> {
    let (ma, mb) = (mean(a)?, mean(b)?);
    let (va, vb) = (sample_variance(a)?, sample_variance(b)?);
    let (na, nb) = (a.len() as f64, b.len() as f64);

    let qa = va / na;
    let qb = vb / nb;
    let se_sq = qa + qb;

    // Both samples constant: the test degenerates.
    if se_sq == 0.0 {
        let p_value = if ma == mb { 1.0 } else { 0.0 };
        return Some(WelchTest {
            t: 0.0,
            df: na + nb - 2.0,
            p_value,
        });
    }

    let t = (ma - mb) / se_sq.sqrt();
    let df = se_sq.powi(2) / (qa.powi(2) / (na - 1.0) + qb.powi(2) / (nb - 1.0));

    Some(WelchTest {
        t,
        df,
        p_value: student_t_two_tailed(t, df),
    })
}

/// Cohen's d with the pooled sample standard deviation, `a` minus `b`.
/// Zero when the pooled deviation vanishes.
pub fn cohens_d(a: &[f64], b: &[f64]) -> Option<f64> {
    let (ma, mb) = (mean(a)?, mean(b)?);
    let (va, vb) = (sample_variance(a)?, sample_variance(b)?);
    let (na, nb) = (a.len() as f64, b.len() as f64);

    let pooled = (((na - 1.0) * va + (nb - 1.0) * vb) / (na + nb - 2.0)).sqrt();
    if pooled > 0.0 {
        Some((ma - mb) / pooled)
    } else {
        Some(0.0)
    }
}

/// P(|T| >= |t|) for Student's t with `df` degrees of freedom.
pub fn student_t_two_tailed(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

// ==== Special functions ====

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7.
    const COEFFS: [f64; 9] = [
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

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// I_x(a, b) via the continued fraction (modified Lentz).
fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_descriptive() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        assert_eq!(median(&values), Some(4.5));
        assert!(close(sample_std(&values).unwrap(), 2.138_089_935, 1e-6));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(sample_std(&[1.0]), None);
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_student_t_reference_values() {
        // t = 2.228 is the 97.5% quantile at 10 degrees of freedom.
        assert!(close(student_t_two_tailed(2.228, 10.0), 0.05, 1e-3));
        // With one degree of freedom the distribution is Cauchy: P(|T|>1) = 0.5.
        assert!(close(student_t_two_tailed(1.0, 1.0), 0.5, 1e-9));
        assert!(close(student_t_two_tailed(0.0, 5.0), 1.0, 1e-12));
    }

    #[test]
    fn test_welch_and_effect_size() {
        let a = [10.0, 12.0, 11.0, 13.0, 12.0];
        let b = [20.0, 22.0, 21.0, 19.0, 23.0];

        let test = welch_t_test(&a, &b).unwrap();
        assert!(test.t < 0.0);
        assert!(test.p_value < 0.001);

        let d = cohens_d(&a, &b).unwrap();
        assert!(d < -0.8);

        let same = welch_t_test(&a, &a).unwrap();
        assert!(close(same.p_value, 1.0, 1e-9));
        assert!(welch_t_test(&a, &[1.0]).is_none());
    }
}
