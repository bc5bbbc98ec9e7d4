use std::str::FromStr;

use rand::Rng;
use shared::{Error, Result};

/// A one-dimensional distribution used for inter-arrival delays, key lengths and value sizes.
///
/// Every variant is expressed as an inverse CDF so the same generator can either draw fresh
/// values from an RNG or map a caller-supplied uniform variate deterministically.
#[derive(Clone, Debug, PartialEq)]
pub enum Generator {
    Fixed(f64),
    /// Uniform on `[0, scale)`
    Uniform { scale: f64 },
    Normal { mean: f64, sd: f64 },
    Exponential { lambda: f64 },
    Pareto { loc: f64, scale: f64, shape: f64 },
    /// Generalized Pareto
    GPareto { loc: f64, scale: f64, shape: f64 },
    /// Generalized extreme value
    Gev { loc: f64, scale: f64, shape: f64 },
}

impl Generator {
    /// Draws the next value.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        // (0, 1] keeps the logarithms and negative powers finite
        let u = 1.0 - rng.random::<f64>();
        self.generate_at(u)
    }

    /// Inverse CDF at `u` in `[0, 1]`.
    pub fn generate_at(&self, u: f64) -> f64 {
        match *self {
            Generator::Fixed(value) => value,
            Generator::Uniform { scale } => scale * u,
            Generator::Normal { mean, sd } => mean + sd * standard_normal_quantile(u),
            Generator::Exponential { lambda } => {
                if lambda <= 0.0 {
                    0.0
                } else {
                    -u.ln() / lambda
                }
            }
            Generator::Pareto { loc, scale, shape } => loc + scale / u.powf(1.0 / shape),
            Generator::GPareto { loc, scale, shape } => {
                if shape == 0.0 {
                    loc - scale * u.ln()
                } else {
                    loc + scale * (u.powf(-shape) - 1.0) / shape
                }
            }
            Generator::Gev { loc, scale, shape } => {
                let e = -u.ln();
                if shape == 0.0 {
                    loc - scale * e.ln()
                } else {
                    loc + scale * (e.powf(-shape) - 1.0) / shape
                }
            }
        }
    }

    /// Rescales the distribution so that its mean is `1 / lambda`.
    /// Distributions without a closed-form mean keep their parameters.
    pub fn set_lambda(&mut self, lambda: f64) {
        let mean = if lambda > 0.0 { 1.0 / lambda } else { 0.0 };
        match self {
            Generator::Fixed(value) => *value = mean,
            Generator::Uniform { scale } => *scale = 2.0 * mean,
            Generator::Normal { mean: m, .. } => *m = mean,
            Generator::Exponential { lambda: l } => *l = lambda,
            Generator::GPareto { loc, scale, shape } => {
                *scale = if lambda > 0.0 {
                    (1.0 - *shape) * (mean - *loc)
                } else {
                    0.0
                };
            }
            Generator::Pareto { .. } | Generator::Gev { .. } => {
                tracing::warn!("set_lambda has no effect on {:?}", self);
            }
        }
    }
}

impl FromStr for Generator {
    type Err = Error;

    /// Accepts a bare number (fixed), `name:arg,arg,...`, or one of the `fb_*` presets.
    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        match spec {
            "fb_key" => return "gev:30.7984,8.20449,0.078688".parse(),
            "fb_value" => return "gpareto:15.0,214.476,0.348238".parse(),
            "fb_ia" => return "gpareto:0.0,16.0292,0.154971".parse(),
            _ => {}
        }

        if let Ok(value) = spec.parse::<f64>() {
            return Ok(Generator::Fixed(value));
        }

        let (name, args) = spec.split_once(':').unwrap_or((spec, ""));
        let args = args
            .split(',')
            .filter(|a| !a.trim().is_empty())
            .map(|a| a.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidGenerator(spec.to_string()))?;
        let arg = |i: usize| args.get(i).copied().unwrap_or(1.0);

        let generator = match name {
            "fixed" => Generator::Fixed(arg(0)),
            "uniform" => Generator::Uniform { scale: arg(0) },
            "normal" => Generator::Normal {
                mean: arg(0),
                sd: arg(1),
            },
            "exponential" => Generator::Exponential { lambda: arg(0) },
            "pareto" => Generator::Pareto {
                loc: arg(0),
                scale: arg(1),
                shape: arg(2),
            },
            "gpareto" => Generator::GPareto {
                loc: arg(0),
                scale: arg(1),
                shape: arg(2),
            },
            "gev" => Generator::Gev {
                loc: arg(0),
                scale: arg(1),
                shape: arg(2),
            },
            _ => return Err(Error::InvalidGenerator(spec.to_string())),
        };

        Ok(generator)
    }
}

/// Quantile of the standard normal distribution (Acklam's rational approximation,
/// relative error below 1.2e-9).
fn standard_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239e0,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838e0,
        -2.549732539343734e0,
        4.374664141464968e0,
        2.938163982698783e0,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996e0,
        3.754408661907416e0,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_parse_specs() {
        assert_eq!("200".parse::<Generator>().unwrap(), Generator::Fixed(200.0));
        assert_eq!(
            "uniform:10".parse::<Generator>().unwrap(),
            Generator::Uniform { scale: 10.0 }
        );
        assert_eq!(
            "exponential".parse::<Generator>().unwrap(),
            Generator::Exponential { lambda: 1.0 }
        );
        assert_eq!(
            "fb_key".parse::<Generator>().unwrap(),
            Generator::Gev {
                loc: 30.7984,
                scale: 8.20449,
                shape: 0.078688
            }
        );
        assert!(matches!(
            "zipf:1".parse::<Generator>(),
            Err(Error::InvalidGenerator(_))
        ));
        assert!("normal:a,b".parse::<Generator>().is_err());
    }

    #[test]
    fn test_set_lambda_targets_the_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        for spec in ["exponential", "uniform", "fixed", "normal:0,0.0001", "fb_ia"] {
            let mut generator: Generator = spec.parse().unwrap();
            generator.set_lambda(1000.0);

            let n = 50_000;
            let mean = (0..n).map(|_| generator.generate(&mut rng)).sum::<f64>() / n as f64;
            assert!(
                (mean - 0.001).abs() < 0.0001,
                "{spec}: mean {mean} not close to 1ms"
            );
        }
    }

    #[test]
    fn test_zero_lambda_disables_delay() {
        let mut generator = Generator::Fixed(5.0);
        generator.set_lambda(0.0);
        assert_eq!(generator.generate_at(0.3), 0.0);

        let mut generator = Generator::Exponential { lambda: 1.0 };
        generator.set_lambda(0.0);
        assert_eq!(generator.generate_at(0.3), 0.0);
    }

    #[test]
    fn test_normal_quantile_is_symmetric() {
        assert!(standard_normal_quantile(0.5).abs() < 1e-9);
        let hi = standard_normal_quantile(0.975);
        assert!((hi - 1.959964).abs() < 1e-5);
        assert!((standard_normal_quantile(0.025) + hi).abs() < 1e-9);
    }

    #[test]
    fn test_generate_at_is_deterministic() {
        let generator: Generator = "gev:30,8,0.08".parse().unwrap();
        assert_eq!(generator.generate_at(0.42), generator.generate_at(0.42));
        assert!(generator.generate_at(0.2) < generator.generate_at(0.8));
    }
}
