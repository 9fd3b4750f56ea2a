use crate::config::OptimizerParams;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, SgdConfig};

/// Adam epsilon; matches the usual 1e-8 rather than Burn's 1e-5 default.
pub const ADAM_EPSILON: f32 = 1e-8;

/// SGD with classical momentum (no dampening, no Nesterov) and L2 weight decay.
pub fn sgd_config(params: &OptimizerParams) -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(MomentumConfig {
            momentum: params.momentum,
            dampening: 0.0,
            nesterov: false,
        }))
        .with_weight_decay(Some(WeightDecayConfig::new(params.weight_decay)))
}

pub fn adam_config(params: &OptimizerParams) -> AdamConfig {
    AdamConfig::new()
        .with_epsilon(ADAM_EPSILON)
        .with_weight_decay(Some(WeightDecayConfig::new(params.weight_decay)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerKind;

    #[test]
    fn sgd_carries_momentum_and_decay() {
        let cfg = sgd_config(&OptimizerParams::range_test(OptimizerKind::Sgd));
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["momentum"]["momentum"].as_f64(), Some(0.9));
        assert_eq!(json["momentum"]["dampening"].as_f64(), Some(0.0));
        assert_eq!(json["momentum"]["nesterov"].as_bool(), Some(false));
        let penalty = json["weight_decay"]["penalty"].as_f64().unwrap();
        assert!((penalty - 5e-4).abs() < 1e-9);
    }

    #[test]
    fn adam_carries_decay_and_epsilon() {
        let cfg = adam_config(&OptimizerParams::with_lr(0.05));
        let json = serde_json::to_value(&cfg).unwrap();
        let penalty = json["weight_decay"]["penalty"].as_f64().unwrap();
        assert!((penalty - 5e-4).abs() < 1e-9);
        let eps = json["epsilon"].as_f64().unwrap();
        assert!((eps - 1e-8).abs() < 1e-12);
    }
}
