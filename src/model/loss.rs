use crate::BCE_EPSILON;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Mean binary cross-entropy of probabilities against 0/1 targets.
///
/// Predictions are clamped to `[ε, 1 - ε]` so that saturated sigmoid
/// outputs give a large finite loss instead of infinity.
pub fn binary_cross_entropy<B: Backend>(
    predictions: Tensor<B, 1>,
    targets: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let p = predictions.clamp(BCE_EPSILON, 1. - BCE_EPSILON);
    let positive = targets.clone() * p.clone().log();
    let negative = targets.neg().add_scalar(1.) * p.neg().add_scalar(1.).log();
    (positive + negative).mean().neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;
    use burn::tensor::TensorData;

    type B = NdArray;

    fn bce(p: Vec<f32>, t: Vec<f32>) -> f32 {
        let device = Default::default();
        let n = p.len();
        let p = Tensor::<B, 1>::from_data(TensorData::new(p, [n]), &device);
        let t = Tensor::<B, 1>::from_data(TensorData::new(t, [n]), &device);
        binary_cross_entropy(p, t).into_scalar().elem::<f32>()
    }

    #[test]
    fn perfect() {
        assert!(bce(vec![1., 0.], vec![1., 0.]) < 1e-5);
    }

    #[test]
    fn uniform() {
        let loss = bce(vec![0.5, 0.5], vec![1., 0.]);
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn saturated() {
        let loss = bce(vec![0., 1.], vec![1., 0.]);
        assert!(loss.is_finite());
        assert!(loss > 10.);
    }
}
