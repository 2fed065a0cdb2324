use candle_core::{D, DType, Tensor};

use super::error::{TrainingError, TrainingResult};

/// Listwise cross-entropy over the candidates of each group.
///
/// `predict` is `[batch, group]` scores and `label` the `[batch]` index of the relevant
/// candidate. Without a mask the result is the (class-weighted) mean negative
/// log-likelihood. With a mask, each example's weighted loss is scaled by its mask
/// value and the sum is divided by the mask total.
pub fn compute_loss(
    predict: &Tensor,
    label: &Tensor,
    mask: Option<&Tensor>,
    class_weights: Option<&Tensor>,
) -> TrainingResult<Tensor> {
    let (batch, group) = predict.dims2().map_err(|_| {
        TrainingError::shape(format!(
            "predict must be [batch, group], got {:?}",
            predict.dims()
        ))
    })?;

    if label.dims() != [batch] {
        return Err(TrainingError::shape(format!(
            "label must be [{batch}], got {:?}",
            label.dims()
        )));
    }
    let label = label.to_dtype(DType::U32)?;
    if let Some(max) = label.to_vec1::<u32>()?.into_iter().max() {
        if max as usize >= group {
            return Err(TrainingError::shape(format!(
                "label {max} out of range for group size {group}"
            )));
        }
    }

    let log_probs = candle_nn::ops::log_softmax(predict, D::Minus1)?;
    let nll = log_probs
        .gather(&label.unsqueeze(1)?, 1)?
        .squeeze(1)?
        .neg()?;

    let example_weights = match class_weights {
        Some(weights) => {
            if weights.dims() != [group] {
                return Err(TrainingError::shape(format!(
                    "class_weights must be [{group}], got {:?}",
                    weights.dims()
                )));
            }
            Some(
                weights
                    .to_dtype(predict.dtype())?
                    .to_device(predict.device())?
                    .index_select(&label, 0)?,
            )
        }
        None => None,
    };

    let per_example = match &example_weights {
        Some(w) => (&nll * w)?,
        None => nll,
    };

    match mask {
        Some(mask) => {
            if mask.dims() != [batch] {
                return Err(TrainingError::shape(format!(
                    "mask must be [{batch}], got {:?}",
                    mask.dims()
                )));
            }
            let mask = mask.to_dtype(predict.dtype())?;
            let total = mask.sum_all()?;
            if total.to_dtype(DType::F64)?.to_scalar::<f64>()? == 0.0 {
                return Err(TrainingError::EmptyMask);
            }
            Ok((&per_example * &mask)?.sum_all()?.div(&total)?)
        }
        None => match &example_weights {
            Some(w) => Ok(per_example.sum_all()?.div(&w.sum_all()?)?),
            None => Ok(per_example.mean_all()?),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    fn fixture(device: &Device) -> (Tensor, Tensor) {
        let predict = Tensor::new(&[[2.0f32, 0.5, -1.0], [0.1, 0.2, 0.3]], device).unwrap();
        let label = Tensor::new(&[0u32, 2], device).unwrap();
        (predict, label)
    }

    fn reference_nll(row: &[f32], target: usize) -> f32 {
        let max = row.iter().cloned().fold(f32::MIN, f32::max);
        let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
        log_sum - row[target]
    }

    #[test]
    fn test_unmasked_mean() {
        let device = Device::Cpu;
        let (predict, label) = fixture(&device);
        let loss = compute_loss(&predict, &label, None, None).unwrap();

        let expected =
            (reference_nll(&[2.0, 0.5, -1.0], 0) + reference_nll(&[0.1, 0.2, 0.3], 2)) / 2.0;
        assert!((scalar(&loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_all_ones_mask_equals_unmasked() {
        let device = Device::Cpu;
        let (predict, label) = fixture(&device);
        let mask = Tensor::ones(2, DType::F32, &device).unwrap();

        let plain = compute_loss(&predict, &label, None, None).unwrap();
        let masked = compute_loss(&predict, &label, Some(&mask), None).unwrap();
        assert!((scalar(&plain) - scalar(&masked)).abs() < 1e-6);
    }

    #[test]
    fn test_partial_mask_selects_examples() {
        let device = Device::Cpu;
        let (predict, label) = fixture(&device);
        let mask = Tensor::new(&[0.0f32, 1.0], &device).unwrap();

        let loss = compute_loss(&predict, &label, Some(&mask), None).unwrap();
        let expected = reference_nll(&[0.1, 0.2, 0.3], 2);
        assert!((scalar(&loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_all_zero_mask_rejected() {
        let device = Device::Cpu;
        let (predict, label) = fixture(&device);
        let mask = Tensor::zeros(2, DType::F32, &device).unwrap();

        let err = compute_loss(&predict, &label, Some(&mask), None).unwrap_err();
        assert!(matches!(err, TrainingError::EmptyMask));
    }

    #[test]
    fn test_class_weights_weighted_mean() {
        let device = Device::Cpu;
        let (predict, label) = fixture(&device);
        let weights = Tensor::new(&[3.0f32, 1.0, 1.0], &device).unwrap();

        let loss = compute_loss(&predict, &label, None, Some(&weights)).unwrap();
        let a = reference_nll(&[2.0, 0.5, -1.0], 0);
        let b = reference_nll(&[0.1, 0.2, 0.3], 2);
        let expected = (3.0 * a + b) / 4.0;
        assert!((scalar(&loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_shape_checks() {
        let device = Device::Cpu;
        let (predict, label) = fixture(&device);

        let flat = Tensor::new(&[1.0f32, 2.0], &device).unwrap();
        assert!(matches!(
            compute_loss(&flat, &label, None, None),
            Err(TrainingError::ShapeMismatch { .. })
        ));

        let out_of_range = Tensor::new(&[0u32, 3], &device).unwrap();
        assert!(compute_loss(&predict, &out_of_range, None, None).is_err());

        let wrong_weights = Tensor::ones(2, DType::F32, &device).unwrap();
        assert!(compute_loss(&predict, &label, None, Some(&wrong_weights)).is_err());

        let wrong_mask = Tensor::ones(3, DType::F32, &device).unwrap();
        assert!(compute_loss(&predict, &label, Some(&wrong_mask), None).is_err());
    }

    #[test]
    fn test_loss_is_differentiable() {
        let device = Device::Cpu;
        let var = candle_core::Var::new(&[[0.3f32, -0.2], [1.0, 0.0]], &device).unwrap();
        let label = Tensor::new(&[1u32, 0], &device).unwrap();

        let loss = compute_loss(var.as_tensor(), &label, None, None).unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(var.as_tensor()).is_some());
    }
}
