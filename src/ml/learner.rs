// ============================================================
// Layer 5 — Model Adapters
// ============================================================
// Put the Burn CNN behind the domain traits so the training loop
// and the inference engine never touch tensors.
//
//   CnnLearner<B: AutodiffBackend>  Forward + Trainable + Snapshot
//     - holds the model and its Adam state for the whole run
//     - forward() evaluates the inner-backend view of the model,
//       so dropout is off and no autodiff graph is recorded
//
//   CnnPredictor<B: Backend>        Forward + Snapshot
//     - inference only, built once per engine
//
// Parameters are serialised with NamedMpkBytesRecorder at full
// precision, so a saved-then-loaded model reproduces the exact
// logits of the model that was saved.

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::{backend::AutodiffBackend, TensorData},
};

use crate::domain::{
    error::{CaptchaError, Result},
    sample::{Batch, Matrix},
    traits::{Forward, Snapshot, Trainable},
};
use crate::ml::model::CaptchaCnn;

type ParamRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// Copy a row-major matrix into a `[rows, cols]` tensor on `device`.
pub fn to_tensor<B: Backend>(matrix: &Matrix, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(matrix.as_slice().to_vec(), matrix.shape()), device)
}

/// Read a `[rows, cols]` tensor back as f32.
pub fn to_matrix<B: Backend>(tensor: Tensor<B, 2>) -> Result<Matrix> {
    let [rows, cols] = tensor.dims();
    let data = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CaptchaError::Model(format!("cannot read tensor data: {e:?}")))?;
    Matrix::new(rows, cols, data)
}

fn record_bytes<B: Backend>(model: &CaptchaCnn<B>) -> Result<Vec<u8>> {
    ParamRecorder::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| CaptchaError::Model(format!("cannot serialise parameters: {e}")))
}

fn load_bytes<B: Backend>(
    model:  &CaptchaCnn<B>,
    bytes:  Vec<u8>,
    device: &B::Device,
) -> Result<CaptchaCnn<B>> {
    let record = ParamRecorder::default()
        .load(bytes, device)
        .map_err(|e| CaptchaError::Model(format!("cannot decode parameters: {e}")))?;
    Ok(model.clone().load_record(record))
}

// ─── CnnLearner ──────────────────────────────────────────────────────────────
/// Trainable CNN: owns the autodiff model and its optimiser state.
pub struct CnnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<CaptchaCnn<B>, B>,
{
    model:  CaptchaCnn<B>,
    optim:  O,
    lr:     f64,
    device: B::Device,
}

impl<B, O> CnnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<CaptchaCnn<B>, B>,
{
    pub fn new(model: CaptchaCnn<B>, optim: O, lr: f64, device: B::Device) -> Self {
        Self { model, optim, lr, device }
    }
}

impl<B, O> Forward for CnnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<CaptchaCnn<B>, B>,
{
    fn forward(&self, features: &Matrix) -> Result<Matrix> {
        // valid() → CaptchaCnn<B::InnerBackend>, dropout disabled
        let model = self.model.valid();
        to_matrix(model.forward(to_tensor::<B::InnerBackend>(features, &self.device)))
    }
}

impl<B, O> Trainable for CnnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<CaptchaCnn<B>, B>,
{
    fn step(&mut self, batch: &Batch) -> Result<f32> {
        let features = to_tensor::<B>(&batch.features, &self.device);
        let labels   = to_tensor::<B>(&batch.labels, &self.device);

        let loss     = self.model.forward_loss(features, labels);
        let loss_val = loss.clone().into_scalar().elem::<f32>();

        // Backward pass + Adam update
        let grads  = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(self.lr, self.model.clone(), grads);

        Ok(loss_val)
    }
}

impl<B, O> Snapshot for CnnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<CaptchaCnn<B>, B>,
{
    fn params_to_bytes(&self) -> Result<Vec<u8>> {
        record_bytes(&self.model)
    }

    fn params_from_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.model = load_bytes(&self.model, bytes, &self.device)?;
        Ok(())
    }
}

// ─── CnnPredictor ────────────────────────────────────────────────────────────
/// Inference-only CNN on a plain backend.
pub struct CnnPredictor<B: Backend> {
    model:  CaptchaCnn<B>,
    device: B::Device,
}

impl<B: Backend> CnnPredictor<B> {
    pub fn new(model: CaptchaCnn<B>, device: B::Device) -> Self {
        Self { model, device }
    }
}

impl<B: Backend> Forward for CnnPredictor<B> {
    fn forward(&self, features: &Matrix) -> Result<Matrix> {
        to_matrix(self.model.forward(to_tensor(features, &self.device)))
    }
}

impl<B: Backend> Snapshot for CnnPredictor<B> {
    fn params_to_bytes(&self) -> Result<Vec<u8>> {
        record_bytes(&self.model)
    }

    fn params_from_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.model = load_bytes(&self.model, bytes, &self.device)?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::CaptchaCnnConfig;
    use burn::{
        backend::{Autodiff, NdArray},
        optim::AdamConfig,
    };

    type TestBackend     = Autodiff<NdArray>;
    type TestInnerBackend = NdArray;

    fn batch() -> Batch {
        let features: Vec<f32> = (0..2 * 64).map(|i| (i % 7) as f32 / 7.0).collect();
        Batch {
            features: Matrix::new(2, 64, features).unwrap(),
            labels:   Matrix::new(2, 4, vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]).unwrap(),
        }
    }

    #[test]
    fn test_step_changes_parameters_and_reports_finite_loss() {
        let device = Default::default();
        let config = CaptchaCnnConfig::new(8, 8, 2, 2);
        let model  = config.init::<TestBackend>(&device).unwrap();
        let mut learner = CnnLearner::new(model, AdamConfig::new().init(), 1e-3, device);

        let before = learner.forward(&batch().features).unwrap();
        let loss   = learner.step(&batch()).unwrap();
        let after  = learner.forward(&batch().features).unwrap();

        assert!(loss.is_finite() && loss > 0.0);
        assert_ne!(before, after);
    }

    #[test]
    fn test_forward_does_not_mutate() {
        let device  = Default::default();
        let model   = CaptchaCnnConfig::new(8, 8, 2, 2).init::<TestBackend>(&device).unwrap();
        let learner = CnnLearner::new(model, AdamConfig::new().init(), 1e-3, device);

        let x = batch().features;
        assert_eq!(learner.forward(&x).unwrap(), learner.forward(&x).unwrap());
    }

    #[test]
    fn test_learner_params_load_into_predictor_exactly() {
        let device = Default::default();
        let config = CaptchaCnnConfig::new(8, 8, 2, 2);
        let model  = config.init::<TestBackend>(&device).unwrap();
        let mut learner = CnnLearner::new(model, AdamConfig::new().init(), 1e-3, device.clone());
        learner.step(&batch()).unwrap();

        let fresh = config.init::<TestInnerBackend>(&device).unwrap();
        let mut predictor = CnnPredictor::new(fresh, device);
        predictor.params_from_bytes(learner.params_to_bytes().unwrap()).unwrap();

        let x = batch().features;
        let expected = learner.forward(&x).unwrap();
        let actual   = predictor.forward(&x).unwrap();
        for (a, b) in expected.as_slice().iter().zip(actual.as_slice()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_garbage_bytes_leave_model_untouched() {
        let device = Default::default();
        let model  = CaptchaCnnConfig::new(8, 8, 2, 2).init::<TestInnerBackend>(&device).unwrap();
        let mut predictor = CnnPredictor::new(model, device);

        let x      = batch().features;
        let before = predictor.forward(&x).unwrap();
        assert!(predictor.params_from_bytes(vec![1, 2, 3]).is_err());
        assert_eq!(before, predictor.forward(&x).unwrap());
    }
}
