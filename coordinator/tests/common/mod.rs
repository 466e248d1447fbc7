#![allow(dead_code)]

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use coordinator::{
    Conversion, Converter, ShardConverter,
    error::ConversionErr,
};
use safetensors::{Dtype, tensor::TensorView};
use serde_json::{Value, json};

/// A three-tensor model: `conv/kernel` [2, 3] f32, `conv/bias` [3] f32 and
/// `norm/scale` [1] f64. Ten weights in total.
pub fn model_bytes() -> Vec<u8> {
    let kernel: Vec<u8> = bytemuck::cast_slice(&[0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6]).to_vec();
    let bias: Vec<u8> = bytemuck::cast_slice(&[0.0f32, 0.0, 0.0]).to_vec();
    let scale: Vec<u8> = bytemuck::cast_slice(&[1.0f64]).to_vec();

    let views = vec![
        ("conv/kernel", TensorView::new(Dtype::F32, vec![2, 3], &kernel).unwrap()),
        ("conv/bias", TensorView::new(Dtype::F32, vec![3], &bias).unwrap()),
        ("norm/scale", TensorView::new(Dtype::F64, vec![1], &scale).unwrap()),
    ];

    safetensors::serialize(views, &None).unwrap()
}

pub const WEIGHTS: usize = 10;

pub fn new_session_msg(model: &[u8]) -> Value {
    json!({
        "type": "NEW_SESSION",
        "repo_id": "acme/mnist",
        "h5_model": STANDARD.encode(model),
        "hyperparams": { "batch_size": 32, "epochs": 1 },
        "selection_criteria": { "type": "ALL_NODES" },
        "continuation_criteria": { "type": "PERCENTAGE_AVERAGE", "value": 0.05 },
        "termination_criteria": { "type": "MAX_ROUND", "value": 5 },
    })
}

pub fn new_weights_msg(session_id: &str, round: u64, weights: &[f64]) -> Value {
    json!({
        "type": "NEW_WEIGHTS",
        "session_id": session_id,
        "round": round,
        "action": "TRAIN",
        "results": { "weights": weights, "omega": 128.0 },
    })
}

/// Records every call and fails the ones listed in `fail_on` (0-based).
#[derive(Clone, Default)]
pub struct RecordingConverter {
    pub calls: Rc<RefCell<Vec<PathBuf>>>,
    pub fail_on: Vec<usize>,
}

impl RecordingConverter {
    pub fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            calls: Rc::default(),
            fail_on,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Converter for RecordingConverter {
    fn convert(&self, model_path: &Path, out_dir: &Path) -> Result<Conversion, ConversionErr> {
        let call = {
            let mut calls = self.calls.borrow_mut();
            calls.push(model_path.to_path_buf());
            calls.len() - 1
        };

        if self.fail_on.contains(&call) {
            return Err(ConversionErr::InvalidModel {
                path: model_path.to_path_buf(),
                reason: format!("refusing call {call}"),
            });
        }

        ShardConverter::new().convert(model_path, out_dir)
    }
}
