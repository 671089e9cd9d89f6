//! Gesture prediction via an HTTP backend.
//!
//! The backend exposes `POST {base}/api/predict`, accepting `{"keypoints": [...]}` and answering
//! with `{"label": "..."}`.

use std::time::Duration;

use anyhow::{anyhow, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{Session, Tensor, TensorMap};

/// Name of the single input a [`RemoteSession`] declares.
pub const INPUT_NAME: &str = "keypoints";

/// Name of the single text output a [`RemoteSession`] produces.
pub const OUTPUT_NAME: &str = "label";

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct PredictRequest<'a> {
    keypoints: &'a [f32],
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    label: Option<String>,
}

/// A [`Session`] that forwards feature vectors to a prediction server.
pub struct RemoteSession {
    client: Client,
    url: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl RemoteSession {
    /// Creates a session talking to the server at `base_url`.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            client,
            url: predict_url(base_url),
            inputs: vec![INPUT_NAME.to_string()],
            outputs: vec![OUTPUT_NAME.to_string()],
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn predict_url(base_url: &str) -> String {
    format!("{}/api/predict", base_url.trim_end_matches('/'))
}

impl Session for RemoteSession {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(&mut self, inputs: TensorMap) -> anyhow::Result<TensorMap> {
        let (_, input) = inputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("no input tensor provided"))?;
        let keypoints = input
            .as_floats()
            .ok_or_else(|| anyhow!("keypoints must be a float tensor, got {input:?}"))?;

        log::trace!("POST {} ({} keypoints)", self.url, keypoints.len());
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { keypoints })
            .send()?;

        if !response.status().is_success() {
            bail!("Prediction request failed: {}", response.status());
        }

        let result: PredictResponse = response.json()?;
        let label = result.label.unwrap_or_default();
        Ok([(OUTPUT_NAME, Tensor::from_text(&[1], [label]))]
            .into_iter()
            .collect())
    }
}
