//! Neural Network inference.
//!
//! The [`Session`] trait is the seam between the detector and whatever runs the gesture
//! classifier. [`NeuralNetwork`] runs ONNX models in-process via tract, [`remote::RemoteSession`]
//! forwards feature vectors to a prediction server.

pub mod remote;
pub mod tensor;

use std::{borrow::Cow, path::Path, sync::Arc};

use anyhow::{anyhow, bail};
use tract_onnx::prelude::{
    DatumExt, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TypedFact, TypedOp,
};

pub use tensor::{Tensor, TensorData};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A ready-to-run inference session.
///
/// Sessions declare the names of their inputs and outputs, and map a set of named input tensors to
/// a set of named output tensors.
pub trait Session: Send {
    /// Returns the declared input names, in model order.
    fn input_names(&self) -> &[String];

    /// Returns the declared output names, in model order.
    ///
    /// This may be empty if the session does not declare its outputs, in which case consumers
    /// should fall back to the order of the returned [`TensorMap`].
    fn output_names(&self) -> &[String];

    /// Runs the session.
    fn run(&mut self, inputs: TensorMap) -> anyhow::Result<TensorMap>;
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn input_names(&self) -> &[String] {
        (**self).input_names()
    }

    fn output_names(&self) -> &[String] {
        (**self).output_names()
    }

    fn run(&mut self, inputs: TensorMap) -> anyhow::Result<TensorMap> {
        (**self).run(inputs)
    }
}

/// An ordered mapping from names to [`Tensor`]s.
///
/// Iteration order is insertion order.
#[derive(Debug, Clone, Default)]
pub struct TensorMap {
    entries: Vec<(String, Tensor)>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor, replacing any tensor previously stored under the same name in place.
    pub fn insert<N: Into<String>>(&mut self, name: N, tensor: Tensor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = tensor,
            None => self.entries.push((name, tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, Tensor)> for TensorMap {
    fn from_iter<T: IntoIterator<Item = (N, Tensor)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, tensor) in iter {
            map.insert(name, tensor);
        }
        map
    }
}

impl IntoIterator for TensorMap {
    type Item = (String, Tensor);
    type IntoIter = std::vec::IntoIter<(String, Tensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// How much effort tract spends on optimizing a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    /// Only type and shape analysis is performed. This works with the widest range of models.
    #[default]
    Disabled,
    /// Run tract's full set of graph optimizations.
    Full,
}

/// Execution configuration for in-process sessions.
///
/// Threading and SIMD use are pinned rather than configurable. tract evaluates a model on the
/// calling thread, using a single thread, and selects its SIMD kernels at runtime based on what the
/// CPU supports. The same options therefore behave the same on every host.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    optimization: OptimizationLevel,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimization(self, optimization: OptimizationLevel) -> Self {
        Self { optimization }
    }

    pub fn optimization_level(&self) -> OptimizationLevel {
        self.optimization
    }

    /// Returns the number of threads a session evaluates the model with. Always 1.
    pub fn num_threads(&self) -> usize {
        1
    }

    /// Returns whether SIMD kernels are picked by CPU feature detection. Always `true`.
    pub fn runtime_simd_detection(&self) -> bool {
        true
    }
}

/// Neural network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    input_shape: Option<Vec<usize>>,
    options: SessionOptions,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>) -> Self {
        Self {
            model_data: data,
            input_shape: None,
            options: SessionOptions::default(),
        }
    }

    /// Pins the shape of the network's first input.
    ///
    /// Models exported with a dynamic batch dimension have to be given a concrete input shape
    /// before they can be run.
    pub fn with_input_shape(mut self, shape: &[usize]) -> Self {
        self.input_shape = Some(shape.to_vec());
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Loads the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        log::debug!(
            "loading network ({:?} optimization, {} thread(s), runtime SIMD detection: {})",
            self.options.optimization_level(),
            self.options.num_threads(),
            self.options.runtime_simd_detection(),
        );
        let mut graph = tract_onnx::onnx().model_for_read(&mut &*self.model_data)?;
        if let Some(shape) = &self.input_shape {
            graph = graph.with_input_fact(0, f32::fact(shape.clone()).into())?;
        }
        let graph = match self.options.optimization {
            OptimizationLevel::Disabled => graph.into_typed()?,
            OptimizationLevel::Full => graph.into_optimized()?,
        };

        let inputs = graph
            .input_outlets()?
            .iter()
            .map(|outlet| graph.node(outlet.node).name.clone())
            .collect::<Vec<_>>();
        let outputs = graph
            .output_outlets()?
            .iter()
            .map(|&outlet| match graph.outlet_label(outlet) {
                Some(label) => label.to_string(),
                None => graph.node(outlet.node).name.clone(),
            })
            .collect::<Vec<_>>();
        let input_shapes = (0..inputs.len())
            .map(|id| {
                let fact = graph.input_fact(id)?;
                Ok(fact.shape.as_concrete().map(|shape| shape.to_vec()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let model = SimplePlan::new(graph)?;

        Ok(NeuralNetwork(Arc::new(NeuralNetworkImpl {
            model,
            inputs,
            input_shapes,
            outputs,
        })))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

struct NeuralNetworkImpl {
    model: Model,
    inputs: Vec<String>,
    input_shapes: Vec<Option<Vec<usize>>>,
    outputs: Vec<String>,
}

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<'a, P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'a>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl<'a>(path: &Path) -> anyhow::Result<Loader<'a>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!("neural network file must have `.onnx` extension"),
        }

        let model_data = std::fs::read(path)?;
        Ok(Loader::new(model_data.into()))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: &[u8]) -> Loader<'_> {
        Loader::new(raw.into())
    }

    pub fn num_inputs(&self) -> usize {
        self.0.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.0.outputs.len()
    }

    /// Returns the concrete shape of an input, if the model declares one.
    pub fn input_shape(&self, index: usize) -> Option<&[usize]> {
        self.0.input_shapes.get(index)?.as_deref()
    }

    /// Runs the network on a list of positional inputs.
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &[Tensor]) -> anyhow::Result<Vec<Tensor>> {
        if inputs.len() != self.num_inputs() {
            bail!(
                "network takes {} inputs, but {} were provided",
                self.num_inputs(),
                inputs.len()
            );
        }

        let inputs = inputs
            .iter()
            .map(|t| Ok(TValue::from_const(Arc::new(t.to_tract()?))))
            .collect::<anyhow::Result<_>>()?;
        let outputs = self.0.model.run(inputs)?;
        outputs
            .iter()
            .map(|tract| Tensor::from_tract(tract))
            .collect()
    }
}

/// A [`NeuralNetwork`] is also a [`Session`]: inputs are matched up by name.
///
/// A single-input network accepts its input under any name.
impl Session for NeuralNetwork {
    fn input_names(&self) -> &[String] {
        &self.0.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.0.outputs
    }

    fn run(&mut self, mut inputs: TensorMap) -> anyhow::Result<TensorMap> {
        let positional = if self.num_inputs() == 1 && inputs.len() == 1 {
            inputs.into_iter().map(|(_, t)| t).collect::<Vec<_>>()
        } else {
            self.0
                .inputs
                .iter()
                .map(|name| {
                    inputs
                        .remove(name)
                        .ok_or_else(|| anyhow!("missing network input '{name}'"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?
        };

        let outputs = self.estimate(&positional)?;
        Ok(self.0.outputs.iter().cloned().zip(outputs).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_map_order() {
        let mut map = TensorMap::new();
        map.insert("b", Tensor::from(1.0));
        map.insert("a", Tensor::from(2.0));
        map.insert("b", Tensor::from(3.0));
        assert_eq!(map.names().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(map.get("b").unwrap().as_floats(), Some(&[3.0][..]));
        assert!(map.get("c").is_none());

        assert!(map.remove("b").is_some());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn default_session_options() {
        let options = SessionOptions::new();
        assert_eq!(options.optimization_level(), OptimizationLevel::Disabled);
        assert_eq!(options.num_threads(), 1);
        assert!(options.runtime_simd_detection());

        let options = options.optimization(OptimizationLevel::Full);
        assert_eq!(options.optimization_level(), OptimizationLevel::Full);
        assert_eq!(options.num_threads(), 1);
    }

    #[test]
    fn onnx_extension_required() {
        assert!(NeuralNetwork::from_path("model.bin").is_err());
    }

    #[test]
    fn garbage_model_fails_to_load() {
        assert!(NeuralNetwork::from_onnx(b"not a model").load().is_err());
    }
}
