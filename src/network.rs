//! Graph composition and the training step.
//!
//! A [`Network`] holds layers plus the edges connecting their ports and
//! drives one full training or inference step:
//!
//! 1. forward-propagate a minibatch in topological order;
//! 2. compute the loss gradient at the sink (the loss function is an
//!    external collaborator; only its gradient seeds the backward pass);
//! 3. back-propagate in reverse topological order, summing gradients
//!    where one layer's output fans out to several consumers;
//! 4. invoke the optimizer once per parameter buffer;
//! 5. gradient accumulators are zeroed again at the start of the next
//!    backward pass.
//!
//! Edges are validated when they are added: a shape mismatch or a cycle
//! is a configuration error raised at assembly time, and a failed
//! assembly leaves no callable graph behind. Parallelism lives strictly
//! inside one layer's kernel call; the network never runs two layers
//! that share a buffer concurrently.

use crate::error::{NnError, Result};
use crate::layer::{Layer, Phase};
use crate::loss::Loss;
use crate::optimizers::Optimizer;
use crate::tensors::{Batch, Float, resize_batch};
use rand::RngCore;

/// Sequential chain or DAG of layers.
///
/// # Example
/// ```rust
/// use edgegrad::backend::Backend;
/// use edgegrad::layers::{Activation, ActivationKind, FullyConnected};
/// use edgegrad::network::Network;
///
/// let mut net = Network::sequential(vec![
///     Box::new(FullyConnected::new(2, 4, true, Backend::Internal).unwrap()),
///     Box::new(Activation::new(ActivationKind::TanH, 4)),
///     Box::new(FullyConnected::new(4, 1, true, Backend::Internal).unwrap()),
/// ])
/// .unwrap();
/// let out = net.predict(&vec![vec![0.5, -0.5]]).unwrap();
/// assert_eq!(out[0].len(), 1);
/// ```
#[derive(Default)]
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    /// Predecessor node ids per node, one entry per connected input
    /// port, in connection order. Empty for entry nodes.
    inputs: Vec<Vec<usize>>,
    /// Topological order; empty while the graph is unassembled or after
    /// a failed assembly.
    order: Vec<usize>,
    /// Sink node producing the network output.
    sink: usize,
    outputs: Vec<Batch>,
    out_grads: Vec<Batch>,
    input: Batch,
}

impl Network {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sequential chain, connecting each layer to the previous
    /// one.
    ///
    /// # Errors
    /// Propagates [`NnError::ShapeMismatch`] from the implied edges and
    /// [`NnError::Config`] for an empty chain.
    pub fn sequential(layers: Vec<Box<dyn Layer>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(NnError::Config("sequential network needs a layer".into()));
        }
        let mut net = Self::new();
        let mut prev = None;
        for layer in layers {
            let id = net.add_layer(layer);
            if let Some(p) = prev {
                net.connect(p, id)?;
            }
            prev = Some(id);
        }
        net.assemble()?;
        Ok(net)
    }

    /// Adds a disconnected layer, returning its node id.
    pub fn add_layer(&mut self, layer: Box<dyn Layer>) -> usize {
        self.layers.push(layer);
        self.inputs.push(Vec::new());
        self.outputs.push(Batch::new());
        self.out_grads.push(Batch::new());
        // edits invalidate any previous assembly
        self.order.clear();
        self.layers.len() - 1
    }

    /// Connects `from`'s output to `to`'s next unconnected input port,
    /// validating shape compatibility immediately.
    ///
    /// Flat ports compare element counts; ports declaring spatial
    /// geometry (height or depth above 1) must match exactly.
    ///
    /// # Errors
    /// [`NnError::Config`] for unknown ids or a fully connected target,
    /// [`NnError::ShapeMismatch`] for incompatible port geometry.
    pub fn connect(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.layers.len() || to >= self.layers.len() {
            return Err(NnError::Config(format!(
                "connect({from}, {to}) references an unknown node"
            )));
        }
        let port = self.inputs[to].len();
        let expected = self.layers[to].in_shape();
        if port >= expected.len() {
            return Err(NnError::Config(format!(
                "node {to} ({}) has only {} input port(s)",
                self.layers[to].layer_type(),
                expected.len()
            )));
        }
        let produced = self.layers[from].out_shape()[0];
        let wanted = expected[port];
        let spatial = wanted.height > 1 || wanted.depth > 1;
        let compatible = if spatial {
            produced == wanted
        } else {
            produced.size() == wanted.size()
        };
        if !compatible {
            return Err(NnError::ShapeMismatch {
                from: self.layers[from].layer_type(),
                from_shape: produced.describe(),
                to: self.layers[to].layer_type(),
                to_shape: wanted.describe(),
            });
        }
        self.inputs[to].push(from);
        self.order.clear();
        Ok(())
    }

    /// Finalizes assembly: topologically sorts the graph and locates the
    /// sink. Called implicitly by [`Network::sequential`]; call it after
    /// hand-building a DAG.
    ///
    /// # Errors
    /// [`NnError::Cycle`] when the edges admit no topological order,
    /// [`NnError::Config`] for zero or several sinks or an entry node
    /// with more than one input port. On error no callable graph
    /// remains.
    pub fn assemble(&mut self) -> Result<()> {
        self.order.clear();
        let n = self.layers.len();

        let mut has_consumer = vec![false; n];
        let mut indegree = vec![0usize; n];
        for (to, preds) in self.inputs.iter().enumerate() {
            indegree[to] = preds.len();
            for &from in preds {
                has_consumer[from] = true;
            }
        }

        for (id, preds) in self.inputs.iter().enumerate() {
            let ports = self.layers[id].in_shape().len();
            if preds.is_empty() && ports != 1 {
                return Err(NnError::Config(format!(
                    "entry node {id} ({}) must have exactly one input port",
                    self.layers[id].layer_type()
                )));
            }
            if !preds.is_empty() && preds.len() != ports {
                return Err(NnError::Config(format!(
                    "node {id} ({}) has {} of {} input ports connected",
                    self.layers[id].layer_type(),
                    preds.len(),
                    ports
                )));
            }
        }

        let mut sinks = (0..n).filter(|&id| !has_consumer[id]);
        let sink = sinks.next().ok_or_else(|| {
            NnError::Config("graph has no sink (every output is consumed)".into())
        })?;
        if let Some(extra) = sinks.next() {
            return Err(NnError::Config(format!(
                "graph has multiple sinks (nodes {sink} and {extra})"
            )));
        }

        // Kahn's algorithm
        let mut ready: Vec<usize> = (0..n).filter(|&id| indegree[id] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(id) = ready.pop() {
            order.push(id);
            for (to, preds) in self.inputs.iter().enumerate() {
                for &from in preds {
                    if from == id {
                        indegree[to] -= 1;
                        if indegree[to] == 0 {
                            ready.push(to);
                        }
                    }
                }
            }
        }
        if order.len() != n {
            let stuck = (0..n)
                .find(|&id| indegree[id] > 0)
                .unwrap_or_default();
            return Err(NnError::Cycle(stuck));
        }

        self.order = order;
        self.sink = sink;
        Ok(())
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` when the graph holds no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in topological order, for external serializers and
    /// inspection.
    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.order.iter().map(|&id| self.layers[id].as_ref())
    }

    /// Mutable access to the layers in insertion order, for external
    /// deserializers restoring parameter values.
    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut (dyn Layer + 'static)> + '_ {
        self.layers.iter_mut().map(move |layer| layer.as_mut())
    }

    /// Sets the train/test phase on every layer.
    pub fn set_phase(&mut self, phase: Phase) {
        for layer in &mut self.layers {
            layer.set_phase(phase);
        }
    }

    /// Sets the parallelize flag on every layer.
    pub fn set_parallelize(&mut self, parallelize: bool) {
        for layer in &mut self.layers {
            layer.set_parallelize(parallelize);
        }
    }

    /// Initializes every layer's parameters from one RNG handle.
    pub fn init_weights(&mut self, rng: &mut dyn RngCore) {
        for layer in &mut self.layers {
            layer.init_weights(rng);
        }
    }

    /// Runs inference in test phase and returns the sink's output.
    ///
    /// # Errors
    /// [`NnError::Config`] for an unassembled graph or a batch whose
    /// sample length disagrees with the entry layer.
    pub fn predict(&mut self, input: &Batch) -> Result<Batch> {
        self.set_phase(Phase::Test);
        self.forward(input)?;
        Ok(self.outputs[self.sink].clone())
    }

    /// One full training step over a minibatch; returns the loss value.
    ///
    /// # Errors
    /// Propagates assembly and propagation errors; the parameter update
    /// only runs after a complete backward pass.
    pub fn train_step(
        &mut self,
        input: &Batch,
        target: &Batch,
        loss: &dyn Loss,
        optimizer: &mut dyn Optimizer,
    ) -> Result<Float> {
        self.set_phase(Phase::Train);
        self.forward(input)?;

        let prediction = &self.outputs[self.sink];
        let loss_value = loss.loss(prediction, target);
        let seed = loss.gradient(prediction, target);

        self.backward(seed)?;

        let mut id = 0;
        for layer in &mut self.layers {
            let parallelize = layer.parallelize();
            for param in layer.params_mut() {
                optimizer.update(id, param, parallelize);
                id += 1;
            }
        }
        Ok(loss_value)
    }

    fn check_assembled(&self) -> Result<()> {
        if self.order.len() != self.layers.len() || self.layers.is_empty() {
            return Err(NnError::Config(
                "network is not assembled (call assemble() after connecting layers)".into(),
            ));
        }
        Ok(())
    }

    fn forward(&mut self, input: &Batch) -> Result<()> {
        self.check_assembled()?;
        let samples = input.len();
        for (id, preds) in self.inputs.iter().enumerate() {
            if preds.is_empty() {
                let expected = self.layers[id].in_shape()[0];
                if let Some(row) = input.first() {
                    if row.len() != expected.size() {
                        return Err(NnError::ShapeMismatch {
                            from: "network input",
                            from_shape: format!("{}x1x1", row.len()),
                            to: self.layers[id].layer_type(),
                            to_shape: expected.describe(),
                        });
                    }
                }
            }
        }
        self.input = input.clone();

        for idx in 0..self.order.len() {
            let id = self.order[idx];
            let out_len = self.layers[id].out_shape()[0].size();

            let mut out = std::mem::take(&mut self.outputs[id]);
            resize_batch(&mut out, samples, out_len);
            {
                let in_refs: Vec<&Batch> = if self.inputs[id].is_empty() {
                    vec![&self.input]
                } else {
                    self.inputs[id].iter().map(|&p| &self.outputs[p]).collect()
                };
                self.layers[id].forward_propagation(&in_refs, &mut out)?;
            }
            self.outputs[id] = out;
        }
        Ok(())
    }

    /// Backward pass seeded with the loss gradient at the sink.
    ///
    /// Parameter gradients are zeroed here, at the start of the pass;
    /// kernels accumulate from a clean slate. A node consumed by several
    /// downstream layers receives the sum of their input gradients.
    fn backward(&mut self, seed: Batch) -> Result<()> {
        self.check_assembled()?;
        let samples = seed.len();

        for layer in &mut self.layers {
            for param in layer.params_mut() {
                param.zero_grad();
            }
        }
        for id in 0..self.layers.len() {
            let len = self.layers[id].out_shape()[0].size();
            resize_batch(&mut self.out_grads[id], samples, len);
        }
        self.out_grads[self.sink] = seed;

        for idx in (0..self.order.len()).rev() {
            let id = self.order[idx];
            let out_grad = std::mem::take(&mut self.out_grads[id]);

            // Freshly zeroed per-port input-gradient buffers; kernels
            // accumulate into them, the graph then folds them into each
            // predecessor's gradient (summing across fan-out).
            let mut in_grad: Vec<Batch> = self.layers[id]
                .in_shape()
                .iter()
                .map(|shape| {
                    let mut b = Batch::new();
                    resize_batch(&mut b, samples, shape.size());
                    b
                })
                .collect();

            let out_data = std::mem::take(&mut self.outputs[id]);
            let result = {
                let in_refs: Vec<&Batch> = if self.inputs[id].is_empty() {
                    vec![&self.input]
                } else {
                    self.inputs[id].iter().map(|&p| &self.outputs[p]).collect()
                };
                self.layers[id].back_propagation(&in_refs, &out_data, &out_grad, &mut in_grad)
            };
            self.outputs[id] = out_data;
            result?;

            for (port, &pred) in self.inputs[id].iter().enumerate() {
                for (dst_row, src_row) in
                    self.out_grads[pred].iter_mut().zip(in_grad[port].iter())
                {
                    for (dst, &src) in dst_row.iter_mut().zip(src_row.iter()) {
                        *dst += src;
                    }
                }
            }
            self.out_grads[id] = out_grad;
        }
        Ok(())
    }
}
