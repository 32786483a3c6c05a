//! A backend recording the graph it is asked to build, with shape inference
//! but no kernels. It is the reference the layers are tested against, and
//! what a graph compiler would consume.
use super::*;
use itertools::Itertools;
use parking_lot::Mutex;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolicOp {
    Placeholder,
    Variable(Initializer),
    Zeros,
    ZerosLike,
    Sum { axes: TVec<usize>, keep_dims: bool },
    ExpandDims(usize),
    Tile(TVec<usize>),
    Take { axis: usize, index: usize },
    Stack(usize),
    Select,
    MatMul,
    Binary(BinOp),
    Activation(Activation),
    Scan(ScanNode),
}

impl SymbolicOp {
    pub fn name(&self) -> &'static str {
        match self {
            SymbolicOp::Placeholder => "placeholder",
            SymbolicOp::Variable(_) => "variable",
            SymbolicOp::Zeros => "zeros",
            SymbolicOp::ZerosLike => "zeros_like",
            SymbolicOp::Sum { .. } => "sum",
            SymbolicOp::ExpandDims(_) => "expand_dims",
            SymbolicOp::Tile(_) => "tile",
            SymbolicOp::Take { .. } => "take",
            SymbolicOp::Stack(_) => "stack",
            SymbolicOp::Select => "select",
            SymbolicOp::MatMul => "matmul",
            SymbolicOp::Binary(_) => "binary",
            SymbolicOp::Activation(_) => "activation",
            SymbolicOp::Scan(_) => "scan",
        }
    }

    pub fn as_scan(&self) -> Option<&ScanNode> {
        match self {
            SymbolicOp::Scan(scan) => Some(scan),
            _ => None,
        }
    }
}

/// A recorded loop. The body lives in the same graph, between the
/// `body_inputs` placeholders and the `body_outputs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanNode {
    pub input_mapping: TVec<InputMapping>,
    pub output_mapping: TVec<OutputMapping>,
    pub body_inputs: TVec<OutletId>,
    pub body_outputs: TVec<OutletId>,
    pub iterations: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: usize,
    pub name: String,
    pub op: SymbolicOp,
    pub inputs: TVec<OutletId>,
    pub outputs: TVec<TensorFact>,
}

impl fmt::Display for Node {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "#{} \"{}\" {} [{}] -> [{}]",
            self.id,
            self.name,
            self.op.name(),
            self.inputs.iter().map(|i| format!("{}/{}", i.node, i.slot)).join(", "),
            self.outputs.iter().join(", ")
        )
    }
}

#[derive(Debug, Default)]
pub struct SymbolicBackend {
    nodes: Mutex<Vec<Node>>,
}

impl SymbolicBackend {
    pub fn new() -> SymbolicBackend {
        SymbolicBackend::default()
    }

    pub fn node(&self, id: usize) -> Option<Node> {
        self.nodes.lock().get(id).cloned()
    }

    /// Node producing a tensor.
    pub fn producer(&self, t: &Tensor) -> RecurResult<Node> {
        self.node(t.outlet().node)
            .with_context(|| format!("No node {} in {}", t.outlet().node, self.name()))
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_ops(&self, pred: impl Fn(&SymbolicOp) -> bool) -> usize {
        self.nodes.lock().iter().filter(|n| pred(&n.op)).count()
    }

    fn wire(
        &self,
        name: Option<&str>,
        op: SymbolicOp,
        inputs: &[&Tensor],
        outputs: TVec<TensorFact>,
    ) -> TVec<Tensor> {
        let mut nodes = self.nodes.lock();
        let id = nodes.len();
        let name = name.map(|n| n.to_string()).unwrap_or_else(|| format!("{}.{}", op.name(), id));
        let node = Node {
            id,
            name,
            op,
            inputs: inputs.iter().map(|t| t.outlet()).collect(),
            outputs: outputs.clone(),
        };
        trace!("Recorded {node}");
        nodes.push(node);
        outputs
            .into_iter()
            .enumerate()
            .map(|(slot, fact)| Tensor::from_outlet(OutletId::new(id, slot), fact))
            .collect()
    }

    fn wire_one(
        &self,
        op: SymbolicOp,
        inputs: &[&Tensor],
        fact: TensorFact,
    ) -> RecurResult<Tensor> {
        self.wire(None, op, inputs, tvec!(fact))
            .pop()
            .context("Node recorded without output")
    }
}

impl fmt::Display for SymbolicBackend {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        for node in self.nodes.lock().iter() {
            writeln!(fmt, "{node}")?;
        }
        Ok(())
    }
}

/// Numpy-style broadcasting of two shapes, aligned on the trailing axes.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> RecurResult<Shape> {
    let rank = a.rank().max(b.rank());
    let pad = |s: &Shape| -> TVec<Option<usize>> {
        std::iter::repeat_n(Some(1), rank - s.rank()).chain(s.iter()).collect()
    };
    pad(a)
        .into_iter()
        .zip(pad(b))
        .enumerate()
        .map(|(ix, dims)| match dims {
            (Some(1), d) | (d, Some(1)) => Ok(d),
            (Some(x), Some(y)) if x != y => {
                bail!("Can not broadcast {} and {}: axis {} is {} vs {}", a, b, ix, x, y)
            }
            (Some(x), _) | (_, Some(x)) => Ok(Some(x)),
            (None, None) => Ok(None),
        })
        .collect()
}

fn check_axis(t: &Tensor, axis: usize) -> RecurResult<()> {
    ensure!(axis < t.rank(), "Axis {} out of range for {:?}", axis, t);
    Ok(())
}

fn concrete(fact: &TensorFact, what: &str) -> RecurResult<()> {
    if !fact.shape.is_concrete() {
        bail!(RnnError::ShapeConstraint {
            input: what.to_string(),
            detail: format!("needs a fully known shape, got {}", fact.shape),
        })
    }
    Ok(())
}

impl Backend for SymbolicBackend {
    fn name(&self) -> &str {
        "symbolic"
    }

    fn placeholder(&self, name: &str, fact: TensorFact) -> RecurResult<Tensor> {
        self.wire(Some(name), SymbolicOp::Placeholder, &[], tvec!(fact))
            .pop()
            .context("Placeholder recorded without output")
    }

    fn variable(&self, name: &str, fact: TensorFact, init: Initializer) -> RecurResult<Tensor> {
        concrete(&fact, name)?;
        self.wire(Some(name), SymbolicOp::Variable(init), &[], tvec!(fact))
            .pop()
            .context("Variable recorded without output")
    }

    fn zeros(&self, fact: TensorFact) -> RecurResult<Tensor> {
        concrete(&fact, "zeros")?;
        self.wire_one(SymbolicOp::Zeros, &[], fact)
    }

    fn zeros_like(&self, t: &Tensor) -> RecurResult<Tensor> {
        self.wire_one(SymbolicOp::ZerosLike, &[t], t.fact().clone())
    }

    fn sum(&self, t: &Tensor, axes: &[usize], keep_dims: bool) -> RecurResult<Tensor> {
        let mut shape = t.shape().clone();
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for &axis in sorted.iter().rev() {
            check_axis(t, axis)?;
            if keep_dims {
                shape.set(axis, Some(1));
            } else {
                shape.remove_axis(axis)?;
            }
        }
        let op = SymbolicOp::Sum { axes: axes.into(), keep_dims };
        self.wire_one(op, &[t], t.fact().with_shape(shape))
    }

    fn expand_dims(&self, t: &Tensor, axis: usize) -> RecurResult<Tensor> {
        let mut shape = t.shape().clone();
        shape.insert_axis(axis, Some(1))?;
        self.wire_one(SymbolicOp::ExpandDims(axis), &[t], t.fact().with_shape(shape))
    }

    fn tile(&self, t: &Tensor, multiples: &[usize]) -> RecurResult<Tensor> {
        ensure!(
            multiples.len() == t.rank(),
            "Tiling {:?} needs {} multiples, got {:?}",
            t,
            t.rank(),
            multiples
        );
        let shape: Shape = t
            .shape()
            .iter()
            .zip(multiples)
            .map(|(d, &m)| if m == 1 { d } else { d.map(|d| d * m) })
            .collect();
        self.wire_one(SymbolicOp::Tile(multiples.into()), &[t], t.fact().with_shape(shape))
    }

    fn take(&self, t: &Tensor, axis: usize, index: usize) -> RecurResult<Tensor> {
        check_axis(t, axis)?;
        if let Some(dim) = t.shape().dim(axis) {
            ensure!(index < dim, "Index {} out of range on axis {} of {:?}", index, axis, t);
        }
        let shape = t.shape().without_axis(axis)?;
        self.wire_one(SymbolicOp::Take { axis, index }, &[t], t.fact().with_shape(shape))
    }

    fn stack(&self, ts: &[Tensor], axis: usize) -> RecurResult<Tensor> {
        let Some(first) = ts.first() else { bail!("Can not stack an empty list") };
        let mut shape = first.shape().clone();
        for t in &ts[1..] {
            ensure!(
                t.datum_type() == first.datum_type(),
                "Stacking tensors of different types: {:?} and {:?}",
                first,
                t
            );
            shape = shape.unify(t.shape())?;
        }
        shape.insert_axis(axis, Some(ts.len()))?;
        let inputs = ts.iter().collect::<TVec<_>>();
        self.wire_one(SymbolicOp::Stack(axis), &inputs, first.fact().with_shape(shape))
    }

    fn select(&self, cond: &Tensor, then: &Tensor, otherwise: &Tensor) -> RecurResult<Tensor> {
        ensure!(
            cond.datum_type() == DatumType::Bool,
            "Select condition must be bool, got {:?}",
            cond
        );
        ensure!(
            then.datum_type() == otherwise.datum_type(),
            "Select branches differ in type: {:?} and {:?}",
            then,
            otherwise
        );
        let shape = broadcast_shapes(cond.shape(), then.shape())?;
        let shape = broadcast_shapes(&shape, otherwise.shape())?;
        self.wire_one(SymbolicOp::Select, &[cond, then, otherwise], then.fact().with_shape(shape))
    }

    fn matmul(&self, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
        ensure!(a.rank() >= 1 && b.rank() == 2, "Unsupported matmul {:?} by {:?}", a, b);
        let dt = a
            .datum_type()
            .common_super_type(b.datum_type())
            .with_context(|| format!("Incompatible matmul types {:?} and {:?}", a, b))?;
        let k = a.shape().get(-1).flatten();
        if let (Some(k), Some(kb)) = (k, b.shape().dim(0)) {
            ensure!(k == kb, "Matmul reduction axis mismatch: {:?} by {:?}", a, b);
        }
        let mut shape = a.shape().clone();
        shape.set(a.rank() - 1, b.shape().dim(1));
        self.wire_one(SymbolicOp::MatMul, &[a, b], TensorFact::dt_shape(dt, shape))
    }

    fn binary(&self, op: BinOp, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
        let dt = a
            .datum_type()
            .common_super_type(b.datum_type())
            .with_context(|| format!("Incompatible operands for {op}: {a:?} and {b:?}"))?;
        let shape = broadcast_shapes(a.shape(), b.shape())?;
        self.wire_one(SymbolicOp::Binary(op), &[a, b], TensorFact::dt_shape(dt, shape))
    }

    fn activation(&self, t: &Tensor, activation: Activation) -> RecurResult<Tensor> {
        ensure!(t.datum_type().is_float(), "Activation {} on non float {:?}", activation, t);
        self.wire_one(SymbolicOp::Activation(activation), &[t], t.fact().clone())
    }

    fn scan(&self, scan: ScanSpec) -> RecurResult<TVec<ScanOutput>> {
        scan.validate()?;
        let iterations = scan.iterations();
        let mut facts = tvec!();
        for (body, mapping) in scan.body_outputs.iter().zip(&scan.output_mapping) {
            if let Some(axis) = mapping.full_axis {
                let mut shape = body.shape().clone();
                shape.insert_axis(axis, iterations)?;
                facts.push(body.fact().with_shape(shape));
            }
            if mapping.last_value {
                facts.push(body.fact().clone());
            }
        }
        let node = ScanNode {
            input_mapping: scan.input_mapping.clone(),
            output_mapping: scan.output_mapping.clone(),
            body_inputs: scan.body_inputs.iter().map(|t| t.outlet()).collect(),
            body_outputs: scan.body_outputs.iter().map(|t| t.outlet()).collect(),
            iterations,
        };
        let inputs = scan.outer_inputs.iter().collect::<TVec<_>>();
        let mut wired = self.wire(None, SymbolicOp::Scan(node), &inputs, facts).into_iter();
        let mut outputs = tvec!();
        for mapping in &scan.output_mapping {
            let full = if mapping.full_axis.is_some() { wired.next() } else { None };
            let last = if mapping.last_value { wired.next() } else { None };
            outputs.push(ScanOutput { full, last });
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(backend: &SymbolicBackend, shape: Shape) -> Tensor {
        backend.placeholder("x", TensorFact::dt_shape(DatumType::F32, shape)).unwrap()
    }

    #[test]
    fn broadcasting() {
        assert_eq!(broadcast_shapes(&shape!(_, 4), &shape!(4)).unwrap(), shape!(_, 4));
        assert_eq!(broadcast_shapes(&shape!(_, 1), &shape!(3, 4)).unwrap(), shape!(3, 4));
        assert_eq!(broadcast_shapes(&shape!(_, _), &shape!(1, 4)).unwrap(), shape!(_, 4));
        assert!(broadcast_shapes(&shape!(2, 4), &shape!(3, 4)).is_err());
    }

    #[test]
    fn zero_state_recipe_keeps_batch_unknown() {
        let b = SymbolicBackend::new();
        let x = input(&b, shape!(_, 10, 8));
        let zeros = b.zeros_like(&x).unwrap();
        let summed = b.sum(&zeros, &[1, 2], false).unwrap();
        assert_eq!(summed.shape(), &shape!(_));
        let expanded = b.expand_dims(&summed, 1).unwrap();
        let tiled = b.tile(&expanded, &[1, 4]).unwrap();
        assert_eq!(tiled.shape(), &shape!(_, 4));
        assert_eq!(b.len(), 5);
    }

    #[test]
    fn take_and_stack() {
        let b = SymbolicBackend::new();
        let x = input(&b, shape!(2, 3, 8));
        let steps = (0..3).map(|t| b.take(&x, 1, t).unwrap()).collect::<Vec<_>>();
        assert_eq!(steps[0].shape(), &shape!(2, 8));
        assert!(b.take(&x, 1, 3).is_err());
        let stacked = b.stack(&steps, 1).unwrap();
        assert_eq!(stacked.shape(), &shape!(2, 3, 8));
    }

    #[test]
    fn matmul_shapes() {
        let b = SymbolicBackend::new();
        let x = input(&b, shape!(_, 8));
        let w = b
            .variable("w", TensorFact::dt_shape(DatumType::F32, shape!(8, 4)), Initializer::Zeros)
            .unwrap();
        assert_eq!(b.matmul(&x, &w).unwrap().shape(), &shape!(_, 4));
        assert!(b.matmul(&w, &w).is_err());
    }

    #[test]
    fn variables_need_known_shapes() {
        let b = SymbolicBackend::new();
        let err = b
            .variable("w", TensorFact::dt_shape(DatumType::F32, shape!(_, 4)), Initializer::Zeros)
            .unwrap_err();
        assert!(RnnError::kind_of(&err).unwrap().is_shape_constraint());
    }

    #[test]
    fn scan_output_facts() {
        let b = SymbolicBackend::new();
        let x = input(&b, shape!(_, 7, 8));
        let h0 = input(&b, shape!(_, 4));
        let xt = b.placeholder("xt", TensorFact::dt_shape(DatumType::F32, shape!(_, 8))).unwrap();
        let ht = b.placeholder("ht", TensorFact::dt_shape(DatumType::F32, shape!(_, 4))).unwrap();
        let w = b
            .variable("w", TensorFact::dt_shape(DatumType::F32, shape!(8, 4)), Initializer::Zeros)
            .unwrap();
        let xw = b.matmul(&xt, &w).unwrap();
        let h = b.add(&xw, &ht).unwrap();
        let mut spec = ScanSpec::default();
        spec.add_input(x, xt, InputMapping::Scan { axis: 1, chunk: -1 });
        spec.add_input(h0, ht, InputMapping::State);
        spec.add_output(h.clone(), OutputMapping::new(true, Some(1), true));
        let outputs = b.scan(spec).unwrap();
        assert_eq!(outputs[0].full.as_ref().unwrap().shape(), &shape!(_, 7, 4));
        assert_eq!(outputs[0].last.as_ref().unwrap().shape(), &shape!(_, 4));
        let node = b.producer(outputs[0].last.as_ref().unwrap()).unwrap();
        assert_eq!(node.op.as_scan().unwrap().iterations, Some(7));
        assert_eq!(node.op.as_scan().unwrap().body_outputs[0], h.outlet());
    }

    #[test]
    fn scan_rejects_state_count_mismatch() {
        let b = SymbolicBackend::new();
        let x = input(&b, shape!(_, 7, 8));
        let xt = b.placeholder("xt", TensorFact::dt_shape(DatumType::F32, shape!(_, 8))).unwrap();
        let mut spec = ScanSpec::default();
        spec.add_input(x, xt.clone(), InputMapping::Scan { axis: 1, chunk: 1 });
        spec.add_output(xt, OutputMapping::new(true, None, true));
        let err = b.scan(spec).unwrap_err();
        assert!(RnnError::kind_of(&err).unwrap().is_argument_count());
    }
}
