//! Linear operator trees evaluated with the CPU kernels.
//!
//! Leaves wrap a concrete matrix, composites combine children. Every node can
//! be evaluated forward (`A x`) or as its adjoint (`Aᴴ x`) through
//! [`Operator::eval`], which validates shapes and splits the columns of `X`
//! into batches before calling [`Operator::eval_unchecked`].

use crate::profile::Profile;
use cmm_core::{
    CmmError, Complex32, CpuDevice, CsrMatrix, DenseMatrix, DenseView, DenseViewMut, DiaMatrix,
    Matrix, Transpose,
};
use num_traits::{One, Zero};
use std::collections::HashSet;
use std::fmt::{self, Debug, Write};
use std::mem;
use std::sync::Arc;

/// Shared handle to an operator node; the same leaf may appear in several trees.
pub type OperatorRef = Arc<dyn Operator>;

/// Name and batch size common to every node.
#[derive(Debug, Clone, Default)]
pub struct OperatorMeta {
    pub name: String,
    /// Maximum number of columns of `X` handed to one `eval_unchecked` call.
    pub batch: Option<usize>,
}

pub trait Operator: Debug {
    /// `(rows, cols)` of the forward operator.
    fn shape(&self) -> (usize, usize);

    fn meta(&self) -> &OperatorMeta;

    /// Node type shown by [`Operator::dump`].
    fn kind(&self) -> &'static str;

    fn children(&self) -> Vec<&dyn Operator> {
        Vec::new()
    }

    fn as_adjoint(&self) -> Option<&Adjoint> {
        None
    }

    /// Bytes held by this node itself (not its children).
    fn data_nbytes(&self) -> usize {
        0
    }

    /// Peak scratch memory needed to evaluate this subtree on `ncols` columns.
    fn intermediate_nbytes(&self, ncols: usize) -> usize {
        let ncols = self.batch().map_or(ncols, |b| ncols.min(b));
        self.children()
            .iter()
            .map(|c| c.intermediate_nbytes(ncols))
            .max()
            .unwrap_or(0)
    }

    /// `Y := alpha * op(A) * X + beta * Y` on already validated operands.
    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError>;

    fn name(&self) -> &str {
        if self.meta().name.is_empty() {
            "noname"
        } else {
            &self.meta().name
        }
    }

    fn batch(&self) -> Option<usize> {
        self.meta().batch
    }

    /// `Y := alpha * op(A) * X + beta * Y` with `op` the identity when `forward`, else `Aᴴ`.
    fn eval(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        mut y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let (m, n) = if forward {
            self.shape()
        } else {
            let (r, c) = self.shape();
            (c, r)
        };
        if x.rows() != n || y.rows() != m || x.cols() != y.cols() {
            return Err(CmmError::InvalidDimensions(format!(
                "attempting {:?} = {:?} * {:?} (forward: {}, {} '{}')",
                y.dims(),
                (m, n),
                x.dims(),
                forward,
                self.kind(),
                self.name()
            )));
        }

        let ncols = x.cols();
        let batch = self.batch().unwrap_or(ncols).max(1);
        if batch >= ncols {
            return self.eval_unchecked(device, alpha, x, beta, y, forward);
        }
        for start in (0..ncols).step_by(batch) {
            let end = (start + batch).min(ncols);
            let x_slc = x.subview(0..n, start..end)?;
            let y_slc = y.subview_mut(0..m, start..end)?;
            self.eval_unchecked(device, alpha, x_slc, beta, y_slc, forward)?;
        }
        Ok(())
    }

    /// Convenience forward product into a new matrix.
    fn apply(&self, device: &CpuDevice, x: &DenseMatrix) -> Result<DenseMatrix, CmmError> {
        let mut y = DenseMatrix::zeros(self.shape().0, x.cols());
        self.eval(device, Complex32::one(), x.view(), Complex32::zero(), y.view_mut(), true)?;
        Ok(y)
    }

    /// Total bytes of matrix data in the tree; shared leaves count once.
    fn nbytes(&self) -> usize {
        let mut seen = HashSet::new();
        tree_nbytes(self.children(), self.data_nbytes(), self_id(self), &mut seen)
    }

    /// Text rendering of the operator tree, one node per line.
    fn dump(&self) -> String {
        let mut out = String::new();
        dump_node(self, 0, &mut out);
        out
    }
}

fn self_id<T: Operator + ?Sized>(op: &T) -> usize {
    op as *const T as *const () as usize
}

fn tree_nbytes(
    children: Vec<&dyn Operator>,
    own: usize,
    id: usize,
    seen: &mut HashSet<usize>,
) -> usize {
    if !seen.insert(id) {
        return 0;
    }
    own + children
        .into_iter()
        .map(|c| tree_nbytes(c.children(), c.data_nbytes(), self_id(c), seen))
        .sum::<usize>()
}

fn dump_node<T: Operator + ?Sized>(op: &T, indent: usize, out: &mut String) {
    let _ = writeln!(
        out,
        "{}{}, {}, {:?}, complex64",
        "|   ".repeat(indent),
        op.name(),
        op.kind(),
        op.shape()
    );
    for child in op.children() {
        dump_node(child, indent + 1, out);
    }
}

/// Memory estimate for evaluating an operator tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memusage {
    /// Matrix data held by the leaves.
    pub data_nbytes: usize,
    /// Peak temporary storage allocated by composites.
    pub intermediate_nbytes: usize,
}

pub fn memusage(op: &dyn Operator, ncols: usize) -> Memusage {
    Memusage {
        data_nbytes: op.nbytes(),
        intermediate_nbytes: op.intermediate_nbytes(ncols),
    }
}

impl fmt::Display for Memusage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: f64 = 1024.0 * 1024.0;
        write!(
            f,
            "data {:.2} MiB, intermediates {:.2} MiB",
            self.data_nbytes as f64 / MIB,
            self.intermediate_nbytes as f64 / MIB
        )
    }
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// Sparse CSR leaf. Forward uses the exclusive-write kernel, adjoint the scatter kernel.
#[derive(Debug, Clone)]
pub struct SpMatrix {
    meta: OperatorMeta,
    matrix: CsrMatrix,
}

impl SpMatrix {
    pub fn new(matrix: CsrMatrix) -> Self {
        Self {
            meta: OperatorMeta::default(),
            matrix,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.meta.batch = Some(batch);
        self
    }

    pub fn matrix(&self) -> &CsrMatrix {
        &self.matrix
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    fn purpose(&self, forward: bool) -> String {
        let direction = if forward { "forward" } else { "adjoint" };
        if self.meta.name.contains("interp") {
            format!("grid {}", direction)
        } else if self.meta.name.contains("map") {
            format!("maps {}", direction)
        } else {
            "?".to_string()
        }
    }
}

impl Operator for SpMatrix {
    fn shape(&self) -> (usize, usize) {
        self.matrix.dims()
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "SpMatrix"
    }

    fn data_nbytes(&self) -> usize {
        Matrix::nbytes(&self.matrix)
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let elem = mem::size_of::<Complex32>();
        let y_reads = if beta.is_zero() { 1 } else { 2 };
        let nbytes = Matrix::nbytes(&self.matrix)
            + x.rows() * x.cols() * elem
            + y.rows() * y.cols() * elem * y_reads;
        let _profile = Profile::new("csrmm")
            .field("nbytes", nbytes)
            .field("purpose", self.purpose(forward))
            .field("shape", format!("{:?}", x.dims()));
        if forward {
            device.exw_csrmm(alpha, self.matrix.view(), x, beta, y)
        } else {
            device.csrmm(alpha, self.matrix.view(), x, beta, y, true)
        }
    }
}

/// Sparse DIA leaf.
#[derive(Debug, Clone)]
pub struct DiaOperator {
    meta: OperatorMeta,
    matrix: DiaMatrix,
}

impl DiaOperator {
    pub fn new(matrix: DiaMatrix) -> Self {
        Self {
            meta: OperatorMeta::default(),
            matrix,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.meta.batch = Some(batch);
        self
    }

    pub fn matrix(&self) -> &DiaMatrix {
        &self.matrix
    }
}

impl Operator for DiaOperator {
    fn shape(&self) -> (usize, usize) {
        self.matrix.dims()
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "DiaMatrix"
    }

    fn data_nbytes(&self) -> usize {
        Matrix::nbytes(&self.matrix)
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let _profile = Profile::new("diamm")
            .field("offsets", self.matrix.n_offsets())
            .field("shape", format!("{:?}", x.dims()));
        device.diamm(alpha, self.matrix.view(), x, beta, y, !forward)
    }
}

/// Dense leaf evaluated with `gemm`.
#[derive(Debug, Clone)]
pub struct DenseOperator {
    meta: OperatorMeta,
    matrix: DenseMatrix,
}

impl DenseOperator {
    pub fn new(matrix: DenseMatrix) -> Self {
        Self {
            meta: OperatorMeta::default(),
            matrix,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.meta.batch = Some(batch);
        self
    }

    pub fn matrix(&self) -> &DenseMatrix {
        &self.matrix
    }
}

impl Operator for DenseOperator {
    fn shape(&self) -> (usize, usize) {
        self.matrix.dims()
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "DenseMatrix"
    }

    fn data_nbytes(&self) -> usize {
        Matrix::nbytes(&self.matrix)
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let (m, n) = self.matrix.dims();
        let _profile = Profile::new("cgemm").field("nflops", m * n * x.cols() * 5);
        device.gemm(
            alpha,
            self.matrix.view(),
            Transpose::from_adjoint(!forward),
            x,
            beta,
            y,
        )
    }
}

/// The `rows x cols` all-ones matrix, stored implicitly. Its adjoint is the
/// `cols x rows` all-ones matrix, so both directions run `onemm`.
#[derive(Debug, Clone)]
pub struct OneMatrix {
    meta: OperatorMeta,
    rows: usize,
    cols: usize,
}

impl OneMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            meta: OperatorMeta::default(),
            rows,
            cols,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }
}

impl Operator for OneMatrix {
    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "OneMatrix"
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        _forward: bool,
    ) -> Result<(), CmmError> {
        let _profile = Profile::new("onemm").field("shape", format!("{:?}", x.dims()));
        device.onemm(alpha, x, beta, y)
    }
}

// ---------------------------------------------------------------------------
// Composites
// ---------------------------------------------------------------------------

/// `Aᴴ` of its child.
#[derive(Debug, Clone)]
pub struct Adjoint {
    meta: OperatorMeta,
    child: OperatorRef,
}

impl Adjoint {
    pub fn new(child: OperatorRef) -> Self {
        let meta = OperatorMeta {
            name: format!("{}.H", child.meta().name),
            batch: None,
        };
        Self { meta, child }
    }

    pub fn child(&self) -> &OperatorRef {
        &self.child
    }
}

/// `op.H`: the adjoint of `op`, unwrapping a double adjoint.
pub fn adjoint(op: &OperatorRef) -> OperatorRef {
    if let Some(inner) = op.as_adjoint() {
        return Arc::clone(inner.child());
    }
    Arc::new(Adjoint::new(Arc::clone(op)))
}

impl Operator for Adjoint {
    fn shape(&self) -> (usize, usize) {
        let (r, c) = self.child.shape();
        (c, r)
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Adjoint"
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }

    fn as_adjoint(&self) -> Option<&Adjoint> {
        Some(self)
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        self.child.eval(device, alpha, x, beta, y, !forward)
    }
}

/// `L * R`, evaluated through a temporary holding `R x`.
#[derive(Debug, Clone)]
pub struct Product {
    meta: OperatorMeta,
    left: OperatorRef,
    right: OperatorRef,
}

impl Product {
    pub fn new(left: OperatorRef, right: OperatorRef) -> Result<Self, CmmError> {
        if left.shape().1 != right.shape().0 {
            return Err(CmmError::InvalidDimensions(format!(
                "Mismatched shapes in Product: attempting {:?} x {:?} ({} x {})",
                left.shape(),
                right.shape(),
                left.name(),
                right.name()
            )));
        }
        let meta = OperatorMeta {
            name: format!("{}*{}", left.meta().name, right.meta().name),
            batch: None,
        };
        Ok(Self { meta, left, right })
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.meta.batch = Some(batch);
        self
    }
}

impl Operator for Product {
    fn shape(&self) -> (usize, usize) {
        (self.left.shape().0, self.right.shape().1)
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Product"
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn intermediate_nbytes(&self, ncols: usize) -> usize {
        let ncols = self.batch().map_or(ncols, |b| ncols.min(b));
        let own = self.right.shape().0 * ncols * mem::size_of::<Complex32>();
        own + self
            .left
            .intermediate_nbytes(ncols)
            .max(self.right.intermediate_nbytes(ncols))
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let (first, second) = if forward {
            (&self.right, &self.left)
        } else {
            (&self.left, &self.right)
        };
        let inner = if forward {
            self.right.shape().0
        } else {
            self.left.shape().1
        };
        let mut tmp = DenseMatrix::zeros(inner, x.cols());
        first.eval(device, alpha, x, Complex32::zero(), tmp.view_mut(), forward)?;
        second.eval(device, Complex32::one(), tmp.view(), beta, y, forward)
    }
}

/// `I_c ⊗ A`: `c` copies of the child along the diagonal, evaluated as one
/// product over `c` times as many columns.
#[derive(Debug, Clone)]
pub struct KronI {
    meta: OperatorMeta,
    c: usize,
    child: OperatorRef,
}

impl KronI {
    pub fn new(c: usize, child: OperatorRef) -> Result<Self, CmmError> {
        if c == 0 {
            return Err(CmmError::InvalidDimensions(
                "KronI needs at least one copy of its child".to_string(),
            ));
        }
        let meta = OperatorMeta {
            name: format!("I{}x{}", c, child.meta().name),
            batch: None,
        };
        Ok(Self { meta, c, child })
    }
}

impl Operator for KronI {
    fn shape(&self) -> (usize, usize) {
        let (h, w) = self.child.shape();
        (self.c * h, self.c * w)
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "KronI"
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }

    fn intermediate_nbytes(&self, ncols: usize) -> usize {
        let ncols = self.batch().map_or(ncols, |b| ncols.min(b));
        self.child.intermediate_nbytes(ncols * self.c)
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        mut y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let cb = self.c * x.cols();
        let x_rows = x.rows() / self.c;
        let y_rows = y.rows() / self.c;

        // Strided operands (e.g. row blocks of a stack) are packed first.
        let x_packed;
        let x = if x.is_contiguous() {
            x
        } else {
            x_packed = x.to_packed_vec();
            DenseView::packed(&x_packed, x.rows(), x.cols())?
        };
        let x = x.reshape(x_rows, cb)?;

        if y.is_contiguous() {
            let y = y.reshape_mut(y_rows, cb)?;
            return self.child.eval(device, alpha, x, beta, y, forward);
        }
        let mut y_packed = if beta.is_zero() {
            vec![Complex32::zero(); y.rows() * y.cols()]
        } else {
            y.as_view().to_packed_vec()
        };
        self.child.eval(
            device,
            alpha,
            x,
            beta,
            DenseViewMut::packed(&mut y_packed, y_rows, cb)?,
            forward,
        )?;
        let rows = y.rows();
        for j in 0..y.cols() {
            y.column_mut(j)
                .copy_from_slice(&y_packed[j * rows..(j + 1) * rows]);
        }
        Ok(())
    }
}

/// Block-diagonal arrangement of its children.
#[derive(Debug, Clone)]
pub struct BlockDiag {
    meta: OperatorMeta,
    children: Vec<OperatorRef>,
}

impl BlockDiag {
    pub fn new(children: Vec<OperatorRef>) -> Result<Self, CmmError> {
        if children.is_empty() {
            return Err(CmmError::InvalidDimensions(
                "BlockDiag needs at least one child".to_string(),
            ));
        }
        Ok(Self {
            meta: OperatorMeta::default(),
            children,
        })
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }
}

impl Operator for BlockDiag {
    fn shape(&self) -> (usize, usize) {
        self.children.iter().fold((0, 0), |(h, w), c| {
            let (ch, cw) = c.shape();
            (h + ch, w + cw)
        })
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "BlockDiag"
    }

    fn children(&self) -> Vec<&dyn Operator> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        mut y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let n = x.cols();
        let (mut h_offset, mut w_offset) = (0, 0);
        for child in &self.children {
            let (ch, cw) = child.shape();
            let (h, w) = if forward { (ch, cw) } else { (cw, ch) };
            let x_slc = x.subview(w_offset..w_offset + w, 0..n)?;
            let y_slc = y.subview_mut(h_offset..h_offset + h, 0..n)?;
            child.eval(device, alpha, x_slc, beta, y_slc, forward)?;
            h_offset += h;
            w_offset += w;
        }
        Ok(())
    }
}

/// Children stacked vertically (all of equal width).
#[derive(Debug, Clone)]
pub struct VStack {
    meta: OperatorMeta,
    children: Vec<OperatorRef>,
}

impl VStack {
    pub fn new(children: Vec<OperatorRef>) -> Result<Self, CmmError> {
        check_stack("VStack", "widths", &children, |s| s.1)?;
        Ok(Self {
            meta: OperatorMeta::default(),
            children,
        })
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }
}

impl Operator for VStack {
    fn shape(&self) -> (usize, usize) {
        let h = self.children.iter().map(|c| c.shape().0).sum();
        (h, self.children[0].shape().1)
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "VStack"
    }

    fn children(&self) -> Vec<&dyn Operator> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        mut y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let n = x.cols();
        let mut offset = 0;
        if forward {
            for child in &self.children {
                let h = child.shape().0;
                let y_slc = y.subview_mut(offset..offset + h, 0..n)?;
                child.eval(device, alpha, x, beta, y_slc, true)?;
                offset += h;
            }
        } else {
            device.scale(beta, y.reborrow());
            for child in &self.children {
                let h = child.shape().0;
                let x_slc = x.subview(offset..offset + h, 0..n)?;
                child.eval(device, alpha, x_slc, Complex32::one(), y.reborrow(), false)?;
                offset += h;
            }
        }
        Ok(())
    }
}

/// Children placed side by side (all of equal height).
#[derive(Debug, Clone)]
pub struct HStack {
    meta: OperatorMeta,
    children: Vec<OperatorRef>,
}

impl HStack {
    pub fn new(children: Vec<OperatorRef>) -> Result<Self, CmmError> {
        check_stack("HStack", "heights", &children, |s| s.0)?;
        Ok(Self {
            meta: OperatorMeta::default(),
            children,
        })
    }

    pub fn named(mut self, name: &str) -> Self {
        self.meta.name = name.to_string();
        self
    }
}

impl Operator for HStack {
    fn shape(&self) -> (usize, usize) {
        let w = self.children.iter().map(|c| c.shape().1).sum();
        (self.children[0].shape().0, w)
    }

    fn meta(&self) -> &OperatorMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "HStack"
    }

    fn children(&self) -> Vec<&dyn Operator> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }

    fn eval_unchecked(
        &self,
        device: &CpuDevice,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        mut y: DenseViewMut<'_>,
        forward: bool,
    ) -> Result<(), CmmError> {
        let n = x.cols();
        let mut offset = 0;
        if forward {
            device.scale(beta, y.reborrow());
            for child in &self.children {
                let w = child.shape().1;
                let x_slc = x.subview(offset..offset + w, 0..n)?;
                child.eval(device, alpha, x_slc, Complex32::one(), y.reborrow(), true)?;
                offset += w;
            }
        } else {
            for child in &self.children {
                let w = child.shape().1;
                let y_slc = y.subview_mut(offset..offset + w, 0..n)?;
                child.eval(device, alpha, x, beta, y_slc, false)?;
                offset += w;
            }
        }
        Ok(())
    }
}

fn check_stack(
    kind: &str,
    what: &str,
    children: &[OperatorRef],
    extent: impl Fn((usize, usize)) -> usize,
) -> Result<(), CmmError> {
    let Some(first) = children.first() else {
        return Err(CmmError::InvalidDimensions(format!(
            "{} needs at least one child",
            kind
        )));
    };
    let expected = extent(first.shape());
    if children.iter().any(|c| extent(c.shape()) != expected) {
        let listed: Vec<(usize, &str)> = children
            .iter()
            .map(|c| (extent(c.shape()), c.name()))
            .collect();
        return Err(CmmError::InvalidDimensions(format!(
            "Mismatched {} in {}: attempting to stack {:?}",
            what, kind, listed
        )));
    }
    Ok(())
}
