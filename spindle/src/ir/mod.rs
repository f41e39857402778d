//! Loop-nest IR over flattened tensors
//!
//! This is the representation consumed by the buffer scheduler: a function
//! body made of nested blocks, loops, and conditionals, which reads and writes
//! one-dimensional tensors.
//!
//! Tensors are declared in [`Func::tensors`] and referred to by
//! [`IrTensorId`].  Arguments are live for the whole function; locals come
//! into existence at their [`Stmt::Define`] and die at the end of the
//! enclosing block.
//!
//! ```
//! use spindle::ir::{Expr, Func, Stmt};
//!
//! let mut f = Func::new("scale");
//! let a = f.add_arg("a", 16, 4);
//! let t = f.add_local("t", 16, 4);
//! f.body = Stmt::Block(vec![
//!     Stmt::Define(t),
//!     Stmt::for_range("i", 0, 16, vec![
//!         Stmt::store(t, Expr::var("i"), Expr::load(a, Expr::var("i")) * Expr::Const(2)),
//!     ]),
//! ]);
//! assert_eq!(f.local_bytes(), 64);
//! assert!(f.to_string().contains("t[i] = (a[i] * 2)"));
//! ```
use crate::{
    Error,
    indexed::{IndexVec, define_index},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod display;

define_index!(IrTensorId, "An index in the `Func::tensors` array");

/// Storage class of a tensor
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TensorKind {
    /// Function argument, owned by the caller
    Arg,
    /// Local buffer, allocated by the function
    Local,
}

/// Tensor declaration
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Human-readable name, used when printing
    pub name: String,
    /// Shape of the tensor; the buffer scheduler requires exactly one dimension
    pub dims: Vec<usize>,
    /// Size of a single element, in bytes
    pub elem_bytes: usize,
    /// Storage class
    pub kind: TensorKind,
    /// Opt out of buffer scheduling
    #[serde(default)]
    pub dont_schedule: bool,
    /// Offset added to the tick of every access when computing the tensor's
    /// first access, for tensors whose real lifetime is known to start
    /// earlier than the accesses visible in this function
    #[serde(default)]
    pub hint_first_access: Option<isize>,
    /// Offset added to the tick of every access when computing the tensor's
    /// last access
    #[serde(default)]
    pub hint_last_access: Option<isize>,
}

impl Tensor {
    /// Returns the total size of the tensor in bytes
    pub fn bytes(&self) -> usize {
        self.dims.iter().product::<usize>() * self.elem_bytes
    }

    /// Checks whether this is a caller-owned argument
    pub fn is_arg(&self) -> bool {
        self.kind == TensorKind::Arg
    }
}

/// How a callee uses a tensor argument
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgAccess {
    Read,
    Write,
    ReadWrite,
}

impl ArgAccess {
    /// Checks whether the callee may read the argument
    pub fn reads(&self) -> bool {
        matches!(self, ArgAccess::Read | ArgAccess::ReadWrite)
    }
    /// Checks whether the callee may write the argument
    pub fn writes(&self) -> bool {
        matches!(self, ArgAccess::Write | ArgAccess::ReadWrite)
    }
}

/// Declaration of an external function
///
/// Parameters without an annotation are assumed to be both read and written.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    /// Function name
    pub name: String,
    /// Per-parameter access annotations
    pub params: Vec<Option<ArgAccess>>,
}

/// Binary operator
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    Lt,
    Le,
    Eq,
    Ne,
}

/// Expression tree
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expr {
    /// Integer constant
    Const(i64),
    /// Scalar variable (e.g. a loop index)
    Var(String),
    /// Read of a single tensor element
    Load {
        /// Tensor being read
        tensor: IrTensorId,
        /// Element index
        index: Box<Expr>,
    },
    /// Pointer to the start of a tensor
    Tensor(IrTensorId),
    /// Pointer to an element within a tensor
    TensorPtr {
        /// Tensor being pointed into
        tensor: IrTensorId,
        /// Element offset
        offset: Box<Expr>,
    },
    /// Binary arithmetic or comparison
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Call to an external function
    Call {
        /// Declaration of the callee
        callee: Arc<FuncDecl>,
        /// Call arguments
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Builds a variable reference
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_owned())
    }

    /// Builds a tensor element read
    pub fn load(tensor: IrTensorId, index: Expr) -> Self {
        Expr::Load {
            tensor,
            index: Box::new(index),
        }
    }

    /// Builds a binary expression
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Builds a call expression
    pub fn call(callee: &Arc<FuncDecl>, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: callee.clone(),
            args,
        }
    }

    /// Returns the tensor referenced directly by this node, if any
    pub fn tensor(&self) -> Option<IrTensorId> {
        match self {
            Expr::Load { tensor, .. }
            | Expr::TensorPtr { tensor, .. }
            | Expr::Tensor(tensor) => Some(*tensor),
            _ => None,
        }
    }

    /// Checks whether evaluating this expression may call a function
    pub fn has_call(&self) -> bool {
        match self {
            Expr::Const(..) | Expr::Var(..) | Expr::Tensor(..) => false,
            Expr::Load { index: e, .. } | Expr::TensorPtr { offset: e, .. } => {
                e.has_call()
            }
            Expr::Binary(_, a, b) => a.has_call() || b.has_call(),
            Expr::Call { .. } => true,
        }
    }

    /// Calls `f` on every tensor reference in this expression
    pub fn for_each_tensor<F: FnMut(IrTensorId)>(&self, f: &mut F) {
        match self {
            Expr::Const(..) | Expr::Var(..) => (),
            Expr::Tensor(t) => f(*t),
            Expr::Load { tensor, index: e }
            | Expr::TensorPtr { tensor, offset: e } => {
                f(*tensor);
                e.for_each_tensor(f);
            }
            Expr::Binary(_, a, b) => {
                a.for_each_tensor(f);
                b.for_each_tensor(f);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.for_each_tensor(f);
                }
            }
        }
    }

    /// Calls `f` on every tensor reference, allowing it to be replaced
    pub fn for_each_tensor_mut<F: FnMut(&mut IrTensorId)>(
        &mut self,
        f: &mut F,
    ) {
        match self {
            Expr::Const(..) | Expr::Var(..) => (),
            Expr::Tensor(t) => f(t),
            Expr::Load { tensor, index: e }
            | Expr::TensorPtr { tensor, offset: e } => {
                f(tensor);
                e.for_each_tensor_mut(f);
            }
            Expr::Binary(_, a, b) => {
                a.for_each_tensor_mut(f);
                b.for_each_tensor_mut(f);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.for_each_tensor_mut(f);
                }
            }
        }
    }
}

macro_rules! impl_binary {
    ($trait:ident, $fn:ident, $op:ident) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $fn(self, rhs: Expr) -> Expr {
                Expr::binary(BinOp::$op, self, rhs)
            }
        }
    };
}
impl_binary!(Add, add, Add);
impl_binary!(Sub, sub, Sub);
impl_binary!(Mul, mul, Mul);
impl_binary!(Div, div, Div);
impl_binary!(Rem, rem, Rem);

/// Statement tree
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stmt {
    /// Sequence of statements, which scopes any locals defined within it
    Block(Vec<Stmt>),
    /// Allocation of a local tensor, live until the end of the block
    Define(IrTensorId),
    /// Write to a single tensor element
    Store {
        /// Tensor being written
        tensor: IrTensorId,
        /// Element index
        index: Expr,
        /// Value to write
        value: Expr,
    },
    /// Expression evaluated for its side effects
    Eval(Expr),
    /// Counted loop over `begin..end`
    For {
        /// Loop variable name
        var: String,
        /// First value (inclusive)
        begin: Expr,
        /// Last value (exclusive)
        end: Expr,
        /// Increment
        step: Expr,
        /// Loop body
        body: Box<Stmt>,
    },
    /// Conditional
    If {
        /// Condition
        cond: Expr,
        /// Taken if the condition is nonzero
        then: Box<Stmt>,
        /// Taken otherwise
        otherwise: Option<Box<Stmt>>,
    },
    /// Return from the function
    Return(Option<Expr>),
}

impl Default for Stmt {
    fn default() -> Self {
        Stmt::Block(vec![])
    }
}

impl Stmt {
    /// Builds an element store
    pub fn store(tensor: IrTensorId, index: Expr, value: Expr) -> Self {
        Stmt::Store {
            tensor,
            index,
            value,
        }
    }

    /// Builds a loop over `begin..end` with a step of 1
    pub fn for_range(var: &str, begin: i64, end: i64, body: Vec<Stmt>) -> Self {
        Stmt::For {
            var: var.to_owned(),
            begin: Expr::Const(begin),
            end: Expr::Const(end),
            step: Expr::Const(1),
            body: Box::new(Stmt::Block(body)),
        }
    }

    /// Calls `f` on every statement in this tree, in pre-order
    pub fn for_each_stmt<F: FnMut(&Stmt)>(&self, f: &mut F) {
        f(self);
        match self {
            Stmt::Block(v) => {
                for s in v {
                    s.for_each_stmt(f);
                }
            }
            Stmt::For { body, .. } => body.for_each_stmt(f),
            Stmt::If {
                then, otherwise, ..
            } => {
                then.for_each_stmt(f);
                if let Some(e) = otherwise {
                    e.for_each_stmt(f);
                }
            }
            Stmt::Define(..)
            | Stmt::Store { .. }
            | Stmt::Eval(..)
            | Stmt::Return(..) => (),
        }
    }

    /// Calls `f` on every expression held directly by this statement
    pub fn for_each_expr<F: FnMut(&Expr)>(&self, f: &mut F) {
        match self {
            Stmt::Block(..) | Stmt::Define(..) | Stmt::Return(None) => (),
            Stmt::Store { index, value, .. } => {
                f(index);
                f(value);
            }
            Stmt::Eval(e) | Stmt::Return(Some(e)) => f(e),
            Stmt::For {
                begin, end, step, ..
            } => {
                f(begin);
                f(end);
                f(step);
            }
            Stmt::If { cond, .. } => f(cond),
        }
    }

    /// Calls `f` on every tensor reference in this tree, allowing it to be
    /// replaced
    ///
    /// This includes `Define` and `Store` targets.
    pub fn for_each_tensor_mut<F: FnMut(&mut IrTensorId)>(
        &mut self,
        f: &mut F,
    ) {
        match self {
            Stmt::Block(v) => {
                for s in v {
                    s.for_each_tensor_mut(f);
                }
            }
            Stmt::Define(t) => f(t),
            Stmt::Store {
                tensor,
                index,
                value,
            } => {
                f(tensor);
                index.for_each_tensor_mut(f);
                value.for_each_tensor_mut(f);
            }
            Stmt::Eval(e) | Stmt::Return(Some(e)) => e.for_each_tensor_mut(f),
            Stmt::Return(None) => (),
            Stmt::For {
                begin,
                end,
                step,
                body,
                ..
            } => {
                begin.for_each_tensor_mut(f);
                end.for_each_tensor_mut(f);
                step.for_each_tensor_mut(f);
                body.for_each_tensor_mut(f);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                cond.for_each_tensor_mut(f);
                then.for_each_tensor_mut(f);
                if let Some(e) = otherwise {
                    e.for_each_tensor_mut(f);
                }
            }
        }
    }

    /// Removes every statement for which `keep` returns `false`
    ///
    /// Statements are offered to `keep` in pre-order; a removed statement's
    /// children are not visited.  Loop bodies and branches which are removed
    /// become empty blocks.
    pub fn retain<F: FnMut(&Stmt) -> bool>(&mut self, keep: &mut F) {
        match self {
            Stmt::Block(v) => v.retain_mut(|s| {
                let k = keep(&*s);
                if k {
                    s.retain(keep);
                }
                k
            }),
            Stmt::For { body, .. } => retain_child(body, keep),
            Stmt::If {
                then, otherwise, ..
            } => {
                retain_child(then, keep);
                if let Some(e) = otherwise {
                    retain_child(e, keep);
                }
            }
            Stmt::Define(..)
            | Stmt::Store { .. }
            | Stmt::Eval(..)
            | Stmt::Return(..) => (),
        }
    }
}

fn retain_child<F: FnMut(&Stmt) -> bool>(s: &mut Box<Stmt>, keep: &mut F) {
    if keep(&**s) {
        s.retain(keep);
    } else {
        **s = Stmt::default();
    }
}

/// A function in the loop-nest IR
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Func {
    /// Function name
    pub name: String,
    /// Argument tensors, in order
    pub params: Vec<IrTensorId>,
    /// Every tensor declared by the function
    pub tensors: IndexVec<Tensor, IrTensorId>,
    /// Function body
    pub body: Stmt,
}

impl Func {
    /// Builds an empty function
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    fn add_tensor(
        &mut self,
        name: &str,
        len: usize,
        elem_bytes: usize,
        kind: TensorKind,
    ) -> IrTensorId {
        self.tensors.push(Tensor {
            name: name.to_owned(),
            dims: vec![len],
            elem_bytes,
            kind,
            dont_schedule: false,
            hint_first_access: None,
            hint_last_access: None,
        })
    }

    /// Declares a new one-dimensional argument tensor
    pub fn add_arg(
        &mut self,
        name: &str,
        len: usize,
        elem_bytes: usize,
    ) -> IrTensorId {
        let t = self.add_tensor(name, len, elem_bytes, TensorKind::Arg);
        self.params.push(t);
        t
    }

    /// Declares a new one-dimensional local tensor
    ///
    /// The tensor isn't allocated until a [`Stmt::Define`] is added to the
    /// body.
    pub fn add_local(
        &mut self,
        name: &str,
        len: usize,
        elem_bytes: usize,
    ) -> IrTensorId {
        self.add_tensor(name, len, elem_bytes, TensorKind::Local)
    }

    /// Looks up a tensor declaration
    pub fn tensor(&self, t: IrTensorId) -> Result<&Tensor, Error> {
        self.tensors.get(t).ok_or(Error::BadIrTensor(t.get()))
    }

    /// Returns every local tensor with a `Define`, in body order
    pub fn defined_locals(&self) -> Vec<IrTensorId> {
        let mut out = vec![];
        self.body.for_each_stmt(&mut |s| {
            if let Stmt::Define(t) = s {
                out.push(*t);
            }
        });
        out
    }

    /// Returns the number of bytes allocated by the function's `Define`s
    pub fn local_bytes(&self) -> usize {
        self.defined_locals()
            .into_iter()
            .filter_map(|t| self.tensors.get(t))
            .map(Tensor::bytes)
            .sum()
    }

    /// Calls `f` on every tensor reference in the body
    ///
    /// `Define` and `Store` targets are included.
    pub fn for_each_tensor_ref<F: FnMut(IrTensorId)>(&self, mut f: F) {
        self.body.for_each_stmt(&mut |s| {
            match s {
                Stmt::Define(t) | Stmt::Store { tensor: t, .. } => f(*t),
                _ => (),
            }
            s.for_each_expr(&mut |e| e.for_each_tensor(&mut f));
        });
    }
}
