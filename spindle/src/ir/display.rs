//! Pretty-printing for IR functions
use super::{BinOp, Expr, Func, IrTensorId, Stmt, Tensor};
use std::fmt::{Display, Formatter, Result};

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }
}

impl Display for Tensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}[", self.name)?;
        for d in &self.dims {
            write!(f, "{d} x ")?;
        }
        write!(f, "{}B]", self.elem_bytes)
    }
}

/// Printer which resolves tensor ids to names
struct Printer<'a> {
    func: &'a Func,
}

impl Printer<'_> {
    fn name(&self, t: IrTensorId) -> String {
        match self.func.tensors.get(t) {
            Some(t) => t.name.clone(),
            None => format!("%{t}"),
        }
    }

    fn expr(&self, f: &mut Formatter<'_>, e: &Expr) -> Result {
        match e {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Load { tensor, index } => {
                write!(f, "{}[", self.name(*tensor))?;
                self.expr(f, index)?;
                write!(f, "]")
            }
            Expr::Tensor(t) => write!(f, "&{}", self.name(*t)),
            Expr::TensorPtr { tensor, offset } => {
                write!(f, "&{}[", self.name(*tensor))?;
                self.expr(f, offset)?;
                write!(f, "]")
            }
            Expr::Binary(op @ (BinOp::Min | BinOp::Max), a, b) => {
                write!(f, "{}(", op.symbol())?;
                self.expr(f, a)?;
                write!(f, ", ")?;
                self.expr(f, b)?;
                write!(f, ")")
            }
            Expr::Binary(op, a, b) => {
                write!(f, "(")?;
                self.expr(f, a)?;
                write!(f, " {} ", op.symbol())?;
                self.expr(f, b)?;
                write!(f, ")")
            }
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee.name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.expr(f, a)?;
                }
                write!(f, ")")
            }
        }
    }

    fn block(&self, f: &mut Formatter<'_>, s: &Stmt, depth: usize) -> Result {
        match s {
            Stmt::Block(v) => {
                for s in v {
                    self.stmt(f, s, depth)?;
                }
                Ok(())
            }
            s => self.stmt(f, s, depth),
        }
    }

    fn stmt(&self, f: &mut Formatter<'_>, s: &Stmt, depth: usize) -> Result {
        let indent = "    ".repeat(depth);
        match s {
            Stmt::Block(..) => {
                writeln!(f, "{indent}{{")?;
                self.block(f, s, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Stmt::Define(t) => match self.func.tensors.get(*t) {
                Some(t) => writeln!(f, "{indent}tensor {t}"),
                None => writeln!(f, "{indent}tensor %{t}"),
            },
            Stmt::Store {
                tensor,
                index,
                value,
            } => {
                write!(f, "{indent}{}[", self.name(*tensor))?;
                self.expr(f, index)?;
                write!(f, "] = ")?;
                self.expr(f, value)?;
                writeln!(f)
            }
            Stmt::Eval(e) => {
                write!(f, "{indent}")?;
                self.expr(f, e)?;
                writeln!(f)
            }
            Stmt::For {
                var,
                begin,
                end,
                step,
                body,
            } => {
                write!(f, "{indent}for {var} in ")?;
                self.expr(f, begin)?;
                write!(f, "..")?;
                self.expr(f, end)?;
                write!(f, " step ")?;
                self.expr(f, step)?;
                writeln!(f, " {{")?;
                self.block(f, body, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                write!(f, "{indent}if ")?;
                self.expr(f, cond)?;
                writeln!(f, " {{")?;
                self.block(f, then, depth + 1)?;
                if let Some(e) = otherwise {
                    writeln!(f, "{indent}}} else {{")?;
                    self.block(f, e, depth + 1)?;
                }
                writeln!(f, "{indent}}}")
            }
            Stmt::Return(None) => writeln!(f, "{indent}return"),
            Stmt::Return(Some(e)) => {
                write!(f, "{indent}return ")?;
                self.expr(f, e)?;
                writeln!(f)
            }
        }
    }
}

impl Display for Func {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "func {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match self.tensors.get(*p) {
                Some(t) => write!(f, "{t}")?,
                None => write!(f, "%{p}")?,
            }
        }
        writeln!(f, ") {{")?;
        Printer { func: self }.block(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use crate::ir::*;
    use std::sync::Arc;

    #[test]
    fn test_display() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 8, 4);
        let b = f.add_local("b", 8, 4);
        let decl = Arc::new(FuncDecl {
            name: "sink".to_owned(),
            params: vec![Some(ArgAccess::Read)],
        });
        f.body = Stmt::Block(vec![
            Stmt::Define(b),
            Stmt::for_range(
                "i",
                0,
                8,
                vec![Stmt::store(
                    b,
                    Expr::var("i"),
                    Expr::binary(
                        BinOp::Max,
                        Expr::load(a, Expr::var("i")),
                        Expr::Const(0),
                    ),
                )],
            ),
            Stmt::If {
                cond: Expr::binary(BinOp::Lt, Expr::var("n"), Expr::Const(4)),
                then: Box::new(Stmt::Eval(Expr::call(
                    &decl,
                    vec![Expr::Tensor(b)],
                ))),
                otherwise: Some(Box::new(Stmt::Return(None))),
            },
        ]);
        let expected = "\
func f(a[8 x 4B]) {
    tensor b[8 x 4B]
    for i in 0..8 step 1 {
        b[i] = max(a[i], 0)
    }
    if (n < 4) {
        sink(&b)
    } else {
        return
    }
}
";
        assert_eq!(f.to_string(), expected);
    }
}
