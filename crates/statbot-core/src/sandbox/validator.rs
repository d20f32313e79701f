//! Static validation of candidate programs.
//!
//! Two passes, both before any execution. The lexical pass matches denied
//! patterns against the lowercased raw source, so obfuscation through
//! whitespace or aliasing inside expressions still trips on the original
//! text. The structural pass parses the source and walks the AST with an
//! allowlist of statement and expression kinds; anything unrecognised is
//! denied rather than ignored.

use std::sync::Arc;

use regex::RegexSet;
use rustpython_parser::{ast, parse, Mode};

use crate::error::{AgentError, AgentResult, ViolationKind};
use crate::sandbox::policy::ExecPolicy;

/// Validates candidate source against an [`ExecPolicy`].
pub struct StaticValidator {
    policy: Arc<ExecPolicy>,
    patterns: RegexSet,
}

impl StaticValidator {
    pub fn new(policy: Arc<ExecPolicy>) -> AgentResult<Self> {
        let patterns = RegexSet::new(&policy.dangerous_patterns)
            .map_err(|e| AgentError::InvalidConfig(format!("bad dangerous pattern: {}", e)))?;
        Ok(Self { policy, patterns })
    }

    /// Accepts or rejects `source`. On rejection the returned
    /// [`AgentError::PolicyViolation`] names the rule that fired.
    pub fn validate(&self, source: &str) -> AgentResult<()> {
        let lowered = source.to_lowercase();
        if let Some(idx) = self.patterns.matches(&lowered).into_iter().next() {
            return Err(violation(
                ViolationKind::Pattern,
                format!(
                    "source matches denied pattern {:?}",
                    self.policy.dangerous_patterns[idx]
                ),
            ));
        }

        let module = parse(source, Mode::Module, "<candidate>").map_err(|e| {
            violation(ViolationKind::Syntax, format!("parse error: {}", e))
        })?;

        let ast::Mod::Module(module) = module else {
            return Err(violation(
                ViolationKind::Construct,
                "only module-level programs are accepted".to_string(),
            ));
        };
        for stmt in &module.body {
            self.walk_stmt(stmt)?;
        }
        Ok(())
    }

    fn walk_stmt(&self, stmt: &ast::Stmt) -> AgentResult<()> {
        use ast::Stmt;
        match stmt {
            Stmt::Import(_) | Stmt::ImportFrom(_) => Err(violation(
                ViolationKind::Construct,
                "import statements are not allowed".to_string(),
            )),
            Stmt::FunctionDef(_) | Stmt::AsyncFunctionDef(_) => Err(violation(
                ViolationKind::Construct,
                "function definitions are not allowed".to_string(),
            )),
            Stmt::ClassDef(_) => Err(violation(
                ViolationKind::Construct,
                "class definitions are not allowed".to_string(),
            )),
            Stmt::Try(_) | Stmt::TryStar(_) => Err(violation(
                ViolationKind::Construct,
                "exception handling is not allowed".to_string(),
            )),
            Stmt::Raise(_) => Err(violation(
                ViolationKind::Construct,
                "raise statements are not allowed".to_string(),
            )),
            Stmt::Assert(_) => Err(violation(
                ViolationKind::Construct,
                "assert statements are not allowed".to_string(),
            )),
            Stmt::With(_) | Stmt::AsyncWith(_) => Err(violation(
                ViolationKind::Construct,
                "with blocks are not allowed".to_string(),
            )),
            Stmt::Global(_) | Stmt::Nonlocal(_) => Err(violation(
                ViolationKind::Construct,
                "scope mutation statements are not allowed".to_string(),
            )),
            Stmt::Delete(_) => Err(violation(
                ViolationKind::Construct,
                "del statements are not allowed".to_string(),
            )),
            Stmt::Expr(node) => self.walk_expr(&node.value),
            Stmt::Assign(node) => {
                for target in &node.targets {
                    self.walk_expr(target)?;
                }
                self.walk_expr(&node.value)
            }
            Stmt::AugAssign(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.value)
            }
            Stmt::AnnAssign(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.annotation)?;
                if let Some(value) = &node.value {
                    self.walk_expr(value)?;
                }
                Ok(())
            }
            Stmt::If(node) => {
                self.walk_expr(&node.test)?;
                for s in node.body.iter().chain(&node.orelse) {
                    self.walk_stmt(s)?;
                }
                Ok(())
            }
            Stmt::While(node) => {
                self.walk_expr(&node.test)?;
                for s in node.body.iter().chain(&node.orelse) {
                    self.walk_stmt(s)?;
                }
                Ok(())
            }
            Stmt::For(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.iter)?;
                for s in node.body.iter().chain(&node.orelse) {
                    self.walk_stmt(s)?;
                }
                Ok(())
            }
            Stmt::Return(node) => {
                if let Some(value) = &node.value {
                    self.walk_expr(value)?;
                }
                Ok(())
            }
            Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => Ok(()),
            other => Err(violation(
                ViolationKind::Construct,
                format!("unsupported statement: {}", stmt_label(other)),
            )),
        }
    }

    fn walk_expr(&self, expr: &ast::Expr) -> AgentResult<()> {
        use ast::Expr;
        match expr {
            Expr::Call(node) => {
                if let Expr::Name(name) = node.func.as_ref() {
                    if self.policy.is_builtin_blocked(name.id.as_str()) {
                        return Err(violation(
                            ViolationKind::Call,
                            format!("call to blocked builtin: {}", name.id.as_str()),
                        ));
                    }
                }
                self.walk_expr(&node.func)?;
                for arg in &node.args {
                    self.walk_expr(arg)?;
                }
                for kw in &node.keywords {
                    self.walk_expr(&kw.value)?;
                }
                Ok(())
            }
            Expr::Attribute(node) => {
                if self.policy.is_attribute_blocked(node.attr.as_str()) {
                    return Err(violation(
                        ViolationKind::Attribute,
                        format!("access to blocked attribute: {}", node.attr.as_str()),
                    ));
                }
                self.walk_expr(&node.value)
            }
            Expr::Constant(_) | Expr::Name(_) => Ok(()),
            Expr::BinOp(node) => {
                self.walk_expr(&node.left)?;
                self.walk_expr(&node.right)
            }
            Expr::BoolOp(node) => {
                for value in &node.values {
                    self.walk_expr(value)?;
                }
                Ok(())
            }
            Expr::UnaryOp(node) => self.walk_expr(&node.operand),
            Expr::Compare(node) => {
                self.walk_expr(&node.left)?;
                for comparator in &node.comparators {
                    self.walk_expr(comparator)?;
                }
                Ok(())
            }
            Expr::Subscript(node) => {
                self.walk_expr(&node.value)?;
                self.walk_expr(&node.slice)
            }
            Expr::Slice(node) => {
                for part in [&node.lower, &node.upper, &node.step].into_iter().flatten() {
                    self.walk_expr(part)?;
                }
                Ok(())
            }
            Expr::List(node) => self.walk_all(&node.elts),
            Expr::Tuple(node) => self.walk_all(&node.elts),
            Expr::Set(node) => self.walk_all(&node.elts),
            Expr::Dict(node) => {
                for key in node.keys.iter().flatten() {
                    self.walk_expr(key)?;
                }
                self.walk_all(&node.values)
            }
            Expr::ListComp(node) => {
                self.walk_expr(&node.elt)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::SetComp(node) => {
                self.walk_expr(&node.elt)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::GeneratorExp(node) => {
                self.walk_expr(&node.elt)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::DictComp(node) => {
                self.walk_expr(&node.key)?;
                self.walk_expr(&node.value)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::IfExp(node) => {
                self.walk_expr(&node.test)?;
                self.walk_expr(&node.body)?;
                self.walk_expr(&node.orelse)
            }
            Expr::JoinedStr(node) => self.walk_all(&node.values),
            Expr::FormattedValue(node) => self.walk_expr(&node.value),
            Expr::Starred(node) => self.walk_expr(&node.value),
            Expr::NamedExpr(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.value)
            }
            Expr::Lambda(node) => {
                let args = node.args.as_ref();
                for arg in args
                    .posonlyargs
                    .iter()
                    .chain(&args.args)
                    .chain(&args.kwonlyargs)
                {
                    if let Some(default) = &arg.default {
                        self.walk_expr(default)?;
                    }
                }
                self.walk_expr(&node.body)
            }
            other => Err(violation(
                ViolationKind::Construct,
                format!("unsupported expression: {}", expr_label(other)),
            )),
        }
    }

    fn walk_all(&self, exprs: &[ast::Expr]) -> AgentResult<()> {
        for expr in exprs {
            self.walk_expr(expr)?;
        }
        Ok(())
    }

    fn walk_comprehensions(&self, generators: &[ast::Comprehension]) -> AgentResult<()> {
        for gen in generators {
            self.walk_expr(&gen.target)?;
            self.walk_expr(&gen.iter)?;
            for cond in &gen.ifs {
                self.walk_expr(cond)?;
            }
        }
        Ok(())
    }
}

fn violation(kind: ViolationKind, reason: String) -> AgentError {
    AgentError::PolicyViolation { kind, reason }
}

fn stmt_label(stmt: &ast::Stmt) -> &'static str {
    match stmt {
        ast::Stmt::Match(_) => "match",
        _ => "statement",
    }
}

fn expr_label(expr: &ast::Expr) -> &'static str {
    match expr {
        ast::Expr::Await(_) => "await",
        ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => "yield",
        _ => "expression",
    }
}
