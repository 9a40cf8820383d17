//! Backend selection
//!
//! Bytecode covers expressions, output, conditionals and single-target loops.
//! Templates using anything else are rendered by the tree-walking backend in
//! full; there is no per-statement mixing.

use rustc_hash::FxHashSet;
use vibe_syntax::{Expr, ForTarget, Stmt, TemplateAst};

use crate::visit::{each_expr, each_stmt};

/// Rendering backend for a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Compile to bytecode and run on the VM
    Bytecode,
    /// Hand the syntax tree to the tree-walking renderer
    TreeWalk,
}

/// Pick the backend for `ast`
pub fn select_backend(ast: &TemplateAst) -> Backend {
    match fallback_reason(ast) {
        Some(reason) => {
            tracing::debug!(reason, "template routed to tree-walk backend");
            Backend::TreeWalk
        }
        None => Backend::Bytecode,
    }
}

/// First construct found that keeps `ast` off the bytecode backend
pub fn fallback_reason(ast: &TemplateAst) -> Option<&'static str> {
    let mut reason = None;
    let mut macros = FxHashSet::default();
    each_stmt(&ast.body, &mut |stmt| {
        let found = match stmt {
            Stmt::Macro(def) => {
                macros.insert(def.name.as_str());
                Some("macro definition")
            }
            Stmt::CallBlock { .. } => Some("call block"),
            Stmt::Import { .. } => Some("import"),
            Stmt::FromImport { .. } => Some("from import"),
            Stmt::Include { .. } => Some("include"),
            Stmt::Extends { .. } => Some("extends"),
            Stmt::FilterBlock { .. } => Some("filter block"),
            Stmt::SetBlock { .. } => Some("set block"),
            Stmt::For(for_loop) if matches!(for_loop.target, ForTarget::Tuple(_)) => {
                Some("multi-target loop")
            }
            _ => None,
        };
        reason = reason.or(found);
    });
    if reason.is_some() {
        return reason;
    }

    each_expr(&ast.body, &mut |expr| {
        if let Expr::Call(call) = expr
            && matches!(&*call.callee, Expr::Name(n) if macros.contains(n.as_str()))
        {
            reason = Some("call to template macro");
        }
    });
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_syntax::parse;

    fn backend(source: &str) -> Backend {
        select_backend(&parse(source).unwrap())
    }

    #[test]
    fn test_plain_templates_use_bytecode() {
        assert_eq!(backend("Hello {{ name|upper }}"), Backend::Bytecode);
        assert_eq!(
            backend("{% for x in xs %}{% if x %}{{ loop.index }}{% endif %}{% endfor %}"),
            Backend::Bytecode
        );
        assert_eq!(backend("{% with a = 1 %}{{ a }}{% endwith %}"), Backend::Bytecode);
    }

    #[test]
    fn test_nested_constructs_force_fallback() {
        assert_eq!(
            backend("{% if x %}{% include 'a' %}{% endif %}"),
            Backend::TreeWalk
        );
        assert_eq!(
            backend("{% for k, v in d %}{{ k }}{% endfor %}"),
            Backend::TreeWalk
        );
        assert_eq!(backend("{% macro m() %}{% endmacro %}"), Backend::TreeWalk);
        assert_eq!(backend("{% set x %}y{% endset %}"), Backend::TreeWalk);
    }

    #[test]
    fn test_fallback_reason() {
        let ast = parse("{% extends 'base' %}").unwrap();
        assert_eq!(fallback_reason(&ast), Some("extends"));
        let ast = parse("{{ range(3)|join }}").unwrap();
        assert_eq!(fallback_reason(&ast), None);
    }
}
