//! Recursive syntax tree walkers

use vibe_syntax::{CallExpr, Expr, Stmt};

/// Call `f` on every statement, descending into nested bodies
pub fn each_stmt<'a>(stmts: &'a [Stmt], f: &mut dyn FnMut(&'a Stmt)) {
    for stmt in stmts {
        f(stmt);
        match stmt {
            Stmt::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    each_stmt(&branch.body, f);
                }
                if let Some(body) = otherwise {
                    each_stmt(body, f);
                }
            }
            Stmt::For(for_loop) => {
                each_stmt(&for_loop.body, f);
                if let Some(body) = &for_loop.otherwise {
                    each_stmt(body, f);
                }
            }
            Stmt::SetBlock { body, .. }
            | Stmt::With { body, .. }
            | Stmt::CallBlock { body, .. }
            | Stmt::Block { body, .. }
            | Stmt::FilterBlock { body, .. } => each_stmt(body, f),
            Stmt::Macro(def) => each_stmt(&def.body, f),
            _ => {}
        }
    }
}

/// Call `f` on every expression and sub-expression under `stmts`
pub fn each_expr<'a>(stmts: &'a [Stmt], f: &mut dyn FnMut(&'a Expr)) {
    each_stmt(stmts, &mut |stmt| match stmt {
        Stmt::Output(e) | Stmt::Set { value: e, .. } => walk_expr(e, f),
        Stmt::If { branches, .. } => {
            for branch in branches {
                walk_expr(&branch.condition, f);
            }
        }
        Stmt::For(for_loop) => walk_expr(&for_loop.iter, f),
        Stmt::With { bindings, .. } => {
            for (_, e) in bindings {
                walk_expr(e, f);
            }
        }
        Stmt::Macro(def) => {
            for default in def.params.iter().filter_map(|p| p.default.as_ref()) {
                walk_expr(default, f);
            }
        }
        Stmt::CallBlock { call, params, .. } => {
            walk_call(call, f);
            for default in params.iter().filter_map(|p| p.default.as_ref()) {
                walk_expr(default, f);
            }
        }
        Stmt::Include { template, .. }
        | Stmt::Import { template, .. }
        | Stmt::FromImport { template, .. }
        | Stmt::Extends { template } => walk_expr(template, f),
        Stmt::FilterBlock { args, .. } => {
            for arg in args {
                walk_expr(arg, f);
            }
        }
        _ => {}
    });
}

fn walk_call<'a>(call: &'a CallExpr, f: &mut dyn FnMut(&'a Expr)) {
    walk_expr(&call.callee, f);
    for arg in &call.args {
        walk_expr(arg, f);
    }
    for kwarg in &call.kwargs {
        walk_expr(&kwarg.value, f);
    }
}

/// Call `f` on `expr` and all of its sub-expressions, parents first
pub fn walk_expr<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    f(expr);
    match expr {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::List(items) => {
            for item in items {
                walk_expr(item, f);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                walk_expr(k, f);
                walk_expr(v, f);
            }
        }
        Expr::Binary { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::Unary { operand, .. } => walk_expr(operand, f),
        Expr::Attribute { object, .. } => walk_expr(object, f),
        Expr::Item { object, index } => {
            walk_expr(object, f);
            walk_expr(index, f);
        }
        Expr::Slice {
            object,
            start,
            stop,
            step,
        } => {
            walk_expr(object, f);
            for bound in [start, stop, step].into_iter().flatten() {
                walk_expr(bound, f);
            }
        }
        Expr::Call(call) => walk_call(call, f),
        Expr::Filter {
            value,
            args,
            kwargs,
            ..
        } => {
            walk_expr(value, f);
            for arg in args {
                walk_expr(arg, f);
            }
            for kwarg in kwargs {
                walk_expr(&kwarg.value, f);
            }
        }
        Expr::Test { value, args, .. } => {
            walk_expr(value, f);
            for arg in args {
                walk_expr(arg, f);
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            walk_expr(condition, f);
            walk_expr(then, f);
            if let Some(otherwise) = otherwise {
                walk_expr(otherwise, f);
            }
        }
    }
}

/// True if any expression under `stmts` reads the variable `name`
pub fn reads_name(stmts: &[Stmt], name: &str) -> bool {
    let mut found = false;
    each_expr(stmts, &mut |e| {
        if matches!(e, Expr::Name(n) if n == name) {
            found = true;
        }
    });
    found
}
