use crate::decoration::Decoration;
use crate::expr::Expr;
use crate::program::{AccessValue, Block, InstrKind, Instr, Program, Routine, Transfer};

/// Print an expression in Boogie syntax, fully parenthesized.
pub fn expr_to_boogie(expr: &Expr) -> String {
    match expr {
        Expr::Var(name) => name.clone(),
        Expr::IntLit(n) => {
            if *n < 0 {
                format!("(0 - {})", -n)
            } else {
                n.to_string()
            }
        }
        Expr::BoolLit(b) => {
            if *b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        Expr::Add(l, r) => binary("+", l, r),
        Expr::Sub(l, r) => binary("-", l, r),
        Expr::Mul(l, r) => binary("*", l, r),
        Expr::Eq(l, r) => binary("==", l, r),
        Expr::Neq(l, r) => binary("!=", l, r),
        Expr::Lt(l, r) => binary("<", l, r),
        Expr::Le(l, r) => binary("<=", l, r),
        Expr::And(l, r) => binary("&&", l, r),
        Expr::Or(l, r) => binary("||", l, r),
        Expr::Implies(l, r) => binary("==>", l, r),
        Expr::Iff(l, r) => binary("<==>", l, r),
        Expr::Not(inner) => format!("!{}", expr_to_boogie(inner)),
        Expr::Select(map, index) => {
            format!("{}[{}]", expr_to_boogie(map), expr_to_boogie(index))
        }
        Expr::Store(map, index, value) => format!(
            "{}[{} := {}]",
            expr_to_boogie(map),
            expr_to_boogie(index),
            expr_to_boogie(value)
        ),
        Expr::Apply(function, args) => {
            let inner: Vec<String> = args.iter().map(expr_to_boogie).collect();
            format!("{function}({})", inner.join(", "))
        }
        Expr::ForAll(bound, body) => {
            let vars: Vec<String> = bound.iter().map(|(n, t)| format!("{n}: {t}")).collect();
            format!("(forall {} :: {})", vars.join(", "), expr_to_boogie(body))
        }
    }
}

fn binary(op: &str, lhs: &Expr, rhs: &Expr) -> String {
    format!("({} {op} {})", expr_to_boogie(lhs), expr_to_boogie(rhs))
}

fn attributes(decorations: &[Decoration]) -> String {
    decorations
        .iter()
        .map(|d| format!("{d} "))
        .collect::<String>()
}

/// Print one instruction, without indentation or trailing newline.
pub fn instr_to_boogie(instr: &Instr) -> String {
    let attrs = attributes(&instr.decorations);
    match &instr.kind {
        InstrKind::Assign { target, value } => {
            format!("{target} := {};", expr_to_boogie(value))
        }
        InstrKind::Access(access) => {
            let cell = format!("{}[{}]", access.region, expr_to_boogie(&access.offset));
            match &access.value {
                AccessValue::Stored(value) => format!("{cell} := {};", expr_to_boogie(value)),
                AccessValue::Loaded(target) => format!("{target} := {cell};"),
            }
        }
        InstrKind::Acquire { lock } => format!("call {attrs}_ACQUIRE_LOCK({lock});"),
        InstrKind::Release { lock } => format!("call {attrs}_RELEASE_LOCK({lock});"),
        InstrKind::Call(call) => {
            let args: Vec<String> = call.args.iter().map(expr_to_boogie).collect();
            if call.outs.is_empty() {
                format!("call {attrs}{}({});", call.callee, args.join(", "))
            } else {
                format!(
                    "call {attrs}{} := {}({});",
                    call.outs.join(", "),
                    call.callee,
                    args.join(", ")
                )
            }
        }
        InstrKind::Assert(expr) => format!("assert {attrs}{};", expr_to_boogie(expr)),
        InstrKind::Assume(expr) => format!("assume {attrs}{};", expr_to_boogie(expr)),
        InstrKind::Havoc(vars) => format!("havoc {};", vars.join(", ")),
    }
}

fn print_block(out: &mut String, block: &Block) {
    out.push_str(&format!("  {}:\n", block.label));
    for instr in &block.instrs {
        out.push_str("    ");
        out.push_str(&instr_to_boogie(instr));
        out.push('\n');
    }
    match &block.transfer {
        Transfer::Goto(targets) => out.push_str(&format!("    goto {};\n", targets.join(", "))),
        Transfer::Return => out.push_str("    return;\n"),
    }
}

fn print_routine(out: &mut String, routine: &Routine) {
    let params: Vec<String> = routine
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty))
        .collect();
    out.push_str(&format!(
        "procedure {}{}({})",
        attributes(&routine.decorations),
        routine.name,
        params.join(", ")
    ));
    if routine.has_body() {
        out.push('\n');
    } else {
        out.push_str(";\n");
    }
    if !routine.contract.modifies.is_empty() {
        let mods: Vec<&str> = routine.contract.modifies.iter().map(String::as_str).collect();
        out.push_str(&format!("  modifies {};\n", mods.join(", ")));
    }
    for req in &routine.contract.requires {
        out.push_str(&format!("  requires {};\n", expr_to_boogie(req)));
    }
    for ens in &routine.contract.ensures {
        out.push_str(&format!("  ensures {};\n", expr_to_boogie(ens)));
    }
    if !routine.has_body() {
        out.push('\n');
        return;
    }
    out.push_str("{\n");
    for local in &routine.locals {
        out.push_str(&format!("  var {}: {};\n", local.name, local.ty));
    }
    for block in &routine.blocks {
        print_block(out, block);
    }
    out.push_str("}\n\n");
}

/// Print a whole program for the external verifier.
pub fn to_boogie(program: &Program) -> String {
    let mut out = String::new();
    for constant in &program.constants {
        let unique = if constant.unique { "unique " } else { "" };
        out.push_str(&format!(
            "const {}{unique}{}: {};\n",
            attributes(&constant.decorations),
            constant.name,
            constant.ty
        ));
    }
    for global in &program.globals {
        out.push_str(&format!(
            "var {}{}: {};\n",
            attributes(&global.decorations),
            global.name,
            global.ty
        ));
    }
    for function in &program.functions {
        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        out.push_str(&format!(
            "function {}({}): {};\n",
            function.name,
            params.join(", "),
            function.result
        ));
    }
    for axiom in &program.axioms {
        out.push_str(&format!("axiom {};\n", expr_to_boogie(axiom)));
    }
    out.push('\n');
    for (_, routine) in program.routines() {
        print_routine(&mut out, routine);
    }
    out
}
