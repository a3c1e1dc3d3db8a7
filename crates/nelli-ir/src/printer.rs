//! Text format printer.
//!
//! ```text
//! core.module @name {
//!   func.func @main(%0: core.index) -> core.index {
//!     %1 = arith.constant {value = 42} : core.index
//!     func.return %1
//!   }
//! }
//! ```
//!
//! Value numbering restarts for every function (isolated-from-above
//! operation) directly inside a module.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use crate::context::IrContext;
use crate::ir::Symbol;
use crate::op_interface::IsolatedFromAboveOps;
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::types::Attribute;

/// Print state for value numbering and block labeling.
struct PrintState<'a> {
    ctx: &'a IrContext,
    value_names: HashMap<ValueRef, String>,
    block_labels: HashMap<BlockRef, String>,
    next_value_num: usize,
    next_block_num: usize,
}

impl<'a> PrintState<'a> {
    fn new(ctx: &'a IrContext) -> Self {
        Self {
            ctx,
            value_names: HashMap::new(),
            block_labels: HashMap::new(),
            next_value_num: 0,
            next_block_num: 0,
        }
    }

    fn assign_value_name(&mut self, v: ValueRef) -> String {
        let name = format!("%{}", self.next_value_num);
        self.next_value_num += 1;
        self.value_names.insert(v, name.clone());
        name
    }

    fn get_value_name(&self, v: ValueRef) -> &str {
        self.value_names.get(&v).map(|s| s.as_str()).unwrap_or("%?")
    }

    fn assign_block_label(&mut self, b: BlockRef) -> String {
        let label = format!("^bb{}", self.next_block_num);
        self.next_block_num += 1;
        self.block_labels.insert(b, label.clone());
        label
    }

    fn get_block_label(&self, b: BlockRef) -> &str {
        self.block_labels
            .get(&b)
            .map(|s| s.as_str())
            .unwrap_or("^bb?")
    }

    fn reset_numbering(&mut self) {
        self.next_value_num = 0;
        self.next_block_num = 0;
        self.value_names.clear();
        self.block_labels.clear();
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Print an operation as IR text.
pub fn print_op(ctx: &IrContext, op: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    print_operation(&mut state, &mut out, op, 0).expect("fmt::Write to String never fails");
    out
}

/// Print a type as IR text.
pub fn print_type(ctx: &IrContext, ty: TypeRef) -> String {
    let mut out = String::new();
    write_type(ctx, &mut out, ty).expect("fmt::Write to String never fails");
    out
}

/// Print a module (root operation with nested functions) as IR text.
pub fn print_module(ctx: &IrContext, root: OpRef) -> String {
    print_op(ctx, root)
}

// ============================================================================
// Type and attribute printing
// ============================================================================

fn write_type(ctx: &IrContext, f: &mut impl Write, ty: TypeRef) -> fmt::Result {
    let data = ctx.types.get(ty);
    write!(f, "{}.{}", data.dialect, data.name)?;
    if !data.params.is_empty() {
        f.write_char('(')?;
        for (i, &param) in data.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(ctx, f, param)?;
        }
        f.write_char(')')?;
    } else if !data.attrs.is_empty() {
        // Empty parens signal that attrs follow
        f.write_str("()")?;
    }
    write_attr_dict(ctx, f, data.attrs.iter())
}

fn write_attribute(ctx: &IrContext, f: &mut impl Write, attr: &Attribute) -> fmt::Result {
    match attr {
        Attribute::Unit => f.write_str("unit"),
        Attribute::Bool(b) => write!(f, "{b}"),
        Attribute::IntBits(bits) => write!(f, "{}", *bits as i64),
        Attribute::FloatBits(bits) => {
            let v = f64::from_bits(*bits);
            let s = format!("{v}");
            f.write_str(&s)?;
            // Keep a decimal point on finite whole numbers so they re-parse as floats.
            if v.is_finite() && !s.contains('.') && !s.contains('e') && !s.contains('E') {
                f.write_str(".0")?;
            }
            Ok(())
        }
        Attribute::String(s) => {
            f.write_char('"')?;
            write_escaped_string(f, s)?;
            f.write_char('"')
        }
        Attribute::Symbol(sym) => write_symbol(f, *sym),
        Attribute::Type(ty) => write_type(ctx, f, *ty),
        Attribute::List(list) => {
            f.write_char('[')?;
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_attribute(ctx, f, item)?;
            }
            f.write_char(']')
        }
    }
}

fn write_escaped_string(f: &mut impl Write, s: &str) -> fmt::Result {
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

fn write_symbol(f: &mut impl Write, sym: Symbol) -> fmt::Result {
    sym.with_str(|s| {
        let needs_quoting = s.is_empty() || !s.chars().all(|c| c.is_alphanumeric() || c == '_');
        if needs_quoting {
            f.write_str("@\"")?;
            write_escaped_string(f, s)?;
            f.write_char('"')
        } else {
            write!(f, "@{s}")
        }
    })
}

fn write_attr_dict<'k>(
    ctx: &IrContext,
    f: &mut impl Write,
    attrs: impl Iterator<Item = (&'k Symbol, &'k Attribute)>,
) -> fmt::Result {
    // Symbols order by interning time, which varies between runs.
    let mut attrs: Vec<(String, &Attribute)> =
        attrs.map(|(key, val)| (key.to_string(), val)).collect();
    if attrs.is_empty() {
        return Ok(());
    }
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    f.write_str(" {")?;
    for (i, (key, val)) in attrs.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key} = ")?;
        write_attribute(ctx, f, val)?;
    }
    f.write_char('}')
}

// ============================================================================
// Operation printing
// ============================================================================

fn print_operation(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let data = state.ctx.op(op);
    if data.is("core", "module") {
        return print_module_op(state, f, op, indent);
    }
    if data.is("func", "func") {
        return print_func_op(state, f, op, indent);
    }
    print_generic_op(state, f, op, indent)
}

fn print_generic_op(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let indent_str = " ".repeat(indent);
    write!(f, "{indent_str}")?;

    // Results
    let results = state.ctx.op_results(op);
    if !results.is_empty() {
        for (i, &v) in results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let name = state.assign_value_name(v);
            f.write_str(&name)?;
        }
        f.write_str(" = ")?;
    }

    let data = state.ctx.op(op);
    write!(f, "{}.{}", data.dialect, data.name)?;

    // Operands
    let operands = state.ctx.op_operands(op);
    if !operands.is_empty() {
        f.write_char(' ')?;
        for (i, &v) in operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(state.get_value_name(v))?;
        }
    }

    // Successors
    if !data.successors.is_empty() {
        f.write_str(" [")?;
        for (i, &b) in data.successors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(state.get_block_label(b))?;
        }
        f.write_char(']')?;
    }

    write_attr_dict(state.ctx, f, data.attributes.iter())?;

    // Result types
    let result_types = state.ctx.op_result_types(op);
    if !result_types.is_empty() {
        f.write_str(" : ")?;
        for (i, &ty) in result_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(state.ctx, f, ty)?;
        }
    }

    // Regions
    for &region in state.ctx.op(op).regions.iter() {
        f.write_str(" {\n")?;
        print_region(state, f, region, indent + 2)?;
        write!(f, "{indent_str}}}")?;
    }

    f.write_char('\n')
}

fn write_block_args(state: &mut PrintState<'_>, f: &mut impl Write, block: BlockRef) -> fmt::Result {
    let args = state.ctx.block_args(block);
    f.write_char('(')?;
    for (j, &arg) in args.iter().enumerate() {
        if j > 0 {
            f.write_str(", ")?;
        }
        let arg_name = state.assign_value_name(arg);
        write!(f, "{arg_name}: ")?;
        write_type(state.ctx, f, state.ctx.value_ty(arg))?;
    }
    f.write_char(')')
}

/// Print the blocks of a region. Labels go at `indent`, operations two
/// columns deeper. A single block without arguments has no label and its
/// operations go at `indent`.
fn print_region(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    region: RegionRef,
    indent: usize,
) -> fmt::Result {
    let blocks: Vec<_> = state.ctx.region(region).blocks.iter().copied().collect();

    for &block in &blocks {
        state.assign_block_label(block);
    }

    let can_elide_label = blocks.len() == 1 && state.ctx.block_args(blocks[0]).is_empty();
    let op_indent = if can_elide_label { indent } else { indent + 2 };

    for (i, &block) in blocks.iter().enumerate() {
        if !can_elide_label {
            let indent_str = " ".repeat(indent);
            let label = state.get_block_label(block).to_owned();
            write!(f, "{indent_str}{label}")?;
            if !state.ctx.block_args(block).is_empty() {
                write_block_args(state, f, block)?;
            }
            f.write_str(":\n")?;
        }

        let ops: Vec<_> = state.ctx.block(block).ops.iter().copied().collect();
        for &op in &ops {
            print_operation(state, f, op, op_indent)?;
        }
        if i + 1 < blocks.len() {
            f.write_char('\n')?;
        }
    }

    Ok(())
}

// ============================================================================
// Special operation printers
// ============================================================================

fn print_module_op(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let indent_str = " ".repeat(indent);
    let data = state.ctx.op(op);
    write!(f, "{indent_str}core.module")?;

    if let Some(Attribute::Symbol(name)) = data.attributes.get(&Symbol::new("sym_name")) {
        f.write_char(' ')?;
        write_symbol(f, *name)?;
    }
    write_attr_dict(
        state.ctx,
        f,
        data.attributes
            .iter()
            .filter(|(k, _)| **k != Symbol::new("sym_name")),
    )?;

    let Some(&region) = data.regions.first() else {
        return f.write_char('\n');
    };
    f.write_str(" {\n")?;

    let blocks: Vec<_> = state.ctx.region(region).blocks.iter().copied().collect();
    for &block in &blocks {
        let ops: Vec<_> = state.ctx.block(block).ops.iter().copied().collect();
        for &child_op in &ops {
            // Functions start their own numbering; module-level values share one.
            if !IsolatedFromAboveOps::is_isolated(state.ctx, child_op) {
                print_operation(state, f, child_op, indent + 2)?;
                continue;
            }
            let saved_names = std::mem::take(&mut state.value_names);
            let saved_labels = std::mem::take(&mut state.block_labels);
            let saved = (state.next_value_num, state.next_block_num);
            state.reset_numbering();
            print_operation(state, f, child_op, indent + 2)?;
            state.value_names = saved_names;
            state.block_labels = saved_labels;
            (state.next_value_num, state.next_block_num) = saved;
        }
    }

    writeln!(f, "{indent_str}}}")
}

fn print_func_op(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let indent_str = " ".repeat(indent);
    let data = state.ctx.op(op);

    write!(f, "{indent_str}func.func")?;
    if let Some(Attribute::Symbol(name)) = data.attributes.get(&Symbol::new("sym_name")) {
        f.write_char(' ')?;
        write_symbol(f, *name)?;
    }

    let Some(&region) = data.regions.first() else {
        return f.write_char('\n');
    };
    let blocks: Vec<_> = state.ctx.region(region).blocks.iter().copied().collect();

    // Entry block args form the signature.
    match blocks.first() {
        Some(&entry) => write_block_args(state, f, entry)?,
        None => f.write_str("()")?,
    }

    // Only the return type is printed; the parameters come from the signature.
    let func_ty = data
        .attributes
        .get(&Symbol::new("type"))
        .and_then(Attribute::as_type);
    if let Some(&ret) = func_ty.and_then(|ty| state.ctx.types.get(ty).params.first()) {
        f.write_str(" -> ")?;
        write_type(state.ctx, f, ret)?;
    }

    write_attr_dict(
        state.ctx,
        f,
        data.attributes
            .iter()
            .filter(|(k, _)| **k != Symbol::new("sym_name") && **k != Symbol::new("type")),
    )?;

    f.write_str(" {\n")?;

    let labeled = blocks.len() > 1;
    if labeled {
        for &block in &blocks {
            state.assign_block_label(block);
        }
    }
    let op_indent = if labeled { indent + 4 } else { indent + 2 };

    for (i, &block) in blocks.iter().enumerate() {
        if labeled {
            let label = state.get_block_label(block).to_owned();
            write!(f, "{indent_str}  {label}")?;
            // Entry args are already in the signature.
            if i > 0 && !state.ctx.block_args(block).is_empty() {
                write_block_args(state, f, block)?;
            }
            f.write_str(":\n")?;
        }
        let ops: Vec<_> = state.ctx.block(block).ops.iter().copied().collect();
        for &child_op in &ops {
            print_operation(state, f, child_op, op_indent)?;
        }
    }

    writeln!(f, "{indent_str}}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core, func, scf};
    use crate::location::Span;
    use crate::ops::DialectOp;
    use crate::shaped::ShapedType;
    use crate::types::{Location, TypeDataBuilder};

    fn test_location(ctx: &mut IrContext) -> Location {
        let path = ctx.paths.intern("test.mlir".to_owned());
        Location::new(path, Span::new(0, 0))
    }

    #[test]
    fn print_simple_types() {
        let mut ctx = IrContext::new();
        let idx = core::index(&mut ctx);
        assert_eq!(print_type(&ctx, idx), "core.index");

        let f32_ty = core::f32(&mut ctx);
        let tensor = ShapedType::tensor(f32_ty, [4, -1]).intern(&mut ctx.types);
        assert_eq!(
            print_type(&ctx, tensor),
            "tensor.tensor(core.f32) {shape = [4, -1]}"
        );

        let marker = ctx.types.intern(
            TypeDataBuilder::new(Symbol::new("test"), Symbol::new("tagged"))
                .attr("tag", Attribute::Bool(true))
                .build(),
        );
        assert_eq!(print_type(&ctx, marker), "test.tagged() {tag = true}");
    }

    #[test]
    fn print_constant_op() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let c = arith::constant_index(&mut ctx, loc, -7);
        assert_eq!(
            print_op(&ctx, c.op_ref()),
            "%0 = arith.constant {value = -7} : core.index\n"
        );
    }

    #[test]
    fn print_function_with_loop() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = core::index(&mut ctx);
        let m = core::module(&mut ctx, loc, Symbol::new("m"));
        let f = func::func(&mut ctx, loc, Symbol::new("f"), &[idx], idx);
        ctx.push_op(m.body(&ctx), f.op_ref());
        let entry = f.entry_block(&ctx);
        let n = f.args(&ctx)[0];

        let zero = arith::constant_index(&mut ctx, loc, 0);
        let one = arith::constant_index(&mut ctx, loc, 1);
        ctx.push_op(entry, zero.op_ref());
        ctx.push_op(entry, one.op_ref());
        let (zero, one) = (zero.result(&ctx), one.result(&ctx));
        let l = scf::r#for(&mut ctx, loc, zero, n, one, &[zero]);
        ctx.push_op(entry, l.op_ref());
        let body = l.body(&ctx);
        let (iv, acc) = (l.induction_var(&ctx), l.iter_args(&ctx)[0]);
        let add = arith::addi(&mut ctx, loc, acc, iv);
        ctx.push_op(body, add.op_ref());
        let sum = ctx.op_result(add.op_ref(), 0);
        let y = scf::r#yield(&mut ctx, loc, &[sum]);
        ctx.push_op(body, y.op_ref());
        let result = l.results(&ctx)[0];
        let ret = func::r#return(&mut ctx, loc, &[result]);
        ctx.push_op(entry, ret.op_ref());

        insta::assert_snapshot!(print_module(&ctx, m.op_ref()), @r"
        core.module @m {
          func.func @f(%0: core.index) -> core.index {
            %1 = arith.constant {value = 0} : core.index
            %2 = arith.constant {value = 1} : core.index
            %3 = scf.for %1, %0, %2, %1 : core.index {
              ^bb0(%4: core.index, %5: core.index):
                %6 = arith.addi %5, %4 : core.index
                scf.yield %6
            }
            func.return %3
          }
        }
        ");
    }

    #[test]
    fn print_attribute_values() {
        let ctx = IrContext::new();
        let mut out = String::new();

        write_attribute(&ctx, &mut out, &Attribute::float(42.0)).unwrap();
        assert_eq!(out, "42.0");

        out.clear();
        write_attribute(&ctx, &mut out, &Attribute::float(f64::NEG_INFINITY)).unwrap();
        assert_eq!(out, "-inf");

        out.clear();
        write_attribute(&ctx, &mut out, &Attribute::int_list([1, -1])).unwrap();
        assert_eq!(out, "[1, -1]");

        out.clear();
        write_attribute(&ctx, &mut out, &Attribute::String("a\"b".to_owned())).unwrap();
        assert_eq!(out, r#""a\"b""#);

        out.clear();
        write_symbol(&mut out, Symbol::from_dynamic("a.b")).unwrap();
        assert_eq!(out, r#"@"a.b""#);
    }

    #[test]
    fn unlabeled_regions_align_with_their_braces() {
        let text = "core.module @m {
  func.func @f(%0: core.index, %1: core.i1) -> core.index {
    %2 = scf.if %1 : core.index {
      %3 = arith.addi %0, %0 : core.index
      scf.yield %3
    } {
      scf.yield %0
    }
    func.return %2
  }
}
";
        let mut ctx = IrContext::new();
        let m = crate::parser::parse_module(&mut ctx, text).unwrap();
        assert_eq!(print_module(&ctx, m), text);
    }
}
