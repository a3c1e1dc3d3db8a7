//! Text format parser.
//!
//! Parses the format produced by [`crate::printer`] in two stages:
//!
//! 1. **Raw parse**: winnow combinators in [`raw`] turn text into `Raw*`
//!    structures.
//! 2. **IR build**: `IrBuilder` resolves names and creates operations,
//!    blocks and regions in an [`IrContext`].

mod raw;

use std::collections::{BTreeMap, HashMap, HashSet};

use winnow::prelude::*;

pub use raw::ParseError;
use raw::{RawAttribute, RawBlock, RawOperation, RawRegion, RawType};

use crate::context::{BlockData, IrContext, OperationDataBuilder, RegionData};
use crate::dialect::core;
use crate::ir::Symbol;
use crate::location::Span;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::types::{Attribute, Location, TypeDataBuilder};

type Scopes = (HashMap<String, ValueRef>, HashMap<String, BlockRef>);

fn build_error(message: String) -> ParseError {
    ParseError { message, offset: 0 }
}

struct IrBuilder<'a> {
    ctx: &'a mut IrContext,
    location: Location,
    /// Value name (without `%`) to value.
    value_map: HashMap<String, ValueRef>,
    /// Block label (without `^`) to block.
    block_map: HashMap<String, BlockRef>,
}

impl<'a> IrBuilder<'a> {
    fn new(ctx: &'a mut IrContext) -> Self {
        let path = ctx.paths.intern("textual-ir".to_owned());
        let location = Location::new(path, Span::new(0, 0));
        Self {
            ctx,
            location,
            value_map: HashMap::new(),
            block_map: HashMap::new(),
        }
    }

    fn build_type(&mut self, raw: &RawType<'_>) -> TypeRef {
        let params: Vec<TypeRef> = raw.params.iter().map(|p| self.build_type(p)).collect();
        let mut builder =
            TypeDataBuilder::new(Symbol::from_dynamic(raw.dialect), Symbol::from_dynamic(raw.name))
                .params(params);
        for (k, v) in &raw.attrs {
            let attr = self.build_attribute(v);
            builder = builder.attr(Symbol::from_dynamic(k), attr);
        }
        self.ctx.types.intern(builder.build())
    }

    fn build_attribute(&mut self, raw: &RawAttribute<'_>) -> Attribute {
        match raw {
            RawAttribute::Bool(b) => Attribute::Bool(*b),
            RawAttribute::Int(n) => Attribute::IntBits(*n),
            RawAttribute::Float(f) => Attribute::float(*f),
            RawAttribute::String(s) => Attribute::String(s.clone()),
            RawAttribute::Symbol(s) => Attribute::Symbol(Symbol::from_dynamic(s)),
            RawAttribute::Type(t) => Attribute::Type(self.build_type(t)),
            RawAttribute::List(items) => {
                Attribute::List(items.iter().map(|a| self.build_attribute(a)).collect())
            }
            RawAttribute::Unit => Attribute::Unit,
        }
    }

    /// Build a region in its own scope. Values and blocks of enclosing
    /// regions stay visible; names defined inside do not leak out.
    ///
    /// `entry_args` (from a function signature) become the entry block's
    /// arguments.
    fn build_region(
        &mut self,
        raw: &RawRegion<'_>,
        entry_args: &[(&str, RawType<'_>)],
    ) -> Result<RegionRef, ParseError> {
        let saved: Scopes = (self.value_map.clone(), self.block_map.clone());
        let result = self.build_region_inner(raw, entry_args);
        (self.value_map, self.block_map) = saved;
        result
    }

    fn build_region_inner(
        &mut self,
        raw: &RawRegion<'_>,
        entry_args: &[(&str, RawType<'_>)],
    ) -> Result<RegionRef, ParseError> {
        // Create all blocks first so successors can refer forward.
        let mut seen_labels = HashSet::new();
        let mut blocks = Vec::with_capacity(raw.blocks.len());
        for (i, raw_block) in raw.blocks.iter().enumerate() {
            if !seen_labels.insert(raw_block.label) {
                return Err(build_error(format!(
                    "duplicate block label '^{}'",
                    raw_block.label
                )));
            }

            let args = self.block_args(i, raw_block, entry_args)?;
            let mut seen_names = HashSet::new();
            let mut arg_types = Vec::with_capacity(args.len());
            for (name, raw_ty) in args {
                if !seen_names.insert(*name) {
                    return Err(build_error(format!("duplicate block argument '%{name}'")));
                }
                arg_types.push(self.build_type(raw_ty));
            }

            let block = self
                .ctx
                .create_block(BlockData::with_args(self.location, arg_types));
            self.block_map.insert(raw_block.label.to_owned(), block);
            for (j, (name, _)) in args.iter().enumerate() {
                let value = self.ctx.block_arg(block, j as u32);
                self.value_map.insert((*name).to_owned(), value);
            }
            blocks.push(block);
        }

        for (raw_block, &block) in raw.blocks.iter().zip(&blocks) {
            for raw_op in &raw_block.ops {
                let op = self.build_operation(raw_op)?;
                self.ctx.push_op(block, op);
            }
        }

        Ok(self.ctx.create_region(RegionData {
            location: self.location,
            blocks: blocks.into_iter().collect(),
            parent_op: None,
        }))
    }

    /// Arguments of block `index`: a function signature supplies the entry
    /// block's arguments unless the block lists the same ones itself.
    fn block_args<'r, 'b>(
        &mut self,
        index: usize,
        raw_block: &'r RawBlock<'b>,
        entry_args: &'r [(&'b str, RawType<'b>)],
    ) -> Result<&'r [(&'b str, RawType<'b>)], ParseError> {
        if index != 0 || entry_args.is_empty() || raw_block.args.is_empty() {
            return Ok(if index == 0 && raw_block.args.is_empty() {
                entry_args
            } else {
                &raw_block.args
            });
        }
        if raw_block.args.len() != entry_args.len() {
            return Err(build_error(format!(
                "entry block has {} args but function signature has {} params",
                raw_block.args.len(),
                entry_args.len()
            )));
        }
        for (j, ((_, block_ty), (_, param_ty))) in raw_block.args.iter().zip(entry_args).enumerate()
        {
            if self.build_type(block_ty) != self.build_type(param_ty) {
                return Err(build_error(format!(
                    "entry block arg {j} type differs from function param"
                )));
            }
        }
        Ok(&raw_block.args)
    }

    fn build_operation(&mut self, raw: &RawOperation<'_>) -> Result<OpRef, ParseError> {
        let operands: Vec<ValueRef> = raw
            .operands
            .iter()
            .map(|name| {
                self.value_map.get(*name).copied().ok_or_else(|| {
                    build_error(format!(
                        "undefined value '%{name}' in operation '{}.{}'",
                        raw.dialect, raw.op_name
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        let result_types: Vec<TypeRef> =
            raw.result_types.iter().map(|t| self.build_type(t)).collect();
        if !raw.results.is_empty() && raw.results.len() != result_types.len() {
            return Err(build_error(format!(
                "operation '{}.{}' declares {} result names but {} result types",
                raw.dialect,
                raw.op_name,
                raw.results.len(),
                result_types.len()
            )));
        }

        let mut attributes = BTreeMap::new();
        for (k, v) in &raw.attributes {
            let attr = self.build_attribute(v);
            attributes.insert(Symbol::from_dynamic(k), attr);
        }
        if let Some(name) = &raw.sym_name {
            attributes.insert(
                Symbol::new("sym_name"),
                Attribute::Symbol(Symbol::from_dynamic(name)),
            );
        }

        // A function-style signature becomes a `core.func(ret, params...)` type.
        if raw.return_type.is_some() || !raw.func_params.is_empty() {
            let ret = match &raw.return_type {
                Some(t) => self.build_type(t),
                None => core::nil(self.ctx),
            };
            let params: Vec<TypeRef> = raw
                .func_params
                .iter()
                .map(|(_, t)| self.build_type(t))
                .collect();
            let func_ty = core::func_type(self.ctx, ret, &params);
            attributes.insert(Symbol::new("type"), Attribute::Type(func_ty));
        }

        let successors: Vec<BlockRef> = raw
            .successors
            .iter()
            .map(|label| {
                self.block_map.get(*label).copied().ok_or_else(|| {
                    build_error(format!(
                        "undefined block '^{label}' in successors of '{}.{}'",
                        raw.dialect, raw.op_name
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        let mut regions = Vec::with_capacity(raw.regions.len());
        for (i, r) in raw.regions.iter().enumerate() {
            let entry_args = if i == 0 { &raw.func_params[..] } else { &[] };
            regions.push(self.build_region(r, entry_args)?);
        }

        let mut builder = OperationDataBuilder::new(
            self.location,
            Symbol::from_dynamic(raw.dialect),
            Symbol::from_dynamic(raw.op_name),
        )
        .operands(operands)
        .results(result_types)
        .attrs(attributes);
        for r in regions {
            builder = builder.region(r);
        }
        for b in successors {
            builder = builder.successor(b);
        }
        let op = builder.create(self.ctx);

        for (i, name) in raw.results.iter().enumerate() {
            if self.value_map.contains_key(*name) {
                return Err(build_error(format!(
                    "duplicate SSA name '%{name}' in operation '{}.{}'",
                    raw.dialect, raw.op_name
                )));
            }
            let value = self.ctx.op_result(op, i as u32);
            self.value_map.insert((*name).to_owned(), value);
        }

        Ok(op)
    }
}

/// Parse one top-level operation (normally a `core.module`) from text.
pub fn parse_module(ctx: &mut IrContext, input: &str) -> Result<OpRef, ParseError> {
    let mut remaining = input;
    let offset = |remaining: &str| input.len() - remaining.len();

    let raw_op = raw::raw_operation
        .parse_next(&mut remaining)
        .map_err(|e| ParseError {
            message: format!("syntax error: {e}"),
            offset: offset(remaining),
        })?;

    raw::ws.parse_next(&mut remaining).map_err(|e| ParseError {
        message: format!("lexer error: {e}"),
        offset: offset(remaining),
    })?;
    if !remaining.is_empty() {
        return Err(ParseError {
            message: "trailing input after top-level operation".to_owned(),
            offset: offset(remaining),
        });
    }

    tracing::trace!(
        dialect = raw_op.dialect,
        op = raw_op.op_name,
        "parsed top-level operation"
    );
    IrBuilder::new(ctx).build_operation(&raw_op)
}

/// Parse a module, panicking with the input on failure. Meant for tests.
pub fn parse_test_module(ctx: &mut IrContext, input: &str) -> core::Module {
    let op = parse_module(ctx, input).unwrap_or_else(|e| {
        panic!(
            "failed to parse test IR at offset {}:\n  {}\n\nInput:\n{input}",
            e.offset, e.message
        )
    });
    core::Module::from_op(ctx, op)
        .unwrap_or_else(|e| panic!("parsed operation is not a module: {e}\n\nInput:\n{input}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_module;
    use proptest::prelude::*;

    fn assert_roundtrip(text: &str) {
        let mut ctx = IrContext::new();
        let op = parse_module(&mut ctx, text).unwrap_or_else(|e| panic!("{e}\n{text}"));
        assert_eq!(print_module(&ctx, op), text);
    }

    #[test]
    fn roundtrip_function_with_loop() {
        assert_roundtrip(
            "core.module @m {
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
",
        );
    }

    #[test]
    fn roundtrip_shaped_types_and_empty_regions() {
        assert_roundtrip(
            "core.module @m {
  func.func @g(%0: tensor.tensor(core.f32) {shape = [8, 4]}) -> tensor.tensor(core.f32) {shape = [8, 4]} {
    %1 = scf.forall %0 {upper_bound = [2]} : tensor.tensor(core.f32) {shape = [8, 4]} {
      ^bb0(%2: core.index, %3: tensor.tensor(core.f32) {shape = [8, 4]}):
        scf.in_parallel {
        }
    }
    func.return %1
  }
}
",
        );
    }

    #[test]
    fn roundtrip_multi_block_function() {
        assert_roundtrip(
            "core.module @m {
  func.func @h(%0: core.i1) -> core.nil {
    ^bb0:
      test.cond_br %0 [^bb1, ^bb2]
    ^bb1:
      func.return
    ^bb2:
      func.return
  }
}
",
        );
    }

    #[test]
    fn func_signature_becomes_type() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {\n  func.func @f(%0: core.index) -> core.i1 {\n  }\n}\n",
        );
        let f = ctx.block(m.body(&ctx)).ops[0];
        let ty = ctx.op(f).attr("type").and_then(Attribute::as_type).unwrap();
        let (i1, index) = (core::i1(&mut ctx), core::index(&mut ctx));
        assert_eq!(ty, core::func_type(&mut ctx, i1, &[index]));
        assert_eq!(m.name(&ctx), Some(Symbol::new("m")));
    }

    #[test]
    fn outer_values_visible_in_nested_regions() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: core.i1) -> core.index {
    %2 = scf.if %1 : core.index {
      scf.yield %0
    } {
      scf.yield %0
    }
    func.return %2
  }
}
",
        );
        assert!(crate::validation::validate(&ctx, m.op_ref()).is_ok());
    }

    #[test]
    fn errors() {
        let cases = [
            ("core.module @m {\n  test.use %9\n}\n", "undefined value '%9'"),
            (
                "core.module @m {\n  %0 = test.a : core.index\n  %0 = test.b : core.index\n}\n",
                "duplicate SSA name '%0'",
            ),
            ("core.module @m {\n}\ntrailing", "trailing input"),
            ("%0, %1 = test.pair : core.index", "2 result names but 1 result types"),
        ];
        for (text, fragment) in cases {
            let mut ctx = IrContext::new();
            let err = parse_module(&mut ctx, text).unwrap_err();
            assert!(err.message.contains(fragment), "{err} for {text:?}");
        }
    }

    #[test]
    fn values_do_not_leak_out_of_regions() {
        let mut ctx = IrContext::new();
        let err = parse_module(
            &mut ctx,
            "test.outer {\n  test.wrap {\n    %0 = test.a : core.index\n  }\n  test.use %0\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("undefined value '%0'"));
    }

    proptest! {
        #[test]
        fn parser_never_panics(text in "\\PC{0,64}") {
            let mut ctx = IrContext::new();
            let _ = parse_module(&mut ctx, &text);
        }

        #[test]
        fn parser_never_panics_on_ir_like_text(
            text in "[%@^{}()\\[\\],:=>. a-z0-9\n-]{0,80}"
        ) {
            let mut ctx = IrContext::new();
            let _ = parse_module(&mut ctx, &text);
        }
    }
}
