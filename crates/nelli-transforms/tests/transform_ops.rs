//! Transform ops driven through the `TransformOp` interface, the way a
//! pipeline applies them.

use nelli_ir::dialect::{func, scf};
use nelli_ir::parser::parse_module;
use nelli_ir::printer::print_module;
use nelli_ir::validation::validate;
use nelli_ir::walk::collect_typed_inclusive;
use nelli_ir::{DialectOp, IrContext, OpRef};
use nelli_transforms::{
    ApplyPatterns, ApplyPatternsOptions, HoistStaticAlloc, PatternGroup, TransformEffect,
    TransformOp,
};

const LOOP_WITH_ALLOC: &str = "core.module @m {
  func.func @f(%0: core.index, %1: core.f32) -> core.nil {
    %2 = arith.constant {value = 0} : core.index
    %3 = arith.constant {value = 4} : core.index
    %4 = arith.constant {value = 1} : core.index
    scf.for %2, %3, %4 {
      ^bb0(%5: core.index):
        %6 = memref.alloc : memref.memref(core.f32) {shape = [16]}
        %7 = arith.addi %5, %2 : core.index
        memref.store %1, %6, %7
        memref.dealloc %6
        scf.yield
    }
    func.return
  }
}
";

fn parse(text: &str) -> (IrContext, OpRef) {
    let mut ctx = IrContext::new();
    let module = parse_module(&mut ctx, text).unwrap();
    (ctx, module)
}

fn only_func(ctx: &IrContext, module: OpRef) -> OpRef {
    let funcs = collect_typed_inclusive::<func::Func>(ctx, module);
    assert_eq!(funcs.len(), 1);
    funcs[0].op_ref()
}

fn everything() -> ApplyPatterns {
    let mut options = ApplyPatternsOptions {
        licm: true,
        ..Default::default()
    };
    for group in PatternGroup::ALL {
        options.enable(group);
    }
    ApplyPatterns { options }
}

#[test]
fn transforms_chain_on_one_function() {
    let (mut ctx, module) = parse(LOOP_WITH_ALLOC);
    let f = only_func(&ctx, module);

    let handle = everything().apply(&mut ctx, f).unwrap();
    assert_eq!(handle, f);
    let handle = HoistStaticAlloc.apply(&mut ctx, handle).unwrap();
    assert_eq!(handle, f);
    assert!(validate(&ctx, module).is_ok());

    insta::assert_snapshot!(print_module(&ctx, module), @r"
    core.module @m {
      func.func @f(%0: core.index, %1: core.f32) -> core.nil {
        %2 = memref.alloc : memref.memref(core.f32) {shape = [16]}
        %3 = arith.constant {value = 0} : core.index
        %4 = arith.constant {value = 4} : core.index
        %5 = arith.constant {value = 1} : core.index
        scf.for %3, %4, %5 {
          ^bb0(%6: core.index):
            memref.store %1, %2, %6
            scf.yield
        }
        memref.dealloc %2
        func.return
      }
    }
    ");
}

#[test]
fn converged_output_is_stable() {
    let (mut ctx, module) = parse(LOOP_WITH_ALLOC);
    let f = only_func(&ctx, module);
    let op = everything();
    op.apply(&mut ctx, f).unwrap();
    let first = print_module(&ctx, module);
    op.apply(&mut ctx, f).unwrap();
    assert_eq!(print_module(&ctx, module), first);
}

#[test]
fn loop_target_is_rejected_untouched() {
    let (mut ctx, module) = parse(LOOP_WITH_ALLOC);
    let for_op = collect_typed_inclusive::<scf::For>(&ctx, module)[0].op_ref();
    let before = print_module(&ctx, module);

    let err = everything().apply(&mut ctx, for_op).unwrap_err();
    assert!(err.is_definite());
    assert_eq!(print_module(&ctx, module), before);
}

#[test]
fn apply_patterns_only_reads_its_handle() {
    let effects = everything().effects();
    assert!(effects.contains(&TransformEffect::OnlyReadsHandle));
    assert!(effects.contains(&TransformEffect::ModifiesPayload));
    assert!(!effects.contains(&TransformEffect::ConsumesHandle));
}
