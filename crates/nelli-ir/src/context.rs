//! IrContext: arena-based mutable IR storage.
//!
//! All IR entities (operations, values, blocks, regions) are stored in
//! `PrimaryMap`s owned by `IrContext`. Operand and result lists use
//! `EntityList + ListPool` for compact 4-byte per-field storage.

use std::collections::{BTreeMap, HashMap};

use cranelift_entity::{EntityList, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::ir::Symbol;
use crate::refs::*;
use crate::types::*;

// ============================================================================
// Use-chain
// ============================================================================

/// A single use of a value: which operation uses it, at which operand index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: OpRef,
    pub operand_index: u32,
}

// ============================================================================
// Entity data types
// ============================================================================

/// Data for a single operation in the arena.
pub struct OperationData {
    pub location: Location,
    pub dialect: Symbol,
    pub name: Symbol,
    pub operands: EntityList<ValueRef>,
    pub results: EntityList<TypeRef>,
    pub attributes: BTreeMap<Symbol, Attribute>,
    pub regions: SmallVec<[RegionRef; 4]>,
    pub successors: SmallVec<[BlockRef; 4]>,
    pub parent_block: Option<BlockRef>,
}

impl OperationData {
    /// Create a new OperationData with the given basic fields.
    /// Operands and results must be added via the pool-backed EntityList.
    pub fn new(location: Location, dialect: Symbol, name: Symbol) -> Self {
        Self {
            location,
            dialect,
            name,
            operands: EntityList::new(),
            results: EntityList::new(),
            attributes: BTreeMap::new(),
            regions: SmallVec::new(),
            successors: SmallVec::new(),
            parent_block: None,
        }
    }

    /// Whether this is `dialect.name`.
    pub fn is(&self, dialect: &'static str, name: &'static str) -> bool {
        self.dialect == Symbol::new(dialect) && self.name == Symbol::new(name)
    }

    /// Whether this operation belongs to `dialect`.
    pub fn in_dialect(&self, dialect: &'static str) -> bool {
        self.dialect == Symbol::new(dialect)
    }

    pub fn attr(&self, key: &'static str) -> Option<&Attribute> {
        self.attributes.get(&Symbol::new(key))
    }

    /// `dialect.name` as an owned string, for diagnostics.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.dialect, self.name)
    }
}

/// Data for a single SSA value.
pub struct ValueData {
    pub def: ValueDef,
    pub ty: TypeRef,
}

/// Data for a block argument (type + optional attributes).
#[derive(Clone, Debug)]
pub struct BlockArgData {
    pub ty: TypeRef,
    pub attrs: BTreeMap<Symbol, Attribute>,
}

impl BlockArgData {
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            attrs: BTreeMap::new(),
        }
    }
}

/// Data for a basic block.
pub struct BlockData {
    pub location: Location,
    pub args: Vec<BlockArgData>,
    pub ops: SmallVec<[OpRef; 4]>,
    pub parent_region: Option<RegionRef>,
}

impl BlockData {
    /// An empty, detached block with the given argument types.
    pub fn with_args(location: Location, arg_types: impl IntoIterator<Item = TypeRef>) -> Self {
        Self {
            location,
            args: arg_types.into_iter().map(BlockArgData::new).collect(),
            ops: SmallVec::new(),
            parent_region: None,
        }
    }
}

/// Data for a region (list of blocks).
pub struct RegionData {
    pub location: Location,
    pub blocks: SmallVec<[BlockRef; 4]>,
    pub parent_op: Option<OpRef>,
}

/// Value and block substitutions used while cloning IR.
#[derive(Debug, Default, Clone)]
pub struct IrMapping {
    values: HashMap<ValueRef, ValueRef>,
    blocks: HashMap<BlockRef, BlockRef>,
}

impl IrMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_value(&mut self, from: ValueRef, to: ValueRef) {
        self.values.insert(from, to);
    }

    pub fn map_block(&mut self, from: BlockRef, to: BlockRef) {
        self.blocks.insert(from, to);
    }

    /// Mapped value, or `v` itself when unmapped.
    pub fn lookup_value(&self, v: ValueRef) -> ValueRef {
        self.values.get(&v).copied().unwrap_or(v)
    }

    pub fn lookup_block(&self, b: BlockRef) -> BlockRef {
        self.blocks.get(&b).copied().unwrap_or(b)
    }

    pub fn contains_value(&self, v: ValueRef) -> bool {
        self.values.contains_key(&v)
    }
}

// ============================================================================
// IrContext
// ============================================================================

/// Arena-based mutable IR context.
///
/// Owns all IR entities and provides methods for creating, querying,
/// and mutating them. Use-chains are automatically maintained.
pub struct IrContext {
    ops: PrimaryMap<OpRef, OperationData>,
    values: PrimaryMap<ValueRef, ValueData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    regions: PrimaryMap<RegionRef, RegionData>,

    /// Use-chain: for each value, the list of operations that use it.
    uses: SecondaryMap<ValueRef, SmallVec<[Use; 2]>>,

    pub types: TypeInterner,
    pub paths: PathInterner,

    /// Backing pools for EntityList storage.
    value_pool: ListPool<ValueRef>,
    type_pool: ListPool<TypeRef>,

    result_values: SecondaryMap<OpRef, EntityList<ValueRef>>,
    block_arg_values: SecondaryMap<BlockRef, EntityList<ValueRef>>,
}

impl IrContext {
    pub fn new() -> Self {
        Self {
            ops: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            types: TypeInterner::new(),
            paths: PathInterner::new(),
            value_pool: ListPool::new(),
            type_pool: ListPool::new(),
            result_values: SecondaryMap::new(),
            block_arg_values: SecondaryMap::new(),
        }
    }

    // ========================================================================
    // Operation
    // ========================================================================

    /// Create a new operation and allocate result values for it.
    ///
    /// The operation's operands are registered in the use-chain.
    /// The operation must not have a `parent_block` set; use `push_op` to
    /// attach it to a block after creation.
    ///
    /// # Panics
    ///
    /// Panics if `data.parent_block` is `Some`, or if any region in
    /// `data.regions` already belongs to another operation.
    pub fn create_op(&mut self, data: OperationData) -> OpRef {
        assert!(
            data.parent_block.is_none(),
            "create_op: operation must not have parent_block set; \
             use push_op to attach to a block after creation",
        );

        let operand_slice: SmallVec<[ValueRef; 8]> =
            data.operands.as_slice(&self.value_pool).into();
        let result_types: SmallVec<[TypeRef; 4]> = data.results.as_slice(&self.type_pool).into();
        let regions: SmallVec<[RegionRef; 4]> = data.regions.clone();

        let op = self.ops.push(data);

        for &r in &regions {
            if let Some(existing) = self.regions[r].parent_op {
                panic!(
                    "create_op: region {r} already belongs to operation {existing}; \
                     cannot reassign to {op}",
                );
            }
            self.regions[r].parent_op = Some(op);
        }

        for (idx, &val) in operand_slice.iter().enumerate() {
            self.uses[val].push(Use {
                user: op,
                operand_index: idx as u32,
            });
        }

        let mut result_value_list = EntityList::new();
        for (idx, &ty) in result_types.iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::OpResult(op, idx as u32),
                ty,
            });
            result_value_list.push(v, &mut self.value_pool);
        }
        self.result_values[op] = result_value_list;

        op
    }

    pub fn op(&self, op: OpRef) -> &OperationData {
        &self.ops[op]
    }

    /// Get mutable reference to operation data.
    ///
    /// **Warning**: Modifying operands directly will desync the use-chain.
    /// Use `set_operand`/`set_operands` instead.
    pub fn op_mut(&mut self, op: OpRef) -> &mut OperationData {
        &mut self.ops[op]
    }

    pub fn op_operands(&self, op: OpRef) -> &[ValueRef] {
        self.ops[op].operands.as_slice(&self.value_pool)
    }

    pub fn op_result_types(&self, op: OpRef) -> &[TypeRef] {
        self.ops[op].results.as_slice(&self.type_pool)
    }

    pub fn op_result(&self, op: OpRef, index: u32) -> ValueRef {
        self.result_values[op].as_slice(&self.value_pool)[index as usize]
    }

    pub fn op_results(&self, op: OpRef) -> &[ValueRef] {
        self.result_values[op].as_slice(&self.value_pool)
    }

    /// Replace a single operand, keeping the use-chain in sync.
    pub fn set_operand(&mut self, op: OpRef, index: u32, new: ValueRef) {
        let slice = self.ops[op].operands.as_mut_slice(&mut self.value_pool);
        let old = slice[index as usize];
        if old == new {
            return;
        }
        slice[index as usize] = new;
        self.uses[old].retain(|u| !(u.user == op && u.operand_index == index));
        self.uses[new].push(Use {
            user: op,
            operand_index: index,
        });
    }

    /// Replace the whole operand list of an operation.
    pub fn set_operands(&mut self, op: OpRef, operands: &[ValueRef]) {
        self.drop_operand_uses(op);
        let list = &mut self.ops[op].operands;
        list.clear(&mut self.value_pool);
        for &v in operands {
            list.push(v, &mut self.value_pool);
        }
        for (idx, &v) in operands.iter().enumerate() {
            self.uses[v].push(Use {
                user: op,
                operand_index: idx as u32,
            });
        }
    }

    fn drop_operand_uses(&mut self, op: OpRef) {
        let operands: SmallVec<[ValueRef; 8]> =
            self.ops[op].operands.as_slice(&self.value_pool).into();
        for (idx, &val) in operands.iter().enumerate() {
            self.uses[val].retain(|u| !(u.user == op && u.operand_index == idx as u32));
        }
    }

    /// Remove an operation, clearing its use-chain entries.
    ///
    /// Does NOT remove it from its parent block and does not look into its
    /// regions. Most callers want [`IrContext::erase_op`].
    ///
    /// # Panics
    ///
    /// Panics if the operation is still attached to a block or if any result
    /// value of the operation still has uses.
    pub fn remove_op(&mut self, op: OpRef) {
        if let Some(block) = self.ops[op].parent_block {
            panic!(
                "remove_op: operation {op} is still attached to block {block}; \
                 call remove_op_from_block first",
            );
        }

        let results: SmallVec<[ValueRef; 4]> =
            self.result_values[op].as_slice(&self.value_pool).into();
        for &val in &results {
            assert!(
                self.uses[val].is_empty(),
                "remove_op: result value {val} still has {} use(s); \
                 replace all uses before removing the operation",
                self.uses[val].len()
            );
        }

        self.drop_operand_uses(op);
    }

    /// Detach an operation from its block and drop every use held by it and
    /// by the operations nested in its regions.
    ///
    /// # Panics
    ///
    /// Panics if a result of `op` is still used.
    pub fn erase_op(&mut self, op: OpRef) {
        if let Some(block) = self.ops[op].parent_block {
            self.remove_op_from_block(block, op);
        }
        let regions: SmallVec<[RegionRef; 4]> = self.ops[op].regions.clone();
        for region in regions {
            self.drop_region_uses(region);
        }
        self.remove_op(op);
    }

    fn drop_region_uses(&mut self, region: RegionRef) {
        let blocks: SmallVec<[BlockRef; 4]> = self.regions[region].blocks.clone();
        for block in blocks {
            let ops: SmallVec<[OpRef; 4]> = self.blocks[block].ops.clone();
            for op in ops {
                self.drop_operand_uses(op);
                let nested: SmallVec<[RegionRef; 4]> = self.ops[op].regions.clone();
                for r in nested {
                    self.drop_region_uses(r);
                }
            }
        }
    }

    /// Deep-copy an operation (including its regions). Operands are remapped
    /// through `mapping`; the clone's results are recorded in it.
    ///
    /// The clone is detached.
    pub fn clone_op(&mut self, op: OpRef, mapping: &mut IrMapping) -> OpRef {
        let data = &self.ops[op];
        let location = data.location;
        let dialect = data.dialect;
        let name = data.name;
        let attributes = data.attributes.clone();
        let regions: SmallVec<[RegionRef; 4]> = data.regions.clone();
        let successors: SmallVec<[BlockRef; 4]> = data.successors.clone();
        let operands: SmallVec<[ValueRef; 8]> = self
            .op_operands(op)
            .iter()
            .map(|&v| mapping.lookup_value(v))
            .collect();
        let result_types: SmallVec<[TypeRef; 4]> = self.op_result_types(op).into();

        let new_regions: SmallVec<[RegionRef; 4]> = regions
            .iter()
            .map(|&r| self.clone_region(r, mapping))
            .collect();

        let mut builder = OperationDataBuilder::new(location, dialect, name)
            .operands(operands)
            .results(result_types)
            .attrs(attributes);
        for r in new_regions {
            builder = builder.region(r);
        }
        for b in successors {
            builder = builder.successor(mapping.lookup_block(b));
        }
        let data = builder.build(self);
        let new_op = self.create_op(data);

        let old_results: SmallVec<[ValueRef; 4]> = self.op_results(op).into();
        for (i, old) in old_results.into_iter().enumerate() {
            let new = self.op_result(new_op, i as u32);
            mapping.map_value(old, new);
        }
        new_op
    }

    /// Deep-copy a region into a new detached region.
    pub fn clone_region(&mut self, region: RegionRef, mapping: &mut IrMapping) -> RegionRef {
        let location = self.regions[region].location;
        let blocks: SmallVec<[BlockRef; 4]> = self.regions[region].blocks.clone();

        // Blocks first so successors and block args resolve in any order.
        let mut new_blocks: SmallVec<[BlockRef; 4]> = SmallVec::new();
        for &block in &blocks {
            let data = &self.blocks[block];
            let new_block = self.create_block(BlockData {
                location: data.location,
                args: data.args.clone(),
                ops: SmallVec::new(),
                parent_region: None,
            });
            mapping.map_block(block, new_block);
            let old_args: SmallVec<[ValueRef; 4]> = self.block_args(block).into();
            for (i, old) in old_args.into_iter().enumerate() {
                let new = self.block_arg(new_block, i as u32);
                mapping.map_value(old, new);
            }
            new_blocks.push(new_block);
        }

        for (&block, &new_block) in blocks.iter().zip(new_blocks.iter()) {
            let ops: SmallVec<[OpRef; 4]> = self.blocks[block].ops.clone();
            for op in ops {
                let cloned = self.clone_op(op, mapping);
                self.push_op(new_block, cloned);
            }
        }

        self.create_region(RegionData {
            location,
            blocks: new_blocks,
            parent_op: None,
        })
    }

    // ========================================================================
    // Value
    // ========================================================================

    pub fn value(&self, v: ValueRef) -> &ValueData {
        &self.values[v]
    }

    pub fn value_ty(&self, v: ValueRef) -> TypeRef {
        self.values[v].ty
    }

    pub fn value_def(&self, v: ValueRef) -> ValueDef {
        self.values[v].def
    }

    /// The operation defining `v`, or `None` for block arguments.
    pub fn defining_op(&self, v: ValueRef) -> Option<OpRef> {
        self.values[v].def.op()
    }

    /// The block in which `v` becomes available.
    pub fn value_block(&self, v: ValueRef) -> Option<BlockRef> {
        match self.values[v].def {
            ValueDef::OpResult(op, _) => self.ops[op].parent_block,
            ValueDef::BlockArg(block, _) => Some(block),
        }
    }

    // ========================================================================
    // Block
    // ========================================================================

    /// Create a new block and allocate argument values for it.
    pub fn create_block(&mut self, data: BlockData) -> BlockRef {
        let arg_types: Vec<TypeRef> = data.args.iter().map(|a| a.ty).collect();
        let block = self.blocks.push(data);

        let mut arg_value_list = EntityList::new();
        for (idx, ty) in arg_types.into_iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::BlockArg(block, idx as u32),
                ty,
            });
            arg_value_list.push(v, &mut self.value_pool);
        }
        self.block_arg_values[block] = arg_value_list;

        block
    }

    pub fn block(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    pub fn block_mut(&mut self, b: BlockRef) -> &mut BlockData {
        &mut self.blocks[b]
    }

    pub fn block_arg(&self, b: BlockRef, index: u32) -> ValueRef {
        self.block_arg_values[b].as_slice(&self.value_pool)[index as usize]
    }

    pub fn block_args(&self, b: BlockRef) -> &[ValueRef] {
        self.block_arg_values[b].as_slice(&self.value_pool)
    }

    /// Last operation of a block, which by convention is its terminator.
    pub fn block_terminator(&self, b: BlockRef) -> Option<OpRef> {
        self.blocks[b].ops.last().copied()
    }

    /// Append an operation to the end of a block.
    ///
    /// # Panics
    ///
    /// Panics if the operation already belongs to a block.
    pub fn push_op(&mut self, block: BlockRef, op: OpRef) {
        if let Some(old) = self.ops[op].parent_block {
            panic!(
                "push_op: operation {op} already belongs to block {old}; \
                 remove it from the old block first",
            );
        }
        self.ops[op].parent_block = Some(block);
        self.blocks[block].ops.push(op);
    }

    /// Insert an operation at the start of a block.
    pub fn push_op_front(&mut self, block: BlockRef, op: OpRef) {
        if let Some(old) = self.ops[op].parent_block {
            panic!(
                "push_op_front: operation {op} already belongs to block {old}; \
                 remove it from the old block first",
            );
        }
        self.ops[op].parent_block = Some(block);
        self.blocks[block].ops.insert(0, op);
    }

    /// Insert an operation before `before` in the given block.
    ///
    /// # Panics
    ///
    /// Panics if the operation already belongs to a block, or if `before`
    /// is not found in the block.
    pub fn insert_op_before(&mut self, block: BlockRef, before: OpRef, op: OpRef) {
        if let Some(old) = self.ops[op].parent_block {
            panic!(
                "insert_op_before: operation {op} already belongs to block {old}; \
                 remove it from the old block first",
            );
        }
        let ops = &mut self.blocks[block].ops;
        let Some(pos) = ops.iter().position(|&o| o == before) else {
            panic!("insert_op_before: {before} not found in {block}");
        };
        ops.insert(pos, op);
        self.ops[op].parent_block = Some(block);
    }

    /// Detach `op` from wherever it is and insert it right before `before`.
    pub fn move_op_before(&mut self, op: OpRef, before: OpRef) {
        if let Some(block) = self.ops[op].parent_block {
            self.remove_op_from_block(block, op);
        }
        let Some(target) = self.ops[before].parent_block else {
            panic!("move_op_before: {before} is not attached to a block");
        };
        self.insert_op_before(target, before, op);
    }

    /// Remove an operation from a block (does not destroy the operation).
    ///
    /// Only clears the operation's `parent_block` if it matches the given block.
    pub fn remove_op_from_block(&mut self, block: BlockRef, op: OpRef) {
        self.blocks[block].ops.retain(|o| *o != op);
        if self.ops[op].parent_block == Some(block) {
            self.ops[op].parent_block = None;
        }
    }

    // ========================================================================
    // Region
    // ========================================================================

    /// Create a new region.
    ///
    /// # Panics
    ///
    /// Panics if any block in `data.blocks` already belongs to another region.
    pub fn create_region(&mut self, data: RegionData) -> RegionRef {
        let region = self.regions.push(data);

        let blocks: SmallVec<[BlockRef; 4]> = self.regions[region].blocks.clone();
        for &b in &blocks {
            if let Some(existing) = self.blocks[b].parent_region {
                panic!(
                    "create_region: block {b} already belongs to region {existing}; \
                     cannot reassign to {region}",
                );
            }
            self.blocks[b].parent_region = Some(region);
        }

        region
    }

    /// Create a region holding a single fresh block with the given argument types.
    pub fn create_single_block_region(
        &mut self,
        location: Location,
        arg_types: impl IntoIterator<Item = TypeRef>,
    ) -> (RegionRef, BlockRef) {
        let block = self.create_block(BlockData::with_args(location, arg_types));
        let region = self.create_region(RegionData {
            location,
            blocks: smallvec::smallvec![block],
            parent_op: None,
        });
        (region, block)
    }

    pub fn region(&self, r: RegionRef) -> &RegionData {
        &self.regions[r]
    }

    pub fn region_mut(&mut self, r: RegionRef) -> &mut RegionData {
        &mut self.regions[r]
    }

    /// Detach every region from `op` so they can be given to a new operation.
    pub fn take_regions(&mut self, op: OpRef) -> SmallVec<[RegionRef; 4]> {
        let regions = std::mem::take(&mut self.ops[op].regions);
        for &r in &regions {
            self.regions[r].parent_op = None;
        }
        regions
    }

    /// Move the operations of `block`, except its terminator, right before
    /// `before`, replacing uses of the block arguments with `args`.
    ///
    /// Returns the terminator, which stays in `block`.
    pub fn inline_block_before(
        &mut self,
        block: BlockRef,
        before: OpRef,
        args: &[ValueRef],
    ) -> Option<OpRef> {
        let block_args: SmallVec<[ValueRef; 4]> = self.block_args(block).into();
        assert_eq!(
            block_args.len(),
            args.len(),
            "inline_block_before: argument count mismatch"
        );
        for (&from, &to) in block_args.iter().zip(args) {
            self.replace_all_uses(from, to);
        }
        let terminator = self.block_terminator(block);
        let ops: SmallVec<[OpRef; 4]> = self.blocks[block].ops.clone();
        for op in ops {
            if Some(op) != terminator {
                self.move_op_before(op, before);
            }
        }
        terminator
    }

    // ========================================================================
    // Ancestry
    // ========================================================================

    /// The operation owning the region that contains `block`.
    pub fn block_parent_op(&self, block: BlockRef) -> Option<OpRef> {
        let region = self.blocks[block].parent_region?;
        self.regions[region].parent_op
    }

    /// The operation whose region contains `op`.
    pub fn parent_op(&self, op: OpRef) -> Option<OpRef> {
        let block = self.ops[op].parent_block?;
        self.block_parent_op(block)
    }

    /// Whether `ancestor` strictly encloses `op`.
    pub fn is_proper_ancestor(&self, ancestor: OpRef, op: OpRef) -> bool {
        let mut current = self.parent_op(op);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent_op(p);
        }
        false
    }

    /// Whether `block` lives (transitively) inside `op`'s regions.
    pub fn is_block_inside(&self, block: BlockRef, op: OpRef) -> bool {
        match self.block_parent_op(block) {
            Some(p) => p == op || self.is_proper_ancestor(op, p),
            None => false,
        }
    }

    /// Whether `v` is defined inside one of `op`'s regions.
    pub fn is_defined_inside(&self, v: ValueRef, op: OpRef) -> bool {
        match self.value_block(v) {
            Some(block) => self.is_block_inside(block, op),
            None => false,
        }
    }

    // ========================================================================
    // Use-chain
    // ========================================================================

    pub fn uses(&self, v: ValueRef) -> &[Use] {
        &self.uses[v]
    }

    pub fn has_uses(&self, v: ValueRef) -> bool {
        !self.uses[v].is_empty()
    }

    /// Distinct operations using `v`, in use-chain order.
    pub fn users(&self, v: ValueRef) -> SmallVec<[OpRef; 4]> {
        let mut users: SmallVec<[OpRef; 4]> = SmallVec::new();
        for u in &self.uses[v] {
            if !users.contains(&u.user) {
                users.push(u.user);
            }
        }
        users
    }

    /// Whether any result of `op` is used.
    pub fn op_has_uses(&self, op: OpRef) -> bool {
        self.op_results(op).iter().any(|&v| self.has_uses(v))
    }

    // ========================================================================
    // RAUW (Replace All Uses With)
    // ========================================================================

    /// Replace all uses of `old` with `new` in all operations.
    pub fn replace_all_uses(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        let old_uses = std::mem::take(&mut self.uses[old]);

        for u in &old_uses {
            let slice = self.ops[u.user].operands.as_mut_slice(&mut self.value_pool);
            debug_assert_eq!(slice[u.operand_index as usize], old);
            slice[u.operand_index as usize] = new;
            self.uses[new].push(*u);
        }
    }

    /// Replace the uses of `old` with `new` for which `pred` holds.
    pub fn replace_uses_if(
        &mut self,
        old: ValueRef,
        new: ValueRef,
        mut pred: impl FnMut(&IrContext, Use) -> bool,
    ) {
        let candidates: SmallVec<[Use; 4]> = self.uses[old].iter().copied().collect();
        for u in candidates {
            if pred(self, u) {
                self.set_operand(u.user, u.operand_index, new);
            }
        }
    }
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OperationDataBuilder
// ============================================================================

/// Builder for constructing `OperationData` with pool-backed lists.
///
/// Collects operands and result types into `Vec`s, then packs them
/// into `EntityList`s on `build()`.
pub struct OperationDataBuilder {
    location: Location,
    dialect: Symbol,
    name: Symbol,
    operands: Vec<ValueRef>,
    results: Vec<TypeRef>,
    attributes: BTreeMap<Symbol, Attribute>,
    regions: SmallVec<[RegionRef; 4]>,
    successors: SmallVec<[BlockRef; 4]>,
}

impl OperationDataBuilder {
    pub fn new(location: Location, dialect: Symbol, name: Symbol) -> Self {
        Self {
            location,
            dialect,
            name,
            operands: Vec::new(),
            results: Vec::new(),
            attributes: BTreeMap::new(),
            regions: SmallVec::new(),
            successors: SmallVec::new(),
        }
    }

    pub fn operand(mut self, v: ValueRef) -> Self {
        self.operands.push(v);
        self
    }

    pub fn operands(mut self, vs: impl IntoIterator<Item = ValueRef>) -> Self {
        self.operands.extend(vs);
        self
    }

    pub fn result(mut self, ty: TypeRef) -> Self {
        self.results.push(ty);
        self
    }

    pub fn results(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.results.extend(tys);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, val: Attribute) -> Self {
        self.attributes.insert(key.into(), val);
        self
    }

    pub fn attrs(mut self, attrs: impl IntoIterator<Item = (Symbol, Attribute)>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    pub fn region(mut self, r: RegionRef) -> Self {
        self.regions.push(r);
        self
    }

    pub fn successor(mut self, b: BlockRef) -> Self {
        self.successors.push(b);
        self
    }

    /// Build the `OperationData`, packing vecs into `EntityList`s using
    /// the context's pools.
    pub fn build(self, ctx: &mut IrContext) -> OperationData {
        let mut operands = EntityList::new();
        for v in self.operands {
            operands.push(v, &mut ctx.value_pool);
        }
        let mut results = EntityList::new();
        for ty in self.results {
            results.push(ty, &mut ctx.type_pool);
        }
        OperationData {
            location: self.location,
            dialect: self.dialect,
            name: self.name,
            operands,
            results,
            attributes: self.attributes,
            regions: self.regions,
            successors: self.successors,
            parent_block: None,
        }
    }

    /// Build and create the operation in one step.
    pub fn create(self, ctx: &mut IrContext) -> OpRef {
        let data = self.build(ctx);
        ctx.create_op(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;
    use smallvec::smallvec;

    fn test_location(ctx: &mut IrContext) -> Location {
        let path = ctx.paths.intern("test.mlir".to_owned());
        Location::new(path, Span::new(0, 0))
    }

    fn index_type(ctx: &mut IrContext) -> TypeRef {
        ctx.types
            .intern(TypeDataBuilder::new(Symbol::new("core"), Symbol::new("index")).build())
    }

    fn constant(ctx: &mut IrContext, loc: Location, ty: TypeRef, v: i64) -> OpRef {
        OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("constant"))
            .result(ty)
            .attr("value", Attribute::int(v))
            .create(ctx)
    }

    #[test]
    fn create_op_and_read_back() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let op = constant(&mut ctx, loc, idx, 42);

        assert!(ctx.op(op).is("arith", "constant"));
        assert_eq!(ctx.op_result_types(op), &[idx]);
        assert_eq!(ctx.op(op).attr("value"), Some(&Attribute::int(42)));
        assert_eq!(ctx.value_def(ctx.op_result(op, 0)), ValueDef::OpResult(op, 0));
    }

    #[test]
    fn use_chain_tracking_and_rauw() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let a = constant(&mut ctx, loc, idx, 1);
        let b = constant(&mut ctx, loc, idx, 2);
        let va = ctx.op_result(a, 0);
        let vb = ctx.op_result(b, 0);
        let add = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("addi"))
            .operands([va, va])
            .result(idx)
            .create(&mut ctx);

        assert_eq!(ctx.uses(va).len(), 2);
        assert_eq!(ctx.users(va).as_slice(), &[add]);

        ctx.replace_all_uses(va, vb);
        assert!(!ctx.has_uses(va));
        assert_eq!(ctx.uses(vb).len(), 2);
        assert_eq!(ctx.op_operands(add), &[vb, vb]);
    }

    #[test]
    fn set_operand_updates_use_chain() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let a = constant(&mut ctx, loc, idx, 1);
        let b = constant(&mut ctx, loc, idx, 2);
        let va = ctx.op_result(a, 0);
        let vb = ctx.op_result(b, 0);
        let add = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("addi"))
            .operands([va, va])
            .result(idx)
            .create(&mut ctx);

        ctx.set_operand(add, 1, vb);
        assert_eq!(ctx.op_operands(add), &[va, vb]);
        assert_eq!(
            ctx.uses(va),
            &[Use {
                user: add,
                operand_index: 0
            }]
        );
        assert_eq!(
            ctx.uses(vb),
            &[Use {
                user: add,
                operand_index: 1
            }]
        );

        ctx.set_operands(add, &[vb]);
        assert!(!ctx.has_uses(va));
        assert_eq!(ctx.uses(vb).len(), 1);
    }

    #[test]
    fn erase_op_drops_nested_uses() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let outer = ctx.create_block(BlockData::with_args(loc, []));
        let c = constant(&mut ctx, loc, idx, 3);
        ctx.push_op(outer, c);
        let vc = ctx.op_result(c, 0);

        let (region, inner) = ctx.create_single_block_region(loc, []);
        let user = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
            .operand(vc)
            .create(&mut ctx);
        ctx.push_op(inner, user);
        let holder = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("holder"))
            .region(region)
            .create(&mut ctx);
        ctx.push_op(outer, holder);

        assert!(ctx.has_uses(vc));
        assert_eq!(ctx.parent_op(user), Some(holder));
        assert!(!ctx.is_defined_inside(vc, holder));

        ctx.erase_op(holder);
        assert!(!ctx.has_uses(vc));
        assert_eq!(ctx.block(outer).ops.as_slice(), &[c]);
    }

    #[test]
    fn clone_op_remaps_operands_and_regions() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let a = constant(&mut ctx, loc, idx, 1);
        let b = constant(&mut ctx, loc, idx, 2);
        let va = ctx.op_result(a, 0);
        let vb = ctx.op_result(b, 0);

        let (region, inner) = ctx.create_single_block_region(loc, [idx]);
        let arg = ctx.block_arg(inner, 0);
        let add = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("addi"))
            .operands([arg, va])
            .result(idx)
            .create(&mut ctx);
        ctx.push_op(inner, add);
        let outer = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("loop"))
            .operand(va)
            .region(region)
            .create(&mut ctx);

        let mut mapping = IrMapping::new();
        mapping.map_value(va, vb);
        let copy = ctx.clone_op(outer, &mut mapping);

        assert_eq!(ctx.op_operands(copy), &[vb]);
        let copy_region = ctx.op(copy).regions[0];
        assert_ne!(copy_region, region);
        let copy_block = ctx.region(copy_region).blocks[0];
        let copy_add = ctx.block(copy_block).ops[0];
        let copy_arg = ctx.block_arg(copy_block, 0);
        assert_eq!(ctx.op_operands(copy_add), &[copy_arg, vb]);
        // The original is untouched.
        assert_eq!(ctx.op_operands(add), &[arg, va]);
        assert_eq!(ctx.region(copy_region).parent_op, Some(copy));
    }

    #[test]
    fn move_and_insert_ops() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);
        let block = ctx.create_block(BlockData::with_args(loc, []));

        let a = constant(&mut ctx, loc, idx, 1);
        let b = constant(&mut ctx, loc, idx, 2);
        let c = constant(&mut ctx, loc, idx, 3);
        ctx.push_op(block, a);
        ctx.push_op(block, b);
        ctx.push_op_front(block, c);
        assert_eq!(ctx.block(block).ops.as_slice(), &[c, a, b]);

        ctx.move_op_before(c, b);
        assert_eq!(ctx.block(block).ops.as_slice(), &[a, c, b]);
        assert_eq!(ctx.block_terminator(block), Some(b));
    }

    #[test]
    #[should_panic(expected = "still has")]
    fn remove_op_panics_when_result_has_uses() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let a = constant(&mut ctx, loc, idx, 1);
        let va = ctx.op_result(a, 0);
        let _user = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
            .operand(va)
            .create(&mut ctx);

        ctx.remove_op(a);
    }

    #[test]
    #[should_panic(expected = "already belongs to operation")]
    fn create_op_panics_when_region_already_owned() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);

        let (region, _) = ctx.create_single_block_region(loc, []);
        let _first = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("a"))
            .region(region)
            .create(&mut ctx);
        OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("b"))
            .region(region)
            .create(&mut ctx);
    }

    #[test]
    #[should_panic(expected = "already belongs to region")]
    fn create_region_panics_when_block_already_owned() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);

        let block = ctx.create_block(BlockData::with_args(loc, []));
        let _r1 = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![block],
            parent_op: None,
        });
        ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![block],
            parent_op: None,
        });
    }

    #[test]
    fn inline_block_and_take_regions() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let idx = index_type(&mut ctx);

        let (outer_region, outer) = ctx.create_single_block_region(loc, []);
        let anchor = constant(&mut ctx, loc, idx, 7);
        ctx.push_op(outer, anchor);
        let seven = ctx.op_result(anchor, 0);

        let (inner_region, inner) = ctx.create_single_block_region(loc, [idx]);
        let arg = ctx.block_arg(inner, 0);
        let add = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("addi"))
            .operands([arg, arg])
            .result(idx)
            .create(&mut ctx);
        ctx.push_op(inner, add);
        let term = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("yield"))
            .operand(ctx.op_result(add, 0))
            .create(&mut ctx);
        ctx.push_op(inner, term);
        let wrapper = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("wrap"))
            .region(inner_region)
            .create(&mut ctx);
        ctx.push_op(outer, wrapper);

        let found = ctx.inline_block_before(inner, wrapper, &[seven]);
        assert_eq!(found, Some(term));
        assert_eq!(ctx.block(outer).ops.as_slice(), &[anchor, add, wrapper]);
        assert_eq!(ctx.op_operands(add), &[seven, seven]);
        assert_eq!(ctx.block(inner).ops.as_slice(), &[term]);

        let taken = ctx.take_regions(wrapper);
        assert_eq!(taken.as_slice(), &[inner_region]);
        assert!(ctx.op(wrapper).regions.is_empty());
        assert_eq!(ctx.region(inner_region).parent_op, None);
        assert_eq!(ctx.region(outer_region).blocks.as_slice(), &[outer]);
    }

    #[test]
    fn entity_ref_display() {
        use cranelift_entity::EntityRef;

        assert_eq!(format!("{}", OpRef::new(0)), "op0");
        assert_eq!(format!("{}", ValueRef::new(5)), "v5");
        assert_eq!(format!("{}", BlockRef::new(2)), "block2");
        assert_eq!(format!("{}", RegionRef::new(1)), "region1");
    }
}
