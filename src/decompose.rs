//! The long-decomposition pass.
//!
//! Rewrites every 64-bit node in a block into a pair of 32-bit nodes with
//! explicit carry/borrow/sign propagation, so instruction selection for a
//! 32-bit-register target never sees the wide type. The only survivors are
//! the pair marker feeding a call, return or unpromoted wide store, the
//! native widening multiply, and calls themselves — the calling convention
//! still deals in the wide representation.
//!
//! The pass is total: an unhandled node kind still carrying the wide type
//! when the block finishes is a compiler defect and panics immediately.

use log::debug;

use crate::ir::{
    BinOp, Block, CallKind, Func, Helper, Node, NodeFlags, NodeId, NodeKind, RelOp, ShiftOp, Ty,
};

/// How an original node maps into the rewritten block.
#[derive(Debug, Clone, Copy)]
enum Mapped {
    /// Statement node with no value.
    None,
    /// Narrow (or untouched) value.
    One(NodeId),
    /// Decomposed wide value.
    Pair { lo: NodeId, hi: NodeId },
}

/// Run the pass over every block of `func`.
pub fn run(func: &mut Func) {
    promote_locals(func);
    for bi in 0..func.blocks.len() {
        let old = std::mem::take(&mut func.blocks[bi]);
        let mut d = Decomposer {
            func: &mut *func,
            old: &old,
            out: Block::default(),
            map: Vec::with_capacity(old.nodes.len()),
        };
        d.decompose_block();
        let out = d.out;
        verify_block(&out);
        debug!(
            "decomposed block {bi}: {} nodes -> {}",
            old.nodes.len(),
            out.nodes.len()
        );
        func.blocks[bi] = out;
    }
}

/// Split every non-address-exposed long local into two int halves.
fn promote_locals(func: &mut Func) {
    let n = func.vars.len();
    for i in 0..n {
        if func.vars[i].ty.is_long() && !func.vars[i].address_taken {
            let lo = func.new_var(Ty::Int);
            let hi = func.new_var(Ty::Int);
            func.vars[i].promoted = Some((lo, hi));
        }
    }
}

/// After the pass, the wide type may only appear on the permitted shapes.
fn verify_block(block: &Block) {
    for node in &block.nodes {
        if node.ty.is_long() {
            match &node.kind {
                NodeKind::Pair { .. }
                | NodeKind::Call { .. }
                | NodeKind::Bin { op: BinOp::MulLong, .. } => {}
                other => panic!("wide node survived decomposition: {other:?}"),
            }
        }
    }
}

struct Decomposer<'f> {
    func: &'f mut Func,
    old: &'f Block,
    out: Block,
    map: Vec<Mapped>,
}

impl Decomposer<'_> {
    fn decompose_block(&mut self) {
        for id in 0..self.old.nodes.len() {
            let node = self.old.nodes[id].clone();
            let mapped = self.decompose_node(&node);
            self.map.push(mapped);
        }
    }

    // ---- mapping helpers ----

    fn one(&self, id: NodeId) -> NodeId {
        match self.map[id.0 as usize] {
            Mapped::One(n) => n,
            m => panic!("operand {id:?} expected narrow, found {m:?}"),
        }
    }

    fn halves(&self, id: NodeId) -> (NodeId, NodeId) {
        match self.map[id.0 as usize] {
            Mapped::Pair { lo, hi } => (lo, hi),
            m => panic!("operand {id:?} expected a decomposed pair, found {m:?}"),
        }
    }

    /// Materialize a wide operand: the pair marker for decomposed values,
    /// the node itself for narrow ones.
    fn wide(&mut self, id: NodeId) -> NodeId {
        match self.map[id.0 as usize] {
            Mapped::One(n) => n,
            Mapped::Pair { lo, hi } => self.push(NodeKind::Pair { lo, hi }, Ty::Long),
            Mapped::None => panic!("operand {id:?} has no value"),
        }
    }

    fn push(&mut self, kind: NodeKind, ty: Ty) -> NodeId {
        self.out.push(Node::new(kind, ty))
    }

    fn push_flagged(&mut self, kind: NodeKind, ty: Ty, flags: NodeFlags) -> NodeId {
        self.out.push(Node {
            kind,
            ty,
            flags,
        })
    }

    fn const_int(&mut self, v: i32) -> NodeId {
        self.push(NodeKind::ConstInt(v), Ty::Int)
    }

    /// Force a wide value through a fresh unpromoted temp so downstream
    /// consumers see one materialization point, and read its halves back.
    fn store_to_temp_and_read(&mut self, val: NodeId) -> (NodeId, NodeId) {
        let t = self.func.new_var(Ty::Long);
        self.push(NodeKind::LclStore { var: t, val }, Ty::Void);
        let lo = self.push(NodeKind::LclFld { var: t, offset: 0 }, Ty::Int);
        let hi = self.push(NodeKind::LclFld { var: t, offset: 4 }, Ty::Int);
        (lo, hi)
    }

    /// Rewrite an operation into a runtime-helper call returning a wide
    /// value.
    fn helper_call(&mut self, helper: Helper, args: Vec<NodeId>) -> Mapped {
        let call = self.push(
            NodeKind::Call {
                kind: CallKind::Helper(helper),
                args,
            },
            Ty::Long,
        );
        let (lo, hi) = self.store_to_temp_and_read(call);
        Mapped::Pair { lo, hi }
    }

    /// Clone a node that needs no decomposition, remapping its operands.
    fn clone_remapped(&mut self, n: &Node) -> Mapped {
        let kind = match &n.kind {
            NodeKind::ConstInt(_)
            | NodeKind::ConstLong(_)
            | NodeKind::LclLoad(_)
            | NodeKind::LclFld { .. }
            | NodeKind::LclAddr(_) => n.kind.clone(),
            NodeKind::LclStore { var, val } => NodeKind::LclStore {
                var: *var,
                val: self.one(*val),
            },
            NodeKind::Load { addr, offset } => NodeKind::Load {
                addr: self.one(*addr),
                offset: *offset,
            },
            NodeKind::Store { addr, offset, val } => NodeKind::Store {
                addr: self.one(*addr),
                offset: *offset,
                val: self.one(*val),
            },
            NodeKind::Bin { op, a, b } => NodeKind::Bin {
                op: *op,
                a: self.one(*a),
                b: self.one(*b),
            },
            NodeKind::Neg(v) => NodeKind::Neg(self.one(*v)),
            NodeKind::Not(v) => NodeKind::Not(self.one(*v)),
            NodeKind::Shift { op, val, merge, by } => NodeKind::Shift {
                op: *op,
                val: self.one(*val),
                merge: merge.map(|m| self.one(m)),
                by: self.one(*by),
            },
            NodeKind::Cmp { op, a, b } => NodeKind::Cmp {
                op: *op,
                a: self.one(*a),
                b: self.one(*b),
            },
            NodeKind::Cast {
                val,
                to,
                from_unsigned,
                to_unsigned,
            } => NodeKind::Cast {
                val: self.one(*val),
                to: *to,
                from_unsigned: *from_unsigned,
                to_unsigned: *to_unsigned,
            },
            NodeKind::Call { kind, args } => NodeKind::Call {
                kind: *kind,
                args: args.iter().map(|a| self.one(*a)).collect(),
            },
            NodeKind::Ret(v) => NodeKind::Ret(v.map(|v| self.one(v))),
            other => panic!("unexpected node in pre-decomposition IR: {other:?}"),
        };
        let id = self.push_flagged(kind, n.ty, n.flags);
        if n.ty == Ty::Void {
            Mapped::None
        } else {
            Mapped::One(id)
        }
    }

    // ---- the per-node rewrite ----

    fn decompose_node(&mut self, n: &Node) -> Mapped {
        match &n.kind {
            NodeKind::ConstLong(v) if n.ty.is_long() => {
                let lo = self.const_int(*v as i32);
                let hi = self.const_int((*v >> 32) as i32);
                Mapped::Pair { lo, hi }
            }

            NodeKind::LclLoad(var) if self.func.var(*var).ty.is_long() => {
                match self.func.var(*var).promoted {
                    Some((lo_v, hi_v)) => {
                        let lo = self.push(NodeKind::LclLoad(lo_v), Ty::Int);
                        let hi = self.push(NodeKind::LclLoad(hi_v), Ty::Int);
                        Mapped::Pair { lo, hi }
                    }
                    None => {
                        // Address-exposed storage: two field reads of the
                        // same slot.
                        let lo = self.push(NodeKind::LclFld { var: *var, offset: 0 }, Ty::Int);
                        let hi = self.push(NodeKind::LclFld { var: *var, offset: 4 }, Ty::Int);
                        Mapped::Pair { lo, hi }
                    }
                }
            }

            NodeKind::LclStore { var, val } if self.func.var(*var).ty.is_long() => {
                match self.func.var(*var).promoted {
                    Some((lo_v, hi_v)) => {
                        let (vlo, vhi) = self.halves(*val);
                        self.push(NodeKind::LclStore { var: lo_v, val: vlo }, Ty::Void);
                        self.push(NodeKind::LclStore { var: hi_v, val: vhi }, Ty::Void);
                        Mapped::None
                    }
                    None => {
                        // The variable's address has been observed as a
                        // unit; splitting the store would invalidate
                        // liveness for the halves. Keep it wide.
                        let wide = self.wide(*val);
                        self.push(NodeKind::LclStore { var: *var, val: wide }, Ty::Void);
                        Mapped::None
                    }
                }
            }

            NodeKind::Load { addr, offset } if n.ty.is_long() => {
                let (a0, a1) = self.hoist_address(*addr);
                let lo = self.push(NodeKind::Load { addr: a0, offset: *offset }, Ty::Int);
                let hi = self.push(
                    NodeKind::Load { addr: a1, offset: *offset + 4 },
                    Ty::Int,
                );
                Mapped::Pair { lo, hi }
            }

            NodeKind::Store { addr, offset, val }
                if self.old.node(*val).ty.is_long() =>
            {
                let (vlo, vhi) = self.halves(*val);
                let (a0, a1) = self.hoist_address(*addr);
                self.push(
                    NodeKind::Store { addr: a0, offset: *offset, val: vlo },
                    Ty::Void,
                );
                self.push(
                    NodeKind::Store { addr: a1, offset: *offset + 4, val: vhi },
                    Ty::Void,
                );
                Mapped::None
            }

            NodeKind::Bin { op, a, b } if n.ty.is_long() => self.decompose_bin(n, *op, *a, *b),

            NodeKind::Neg(v) if n.ty.is_long() => {
                let (vlo, vhi) = self.halves(*v);
                let lo = self.push(NodeKind::Neg(vlo), Ty::Int);
                // The borrow out of negating the low half folds in through
                // an add-with-carry of zero before the high negate.
                let zero = self.const_int(0);
                let adj = self.push(
                    NodeKind::Bin { op: BinOp::AddHi, a: vhi, b: zero },
                    Ty::Int,
                );
                let hi = self.push(NodeKind::Neg(adj), Ty::Int);
                Mapped::Pair { lo, hi }
            }

            NodeKind::Not(v) if n.ty.is_long() => {
                let (vlo, vhi) = self.halves(*v);
                let lo = self.push(NodeKind::Not(vlo), Ty::Int);
                let hi = self.push(NodeKind::Not(vhi), Ty::Int);
                Mapped::Pair { lo, hi }
            }

            NodeKind::Shift { op, val, merge, by } if n.ty.is_long() => {
                assert!(merge.is_none(), "merge shift in pre-decomposition IR");
                self.decompose_shift(*op, *val, *by)
            }

            NodeKind::Cmp { op, a, b } if self.old.node(*a).ty.is_long() => {
                self.decompose_cmp(*op, *a, *b)
            }

            NodeKind::Cast { .. } => self.decompose_cast(n),

            NodeKind::Call { kind, args } => {
                let new_args: Vec<NodeId> = args
                    .iter()
                    .map(|&a| {
                        if self.old.node(a).ty.is_long() {
                            // Arguments keep the paired representation;
                            // the calling convention consumes it.
                            self.wide(a)
                        } else {
                            self.one(a)
                        }
                    })
                    .collect();
                let call = self.push_flagged(
                    NodeKind::Call { kind: *kind, args: new_args },
                    n.ty,
                    n.flags,
                );
                if n.ty.is_long() {
                    let (lo, hi) = self.store_to_temp_and_read(call);
                    Mapped::Pair { lo, hi }
                } else if n.ty == Ty::Void {
                    Mapped::None
                } else {
                    Mapped::One(call)
                }
            }

            NodeKind::Ret(Some(v)) if self.old.node(*v).ty.is_long() => {
                let wide = self.wide(*v);
                self.push(NodeKind::Ret(Some(wide)), Ty::Void);
                Mapped::None
            }

            NodeKind::Pair { .. }
            | NodeKind::NarrowChk { .. }
            | NodeKind::UModLong { .. } => {
                panic!("unexpected node in pre-decomposition IR: {:?}", n.kind)
            }

            _ if n.ty.is_long() => {
                panic!("decomposition does not handle wide node: {:?}", n.kind)
            }

            _ => self.clone_remapped(n),
        }
    }

    /// Hoist a (possibly effectful) address computation into a temp and
    /// return two loads of it, one per half access.
    fn hoist_address(&mut self, addr: NodeId) -> (NodeId, NodeId) {
        let a = self.one(addr);
        let addr_ty = self.out.node(a).ty;
        let t = self.func.new_var(addr_ty);
        self.push(NodeKind::LclStore { var: t, val: a }, Ty::Void);
        let a0 = self.push(NodeKind::LclLoad(t), addr_ty);
        let a1 = self.push(NodeKind::LclLoad(t), addr_ty);
        (a0, a1)
    }

    fn decompose_bin(&mut self, n: &Node, op: BinOp, a: NodeId, b: NodeId) -> Mapped {
        match op {
            BinOp::Add | BinOp::Sub => {
                let (alo, ahi) = self.halves(a);
                let (blo, bhi) = self.halves(b);
                let (lo_op, hi_op) = if op == BinOp::Add {
                    (BinOp::AddLo, BinOp::AddHi)
                } else {
                    (BinOp::SubLo, BinOp::SubHi)
                };
                // The overflow check, if any, belongs to the high half
                // only; the low half feeds its carry into the chain.
                let lo = self.push(NodeKind::Bin { op: lo_op, a: alo, b: blo }, Ty::Int);
                let hi = self.push_flagged(
                    NodeKind::Bin { op: hi_op, a: ahi, b: bhi },
                    Ty::Int,
                    NodeFlags {
                        overflow: n.flags.overflow,
                        unsigned: n.flags.unsigned,
                        narrow_operands: false,
                    },
                );
                Mapped::Pair { lo, hi }
            }

            BinOp::And | BinOp::Or | BinOp::Xor => {
                // No cross-half interaction.
                let (alo, ahi) = self.halves(a);
                let (blo, bhi) = self.halves(b);
                let lo = self.push(NodeKind::Bin { op, a: alo, b: blo }, Ty::Int);
                let hi = self.push(NodeKind::Bin { op, a: ahi, b: bhi }, Ty::Int);
                Mapped::Pair { lo, hi }
            }

            BinOp::Mul => {
                if n.flags.narrow_operands {
                    // Both operands are widened 32-bit values: one native
                    // widening multiply produces both halves at once.
                    let (alo, _) = self.halves(a);
                    let (blo, _) = self.halves(b);
                    let ml = self.push_flagged(
                        NodeKind::Bin { op: BinOp::MulLong, a: alo, b: blo },
                        Ty::Long,
                        NodeFlags {
                            unsigned: n.flags.unsigned,
                            ..NodeFlags::default()
                        },
                    );
                    let (lo, hi) = self.store_to_temp_and_read(ml);
                    Mapped::Pair { lo, hi }
                } else {
                    let wa = self.wide(a);
                    let wb = self.wide(b);
                    self.helper_call(Helper::LMul, vec![wa, wb])
                }
            }

            BinOp::UMod => {
                // Unsigned modulo by a small constant divisor: the native
                // 64-by-32 remainder applies, and the result's high half
                // is zero because the remainder is below the divisor.
                if let NodeKind::ConstLong(d) = self.old.node(b).kind {
                    if (2..=0x3FFF_FFFF).contains(&d) {
                        let (alo, ahi) = self.halves(a);
                        let lo = self.push(
                            NodeKind::UModLong { lo: alo, hi: ahi, divisor: d as u32 },
                            Ty::Int,
                        );
                        let hi = self.const_int(0);
                        return Mapped::Pair { lo, hi };
                    }
                }
                let wa = self.wide(a);
                let wb = self.wide(b);
                self.helper_call(Helper::ULMod, vec![wa, wb])
            }

            BinOp::Div | BinOp::Mod | BinOp::UDiv => {
                let helper = match op {
                    BinOp::Div => Helper::LDiv,
                    BinOp::Mod => Helper::LMod,
                    _ => Helper::ULDiv,
                };
                let wa = self.wide(a);
                let wb = self.wide(b);
                self.helper_call(helper, vec![wa, wb])
            }

            BinOp::AddLo | BinOp::AddHi | BinOp::SubLo | BinOp::SubHi | BinOp::MulLong => {
                panic!("carry-chain operator {op:?} in pre-decomposition IR")
            }
        }
    }

    fn decompose_shift(&mut self, op: ShiftOp, val: NodeId, by: NodeId) -> Mapped {
        let count = match self.old.node(by).kind {
            NodeKind::ConstInt(c) => Some(c),
            _ => None,
        };

        let Some(c) = count else {
            // Variable-count double-wide shifts go to a runtime helper;
            // expanding them inline is not worth the code size here.
            let helper = match op {
                ShiftOp::Shl => Helper::LLsh,
                ShiftOp::Sar => Helper::LRsh,
                ShiftOp::Shr => Helper::LRsz,
                ShiftOp::Rol | ShiftOp::Ror => {
                    panic!("variable-count rotate reached decomposition")
                }
                _ => unreachable!(),
            };
            let wv = self.wide(val);
            let amount = self.one(by);
            return self.helper_call(helper, vec![wv, amount]);
        };

        let (vlo, vhi) = self.halves(val);
        match op {
            ShiftOp::Rol | ShiftOp::Ror => self.decompose_rotate(op, vlo, vhi, c),
            ShiftOp::Shl => match c {
                0 => Mapped::Pair { lo: vlo, hi: vhi },
                1..=31 => {
                    // High half first so it reads the unshifted low bits.
                    let by1 = self.const_int(c);
                    let hi = self.push(
                        NodeKind::Shift { op: ShiftOp::LshHi, val: vhi, merge: Some(vlo), by: by1 },
                        Ty::Int,
                    );
                    let by2 = self.const_int(c);
                    let lo = self.push(
                        NodeKind::Shift { op: ShiftOp::Shl, val: vlo, merge: None, by: by2 },
                        Ty::Int,
                    );
                    Mapped::Pair { lo, hi }
                }
                32 => {
                    let lo = self.const_int(0);
                    Mapped::Pair { lo, hi: vlo }
                }
                33..=63 => {
                    let by = self.const_int(c - 32);
                    let hi = self.push(
                        NodeKind::Shift { op: ShiftOp::Shl, val: vlo, merge: None, by },
                        Ty::Int,
                    );
                    let lo = self.const_int(0);
                    Mapped::Pair { lo, hi }
                }
                _ => {
                    let lo = self.const_int(0);
                    let hi = self.const_int(0);
                    Mapped::Pair { lo, hi }
                }
            },
            ShiftOp::Shr => match c {
                0 => Mapped::Pair { lo: vlo, hi: vhi },
                1..=31 => {
                    let by1 = self.const_int(c);
                    let lo = self.push(
                        NodeKind::Shift { op: ShiftOp::RshLo, val: vlo, merge: Some(vhi), by: by1 },
                        Ty::Int,
                    );
                    let by2 = self.const_int(c);
                    let hi = self.push(
                        NodeKind::Shift { op: ShiftOp::Shr, val: vhi, merge: None, by: by2 },
                        Ty::Int,
                    );
                    Mapped::Pair { lo, hi }
                }
                32 => {
                    let hi = self.const_int(0);
                    Mapped::Pair { lo: vhi, hi }
                }
                33..=63 => {
                    let by = self.const_int(c - 32);
                    let lo = self.push(
                        NodeKind::Shift { op: ShiftOp::Shr, val: vhi, merge: None, by },
                        Ty::Int,
                    );
                    let hi = self.const_int(0);
                    Mapped::Pair { lo, hi }
                }
                _ => {
                    let lo = self.const_int(0);
                    let hi = self.const_int(0);
                    Mapped::Pair { lo, hi }
                }
            },
            ShiftOp::Sar => match c {
                0 => Mapped::Pair { lo: vlo, hi: vhi },
                1..=31 => {
                    let by1 = self.const_int(c);
                    let lo = self.push(
                        NodeKind::Shift { op: ShiftOp::RshLo, val: vlo, merge: Some(vhi), by: by1 },
                        Ty::Int,
                    );
                    let by2 = self.const_int(c);
                    let hi = self.push(
                        NodeKind::Shift { op: ShiftOp::Sar, val: vhi, merge: None, by: by2 },
                        Ty::Int,
                    );
                    Mapped::Pair { lo, hi }
                }
                32 => {
                    let by = self.const_int(31);
                    let hi = self.push(
                        NodeKind::Shift { op: ShiftOp::Sar, val: vhi, merge: None, by },
                        Ty::Int,
                    );
                    Mapped::Pair { lo: vhi, hi }
                }
                33..=63 => {
                    let by1 = self.const_int(c - 32);
                    let lo = self.push(
                        NodeKind::Shift { op: ShiftOp::Sar, val: vhi, merge: None, by: by1 },
                        Ty::Int,
                    );
                    let by2 = self.const_int(31);
                    let hi = self.push(
                        NodeKind::Shift { op: ShiftOp::Sar, val: vhi, merge: None, by: by2 },
                        Ty::Int,
                    );
                    Mapped::Pair { lo, hi }
                }
                _ => {
                    let by1 = self.const_int(31);
                    let fill = self.push(
                        NodeKind::Shift { op: ShiftOp::Sar, val: vhi, merge: None, by: by1 },
                        Ty::Int,
                    );
                    Mapped::Pair { lo: fill, hi: fill }
                }
            },
            ShiftOp::LshHi | ShiftOp::RshLo => {
                panic!("merge shift in pre-decomposition IR")
            }
        }
    }

    /// Rotates: two shift-with-merge pairs with swapped roles; an exact
    /// half-rotation is a pure swap.
    fn decompose_rotate(&mut self, op: ShiftOp, vlo: NodeId, vhi: NodeId, c: i32) -> Mapped {
        let c = c & 63;
        if c == 0 {
            return Mapped::Pair { lo: vlo, hi: vhi };
        }
        if c == 32 {
            return Mapped::Pair { lo: vhi, hi: vlo };
        }
        // A rotate past the half swaps roles first.
        let (lo_src, hi_src, c) = if c > 32 { (vhi, vlo, c - 32) } else { (vlo, vhi, c) };
        match op {
            ShiftOp::Rol => {
                let by1 = self.const_int(c);
                let hi = self.push(
                    NodeKind::Shift { op: ShiftOp::LshHi, val: hi_src, merge: Some(lo_src), by: by1 },
                    Ty::Int,
                );
                let by2 = self.const_int(c);
                let lo = self.push(
                    NodeKind::Shift { op: ShiftOp::LshHi, val: lo_src, merge: Some(hi_src), by: by2 },
                    Ty::Int,
                );
                Mapped::Pair { lo, hi }
            }
            ShiftOp::Ror => {
                let by1 = self.const_int(c);
                let lo = self.push(
                    NodeKind::Shift { op: ShiftOp::RshLo, val: lo_src, merge: Some(hi_src), by: by1 },
                    Ty::Int,
                );
                let by2 = self.const_int(c);
                let hi = self.push(
                    NodeKind::Shift { op: ShiftOp::RshLo, val: hi_src, merge: Some(lo_src), by: by2 },
                    Ty::Int,
                );
                Mapped::Pair { lo, hi }
            }
            _ => unreachable!(),
        }
    }

    fn decompose_cmp(&mut self, op: RelOp, a: NodeId, b: NodeId) -> Mapped {
        let (alo, ahi) = self.halves(a);
        let (blo, bhi) = self.halves(b);

        if !op.is_ordering() {
            // Equality collapses both halves: (alo^blo) | (ahi^bhi) == 0.
            let x1 = self.push(NodeKind::Bin { op: BinOp::Xor, a: alo, b: blo }, Ty::Int);
            let x2 = self.push(NodeKind::Bin { op: BinOp::Xor, a: ahi, b: bhi }, Ty::Int);
            let or = self.push(NodeKind::Bin { op: BinOp::Or, a: x1, b: x2 }, Ty::Int);
            let z = self.const_int(0);
            let cmp = self.push(NodeKind::Cmp { op, a: or, b: z }, Ty::Int);
            return Mapped::One(cmp);
        }

        // a <op> b  ==  (ahi <strict> bhi) | (ahi == bhi & alo <unsigned op> blo)
        let hs = self.push(NodeKind::Cmp { op: op.strict(), a: ahi, b: bhi }, Ty::Int);
        let he = self.push(NodeKind::Cmp { op: RelOp::Eq, a: ahi, b: bhi }, Ty::Int);
        let lc = self.push(NodeKind::Cmp { op: op.unsigned(), a: alo, b: blo }, Ty::Int);
        let and = self.push(NodeKind::Bin { op: BinOp::And, a: he, b: lc }, Ty::Int);
        let or = self.push(NodeKind::Bin { op: BinOp::Or, a: hs, b: and }, Ty::Int);
        Mapped::One(or)
    }

    fn decompose_cast(&mut self, n: &Node) -> Mapped {
        let &NodeKind::Cast {
            val,
            to,
            from_unsigned,
            to_unsigned,
        } = &n.kind
        else {
            unreachable!()
        };
        let src_ty = self.old.node(val).ty;

        match (src_ty, to) {
            // Wide-to-wide signedness change: the low half passes through;
            // only the high half's sign decides overflow, via the same
            // check the narrow cast would use.
            (Ty::Long, Ty::Long) => {
                let (lo, hi) = self.halves(val);
                if !n.flags.overflow || from_unsigned == to_unsigned {
                    return Mapped::Pair { lo, hi };
                }
                let checked_hi = self.push_flagged(
                    NodeKind::Cast {
                        val: hi,
                        to: Ty::Int,
                        from_unsigned,
                        to_unsigned,
                    },
                    Ty::Int,
                    NodeFlags { overflow: true, ..NodeFlags::default() },
                );
                Mapped::Pair { lo, hi: checked_hi }
            }

            // Narrow-to-wide.
            (Ty::Int, Ty::Long) => {
                let v = self.one(val);
                if from_unsigned {
                    let hi = self.const_int(0);
                    return Mapped::Pair { lo: v, hi };
                }
                if to_unsigned && n.flags.overflow {
                    // int -> ulong: the value must be non-negative; the
                    // high half is then zero.
                    let lo = self.push_flagged(
                        NodeKind::Cast {
                            val: v,
                            to: Ty::Int,
                            from_unsigned: false,
                            to_unsigned: true,
                        },
                        Ty::Int,
                        NodeFlags { overflow: true, ..NodeFlags::default() },
                    );
                    let hi = self.const_int(0);
                    return Mapped::Pair { lo, hi };
                }
                // Signed widening: sign-fill from a saved copy of the low
                // half so an in-place shift cannot clobber the source.
                let t = self.func.new_var(Ty::Int);
                self.push(NodeKind::LclStore { var: t, val: v }, Ty::Void);
                let lo = self.push(NodeKind::LclLoad(t), Ty::Int);
                let copy = self.push(NodeKind::LclLoad(t), Ty::Int);
                let by = self.const_int(31);
                let hi = self.push(
                    NodeKind::Shift { op: ShiftOp::Sar, val: copy, merge: None, by },
                    Ty::Int,
                );
                Mapped::Pair { lo, hi }
            }

            // Wide-to-narrow.
            (Ty::Long, Ty::Int) => {
                let (lo, hi) = self.halves(val);
                if !n.flags.overflow {
                    return Mapped::One(lo);
                }
                let chk = self.push(
                    NodeKind::NarrowChk {
                        lo,
                        hi,
                        src_unsigned: from_unsigned,
                        dst_unsigned: to_unsigned,
                    },
                    Ty::Int,
                );
                Mapped::One(chk)
            }

            // Narrow casts are none of this pass's business; anything
            // else still touching the wide type has no rule here.
            _ => {
                assert!(
                    !n.ty.is_long() && !src_ty.is_long(),
                    "decomposition does not handle wide cast {src_ty:?} -> {to:?}"
                );
                self.clone_remapped(n)
            }
        }
    }
}
