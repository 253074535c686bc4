//! Jump distance resolution.
//!
//! Forward jumps are appended in their long encoding because their targets
//! are not placed yet. Once every group is laid out, this pass relaxes to
//! a fixed point: each iteration measures every still-long jump against
//! the previous iteration's layout and shrinks the ones whose (conservatively
//! measured) distance fits the short form. Sizes only ever decrease, so
//! distances only ever shrink and the iteration terminates.

use log::debug;

use super::Emitter;
use super::descr::JmpState;
use super::size;
use crate::error::EmitError;

impl Emitter {
    /// Assign group offsets from current instruction sizes. Returns the
    /// total method size.
    pub(crate) fn assign_offsets(&mut self) -> u64 {
        let mut off: u64 = 0;
        for i in 0..self.order.len() {
            let gid = self.order[i];
            let g = &mut self.groups[gid.0 as usize];
            g.offset = off as u32;
            g.size = g.insns.iter().map(|d| d.code_size as u32).sum();
            off += g.size as u64;
        }
        off
    }

    /// Pin jumps that cross the hot/cold boundary: their distance is not a
    /// simple offset subtraction once the loader places the regions, so
    /// they stay long and get a relocation.
    fn pin_cross_region_jumps(&mut self) {
        let cold: Vec<bool> = self.groups.iter().map(|g| g.cold).collect();
        for gid in self.order.clone() {
            let from_cold = cold[gid.0 as usize];
            for d in &mut self.groups[gid.0 as usize].insns {
                if let Some(j) = d.jmp_info_mut() {
                    if cold[j.target.0 as usize] != from_cold {
                        j.force_long = true;
                        j.state = JmpState::BoundLong;
                    }
                }
            }
        }
    }

    /// Run the shrink-to-fit fixed point and check the method size limit.
    pub(crate) fn resolve_jumps(&mut self) -> Result<u64, EmitError> {
        self.pin_cross_region_jumps();
        let mut total = self.assign_offsets();

        if self.cfg.shrink_jumps {
            let mut pass = 0u32;
            loop {
                pass += 1;
                let offsets: Vec<u32> = self.groups.iter().map(|g| g.offset).collect();
                let mut changed = false;

                for gid in self.order.clone() {
                    // Instruction offsets within the pass use the sizes the
                    // pass started with, so every distance is measured
                    // against one consistent (conservative) layout.
                    let mut ioff = offsets[gid.0 as usize] as i64;
                    for d in &mut self.groups[gid.0 as usize].insns {
                        let old_size = d.code_size as u32;
                        let ins = d.ins;
                        if let Some(j) = d.jmp_info_mut() {
                            if j.short_eligible && !j.force_long && !j.short {
                                let target_off = offsets[j.target.0 as usize] as i64;
                                let short_size = size::jmp_size(ins, true);
                                let rel = target_off - (ioff + short_size as i64);
                                if i8::try_from(rel).is_ok() {
                                    j.short = true;
                                    j.state = JmpState::BoundShort;
                                    d.code_size = short_size as u8;
                                    changed = true;
                                } else {
                                    j.state = JmpState::BoundLong;
                                }
                            }
                        }
                        ioff += old_size as i64;
                    }
                }

                if !changed {
                    debug!("jump resolution converged after {pass} passes");
                    break;
                }
                total = self.assign_offsets();
            }
        }

        // Freeze every jump; layout is final from here on.
        for g in &mut self.groups {
            for d in &mut g.insns {
                if let Some(j) = d.jmp_info_mut() {
                    j.state = JmpState::Final;
                }
            }
        }

        let limit = self.cfg.max_method_size as u64;
        if total > limit {
            return Err(EmitError::MethodTooLarge { size: total, limit });
        }
        Ok(total)
    }
}
