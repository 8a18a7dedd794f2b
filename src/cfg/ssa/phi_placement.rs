use crate::cfg::{BlockId, Mir, MirGraph};
use crate::utils::BitSet;

impl MirGraph {
    /// Inserts a phi for each vreg at every block of the iterated dominance
    /// frontier of its definitions where the vreg is live on entry.
    /// Live-in sets must already be at their fixed point.
    pub(crate) fn insert_phi_nodes(&mut self) {
        let num_blocks = self.num_blocks();
        let mut phi_blocks = BitSet::new(num_blocks);
        let mut input_blocks = BitSet::new(num_blocks);
        let mut inserted = 0usize;

        for v_reg in (0..self.num_vregs()).rev() {
            input_blocks.copy_from(&self.def_block_matrix[v_reg]);
            phi_blocks.clear();
            loop {
                for idx in input_blocks.iter() {
                    phi_blocks.union_with(&self.blocks[idx].dom_frontier);
                }
                if !input_blocks.union_with(&phi_blocks) {
                    break;
                }
            }

            let targets: Vec<BlockId> = phi_blocks
                .iter()
                .map(|idx| BlockId(idx as u32))
                .filter(|bb| self.live_in(*bb).is_some_and(|live| live.contains(v_reg)))
                .collect();
            for bb in targets {
                let offset = self.block(bb).start_offset;
                self.prepend_mir(bb, Mir::phi(v_reg as u32, offset));
                if let Some(info) = self.block_mut(bb).data_flow_info.as_mut() {
                    info.phi_v.insert(v_reg);
                }
                inserted += 1;
            }
        }
        log::trace!("inserted {} phi nodes in {}", inserted, self.method_name());
    }

    /// Removes phis left by an earlier conversion so SSA can be rebuilt.
    pub(crate) fn strip_phi_nodes(&mut self) {
        for idx in 0..self.blocks.len() {
            let bb = BlockId(idx as u32);
            while let Some(first) = self.block(bb).first_mir {
                if !self.mir(first).is_phi() {
                    break;
                }
                if self.remove_mir(bb, first).is_err() {
                    break;
                }
            }
        }
    }
}
