mod common;

use common::{build_graph, counting_loop, diamond, guarded_array_read, sparse_switch};
use dex_mir::cfg::{BlockId, BlockType, MirGraph};
use dex_mir::config::CompilerOptions;
use petgraph::algo::dominators::simple_fast;

fn dominated_graphs() -> Vec<MirGraph> {
    [diamond(), counting_loop(), sparse_switch(), guarded_array_read()]
        .into_iter()
        .map(|asm| {
            let mut graph = build_graph(asm, &CompilerOptions::default());
            graph.compute_dominance().unwrap();
            graph
        })
        .collect()
}

#[test]
fn test_immediate_dominators_match_petgraph() {
    for graph in dominated_graphs() {
        let (pg, nodes) = graph.to_petgraph();
        let root = nodes[&graph.entry_block()];
        let oracle = simple_fast(&pg, root);

        for &block in graph.dfs_order() {
            let expected = oracle.immediate_dominator(nodes[&block]).map(|idx| pg[idx]);
            assert_eq!(
                graph.block(block).i_dom,
                expected,
                "{}: idom of block {}",
                graph.method_name(),
                block
            );
        }
    }
}

#[test]
fn test_entry_has_no_idom_and_dominance_is_transitive() {
    for graph in dominated_graphs() {
        let entry = graph.entry_block();
        assert_eq!(graph.block(entry).i_dom, None);

        for &block in graph.dfs_order() {
            let bb = graph.block(block);
            assert!(bb.dominators.contains(block.index()));
            assert!(bb.dominators.contains(entry.index()));
            if let Some(idom) = bb.i_dom {
                for dom in graph.block(idom).dominators.iter() {
                    assert!(
                        bb.dominators.contains(dom),
                        "block {} misses dominator {} of its idom",
                        block,
                        dom
                    );
                }
                assert!(graph.block(idom).i_dominated.contains(block.index()));
            }
        }
    }
}

#[test]
fn test_diamond_frontier_is_the_join() {
    let mut graph = build_graph(diamond(), &CompilerOptions::default());
    graph.compute_dominance().unwrap();
    let branch = graph.block(graph.entry_block()).fall_through.unwrap();
    let bb = graph.block(branch);
    let (Some(left), Some(right)) = (bb.fall_through, bb.taken) else {
        panic!("branch block has two successors");
    };
    let join = graph
        .blocks()
        .iter()
        .find(|bb| bb.block_type == BlockType::DalvikByteCode && bb.predecessors.len() == 2)
        .map(|bb| bb.id)
        .unwrap();

    for arm in [left, right] {
        let frontier: Vec<BlockId> = graph
            .block(arm)
            .dom_frontier
            .iter()
            .map(|idx| BlockId(idx as u32))
            .collect();
        assert_eq!(frontier, vec![join]);
    }
    assert_eq!(graph.block(join).i_dom, Some(branch));
}

#[test]
fn test_recomputation_is_idempotent() {
    for mut graph in dominated_graphs() {
        let before: Vec<_> = graph
            .blocks()
            .iter()
            .map(|bb| (bb.i_dom, bb.dominators.clone(), bb.dom_frontier.clone()))
            .collect();
        let order = graph.dfs_order().to_vec();
        graph.compute_dominance().unwrap();
        let after: Vec<_> = graph
            .blocks()
            .iter()
            .map(|bb| (bb.i_dom, bb.dominators.clone(), bb.dom_frontier.clone()))
            .collect();
        assert_eq!(before, after);
        assert_eq!(order, graph.dfs_order());
    }
}

#[test]
fn test_loop_header_dominates_its_body() {
    let mut graph = build_graph(counting_loop(), &CompilerOptions::default());
    graph.compute_dominance().unwrap();
    let header = graph
        .blocks()
        .iter()
        .find(|bb| bb.block_type == BlockType::DalvikByteCode && bb.start_offset == 2)
        .unwrap()
        .id;
    let latch = graph
        .block(header)
        .predecessors
        .iter()
        .copied()
        .find(|pred| graph.block(*pred).taken == Some(header))
        .unwrap();
    assert!(graph.block(latch).dominators.contains(header.index()));
    assert!(graph.block(latch).nesting_depth > graph.block(graph.entry_block()).nesting_depth);
}
