use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};

use crate::middle::mir::{self, BlockId, Terminator};

/// Predecessors of every block reachable from the entry. Computed with a
/// visited set so loop back edges don't recurse forever.
pub fn compute_predecessors(body: &mir::Body) -> HashMap<BlockId, BTreeSet<BlockId>> {
    let mut predecessors: HashMap<BlockId, BTreeSet<BlockId>> = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = vec![body.entry];

    predecessors.entry(body.entry).or_default();

    while let Some(block) = stack.pop() {
        if !visited.insert(block) {
            continue;
        }

        for successor in body.blocks[block].terminator.successors() {
            predecessors.entry(successor).or_default().insert(block);
            stack.push(successor);
        }
    }

    predecessors
}

/// Folds blocks that end in an unconditional jump into their successor,
/// repeating until nothing changes. Returns how many blocks were removed.
///
/// A block is folded when it is empty, or when it is the only way into its
/// successor. Its statements are prepended to the successor, so statement
/// order along every path is unchanged. The entry block counts as having an
/// extra predecessor (the caller), so nothing is ever prepended onto it.
pub fn merge_blocks(body: &mut mir::Body) -> usize {
    let mut removed = 0;

    loop {
        let merged = merge_blocks_once(body);
        if merged == 0 {
            break;
        }
        removed += merged;

        let keep = body
            .reachable_blocks()
            .into_iter()
            .chain([body.sink])
            .collect::<HashSet<_>>();
        body.compact(&keep);
    }

    removed
}

fn merge_blocks_once(body: &mut mir::Body) -> usize {
    let mut predecessors = compute_predecessors(body);
    let mut evicted = HashSet::new();

    for block_id in body.reachable_blocks() {
        if evicted.contains(&block_id) {
            continue;
        }

        let Terminator::Unconditional(successor) = body.blocks[block_id].terminator else {
            continue;
        };

        // an empty infinite loop has nothing to fold into
        if successor == block_id || evicted.contains(&successor) {
            continue;
        }

        let empty = body.blocks[block_id].is_empty();
        let only_predecessor = successor != body.entry
            && predecessors
                .get(&successor)
                .is_some_and(|p| p.len() == 1 && p.contains(&block_id));

        if !empty && !only_predecessor {
            continue;
        }

        /* Move the contents over */

        let block = &mut body.blocks[block_id];
        let mut statements = std::mem::take(&mut block.statements);
        let mut expressions = std::mem::take(&mut block.expressions);

        let target = &mut body.blocks[successor];
        statements.append(&mut target.statements);
        expressions.append(&mut target.expressions);
        target.statements = statements;
        target.expressions = expressions;

        /* Repoint every edge into the removed block */

        let incoming = predecessors.remove(&block_id).unwrap_or_default();
        for predecessor in &incoming {
            body.blocks[*predecessor]
                .terminator
                .retarget(block_id, successor);
        }

        let successor_predecessors = predecessors.entry(successor).or_default();
        successor_predecessors.remove(&block_id);
        successor_predecessors.extend(incoming);

        if body.entry == block_id {
            body.entry = successor;
        }

        evicted.insert(block_id);
    }

    evicted.len()
}
