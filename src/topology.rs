//! NUMA topology discovery.
//!
//! Real NUMA node enumeration is platform-specific and out of scope here;
//! this crate only needs a stable count of "locality domains" to size one
//! `Executor` per node. On hosts without NUMA (or when the caller pins a
//! `virtual_numa_nodes_count`), CPUs are split into evenly sized virtual
//! nodes instead.

/// One locality domain: a node id and the CPUs assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    pub node_id: usize,
    pub cpu_ids: Vec<usize>,
}

/// Splits the host's logical CPUs into `node_count` virtual NUMA nodes of
/// roughly equal size. `node_count` is clamped to at least 1 and at most
/// the number of CPUs available, so every node gets at least one CPU.
pub fn enumerate_nodes(node_count: usize) -> Vec<NumaNode> {
    let cpus = num_cpus::get().max(1);
    let node_count = node_count.clamp(1, cpus);

    let base = cpus / node_count;
    let remainder = cpus % node_count;

    let mut nodes = Vec::with_capacity(node_count);
    let mut next_cpu = 0;
    for node_id in 0..node_count {
        let share = base + if node_id < remainder { 1 } else { 0 };
        let cpu_ids = (next_cpu..next_cpu + share).collect();
        next_cpu += share;
        nodes.push(NumaNode { node_id, cpu_ids });
    }
    nodes
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_cpu_is_assigned_to_exactly_one_node() {
        let cpus = num_cpus::get().max(1);
        let nodes = enumerate_nodes(4);

        let total: usize = nodes.iter().map(|n| n.cpu_ids.len()).sum();
        assert_eq!(total, cpus);
    }

    #[test]
    fn node_count_is_clamped_to_available_cpus() {
        let cpus = num_cpus::get().max(1);
        let nodes = enumerate_nodes(cpus + 100);
        assert_eq!(nodes.len(), cpus);
    }

    #[test]
    fn zero_requested_nodes_still_yields_one() {
        let nodes = enumerate_nodes(0);
        assert_eq!(nodes.len(), 1);
    }
}
