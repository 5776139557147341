use std::collections::BTreeMap;

use super::{Pid, ProcessControlBlock};

/// Owns every PCB from load until the machine shuts down. Terminated
/// processes stay listed so their accounting can still be reported.
#[derive(Default)]
pub struct ResidentList {
    pcb_map: BTreeMap<Pid, ProcessControlBlock>,
    next_pid: Pid,
}

impl ResidentList {
    pub fn new() -> ResidentList {
        ResidentList::default()
    }

    pub fn next_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// The pid `next_pid` will hand out, without taking it.
    pub fn peek_pid(&self) -> Pid {
        self.next_pid
    }

    pub fn insert(&mut self, pcb: ProcessControlBlock) {
        self.pcb_map.insert(pcb.get_pid(), pcb);
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        self.pcb_map.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessControlBlock> {
        self.pcb_map.get_mut(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessControlBlock> + '_ {
        self.pcb_map.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProcessControlBlock> + '_ {
        self.pcb_map.values_mut()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.pcb_map.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pcb_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcb_map.is_empty()
    }

    /// Processes that still hold storage or may still run.
    pub fn live_count(&self) -> usize {
        self.pcb_map.values().filter(|pcb| !pcb.is_terminated()).count()
    }
}
