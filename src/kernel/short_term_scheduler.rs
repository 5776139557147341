use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use super::{Cpu, Irq, Pid, PriorityQueue, ProcessState, ResidentList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    RoundRobin,
    Fcfs,
    Priority,
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulingAlgorithm::RoundRobin => "rr",
            SchedulingAlgorithm::Fcfs => "fcfs",
            SchedulingAlgorithm::Priority => "priority",
        };
        f.write_str(name)
    }
}

impl FromStr for SchedulingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rr" | "round_robin" | "roundrobin" => Ok(SchedulingAlgorithm::RoundRobin),
            "fcfs" => Ok(SchedulingAlgorithm::Fcfs),
            "priority" => Ok(SchedulingAlgorithm::Priority),
            other => Err(format!("unknown scheduling algorithm '{}'", other)),
        }
    }
}

/// Round robin's quantum and the unbounded one FCFS runs with. Like the
/// PCB priority pair, switching in or out of FCFS swaps the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantumPair {
    pub active: u32,
    pub shadow: u32,
}

impl QuantumPair {
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.shadow);
    }
}

/// Decides which ready process runs next and when the running one has had
/// enough. Holds pids only; the resident list owns the PCBs.
pub struct ShortTermScheduler {
    algorithm: SchedulingAlgorithm,
    quantum: QuantumPair,
    ready: PriorityQueue<Pid>,
    bursts: u32,
    switch_pending: bool,
}

impl ShortTermScheduler {
    pub fn new(algorithm: SchedulingAlgorithm, quantum: u32) -> ShortTermScheduler {
        let mut pair = QuantumPair {
            active: quantum,
            shadow: u32::MAX,
        };
        if algorithm == SchedulingAlgorithm::Fcfs {
            pair.swap();
        }

        ShortTermScheduler {
            algorithm,
            quantum: pair,
            ready: PriorityQueue::new(),
            bursts: 0,
            switch_pending: false,
        }
    }

    pub fn algorithm(&self) -> SchedulingAlgorithm {
        self.algorithm
    }

    /// The round-robin quantum, whichever slot it sits in.
    pub fn quantum(&self) -> u32 {
        match self.algorithm {
            SchedulingAlgorithm::Fcfs => self.quantum.shadow,
            _ => self.quantum.active,
        }
    }

    pub fn ready_queue(&self) -> &PriorityQueue<Pid> {
        &self.ready
    }

    pub fn schedule(&mut self, pid: Pid, priority: i32) {
        self.ready.enqueue(priority, pid);
    }

    /// Next process still worth running. Terminated entries are dropped.
    pub fn next(&mut self, residents: &ResidentList) -> Option<Pid> {
        while let Some(pid) = self.ready.dequeue() {
            match residents.get(pid) {
                Some(pcb) if !pcb.is_terminated() => return Some(pid),
                _ => debug!("dropping pid {} from the ready queue", pid),
            }
        }
        None
    }

    pub fn remove(&mut self, pid: Pid) {
        self.ready.retain(|&queued| queued != pid);
    }

    /// Called by the dispatcher once a switch has happened.
    pub fn reset_burst(&mut self) {
        self.bursts = 0;
        self.switch_pending = false;
    }

    /// Per-tick check after a cycle: charges the tick to the running and
    /// ready processes and asks for a context switch when the current process
    /// ended or used up its quantum. A switch is requested only once.
    pub fn check(&mut self, cpu: &Cpu, residents: &mut ResidentList) -> Option<Irq> {
        let pid = cpu.current?;
        if self.switch_pending {
            return None;
        }

        let terminated = residents.get(pid).map_or(true, |pcb| pcb.is_terminated());
        if terminated {
            self.switch_pending = true;
            return Some(Irq::ContextSwitch);
        }

        if let Some(pcb) = residents.get_mut(pid) {
            pcb.time_spent_executing += 1;
        }
        for (_, &waiting) in self.ready.iter() {
            if let Some(pcb) = residents.get_mut(waiting) {
                if pcb.state == ProcessState::Ready {
                    pcb.wait_time += 1;
                }
            }
        }

        if self.algorithm == SchedulingAlgorithm::Priority {
            return None;
        }
        self.bursts = self.bursts.saturating_add(1);
        if self.bursts < self.quantum.active {
            return None;
        }
        if self.ready.is_empty() {
            debug!("pid {} is alone, quantum renewed", pid);
            self.bursts = 0;
            return None;
        }
        self.switch_pending = true;
        Some(Irq::ContextSwitch)
    }

    pub fn change_quantum(&mut self, quantum: u32) {
        match self.algorithm {
            SchedulingAlgorithm::Fcfs => self.quantum.shadow = quantum,
            _ => self.quantum.active = quantum,
        }
    }

    /// Switches policy. The ready queue is rebuilt under the new one; when
    /// Priority is entered or left every PCB trades its priority pair, so the
    /// user's value is never lost. Returns false if nothing changed.
    pub fn change_algorithm(&mut self, algorithm: SchedulingAlgorithm, residents: &mut ResidentList) -> bool {
        let old = self.algorithm;
        if old == algorithm {
            return false;
        }

        let queued: Vec<Pid> = self.ready.drain().into_iter().map(|(_, pid)| pid).collect();

        let is_fcfs = |candidate: SchedulingAlgorithm| candidate == SchedulingAlgorithm::Fcfs;
        if is_fcfs(old) != is_fcfs(algorithm) {
            self.quantum.swap();
        }
        let is_priority = |candidate: SchedulingAlgorithm| candidate == SchedulingAlgorithm::Priority;
        if is_priority(old) != is_priority(algorithm) {
            for pcb in residents.iter_mut() {
                pcb.priority.swap();
            }
        }

        self.algorithm = algorithm;
        self.bursts = 0;
        for pid in queued {
            if let Some(pcb) = residents.get(pid) {
                self.ready.enqueue(pcb.priority.active, pid);
            }
        }
        true
    }
}
