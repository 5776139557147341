use std::fmt;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Resident,
    Ready,
    Running,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::New => "new",
            ProcessState::Resident => "resident",
            ProcessState::Ready => "ready",
            ProcessState::Running => "running",
            ProcessState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Where a process image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Index of the memory partition holding the image.
    Memory(usize),
    /// Rolled out to the named swap file.
    BackingStore(String),
    /// Terminated processes hold no storage.
    Released,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Memory(partition) => write!(f, "partition {}", partition),
            Location::BackingStore(file) => write!(f, "disk ({})", file),
            Location::Released => f.write_str("-"),
        }
    }
}

/// The user's priority and the shared round-robin priority. Only `active`
/// orders the ready queue; `swap` toggles between the two regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityPair {
    pub active: i32,
    pub shadow: i32,
}

impl PriorityPair {
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.shadow);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub pc: u16,
    pub ir: u8,
    pub acc: u8,
    pub x: u8,
    pub y: u8,
    pub zflag: bool,
}

pub struct ProcessControlBlock {
    pub registers: Registers,
    pub state: ProcessState,
    pub priority: PriorityPair,
    pub location: Location,

    pub wait_time: u64,
    pub time_spent_executing: u64,
    pub output_buffer: String,

    pid: Pid,
    program_size: usize,
}

impl ProcessControlBlock {
    pub fn new(pid: Pid, priority: PriorityPair, program_size: usize) -> ProcessControlBlock {
        ProcessControlBlock {
            registers: Registers::default(),
            state: ProcessState::New,
            priority,
            location: Location::Released,
            wait_time: 0,
            time_spent_executing: 0,
            output_buffer: String::new(),
            pid,
            program_size,
        }
    }

    pub fn get_pid(&self) -> Pid {
        self.pid
    }

    pub fn get_program_size(&self) -> usize {
        self.program_size
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ProcessState::Terminated
    }

    pub fn partition(&self) -> Option<usize> {
        match self.location {
            Location::Memory(partition) => Some(partition),
            _ => None,
        }
    }

    pub fn swap_file(&self) -> Option<&str> {
        match &self.location {
            Location::BackingStore(file) => Some(file),
            _ => None,
        }
    }

    pub fn turnaround_time(&self) -> u64 {
        self.wait_time + self.time_spent_executing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_pair_swap_round_trips() {
        let mut priority = PriorityPair { active: 0, shadow: 7 };
        priority.swap();
        assert_eq!(priority, PriorityPair { active: 7, shadow: 0 });
        priority.swap();
        assert_eq!(priority, PriorityPair { active: 0, shadow: 7 });
    }

    #[test]
    fn test_pcb_new_starts_unplaced() {
        let pcb = ProcessControlBlock::new(4, PriorityPair { active: 0, shadow: 32 }, 12);
        assert_eq!(pcb.get_pid(), 4);
        assert_eq!(pcb.get_program_size(), 12);
        assert_eq!(pcb.state, ProcessState::New);
        assert_eq!(pcb.partition(), None);
        assert_eq!(pcb.swap_file(), None);
        assert_eq!(pcb.registers, Registers::default());
    }

    #[test]
    fn test_pcb_location_accessors() {
        let mut pcb = ProcessControlBlock::new(1, PriorityPair { active: 0, shadow: 0 }, 1);
        pcb.location = Location::Memory(2);
        assert_eq!(pcb.partition(), Some(2));
        pcb.location = Location::BackingStore(".swap1".into());
        assert_eq!(pcb.swap_file(), Some(".swap1"));
        assert_eq!(pcb.partition(), None);
    }
}
