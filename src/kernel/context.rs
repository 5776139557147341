use log::warn;

use super::memory::MemoryManager;
use super::swapper::{SwapError, Swapper};
use super::{Cpu, Pid, ProcessState, ResidentList, ShortTermScheduler};
use crate::config::KernelConfig;
use crate::io::{DiskDriver, LogSink};

/// Everything the kernel's subsystems share. One of these is built at boot
/// and handed by reference to whichever component needs it.
pub struct KernelContext {
    pub config: KernelConfig,
    pub cpu: Cpu,
    pub memory: MemoryManager,
    pub disk: DiskDriver,
    pub residents: ResidentList,
    pub scheduler: ShortTermScheduler,
    pub clock: u64,
    sink: Box<dyn LogSink>,
}

impl KernelContext {
    pub fn new(config: KernelConfig, disk: DiskDriver, sink: Box<dyn LogSink>) -> KernelContext {
        KernelContext {
            cpu: Cpu::new(),
            memory: MemoryManager::new(&config.memory),
            disk,
            residents: ResidentList::new(),
            scheduler: ShortTermScheduler::new(config.scheduler.algorithm, config.scheduler.quantum),
            clock: 0,
            sink,
            config,
        }
    }

    pub fn log(&mut self, message: &str, source: &str) {
        self.sink.write(message, source);
    }

    /// Marks a process terminated and gives its partition or swap file back
    /// straight away. Returns false if it was already terminated or unknown.
    /// A process still attached to the CPU stays attached until the next
    /// scheduler check switches it out.
    pub fn terminate(&mut self, pid: Pid) -> bool {
        let Some(pcb) = self.residents.get_mut(pid) else {
            return false;
        };
        if pcb.is_terminated() {
            return false;
        }

        pcb.state = ProcessState::Terminated;
        if let Err(err) = Swapper::release(pcb, &mut self.memory, &mut self.disk) {
            warn!("pid {} terminated but its storage was not released: {}", pid, err);
        }
        self.scheduler.remove(pid);
        true
    }

    pub fn process_image(&self, pid: Pid) -> Result<Vec<u8>, SwapError> {
        let pcb = self.residents.get(pid).ok_or(SwapError::NotInMemory(pid))?;
        Swapper::image(pcb, &self.memory, &self.disk)
    }

    /// Live processes whose image sits in a swap file.
    pub fn swapped_out(&self) -> Vec<Pid> {
        self.residents
            .iter()
            .filter(|pcb| !pcb.is_terminated() && pcb.swap_file().is_some())
            .map(|pcb| pcb.get_pid())
            .collect()
    }
}
