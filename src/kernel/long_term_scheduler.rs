use log::info;
use thiserror::Error;

use super::context::KernelContext;
use super::memory::MemoryError;
use super::swapper::{SwapError, Swapper};
use super::{Location, Pid, PriorityPair, ProcessControlBlock, ProcessState, SchedulingAlgorithm};
use crate::io::{parse_program, LoadError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error(transparent)]
    Program(#[from] LoadError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("memory is full and the program could not be swapped out: {0}")]
    Swap(#[from] SwapError),
}

/// Admits programs into the machine. A program goes into a free partition
/// when one fits and straight to the backing store otherwise; either way it
/// waits as Resident until it is run.
pub struct LongTermScheduler;

impl LongTermScheduler {
    pub fn load(ctx: &mut KernelContext, source: &str, priority: Option<i32>) -> Result<Pid, LoaderError> {
        let program = parse_program(source)?;
        let capacity = ctx.config.memory.partition_size;
        if program.len() > capacity {
            return Err(LoadError::TooLarge {
                size: program.len(),
                capacity,
            }
            .into());
        }

        let scheduling = &ctx.config.scheduler;
        let mut priority = PriorityPair {
            active: scheduling.default_priority,
            shadow: priority.unwrap_or(scheduling.user_priority),
        };
        if ctx.scheduler.algorithm() == SchedulingAlgorithm::Priority {
            priority.swap();
        }

        let placement = scheduling.placement;
        let location = match ctx.memory.find_partition(placement, program.len()) {
            Some(partition) => {
                ctx.memory.load_image(partition, &program)?;
                ctx.memory.write_lock(partition)?;
                Location::Memory(partition)
            }
            None => {
                let pid = ctx.residents.peek_pid();
                Location::BackingStore(Swapper::store(pid, &program, &mut ctx.disk)?)
            }
        };

        let pid = ctx.residents.next_pid();
        let mut pcb = ProcessControlBlock::new(pid, priority, program.len());
        pcb.location = location;
        pcb.state = ProcessState::Resident;
        info!("loaded pid {} ({} bytes) into {}", pid, program.len(), pcb.location);
        ctx.residents.insert(pcb);
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::io::{DiskDriver, DiskError, MemorySink};

    fn context(formatted: bool) -> KernelContext {
        let config = KernelConfig::default();
        let mut disk = DiskDriver::new(&config.disk);
        if formatted {
            disk.format(true);
        }
        KernelContext::new(config, disk, Box::new(MemorySink::new()))
    }

    #[test]
    fn test_long_term_scheduler_load_into_memory() {
        let mut ctx = context(false);
        let pid = LongTermScheduler::load(&mut ctx, "A9 01 00", Some(4)).unwrap();

        let pcb = ctx.residents.get(pid).unwrap();
        assert_eq!(pid, 0);
        assert_eq!(pcb.state, ProcessState::Resident);
        assert_eq!(pcb.location, Location::Memory(0));
        assert_eq!(pcb.priority, PriorityPair { active: 0, shadow: 4 });
        assert!(!ctx.memory.volume(0).unwrap().write_enabled);
        assert_eq!(ctx.memory.read_from(0), Some(0xA9));
    }

    #[test]
    fn test_long_term_scheduler_overflows_to_backing_store() {
        let mut ctx = context(true);
        for _ in 0..3 {
            LongTermScheduler::load(&mut ctx, "EA 00", None).unwrap();
        }
        let pid = LongTermScheduler::load(&mut ctx, "EA 00", None).unwrap();

        let pcb = ctx.residents.get(pid).unwrap();
        assert_eq!(pcb.location, Location::BackingStore(".swap3".into()));
        assert_eq!(ctx.process_image(pid).unwrap(), vec![0xEA, 0x00]);
    }

    #[test]
    fn test_long_term_scheduler_needs_formatted_disk_when_memory_is_full() {
        let mut ctx = context(false);
        for _ in 0..3 {
            LongTermScheduler::load(&mut ctx, "00", None).unwrap();
        }
        let result = LongTermScheduler::load(&mut ctx, "00", None);

        assert_eq!(result, Err(LoaderError::Swap(SwapError::Disk(DiskError::Unformatted))));
        assert_eq!(ctx.residents.len(), 3);
        assert_eq!(ctx.residents.peek_pid(), 3);
    }

    #[test]
    fn test_long_term_scheduler_priority_mode_activates_user_priority() {
        let mut config = KernelConfig::default();
        config.scheduler.algorithm = SchedulingAlgorithm::Priority;
        let disk = DiskDriver::new(&config.disk);
        let mut ctx = KernelContext::new(config, disk, Box::new(MemorySink::new()));

        let pid = LongTermScheduler::load(&mut ctx, "00", None).unwrap();
        assert_eq!(ctx.residents.get(pid).unwrap().priority, PriorityPair { active: 32, shadow: 0 });
    }

    #[test]
    fn test_long_term_scheduler_rejects_bad_programs() {
        let mut ctx = context(true);
        let oversized = vec!["EA"; 257].join(" ");

        assert_eq!(
            LongTermScheduler::load(&mut ctx, &oversized, None),
            Err(LoaderError::Program(LoadError::TooLarge { size: 257, capacity: 256 }))
        );
        assert!(matches!(
            LongTermScheduler::load(&mut ctx, "A9 XY", None),
            Err(LoaderError::Program(LoadError::InvalidHex(_)))
        ));
        assert!(ctx.residents.is_empty());
    }
}
