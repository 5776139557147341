pub mod context;
pub mod cpu;
pub mod dispatcher;
pub mod driver;
pub mod interrupt;
pub mod long_term_scheduler;
pub mod memory;
pub mod priority_queue;
pub mod process_control_block;
pub mod resident_list;
pub mod short_term_scheduler;
pub mod swapper;

pub use context::KernelContext;
pub use cpu::{Cpu, CpuFault, Opcode};
pub use driver::{Kernel, Tick};
pub use interrupt::{DiskRequest, EventError, Irq, KeyEvent};
pub use long_term_scheduler::{LoaderError, LongTermScheduler};
pub use memory::{MemoryAccessor, MemoryError, MemoryManager, Placement, Volume};
pub use priority_queue::PriorityQueue;
pub use process_control_block::{Location, Pid, PriorityPair, ProcessControlBlock, ProcessState, Registers};
pub use resident_list::ResidentList;
pub use short_term_scheduler::{SchedulingAlgorithm, ShortTermScheduler};
pub use swapper::{SwapError, Swapper};
