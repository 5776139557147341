use std::collections::VecDeque;

use log::{debug, error, info, trace, warn};

use super::context::KernelContext;
use super::cpu::CpuFault;
use super::dispatcher::Dispatcher;
use super::interrupt::{DiskRequest, Irq, KeyEvent};
use super::long_term_scheduler::LongTermScheduler;
use super::memory::MemoryAccessor;
use super::{Pid, PriorityQueue, ProcessState, SchedulingAlgorithm};
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::io::{DiskDriver, LogSink};

const KERNEL: &str = "kernel";
const DISK: &str = "disk";

/// What one call to `tick` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Delivered the interrupt with this vector.
    Interrupt(u8),
    /// Ran one instruction of this process.
    Cycle(Pid),
    Idle,
    Halted,
}

/// The interrupt-driven kernel. Each `tick` delivers at most one pending
/// interrupt; only when none is pending does the CPU run a cycle.
pub struct Kernel {
    ctx: KernelContext,
    interrupts: PriorityQueue<Irq>,
    input: VecDeque<KeyEvent>,
    single_step: bool,
    next_step: bool,
    powered: bool,
}

impl Kernel {
    pub fn new(config: KernelConfig, sink: impl LogSink + 'static) -> Result<Kernel, KernelError> {
        let disk = DiskDriver::new(&config.disk);
        Kernel::with_disk(config, disk, sink)
    }

    pub fn with_disk(config: KernelConfig, disk: DiskDriver, sink: impl LogSink + 'static) -> Result<Kernel, KernelError> {
        config.validate()?;
        info!(
            "booting: {} partitions of {} bytes, {} disk blocks, {} scheduling",
            config.memory.partitions,
            config.memory.partition_size,
            config.disk.total_blocks(),
            config.scheduler.algorithm
        );

        Ok(Kernel {
            ctx: KernelContext::new(config, disk, Box::new(sink)),
            interrupts: PriorityQueue::new(),
            input: VecDeque::new(),
            single_step: false,
            next_step: false,
            powered: true,
        })
    }

    pub fn context(&self) -> &KernelContext {
        &self.ctx
    }

    pub fn disk(&self) -> &DiskDriver {
        &self.ctx.disk
    }

    pub fn is_running(&self) -> bool {
        self.powered
    }

    pub fn is_single_step(&self) -> bool {
        self.single_step
    }

    /// Nothing pending and nothing executing.
    pub fn is_idle(&self) -> bool {
        !self.powered || (self.interrupts.is_empty() && !self.ctx.cpu.is_executing)
    }

    pub fn pending_interrupts(&self) -> usize {
        self.interrupts.len()
    }

    pub fn enqueue(&mut self, irq: Irq) {
        trace!("queued {}", irq);
        self.interrupts.enqueue(irq.priority(), irq);
    }

    /// Entry point for the shell: decodes a raw vector and its parameters.
    /// Malformed parameters are refused here; an unknown vector is queued
    /// and traps when it is delivered.
    pub fn enqueue_event(&mut self, vector: u8, params: &[&str]) -> Result<(), KernelError> {
        if !self.powered {
            return Err(KernelError::Halted);
        }
        let irq = Irq::decode(vector, params)?;
        self.enqueue(irq);
        Ok(())
    }

    /// Key events delivered so far, oldest first.
    pub fn drain_input(&mut self) -> Vec<KeyEvent> {
        self.input.drain(..).collect()
    }

    pub fn load_program(&mut self, source: &str, priority: Option<i32>) -> Result<Pid, KernelError> {
        if !self.powered {
            return Err(KernelError::Halted);
        }
        match LongTermScheduler::load(&mut self.ctx, source, priority) {
            Ok(pid) => {
                self.ctx.log(&format!("loaded process {}", pid), KERNEL);
                Ok(pid)
            }
            Err(err) => {
                self.ctx.log(&format!("load failed: {}", err), KERNEL);
                Err(err.into())
            }
        }
    }

    /// Zeroes and frees every partition. Processes held in memory are
    /// terminated; returns how many.
    pub fn clear_memory(&mut self) -> Result<usize, KernelError> {
        if self.ctx.cpu.is_executing {
            let message = "cannot clear memory while a process is executing";
            self.ctx.log(message, KERNEL);
            return Err(KernelError::Refused(message.to_string()));
        }

        let in_memory: Vec<Pid> = self
            .ctx
            .residents
            .iter()
            .filter(|pcb| !pcb.is_terminated() && pcb.partition().is_some())
            .map(|pcb| pcb.get_pid())
            .collect();
        for &pid in &in_memory {
            self.ctx.terminate(pid);
        }
        for partition in 0..self.ctx.memory.volumes().len() {
            self.ctx.memory.clear(partition).map_err(|err| KernelError::Refused(err.to_string()))?;
            self.ctx.memory.write_unlock(partition).map_err(|err| KernelError::Refused(err.to_string()))?;
        }

        self.ctx.log(
            &format!("memory cleared, {} processes terminated", in_memory.len()),
            KERNEL,
        );
        Ok(in_memory.len())
    }

    pub fn shutdown(&mut self) {
        if !self.powered {
            return;
        }
        self.powered = false;
        self.ctx.cpu.halt();
        info!("kernel shut down after {} ticks", self.ctx.clock);
        self.ctx.log("kernel shut down", KERNEL);
    }

    /// One clock tick.
    pub fn tick(&mut self) -> Result<Tick, KernelError> {
        if !self.powered {
            return Ok(Tick::Halted);
        }
        self.ctx.clock += 1;

        if let Some(irq) = self.interrupts.dequeue() {
            let vector = irq.vector();
            self.dispatch(irq)?;
            return Ok(Tick::Interrupt(vector));
        }

        // A step granted while nothing runs is spent, not carried over.
        let step = std::mem::take(&mut self.next_step);
        if !self.ctx.cpu.is_executing || (self.single_step && !step) {
            return Ok(Tick::Idle);
        }
        Ok(self.execute().map_or(Tick::Idle, Tick::Cycle))
    }

    /// One CPU cycle for the attached process, then the scheduler check.
    fn execute(&mut self) -> Option<Pid> {
        let pid = self.ctx.cpu.current?;
        let partition = self
            .ctx
            .residents
            .get(pid)
            .filter(|pcb| !pcb.is_terminated())
            .map(|pcb| pcb.partition());

        let mut cycled = None;
        match partition {
            Some(Some(partition)) => {
                let result = match MemoryAccessor::new(&mut self.ctx.memory, partition) {
                    Ok(mut accessor) => self.ctx.cpu.cycle(&mut accessor),
                    Err(err) => Err(CpuFault::from(err)),
                };
                match result {
                    Ok(Some(irq)) => self.enqueue(irq),
                    Ok(None) => {}
                    Err(fault) => self.fault(pid, &fault.to_string()),
                }
                cycled = Some(pid);
            }
            Some(None) => self.fault(pid, "image is not in memory"),
            None => {}
        }

        if let Some(irq) = self.ctx.scheduler.check(&self.ctx.cpu, &mut self.ctx.residents) {
            self.enqueue(irq);
        }
        cycled
    }

    fn fault(&mut self, pid: Pid, reason: &str) {
        warn!("pid {} faulted: {}", pid, reason);
        if self.ctx.terminate(pid) {
            self.ctx.log(&format!("process {} terminated: {}", pid, reason), KERNEL);
        }
    }

    fn dispatch(&mut self, irq: Irq) -> Result<(), KernelError> {
        debug!("tick {}: dispatching {}", self.ctx.clock, irq);
        match irq {
            Irq::Timer => {}
            Irq::Keyboard(event) => self.input.push_back(event),
            Irq::Disk(request) => self.disk_request(request),
            Irq::Syscall { pid, x, y } => self.syscall(pid, x, y),
            Irq::ProcessStatus => self.process_status(),
            Irq::SingleStep => {
                self.single_step = !self.single_step;
                self.next_step = false;
                let state = if self.single_step { "on" } else { "off" };
                self.ctx.log(&format!("single step {}", state), KERNEL);
            }
            Irq::NextStep => {
                if self.single_step {
                    self.next_step = true;
                }
            }
            Irq::ContextSwitch => Dispatcher::context_switch(&mut self.ctx),
            Irq::ChangeQuantum(quantum) => self.change_quantum(quantum),
            Irq::RunProcess(pid) => self.run_process(pid),
            Irq::RunAllProcesses => self.run_all(),
            Irq::SetScheduleAlgorithm(algorithm) => self.set_schedule_algorithm(algorithm),
            Irq::TerminateProcess(pid) => self.finish(pid),
            Irq::KillProcess(pid) => self.kill(pid),
            Irq::KillAll => {
                let live: Vec<Pid> = self
                    .ctx
                    .residents
                    .iter()
                    .filter(|pcb| !pcb.is_terminated())
                    .map(|pcb| pcb.get_pid())
                    .collect();
                for pid in &live {
                    self.kill(*pid);
                }
                self.ctx.log(&format!("killed {} processes", live.len()), KERNEL);
            }
            Irq::Unrecognized(vector) => return Err(self.trap(vector)),
        }
        Ok(())
    }

    fn trap(&mut self, vector: u8) -> KernelError {
        let message = format!("no handler for interrupt vector {}", vector);
        error!("{}", message);
        self.ctx.log(&format!("fatal trap: {}", message), KERNEL);
        self.shutdown();
        KernelError::Trap(message)
    }

    fn syscall(&mut self, pid: Pid, x: u8, y: u8) {
        let Some(pcb) = self.ctx.residents.get(pid) else {
            return;
        };
        if pcb.is_terminated() {
            return;
        }

        let text = match x {
            1 => y.to_string(),
            2 => match self.ctx.process_image(pid) {
                Ok(image) => image
                    .iter()
                    .skip(y as usize)
                    .take_while(|&&byte| byte != 0)
                    .map(|&byte| byte as char)
                    .collect(),
                Err(err) => {
                    self.fault(pid, &err.to_string());
                    return;
                }
            },
            other => {
                warn!("pid {} made unknown system call {}", pid, other);
                self.ctx.log(&format!("process {}: unknown system call {}", pid, other), KERNEL);
                return;
            }
        };

        if let Some(pcb) = self.ctx.residents.get_mut(pid) {
            pcb.output_buffer.push_str(&text);
        }
        self.ctx.log(&text, &format!("pid {}", pid));
    }

    fn process_status(&mut self) {
        if self.ctx.residents.is_empty() {
            self.ctx.log("no processes", "ps");
            return;
        }
        let lines: Vec<String> = self
            .ctx
            .residents
            .iter()
            .map(|pcb| {
                format!(
                    "pid {:>3}  {:<10}  priority {:>3}  {:<16}  pc {:#06x}  wait {:>5}  exec {:>5}",
                    pcb.get_pid(),
                    pcb.state.to_string(),
                    pcb.priority.active,
                    pcb.location.to_string(),
                    pcb.registers.pc,
                    pcb.wait_time,
                    pcb.time_spent_executing
                )
            })
            .collect();
        for line in lines {
            self.ctx.log(&line, "ps");
        }
    }

    fn change_quantum(&mut self, quantum: u32) {
        if quantum == 0 {
            self.ctx.log("quantum must be at least one burst", KERNEL);
            return;
        }
        self.ctx.scheduler.change_quantum(quantum);
        self.ctx.log(&format!("quantum set to {}", quantum), KERNEL);
    }

    fn set_schedule_algorithm(&mut self, algorithm: SchedulingAlgorithm) {
        if !self.ctx.scheduler.change_algorithm(algorithm, &mut self.ctx.residents) {
            self.ctx.log(&format!("scheduling is already {}", algorithm), KERNEL);
            return;
        }
        self.ctx.log(&format!("scheduling set to {}", algorithm), KERNEL);
        if self.ctx.cpu.current.is_some() {
            Dispatcher::context_switch(&mut self.ctx);
        }
    }

    fn schedule(&mut self, pid: Pid) -> bool {
        let Some(pcb) = self.ctx.residents.get_mut(pid) else {
            return false;
        };
        if pcb.state != ProcessState::Resident {
            return false;
        }
        pcb.state = ProcessState::Ready;
        let priority = pcb.priority.active;
        self.ctx.scheduler.schedule(pid, priority);
        true
    }

    fn start_if_idle(&mut self) {
        if !self.ctx.cpu.is_executing {
            Dispatcher::context_switch(&mut self.ctx);
        }
    }

    fn run_process(&mut self, pid: Pid) {
        let message = match self.ctx.residents.get(pid).map(|pcb| pcb.state) {
            None => format!("no process with pid {}", pid),
            Some(ProcessState::Terminated) => format!("process {} has terminated", pid),
            Some(ProcessState::Ready | ProcessState::Running) => format!("process {} is already running", pid),
            Some(ProcessState::New) => format!("process {} is not loaded", pid),
            Some(ProcessState::Resident) => {
                self.schedule(pid);
                self.start_if_idle();
                format!("running process {}", pid)
            }
        };
        self.ctx.log(&message, KERNEL);
    }

    fn run_all(&mut self) {
        let scheduled = self
            .ctx
            .residents
            .pids()
            .into_iter()
            .filter(|&pid| self.schedule(pid))
            .count();
        if scheduled == 0 {
            self.ctx.log("no resident processes to run", KERNEL);
            return;
        }
        self.start_if_idle();
        self.ctx.log(&format!("running {} processes", scheduled), KERNEL);
    }

    /// A process ran `BRK`.
    fn finish(&mut self, pid: Pid) {
        if !self.ctx.terminate(pid) {
            return;
        }
        if let Some(pcb) = self.ctx.residents.get(pid) {
            let message = format!(
                "process {} finished: turnaround {}, waited {}",
                pid,
                pcb.turnaround_time(),
                pcb.wait_time
            );
            self.ctx.log(&message, KERNEL);
        }
    }

    fn kill(&mut self, pid: Pid) {
        let message = match self.ctx.residents.get(pid).map(|pcb| pcb.state) {
            None => format!("no process with pid {}", pid),
            Some(ProcessState::Terminated) => format!("process {} is already terminated", pid),
            Some(state) => {
                self.ctx.terminate(pid);
                format!("killed {} process {}", state, pid)
            }
        };
        self.ctx.log(&message, KERNEL);
    }

    fn disk_request(&mut self, request: DiskRequest) {
        let result = match request {
            DiskRequest::Format { quick } => self.format(quick),
            DiskRequest::Create(name) => self
                .ctx
                .disk
                .create(&name)
                .map(|_| vec![format!("created {}", name)])
                .map_err(|err| err.to_string()),
            DiskRequest::Write { name, data } => self
                .ctx
                .disk
                .write(&name, data.as_bytes())
                .map(|_| vec![format!("wrote {} bytes to {}", data.len(), name)])
                .map_err(|err| err.to_string()),
            DiskRequest::Read(name) => self
                .ctx
                .disk
                .read(&name)
                .map(|data| vec![String::from_utf8_lossy(&data).into_owned()])
                .map_err(|err| err.to_string()),
            DiskRequest::Delete(name) => self
                .ctx
                .disk
                .delete(&name)
                .map(|_| vec![format!("deleted {}", name)])
                .map_err(|err| err.to_string()),
            DiskRequest::Recover(name) => self
                .ctx
                .disk
                .recover(&name)
                .map(|recovered| vec![format!("recovered {} as {}", name, recovered)])
                .map_err(|err| err.to_string()),
            DiskRequest::Rename { from, to } => self
                .ctx
                .disk
                .rename(&from, &to)
                .map(|_| vec![format!("renamed {} to {}", from, to)])
                .map_err(|err| err.to_string()),
            DiskRequest::Copy { from, to } => self
                .ctx
                .disk
                .copy(&from, &to)
                .map(|_| vec![format!("copied {} to {}", from, to)])
                .map_err(|err| err.to_string()),
            DiskRequest::List { all, long } => self.list(all, long),
            DiskRequest::Defragment => self.defragment(),
        };

        match result {
            Ok(lines) => {
                for line in lines {
                    self.ctx.log(&line, DISK);
                }
            }
            Err(message) => {
                warn!("disk request refused: {}", message);
                self.ctx.log(&message, DISK);
            }
        }
    }

    fn format(&mut self, quick: bool) -> Result<Vec<String>, String> {
        if self.ctx.cpu.is_executing {
            return Err("cannot format while processes are running".to_string());
        }
        if let Some(pid) = self.ctx.swapped_out().first() {
            return Err(format!("cannot format: process {} is on the backing store", pid));
        }
        self.ctx.disk.format(quick);
        Ok(vec![format!("disk formatted ({})", if quick { "quick" } else { "full" })])
    }

    fn list(&self, all: bool, long: bool) -> Result<Vec<String>, String> {
        let files = self.ctx.disk.list(all).map_err(|err| err.to_string())?;
        if files.is_empty() {
            return Ok(vec!["no files".to_string()]);
        }
        Ok(files
            .into_iter()
            .map(|file| {
                if !long {
                    return file.name;
                }
                let created = file
                    .created
                    .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!("{:<20} {:>6} bytes  {}", file.name, file.size, created)
            })
            .collect())
    }

    fn defragment(&mut self) -> Result<Vec<String>, String> {
        if self.ctx.cpu.is_executing {
            return Err("cannot defragment while a process is executing".to_string());
        }
        if self.single_step {
            return Err("cannot defragment in single step mode".to_string());
        }
        let report = self.ctx.disk.defragment().map_err(|err| err.to_string())?;
        Ok(vec![format!(
            "defragmented: {} blocks moved, {} live",
            report.moved, report.live_blocks
        )])
    }
}
