use log::{debug, warn};

use super::context::KernelContext;
use super::swapper::{SwapError, Swapper};
use super::{Pid, ProcessState};

pub struct Dispatcher;

impl Dispatcher {
    /// Saves the outgoing process, re-queueing it unless it has terminated,
    /// and attaches the next ready one. A process on the backing store is
    /// rolled into a free partition, or into one vacated by rolling out a
    /// victim. The CPU halts when nothing is left to run.
    pub fn context_switch(ctx: &mut KernelContext) {
        ctx.scheduler.reset_burst();

        if let Some((pid, registers)) = ctx.cpu.save_registers() {
            if let Some(pcb) = ctx.residents.get_mut(pid) {
                pcb.registers = registers;
                if !pcb.is_terminated() {
                    pcb.state = ProcessState::Ready;
                    ctx.scheduler.schedule(pid, pcb.priority.active);
                }
            }
        }

        while let Some(pid) = ctx.scheduler.next(&ctx.residents) {
            match Dispatcher::attach(ctx, pid) {
                Ok(()) => return,
                Err(err) => {
                    warn!("pid {} cannot run: {}", pid, err);
                    ctx.terminate(pid);
                    ctx.log(&format!("process {} terminated: {}", pid, err), "kernel");
                }
            }
        }

        debug!("ready queue empty, cpu halted");
        ctx.cpu.halt();
    }

    fn attach(ctx: &mut KernelContext, pid: Pid) -> Result<(), SwapError> {
        let on_backing_store = ctx
            .residents
            .get(pid)
            .map_or(false, |pcb| pcb.swap_file().is_some());
        if on_backing_store {
            Dispatcher::swap_in(ctx, pid)?;
        }

        let pcb = ctx.residents.get_mut(pid).ok_or(SwapError::NotInMemory(pid))?;
        if pcb.partition().is_none() {
            return Err(SwapError::NotInMemory(pid));
        }
        pcb.state = ProcessState::Running;
        ctx.cpu.load_registers(pid, pcb.registers);
        debug!("dispatched pid {}", pid);
        Ok(())
    }

    fn swap_in(ctx: &mut KernelContext, pid: Pid) -> Result<(), SwapError> {
        let size = ctx.residents.get(pid).map_or(0, |pcb| pcb.get_program_size());
        let placement = ctx.config.scheduler.placement;

        let partition = match ctx.memory.find_partition(placement, size) {
            Some(partition) => partition,
            None => {
                let victim = Dispatcher::select_victim(ctx, pid).ok_or(SwapError::NoRoom(pid))?;
                let pcb = ctx.residents.get_mut(victim).ok_or(SwapError::NoRoom(pid))?;
                let partition = pcb.partition().ok_or(SwapError::NotInMemory(victim))?;
                Swapper::roll_out(pcb, &mut ctx.memory, &mut ctx.disk)?;
                partition
            }
        };

        let pcb = ctx.residents.get_mut(pid).ok_or(SwapError::NotOnBackingStore(pid))?;
        Swapper::roll_in(pcb, partition, &mut ctx.memory, &mut ctx.disk)
    }

    /// The in-memory process that would run last: the tail-most one in the
    /// ready queue, else a loaded process nobody has started yet.
    fn select_victim(ctx: &KernelContext, incoming: Pid) -> Option<Pid> {
        let in_memory = |pid: Pid| {
            pid != incoming
                && ctx
                    .residents
                    .get(pid)
                    .map_or(false, |pcb| !pcb.is_terminated() && pcb.partition().is_some())
        };

        ctx.scheduler
            .ready_queue()
            .iter()
            .map(|(_, &pid)| pid)
            .filter(|&pid| in_memory(pid))
            .last()
            .or_else(|| {
                ctx.residents
                    .iter()
                    .filter(|pcb| pcb.state == ProcessState::Resident)
                    .map(|pcb| pcb.get_pid())
                    .filter(|&pid| in_memory(pid))
                    .last()
            })
    }
}
