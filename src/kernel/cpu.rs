use std::fmt;

use log::trace;
use thiserror::Error;

use super::memory::{MemoryAccessor, MemoryError};
use super::{Irq, Pid, Registers};
use crate::config::MAX_ADDRESSABLE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CpuFault {
    #[error("invalid opcode {opcode:#04x} at {pc:#06x}")]
    InvalidOpcode { opcode: u8, pc: u16 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("no process is attached to the cpu")]
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LoadAccImmediate,
    LoadAccMemory,
    StoreAcc,
    AddWithCarry,
    LoadXImmediate,
    LoadXMemory,
    LoadYImmediate,
    LoadYMemory,
    NoOperation,
    Break,
    CompareX,
    BranchNotEqual,
    Increment,
    SystemCall,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let opcode = match byte {
            0xA9 => Opcode::LoadAccImmediate,
            0xAD => Opcode::LoadAccMemory,
            0x8D => Opcode::StoreAcc,
            0x6D => Opcode::AddWithCarry,
            0xA2 => Opcode::LoadXImmediate,
            0xAE => Opcode::LoadXMemory,
            0xA0 => Opcode::LoadYImmediate,
            0xAC => Opcode::LoadYMemory,
            0xEA => Opcode::NoOperation,
            0x00 => Opcode::Break,
            0xEC => Opcode::CompareX,
            0xD0 => Opcode::BranchNotEqual,
            0xEE => Opcode::Increment,
            0xFF => Opcode::SystemCall,
            other => return Err(other),
        };
        Ok(opcode)
    }
}

impl Opcode {
    /// Operand bytes following the opcode.
    pub fn operand_width(self) -> u16 {
        match self {
            Opcode::LoadAccImmediate | Opcode::LoadXImmediate | Opcode::LoadYImmediate | Opcode::BranchNotEqual => 1,
            Opcode::LoadAccMemory
            | Opcode::StoreAcc
            | Opcode::AddWithCarry
            | Opcode::LoadXMemory
            | Opcode::LoadYMemory
            | Opcode::CompareX
            | Opcode::Increment => 2,
            Opcode::NoOperation | Opcode::Break | Opcode::SystemCall => 0,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::LoadAccImmediate | Opcode::LoadAccMemory => "LDA",
            Opcode::StoreAcc => "STA",
            Opcode::AddWithCarry => "ADC",
            Opcode::LoadXImmediate | Opcode::LoadXMemory => "LDX",
            Opcode::LoadYImmediate | Opcode::LoadYMemory => "LDY",
            Opcode::NoOperation => "NOP",
            Opcode::Break => "BRK",
            Opcode::CompareX => "CPX",
            Opcode::BranchNotEqual => "BNE",
            Opcode::Increment => "INC",
            Opcode::SystemCall => "SYS",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The register file plus the executing gate. The CPU never owns a process:
/// `current` names the PCB the dispatcher attached.
#[derive(Debug, Default)]
pub struct Cpu {
    pub registers: Registers,
    pub is_executing: bool,
    pub current: Option<Pid>,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu::default()
    }

    pub fn load_registers(&mut self, pid: Pid, registers: Registers) {
        self.registers = registers;
        self.current = Some(pid);
        self.is_executing = true;
    }

    /// Detaches the current process, handing back its registers.
    pub fn save_registers(&mut self) -> Option<(Pid, Registers)> {
        let pid = self.current.take()?;
        Some((pid, self.registers))
    }

    pub fn halt(&mut self) {
        self.current = None;
        self.is_executing = false;
        self.registers = Registers::default();
    }

    /// Runs one instruction of the attached process. Break and system call
    /// come back as interrupts for the kernel to deliver on a later tick.
    /// On a fault no memory has been written.
    pub fn cycle(&mut self, memory: &mut MemoryAccessor) -> Result<Option<Irq>, CpuFault> {
        let pid = self.current.ok_or(CpuFault::Idle)?;
        let opcode = self.fetch(memory)?;
        trace!("pid {} pc {:#06x}: {}", pid, self.registers.pc, opcode);
        self.decode(pid, opcode, memory)
    }

    fn fetch(&mut self, memory: &MemoryAccessor) -> Result<Opcode, CpuFault> {
        let pc = self.registers.pc;
        self.registers.ir = memory.read(pc as usize)?;
        Opcode::try_from(self.registers.ir).map_err(|opcode| CpuFault::InvalidOpcode { opcode, pc })
    }

    fn decode(&mut self, pid: Pid, opcode: Opcode, memory: &mut MemoryAccessor) -> Result<Option<Irq>, CpuFault> {
        let mut interrupt = None;
        let mut next_pc = self.registers.pc + 1 + opcode.operand_width();

        match opcode {
            Opcode::LoadAccImmediate => self.registers.acc = self.immediate(memory)?,
            Opcode::LoadAccMemory => self.registers.acc = memory.read(self.address(memory)?)?,
            Opcode::StoreAcc => {
                let address = self.address(memory)?;
                memory.write(address, self.registers.acc)?;
            }
            Opcode::AddWithCarry => {
                let value = memory.read(self.address(memory)?)?;
                self.registers.acc = self.registers.acc.wrapping_add(value);
            }
            Opcode::LoadXImmediate => self.registers.x = self.immediate(memory)?,
            Opcode::LoadXMemory => self.registers.x = memory.read(self.address(memory)?)?,
            Opcode::LoadYImmediate => self.registers.y = self.immediate(memory)?,
            Opcode::LoadYMemory => self.registers.y = memory.read(self.address(memory)?)?,
            Opcode::NoOperation => {}
            Opcode::Break => interrupt = Some(Irq::TerminateProcess(pid)),
            Opcode::CompareX => {
                let value = memory.read(self.address(memory)?)?;
                self.registers.zflag = value == self.registers.x;
            }
            Opcode::BranchNotEqual => {
                let offset = self.immediate(memory)?;
                if !self.registers.zflag {
                    next_pc = (next_pc + offset as u16) % MAX_ADDRESSABLE as u16;
                }
            }
            Opcode::Increment => {
                let address = self.address(memory)?;
                let value = memory.read(address)?;
                memory.write(address, value.wrapping_add(1))?;
            }
            Opcode::SystemCall => {
                interrupt = Some(Irq::Syscall {
                    pid,
                    x: self.registers.x,
                    y: self.registers.y,
                })
            }
        }

        self.registers.pc = next_pc;
        Ok(interrupt)
    }

    fn immediate(&self, memory: &MemoryAccessor) -> Result<u8, CpuFault> {
        Ok(memory.read(self.registers.pc as usize + 1)?)
    }

    /// Two operand bytes, low byte first.
    fn address(&self, memory: &MemoryAccessor) -> Result<usize, CpuFault> {
        let pc = self.registers.pc as usize;
        let low = memory.read(pc + 1)? as usize;
        let high = memory.read(pc + 2)? as usize;
        Ok(high << 8 | low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::kernel::memory::MemoryManager;

    fn machine(program: &[u8]) -> (Cpu, MemoryManager) {
        let mut memory = MemoryManager::new(&MemoryConfig::default());
        memory.load_image(1, program).unwrap();
        let mut cpu = Cpu::new();
        cpu.load_registers(7, Registers::default());
        (cpu, memory)
    }

    fn run(cpu: &mut Cpu, memory: &mut MemoryManager, cycles: usize) -> Vec<Irq> {
        let mut accessor = MemoryAccessor::new(memory, 1).unwrap();
        (0..cycles)
            .filter_map(|_| cpu.cycle(&mut accessor).unwrap())
            .collect()
    }

    #[test]
    fn test_cpu_pc_advances_by_operand_width() {
        let program = [0xA9, 0x05, 0xEA, 0x8D, 0x20, 0x00, 0xA2, 0x01];
        let (mut cpu, mut memory) = machine(&program);

        let mut pcs = Vec::new();
        let mut accessor = MemoryAccessor::new(&mut memory, 1).unwrap();
        for _ in 0..4 {
            cpu.cycle(&mut accessor).unwrap();
            pcs.push(cpu.registers.pc);
        }
        assert_eq!(pcs, vec![2, 3, 6, 8]);
        assert_eq!(accessor.read(0x20), Ok(5));
        assert_eq!(cpu.registers.x, 1);
    }

    #[test]
    fn test_cpu_load_add_store() {
        // LDA #2; STA $0030; ADC $0030; STA $0031; LDY $0031
        let program = [0xA9, 0x02, 0x8D, 0x30, 0x00, 0x6D, 0x30, 0x00, 0x8D, 0x31, 0x00, 0xAC, 0x31, 0x00];
        let (mut cpu, mut memory) = machine(&program);
        run(&mut cpu, &mut memory, 5);

        assert_eq!(cpu.registers.acc, 4);
        assert_eq!(cpu.registers.y, 4);
        assert_eq!(memory.read_from(256 + 0x31), Some(4));
    }

    #[test]
    fn test_cpu_operands_are_low_byte_first() {
        let mut program = vec![0xAD, 0x10, 0x00];
        program.resize(0x10, 0xEA);
        program.push(0x42);
        let (mut cpu, mut memory) = machine(&program);
        run(&mut cpu, &mut memory, 1);
        assert_eq!(cpu.registers.acc, 0x42);
    }

    #[test]
    fn test_cpu_loop_with_compare_and_branch() {
        // 00: LDX #3
        // 02: INC $0020
        // 05: CPX $0020
        // 08: BNE -8 (to 02)
        // 0A: BRK
        let program = [0xA2, 0x03, 0xEE, 0x20, 0x00, 0xEC, 0x20, 0x00, 0xD0, 0xF8, 0x00];
        let (mut cpu, mut memory) = machine(&program);

        let interrupts = run(&mut cpu, &mut memory, 1 + 3 * 3 + 1);
        assert_eq!(memory.read_from(256 + 0x20), Some(3));
        assert!(cpu.registers.zflag);
        assert_eq!(interrupts, vec![Irq::TerminateProcess(7)]);
    }

    #[test]
    fn test_cpu_branch_wraps_around() {
        let mut program = vec![0xEA; 0xFE];
        program.extend([0xD0, 0x05]);
        let (mut cpu, mut memory) = machine(&program);
        cpu.registers.pc = 0xFE;
        run(&mut cpu, &mut memory, 1);
        assert_eq!(cpu.registers.pc, 0x05);
    }

    #[test]
    fn test_cpu_system_call_reports_registers() {
        let program = [0xA2, 0x01, 0xA0, 0x09, 0xFF];
        let (mut cpu, mut memory) = machine(&program);
        let interrupts = run(&mut cpu, &mut memory, 3);
        assert_eq!(interrupts, vec![Irq::Syscall { pid: 7, x: 1, y: 9 }]);
        assert_eq!(cpu.registers.pc, 5);
    }

    #[test]
    fn test_cpu_invalid_opcode_leaves_memory_unchanged() {
        let program = [0xA9, 0x01, 0x13, 0x8D, 0x00, 0x00];
        let (mut cpu, mut memory) = machine(&program);
        let before = memory.read_image(1).unwrap();

        let mut accessor = MemoryAccessor::new(&mut memory, 1).unwrap();
        cpu.cycle(&mut accessor).unwrap();
        let fault = cpu.cycle(&mut accessor);

        assert_eq!(fault, Err(CpuFault::InvalidOpcode { opcode: 0x13, pc: 2 }));
        assert_eq!(memory.read_image(1).unwrap(), before);
    }

    #[test]
    fn test_cpu_store_out_of_range_faults() {
        let program = [0x8D, 0x00, 0x01];
        let (mut cpu, mut memory) = machine(&program);
        let mut accessor = MemoryAccessor::new(&mut memory, 1).unwrap();
        let fault = cpu.cycle(&mut accessor);
        assert!(matches!(fault, Err(CpuFault::Memory(MemoryError::Unaddressable { address: 0x100, .. }))));
        assert_eq!(memory.read_from(512), Some(0));
    }

    #[test]
    fn test_cpu_idle_cycle_faults() {
        let mut memory = MemoryManager::new(&MemoryConfig::default());
        let mut accessor = MemoryAccessor::new(&mut memory, 0).unwrap();
        let mut cpu = Cpu::new();
        assert_eq!(cpu.cycle(&mut accessor), Err(CpuFault::Idle));
    }

    #[test]
    fn test_cpu_save_registers_detaches() {
        let mut cpu = Cpu::new();
        let registers = Registers { pc: 4, acc: 9, ..Registers::default() };
        cpu.load_registers(2, registers);
        assert_eq!(cpu.save_registers(), Some((2, registers)));
        assert_eq!(cpu.current, None);
        assert_eq!(cpu.save_registers(), None);
    }
}
