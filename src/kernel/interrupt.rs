use std::fmt;

use thiserror::Error;

use super::{Pid, SchedulingAlgorithm};

/// Priority of routine events. Lower values are delivered first.
pub const ROUTINE_PRIORITY: i32 = 1;
/// Priority of scheduling-policy changes, delivered behind routine events.
pub const POLICY_PRIORITY: i32 = 2;

/// A logical key event, already decoded by the keyboard collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Char(char),
    Enter,
    Backspace,
    Command(String),
}

/// A filesystem request from the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskRequest {
    Format { quick: bool },
    Create(String),
    Write { name: String, data: String },
    Read(String),
    Delete(String),
    Recover(String),
    Rename { from: String, to: String },
    Copy { from: String, to: String },
    List { all: bool, long: bool },
    Defragment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Irq {
    Timer,
    Keyboard(KeyEvent),
    Disk(DiskRequest),
    /// Raised by the `SYS` instruction with the X and Y registers it saw.
    Syscall { pid: Pid, x: u8, y: u8 },
    ProcessStatus,
    SingleStep,
    NextStep,
    ContextSwitch,
    ChangeQuantum(u32),
    RunProcess(Pid),
    RunAllProcesses,
    SetScheduleAlgorithm(SchedulingAlgorithm),
    /// Raised by `BRK`: the process ended on its own.
    TerminateProcess(Pid),
    KillProcess(Pid),
    KillAll,
    /// A vector with no handler. Delivering one traps the kernel.
    Unrecognized(u8),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("interrupt {vector} expects {expected}")]
    MissingParameter { vector: u8, expected: &'static str },
    #[error("'{value}' is not a valid {expected}")]
    InvalidParameter { value: String, expected: &'static str },
}

impl Irq {
    pub fn priority(&self) -> i32 {
        match self {
            Irq::ChangeQuantum(_) | Irq::SetScheduleAlgorithm(_) => POLICY_PRIORITY,
            _ => ROUTINE_PRIORITY,
        }
    }

    pub fn vector(&self) -> u8 {
        match self {
            Irq::Timer => 0,
            Irq::Keyboard(_) => 1,
            Irq::Disk(_) => 2,
            Irq::Syscall { .. } => 3,
            Irq::ProcessStatus => 4,
            Irq::SingleStep => 5,
            Irq::NextStep => 6,
            Irq::ContextSwitch => 7,
            Irq::ChangeQuantum(_) => 8,
            Irq::RunProcess(_) => 9,
            Irq::RunAllProcesses => 10,
            Irq::SetScheduleAlgorithm(_) => 11,
            Irq::TerminateProcess(_) => 12,
            Irq::KillProcess(_) => 13,
            Irq::KillAll => 14,
            Irq::Unrecognized(vector) => *vector,
        }
    }

    /// Builds an interrupt from a raw vector and the shell's parameters.
    /// Unknown vectors decode to `Unrecognized`; malformed parameters for a
    /// known vector are rejected here and never reach the queue.
    pub fn decode(vector: u8, params: &[&str]) -> Result<Irq, EventError> {
        let irq = match vector {
            0 => Irq::Timer,
            1 => Irq::Keyboard(decode_key(params)?),
            2 => Irq::Disk(decode_disk(params)?),
            3 => Irq::Syscall {
                pid: number(vector, params, 0, "pid")?,
                x: number(vector, params, 1, "register value")?,
                y: number(vector, params, 2, "register value")?,
            },
            4 => Irq::ProcessStatus,
            5 => Irq::SingleStep,
            6 => Irq::NextStep,
            7 => Irq::ContextSwitch,
            8 => Irq::ChangeQuantum(number(vector, params, 0, "quantum")?),
            9 => Irq::RunProcess(number(vector, params, 0, "pid")?),
            10 => Irq::RunAllProcesses,
            11 => {
                let name = param(vector, params, 0, "scheduling algorithm")?;
                Irq::SetScheduleAlgorithm(name.parse().map_err(|_| EventError::InvalidParameter {
                    value: name.to_string(),
                    expected: "scheduling algorithm",
                })?)
            }
            12 => Irq::TerminateProcess(number(vector, params, 0, "pid")?),
            13 => Irq::KillProcess(number(vector, params, 0, "pid")?),
            14 => Irq::KillAll,
            other => Irq::Unrecognized(other),
        };
        Ok(irq)
    }
}

impl fmt::Display for Irq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Irq::Timer => f.write_str("timer"),
            Irq::Keyboard(event) => write!(f, "keyboard {:?}", event),
            Irq::Disk(request) => write!(f, "disk {:?}", request),
            Irq::Syscall { pid, x, y } => write!(f, "syscall pid {} x={:#04x} y={:#04x}", pid, x, y),
            Irq::ProcessStatus => f.write_str("process status"),
            Irq::SingleStep => f.write_str("single step"),
            Irq::NextStep => f.write_str("next step"),
            Irq::ContextSwitch => f.write_str("context switch"),
            Irq::ChangeQuantum(quantum) => write!(f, "change quantum to {}", quantum),
            Irq::RunProcess(pid) => write!(f, "run pid {}", pid),
            Irq::RunAllProcesses => f.write_str("run all"),
            Irq::SetScheduleAlgorithm(algorithm) => write!(f, "set schedule {}", algorithm),
            Irq::TerminateProcess(pid) => write!(f, "terminate pid {}", pid),
            Irq::KillProcess(pid) => write!(f, "kill pid {}", pid),
            Irq::KillAll => f.write_str("kill all"),
            Irq::Unrecognized(vector) => write!(f, "unrecognized vector {}", vector),
        }
    }
}

fn param<'a>(vector: u8, params: &[&'a str], index: usize, expected: &'static str) -> Result<&'a str, EventError> {
    params
        .get(index)
        .copied()
        .ok_or(EventError::MissingParameter { vector, expected })
}

fn number<T: std::str::FromStr>(
    vector: u8,
    params: &[&str],
    index: usize,
    expected: &'static str,
) -> Result<T, EventError> {
    let value = param(vector, params, index, expected)?;
    value.parse().map_err(|_| EventError::InvalidParameter {
        value: value.to_string(),
        expected,
    })
}

fn decode_key(params: &[&str]) -> Result<KeyEvent, EventError> {
    let key = param(1, params, 0, "key")?;
    let event = match key {
        "enter" => KeyEvent::Enter,
        "backspace" => KeyEvent::Backspace,
        "command" => KeyEvent::Command(params[1..].join(" ")),
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyEvent::Char(c),
                _ => {
                    return Err(EventError::InvalidParameter {
                        value: key.to_string(),
                        expected: "key",
                    })
                }
            }
        }
    };
    Ok(event)
}

fn decode_disk(params: &[&str]) -> Result<DiskRequest, EventError> {
    let name = |index| param(2, params, index, "file name").map(str::to_string);
    let command = param(2, params, 0, "disk command")?;
    let request = match command {
        "format" => DiskRequest::Format {
            quick: params.get(1) != Some(&"-full"),
        },
        "create" => DiskRequest::Create(name(1)?),
        "write" => DiskRequest::Write {
            name: name(1)?,
            data: params.get(2..).map(|rest| rest.join(" ")).unwrap_or_default(),
        },
        "read" => DiskRequest::Read(name(1)?),
        "delete" => DiskRequest::Delete(name(1)?),
        "recover" => DiskRequest::Recover(name(1)?),
        "rename" => DiskRequest::Rename {
            from: name(1)?,
            to: name(2)?,
        },
        "copy" => DiskRequest::Copy {
            from: name(1)?,
            to: name(2)?,
        },
        "ls" => DiskRequest::List {
            all: params.contains(&"-a"),
            long: params.contains(&"-l"),
        },
        "defrag" => DiskRequest::Defragment,
        other => {
            return Err(EventError::InvalidParameter {
                value: other.to_string(),
                expected: "disk command",
            })
        }
    };
    Ok(request)
}
