//! Reference interpreter for generated streams. Executes the instruction set
//! word by word so tests can check behavior instead of exact instruction
//! sequences.

use std::collections::HashMap;

use fp_bytecode::{AddressingMode, Immediate, Instruction, InstructionStream, Opcode};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
}

impl Value {
    fn from_immediate(immediate: &Immediate) -> Result<Self, VmError> {
        match immediate {
            Immediate::Int(value) => Ok(Value::Int(*value)),
            Immediate::Float(value) => Ok(Value::Float(*value)),
            Immediate::Bool(value) => Ok(Value::Bool(*value)),
            Immediate::Char(value) => Ok(Value::Char(*value)),
            other => Err(VmError::runtime(format!("cannot push immediate {:?}", other))),
        }
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("vm error: {message}")]
    Runtime { message: String },
    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: usize },
}

impl VmError {
    fn runtime(message: impl Into<String>) -> Self {
        VmError::Runtime {
            message: message.into(),
        }
    }
}

type HostFn = Box<dyn Fn(&[Value]) -> Vec<Value>>;

pub struct Vm {
    stack: Vec<Value>,
    heap: Vec<Option<Vec<Value>>>,
    bp: i64,
    hosts: HashMap<String, HostFn>,
    /// Every host call with its arguments, in order.
    pub calls: Vec<(String, Vec<Value>)>,
    pub steps: usize,
    step_limit: usize,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            // handle 0 is null
            heap: vec![None],
            bp: 0,
            hosts: HashMap::new(),
            calls: Vec::new(),
            steps: 0,
            step_limit: 1_000_000,
        }
    }

    pub fn register(&mut self, name: &str, host: impl Fn(&[Value]) -> Vec<Value> + 'static) {
        self.hosts.insert(name.to_string(), Box::new(host));
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn live_allocations(&self) -> usize {
        self.heap.iter().filter(|object| object.is_some()).count()
    }

    /// Arguments of every call to host function `name`.
    pub fn calls_to(&self, name: &str) -> Vec<Vec<Value>> {
        self.calls
            .iter()
            .filter(|(called, _)| called == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn run(&mut self, stream: &InstructionStream) -> Result<(), VmError> {
        let instructions = stream.instructions();
        let mut pc = 0usize;
        loop {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(VmError::StepLimit {
                    limit: self.step_limit,
                });
            }
            let instruction = instructions
                .get(pc)
                .ok_or_else(|| VmError::runtime(format!("pc {} out of range", pc)))?;
            match self.step(pc, instruction)? {
                Flow::Next => pc += 1,
                Flow::Goto(target) => pc = target,
                Flow::Exit => return Ok(()),
            }
        }
    }

    fn step(&mut self, pc: usize, instruction: &Instruction) -> Result<Flow, VmError> {
        let imm = || {
            instruction
                .immediate
                .as_int()
                .ok_or_else(|| {
                    VmError::runtime(format!("{} needs an integer immediate", instruction))
                })
        };
        match instruction.opcode {
            Opcode::Push => match instruction.mode {
                AddressingMode::BasePointerRelative => self.push(Value::Int(self.bp + imm()?)),
                _ => self.push(Value::from_immediate(&instruction.immediate)?),
            },
            Opcode::Load => {
                let address = self.address(instruction.mode, imm()?)?;
                let value = self.read(address)?;
                self.push(value);
            }
            Opcode::Store => {
                let address = self.address(instruction.mode, imm()?)?;
                let value = self.pop()?;
                self.write(address, value)?;
            }
            Opcode::Pop => {
                let count = imm()? as usize;
                if count > self.stack.len() {
                    return Err(VmError::runtime("pop below the stack bottom"));
                }
                self.stack.truncate(self.stack.len() - count);
            }
            Opcode::Duplicate => {
                let top = *self
                    .stack
                    .last()
                    .ok_or_else(|| VmError::runtime("duplicate on empty stack"))?;
                self.push(top);
            }
            Opcode::Jump => return Ok(Flow::Goto(self.jump_target(pc, instruction.mode, imm()?)?)),
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                let cond = self.pop_bool()?;
                if cond == (instruction.opcode == Opcode::JumpIfTrue) {
                    return Ok(Flow::Goto(self.jump_target(pc, instruction.mode, imm()?)?));
                }
            }
            Opcode::PushBasePointer => self.push(Value::Int(self.bp)),
            Opcode::SetBasePointer => self.bp = self.stack.len() as i64 + imm()?,
            Opcode::PopBasePointer => self.bp = self.pop_int()?,
            Opcode::Allocate => {
                let size = match instruction.mode {
                    AddressingMode::Pop => self.pop_int()?,
                    _ => imm()?,
                };
                if size < 0 {
                    return Err(VmError::runtime(format!("negative allocation of {}", size)));
                }
                let handle = self.allocate(vec![Value::Int(0); size as usize]);
                self.push(Value::Int(handle));
            }
            Opcode::Deallocate => {
                let handle = self.pop_int()?;
                if handle != 0 {
                    let slot = self
                        .heap
                        .get_mut(handle as usize)
                        .ok_or_else(|| VmError::runtime(format!("bad handle {}", handle)))?;
                    if slot.take().is_none() {
                        return Err(VmError::runtime(format!("double free of {}", handle)));
                    }
                }
            }
            Opcode::HeapGet => {
                let offset = match instruction.mode {
                    AddressingMode::Runtime => self.pop_int()? + imm()?,
                    _ => imm()?,
                };
                let handle = self.pop_int()?;
                let value = *self.object(handle)?.get(offset as usize).ok_or_else(|| {
                    VmError::runtime(format!("offset {} outside object {}", offset, handle))
                })?;
                self.push(value);
            }
            Opcode::HeapSet => {
                let offset = match instruction.mode {
                    AddressingMode::Runtime => self.pop_int()? + imm()?,
                    _ => imm()?,
                };
                let handle = self.pop_int()?;
                let value = self.pop()?;
                let slot = self.object_mut(handle)?.get_mut(offset as usize).ok_or_else(|| {
                    VmError::runtime(format!("offset {} outside object {}", offset, handle))
                })?;
                *slot = value;
            }
            Opcode::NewString => {
                let Immediate::Str(text) = &instruction.immediate else {
                    return Err(VmError::runtime("new_string needs a string immediate"));
                };
                let handle = self.new_string(text);
                self.push(Value::Int(handle));
            }
            Opcode::CallExternal => {
                let arg_words = imm()? as usize;
                let name_handle = self.pop_int()?;
                let name = self.read_string(name_handle)?;
                if arg_words > self.stack.len() {
                    return Err(VmError::runtime("external call below the stack bottom"));
                }
                let args = self.stack.split_off(self.stack.len() - arg_words);
                let host = self
                    .hosts
                    .get(&name)
                    .ok_or_else(|| VmError::runtime(format!("unknown host function {}", name)))?;
                let results = host(&args);
                self.calls.push((name, args));
                self.stack.extend(results);
            }
            Opcode::Negate => {
                let value = match self.pop()? {
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Float(v) => Value::Float(-v),
                    other => return Err(VmError::runtime(format!("cannot negate {:?}", other))),
                };
                self.push(value);
            }
            Opcode::Not => {
                let value = match self.pop()? {
                    Value::Int(v) => Value::Int(!v),
                    Value::Bool(v) => Value::Bool(!v),
                    other => return Err(VmError::runtime(format!("cannot invert {:?}", other))),
                };
                self.push(value);
            }
            Opcode::IntToFloat => {
                let value = self.pop_int()?;
                self.push(Value::Float(value as f64));
            }
            Opcode::FloatToInt => match self.pop()? {
                Value::Float(value) => self.push(Value::Int(value as i64)),
                other => return Err(VmError::runtime(format!("expected float, found {:?}", other))),
            },
            Opcode::Exit => return Ok(Flow::Exit),
            opcode => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let value = binary(opcode, lhs, rhs)?;
                self.push(value);
            }
        }
        Ok(Flow::Next)
    }

    fn address(&mut self, mode: AddressingMode, imm: i64) -> Result<i64, VmError> {
        Ok(match mode {
            AddressingMode::Absolute => imm,
            AddressingMode::BasePointerRelative => self.bp + imm,
            AddressingMode::Relative => self.stack.len() as i64 + imm,
            AddressingMode::Runtime => self.pop_int()? + imm,
            AddressingMode::Pop => return Err(VmError::runtime("pop mode has no address")),
        })
    }

    fn jump_target(&mut self, pc: usize, mode: AddressingMode, imm: i64) -> Result<usize, VmError> {
        let target = match mode {
            AddressingMode::Relative => pc as i64 + imm,
            AddressingMode::Absolute => imm,
            AddressingMode::Runtime => self.pop_int()? + imm,
            other => return Err(VmError::runtime(format!("jump with mode {}", other))),
        };
        usize::try_from(target).map_err(|_| VmError::runtime(format!("jump to {}", target)))
    }

    fn read(&self, address: i64) -> Result<Value, VmError> {
        usize::try_from(address)
            .ok()
            .and_then(|index| self.stack.get(index).copied())
            .ok_or_else(|| VmError::runtime(format!("load from {} outside the stack", address)))
    }

    fn write(&mut self, address: i64, value: Value) -> Result<(), VmError> {
        let slot = usize::try_from(address)
            .ok()
            .and_then(|index| self.stack.get_mut(index))
            .ok_or_else(|| VmError::runtime(format!("store to {} outside the stack", address)))?;
        *slot = value;
        Ok(())
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::runtime("stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i64, VmError> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            other => Err(VmError::runtime(format!("expected int, found {:?}", other))),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        match self.pop()? {
            Value::Bool(value) => Ok(value),
            other => Err(VmError::runtime(format!("expected bool, found {:?}", other))),
        }
    }

    fn allocate(&mut self, words: Vec<Value>) -> i64 {
        self.heap.push(Some(words));
        (self.heap.len() - 1) as i64
    }

    fn object(&self, handle: i64) -> Result<&Vec<Value>, VmError> {
        self.heap
            .get(handle as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| VmError::runtime(format!("dangling handle {}", handle)))
    }

    fn object_mut(&mut self, handle: i64) -> Result<&mut Vec<Value>, VmError> {
        self.heap
            .get_mut(handle as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| VmError::runtime(format!("dangling handle {}", handle)))
    }

    /// A string object is `[payload handle, length]`; the payload holds one
    /// character per word.
    fn new_string(&mut self, text: &str) -> i64 {
        let chars: Vec<Value> = text.chars().map(Value::Char).collect();
        let len = chars.len() as i64;
        let payload = self.allocate(chars);
        self.allocate(vec![Value::Int(payload), Value::Int(len)])
    }

    fn read_string(&self, handle: i64) -> Result<String, VmError> {
        let object = self.object(handle)?;
        let Some(Value::Int(payload)) = object.first() else {
            return Err(VmError::runtime(format!("{} is not a string", handle)));
        };
        self.object(*payload)?
            .iter()
            .map(|word| match word {
                Value::Char(c) => Ok(*c),
                other => Err(VmError::runtime(format!("string payload holds {:?}", other))),
            })
            .collect()
    }
}

enum Flow {
    Next,
    Goto(usize),
    Exit,
}

fn binary(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value, VmError> {
    let value = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => match opcode {
            Opcode::Add => Value::Int(a.wrapping_add(b)),
            Opcode::Subtract => Value::Int(a.wrapping_sub(b)),
            Opcode::Multiply => Value::Int(a.wrapping_mul(b)),
            Opcode::Divide | Opcode::Modulo if b == 0 => {
                return Err(VmError::runtime("division by zero"))
            }
            Opcode::Divide => Value::Int(a.wrapping_div(b)),
            Opcode::Modulo => Value::Int(a.wrapping_rem(b)),
            Opcode::BitAnd => Value::Int(a & b),
            Opcode::BitOr => Value::Int(a | b),
            Opcode::BitXor => Value::Int(a ^ b),
            Opcode::ShiftLeft | Opcode::ShiftRight => {
                let shift = u32::try_from(b)
                    .ok()
                    .filter(|shift| *shift < 64)
                    .ok_or_else(|| VmError::runtime(format!("shift by {}", b)))?;
                if opcode == Opcode::ShiftLeft {
                    Value::Int(a << shift)
                } else {
                    Value::Int(a >> shift)
                }
            }
            _ => compare(opcode, a, b)?,
        },
        (Value::Float(a), Value::Float(b)) => match opcode {
            Opcode::Add => Value::Float(a + b),
            Opcode::Subtract => Value::Float(a - b),
            Opcode::Multiply => Value::Float(a * b),
            Opcode::Divide => Value::Float(a / b),
            Opcode::Modulo => Value::Float(a % b),
            _ => compare(opcode, a, b)?,
        },
        (Value::Char(a), Value::Char(b)) => compare(opcode, a, b)?,
        (Value::Bool(a), Value::Bool(b)) => compare(opcode, a, b)?,
        (lhs, rhs) => {
            return Err(VmError::runtime(format!(
                "{} on {:?} and {:?}",
                opcode, lhs, rhs
            )))
        }
    };
    Ok(value)
}

fn compare<T: PartialOrd>(opcode: Opcode, a: T, b: T) -> Result<Value, VmError> {
    let value = match opcode {
        Opcode::Equal => a == b,
        Opcode::NotEqual => a != b,
        Opcode::Less => a < b,
        Opcode::LessEqual => a <= b,
        Opcode::Greater => a > b,
        Opcode::GreaterEqual => a >= b,
        other => return Err(VmError::runtime(format!("{} is not a comparison", other))),
    };
    Ok(Value::Bool(value))
}
