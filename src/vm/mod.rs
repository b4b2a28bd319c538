pub mod shim;

pub use shim::{FrameworkShim, ShimClass, ShimMethod};

use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};

use crate::dex::{ClassDef, Code, Method};

/// Defensive step budget for one method body. The loop is already bounded by
/// the instruction stream length, but malformed bytecode must not be able to
/// spin once branch opcodes exist.
const MAX_STEPS: usize = 1 << 20;

pub type ObjectId = u64;

/// A runtime value held in a register or an object field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    String(String),
    Object(ObjectId),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Object(id) => write!(f, "object@{id}"),
        }
    }
}

/// An instance on the VM heap.
#[derive(Debug, Clone, PartialEq)]
pub struct VmObject {
    pub class_name: String,
    pub fields: HashMap<String, Value>,
}

/// Object table with monotonically assigned ids; the VM is sole owner.
pub struct ObjectHeap {
    objects: HashMap<ObjectId, VmObject>,
    next_id: ObjectId,
}

impl ObjectHeap {
    pub fn new() -> Self {
        ObjectHeap { objects: HashMap::new(), next_id: 1 }
    }

    pub fn create_object(&mut self, class_name: &str) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(
            id,
            VmObject { class_name: class_name.to_string(), fields: HashMap::new() },
        );
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&VmObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut VmObject> {
        self.objects.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for ObjectHeap {
    fn default() -> Self {
        ObjectHeap::new()
    }
}

/// One invocation's register file and program counter.
#[derive(Debug)]
pub struct Frame {
    pub class_name: String,
    pub method_name: String,
    pub registers: Vec<Value>,
    pub pc: usize,
}

/// Execution identity and state. Not an OS thread: invocation is synchronous
/// and runs to completion, so the call stack is currently depth 1.
pub struct VmThread {
    id: u64,
    frames: Vec<Frame>,
}

impl VmThread {
    pub fn new(id: u64) -> Self {
        VmThread { id, frames: Vec::new() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Ordered record of resolved invocations, used by the embedding layer to
/// observe lifecycle progress.
#[derive(Debug, Default)]
pub struct CallLog {
    entries: Vec<String>,
}

impl CallLog {
    pub fn new() -> Self {
        CallLog::default()
    }

    pub fn record(&mut self, entry: String) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Hard interpreter faults. Unresolved classes/methods are not faults; only
/// structurally malformed state is.
#[derive(Debug, PartialEq, Eq)]
pub enum InterpreterFault {
    BadRegister { index: usize, frame_size: usize },
}

impl fmt::Display for InterpreterFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterFault::BadRegister { index, frame_size } => {
                write!(f, "register v{index} out of range for {frame_size}-register frame")
            }
        }
    }
}

impl std::error::Error for InterpreterFault {}

/// Three-way method resolution outcome consumed by `invoke`.
pub enum Resolution<'a> {
    User(&'a Method),
    Shim(ShimMethod),
    Unresolved,
}

/// Register-machine interpreter. Reads the class table it is handed and
/// mutates only the thread it is given.
pub struct Interpreter<'a> {
    classes: &'a HashMap<String, ClassDef>,
    shim: &'a FrameworkShim,
}

impl<'a> Interpreter<'a> {
    pub fn new(classes: &'a HashMap<String, ClassDef>, shim: &'a FrameworkShim) -> Self {
        Interpreter { classes, shim }
    }

    /// Resolution order: loaded code first, then the framework shim. A miss
    /// in both is `Unresolved`, never an error.
    pub fn resolve(
        &self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Resolution<'a> {
        if let Some(class) = self.classes.get(class_name) {
            if let Some(method) = class.find_method(method_name, descriptor) {
                return Resolution::User(method);
            }
        }
        match self.shim.resolve(class_name, method_name) {
            Some(shim_method) => Resolution::Shim(shim_method),
            None => Resolution::Unresolved,
        }
    }

    /// Invokes `class_name.method_name` with the given arguments. Unknown
    /// methods degrade to a no-op so a missing callback never aborts the
    /// calling app's lifecycle.
    pub fn invoke(
        &self,
        thread: &mut VmThread,
        log: &mut CallLog,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Result<Value, InterpreterFault> {
        match self.resolve(class_name, method_name, descriptor) {
            Resolution::User(method) => {
                log.record(format!("user:{class_name}.{method_name}"));
                self.run_method(thread, class_name, method, args)
            }
            Resolution::Shim(shim_method) => {
                log.record(format!(
                    "shim:{}.{}",
                    shim_method.class.class_name(),
                    shim_method.name
                ));
                Ok(shim_method.call(args))
            }
            Resolution::Unresolved => {
                log.record(format!("noop:{class_name}.{method_name}"));
                debug!("[vm] {class_name}.{method_name}{descriptor} unresolved, no-op");
                Ok(Value::Void)
            }
        }
    }

    fn run_method(
        &self,
        thread: &mut VmThread,
        class_name: &str,
        method: &Method,
        args: &[Value],
    ) -> Result<Value, InterpreterFault> {
        let Some(code) = &method.code else {
            // abstract or native method, nothing to execute
            debug!("[vm] {class_name}.{} has no body", method.name);
            return Ok(Value::Void);
        };

        let registers_size = code.registers_size as usize;
        if args.len() > registers_size {
            warn!(
                "[vm] {}.{} called with {} args but only {} registers",
                class_name,
                method.name,
                args.len(),
                registers_size
            );
        }
        // Arguments bind to the lowest-numbered registers. Real Dalvik uses
        // the last ins_size registers; this interpreter only guarantees its
        // own convention is applied consistently.
        let mut registers = vec![Value::Null; registers_size];
        for (i, arg) in args.iter().take(registers_size).enumerate() {
            registers[i] = arg.clone();
        }

        info!("[vm] thread {} executing {}.{}", thread.id, class_name, method.name);
        thread.frames.push(Frame {
            class_name: class_name.to_string(),
            method_name: method.name.clone(),
            registers,
            pc: 0,
        });
        let result = run_frame(thread, code);
        thread.frames.pop();
        result
    }
}

/// Fetch-decode-execute over 16-bit code units: low byte is the opcode, the
/// high byte carries packed operands. Terminates on return, fall-off, or the
/// step budget.
fn run_frame(thread: &mut VmThread, code: &Code) -> Result<Value, InterpreterFault> {
    let Some(frame) = thread.frames.last_mut() else {
        return Ok(Value::Void);
    };
    let insns = &code.insns;
    let mut steps = 0usize;

    while frame.pc < insns.len() {
        steps += 1;
        if steps > MAX_STEPS {
            warn!(
                "[vm] step budget exhausted in {}.{}, abandoning frame",
                frame.class_name, frame.method_name
            );
            break;
        }

        let unit = insns[frame.pc];
        let op = (unit & 0xff) as u8;
        let hi = (unit >> 8) as u8;

        match op {
            // nop
            0x00 => frame.pc += 1,
            // move vA, vB
            0x01 => {
                let dst = (hi & 0x0f) as usize;
                let src = (hi >> 4) as usize;
                let value = reg(&frame.registers, src)?;
                set_reg(&mut frame.registers, dst, value)?;
                frame.pc += 1;
            }
            // return-void
            0x0e => return Ok(Value::Void),
            // return vAA
            0x0f => return reg(&frame.registers, hi as usize),
            // const/4 vA, #imm (4-bit immediate, sign-extended)
            0x1a => {
                let dst = (hi & 0x0f) as usize;
                let imm = ((hi & 0xf0) as i8) >> 4;
                set_reg(&mut frame.registers, dst, Value::Int(imm as i32))?;
                frame.pc += 1;
            }
            // invoke-kind / invoke-kind/range markers: the 3-unit footprint
            // is consumed but no nested call is made
            0x6e..=0x72 | 0x7e..=0x7f => {
                debug!(
                    "[vm] invoke marker 0x{op:02x} at pc {} not dispatched",
                    frame.pc
                );
                frame.pc += 3;
            }
            // unknown opcodes skip forward rather than faulting
            other => {
                debug!("[vm] skipping unsupported opcode 0x{other:02x} at pc {}", frame.pc);
                frame.pc += 1;
            }
        }
    }

    // falling off the end of the stream is an implicit return-void
    Ok(Value::Void)
}

fn reg(registers: &[Value], index: usize) -> Result<Value, InterpreterFault> {
    registers
        .get(index)
        .cloned()
        .ok_or(InterpreterFault::BadRegister { index, frame_size: registers.len() })
}

fn set_reg(registers: &mut [Value], index: usize, value: Value) -> Result<(), InterpreterFault> {
    match registers.get_mut(index) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(InterpreterFault::BadRegister { index, frame_size: registers.len() }),
    }
}
