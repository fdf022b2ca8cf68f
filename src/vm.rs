use std::fmt;
use std::io;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::display::Renderer;
use crate::error::VmError;
use crate::instruction::Instruction;
use crate::state::{
    MachineState, FONT_GLYPH_SIZE, FONT_OFFSET, MEMORY_SIZE, PROGRAM_LOAD_OFFSET,
};

/// how far the program counter moves per instruction
const BYTES_PER_INSTRUCTION: u16 = 2;

/// Where the executor is in its life:
///
/// ```text
/// Init ──load_program──▶ Running ──fx0a────▶ WaitForKey
///                          ▲                     │
///                          └──key_down + step────┘
/// ```
///
/// WaitForKey is the only parked state; the host keeps calling `step` and
/// the machine resumes on its own once a key is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Init,
    Running,
    WaitForKey,
}

/// The delta an instruction proposes for the cycle it runs in. Handlers
/// write the next program counter and execution state here; the dispatcher
/// commits them once the handler returns, so a fault leaves the committed
/// state untouched.
pub struct CycleState {
    /// where the instruction was fetched from
    pub current_pc: u16,
    pub instruction: Instruction,
    next_pc: u16,
    execution_state: ExecutionState,
    key_target: usize,
}

impl CycleState {
    fn new(
        execution_state: ExecutionState,
        current_pc: u16,
        next_pc: u16,
        instruction: Instruction,
    ) -> Self {
        CycleState {
            current_pc,
            instruction,
            next_pc,
            execution_state,
            key_target: 0,
        }
    }

    pub fn next_pc(&self) -> u16 {
        self.next_pc
    }

    pub fn set_next_pc(&mut self, value: u16) {
        self.next_pc = value;
    }

    /// skip the following instruction
    fn skip_next(&mut self) {
        self.next_pc = self.next_pc.wrapping_add(BYTES_PER_INSTRUCTION);
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.execution_state
    }

    pub fn set_execution_state(&mut self, value: ExecutionState) {
        self.execution_state = value;
    }

    pub fn key_target(&self) -> usize {
        self.key_target
    }

    pub fn set_key_target(&mut self, register: usize) {
        self.key_target = register;
    }
}

/// The executor: owns the machine state and a pseudo-random source, borrows
/// a renderer, and advances one instruction per `step`. Timers and
/// presentation are driven separately by the host at their own rates.
pub struct Vm<'a> {
    state: MachineState,
    renderer: &'a mut dyn Renderer,
    execution_state: ExecutionState,
    key_value: Option<u8>,
    key_target: usize,
    rng: StdRng,
}

impl<'a> Vm<'a> {
    pub fn new(renderer: &'a mut dyn Renderer) -> Vm<'a> {
        Vm {
            state: MachineState::new(),
            renderer,
            execution_state: ExecutionState::Init,
            key_value: None,
            key_target: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// deterministic CXNN; everything else as `new`
    pub fn with_seed(renderer: &'a mut dyn Renderer, seed: u64) -> Vm<'a> {
        Vm {
            rng: StdRng::seed_from_u64(seed),
            ..Vm::new(renderer)
        }
    }

    /// adopt an already-prepared machine state and start running it
    pub fn with_state(state: MachineState, renderer: &'a mut dyn Renderer) -> Vm<'a> {
        Vm {
            state,
            execution_state: ExecutionState::Running,
            ..Vm::new(renderer)
        }
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MachineState {
        &mut self.state
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.execution_state
    }

    /// flush the renderer; the host calls this at its frame rate
    pub fn present(&mut self) -> Result<(), io::Error> {
        self.renderer.present()
    }

    /// wipe the machine back to its power-on image and start running
    pub fn reset(&mut self) {
        self.state.reset();
        self.execution_state = ExecutionState::Running;
        self.key_value = None;
        self.key_target = 0;
    }

    /// Reset, copy `program` in at the load offset and point the program
    /// counter at it.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), VmError> {
        let capacity = MEMORY_SIZE - PROGRAM_LOAD_OFFSET;
        if program.len() > capacity {
            return Err(VmError::ProgramTooLarge {
                size: program.len(),
                capacity,
            });
        }

        self.reset();
        self.state.write(PROGRAM_LOAD_OFFSET, program)?;
        self.state.set_pc(PROGRAM_LOAD_OFFSET as u16)?;
        Ok(())
    }

    /// the host reports a pressed keypad key; only one is tracked at a time
    pub fn key_down(&mut self, key: u8) {
        assert!(key <= 0xf, "keypad values are a single nibble");
        self.key_value = Some(key);
    }

    pub fn key_up(&mut self) {
        self.key_value = None;
    }

    /// decrement each timer that is still running
    pub fn tick_timers(&mut self) {
        if self.state.delay_timer() > 0 {
            self.state.set_delay_timer(self.state.delay_timer() - 1);
        }
        if self.state.sound_timer() > 0 {
            self.state.set_sound_timer(self.state.sound_timer() - 1);
        }
    }

    /// Advance one instruction, or service a key-wait park. Faults abort the
    /// step before the cycle delta is committed.
    pub fn step(&mut self) -> Result<(), VmError> {
        match self.execution_state {
            ExecutionState::Running => {
                let pc = self.state.pc();
                let instruction = self.fetch_and_decode(pc)?;
                let mut cycle = CycleState::new(
                    self.execution_state,
                    pc,
                    pc.wrapping_add(BYTES_PER_INSTRUCTION),
                    instruction,
                );

                self.execute_instruction(&mut cycle)?;

                self.state.set_pc(cycle.next_pc() % MEMORY_SIZE as u16)?;
                self.execution_state = cycle.execution_state();
                if self.execution_state == ExecutionState::WaitForKey {
                    self.key_target = cycle.key_target();
                }
                Ok(())
            }
            ExecutionState::WaitForKey => {
                if let Some(key) = self.key_value {
                    self.state.set_reg(self.key_target, key)?;
                    self.execution_state = ExecutionState::Running;
                    // resume atomically: the parked instruction completes
                    // within the same host step
                    self.step()?;
                }
                Ok(())
            }
            state => Err(VmError::UnimplementedState { state }),
        }
    }

    /// read the two instruction bytes at `address`, big-endian
    fn fetch_and_decode(&self, address: u16) -> Result<Instruction, VmError> {
        let at = usize::from(address);
        if at + 1 >= MEMORY_SIZE {
            return Err(VmError::MemoryAccess {
                address: at + 1,
                reason: "instruction fetch past end of memory",
            });
        }

        let word = u16::from(self.state.memory()[at]) << 8 | u16::from(self.state.memory()[at + 1]);
        Ok(Instruction::new(word))
    }

    fn execute_instruction(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        match cycle.instruction.prefix() {
            0x0 => self.machine_ops(cycle),
            0x1 => self.jump(cycle),
            0x2 => self.call(cycle),
            0x3 => self.skip_if_eq_imm(cycle),
            0x4 => self.skip_if_ne_imm(cycle),
            0x5 => self.skip_if_eq_reg(cycle),
            0x6 => self.load_imm(cycle),
            0x7 => self.add_imm(cycle),
            0x8 => self.alu_ops(cycle),
            0x9 => self.skip_if_ne_reg(cycle),
            0xa => self.load_index(cycle),
            0xb => self.jump_with_offset(cycle),
            0xc => self.random(cycle),
            0xd => self.draw_sprite(cycle),
            0xe => self.key_ops(cycle),
            0xf => self.counter_and_memory_ops(cycle),
            _ => unreachable!("prefix is a single nibble"),
        }
    }

    /// 0000 nop, 00e0 clear, 00ee return
    fn machine_ops(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        match cycle.instruction.lower_triplet() {
            // not in the original instruction set, but harmless
            0x000 => {}
            0x0e0 => self.renderer.clear(),
            0x0ee => {
                let return_address = self.state.pop_callstack()?;
                cycle.set_next_pc(return_address);
            }
            _ => {
                return Err(VmError::IllegalInstruction {
                    opcode: cycle.instruction.word(),
                    reason: "unrecognized machine routine",
                })
            }
        }
        Ok(())
    }

    /// 1nnn
    fn jump(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        cycle.set_next_pc(cycle.instruction.lower_triplet());
        Ok(())
    }

    /// 2nnn; the return address goes on the stack before the jump
    fn call(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        self.state
            .push_callstack(cycle.current_pc.wrapping_add(BYTES_PER_INSTRUCTION))?;
        cycle.set_next_pc(cycle.instruction.lower_triplet());
        Ok(())
    }

    /// 3xnn
    fn skip_if_eq_imm(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let vx = self.state.reg(cycle.instruction.nibble(2) as usize)?;
        if vx == cycle.instruction.lower_byte() {
            cycle.skip_next();
        }
        Ok(())
    }

    /// 4xnn
    fn skip_if_ne_imm(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let vx = self.state.reg(cycle.instruction.nibble(2) as usize)?;
        if vx != cycle.instruction.lower_byte() {
            cycle.skip_next();
        }
        Ok(())
    }

    /// 5xy0
    fn skip_if_eq_reg(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        if cycle.instruction.suffix() != 0 {
            return Err(VmError::IllegalInstruction {
                opcode: cycle.instruction.word(),
                reason: "register-compare skip takes no suffix",
            });
        }
        let vx = self.state.reg(cycle.instruction.nibble(2) as usize)?;
        let vy = self.state.reg(cycle.instruction.nibble(1) as usize)?;
        if vx == vy {
            cycle.skip_next();
        }
        Ok(())
    }

    /// 6xnn
    fn load_imm(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        self.state.set_reg(
            cycle.instruction.nibble(2) as usize,
            cycle.instruction.lower_byte(),
        )
    }

    /// 7xnn; wraps, and leaves vf alone
    fn add_imm(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let x = cycle.instruction.nibble(2) as usize;
        let vx = self.state.reg(x)?;
        self.state
            .set_reg(x, vx.wrapping_add(cycle.instruction.lower_byte()))
    }

    /// 8xyn register-to-register arithmetic; the flag is written before the
    /// result so vf-as-operand reads the pre-op value
    fn alu_ops(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let x = cycle.instruction.nibble(2) as usize;
        let y = cycle.instruction.nibble(1) as usize;
        let vx = self.state.reg(x)?;
        let vy = self.state.reg(y)?;

        match cycle.instruction.suffix() {
            // 8xy0 vx := vy
            0x0 => self.state.set_reg(x, vy)?,
            // 8xy1 vx |= vy
            0x1 => self.state.set_reg(x, vx | vy)?,
            // 8xy2 vx &= vy
            0x2 => self.state.set_reg(x, vx & vy)?,
            // 8xy3 vx ^= vy
            0x3 => self.state.set_reg(x, vx ^ vy)?,
            // 8xy4 vx += vy, vf = carry
            0x4 => {
                let (sum, carried) = vx.overflowing_add(vy);
                self.state.set_flag(carried as u8);
                self.state.set_reg(x, sum)?;
            }
            // 8xy5 vx -= vy, vf = 1 unless it borrowed
            0x5 => {
                self.state.set_flag((vx >= vy) as u8);
                self.state.set_reg(x, vx.wrapping_sub(vy))?;
            }
            // 8xy6 vx >>= vy, vf = old least significant bit
            0x6 => {
                self.state.set_flag(vx & 1);
                self.state
                    .set_reg(x, vx.checked_shr(u32::from(vy)).unwrap_or(0))?;
            }
            // 8xy7 vx = vy - vx, vf = 1 unless it borrowed
            0x7 => {
                self.state.set_flag((vy >= vx) as u8);
                self.state.set_reg(x, vy.wrapping_sub(vx))?;
            }
            // 8xye vx <<= vy, vf = old most significant bit
            0xe => {
                self.state.set_flag(vx >> 7);
                self.state
                    .set_reg(x, vx.checked_shl(u32::from(vy)).unwrap_or(0))?;
            }
            _ => {
                return Err(VmError::IllegalInstruction {
                    opcode: cycle.instruction.word(),
                    reason: "unknown arithmetic suffix",
                })
            }
        }
        Ok(())
    }

    /// 9xy0
    fn skip_if_ne_reg(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        if cycle.instruction.suffix() != 0 {
            return Err(VmError::IllegalInstruction {
                opcode: cycle.instruction.word(),
                reason: "register-compare skip takes no suffix",
            });
        }
        let vx = self.state.reg(cycle.instruction.nibble(2) as usize)?;
        let vy = self.state.reg(cycle.instruction.nibble(1) as usize)?;
        if vx != vy {
            cycle.skip_next();
        }
        Ok(())
    }

    /// annn
    fn load_index(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        self.state.set_index(cycle.instruction.lower_triplet())
    }

    /// bnnn, jump to nnn + v0
    fn jump_with_offset(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let offset = u16::from(self.state.reg(0)?);
        cycle.set_next_pc(cycle.instruction.lower_triplet() + offset);
        Ok(())
    }

    /// cxnn, vx := random byte AND nn
    fn random(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let value: u8 = self.rng.gen();
        self.state.set_reg(
            cycle.instruction.nibble(2) as usize,
            value & cycle.instruction.lower_byte(),
        )
    }

    /// dxyn: XOR an 8-wide, n-tall sprite at (vx, vy) with wraparound;
    /// vf records whether any lit pixel went dark
    fn draw_sprite(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let offset_x = usize::from(self.state.reg(cycle.instruction.nibble(2) as usize)?);
        let offset_y = usize::from(self.state.reg(cycle.instruction.nibble(1) as usize)?);
        let rows = usize::from(cycle.instruction.suffix());
        let sprite_address = usize::from(self.state.index());

        if sprite_address + rows >= MEMORY_SIZE {
            return Err(VmError::MemoryAccess {
                address: sprite_address + rows,
                reason: "sprite data out of bounds",
            });
        }

        let mut collision = 0;
        for row in 0..rows {
            let sprite_row = self.state.mem(sprite_address + row)?;
            for col in 0..8 {
                let bit = (sprite_row >> (7 - col)) & 1;
                collision |= self.renderer.set_pixel(offset_x + col, offset_y + row, bit);
            }
        }

        self.state.set_flag(collision);
        Ok(())
    }

    /// ex9e / exa1 key-state skips; with no key down, neither skips
    fn key_ops(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let vx = self.state.reg(cycle.instruction.nibble(2) as usize)?;
        match cycle.instruction.lower_byte() {
            0x9e => {
                if self.key_value == Some(vx) {
                    cycle.skip_next();
                }
            }
            0xa1 => {
                if let Some(key) = self.key_value {
                    if key != vx {
                        cycle.skip_next();
                    }
                }
            }
            _ => {
                return Err(VmError::IllegalInstruction {
                    opcode: cycle.instruction.word(),
                    reason: "unknown key-state suffix",
                })
            }
        }
        Ok(())
    }

    /// the fxnn family: timers, key-wait, index arithmetic, font lookup,
    /// bcd, and register-file save/restore
    fn counter_and_memory_ops(&mut self, cycle: &mut CycleState) -> Result<(), VmError> {
        let x = cycle.instruction.nibble(2) as usize;

        match cycle.instruction.lower_byte() {
            // fx07 vx := delay timer
            0x07 => self.state.set_reg(x, self.state.delay_timer())?,
            // fx0a: park until the host reports a key, then resume past it.
            // a key that is already down satisfies the wait immediately.
            0x0a => match self.key_value {
                Some(key) => self.state.set_reg(x, key)?,
                None => {
                    cycle.set_key_target(x);
                    cycle.set_next_pc(cycle.current_pc);
                    cycle.set_execution_state(ExecutionState::WaitForKey);
                }
            },
            // fx15 delay timer := vx
            0x15 => {
                let vx = self.state.reg(x)?;
                self.state.set_delay_timer(vx);
            }
            // fx18 sound timer := vx
            0x18 => {
                let vx = self.state.reg(x)?;
                self.state.set_sound_timer(vx);
            }
            // fx1e i += vx
            0x1e => {
                let vx = u16::from(self.state.reg(x)?);
                self.state.set_index(self.state.index() + vx)?;
            }
            // fx29 i := font glyph address for the digit in vx
            0x29 => {
                let digit = self.state.reg(x)?;
                if digit > 0xf {
                    return Err(VmError::IllegalInstruction {
                        opcode: cycle.instruction.word(),
                        reason: "font index out of range",
                    });
                }
                let glyph = FONT_OFFSET + FONT_GLYPH_SIZE * usize::from(digit);
                self.state.set_index(glyph as u16)?;
            }
            // fx33 decimal digits of vx into memory at i
            0x33 => {
                let at = usize::from(self.state.index());
                if at + 2 >= MEMORY_SIZE {
                    return Err(VmError::MemoryAccess {
                        address: at + 2,
                        reason: "bcd target out of bounds",
                    });
                }
                let vx = self.state.reg(x)?;
                self.state.set_mem(at, vx / 100)?;
                self.state.set_mem(at + 1, (vx % 100) / 10)?;
                self.state.set_mem(at + 2, vx % 10)?;
            }
            // fx55 save v0..=vx at i, then bump i past the block
            0x55 => {
                let at = usize::from(self.state.index());
                if at + x >= MEMORY_SIZE {
                    return Err(VmError::MemoryAccess {
                        address: at + x,
                        reason: "register save out of bounds",
                    });
                }
                for offset in 0..=x {
                    let value = self.state.reg(offset)?;
                    self.state.set_mem(at + offset, value)?;
                }
                self.state.set_index((at + x + 1) as u16)?;
            }
            // fx65 restore v0..=vx from i, then bump i past the block
            0x65 => {
                let at = usize::from(self.state.index());
                if at + x >= MEMORY_SIZE {
                    return Err(VmError::MemoryAccess {
                        address: at + x,
                        reason: "register restore out of bounds",
                    });
                }
                for offset in 0..=x {
                    let value = self.state.mem(at + offset)?;
                    self.state.set_reg(offset, value)?;
                }
                self.state.set_index((at + x + 1) as u16)?;
            }
            _ => {
                return Err(VmError::IllegalInstruction {
                    opcode: cycle.instruction.word(),
                    reason: "unknown fx suffix",
                })
            }
        }
        Ok(())
    }
}

impl fmt::Display for Vm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)
    }
}
