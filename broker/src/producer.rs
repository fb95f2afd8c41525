//! Stop-event producer.
//!
//! On every stop of the debuggee the debugger calls [`StopPublisher::on_stop`]
//! with a [`StopStateSource`]. The publisher reads the current state through
//! it and enqueues one update per type, always in the order register,
//! disassembly, stack, backtrace.

use stopcast_protocol::{RegisterSnapshot, StackSnapshot, UpdatePayload};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::queue::Publisher;

/// Read access to the stopped debuggee's state.
///
/// Implemented by the debugger integration. Each call happens on the
/// debugger's stop callback thread.
pub trait StopStateSource {
    /// Current register values and the rendered flags register
    fn registers(&mut self) -> Result<RegisterSnapshot, SourceError>;

    /// Up to `max_instructions` instructions starting at the program
    /// counter, one per line
    fn disassemble(&mut self, max_instructions: usize) -> Result<String, SourceError>;

    /// `len` bytes of memory starting at `sp`
    fn read_stack(&mut self, sp: u64, len: usize) -> Result<Vec<u8>, SourceError>;

    /// The call stack, one frame per line
    fn backtrace(&mut self) -> Result<String, SourceError>;
}

/// How much state is collected on each stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerLimits {
    /// Instructions disassembled from the program counter
    /// Default: 32
    pub disasm_instructions: usize,

    /// Bytes of stack memory read from the stack pointer
    /// Default: 1024 (64 rows of 16 bytes)
    pub stack_bytes: usize,

    /// Register holding the stack pointer
    /// Default: rsp
    pub stack_pointer: String,
}

impl Default for ProducerLimits {
    fn default() -> Self {
        Self {
            disasm_instructions: 32,
            stack_bytes: 64 * 16,
            stack_pointer: "rsp".to_string(),
        }
    }
}

/// Collects debugger state on each stop and enqueues it for the broker.
#[derive(Debug, Clone)]
pub struct StopPublisher {
    publisher: Publisher,
    limits: ProducerLimits,
}

impl StopPublisher {
    pub fn new(publisher: Publisher, limits: ProducerLimits) -> Self {
        Self { publisher, limits }
    }

    pub fn limits(&self) -> &ProducerLimits {
        &self.limits
    }

    /// Handle one stop event.
    ///
    /// Returns how many updates the broker accepted. A source error ends
    /// collection early; updates already enqueued for this stop are kept.
    pub fn on_stop<S>(&self, source: &mut S) -> Result<usize, SourceError>
    where
        S: StopStateSource + ?Sized,
    {
        let mut accepted = 0;

        let registers = source.registers()?;
        let sp = registers.get(&self.limits.stack_pointer);
        accepted += self.emit(UpdatePayload::Register(registers));

        let disasm = source.disassemble(self.limits.disasm_instructions)?;
        accepted += self.emit(UpdatePayload::Disasm(disasm));

        match sp {
            Some(sp) => {
                let data = source.read_stack(sp, self.limits.stack_bytes)?;
                accepted += self.emit(UpdatePayload::Stack(StackSnapshot { data, sp }));
            }
            None => warn!(
                register = %self.limits.stack_pointer,
                "Stack pointer unavailable, skipping stack update"
            ),
        }

        let backtrace = source.backtrace()?;
        accepted += self.emit(UpdatePayload::Backtrace(backtrace));

        debug!(accepted, "Published stop event");
        Ok(accepted)
    }

    fn emit(&self, payload: UpdatePayload) -> usize {
        usize::from(self.publisher.publish(payload))
    }
}
