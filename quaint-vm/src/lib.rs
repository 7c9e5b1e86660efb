// The Quaint virtual machine: executes the three-address Program produced
// by quaint-compiler. All program-visible storage lives in one flat
// address space owned by the machine; quaints are slab records addressed
// by opaque 8-byte ids, so a stale handle degrades to null instead of
// undefined behavior.

mod machine;
mod mem;

pub use machine::{Machine, STACK_SIZE};
pub use mem::Mem;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("illegal instruction at {ip}: {detail}")]
    IllegalInstruction { ip: u64, detail: String },

    #[error("division by zero at {ip}")]
    DivisionByZero { ip: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
