//! Tools the assistant ships with.

mod random;
mod scratchpad;
mod time;

pub use random::GetRandomNumber;
pub use scratchpad::{CreateFile, DeleteFile, ScratchPad, UpdateFile};
pub use time::GetCurrentTime;

use crate::registry::ToolRegistry;

/// Registers every built-in tool, with the file tools rooted at `scratch_pad`.
pub fn register_builtin_tools(registry: &mut ToolRegistry, scratch_pad: ScratchPad) {
    registry.register(GetCurrentTime);
    registry.register(GetRandomNumber);
    registry.register(CreateFile::new(scratch_pad.clone()));
    registry.register(UpdateFile::new(scratch_pad.clone()));
    registry.register(DeleteFile::new(scratch_pad));
}
