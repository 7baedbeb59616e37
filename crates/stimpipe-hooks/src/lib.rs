#![forbid(unsafe_code)]

//! Hook chain registry of the stimpipe imaging pipeline.
//!
//! This crate is **GL-free**: shader programs and textures appear only as
//! plain `u32` names. Executing chains is the runtime's job.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod blit_options;
pub mod chains;
pub mod command;
pub mod entry;
pub mod hook_point;

pub use blit_options::{BlitOptions, BlitterChoice, TextureBinding, TextureTarget};
pub use chains::{HookChain, HookChains, InsertPosition, SlotInfo};
pub use command::HookCommand;
pub use entry::{
    BuiltinOp, EntryKindTag, HookEntry, HookKind, NativeCall, NativeCallback, ScissorRect,
    SyncLineStyle,
};
pub use hook_point::{list_all_hooks, HookPoint, HOOK_POINT_COUNT};
