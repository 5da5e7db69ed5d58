//! Domain types shared by the gate, cache and mutation layers.

pub mod task;

pub use task::{
    NewTask, Priority, Task, TaskId, TaskPatch, UserId, MAX_DESCRIPTION_CHARS, MAX_TITLE_CHARS,
};
