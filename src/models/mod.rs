pub mod change_event;
pub mod generation;
pub mod job;
pub mod npc;
