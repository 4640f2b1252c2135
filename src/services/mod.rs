pub mod completion;
pub mod initiator;
pub mod prompt;
pub mod queue;
pub mod status;
pub mod storage;
pub mod worker;
