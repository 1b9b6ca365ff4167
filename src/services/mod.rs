pub mod notifier;
pub mod pipeline;
pub mod scratch;
pub mod storage;
pub mod transfer;
pub mod upscaler;
