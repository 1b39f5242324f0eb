pub mod claude;
pub mod completion;
pub mod telegram;
