//! Use-cases composing the store, the executor and the scheduler.

pub mod spiders;
pub mod tasks;

pub use spiders::{SpiderRunner, SpiderService, UploadedScript};
pub use tasks::{RestoreReport, TaskService};
