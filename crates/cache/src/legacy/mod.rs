//! Legacy string-keyed API: fetch-or-build tasks and their handles

pub mod handles;
pub mod task;

pub use handles::{HandleTable, FIRST_HANDLE};
pub use task::{LegacyFetchOrBuildTask, LegacyGetResult};
