//! Synchronization module
//!
//! This module builds the TDMA schedule that tells every slave its test
//! mode, time slot and test count for the next round.

pub mod scheduler;

pub use self::scheduler::TdmaScheduler;
