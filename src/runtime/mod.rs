//! Managed-side half of the bridge.
//!
//! # Single Active Context
//! All foreign-heap work happens on one active context at a time. The
//! embedding enforces the exclusion; this crate only requires the
//! [`gil::Gil`] token as evidence. Nothing here blocks, suspends or retries:
//! every operation is a bounded, synchronous state transition.
//!
//! Managed values are `Rc`-shared and stay on the thread that entered the
//! foreign heap.

pub mod bridge;
pub mod gil;
pub mod leak_detector;
pub mod managed;
pub mod module;
pub mod tracking;
pub mod type_registry;
pub mod wrapper;
