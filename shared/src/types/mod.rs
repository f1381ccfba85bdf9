//! Record types shared by producers and the trace writer

pub mod events;
