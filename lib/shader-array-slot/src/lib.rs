//! Growable shader-array slot manager: one fixed-stride storage buffer per
//! named array, with per-slot reservation, dirty tracking, and
//! start/finish update callbacks so a caller can batch its writes with the
//! rest of its per-frame bookkeeping.

pub mod manager;

pub use manager::{
    ShaderArraySlotError, ShaderArraySlotManager, SlotHandle, StartUpdateCallback,
    UpdateFinishedCallback,
};
